//! Capacity validation against a catalog's envelope.

use crate::error::{Error, Result};
use crate::model::{Capacity, CapacityRequest};

/// Parse a fractional core count.
pub fn parse_cpu(value: &str) -> Result<f64> {
    let cpu: f64 = value
        .trim()
        .parse()
        .map_err(|_| Error::Validation(format!("cpu '{value}' is not a number")))?;

    if !cpu.is_finite() || cpu <= 0.0 {
        return Err(Error::Validation(format!(
            "cpu '{value}' must be a positive number"
        )));
    }
    Ok(cpu)
}

/// Resolve a requested shape against the catalog envelope.
///
/// Unset fields inherit the catalog's value; set fields must not exceed it.
/// CPU is compared numerically. Runs before any external call.
pub fn validate_capacity(envelope: &Capacity, request: &CapacityRequest) -> Result<Capacity> {
    let max_cpu = parse_cpu(&envelope.cpu)?;

    let cpu = match request.cpu.as_deref().map(str::trim) {
        None | Some("") => envelope.cpu.clone(),
        Some(requested) => {
            if parse_cpu(requested)? > max_cpu {
                return Err(Error::Validation(format!(
                    "requested cpu {requested} exceeds catalog limit {}",
                    envelope.cpu
                )));
            }
            requested.to_string()
        }
    };

    let memory = match request.memory {
        None => envelope.memory,
        Some(0) => {
            return Err(Error::Validation(
                "memory must be greater than zero".to_string(),
            ))
        }
        Some(requested) if requested > envelope.memory => {
            return Err(Error::Validation(format!(
                "requested memory {requested}MiB exceeds catalog limit {}MiB",
                envelope.memory
            )));
        }
        Some(requested) => requested,
    };

    Ok(Capacity { cpu, memory })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn envelope(cpu: &str, memory: u64) -> Capacity {
        Capacity {
            cpu: cpu.to_string(),
            memory,
        }
    }

    #[test]
    fn test_unset_memory_inherits_catalog() {
        let resolved = validate_capacity(
            &envelope("4", 8192),
            &CapacityRequest {
                cpu: Some("2".to_string()),
                memory: None,
            },
        )
        .unwrap();

        assert_eq!(resolved, envelope("2", 8192));
    }

    #[test]
    fn test_fully_unset_request_equals_envelope() {
        let resolved = validate_capacity(&envelope("0.5", 4096), &CapacityRequest::default()).unwrap();
        assert_eq!(resolved, envelope("0.5", 4096));
    }

    #[test]
    fn test_cpu_compared_numerically() {
        // "10" < "4" lexically.
        let err = validate_capacity(
            &envelope("4", 8192),
            &CapacityRequest {
                cpu: Some("10".to_string()),
                memory: None,
            },
        )
        .unwrap_err();

        let message = err.to_string();
        assert!(message.contains("10"), "{message}");
        assert!(message.contains("4"), "{message}");

        assert!(validate_capacity(
            &envelope("10", 8192),
            &CapacityRequest {
                cpu: Some("4.5".to_string()),
                memory: None,
            },
        )
        .is_ok());
    }

    #[test]
    fn test_memory_over_limit_names_both_bounds() {
        let err = validate_capacity(
            &envelope("4", 8192),
            &CapacityRequest {
                cpu: None,
                memory: Some(16384),
            },
        )
        .unwrap_err();

        assert!(matches!(err, Error::Validation(_)));
        assert!(err.to_string().contains("16384MiB"));
        assert!(err.to_string().contains("8192MiB"));
    }

    #[test]
    fn test_non_numeric_cpu_is_rejected() {
        let err = validate_capacity(
            &envelope("4", 8192),
            &CapacityRequest {
                cpu: Some("lots".to_string()),
                memory: None,
            },
        )
        .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        assert!(parse_cpu("NaN").is_err());
        assert!(parse_cpu("-1").is_err());
        assert!(parse_cpu("0").is_err());
        assert_eq!(parse_cpu(" 0.25 ").unwrap(), 0.25);
    }

    proptest! {
        #[test]
        fn prop_capacity_monotonic(
            max_quarters in 1u32..256,
            req_quarters in proptest::option::of(1u32..512),
            max_memory in 1u64..65536,
            req_memory in proptest::option::of(1u64..131072),
        ) {
            let cap = envelope(&(f64::from(max_quarters) / 4.0).to_string(), max_memory);
            let request = CapacityRequest {
                cpu: req_quarters.map(|q| (f64::from(q) / 4.0).to_string()),
                memory: req_memory,
            };

            let over = req_quarters.is_some_and(|q| q > max_quarters)
                || req_memory.is_some_and(|m| m > max_memory);

            match validate_capacity(&cap, &request) {
                Ok(resolved) => {
                    prop_assert!(!over);
                    prop_assert_eq!(resolved.memory, req_memory.unwrap_or(max_memory));
                    if request.cpu.is_none() {
                        prop_assert_eq!(resolved.cpu, cap.cpu);
                    }
                }
                Err(_) => prop_assert!(over),
            }
        }
    }
}
