use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::{Catalog, ObjectMeta, Resource};

/// Finalizer held until the service's external side effects are undone.
pub const SERVICE_FINALIZER: &str = "services.pac.io/teardown";

/// A single provisioned instance of a catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub metadata: ObjectMeta,
    pub spec: ServiceSpec,
    #[serde(default)]
    pub status: ServiceStatus,
}

impl Service {
    pub fn new(name: impl Into<String>, spec: ServiceSpec) -> Self {
        Self {
            metadata: ObjectMeta::new(name),
            spec,
            status: ServiceStatus::default(),
        }
    }

    /// Declared expiry, or creation time plus the catalog's default lifetime.
    /// A lifetime past the end of representable time never expires.
    pub fn effective_expiry(&self, catalog: Option<&Catalog>) -> Option<DateTime<Utc>> {
        if let Some(expiry) = self.spec.expiry {
            return Some(expiry);
        }
        let lifetime = Duration::try_days(i64::from(catalog?.spec.expiry_days))?;
        self.metadata.creation_timestamp.checked_add_signed(lifetime)
    }

    pub fn is_past_expiry(&self, now: DateTime<Utc>, catalog: Option<&Catalog>) -> bool {
        self.effective_expiry(catalog)
            .is_some_and(|expiry| now >= expiry)
    }
}

impl Resource for Service {
    const KIND: &'static str = "Service";

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

/// Backend pool name for an exposed port. At most one listener may use it.
pub fn pool_name(service: &str, port: u16) -> String {
    format!("{service}-{port}")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSpec {
    /// Owning user; immutable after creation.
    pub user_id: String,

    #[serde(default)]
    pub display_name: String,

    /// Catalog name; immutable after creation.
    pub catalog: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,

    #[serde(default)]
    pub ssh_keys: Vec<String>,

    #[serde(default)]
    pub capacity: CapacityRequest,

    #[serde(default)]
    pub ports: Vec<PortSpec>,
}

/// Requested capacity. Unset fields inherit the catalog's value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,

    /// Memory in MiB.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSpec {
    pub port: u16,
    #[serde(default)]
    pub protocol: Protocol,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
    Http,
    Https,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
            Self::Http => "http",
            Self::Https => "https",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Business state of a service.
///
/// `NEW -> IN_PROGRESS -> {CREATED | FAILED}`, `EXPIRED` once past expiry,
/// `ERROR` while the owning catalog is retired or not ready. Nothing moves
/// back into `NEW`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceState {
    #[default]
    New,
    InProgress,
    Created,
    Failed,
    Expired,
    Error,
}

impl ServiceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::InProgress => "IN_PROGRESS",
            Self::Created => "CREATED",
            Self::Failed => "FAILED",
            Self::Expired => "EXPIRED",
            Self::Error => "ERROR",
        }
    }

    /// States the reconciler does not move out of on its own.
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Failed | Self::Expired)
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of the backing compute instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmStatus {
    /// Set at most once per service lifetime.
    #[serde(default)]
    pub instance_id: String,

    #[serde(default)]
    pub ip_address: String,

    #[serde(default)]
    pub external_ip_address: String,

    #[serde(default)]
    pub mac_address: String,

    #[serde(default)]
    pub network: String,

    /// Raw provider status string.
    #[serde(default)]
    pub state: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngressStatus {
    pub port: u16,
    pub protocol: Protocol,
    pub pool: String,
    /// External listener port on the load balancer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<u16>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    #[serde(default)]
    pub state: ServiceState,

    #[serde(default)]
    pub message: String,

    #[serde(default)]
    pub access_info: String,

    #[serde(default)]
    pub expired: bool,

    #[serde(default)]
    pub successful: bool,

    #[serde(default)]
    pub vm: VmStatus,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ingress: Vec<IngressStatus>,

    /// Public hostname of the load balancer fronting the service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reconciled: Option<DateTime<Utc>>,
}

impl ServiceStatus {
    pub fn mark_in_progress(&mut self, message: impl Into<String>) {
        self.state = ServiceState::InProgress;
        self.message = message.into();
        self.successful = false;
    }

    pub fn mark_created(&mut self, access_info: impl Into<String>) {
        self.state = ServiceState::Created;
        self.successful = true;
        self.access_info = access_info.into();
        self.message.clear();
    }

    pub fn mark_failed(&mut self, message: impl Into<String>) {
        self.state = ServiceState::Failed;
        self.successful = false;
        self.access_info.clear();
        self.message = message.into();
    }

    pub fn mark_error(&mut self, message: impl Into<String>) {
        self.state = ServiceState::Error;
        self.successful = false;
        self.message = message.into();
    }

    pub fn mark_expired(&mut self, message: impl Into<String>) {
        self.state = ServiceState::Expired;
        self.expired = true;
        self.successful = false;
        self.access_info.clear();
        self.endpoint = None;
        for port in &mut self.ingress {
            port.target = None;
        }
        self.message = message.into();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Capacity, CatalogSpec, CatalogType, VmBacking};

    fn spec() -> ServiceSpec {
        ServiceSpec {
            user_id: "user-1".to_string(),
            display_name: "dev box".to_string(),
            catalog: "rhel".to_string(),
            expiry: None,
            ssh_keys: vec![],
            capacity: CapacityRequest::default(),
            ports: vec![],
        }
    }

    fn catalog(expiry_days: u32) -> Catalog {
        Catalog::new(
            "rhel",
            CatalogSpec {
                catalog_type: CatalogType::Vm,
                description: String::new(),
                retired: false,
                expiry_days,
                capacity: Capacity {
                    cpu: "1".to_string(),
                    memory: 4096,
                },
                vm: VmBacking {
                    account: "crn:v1:bluemix:public:power-iaas:dal10:a/abc:inst::".to_string(),
                    image: "rhel-9".to_string(),
                    network: None,
                    system_type: "s922".to_string(),
                    processor_type: "shared".to_string(),
                },
            },
        )
    }

    #[test]
    fn test_state_serialization() {
        let json = serde_json::to_string(&ServiceState::InProgress).unwrap();
        assert_eq!(json, "\"IN_PROGRESS\"");
        let state: ServiceState = serde_json::from_str("\"EXPIRED\"").unwrap();
        assert_eq!(state, ServiceState::Expired);
    }

    #[test]
    fn test_pool_name() {
        assert_eq!(pool_name("devbox", 22), "devbox-22");
    }

    #[test]
    fn test_effective_expiry_prefers_declared() {
        let mut service = Service::new("svc", spec());
        let declared = Utc::now() + Duration::hours(1);
        service.spec.expiry = Some(declared);

        assert_eq!(service.effective_expiry(Some(&catalog(7))), Some(declared));
    }

    #[test]
    fn test_effective_expiry_defaults_from_catalog() {
        let service = Service::new("svc", spec());
        let expiry = service.effective_expiry(Some(&catalog(7))).unwrap();

        assert_eq!(expiry - service.metadata.creation_timestamp, Duration::days(7));
        assert!(!service.is_past_expiry(Utc::now(), Some(&catalog(7))));
        assert!(service.is_past_expiry(Utc::now() + Duration::days(8), Some(&catalog(7))));
        assert!(!service.is_past_expiry(Utc::now() + Duration::days(8), None));
    }

    #[test]
    fn test_oversized_lifetime_never_expires() {
        let service = Service::new("svc", spec());
        let forever = catalog(u32::MAX);

        assert_eq!(service.effective_expiry(Some(&forever)), None);
        assert!(!service.is_past_expiry(Utc::now() + Duration::days(365), Some(&forever)));
    }

    #[test]
    fn test_mark_expired_clears_access() {
        let mut status = ServiceStatus::default();
        status.mark_created("203.0.113.7");
        status.endpoint = Some("lb.example.com".to_string());
        status.ingress.push(IngressStatus {
            port: 22,
            protocol: Protocol::Tcp,
            pool: "svc-22".to_string(),
            target: Some(31022),
        });

        status.mark_expired("service expired");

        assert_eq!(status.state, ServiceState::Expired);
        assert!(status.expired);
        assert!(!status.successful);
        assert!(status.access_info.is_empty());
        assert!(status.endpoint.is_none());
        assert_eq!(status.ingress[0].target, None);
    }
}
