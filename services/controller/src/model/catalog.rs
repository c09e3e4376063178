use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ObjectMeta, Resource};
use crate::error::Error;

/// Finalizer that blocks catalog removal while services still reference it.
pub const CATALOG_FINALIZER: &str = "catalogs.pac.io/in-use";

/// System types a catalog may request.
pub const ALLOWED_SYSTEM_TYPES: &[&str] = &["s922", "e880", "e980", "s1022", "e1080"];

/// Processor types a catalog may request.
pub const ALLOWED_PROCESSOR_TYPES: &[&str] = &["dedicated", "shared", "capped"];

/// Template for a provisionable offering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    pub metadata: ObjectMeta,
    pub spec: CatalogSpec,
    #[serde(default)]
    pub status: CatalogStatus,
}

impl Catalog {
    pub fn new(name: impl Into<String>, spec: CatalogSpec) -> Self {
        Self {
            metadata: ObjectMeta::new(name),
            spec,
            status: CatalogStatus::default(),
        }
    }
}

impl Resource for Catalog {
    const KIND: &'static str = "Catalog";

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CatalogType {
    #[default]
    Vm,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogSpec {
    #[serde(rename = "type", default)]
    pub catalog_type: CatalogType,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub retired: bool,

    /// Lifetime granted to services that do not declare an expiry.
    pub expiry_days: u32,

    pub capacity: Capacity,

    pub vm: VmBacking,
}

/// Capacity envelope. CPU is a fractional core count kept in its textual form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capacity {
    pub cpu: String,

    /// Memory in MiB.
    pub memory: u64,
}

/// Backing resources a VM catalog provisions from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmBacking {
    /// CRN of the compute workspace.
    pub account: String,

    pub image: String,

    /// Pinned network name; when absent a public network is selected or created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,

    pub system_type: String,

    pub processor_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogStatus {
    #[serde(default)]
    pub ready: bool,

    #[serde(default)]
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_checked: Option<DateTime<Utc>>,
}

/// Parsed compute-account reference.
///
/// Format: `crn:v1:<cloud>:<visibility>:<service>:<zone>:a/<account>:<instance>::`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountRef {
    pub crn: String,
    pub zone: String,
    pub account: String,
    pub instance: String,
}

impl FromStr for AccountRef {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() < 8 || parts[0] != "crn" {
            return Err(Error::Validation(format!(
                "account reference '{s}' is not a valid CRN"
            )));
        }

        let zone = parts[5];
        let account = parts[6].strip_prefix("a/").unwrap_or(parts[6]);
        let instance = parts[7];

        if zone.is_empty() || instance.is_empty() {
            return Err(Error::Validation(format!(
                "account reference '{s}' is missing a zone or instance id"
            )));
        }

        Ok(Self {
            crn: s.to_string(),
            zone: zone.to_string(),
            account: account.to_string(),
            instance: instance.to_string(),
        })
    }
}

impl fmt::Display for AccountRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.crn)
    }
}
