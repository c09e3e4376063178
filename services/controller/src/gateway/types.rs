//! Wire types exchanged with the infrastructure APIs.
//!
//! Compute, network and DHCP payloads use the provider's camelCase shape;
//! load-balancer and account payloads are snake_case.

use serde::{Deserialize, Serialize};

use crate::model::Protocol;

// =============================================================================
// Compute
// =============================================================================

/// Instance summary as returned by list and create calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceRef {
    #[serde(rename = "pvmInstanceID")]
    pub instance_id: String,
    pub server_name: String,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    #[serde(rename = "pvmInstanceID")]
    pub instance_id: String,
    pub server_name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fault: Option<Fault>,
    #[serde(default)]
    pub networks: Vec<InstanceNetwork>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fault {
    #[serde(default)]
    pub message: String,
}

/// How an instance received its address on a network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    /// Statically assigned; the address is reported on the instance.
    #[default]
    Fixed,
    /// DHCP assigned; the address lives in the DHCP server's lease table.
    Dynamic,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceNetwork {
    #[serde(rename = "networkID")]
    pub network_id: String,
    #[serde(default)]
    pub network_name: String,
    #[serde(default)]
    pub mac_address: String,
    #[serde(default)]
    pub ip_address: String,
    #[serde(rename = "externalIP", default)]
    pub external_ip: String,
    #[serde(rename = "type", default)]
    pub kind: AttachmentKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateInstanceRequest {
    pub server_name: String,
    #[serde(rename = "imageID")]
    pub image_id: String,
    pub networks: Vec<NetworkAttachment>,
    /// Memory in GiB.
    pub memory: f64,
    pub processors: f64,
    pub proc_type: String,
    pub sys_type: String,
    /// Base64-encoded, newline-joined SSH public keys.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user_data: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkAttachment {
    #[serde(rename = "networkID")]
    pub network_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    #[serde(rename = "imageID")]
    pub image_id: String,
    pub name: String,
    #[serde(default)]
    pub state: String,
}

// =============================================================================
// Network / DHCP
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkKind {
    #[serde(rename = "vlan")]
    Private,
    #[serde(rename = "pub-vlan")]
    Public,
    #[serde(rename = "dhcp-vlan")]
    Dhcp,
}

impl NetworkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Private => "vlan",
            Self::Public => "pub-vlan",
            Self::Dhcp => "dhcp-vlan",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkRef {
    #[serde(rename = "networkID")]
    pub network_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: NetworkKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Network {
    #[serde(rename = "networkID")]
    pub network_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: NetworkKind,
    #[serde(default)]
    pub ip_address_metrics: IpAddressMetrics,
}

impl Network {
    pub fn has_capacity(&self) -> bool {
        self.ip_address_metrics.available > 0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpAddressMetrics {
    #[serde(default)]
    pub available: u32,
    #[serde(default)]
    pub used: u32,
    #[serde(default)]
    pub total: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateNetworkRequest {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: NetworkKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dns_servers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DhcpNetwork {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DhcpServerRef {
    pub id: String,
    pub network: DhcpNetwork,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DhcpServer {
    pub id: String,
    pub network: DhcpNetwork,
    #[serde(default)]
    pub leases: Vec<DhcpLease>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DhcpLease {
    #[serde(rename = "instanceMacAddress")]
    pub mac_address: String,
    #[serde(rename = "instanceIP")]
    pub ip_address: String,
}

// =============================================================================
// Account mirror
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub guid: String,
    pub state: String,
    #[serde(default)]
    pub region_id: String,
}

// =============================================================================
// Load balancer
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancer {
    pub id: String,
    pub hostname: String,
    pub provisioning_status: String,
    #[serde(default)]
    pub operating_status: String,
}

impl LoadBalancer {
    /// The load balancer serializes updates; it accepts changes only while active.
    pub fn is_active(&self) -> bool {
        self.provisioning_status == "active"
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRef {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pool {
    pub id: String,
    pub name: String,
    pub protocol: Protocol,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolAlgorithm {
    RoundRobin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthMonitorKind {
    Tcp,
    Http,
    Https,
}

impl From<Protocol> for HealthMonitorKind {
    fn from(protocol: Protocol) -> Self {
        match protocol {
            Protocol::Http => Self::Http,
            Protocol::Https => Self::Https,
            Protocol::Tcp | Protocol::Udp => Self::Tcp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthMonitor {
    #[serde(rename = "type")]
    pub kind: HealthMonitorKind,
    pub delay: u32,
    pub max_retries: u32,
    pub timeout: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolMemberTarget {
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolMember {
    pub port: u16,
    pub target: PoolMemberTarget,
    pub weight: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePoolRequest {
    pub name: String,
    pub algorithm: PoolAlgorithm,
    pub protocol: Protocol,
    pub health_monitor: HealthMonitor,
    pub members: Vec<PoolMember>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listener {
    pub id: String,
    pub port: u16,
    pub protocol: Protocol,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_pool: Option<ResourceRef>,
}

impl Listener {
    pub fn uses_pool(&self, pool: &Pool) -> bool {
        self.default_pool
            .as_ref()
            .is_some_and(|p| p.id == pool.id || (!p.name.is_empty() && p.name == pool.name))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateListenerRequest {
    pub port: u16,
    pub protocol: Protocol,
    pub default_pool: ResourceRef,
}
