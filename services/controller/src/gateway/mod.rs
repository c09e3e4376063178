//! Thin typed clients for the infrastructure the controller drives.
//!
//! Each API sits behind a trait so reconciliation logic can run against
//! either the HTTP clients or the in-memory [`fake::FakeCloud`]:
//!
//! - [`ComputeGateway`]: instances and images
//! - [`NetworkGateway`]: networks and DHCP servers
//! - [`LoadBalancerGateway`]: backend pools and listeners
//! - [`AccountMirror`]: read-only mirror of compute-account state
//!
//! Gateways carry no policy. "Get" calls report a missing object as
//! [`GatewayError::NotFound`], never as a transport failure, which is what
//! lets callers list-then-create-if-absent.

pub mod fake;
pub mod http;
mod types;

pub use types::*;

use std::sync::Arc;

use async_trait::async_trait;
use pac_reconcile::ErrorClass;
use thiserror::Error;

use crate::model::AccountRef;

/// Result type for gateway calls.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Gateway call failures.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The named object does not exist.
    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    /// The call exceeded its deadline.
    #[error("request timed out: {0}")]
    Timeout(String),

    /// Connection-level failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The API answered with a non-success status.
    #[error("api returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The response body did not match the expected shape.
    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl GatewayError {
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Timeout(_) | Self::Transport(_) => ErrorClass::Retryable,
            Self::Status { status, .. } if *status >= 500 || *status == 409 || *status == 429 => {
                ErrorClass::Retryable
            }
            Self::NotFound { .. } | Self::Status { .. } | Self::Decode(_) => ErrorClass::Terminal,
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(e.to_string())
        } else if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

/// Compute instances and images within one workspace.
#[async_trait]
pub trait ComputeGateway: Send + Sync {
    async fn list_instances(&self) -> GatewayResult<Vec<InstanceRef>>;

    async fn get_instance(&self, instance_id: &str) -> GatewayResult<Instance>;

    /// Submit a create request. The provider answers with the created instances.
    async fn create_instance(&self, request: &CreateInstanceRequest)
        -> GatewayResult<Vec<InstanceRef>>;

    async fn delete_instance(&self, instance_id: &str) -> GatewayResult<()>;

    async fn get_image(&self, name_or_id: &str) -> GatewayResult<Image>;

    /// System types with capacity in the workspace.
    async fn list_system_pools(&self) -> GatewayResult<Vec<String>>;
}

/// Networks and DHCP servers within one workspace.
#[async_trait]
pub trait NetworkGateway: Send + Sync {
    async fn list_networks(&self, kind: Option<NetworkKind>) -> GatewayResult<Vec<NetworkRef>>;

    async fn get_network(&self, id_or_name: &str) -> GatewayResult<Network>;

    async fn create_network(&self, request: &CreateNetworkRequest) -> GatewayResult<Network>;

    async fn list_dhcp_servers(&self) -> GatewayResult<Vec<DhcpServerRef>>;

    async fn get_dhcp_server(&self, id: &str) -> GatewayResult<DhcpServer>;
}

/// Pools and listeners on the ingress load balancer.
#[async_trait]
pub trait LoadBalancerGateway: Send + Sync {
    async fn get_load_balancer(&self) -> GatewayResult<LoadBalancer>;

    async fn list_pools(&self) -> GatewayResult<Vec<Pool>>;

    async fn create_pool(&self, request: &CreatePoolRequest) -> GatewayResult<Pool>;

    async fn delete_pool(&self, pool_id: &str) -> GatewayResult<()>;

    async fn list_listeners(&self) -> GatewayResult<Vec<Listener>>;

    async fn create_listener(&self, request: &CreateListenerRequest) -> GatewayResult<Listener>;

    async fn delete_listener(&self, listener_id: &str) -> GatewayResult<()>;
}

/// Read-only view of compute-account state.
#[async_trait]
pub trait AccountMirror: Send + Sync {
    async fn get_account(&self, instance: &str) -> GatewayResult<Account>;
}

/// Clients scoped to a single compute account, built once per invocation.
#[derive(Clone)]
pub struct Gateways {
    pub compute: Arc<dyn ComputeGateway>,
    pub network: Arc<dyn NetworkGateway>,
    pub load_balancer: Arc<dyn LoadBalancerGateway>,
    pub accounts: Arc<dyn AccountMirror>,
}

/// Builds a [`Gateways`] bundle bound to a compute account.
pub trait GatewayFactory: Send + Sync {
    fn scope(&self, account: &AccountRef) -> GatewayResult<Gateways>;
}
