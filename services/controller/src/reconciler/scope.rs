//! Per-invocation reconciliation context.

use crate::error::{Error, Result};
use crate::gateway::{GatewayFactory, Gateways};
use crate::model::{AccountRef, Catalog, Service, ServiceSpec};

/// Everything one invocation needs, built once and passed by reference.
///
/// Holds owned copies so steps can borrow the scope while mutating a
/// separate status record.
#[derive(Clone)]
pub struct ServiceScope {
    pub service: String,
    pub spec: ServiceSpec,
    pub catalog: Catalog,
    pub gateways: Gateways,
}

impl ServiceScope {
    pub fn new(service: &Service, catalog: &Catalog, factory: &dyn GatewayFactory) -> Result<Self> {
        let account: AccountRef = catalog.spec.vm.account.parse()?;
        let gateways = factory
            .scope(&account)
            .map_err(|e| Error::gateway(format!("build clients for {account}"), e))?;

        Ok(Self {
            service: service.metadata.name.clone(),
            spec: service.spec.clone(),
            catalog: catalog.clone(),
            gateways,
        })
    }
}
