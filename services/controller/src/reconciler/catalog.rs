//! Catalog readiness and the catalog reconciler.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use pac_reconcile::{Action, ErrorClass};
use tracing::{debug, info, instrument, warn};

use super::ReconcilerConfig;
use crate::capacity::parse_cpu;
use crate::error::{Error, Result};
use crate::gateway::GatewayFactory;
use crate::model::{
    AccountRef, Catalog, CatalogStatus, Lifecycle, Service, ALLOWED_PROCESSOR_TYPES,
    ALLOWED_SYSTEM_TYPES, CATALOG_FINALIZER,
};
use crate::store::{referencing_services, ResourceStore};
use crate::worker::Reconcile;

const ACTIVE: &str = "active";

/// Verify every backing resource a catalog names. Stops at the first problem.
#[instrument(skip_all, fields(catalog = %catalog.metadata.name))]
pub async fn check_readiness(catalog: &Catalog, factory: &dyn GatewayFactory) -> Result<()> {
    let vm = &catalog.spec.vm;

    if !ALLOWED_SYSTEM_TYPES.contains(&vm.system_type.as_str()) {
        return Err(Error::Validation(format!(
            "system type '{}' is not one of {}",
            vm.system_type,
            ALLOWED_SYSTEM_TYPES.join(", ")
        )));
    }
    if !ALLOWED_PROCESSOR_TYPES.contains(&vm.processor_type.as_str()) {
        return Err(Error::Validation(format!(
            "processor type '{}' is not one of {}",
            vm.processor_type,
            ALLOWED_PROCESSOR_TYPES.join(", ")
        )));
    }
    parse_cpu(&catalog.spec.capacity.cpu)?;

    let account: AccountRef = vm.account.parse()?;
    let gateways = factory
        .scope(&account)
        .map_err(|e| Error::gateway(format!("build clients for {account}"), e))?;

    let mirror = gateways
        .accounts
        .get_account(&account.instance)
        .await
        .map_err(|e| Error::gateway("look up compute account", e))?;
    if !mirror.state.eq_ignore_ascii_case(ACTIVE) {
        return Err(Error::NotReady(format!(
            "compute account {} is {}",
            account.instance, mirror.state
        )));
    }

    let image = gateways
        .compute
        .get_image(&vm.image)
        .await
        .map_err(|e| Error::gateway("look up image", e))?;
    if !image.state.eq_ignore_ascii_case(ACTIVE) {
        return Err(Error::NotReady(format!(
            "image {} is {}",
            vm.image, image.state
        )));
    }

    if let Some(name) = &vm.network {
        let network = gateways
            .network
            .get_network(name)
            .await
            .map_err(|e| Error::gateway("look up network", e))?;
        if !network.has_capacity() {
            return Err(Error::NotReady(format!(
                "network {name} has no free addresses"
            )));
        }
    }

    let pools = gateways
        .compute
        .list_system_pools()
        .await
        .map_err(|e| Error::gateway("list system pools", e))?;
    if !pools.iter().any(|p| p == &vm.system_type) {
        return Err(Error::NotReady(format!(
            "system type {} has no capacity in the workspace",
            vm.system_type
        )));
    }

    Ok(())
}

/// Keeps catalog readiness current and holds catalogs in use.
pub struct CatalogReconciler {
    catalogs: Arc<dyn ResourceStore<Catalog>>,
    services: Arc<dyn ResourceStore<Service>>,
    factory: Arc<dyn GatewayFactory>,
    config: ReconcilerConfig,
}

impl CatalogReconciler {
    pub fn new(
        catalogs: Arc<dyn ResourceStore<Catalog>>,
        services: Arc<dyn ResourceStore<Service>>,
        factory: Arc<dyn GatewayFactory>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            catalogs,
            services,
            factory,
            config,
        }
    }

    /// Run one invocation for a catalog.
    #[instrument(skip(self))]
    pub async fn reconcile(&self, name: &str) -> Action {
        match self.try_reconcile(name).await {
            Ok(action) => action,
            Err(e) if e.class() == ErrorClass::Conflict => {
                debug!(error = %e, "Stale catalog; re-reading");
                Action::Requeue
            }
            Err(e) => {
                warn!(error = %e, "Catalog reconciliation failed");
                Action::RequeueAfter(self.config.retry_delay)
            }
        }
    }

    async fn try_reconcile(&self, name: &str) -> Result<Action> {
        let Some(mut catalog) = self.catalogs.get(name).await? else {
            return Ok(Action::Done);
        };

        match (
            catalog.metadata.lifecycle(),
            catalog.metadata.has_finalizer(CATALOG_FINALIZER),
        ) {
            (Lifecycle::Active, false) => {
                catalog.metadata.add_finalizer(CATALOG_FINALIZER);
                self.catalogs.update(catalog).await?;
                debug!("Attached catalog finalizer");
                Ok(Action::Requeue)
            }
            (Lifecycle::Active, true) => {
                let status = match check_readiness(&catalog, self.factory.as_ref()).await {
                    Ok(()) => CatalogStatus {
                        ready: true,
                        message: "catalog is ready".to_string(),
                        last_checked: Some(Utc::now()),
                    },
                    Err(e) => {
                        warn!(error = %e, "Catalog not ready");
                        CatalogStatus {
                            ready: false,
                            message: e.to_string(),
                            last_checked: Some(Utc::now()),
                        }
                    }
                };

                if status.ready != catalog.status.ready {
                    info!(ready = status.ready, message = %status.message, "Catalog readiness changed");
                }
                catalog.status = status;
                self.catalogs.update(catalog).await?;
                Ok(Action::RequeueAfter(self.config.resync_interval))
            }
            (Lifecycle::PendingDeletion, true) => {
                let refs = referencing_services(self.services.as_ref(), &catalog).await?;
                if !refs.is_empty() {
                    let message = format!("catalog is referenced by {} service(s)", refs.len());
                    if catalog.status.message != message {
                        debug!(services = ?refs, "Catalog deletion blocked");
                        catalog.status.message = message;
                        self.catalogs.update(catalog).await?;
                    }
                    return Ok(Action::RequeueAfter(self.config.retry_delay));
                }

                catalog.metadata.remove_finalizer(CATALOG_FINALIZER);
                self.catalogs.update(catalog).await?;
                info!("Catalog released");
                Ok(Action::Done)
            }
            (Lifecycle::PendingDeletion, false) => Ok(Action::Done),
        }
    }
}

#[async_trait]
impl Reconcile for CatalogReconciler {
    fn kind(&self) -> &'static str {
        "Catalog"
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self
            .catalogs
            .list()
            .await?
            .into_iter()
            .map(|c| c.metadata.name)
            .collect())
    }

    async fn reconcile(&self, key: &str) -> Action {
        CatalogReconciler::reconcile(self, key).await
    }
}
