//! Service and catalog reconcilers.
//!
//! The service reconciler is a state machine over the deletion lifecycle:
//!
//! | lifecycle        | finalizer | action                                   |
//! |------------------|-----------|------------------------------------------|
//! | active           | absent    | attach finalizer and owner reference     |
//! | active           | present   | provision -> resolve network -> ingress  |
//! | pending deletion | present   | tear down, then release the finalizer    |
//! | pending deletion | absent    | nothing                                  |
//!
//! Status is persisted after every step so a crash loses at most the step in
//! flight. Lower layers report an error class or a [`Progress`]; only this
//! module turns those into an [`Action`].

pub mod catalog;
pub mod ingress;
pub mod network;
mod scope;
pub mod vm;

pub use catalog::{check_readiness, CatalogReconciler};
pub use scope::ServiceScope;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use pac_reconcile::{Action, ErrorClass, Progress, DEFAULT_RESYNC_INTERVAL, DEFAULT_RETRY_DELAY};
use tracing::{debug, info, instrument, warn};

use crate::capacity::validate_capacity;
use crate::error::{Error, Result};
use crate::gateway::GatewayFactory;
use crate::model::{
    Catalog, Lifecycle, Resource, Service, ServiceState, ServiceStatus, SERVICE_FINALIZER,
};
use crate::store::ResourceStore;
use crate::worker::Reconcile;

use vm::InstancePhase;

/// Reconciler timing.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Delay before retrying after a retryable condition.
    pub retry_delay: Duration,

    /// Delay before re-checking a converged resource.
    pub resync_interval: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            retry_delay: DEFAULT_RETRY_DELAY,
            resync_interval: DEFAULT_RESYNC_INTERVAL,
        }
    }
}

/// Undo a service's external side effects: ingress first, then the instance.
pub async fn teardown(scope: &ServiceScope, status: &ServiceStatus) -> Result<()> {
    ingress::remove(scope, status).await?;
    vm::delete_instance(scope, status).await
}

/// Store `status` on `service` if it changed. `service` is replaced with the
/// stored copy so the next write carries the new version.
pub async fn persist_status(
    store: &dyn ResourceStore<Service>,
    service: &mut Service,
    status: &ServiceStatus,
) -> Result<()> {
    if service.status == *status {
        return Ok(());
    }

    let mut updated = service.clone();
    updated.status = status.clone();
    updated.status.last_reconciled = Some(Utc::now());

    if let Some(stored) = store.update(updated).await? {
        *service = stored;
    }
    Ok(())
}

/// Nothing outside the store was ever created for this status.
fn nothing_recorded(status: &ServiceStatus) -> bool {
    status.vm.instance_id.is_empty() && status.ingress.is_empty()
}

/// Drives services from declared intent to running infrastructure.
pub struct ServiceReconciler {
    services: Arc<dyn ResourceStore<Service>>,
    catalogs: Arc<dyn ResourceStore<Catalog>>,
    factory: Arc<dyn GatewayFactory>,
    config: ReconcilerConfig,
}

impl ServiceReconciler {
    pub fn new(
        services: Arc<dyn ResourceStore<Service>>,
        catalogs: Arc<dyn ResourceStore<Catalog>>,
        factory: Arc<dyn GatewayFactory>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            services,
            catalogs,
            factory,
            config,
        }
    }

    /// Run one invocation for a service.
    #[instrument(skip(self), fields(service = %name))]
    pub async fn reconcile(&self, name: &str) -> Action {
        match self.try_reconcile(name).await {
            Ok(action) => action,
            Err(e) if e.class() == ErrorClass::Conflict => {
                debug!(error = %e, "Stale service; re-reading");
                Action::Requeue
            }
            Err(e) => {
                warn!(error = %e, "Service reconciliation failed");
                Action::RequeueAfter(self.config.retry_delay)
            }
        }
    }

    async fn try_reconcile(&self, name: &str) -> Result<Action> {
        let Some(service) = self.services.get(name).await? else {
            debug!("Service no longer exists");
            return Ok(Action::Done);
        };

        match (
            service.metadata.lifecycle(),
            service.metadata.has_finalizer(SERVICE_FINALIZER),
        ) {
            (Lifecycle::Active, false) => self.attach_finalizer(service).await,
            (Lifecycle::Active, true) => self.apply(service).await,
            (Lifecycle::PendingDeletion, true) => self.finalize(service).await,
            (Lifecycle::PendingDeletion, false) => Ok(Action::Done),
        }
    }

    async fn attach_finalizer(&self, mut service: Service) -> Result<Action> {
        let catalog = service.spec.catalog.clone();
        service.metadata.add_finalizer(SERVICE_FINALIZER);
        service.metadata.set_owner(Catalog::KIND, &catalog);

        self.services.update(service).await?;
        debug!("Attached finalizer");
        Ok(Action::Requeue)
    }

    async fn apply(&self, mut service: Service) -> Result<Action> {
        if service.status.state.is_settled() {
            return Ok(Action::Done);
        }

        let Some(catalog) = self.catalogs.get(&service.spec.catalog).await? else {
            let mut status = service.status.clone();
            status.mark_error(format!("catalog {} not found", service.spec.catalog));
            persist_status(self.services.as_ref(), &mut service, &status).await?;
            return Ok(Action::RequeueAfter(self.config.retry_delay));
        };

        if service.is_past_expiry(Utc::now(), Some(&catalog)) {
            debug!("Past expiry; left to the expiry monitor");
            return Ok(Action::Done);
        }

        // A running service is left alone when its catalog goes away.
        if service.status.state != ServiceState::Created {
            let mut status = service.status.clone();
            if catalog.spec.retired {
                status.mark_error(format!("catalog {} is retired", catalog.metadata.name));
                persist_status(self.services.as_ref(), &mut service, &status).await?;
                return Ok(Action::Done);
            }
            if !catalog.status.ready {
                status.mark_error(format!(
                    "catalog {} is not ready: {}",
                    catalog.metadata.name, catalog.status.message
                ));
                persist_status(self.services.as_ref(), &mut service, &status).await?;
                return Ok(Action::RequeueAfter(self.config.retry_delay));
            }
        }

        match self.provision(&mut service, &catalog).await {
            Ok(action) => Ok(action),
            Err(e) => self.record_failure(&mut service, e).await,
        }
    }

    async fn provision(&self, service: &mut Service, catalog: &Catalog) -> Result<Action> {
        let store = self.services.as_ref();
        let mut status = service.status.clone();

        let capacity = if status.vm.instance_id.is_empty() {
            Some(validate_capacity(
                &catalog.spec.capacity,
                &service.spec.capacity,
            )?)
        } else {
            None
        };

        let scope = ServiceScope::new(service, catalog, self.factory.as_ref())?;

        if matches!(status.state, ServiceState::New | ServiceState::Error) {
            status.mark_in_progress("provisioning instance");
        }

        if let Some(capacity) = &capacity {
            vm::ensure_instance(&scope, capacity, &mut status).await?;
            persist_status(store, service, &status).await?;
        }

        match vm::refresh(&scope, &mut status).await? {
            InstancePhase::Active => {}
            InstancePhase::Failed => {
                warn!(message = %status.message, "Instance failed");
                persist_status(store, service, &status).await?;
                return Ok(Action::Done);
            }
            InstancePhase::Building => {
                persist_status(store, service, &status).await?;
                return Ok(Action::RequeueAfter(self.config.retry_delay));
            }
        }
        persist_status(store, service, &status).await?;

        if let Progress::Pending { reason } = network::resolve(&scope, &mut status).await? {
            debug!(%reason, "Network not resolved yet");
            status.message = reason;
            persist_status(store, service, &status).await?;
            return Ok(Action::RequeueAfter(self.config.retry_delay));
        }
        persist_status(store, service, &status).await?;

        if let Progress::Pending { reason } = ingress::ensure(&scope, &mut status).await? {
            debug!(%reason, "Ingress not ready yet");
            status.message = reason;
            persist_status(store, service, &status).await?;
            return Ok(Action::RequeueAfter(self.config.retry_delay));
        }
        persist_status(store, service, &status).await?;

        debug!(access_info = %status.access_info, "Service converged");
        Ok(Action::Done)
    }

    /// Map a step failure onto status and scheduling.
    async fn record_failure(&self, service: &mut Service, e: Error) -> Result<Action> {
        let mut status = service.status.clone();

        match e.class() {
            ErrorClass::Conflict => Err(e),
            ErrorClass::Terminal => {
                warn!(error = %e, "Provisioning failed");
                status.mark_failed(e.to_string());
                persist_status(self.services.as_ref(), service, &status).await?;
                Ok(Action::Done)
            }
            ErrorClass::Retryable => {
                warn!(error = %e, "Provisioning step will be retried");
                status.message = e.to_string();
                persist_status(self.services.as_ref(), service, &status).await?;
                Ok(Action::RequeueAfter(self.config.retry_delay))
            }
        }
    }

    async fn finalize(&self, mut service: Service) -> Result<Action> {
        if let Err(e) = self.teardown(&service).await {
            warn!(error = %e, "Teardown failed; keeping finalizer");
            let mut status = service.status.clone();
            status.message = format!("teardown failed: {e}");
            persist_status(self.services.as_ref(), &mut service, &status).await?;
            return Ok(Action::RequeueAfter(self.config.retry_delay));
        }

        service.metadata.remove_finalizer(SERVICE_FINALIZER);
        self.services.update(service).await?;
        info!("Teardown complete; finalizer removed");
        Ok(Action::Done)
    }

    async fn teardown(&self, service: &Service) -> Result<()> {
        let Some(catalog) = self.catalogs.get(&service.spec.catalog).await? else {
            if nothing_recorded(&service.status) {
                return Ok(());
            }
            return Err(Error::NotReady(format!(
                "catalog {} is missing; cannot reach the service's account",
                service.spec.catalog
            )));
        };

        let scope = ServiceScope::new(service, &catalog, self.factory.as_ref())?;
        teardown(&scope, &service.status).await
    }
}

#[async_trait]
impl Reconcile for ServiceReconciler {
    fn kind(&self) -> &'static str {
        "Service"
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self
            .services
            .list()
            .await?
            .into_iter()
            .map(|s| s.metadata.name)
            .collect())
    }

    async fn reconcile(&self, key: &str) -> Action {
        ServiceReconciler::reconcile(self, key).await
    }
}
