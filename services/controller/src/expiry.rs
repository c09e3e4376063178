//! Expiry monitor.
//!
//! Periodically sweeps every active service and expires the ones past their
//! effective expiry: side effects are torn down through the same path the
//! reconciler uses on deletion, then the service is marked `EXPIRED`. The
//! finalizer is left alone; removal still goes through deletion.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use crate::error::{Error, Result};
use crate::gateway::GatewayFactory;
use crate::model::{Catalog, Lifecycle, Service};
use crate::reconciler::{persist_status, teardown, ServiceScope};
use crate::store::ResourceStore;

/// Counters from one sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    pub scanned: usize,
    pub expired: usize,
    pub failed: usize,
}

pub struct ExpiryMonitor {
    services: Arc<dyn ResourceStore<Service>>,
    catalogs: Arc<dyn ResourceStore<Catalog>>,
    factory: Arc<dyn GatewayFactory>,
    interval: Duration,
}

impl ExpiryMonitor {
    pub fn new(
        services: Arc<dyn ResourceStore<Service>>,
        catalogs: Arc<dyn ResourceStore<Catalog>>,
        factory: Arc<dyn GatewayFactory>,
        interval: Duration,
    ) -> Self {
        Self {
            services,
            catalogs,
            factory,
            interval,
        }
    }

    /// Run until shutdown is signaled.
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            "Starting expiry monitor"
        );

        let mut interval = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.sweep(Utc::now()).await {
                        Ok(stats) if stats.expired > 0 || stats.failed > 0 => {
                            info!(
                                scanned = stats.scanned,
                                expired = stats.expired,
                                failed = stats.failed,
                                "Expiry sweep complete"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "Expiry sweep failed"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Expiry monitor shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Expire every active service past its expiry at `now`.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepStats> {
        let catalogs: HashMap<String, Catalog> = self
            .catalogs
            .list()
            .await?
            .into_iter()
            .map(|c| (c.metadata.name.clone(), c))
            .collect();

        let mut stats = SweepStats::default();
        for mut service in self.services.list().await? {
            stats.scanned += 1;

            if service.metadata.lifecycle() != Lifecycle::Active || service.status.expired {
                continue;
            }
            let catalog = catalogs.get(&service.spec.catalog);
            let Some(expiry) = service.effective_expiry(catalog) else {
                continue;
            };
            if now < expiry {
                continue;
            }

            match self.expire(&mut service, catalog, expiry).await {
                Ok(()) => stats.expired += 1,
                Err(e) => {
                    warn!(service = %service.metadata.name, error = %e, "Failed to expire service");
                    stats.failed += 1;
                }
            }
        }

        Ok(stats)
    }

    async fn expire(
        &self,
        service: &mut Service,
        catalog: Option<&Catalog>,
        expiry: DateTime<Utc>,
    ) -> Result<()> {
        match catalog {
            Some(catalog) => {
                let scope = ServiceScope::new(service, catalog, self.factory.as_ref())?;
                teardown(&scope, &service.status).await?;
            }
            None if service.status.vm.instance_id.is_empty() && service.status.ingress.is_empty() => {
                debug!(service = %service.metadata.name, "Nothing to tear down");
            }
            None => {
                return Err(Error::NotReady(format!(
                    "catalog {} is missing; cannot reach the service's account",
                    service.spec.catalog
                )))
            }
        }

        let mut status = service.status.clone();
        status.mark_expired(format!("service expired at {}", expiry.to_rfc3339()));
        persist_status(self.services.as_ref(), service, &status).await?;

        info!(service = %service.metadata.name, %expiry, "Service expired");
        Ok(())
    }
}
