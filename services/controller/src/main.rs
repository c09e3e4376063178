//! pac controller
//!
//! Runs the catalog and service reconcilers, the expiry monitor and the
//! health endpoints until interrupted.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use pac_controller::{
    config::Config,
    expiry::ExpiryMonitor,
    gateway::{
        fake::{FakeCloud, FakeGatewayFactory},
        http::HttpGatewayFactory,
        GatewayFactory,
    },
    health::{self, HealthState},
    model::{
        Capacity, CapacityRequest, Catalog, CatalogSpec, CatalogType, PortSpec, Protocol, Service,
        ServiceSpec, VmBacking,
    },
    reconciler::{CatalogReconciler, ServiceReconciler},
    store::{MemoryStore, ResourceStore, SqliteStore},
    worker::{ControllerWorker, ControllerWorkerConfig},
};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Account the seeded fake cloud knows about.
const FAKE_ACCOUNT_CRN: &str = "crn:v1:bluemix:public:power-iaas:dal10:a/pac:fake-account::";

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // Prefer RUST_LOG, fall back to PAC_LOG_LEVEL
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting pac controller");
    info!(
        health_addr = %config.health_addr,
        fake_cloud = config.fake_cloud,
        "Configuration loaded"
    );

    let (services, catalogs, factory): (
        Arc<dyn ResourceStore<Service>>,
        Arc<dyn ResourceStore<Catalog>>,
        Arc<dyn GatewayFactory>,
    ) = if config.fake_cloud {
        warn!("Using the in-memory fake cloud; state is not persisted");
        let services: Arc<dyn ResourceStore<Service>> = Arc::new(MemoryStore::<Service>::new());
        let catalogs: Arc<dyn ResourceStore<Catalog>> = Arc::new(MemoryStore::<Catalog>::new());
        seed_fake_resources(services.as_ref(), catalogs.as_ref()).await?;
        let factory: Arc<dyn GatewayFactory> =
            Arc::new(FakeGatewayFactory::new(Arc::new(FakeCloud::seeded())));
        (services, catalogs, factory)
    } else {
        let store = SqliteStore::open(&config.state_path).with_context(|| {
            format!("failed to open state store at {}", config.state_path.display())
        })?;
        info!(path = %config.state_path.display(), "State store opened");
        let factory: Arc<dyn GatewayFactory> = Arc::new(
            HttpGatewayFactory::new(config.gateway.clone())
                .context("failed to build gateway clients")?,
        );
        let services: Arc<dyn ResourceStore<Service>> = Arc::new(store.clone());
        let catalogs: Arc<dyn ResourceStore<Catalog>> = Arc::new(store);
        (services, catalogs, factory)
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker_config = ControllerWorkerConfig {
        resync_interval: config.resync_interval,
        ..ControllerWorkerConfig::default()
    };

    // Service controller
    let service_worker = ControllerWorker::new(
        ServiceReconciler::new(
            services.clone(),
            catalogs.clone(),
            factory.clone(),
            config.reconciler(),
        ),
        worker_config.clone(),
    );
    let service_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move {
            service_worker.run(shutdown_rx).await;
        }
    });

    // Catalog controller
    let catalog_worker = ControllerWorker::new(
        CatalogReconciler::new(
            catalogs.clone(),
            services.clone(),
            factory.clone(),
            config.reconciler(),
        ),
        worker_config,
    );
    let catalog_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move {
            catalog_worker.run(shutdown_rx).await;
        }
    });

    // Expiry monitor
    let expiry_monitor = ExpiryMonitor::new(
        services.clone(),
        catalogs,
        factory,
        config.expiry_interval,
    );
    let expiry_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move {
            expiry_monitor.run(shutdown_rx).await;
        }
    });

    let app = health::router(HealthState::new(services));
    let listener = tokio::net::TcpListener::bind(&config.health_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.health_addr))?;
    info!(addr = %config.health_addr, "Serving health endpoints");

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let mut shutdown_rx = shutdown_rx;
                loop {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
                info!("Health server shutting down");
            })
            .await
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = server_handle => {
            match result {
                Ok(Ok(())) => info!("Health server exited"),
                Ok(Err(e)) => error!(error = %e, "Health server error"),
                Err(e) => error!(error = %e, "Health server task panicked"),
            }
        }
    }

    let _ = shutdown_tx.send(true);

    info!("Waiting for workers to shut down...");
    let shutdown_timeout = Duration::from_secs(10);

    if let Err(e) = tokio::time::timeout(shutdown_timeout, service_handle).await {
        warn!(error = %e, "Service controller did not shut down in time");
    }

    if let Err(e) = tokio::time::timeout(shutdown_timeout, catalog_handle).await {
        warn!(error = %e, "Catalog controller did not shut down in time");
    }

    if let Err(e) = tokio::time::timeout(shutdown_timeout, expiry_handle).await {
        warn!(error = %e, "Expiry monitor did not shut down in time");
    }

    info!("Controller shutdown complete");
    Ok(())
}

/// One catalog and one service, so a fake-cloud run has something to do.
async fn seed_fake_resources(
    services: &dyn ResourceStore<Service>,
    catalogs: &dyn ResourceStore<Catalog>,
) -> Result<()> {
    catalogs
        .create(Catalog::new(
            "demo",
            CatalogSpec {
                catalog_type: CatalogType::Vm,
                description: "Fake-cloud demo catalog".to_string(),
                retired: false,
                expiry_days: 1,
                capacity: Capacity {
                    cpu: "1".to_string(),
                    memory: 4096,
                },
                vm: VmBacking {
                    account: FAKE_ACCOUNT_CRN.to_string(),
                    image: "rhel-9".to_string(),
                    network: None,
                    system_type: "s922".to_string(),
                    processor_type: "shared".to_string(),
                },
            },
        ))
        .await
        .context("failed to seed demo catalog")?;

    services
        .create(Service::new(
            "demo",
            ServiceSpec {
                user_id: "demo".to_string(),
                display_name: "Demo VM".to_string(),
                catalog: "demo".to_string(),
                expiry: None,
                ssh_keys: Vec::new(),
                capacity: CapacityRequest::default(),
                ports: vec![PortSpec {
                    port: 22,
                    protocol: Protocol::Tcp,
                }],
            },
        ))
        .await
        .context("failed to seed demo service")?;

    info!("Seeded demo catalog and service");
    Ok(())
}
