//! Shared fixtures for the controller integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use pac_controller::gateway::fake::{FakeCloud, FakeGatewayFactory};
use pac_controller::model::{
    Capacity, CapacityRequest, Catalog, CatalogSpec, CatalogType, PortSpec, Protocol, Service,
    ServiceSpec, VmBacking,
};
use pac_controller::reconciler::{CatalogReconciler, ReconcilerConfig, ServiceReconciler};
use pac_controller::store::{MemoryStore, ResourceStore};
use pac_controller::worker::{ControllerWorker, ControllerWorkerConfig};
use pac_reconcile::WorkQueue;

pub const ACCOUNT_CRN: &str = "crn:v1:bluemix:public:power-iaas:dal10:a/abc123:fake-account::";

pub fn catalog(name: &str, cpu: &str, memory: u64) -> Catalog {
    Catalog::new(
        name,
        CatalogSpec {
            catalog_type: CatalogType::Vm,
            description: String::new(),
            retired: false,
            expiry_days: 7,
            capacity: Capacity {
                cpu: cpu.to_string(),
                memory,
            },
            vm: VmBacking {
                account: ACCOUNT_CRN.to_string(),
                image: "rhel-9".to_string(),
                network: None,
                system_type: "s922".to_string(),
                processor_type: "shared".to_string(),
            },
        },
    )
}

pub fn service(name: &str, catalog: &str, capacity: CapacityRequest, ports: &[u16]) -> Service {
    Service::new(
        name,
        ServiceSpec {
            user_id: "user-1".to_string(),
            display_name: name.to_string(),
            catalog: catalog.to_string(),
            expiry: None,
            ssh_keys: vec!["ssh-ed25519 AAAA user@host".to_string()],
            capacity,
            ports: ports
                .iter()
                .map(|&port| PortSpec {
                    port,
                    protocol: Protocol::Tcp,
                })
                .collect(),
        },
    )
}

/// Both controllers over in-memory stores and a seeded fake cloud, driven
/// pass by pass on a simulated clock.
pub struct Controllers {
    pub cloud: Arc<FakeCloud>,
    pub services: Arc<MemoryStore<Service>>,
    pub catalogs: Arc<MemoryStore<Catalog>>,
    pub service_worker: ControllerWorker<ServiceReconciler>,
    pub catalog_worker: ControllerWorker<CatalogReconciler>,
    service_queue: WorkQueue<String>,
    catalog_queue: WorkQueue<String>,
    now: Instant,
}

impl Controllers {
    pub fn new() -> Self {
        let cloud = Arc::new(FakeCloud::seeded());
        let services = Arc::new(MemoryStore::<Service>::new());
        let catalogs = Arc::new(MemoryStore::<Catalog>::new());
        let factory = Arc::new(FakeGatewayFactory::new(cloud.clone()));
        let worker_config = ControllerWorkerConfig::default();

        let service_worker = ControllerWorker::new(
            ServiceReconciler::new(
                services.clone(),
                catalogs.clone(),
                factory.clone(),
                ReconcilerConfig::default(),
            ),
            worker_config.clone(),
        );
        let catalog_worker = ControllerWorker::new(
            CatalogReconciler::new(
                catalogs.clone(),
                services.clone(),
                factory,
                ReconcilerConfig::default(),
            ),
            worker_config,
        );

        Self {
            cloud,
            services,
            catalogs,
            service_worker,
            catalog_worker,
            service_queue: WorkQueue::new(),
            catalog_queue: WorkQueue::new(),
            now: Instant::now(),
        }
    }

    /// Run one catalog pass then one service pass, then move the clock past
    /// the retry delay.
    pub async fn step(&mut self) -> usize {
        let ran = self
            .catalog_worker
            .run_pass(&mut self.catalog_queue, self.now)
            .await
            + self
                .service_worker
                .run_pass(&mut self.service_queue, self.now)
                .await;
        self.now += Duration::from_secs(61);
        ran
    }

    pub async fn steps(&mut self, n: usize) {
        for _ in 0..n {
            self.step().await;
        }
    }

    pub async fn service(&self, name: &str) -> Option<Service> {
        self.services.get(name).await.unwrap()
    }

    pub async fn catalog(&self, name: &str) -> Option<Catalog> {
        self.catalogs.get(name).await.unwrap()
    }
}
