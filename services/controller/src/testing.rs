//! Fixtures shared by unit tests.

use std::sync::Arc;

use crate::gateway::fake::{FakeCloud, FakeGatewayFactory};
use crate::model::{
    Capacity, CapacityRequest, Catalog, CatalogSpec, CatalogType, PortSpec, Protocol, Service,
    ServiceSpec, VmBacking,
};
use crate::reconciler::ServiceScope;

pub const ACCOUNT_CRN: &str = "crn:v1:bluemix:public:power-iaas:dal10:a/abc123:fake-account::";

pub fn catalog(name: &str) -> Catalog {
    Catalog::new(
        name,
        CatalogSpec {
            catalog_type: CatalogType::Vm,
            description: "RHEL 9 sandbox".to_string(),
            retired: false,
            expiry_days: 7,
            capacity: Capacity {
                cpu: "1".to_string(),
                memory: 8192,
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

pub fn service(name: &str, catalog: &str) -> Service {
    Service::new(
        name,
        ServiceSpec {
            user_id: "user-1".to_string(),
            display_name: name.to_string(),
            catalog: catalog.to_string(),
            expiry: None,
            ssh_keys: vec!["ssh-ed25519 AAAA user@host".to_string()],
            capacity: CapacityRequest::default(),
            ports: vec![PortSpec {
                port: 22,
                protocol: Protocol::Tcp,
            }],
        },
    )
}

/// Scope whose gateways all point at `cloud`.
pub fn fake_scope(cloud: &Arc<FakeCloud>, service: &Service, catalog: &Catalog) -> ServiceScope {
    let factory = FakeGatewayFactory::new(cloud.clone());
    ServiceScope::new(service, catalog, &factory).unwrap()
}
