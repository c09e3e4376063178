//! End-to-end service lifecycle against the fake cloud.
//!
//! Both controllers run pass by pass through their workers, the way the
//! binary drives them, with a simulated clock so retry delays elapse.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::{catalog, service, Controllers};
use pac_controller::capacity::validate_capacity;
use pac_controller::expiry::ExpiryMonitor;
use pac_controller::gateway::fake::FakeGatewayFactory;
use pac_controller::model::{
    Capacity, CapacityRequest, Lifecycle, ServiceState, CATALOG_FINALIZER, SERVICE_FINALIZER,
};
use pac_controller::store::ResourceStore;

#[tokio::test]
async fn test_service_provisioned_exposed_and_deleted() {
    let mut ctl = Controllers::new();
    ctl.catalogs.create(catalog("rhel", "1", 8192)).await.unwrap();
    ctl.services
        .create(service("devbox", "rhel", CapacityRequest::default(), &[22, 8080]))
        .await
        .unwrap();

    ctl.steps(2).await;

    let cat = ctl.catalog("rhel").await.unwrap();
    assert!(cat.status.ready, "{}", cat.status.message);
    assert!(cat.metadata.has_finalizer(CATALOG_FINALIZER));

    let svc = ctl.service("devbox").await.unwrap();
    assert_eq!(svc.status.state, ServiceState::Created, "{}", svc.status.message);
    assert!(svc.metadata.has_finalizer(SERVICE_FINALIZER));
    assert!(svc.metadata.is_owned_by("Catalog", "rhel"));
    assert!(!svc.status.vm.instance_id.is_empty());
    assert!(!svc.status.vm.ip_address.is_empty());
    assert_eq!(svc.status.endpoint.as_deref(), Some("lb.fake.local"));

    assert_eq!(svc.status.ingress.len(), 2);
    let targets: Vec<u16> = svc.status.ingress.iter().filter_map(|i| i.target).collect();
    assert_eq!(targets.len(), 2);
    assert_ne!(targets[0], targets[1]);
    assert!(targets.iter().all(|t| (30000..=32767).contains(t)));

    // Further passes keep the service where it is.
    ctl.steps(3).await;
    let calls = ctl.cloud.calls();
    assert_eq!(calls.create_instance, 1);
    assert_eq!(calls.create_pool, 2);
    assert_eq!(calls.create_listener, 2);

    ctl.services.delete("devbox").await.unwrap();
    ctl.catalogs.delete("rhel").await.unwrap();

    // The catalog pass runs first and still sees the service.
    ctl.step().await;
    assert!(ctl.service("devbox").await.is_none());
    let cat = ctl.catalog("rhel").await.unwrap();
    assert_eq!(cat.metadata.lifecycle(), Lifecycle::PendingDeletion);
    assert!(cat.status.message.contains("referenced by 1 service(s)"));

    ctl.step().await;
    assert!(ctl.catalog("rhel").await.is_none());

    assert!(ctl.cloud.instances().await.is_empty());
    assert!(ctl.cloud.pools().await.is_empty());
    assert!(ctl.cloud.listeners().await.is_empty());
}

#[tokio::test]
async fn test_requested_cpu_with_inherited_memory() {
    let resolved = validate_capacity(
        &Capacity {
            cpu: "4".to_string(),
            memory: 8192,
        },
        &CapacityRequest {
            cpu: Some("2".to_string()),
            memory: None,
        },
    )
    .unwrap();
    assert_eq!(
        resolved,
        Capacity {
            cpu: "2".to_string(),
            memory: 8192,
        }
    );

    let mut ctl = Controllers::new();
    ctl.catalogs.create(catalog("big", "4", 8192)).await.unwrap();
    ctl.services
        .create(service(
            "fits",
            "big",
            CapacityRequest {
                cpu: Some("2".to_string()),
                memory: None,
            },
            &[22],
        ))
        .await
        .unwrap();
    ctl.services
        .create(service(
            "too-big",
            "big",
            CapacityRequest {
                cpu: None,
                memory: Some(16384),
            },
            &[22],
        ))
        .await
        .unwrap();

    ctl.steps(2).await;

    let fits = ctl.service("fits").await.unwrap();
    assert_eq!(fits.status.state, ServiceState::Created);

    let too_big = ctl.service("too-big").await.unwrap();
    assert_eq!(too_big.status.state, ServiceState::Failed);
    assert!(too_big.status.message.contains("16384MiB exceeds"));
    assert!(too_big.status.vm.instance_id.is_empty());
    assert_eq!(ctl.cloud.calls().create_instance, 1);
}

#[tokio::test]
async fn test_retired_catalog_gates_new_services_only() {
    let mut ctl = Controllers::new();
    ctl.catalogs.create(catalog("rhel", "1", 8192)).await.unwrap();
    ctl.services
        .create(service("running", "rhel", CapacityRequest::default(), &[22]))
        .await
        .unwrap();
    ctl.steps(2).await;
    assert_eq!(
        ctl.service("running").await.unwrap().status.state,
        ServiceState::Created
    );

    let mut cat = ctl.catalog("rhel").await.unwrap();
    cat.spec.retired = true;
    ctl.catalogs.update(cat).await.unwrap();

    ctl.services
        .create(service("late", "rhel", CapacityRequest::default(), &[22]))
        .await
        .unwrap();
    ctl.steps(3).await;

    let running = ctl.service("running").await.unwrap();
    assert_eq!(running.status.state, ServiceState::Created);
    assert_eq!(ctl.cloud.instances().await.len(), 1);

    let late = ctl.service("late").await.unwrap();
    assert_eq!(late.status.state, ServiceState::Error);
    assert_eq!(late.status.message, "catalog rhel is retired");
    assert!(late.status.vm.instance_id.is_empty());
}

#[tokio::test]
async fn test_expired_service_is_deleted_cleanly() {
    let mut ctl = Controllers::new();
    ctl.catalogs.create(catalog("rhel", "1", 8192)).await.unwrap();
    ctl.services
        .create(service("devbox", "rhel", CapacityRequest::default(), &[22]))
        .await
        .unwrap();
    ctl.steps(2).await;

    let monitor = ExpiryMonitor::new(
        ctl.services.clone(),
        ctl.catalogs.clone(),
        Arc::new(FakeGatewayFactory::new(ctl.cloud.clone())),
        Duration::from_secs(300),
    );
    let stats = monitor
        .sweep(Utc::now() + chrono::Duration::days(8))
        .await
        .unwrap();
    assert_eq!(stats.expired, 1);
    assert!(ctl.cloud.instances().await.is_empty());

    // Expired services are not re-provisioned.
    ctl.steps(2).await;
    let svc = ctl.service("devbox").await.unwrap();
    assert_eq!(svc.status.state, ServiceState::Expired);
    assert_eq!(ctl.cloud.calls().create_instance, 1);

    // Deletion tolerates the instance already being gone.
    ctl.services.delete("devbox").await.unwrap();
    ctl.step().await;
    assert!(ctl.service("devbox").await.is_none());
}
