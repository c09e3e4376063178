//! HTTP gateway clients against a mock API server.

use std::time::Duration;

use pac_controller::gateway::http::{GatewayConfig, HttpGatewayFactory};
use pac_controller::gateway::{
    CreateInstanceRequest, GatewayError, GatewayFactory, Gateways, NetworkAttachment, NetworkKind,
};
use pac_controller::model::AccountRef;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ACCOUNT_CRN: &str = "crn:v1:bluemix:public:power-iaas:dal10:a/abc123:ws-1::";
const WORKSPACE: &str = "/pcloud/v1/cloud-instances/ws-1";

fn gateways(server: &MockServer, timeout: Duration) -> Gateways {
    let factory = HttpGatewayFactory::new(GatewayConfig {
        compute_url: server.uri(),
        load_balancer_url: server.uri(),
        account_url: server.uri(),
        api_token: Some("token-1".to_string()),
        load_balancer_id: "lb-1".to_string(),
        request_timeout: timeout,
    })
    .unwrap();

    let account: AccountRef = ACCOUNT_CRN.parse().unwrap();
    factory.scope(&account).unwrap()
}

#[tokio::test]
async fn test_compute_requests_carry_credentials() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("{WORKSPACE}/pvm-instances/inst-1")))
        .and(header("authorization", "Bearer token-1"))
        .and(header("crn", ACCOUNT_CRN))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "pvmInstanceID": "inst-1",
            "serverName": "devbox",
            "status": "ACTIVE",
            "networks": [{
                "networkID": "net-1",
                "networkName": "pub-net",
                "macAddress": "fa:16:3e:00:00:01",
                "ipAddress": "192.168.0.10",
                "externalIP": "203.0.113.10",
                "type": "fixed"
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let gw = gateways(&server, Duration::from_secs(5));
    let instance = gw.compute.get_instance("inst-1").await.unwrap();
    assert_eq!(instance.server_name, "devbox");
    assert_eq!(instance.networks[0].ip_address, "192.168.0.10");
}

#[tokio::test]
async fn test_create_instance_body_and_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("{WORKSPACE}/pvm-instances")))
        .and(body_partial_json(json!({
            "serverName": "devbox",
            "imageID": "img-1",
            "networks": [{ "networkID": "net-1" }],
            "procType": "shared",
            "sysType": "s922"
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            { "pvmInstanceID": "inst-9", "serverName": "devbox", "status": "BUILD" }
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let gw = gateways(&server, Duration::from_secs(5));
    let created = gw
        .compute
        .create_instance(&CreateInstanceRequest {
            server_name: "devbox".to_string(),
            image_id: "img-1".to_string(),
            networks: vec![NetworkAttachment {
                network_id: "net-1".to_string(),
            }],
            memory: 8.0,
            processors: 2.0,
            proc_type: "shared".to_string(),
            sys_type: "s922".to_string(),
            user_data: String::new(),
        })
        .await
        .unwrap();

    assert_eq!(created.len(), 1);
    assert_eq!(created[0].instance_id, "inst-9");
}

#[tokio::test]
async fn test_missing_objects_are_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("{WORKSPACE}/images/sles-15")))
        .respond_with(ResponseTemplate::new(404).set_body_string("no such image"))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path(format!("{WORKSPACE}/pvm-instances/inst-1")))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{WORKSPACE}/images/rhel-9")))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let gw = gateways(&server, Duration::from_secs(5));

    let err = gw.compute.get_image("sles-15").await.unwrap_err();
    assert!(err.is_not_found(), "{err}");
    assert_eq!(err.to_string(), "image not found: sles-15");

    let err = gw.compute.delete_instance("inst-1").await.unwrap_err();
    assert!(err.is_not_found(), "{err}");

    let err = gw.compute.get_image("rhel-9").await.unwrap_err();
    assert!(
        matches!(err, GatewayError::Status { status: 500, ref body } if body == "boom"),
        "{err}"
    );
}

#[tokio::test]
async fn test_slow_response_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/resource_instances/ws-1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "guid": "ws-1", "state": "active" }))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let gw = gateways(&server, Duration::from_millis(100));
    let err = gw.accounts.get_account("ws-1").await.unwrap_err();
    assert!(matches!(err, GatewayError::Timeout(_)), "{err}");
}

#[tokio::test]
async fn test_networks_and_system_pools() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("{WORKSPACE}/networks")))
        .and(query_param("filter", "type:pub-vlan"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "networks": [{ "networkID": "net-1", "name": "pub-net", "type": "pub-vlan" }]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{WORKSPACE}/system-pools")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "s922": { "capacity": { "cores": 10 } },
            "e980": { "capacity": { "cores": 4 } }
        })))
        .mount(&server)
        .await;

    let gw = gateways(&server, Duration::from_secs(5));

    let networks = gw
        .network
        .list_networks(Some(NetworkKind::Public))
        .await
        .unwrap();
    assert_eq!(networks.len(), 1);
    assert_eq!(networks[0].kind, NetworkKind::Public);

    let pools = gw.compute.list_system_pools().await.unwrap();
    assert_eq!(pools, vec!["e980".to_string(), "s922".to_string()]);
}

#[tokio::test]
async fn test_load_balancer_requests_pin_api_version() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/load_balancers/lb-1"))
        .and(query_param("version", "2024-04-30"))
        .and(query_param("generation", "2"))
        .and(header("authorization", "Bearer token-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "lb-1",
            "hostname": "lb-1.example.net",
            "provisioning_status": "update_pending",
            "operating_status": "online"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/load_balancers/lb-1/listeners"))
        .and(query_param("version", "2024-04-30"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "listeners": [{
                "id": "l-1",
                "port": 31000,
                "protocol": "tcp",
                "default_pool": { "id": "pool-1", "name": "devbox-22" }
            }]
        })))
        .mount(&server)
        .await;

    let gw = gateways(&server, Duration::from_secs(5));

    let lb = gw.load_balancer.get_load_balancer().await.unwrap();
    assert!(!lb.is_active());
    assert_eq!(lb.hostname, "lb-1.example.net");

    let listeners = gw.load_balancer.list_listeners().await.unwrap();
    assert_eq!(listeners[0].port, 31000);
    assert_eq!(
        listeners[0].default_pool.as_ref().map(|p| p.name.as_str()),
        Some("devbox-22")
    );
}

#[tokio::test]
async fn test_names_are_encoded_as_single_path_segments() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("{WORKSPACE}/networks/team%2Fnet%3Fa%20b")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "networkID": "net-7",
            "name": "team/net?a b",
            "type": "vlan"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/v1/load_balancers/lb-1/pools/pool%2F1"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let gw = gateways(&server, Duration::from_secs(5));

    let network = gw.network.get_network("team/net?a b").await.unwrap();
    assert_eq!(network.network_id, "net-7");
    assert_eq!(network.kind, NetworkKind::Private);

    gw.load_balancer.delete_pool("pool/1").await.unwrap();
}
