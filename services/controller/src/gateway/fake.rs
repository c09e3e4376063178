//! In-memory implementation of every gateway trait.
//!
//! `FakeCloud` behaves like a small, well-mannered cloud: instances boot into
//! a configurable status, addresses appear on activation (statically or via
//! a DHCP lease), and the load balancer tracks pools and listeners. Call
//! counters make idempotency observable in tests, and a few knobs inject the
//! failures the reconcilers must survive.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{
    Account, AccountMirror, AttachmentKind, ComputeGateway, CreateInstanceRequest,
    CreateListenerRequest, CreateNetworkRequest, CreatePoolRequest, DhcpLease, DhcpNetwork,
    DhcpServer, DhcpServerRef, Fault, GatewayError, GatewayFactory, GatewayResult, Gateways, Image,
    Instance, InstanceNetwork, InstanceRef, IpAddressMetrics, Listener, LoadBalancer,
    LoadBalancerGateway, Network, NetworkGateway, NetworkKind, NetworkRef, Pool, ResourceRef,
};
use crate::model::AccountRef;

/// Snapshot of gateway call counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub list_instances: u64,
    pub create_instance: u64,
    pub delete_instance: u64,
    pub create_network: u64,
    pub create_pool: u64,
    pub delete_pool: u64,
    pub create_listener: u64,
    pub delete_listener: u64,
}

#[derive(Default)]
struct Counters {
    list_instances: AtomicU64,
    create_instance: AtomicU64,
    delete_instance: AtomicU64,
    create_network: AtomicU64,
    create_pool: AtomicU64,
    delete_pool: AtomicU64,
    create_listener: AtomicU64,
    delete_listener: AtomicU64,
}

/// Gateway calls that accept injected failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FakeOp {
    ListInstances,
    GetInstance,
    CreateInstance,
    DeleteInstance,
    GetImage,
    ListNetworks,
    GetNetwork,
    CreatePool,
    CreateListener,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::SeqCst);
}

struct FakeState {
    next_id: u64,
    instances: BTreeMap<String, Instance>,
    images: BTreeMap<String, Image>,
    networks: BTreeMap<String, Network>,
    dhcp_servers: BTreeMap<String, DhcpServer>,
    accounts: BTreeMap<String, Account>,
    system_pools: Vec<String>,
    load_balancer: LoadBalancer,
    pools: Vec<Pool>,
    pool_requests: BTreeMap<String, CreatePoolRequest>,
    listeners: Vec<Listener>,

    initial_status: String,
    attachment: AttachmentKind,
    auto_activate: bool,
    fail_instance_deletes: bool,
    duplicate_creates: bool,
    faults: BTreeMap<FakeOp, VecDeque<GatewayError>>,
}

impl FakeState {
    fn empty() -> Self {
        Self {
            next_id: 1,
            instances: BTreeMap::new(),
            images: BTreeMap::new(),
            networks: BTreeMap::new(),
            dhcp_servers: BTreeMap::new(),
            accounts: BTreeMap::new(),
            system_pools: vec!["s922".to_string(), "e980".to_string()],
            load_balancer: LoadBalancer {
                id: "lb-fake".to_string(),
                hostname: "lb.fake.local".to_string(),
                provisioning_status: "active".to_string(),
                operating_status: "online".to_string(),
            },
            pools: Vec::new(),
            pool_requests: BTreeMap::new(),
            listeners: Vec::new(),
            initial_status: "BUILD".to_string(),
            attachment: AttachmentKind::Fixed,
            auto_activate: false,
            fail_instance_deletes: false,
            duplicate_creates: false,
            faults: BTreeMap::new(),
        }
    }

    /// Fail the call if a fault is queued for it.
    fn inject(&mut self, op: FakeOp) -> GatewayResult<()> {
        match self.faults.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(e) => {
                debug!(?op, error = %e, "[FAKE] Injected failure");
                Err(e)
            }
            None => Ok(()),
        }
    }

    fn next_id(&mut self, prefix: &str) -> String {
        let id = format!("{prefix}-{:04}", self.next_id);
        self.next_id += 1;
        id
    }

    fn find_network(&self, id_or_name: &str) -> Option<&Network> {
        self.networks
            .get(id_or_name)
            .or_else(|| self.networks.values().find(|n| n.name == id_or_name))
    }

    fn activate(&mut self, instance_id: &str) {
        let seq = self.next_id;
        self.next_id += 1;

        let Some(instance) = self.instances.get_mut(instance_id) else {
            return;
        };
        instance.status = "ACTIVE".to_string();
        instance.fault = None;

        let mut leases = Vec::new();
        for (idx, attachment) in instance.networks.iter_mut().enumerate() {
            let ip = format!("192.168.{}.{}", idx, 10 + seq % 200);
            match attachment.kind {
                AttachmentKind::Fixed => {
                    attachment.ip_address = ip;
                    attachment.external_ip = format!("203.0.113.{}", 10 + seq % 200);
                }
                AttachmentKind::Dynamic => {
                    leases.push((attachment.network_id.clone(), attachment.mac_address.clone(), ip));
                }
            }
        }

        for (network_id, mac, ip) in leases {
            if let Some(server) = self
                .dhcp_servers
                .values_mut()
                .find(|s| s.network.id == network_id)
            {
                server.leases.push(DhcpLease {
                    mac_address: mac,
                    ip_address: ip,
                });
            }
        }
    }
}

/// In-memory cloud.
pub struct FakeCloud {
    state: Mutex<FakeState>,
    counters: Counters,
}

impl Default for FakeCloud {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeCloud {
    /// An empty cloud with an active load balancer.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState::empty()),
            counters: Counters::default(),
        }
    }

    /// A cloud ready to serve a default catalog: account `fake-account`,
    /// image `rhel-9` and public network `pub-net`. Instances activate on
    /// their first status poll.
    pub fn seeded() -> Self {
        let mut state = FakeState::empty();
        state.auto_activate = true;
        state.accounts.insert(
            "fake-account".to_string(),
            Account {
                guid: "fake-account".to_string(),
                state: "active".to_string(),
                region_id: "fake".to_string(),
            },
        );
        state.images.insert(
            "rhel-9".to_string(),
            Image {
                image_id: "img-rhel-9".to_string(),
                name: "rhel-9".to_string(),
                state: "active".to_string(),
            },
        );
        state.networks.insert(
            "net-pub".to_string(),
            Network {
                network_id: "net-pub".to_string(),
                name: "pub-net".to_string(),
                kind: NetworkKind::Public,
                ip_address_metrics: IpAddressMetrics {
                    available: 250,
                    used: 0,
                    total: 250,
                },
            },
        );

        Self {
            state: Mutex::new(state),
            counters: Counters::default(),
        }
    }

    pub fn calls(&self) -> CallCounts {
        let c = &self.counters;
        CallCounts {
            list_instances: c.list_instances.load(Ordering::SeqCst),
            create_instance: c.create_instance.load(Ordering::SeqCst),
            delete_instance: c.delete_instance.load(Ordering::SeqCst),
            create_network: c.create_network.load(Ordering::SeqCst),
            create_pool: c.create_pool.load(Ordering::SeqCst),
            delete_pool: c.delete_pool.load(Ordering::SeqCst),
            create_listener: c.create_listener.load(Ordering::SeqCst),
            delete_listener: c.delete_listener.load(Ordering::SeqCst),
        }
    }

    // -------------------------------------------------------------------------
    // Seeding
    // -------------------------------------------------------------------------

    pub async fn add_account(&self, guid: &str, state: &str) {
        self.state.lock().await.accounts.insert(
            guid.to_string(),
            Account {
                guid: guid.to_string(),
                state: state.to_string(),
                region_id: "fake".to_string(),
            },
        );
    }

    /// Add an image and return its id.
    pub async fn add_image(&self, name: &str, state: &str) -> String {
        let image_id = format!("img-{name}");
        self.state.lock().await.images.insert(
            name.to_string(),
            Image {
                image_id: image_id.clone(),
                name: name.to_string(),
                state: state.to_string(),
            },
        );
        image_id
    }

    /// Add a network and return its id.
    pub async fn add_network(&self, name: &str, kind: NetworkKind, available: u32) -> String {
        let mut state = self.state.lock().await;
        let network_id = state.next_id("net");
        state.networks.insert(
            network_id.clone(),
            Network {
                network_id: network_id.clone(),
                name: name.to_string(),
                kind,
                ip_address_metrics: IpAddressMetrics {
                    available,
                    used: 0,
                    total: available,
                },
            },
        );
        network_id
    }

    /// Add a DHCP server serving the given network.
    pub async fn add_dhcp_server(&self, network_id: &str) -> String {
        let mut state = self.state.lock().await;
        let name = state
            .networks
            .get(network_id)
            .map(|n| n.name.clone())
            .unwrap_or_default();
        let id = state.next_id("dhcp");
        state.dhcp_servers.insert(
            id.clone(),
            DhcpServer {
                id: id.clone(),
                network: DhcpNetwork {
                    id: network_id.to_string(),
                    name,
                },
                leases: Vec::new(),
            },
        );
        id
    }

    /// Register an instance as if a previous attempt had created it.
    pub async fn insert_instance(&self, server_name: &str, status: &str) -> String {
        let mut state = self.state.lock().await;
        let instance_id = state.next_id("inst");
        state.instances.insert(
            instance_id.clone(),
            Instance {
                instance_id: instance_id.clone(),
                server_name: server_name.to_string(),
                status: status.to_string(),
                fault: None,
                networks: Vec::new(),
            },
        );
        instance_id
    }

    /// Register a listener that belongs to something else.
    pub async fn add_listener(&self, port: u16) {
        let mut state = self.state.lock().await;
        let id = state.next_id("listener");
        state.listeners.push(Listener {
            id,
            port,
            protocol: crate::model::Protocol::Tcp,
            default_pool: None,
        });
    }

    // -------------------------------------------------------------------------
    // Knobs
    // -------------------------------------------------------------------------

    /// Status newly created instances start in.
    pub async fn set_initial_status(&self, status: &str) {
        self.state.lock().await.initial_status = status.to_string();
    }

    /// Activate instances on their first status poll.
    pub async fn set_auto_activate(&self, enabled: bool) {
        self.state.lock().await.auto_activate = enabled;
    }

    /// How new instances attach to their network.
    pub async fn set_attachment_kind(&self, kind: AttachmentKind) {
        self.state.lock().await.attachment = kind;
    }

    /// Fail the next call of `op` with `error`. Queued faults fire in order.
    pub async fn fail_next(&self, op: FakeOp, error: GatewayError) {
        self.state
            .lock()
            .await
            .faults
            .entry(op)
            .or_default()
            .push_back(error);
    }

    pub async fn fail_instance_deletes(&self, fail: bool) {
        self.state.lock().await.fail_instance_deletes = fail;
    }

    /// Answer create requests with two instances instead of one.
    pub async fn set_duplicate_creates(&self, enabled: bool) {
        self.state.lock().await.duplicate_creates = enabled;
    }

    pub async fn set_system_pools(&self, pools: &[&str]) {
        self.state.lock().await.system_pools = pools.iter().map(|p| p.to_string()).collect();
    }

    pub async fn set_load_balancer_status(&self, status: &str) {
        self.state.lock().await.load_balancer.provisioning_status = status.to_string();
    }

    pub async fn set_instance_status(&self, instance_id: &str, status: &str, fault: Option<&str>) {
        let mut state = self.state.lock().await;
        if let Some(instance) = state.instances.get_mut(instance_id) {
            instance.status = status.to_string();
            instance.fault = fault.map(|m| Fault {
                message: m.to_string(),
            });
        }
    }

    /// Move an instance to ACTIVE and hand out its addresses.
    pub async fn activate_instance(&self, instance_id: &str) {
        self.state.lock().await.activate(instance_id);
    }

    // -------------------------------------------------------------------------
    // Inspection
    // -------------------------------------------------------------------------

    pub async fn instances(&self) -> Vec<Instance> {
        self.state.lock().await.instances.values().cloned().collect()
    }

    pub async fn networks(&self) -> Vec<Network> {
        self.state.lock().await.networks.values().cloned().collect()
    }

    pub async fn pools(&self) -> Vec<Pool> {
        self.state.lock().await.pools.clone()
    }

    pub async fn pool_request(&self, pool_id: &str) -> Option<CreatePoolRequest> {
        self.state.lock().await.pool_requests.get(pool_id).cloned()
    }

    pub async fn listeners(&self) -> Vec<Listener> {
        self.state.lock().await.listeners.clone()
    }
}

#[async_trait]
impl ComputeGateway for FakeCloud {
    async fn list_instances(&self) -> GatewayResult<Vec<InstanceRef>> {
        bump(&self.counters.list_instances);
        let mut state = self.state.lock().await;
        state.inject(FakeOp::ListInstances)?;
        Ok(state
            .instances
            .values()
            .map(|i| InstanceRef {
                instance_id: i.instance_id.clone(),
                server_name: i.server_name.clone(),
                status: i.status.clone(),
            })
            .collect())
    }

    async fn get_instance(&self, instance_id: &str) -> GatewayResult<Instance> {
        let mut state = self.state.lock().await;
        state.inject(FakeOp::GetInstance)?;
        let status = state
            .instances
            .get(instance_id)
            .map(|i| i.status.clone())
            .ok_or_else(|| GatewayError::not_found("instance", instance_id))?;

        if state.auto_activate && status == "BUILD" {
            state.activate(instance_id);
        }

        state
            .instances
            .get(instance_id)
            .cloned()
            .ok_or_else(|| GatewayError::not_found("instance", instance_id))
    }

    async fn create_instance(
        &self,
        request: &CreateInstanceRequest,
    ) -> GatewayResult<Vec<InstanceRef>> {
        bump(&self.counters.create_instance);
        let mut state = self.state.lock().await;
        state.inject(FakeOp::CreateInstance)?;

        if !state.images.values().any(|i| i.image_id == request.image_id) {
            return Err(GatewayError::Status {
                status: 400,
                body: format!("unknown image {}", request.image_id),
            });
        }

        let mut attachments = Vec::new();
        for attachment in &request.networks {
            let Some(network) = state.networks.get_mut(&attachment.network_id) else {
                return Err(GatewayError::Status {
                    status: 400,
                    body: format!("unknown network {}", attachment.network_id),
                });
            };
            network.ip_address_metrics.available =
                network.ip_address_metrics.available.saturating_sub(1);
            network.ip_address_metrics.used += 1;
            attachments.push((network.network_id.clone(), network.name.clone()));
        }

        let copies = if state.duplicate_creates { 2 } else { 1 };
        let mut created = Vec::new();
        for _ in 0..copies {
            let instance_id = state.next_id("inst");
            let seq = state.next_id;
            let networks = attachments
                .iter()
                .map(|(id, name)| InstanceNetwork {
                    network_id: id.clone(),
                    network_name: name.clone(),
                    mac_address: format!("fa:16:3e:00:{:02x}:{:02x}", (seq >> 8) & 0xff, seq & 0xff),
                    ip_address: String::new(),
                    external_ip: String::new(),
                    kind: state.attachment,
                })
                .collect();

            let instance = Instance {
                instance_id: instance_id.clone(),
                server_name: request.server_name.clone(),
                status: state.initial_status.clone(),
                fault: None,
                networks,
            };
            info!(
                instance_id = %instance_id,
                server_name = %request.server_name,
                "[FAKE] Created instance"
            );
            created.push(InstanceRef {
                instance_id: instance_id.clone(),
                server_name: instance.server_name.clone(),
                status: instance.status.clone(),
            });
            state.instances.insert(instance_id, instance);
        }

        Ok(created)
    }

    async fn delete_instance(&self, instance_id: &str) -> GatewayResult<()> {
        bump(&self.counters.delete_instance);
        let mut state = self.state.lock().await;
        state.inject(FakeOp::DeleteInstance)?;

        if state.fail_instance_deletes {
            return Err(GatewayError::Status {
                status: 500,
                body: "delete rejected".to_string(),
            });
        }

        state
            .instances
            .remove(instance_id)
            .map(|_| debug!(instance_id, "[FAKE] Deleted instance"))
            .ok_or_else(|| GatewayError::not_found("instance", instance_id))
    }

    async fn get_image(&self, name_or_id: &str) -> GatewayResult<Image> {
        let mut state = self.state.lock().await;
        state.inject(FakeOp::GetImage)?;
        state
            .images
            .get(name_or_id)
            .or_else(|| state.images.values().find(|i| i.image_id == name_or_id))
            .cloned()
            .ok_or_else(|| GatewayError::not_found("image", name_or_id))
    }

    async fn list_system_pools(&self) -> GatewayResult<Vec<String>> {
        Ok(self.state.lock().await.system_pools.clone())
    }
}

#[async_trait]
impl NetworkGateway for FakeCloud {
    async fn list_networks(&self, kind: Option<NetworkKind>) -> GatewayResult<Vec<NetworkRef>> {
        let mut state = self.state.lock().await;
        state.inject(FakeOp::ListNetworks)?;
        Ok(state
            .networks
            .values()
            .filter(|n| kind.is_none_or(|k| n.kind == k))
            .map(|n| NetworkRef {
                network_id: n.network_id.clone(),
                name: n.name.clone(),
                kind: n.kind,
            })
            .collect())
    }

    async fn get_network(&self, id_or_name: &str) -> GatewayResult<Network> {
        let mut state = self.state.lock().await;
        state.inject(FakeOp::GetNetwork)?;
        state
            .find_network(id_or_name)
            .cloned()
            .ok_or_else(|| GatewayError::not_found("network", id_or_name))
    }

    async fn create_network(&self, request: &CreateNetworkRequest) -> GatewayResult<Network> {
        bump(&self.counters.create_network);
        let mut state = self.state.lock().await;
        let network_id = state.next_id("net");
        let network = Network {
            network_id: network_id.clone(),
            name: request.name.clone(),
            kind: request.kind,
            ip_address_metrics: IpAddressMetrics {
                available: 250,
                used: 0,
                total: 250,
            },
        };
        state.networks.insert(network_id, network.clone());
        Ok(network)
    }

    async fn list_dhcp_servers(&self) -> GatewayResult<Vec<DhcpServerRef>> {
        let state = self.state.lock().await;
        Ok(state
            .dhcp_servers
            .values()
            .map(|s| DhcpServerRef {
                id: s.id.clone(),
                network: s.network.clone(),
                status: "ACTIVE".to_string(),
            })
            .collect())
    }

    async fn get_dhcp_server(&self, id: &str) -> GatewayResult<DhcpServer> {
        let state = self.state.lock().await;
        state
            .dhcp_servers
            .get(id)
            .cloned()
            .ok_or_else(|| GatewayError::not_found("dhcp server", id))
    }
}

#[async_trait]
impl LoadBalancerGateway for FakeCloud {
    async fn get_load_balancer(&self) -> GatewayResult<LoadBalancer> {
        Ok(self.state.lock().await.load_balancer.clone())
    }

    async fn list_pools(&self) -> GatewayResult<Vec<Pool>> {
        Ok(self.state.lock().await.pools.clone())
    }

    async fn create_pool(&self, request: &CreatePoolRequest) -> GatewayResult<Pool> {
        bump(&self.counters.create_pool);
        let mut state = self.state.lock().await;
        state.inject(FakeOp::CreatePool)?;

        if state.pools.iter().any(|p| p.name == request.name) {
            return Err(GatewayError::Status {
                status: 409,
                body: format!("pool {} already exists", request.name),
            });
        }

        let pool = Pool {
            id: state.next_id("pool"),
            name: request.name.clone(),
            protocol: request.protocol,
        };
        state.pool_requests.insert(pool.id.clone(), request.clone());
        state.pools.push(pool.clone());
        Ok(pool)
    }

    async fn delete_pool(&self, pool_id: &str) -> GatewayResult<()> {
        bump(&self.counters.delete_pool);
        let mut state = self.state.lock().await;

        let Some(idx) = state.pools.iter().position(|p| p.id == pool_id) else {
            return Err(GatewayError::not_found("pool", pool_id));
        };
        let pool = state.pools[idx].clone();
        if state.listeners.iter().any(|l| l.uses_pool(&pool)) {
            return Err(GatewayError::Status {
                status: 409,
                body: format!("pool {pool_id} is in use by a listener"),
            });
        }

        state.pools.remove(idx);
        state.pool_requests.remove(pool_id);
        Ok(())
    }

    async fn list_listeners(&self) -> GatewayResult<Vec<Listener>> {
        Ok(self.state.lock().await.listeners.clone())
    }

    async fn create_listener(&self, request: &CreateListenerRequest) -> GatewayResult<Listener> {
        bump(&self.counters.create_listener);
        let mut state = self.state.lock().await;
        state.inject(FakeOp::CreateListener)?;

        if state.listeners.iter().any(|l| l.port == request.port) {
            return Err(GatewayError::Status {
                status: 409,
                body: format!("port {} already in use", request.port),
            });
        }
        let Some(pool) = state.pools.iter().find(|p| p.id == request.default_pool.id) else {
            return Err(GatewayError::Status {
                status: 400,
                body: format!("unknown pool {}", request.default_pool.id),
            });
        };
        let default_pool = ResourceRef {
            id: pool.id.clone(),
            name: pool.name.clone(),
        };

        let listener = Listener {
            id: state.next_id("listener"),
            port: request.port,
            protocol: request.protocol,
            default_pool: Some(default_pool),
        };
        state.listeners.push(listener.clone());
        Ok(listener)
    }

    async fn delete_listener(&self, listener_id: &str) -> GatewayResult<()> {
        bump(&self.counters.delete_listener);
        let mut state = self.state.lock().await;
        let before = state.listeners.len();
        state.listeners.retain(|l| l.id != listener_id);
        if state.listeners.len() == before {
            return Err(GatewayError::not_found("listener", listener_id));
        }
        Ok(())
    }
}

#[async_trait]
impl AccountMirror for FakeCloud {
    async fn get_account(&self, instance: &str) -> GatewayResult<Account> {
        let state = self.state.lock().await;
        state
            .accounts
            .get(instance)
            .cloned()
            .ok_or_else(|| GatewayError::not_found("account", instance))
    }
}

/// Hands out the same [`FakeCloud`] for every account.
#[derive(Clone)]
pub struct FakeGatewayFactory {
    cloud: Arc<FakeCloud>,
}

impl FakeGatewayFactory {
    pub fn new(cloud: Arc<FakeCloud>) -> Self {
        Self { cloud }
    }
}

impl GatewayFactory for FakeGatewayFactory {
    fn scope(&self, _account: &AccountRef) -> GatewayResult<Gateways> {
        Ok(Gateways {
            compute: self.cloud.clone(),
            network: self.cloud.clone(),
            load_balancer: self.cloud.clone(),
            accounts: self.cloud.clone(),
        })
    }
}
