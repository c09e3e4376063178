//! VM provisioner.
//!
//! Discovery always comes before creation: a service's instance is found by
//! server name, so a crash between the create call and the status write
//! leads to adoption on the next pass rather than a duplicate.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use tracing::{debug, info, instrument};
use ulid::Ulid;

use super::ServiceScope;
use crate::capacity::parse_cpu;
use crate::error::{Error, Result};
use crate::gateway::{
    CreateInstanceRequest, CreateNetworkRequest, Instance, InstanceRef, Network, NetworkAttachment,
    NetworkKind,
};
use crate::model::{Capacity, ServiceState, ServiceStatus};

/// Provider status of a running instance.
pub const STATUS_ACTIVE: &str = "ACTIVE";

/// Provider status of a broken instance.
pub const STATUS_ERROR: &str = "ERROR";

/// Where the instance stands after a status poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstancePhase {
    Active,
    Failed,
    Building,
}

/// Make sure the service has an instance, adopting one by name if it exists.
#[instrument(skip_all, fields(service = %scope.service))]
pub async fn ensure_instance(
    scope: &ServiceScope,
    capacity: &Capacity,
    status: &mut ServiceStatus,
) -> Result<()> {
    if !status.vm.instance_id.is_empty() {
        return Ok(());
    }

    let compute = &scope.gateways.compute;
    if let Some(instance) = discover(scope).await?.into_iter().next() {
        info!(instance_id = %instance.instance_id, "Adopted existing instance");
        status.vm.instance_id = instance.instance_id;
        status.vm.state = instance.status;
        return Ok(());
    }

    let network = select_network(scope).await?;
    let image = compute
        .get_image(&scope.catalog.spec.vm.image)
        .await
        .map_err(|e| Error::gateway("look up image", e))?;

    let request = build_create_request(scope, capacity, &image.image_id, &network.network_id)?;
    let created = compute
        .create_instance(&request)
        .await
        .map_err(|e| Error::gateway("create instance", e))?;

    let instance = match <[_; 1]>::try_from(created) {
        Ok([instance]) => instance,
        Err(created) => {
            return Err(Error::Failed(format!(
                "expected exactly one instance from create, got {}",
                created.len()
            )))
        }
    };

    info!(
        instance_id = %instance.instance_id,
        network = %network.name,
        "Created instance"
    );
    status.vm.instance_id = instance.instance_id;
    status.vm.state = instance.status;
    status.vm.network = network.name;
    Ok(())
}

/// Instances carrying the service's server name.
async fn discover(scope: &ServiceScope) -> Result<Vec<InstanceRef>> {
    let existing = scope
        .gateways
        .compute
        .list_instances()
        .await
        .map_err(|e| Error::gateway("list instances", e))?;

    Ok(existing
        .into_iter()
        .filter(|i| i.server_name == scope.service)
        .collect())
}

/// Fetch the recorded instance.
///
/// Reads lag writes on the provider, so a 404 for an instance this service
/// has not yet seen running is retried instead of failing the service.
async fn get_recorded(scope: &ServiceScope, status: &ServiceStatus) -> Result<Instance> {
    let instance_id = &status.vm.instance_id;
    match scope.gateways.compute.get_instance(instance_id).await {
        Ok(instance) => Ok(instance),
        Err(e) if e.is_not_found() && status.state != ServiceState::Created => Err(
            Error::NotReady(format!("instance {instance_id} is not visible yet")),
        ),
        Err(e) => Err(Error::gateway("get instance", e)),
    }
}

/// Pick the network a new instance attaches to.
///
/// A pinned network must exist. Otherwise the first public network with free
/// addresses wins, and a fresh one is created when all are full.
pub async fn select_network(scope: &ServiceScope) -> Result<Network> {
    let networks = &scope.gateways.network;

    if let Some(pinned) = &scope.catalog.spec.vm.network {
        return networks
            .get_network(pinned)
            .await
            .map_err(|e| Error::gateway(format!("resolve network {pinned}"), e));
    }

    let candidates = networks
        .list_networks(Some(NetworkKind::Public))
        .await
        .map_err(|e| Error::gateway("list public networks", e))?;

    for candidate in candidates {
        let network = networks
            .get_network(&candidate.network_id)
            .await
            .map_err(|e| Error::gateway(format!("get network {}", candidate.name), e))?;
        if network.has_capacity() {
            debug!(network = %network.name, "Selected public network");
            return Ok(network);
        }
    }

    let name = format!("pac-pub-{}", Ulid::new().to_string().to_lowercase());
    let network = networks
        .create_network(&CreateNetworkRequest {
            name,
            kind: NetworkKind::Public,
            dns_servers: Vec::new(),
        })
        .await
        .map_err(|e| Error::gateway("create public network", e))?;

    info!(network = %network.name, "Created public network");
    Ok(network)
}

/// Build the create request for a validated capacity.
pub fn build_create_request(
    scope: &ServiceScope,
    capacity: &Capacity,
    image_id: &str,
    network_id: &str,
) -> Result<CreateInstanceRequest> {
    let backing = &scope.catalog.spec.vm;
    let user_data = if scope.spec.ssh_keys.is_empty() {
        String::new()
    } else {
        STANDARD.encode(scope.spec.ssh_keys.join("\n"))
    };

    Ok(CreateInstanceRequest {
        server_name: scope.service.clone(),
        image_id: image_id.to_string(),
        networks: vec![NetworkAttachment {
            network_id: network_id.to_string(),
        }],
        memory: capacity.memory as f64 / 1024.0,
        processors: parse_cpu(&capacity.cpu)?,
        proc_type: backing.processor_type.clone(),
        sys_type: backing.system_type.clone(),
        user_data,
    })
}

/// Poll the instance and fold its provider status into the service status.
#[instrument(skip_all, fields(service = %scope.service, instance_id = %status.vm.instance_id))]
pub async fn refresh(scope: &ServiceScope, status: &mut ServiceStatus) -> Result<InstancePhase> {
    if status.vm.instance_id.is_empty() {
        status.mark_in_progress("waiting for instance to be created");
        return Ok(InstancePhase::Building);
    }

    let instance = get_recorded(scope, status).await?;

    let phase = classify(&instance, status);
    debug!(status = %instance.status, ?phase, "Classified instance");
    Ok(phase)
}

/// Map a provider status onto the service state machine.
pub fn classify(instance: &Instance, status: &mut ServiceStatus) -> InstancePhase {
    status.vm.state = instance.status.clone();

    match instance.status.as_str() {
        STATUS_ACTIVE => {
            let (internal, external) = addresses(instance);
            let access = [external, internal, &status.vm.external_ip_address, &status.vm.ip_address]
                .into_iter()
                .find(|ip| !ip.is_empty())
                .cloned()
                .unwrap_or_default();
            status.mark_created(access);
            InstancePhase::Active
        }
        STATUS_ERROR => {
            let reason = instance
                .fault
                .as_ref()
                .map(|f| f.message.as_str())
                .filter(|m| !m.is_empty())
                .unwrap_or("provider reported instance in ERROR state");
            status.mark_failed(reason);
            InstancePhase::Failed
        }
        other => {
            status.mark_in_progress(format!("instance is {other}; waiting for it to become active"));
            InstancePhase::Building
        }
    }
}

/// First internal and external address reported on the instance.
fn addresses(instance: &Instance) -> (&String, &String) {
    static EMPTY: String = String::new();

    let internal = instance
        .networks
        .iter()
        .map(|n| &n.ip_address)
        .find(|ip| !ip.is_empty())
        .unwrap_or(&EMPTY);
    let external = instance
        .networks
        .iter()
        .map(|n| &n.external_ip)
        .find(|ip| !ip.is_empty())
        .unwrap_or(&EMPTY);
    (internal, external)
}

/// Delete the service's instance.
///
/// Without a recorded id the instance is looked up by server name, since the
/// create call may have landed without its id ever being stored.
#[instrument(skip_all, fields(service = %scope.service, instance_id = %status.vm.instance_id))]
pub async fn delete_instance(scope: &ServiceScope, status: &ServiceStatus) -> Result<()> {
    let instance_ids = if status.vm.instance_id.is_empty() {
        discover(scope)
            .await?
            .into_iter()
            .map(|i| i.instance_id)
            .collect()
    } else {
        vec![status.vm.instance_id.clone()]
    };

    if instance_ids.is_empty() {
        debug!("No instance found; nothing to delete");
        return Ok(());
    }

    for instance_id in instance_ids {
        match scope.gateways.compute.delete_instance(&instance_id).await {
            Ok(()) => info!(%instance_id, "Deleted instance"),
            Err(e) if e.is_not_found() => debug!(%instance_id, "Instance already gone"),
            Err(e) => return Err(Error::gateway(format!("delete instance {instance_id}"), e)),
        }
    }
    Ok(())
}
