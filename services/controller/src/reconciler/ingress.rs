//! Ingress orchestrator.
//!
//! Each declared port gets a backend pool named `<service>-<port>` holding
//! the instance as its only member, and one listener on the shared load
//! balancer forwarding an external port to that pool. Pools and listeners
//! are always discovered before they are created.

use std::collections::{BTreeSet, HashSet};
use std::ops::RangeInclusive;

use pac_reconcile::Progress;
use rand::Rng;
use tracing::{debug, info, instrument};

use super::ServiceScope;
use crate::error::{Error, Result};
use crate::gateway::{
    CreateListenerRequest, CreatePoolRequest, HealthMonitor, HealthMonitorKind, PoolAlgorithm,
    PoolMember, PoolMemberTarget, ResourceRef,
};
use crate::model::{pool_name, IngressStatus, ServiceStatus};

/// External ports handed out to listeners.
pub const LISTENER_PORT_RANGE: RangeInclusive<u16> = 30000..=32767;

/// Random draws before falling back to a scan.
const RANDOM_ATTEMPTS: usize = 32;

const HEALTH_DELAY_SECS: u32 = 5;
const HEALTH_MAX_RETRIES: u32 = 2;
const HEALTH_TIMEOUT_SECS: u32 = 2;
const MEMBER_WEIGHT: u32 = 50;

/// Pick a free listener port, or `None` if the range is exhausted.
pub fn allocate_listener_port<R: Rng>(used: &BTreeSet<u16>, rng: &mut R) -> Option<u16> {
    for _ in 0..RANDOM_ATTEMPTS {
        let port = rng.random_range(LISTENER_PORT_RANGE);
        if !used.contains(&port) {
            return Some(port);
        }
    }
    LISTENER_PORT_RANGE.into_iter().find(|p| !used.contains(p))
}

/// Make sure every declared port has a pool and a listener.
#[instrument(skip_all, fields(service = %scope.service))]
pub async fn ensure(scope: &ServiceScope, status: &mut ServiceStatus) -> Result<Progress> {
    if scope.spec.ports.is_empty() {
        return Ok(Progress::Complete);
    }
    if status.vm.ip_address.is_empty() {
        return Ok(Progress::pending("instance address not resolved yet"));
    }

    let lb = &scope.gateways.load_balancer;
    let balancer = lb
        .get_load_balancer()
        .await
        .map_err(|e| Error::gateway("get load balancer", e))?;
    if !balancer.is_active() {
        return Ok(Progress::pending(format!(
            "load balancer is {}",
            balancer.provisioning_status
        )));
    }

    let mut pools = lb
        .list_pools()
        .await
        .map_err(|e| Error::gateway("list pools", e))?;
    let mut listeners = lb
        .list_listeners()
        .await
        .map_err(|e| Error::gateway("list listeners", e))?;
    let mut used: BTreeSet<u16> = listeners.iter().map(|l| l.port).collect();

    let mut ingress = Vec::with_capacity(scope.spec.ports.len());
    for port in &scope.spec.ports {
        let name = pool_name(&scope.service, port.port);

        let pool = match pools.iter().find(|p| p.name == name) {
            Some(pool) => {
                debug!(pool = %name, "Pool exists");
                pool.clone()
            }
            None => {
                let pool = lb
                    .create_pool(&CreatePoolRequest {
                        name: name.clone(),
                        algorithm: PoolAlgorithm::RoundRobin,
                        protocol: port.protocol,
                        health_monitor: HealthMonitor {
                            kind: HealthMonitorKind::from(port.protocol),
                            delay: HEALTH_DELAY_SECS,
                            max_retries: HEALTH_MAX_RETRIES,
                            timeout: HEALTH_TIMEOUT_SECS,
                        },
                        members: vec![PoolMember {
                            port: port.port,
                            target: PoolMemberTarget {
                                address: status.vm.ip_address.clone(),
                            },
                            weight: MEMBER_WEIGHT,
                        }],
                    })
                    .await
                    .map_err(|e| Error::gateway(format!("create pool {name}"), e))?;
                info!(pool = %name, pool_id = %pool.id, "Created pool");
                pools.push(pool.clone());
                pool
            }
        };

        let target = match listeners.iter().find(|l| l.uses_pool(&pool)) {
            Some(listener) => {
                debug!(pool = %name, port = listener.port, "Listener exists");
                listener.port
            }
            None => {
                let external = allocate_listener_port(&used, &mut rand::rng()).ok_or_else(|| {
                    Error::Failed("no free listener port left on the load balancer".to_string())
                })?;

                let listener = lb
                    .create_listener(&CreateListenerRequest {
                        port: external,
                        protocol: port.protocol,
                        default_pool: ResourceRef {
                            id: pool.id.clone(),
                            name: pool.name.clone(),
                        },
                    })
                    .await
                    .map_err(|e| Error::gateway(format!("create listener for {name}"), e))?;
                info!(pool = %name, port = listener.port, "Created listener");
                used.insert(listener.port);
                let port = listener.port;
                listeners.push(listener);
                port
            }
        };

        ingress.push(IngressStatus {
            port: port.port,
            protocol: port.protocol,
            pool: name,
            target: Some(target),
        });
    }

    status.ingress = ingress;
    status.endpoint = Some(balancer.hostname);
    Ok(Progress::Complete)
}

/// Delete the service's listeners, then its pools.
#[instrument(skip_all, fields(service = %scope.service))]
pub async fn remove(scope: &ServiceScope, status: &ServiceStatus) -> Result<()> {
    let names: HashSet<String> = scope
        .spec
        .ports
        .iter()
        .map(|p| pool_name(&scope.service, p.port))
        .chain(status.ingress.iter().map(|i| i.pool.clone()))
        .collect();
    if names.is_empty() {
        return Ok(());
    }

    let lb = &scope.gateways.load_balancer;
    let pools: Vec<_> = lb
        .list_pools()
        .await
        .map_err(|e| Error::gateway("list pools", e))?
        .into_iter()
        .filter(|p| names.contains(&p.name))
        .collect();
    if pools.is_empty() {
        debug!("No pools left to remove");
        return Ok(());
    }

    let balancer = lb
        .get_load_balancer()
        .await
        .map_err(|e| Error::gateway("get load balancer", e))?;
    if !balancer.is_active() {
        return Err(Error::NotReady(format!(
            "load balancer is {}",
            balancer.provisioning_status
        )));
    }

    let listeners = lb
        .list_listeners()
        .await
        .map_err(|e| Error::gateway("list listeners", e))?;

    for listener in listeners
        .iter()
        .filter(|l| pools.iter().any(|p| l.uses_pool(p)))
    {
        match lb.delete_listener(&listener.id).await {
            Ok(()) => info!(port = listener.port, "Deleted listener"),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(Error::gateway(format!("delete listener {}", listener.id), e)),
        }
    }

    for pool in &pools {
        match lb.delete_pool(&pool.id).await {
            Ok(()) => info!(pool = %pool.name, "Deleted pool"),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(Error::gateway(format!("delete pool {}", pool.name), e)),
        }
    }

    Ok(())
}
