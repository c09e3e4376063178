//! Network resolver.
//!
//! Static attachments report their address on the instance. DHCP
//! attachments only report a MAC; the address comes from the lease table of
//! the DHCP server serving that network, and shows up some time after boot.

use pac_reconcile::Progress;
use tracing::{debug, instrument};

use super::ServiceScope;
use crate::error::{Error, Result};
use crate::gateway::{AttachmentKind, InstanceNetwork};
use crate::model::ServiceStatus;

/// Record MAC, IP and network for the service's instance.
#[instrument(skip_all, fields(service = %scope.service, instance_id = %status.vm.instance_id))]
pub async fn resolve(scope: &ServiceScope, status: &mut ServiceStatus) -> Result<Progress> {
    if status.vm.instance_id.is_empty() {
        return Ok(Progress::pending("instance not created yet"));
    }

    // Runs right after a status poll saw the instance, so a 404 here is lag.
    let instance = match scope
        .gateways
        .compute
        .get_instance(&status.vm.instance_id)
        .await
    {
        Err(e) if e.is_not_found() => return Ok(Progress::pending("instance not visible yet")),
        other => other.map_err(|e| Error::gateway("get instance", e))?,
    };

    if instance.networks.is_empty() {
        return Ok(Progress::pending("instance has no network attachment yet"));
    }

    let mut pending = Progress::Complete;
    for attachment in &instance.networks {
        let ip = match attachment.kind {
            AttachmentKind::Fixed => Some(attachment.ip_address.clone()).filter(|ip| !ip.is_empty()),
            AttachmentKind::Dynamic => lease_address(scope, attachment).await?,
        };

        let Some(ip) = ip else {
            pending = Progress::pending(format!(
                "IP address on network {} not yet available",
                attachment.network_name
            ));
            continue;
        };

        status.vm.mac_address = attachment.mac_address.clone();
        status.vm.network = attachment.network_name.clone();
        status.vm.ip_address = ip;
        status.vm.external_ip_address = attachment.external_ip.clone();

        if status.access_info.is_empty() {
            status.access_info = if status.vm.external_ip_address.is_empty() {
                status.vm.ip_address.clone()
            } else {
                status.vm.external_ip_address.clone()
            };
        }

        debug!(ip = %status.vm.ip_address, network = %status.vm.network, "Resolved address");
        return Ok(Progress::Complete);
    }

    Ok(pending)
}

/// Look up the DHCP lease for an attachment. `None` until the lease exists.
async fn lease_address(scope: &ServiceScope, attachment: &InstanceNetwork) -> Result<Option<String>> {
    let networks = &scope.gateways.network;

    let servers = networks
        .list_dhcp_servers()
        .await
        .map_err(|e| Error::gateway("list DHCP servers", e))?;

    let Some(server) = servers.into_iter().find(|s| {
        s.network.name == attachment.network_name || s.network.id == attachment.network_id
    }) else {
        debug!(network = %attachment.network_name, "No DHCP server for network yet");
        return Ok(None);
    };

    let server = networks
        .get_dhcp_server(&server.id)
        .await
        .map_err(|e| Error::gateway(format!("get DHCP server {}", server.id), e))?;

    Ok(server
        .leases
        .into_iter()
        .find(|l| l.mac_address.eq_ignore_ascii_case(&attachment.mac_address))
        .map(|l| l.ip_address))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::gateway::fake::FakeCloud;
    use crate::gateway::NetworkKind;
    use crate::model::Capacity;
    use crate::reconciler::vm;
    use crate::testing::{catalog, fake_scope, service};

    fn capacity() -> Capacity {
        Capacity {
            cpu: "1".to_string(),
            memory: 2048,
        }
    }

    #[tokio::test]
    async fn test_fixed_attachment_waits_for_ip() {
        let cloud = Arc::new(FakeCloud::seeded());
        cloud.set_auto_activate(false).await;
        let scope = fake_scope(&cloud, &service("devbox", "rhel"), &catalog("rhel"));

        let mut status = ServiceStatus::default();
        vm::ensure_instance(&scope, &capacity(), &mut status)
            .await
            .unwrap();

        let progress = resolve(&scope, &mut status).await.unwrap();
        assert!(!progress.is_complete());
        assert!(status.vm.ip_address.is_empty());

        cloud.activate_instance(&status.vm.instance_id).await;
        let progress = resolve(&scope, &mut status).await.unwrap();
        assert!(progress.is_complete());
        assert!(!status.vm.ip_address.is_empty());
        assert!(!status.vm.mac_address.is_empty());
        assert_eq!(status.vm.network, "pub-net");
        assert_eq!(status.access_info, status.vm.external_ip_address);
    }

    #[tokio::test]
    async fn test_unlisted_instance_is_pending() {
        let cloud = Arc::new(FakeCloud::seeded());
        let scope = fake_scope(&cloud, &service("devbox", "rhel"), &catalog("rhel"));
        let mut status = ServiceStatus::default();
        status.mark_created("203.0.113.7");
        status.vm.instance_id = "inst-lagging".to_string();

        let progress = resolve(&scope, &mut status).await.unwrap();
        assert!(matches!(progress, Progress::Pending { .. }));
    }

    #[tokio::test]
    async fn test_dynamic_attachment_resolves_through_lease() {
        let cloud = Arc::new(FakeCloud::new());
        cloud.add_image("rhel-9", "active").await;
        let network_id = cloud.add_network("dhcp-net", NetworkKind::Dhcp, 10).await;
        cloud.set_attachment_kind(AttachmentKind::Dynamic).await;

        let mut cat = catalog("rhel");
        cat.spec.vm.network = Some("dhcp-net".to_string());
        let scope = fake_scope(&cloud, &service("devbox", "rhel"), &cat);

        let mut status = ServiceStatus::default();
        vm::ensure_instance(&scope, &capacity(), &mut status)
            .await
            .unwrap();
        cloud.activate_instance(&status.vm.instance_id).await;

        // No DHCP server yet: retryable, not an error.
        let progress = resolve(&scope, &mut status).await.unwrap();
        assert!(matches!(progress, Progress::Pending { .. }));

        // Server exists but the lease was handed out before it was watched.
        cloud.add_dhcp_server(&network_id).await;
        let progress = resolve(&scope, &mut status).await.unwrap();
        assert!(!progress.is_complete());

        // A fresh activation populates the lease table.
        cloud.activate_instance(&status.vm.instance_id).await;
        let progress = resolve(&scope, &mut status).await.unwrap();
        assert!(progress.is_complete());
        assert!(status.vm.ip_address.starts_with("192.168."));
        assert_eq!(status.vm.network, "dhcp-net");
        assert_eq!(status.access_info, status.vm.ip_address);
    }
}
