//! Compute, network and DHCP client for a single cloud workspace.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;

use super::HttpApi;
use crate::gateway::{
    ComputeGateway, CreateInstanceRequest, CreateNetworkRequest, DhcpServer, DhcpServerRef,
    GatewayResult, Image, Instance, InstanceRef, Network, NetworkGateway, NetworkKind, NetworkRef,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstanceList {
    #[serde(default)]
    pvm_instances: Vec<InstanceRef>,
}

#[derive(Debug, Deserialize)]
struct NetworkList {
    #[serde(default)]
    networks: Vec<NetworkRef>,
}

/// Client bound to one cloud workspace.
pub struct PowerClient {
    api: HttpApi,
    cloud_instance_id: String,
}

impl PowerClient {
    pub(crate) fn new(api: HttpApi, cloud_instance_id: String) -> Self {
        Self {
            api,
            cloud_instance_id,
        }
    }

    fn path<'a>(&'a self, suffix: &[&'a str]) -> Vec<&'a str> {
        let mut path = vec!["pcloud", "v1", "cloud-instances", self.cloud_instance_id.as_str()];
        path.extend_from_slice(suffix);
        path
    }
}

#[async_trait]
impl ComputeGateway for PowerClient {
    async fn list_instances(&self) -> GatewayResult<Vec<InstanceRef>> {
        let list: InstanceList = self
            .api
            .get(&self.path(&["pvm-instances"]), "workspace", &self.cloud_instance_id)
            .await?;
        Ok(list.pvm_instances)
    }

    async fn get_instance(&self, instance_id: &str) -> GatewayResult<Instance> {
        self.api
            .get(
                &self.path(&["pvm-instances", instance_id]),
                "instance",
                instance_id,
            )
            .await
    }

    async fn create_instance(
        &self,
        request: &CreateInstanceRequest,
    ) -> GatewayResult<Vec<InstanceRef>> {
        self.api
            .post(&self.path(&["pvm-instances"]), request, "instance")
            .await
    }

    async fn delete_instance(&self, instance_id: &str) -> GatewayResult<()> {
        self.api
            .delete(
                &self.path(&["pvm-instances", instance_id]),
                "instance",
                instance_id,
            )
            .await
    }

    async fn get_image(&self, name_or_id: &str) -> GatewayResult<Image> {
        self.api
            .get(&self.path(&["images", name_or_id]), "image", name_or_id)
            .await
    }

    async fn list_system_pools(&self) -> GatewayResult<Vec<String>> {
        // Keyed by system type; the pool details are not needed here.
        let pools: BTreeMap<String, serde_json::Value> = self
            .api
            .get(&self.path(&["system-pools"]), "workspace", &self.cloud_instance_id)
            .await?;
        Ok(pools.into_keys().collect())
    }
}

#[async_trait]
impl NetworkGateway for PowerClient {
    async fn list_networks(&self, kind: Option<NetworkKind>) -> GatewayResult<Vec<NetworkRef>> {
        let filter = kind.map(|k| format!("type:{}", k.as_str()));
        let query: Vec<(&str, &str)> = filter
            .as_deref()
            .map(|f| vec![("filter", f)])
            .unwrap_or_default();

        let list: NetworkList = self
            .api
            .get_with_query(&self.path(&["networks"]), &query, "workspace", &self.cloud_instance_id)
            .await?;
        Ok(list.networks)
    }

    async fn get_network(&self, id_or_name: &str) -> GatewayResult<Network> {
        self.api
            .get(&self.path(&["networks", id_or_name]), "network", id_or_name)
            .await
    }

    async fn create_network(&self, request: &CreateNetworkRequest) -> GatewayResult<Network> {
        self.api
            .post(&self.path(&["networks"]), request, "network")
            .await
    }

    async fn list_dhcp_servers(&self) -> GatewayResult<Vec<DhcpServerRef>> {
        self.api
            .get(&self.path(&["services", "dhcp"]), "workspace", &self.cloud_instance_id)
            .await
    }

    async fn get_dhcp_server(&self, id: &str) -> GatewayResult<DhcpServer> {
        self.api
            .get(&self.path(&["services", "dhcp", id]), "dhcp server", id)
            .await
    }
}
