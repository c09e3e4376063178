//! Load-balancer client.

use async_trait::async_trait;
use serde::Deserialize;

use super::HttpApi;
use crate::gateway::{
    CreateListenerRequest, CreatePoolRequest, GatewayResult, Listener, LoadBalancer,
    LoadBalancerGateway, Pool,
};

/// API version pin sent with every request.
const API_VERSION: &str = "2024-04-30";

#[derive(Debug, Deserialize)]
struct PoolList {
    #[serde(default)]
    pools: Vec<Pool>,
}

#[derive(Debug, Deserialize)]
struct ListenerList {
    #[serde(default)]
    listeners: Vec<Listener>,
}

/// Client bound to one load balancer.
pub struct LoadBalancerClient {
    api: HttpApi,
    load_balancer_id: String,
}

impl LoadBalancerClient {
    pub(crate) fn new(api: HttpApi, load_balancer_id: String) -> Self {
        Self {
            api: api.with_query(vec![("version", API_VERSION), ("generation", "2")]),
            load_balancer_id,
        }
    }

    fn path<'a>(&'a self, suffix: &[&'a str]) -> Vec<&'a str> {
        let mut path = vec!["v1", "load_balancers", self.load_balancer_id.as_str()];
        path.extend_from_slice(suffix);
        path
    }
}

#[async_trait]
impl LoadBalancerGateway for LoadBalancerClient {
    async fn get_load_balancer(&self) -> GatewayResult<LoadBalancer> {
        self.api
            .get(&self.path(&[]), "load balancer", &self.load_balancer_id)
            .await
    }

    async fn list_pools(&self) -> GatewayResult<Vec<Pool>> {
        let list: PoolList = self
            .api
            .get(&self.path(&["pools"]), "load balancer", &self.load_balancer_id)
            .await?;
        Ok(list.pools)
    }

    async fn create_pool(&self, request: &CreatePoolRequest) -> GatewayResult<Pool> {
        self.api.post(&self.path(&["pools"]), request, "pool").await
    }

    async fn delete_pool(&self, pool_id: &str) -> GatewayResult<()> {
        self.api
            .delete(&self.path(&["pools", pool_id]), "pool", pool_id)
            .await
    }

    async fn list_listeners(&self) -> GatewayResult<Vec<Listener>> {
        let list: ListenerList = self
            .api
            .get(&self.path(&["listeners"]), "load balancer", &self.load_balancer_id)
            .await?;
        Ok(list.listeners)
    }

    async fn create_listener(&self, request: &CreateListenerRequest) -> GatewayResult<Listener> {
        self.api
            .post(&self.path(&["listeners"]), request, "listener")
            .await
    }

    async fn delete_listener(&self, listener_id: &str) -> GatewayResult<()> {
        self.api
            .delete(
                &self.path(&["listeners", listener_id]),
                "listener",
                listener_id,
            )
            .await
    }
}
