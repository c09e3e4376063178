//! Account mirror client.

use async_trait::async_trait;

use super::HttpApi;
use crate::gateway::{Account, AccountMirror, GatewayResult};

pub struct AccountClient {
    api: HttpApi,
}

impl AccountClient {
    pub(crate) fn new(api: HttpApi) -> Self {
        Self { api }
    }
}

#[async_trait]
impl AccountMirror for AccountClient {
    async fn get_account(&self, instance: &str) -> GatewayResult<Account> {
        self.api
            .get(
                &["v2", "resource_instances", instance],
                "account",
                instance,
            )
            .await
    }
}
