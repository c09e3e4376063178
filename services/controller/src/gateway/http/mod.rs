//! HTTP implementations of the gateway traits.
//!
//! All clients share one `reqwest::Client` (and its connection pool); the
//! per-account scoping lives in the lightweight client structs built by
//! [`HttpGatewayFactory::scope`]. Every request carries the configured
//! deadline, and a deadline miss surfaces as [`GatewayError::Timeout`].

mod account;
mod compute;
mod load_balancer;

pub use account::AccountClient;
pub use compute::PowerClient;
pub use load_balancer::LoadBalancerClient;

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use reqwest::{Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::{GatewayError, GatewayFactory, GatewayResult, Gateways};
use crate::model::AccountRef;

/// Endpoints and credentials for the infrastructure APIs.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Compute/network API base URL. `{zone}` is replaced by the account's zone.
    pub compute_url: String,

    /// Load-balancer API base URL.
    pub load_balancer_url: String,

    /// Account mirror base URL.
    pub account_url: String,

    /// Bearer token sent with every request.
    pub api_token: Option<String>,

    /// Load balancer that fronts every service.
    pub load_balancer_id: String,

    /// Deadline for each call.
    pub request_timeout: Duration,
}

/// Builds HTTP gateway bundles scoped to a compute account.
pub struct HttpGatewayFactory {
    client: reqwest::Client,
    config: GatewayConfig,
}

impl HttpGatewayFactory {
    pub fn new(config: GatewayConfig) -> GatewayResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self { client, config })
    }

    fn base_headers(&self) -> GatewayResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        if let Some(token) = &self.config.api_token {
            headers.insert(AUTHORIZATION, header_value(&format!("Bearer {token}"))?);
        }
        Ok(headers)
    }
}

impl GatewayFactory for HttpGatewayFactory {
    fn scope(&self, account: &AccountRef) -> GatewayResult<Gateways> {
        let headers = self.base_headers()?;

        let mut compute_headers = headers.clone();
        compute_headers.insert(HeaderName::from_static("crn"), header_value(&account.crn)?);

        let compute_api = HttpApi::new(
            self.client.clone(),
            self.config.compute_url.replace("{zone}", &account.zone),
            compute_headers,
        );
        let power = Arc::new(PowerClient::new(compute_api, account.instance.clone()));

        let load_balancer = LoadBalancerClient::new(
            HttpApi::new(
                self.client.clone(),
                self.config.load_balancer_url.clone(),
                headers.clone(),
            ),
            self.config.load_balancer_id.clone(),
        );

        let accounts = AccountClient::new(HttpApi::new(
            self.client.clone(),
            self.config.account_url.clone(),
            headers,
        ));

        Ok(Gateways {
            compute: power.clone(),
            network: power,
            load_balancer: Arc::new(load_balancer),
            accounts: Arc::new(accounts),
        })
    }
}

fn header_value(value: &str) -> GatewayResult<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| GatewayError::Transport(format!("invalid header value: {e}")))
}

/// JSON-over-HTTP plumbing shared by the clients.
#[derive(Clone)]
pub(crate) struct HttpApi {
    client: reqwest::Client,
    base_url: String,
    headers: HeaderMap,
    query: Vec<(&'static str, &'static str)>,
}

impl HttpApi {
    pub(crate) fn new(client: reqwest::Client, base_url: String, headers: HeaderMap) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            headers,
            query: Vec::new(),
        }
    }

    /// Query parameters appended to every request (API version pins).
    pub(crate) fn with_query(mut self, query: Vec<(&'static str, &'static str)>) -> Self {
        self.query = query;
        self
    }

    /// Base URL with `segments` appended, each one percent-encoded.
    fn url(&self, segments: &[&str]) -> GatewayResult<Url> {
        let base = &self.base_url;
        let mut url = Url::parse(base)
            .map_err(|e| GatewayError::Transport(format!("invalid base url {base}: {e}")))?;
        url.path_segments_mut()
            .map_err(|()| GatewayError::Transport(format!("base url {base} cannot take a path")))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    pub(crate) async fn get<T: DeserializeOwned>(
        &self,
        path: &[&str],
        kind: &'static str,
        name: &str,
    ) -> GatewayResult<T> {
        self.get_with_query(path, &[], kind, name).await
    }

    pub(crate) async fn get_with_query<T: DeserializeOwned>(
        &self,
        path: &[&str],
        query: &[(&str, &str)],
        kind: &'static str,
        name: &str,
    ) -> GatewayResult<T> {
        let url = self.url(path)?;
        debug!(url = %url, "GET");

        let response = self
            .client
            .get(url)
            .headers(self.headers.clone())
            .query(&self.query)
            .query(query)
            .send()
            .await?;

        decode(check(response, kind, name).await?).await
    }

    pub(crate) async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &[&str],
        body: &B,
        kind: &'static str,
    ) -> GatewayResult<T> {
        let url = self.url(path)?;
        debug!(url = %url, "POST");
        let name = url.path().to_string();

        let response = self
            .client
            .post(url)
            .headers(self.headers.clone())
            .query(&self.query)
            .json(body)
            .send()
            .await?;

        decode(check(response, kind, &name).await?).await
    }

    pub(crate) async fn delete(&self, path: &[&str], kind: &'static str, name: &str) -> GatewayResult<()> {
        let url = self.url(path)?;
        debug!(url = %url, "DELETE");

        let response = self
            .client
            .delete(url)
            .headers(self.headers.clone())
            .query(&self.query)
            .send()
            .await?;

        check(response, kind, name).await?;
        Ok(())
    }
}

async fn check(response: Response, kind: &'static str, name: &str) -> GatewayResult<Response> {
    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        return Err(GatewayError::not_found(kind, name));
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(GatewayError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response)
}

async fn decode<T: DeserializeOwned>(response: Response) -> GatewayResult<T> {
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| GatewayError::Decode(e.to_string()))
}
