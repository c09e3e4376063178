use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use pac_reconcile::{DEFAULT_EXPIRY_INTERVAL, DEFAULT_RESYNC_INTERVAL, DEFAULT_RETRY_DELAY};

use crate::gateway::http::GatewayConfig;
use crate::reconciler::ReconcilerConfig;

const DEFAULT_COMPUTE_URL: &str = "https://us-south.power-iaas.cloud.ibm.com";
const DEFAULT_LB_URL: &str = "https://us-south.iaas.cloud.ibm.com";
const DEFAULT_ACCOUNT_URL: &str = "https://resource-controller.cloud.ibm.com";

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub state_path: PathBuf,
    pub health_addr: SocketAddr,
    pub gateway: GatewayConfig,
    pub resync_interval: Duration,
    pub retry_delay: Duration,
    pub expiry_interval: Duration,

    /// Run against the in-memory fake cloud instead of the real APIs.
    pub fake_cloud: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let log_level = var("PAC_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        let state_path = var("PAC_STATE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/var/lib/pac/state.db"));

        let health_addr = var("PAC_HEALTH_ADDR")
            .unwrap_or_else(|| "127.0.0.1:8081".to_string())
            .parse()
            .context("invalid PAC_HEALTH_ADDR")?;

        let fake_cloud = var("PAC_FAKE_CLOUD")
            .map(|v| v == "1" || v.to_lowercase() == "true")
            .unwrap_or(false);

        let load_balancer_id = match var("PAC_LOAD_BALANCER_ID") {
            Some(id) if !id.is_empty() => id,
            _ if fake_cloud => "lb-fake".to_string(),
            _ => bail!("PAC_LOAD_BALANCER_ID must be set"),
        };

        let gateway = GatewayConfig {
            compute_url: var("PAC_COMPUTE_URL").unwrap_or_else(|| DEFAULT_COMPUTE_URL.to_string()),
            load_balancer_url: var("PAC_LB_URL").unwrap_or_else(|| DEFAULT_LB_URL.to_string()),
            account_url: var("PAC_ACCOUNT_URL").unwrap_or_else(|| DEFAULT_ACCOUNT_URL.to_string()),
            api_token: var("PAC_API_TOKEN").filter(|t| !t.is_empty()),
            load_balancer_id,
            request_timeout: secs(&var, "PAC_REQUEST_TIMEOUT_SECS", Duration::from_secs(30))?,
        };

        Ok(Self {
            log_level,
            state_path,
            health_addr,
            gateway,
            resync_interval: secs(&var, "PAC_RESYNC_INTERVAL_SECS", DEFAULT_RESYNC_INTERVAL)?,
            retry_delay: secs(&var, "PAC_RETRY_DELAY_SECS", DEFAULT_RETRY_DELAY)?,
            expiry_interval: secs(&var, "PAC_EXPIRY_INTERVAL_SECS", DEFAULT_EXPIRY_INTERVAL)?,
            fake_cloud,
        })
    }

    pub fn reconciler(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            retry_delay: self.retry_delay,
            resync_interval: self.resync_interval,
        }
    }
}

fn secs(var: &impl Fn(&str) -> Option<String>, key: &str, default: Duration) -> Result<Duration> {
    match var(key) {
        Some(raw) => {
            let secs: u64 = raw
                .parse()
                .with_context(|| format!("invalid {key}: {raw}"))?;
            if secs == 0 {
                bail!("{key} must be greater than zero");
            }
            Ok(Duration::from_secs(secs))
        }
        None => Ok(default),
    }
}
