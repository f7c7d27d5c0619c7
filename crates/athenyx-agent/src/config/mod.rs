//! Configuration loading for Athenyx.
//! Reads athenyx.toml from the current directory or the path in ATHENYX_CONFIG.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use athenyx_analysis::OrchestratorConfig;
use athenyx_gateway::{GatewayConfig, RetryPolicy};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub gateway: GatewaySettings,
    #[serde(default)]
    pub orchestrator: OrchestratorSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

fn default_base_url() -> String { "http://localhost:8000".to_string() }

impl Default for ServerConfig {
    fn default() -> Self {
        Self { base_url: default_base_url() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewaySettings {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_extended_timeout_secs")]
    pub extended_timeout_secs: u64,
    #[serde(default = "default_retry_budget")]
    pub retry_budget: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_timeout_secs()          -> u64 { 15 }
fn default_extended_timeout_secs() -> u64 { 180 }
fn default_retry_budget()          -> u32 { 1 }
fn default_retry_backoff_ms()      -> u64 { 1000 }

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            extended_timeout_secs: default_extended_timeout_secs(),
            retry_budget: default_retry_budget(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorSettings {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_stall_threshold_secs")]
    pub stall_threshold_secs: u64,
    #[serde(default = "default_stall_confirm_secs")]
    pub stall_confirm_threshold_secs: u64,
    #[serde(default = "default_band_low")]
    pub ambiguous_band_low: u8,
    #[serde(default = "default_band_high")]
    pub ambiguous_band_high: u8,
    #[serde(default = "default_poll_failure_warning")]
    pub poll_failure_warning: u32,
    #[serde(default = "bool_true")]
    pub resubmit_on_lost_job: bool,
}

fn default_poll_interval_secs()    -> u64 { 2 }
fn default_stall_threshold_secs()  -> u64 { 60 }
fn default_stall_confirm_secs()    -> u64 { 120 }
fn default_band_low()              -> u8  { 50 }
fn default_band_high()             -> u8  { 99 }
fn default_poll_failure_warning()  -> u32 { 10 }
fn bool_true()                     -> bool { true }

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            stall_threshold_secs: default_stall_threshold_secs(),
            stall_confirm_threshold_secs: default_stall_confirm_secs(),
            ambiguous_band_low: default_band_low(),
            ambiguous_band_high: default_band_high(),
            poll_failure_warning: default_poll_failure_warning(),
            resubmit_on_lost_job: bool_true(),
        }
    }
}


impl Config {
    /// Load configuration from athenyx.toml.
    /// Checks ATHENYX_CONFIG env var first, then the current directory.
    /// A missing file yields the defaults; the backend URL can still be
    /// overridden with ATHENYX_SERVER_URL.
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("ATHENYX_CONFIG")
            .unwrap_or_else(|_| "athenyx.toml".to_string());

        let mut config = if Path::new(&path).exists() {
            let content = std::fs::read_to_string(&path)?;
            toml::from_str(&content)?
        } else {
            tracing::warn!(
                "Config file not found: {path}. Using defaults \
                 (copy athenyx.example.toml to athenyx.toml to change them)."
            );
            Config::default()
        };

        if let Ok(url) = std::env::var("ATHENYX_SERVER_URL") {
            config.server.base_url = url;
        }
        Ok(config)
    }

    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            base_url: self.server.base_url.clone(),
            timeout: Duration::from_secs(self.gateway.timeout_secs),
            extended_timeout: Duration::from_secs(self.gateway.extended_timeout_secs),
            retry: RetryPolicy {
                budget: self.gateway.retry_budget,
                backoff: Duration::from_millis(self.gateway.retry_backoff_ms),
            },
        }
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        let o = &self.orchestrator;
        OrchestratorConfig {
            poll_interval: Duration::from_secs(o.poll_interval_secs),
            stall_threshold: Duration::from_secs(o.stall_threshold_secs),
            stall_confirm_threshold: Duration::from_secs(o.stall_confirm_threshold_secs),
            ambiguous_band: (o.ambiguous_band_low, o.ambiguous_band_high.max(o.ambiguous_band_low)),
            poll_failure_warning: o.poll_failure_warning,
            resubmit_on_lost_job: o.resubmit_on_lost_job,
        }
    }
}
