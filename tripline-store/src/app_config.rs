use serde::Deserialize;
use std::env;
use std::time::Duration;
use tripline_core::payment::PAYOS_PROVIDER;
use tripline_order::{LinkSettings, RefundPolicyConfig};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub refund_policy: RefundPolicyConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_seconds: u64,
}

fn default_max_connections() -> u32 { 5 }
fn default_acquire_timeout() -> u64 { 3 }

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
}

/// Hosted-checkout gateway credentials and link settings.
#[derive(Debug, Deserialize, Clone)]
pub struct GatewayConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    pub base_url: String,
    pub client_id: String,
    pub api_key: String,
    pub checksum_key: String,
    pub return_url: String,
    pub cancel_url: String,
    #[serde(default = "default_link_ttl")]
    pub link_ttl_seconds: i64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_provider() -> String { PAYOS_PROVIDER.to_string() }
fn default_link_ttl() -> i64 { 900 }
fn default_connect_timeout() -> u64 { 5 }
fn default_request_timeout() -> u64 { 15 }
fn default_max_retries() -> u32 { 2 }

impl GatewayConfig {
    pub fn link_settings(&self) -> LinkSettings {
        LinkSettings {
            provider: self.provider.clone(),
            return_url: self.return_url.clone(),
            cancel_url: self.cancel_url.clone(),
            ttl: chrono::Duration::seconds(self.link_ttl_seconds),
            checksum_key: self.checksum_key.clone(),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // optional per-environment overrides
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // never checked in
            .add_source(config::File::with_name("config/local").required(false))
            // e.g. `TRIPLINE__GATEWAY__API_KEY=...`
            .add_source(config::Environment::with_prefix("TRIPLINE").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
