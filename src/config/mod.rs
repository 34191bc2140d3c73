use serde::Deserialize;
use config::{Config, ConfigError, Environment, File};
use std::time::Duration;

use crate::payments::poller::{CheckErrorPolicy, PollPolicy};

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub momo: MomoConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub reconciler: ReconcilerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub base_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub session_secret: String,
    pub session_duration_hours: i64,
}

/// Mobile-money collection API credentials. With `enabled = false` the
/// server settles payments through the in-process sandbox gateway.
#[derive(Debug, Deserialize, Clone)]
pub struct MomoConfig {
    #[serde(default)]
    pub enabled: bool,
    pub base_url: String,
    pub subscription_key: Option<String>,
    pub api_user: Option<String>,
    pub api_key: Option<String>,
    pub target_environment: String,
    pub currency: String,
    pub country_code: String,
    pub callback_url: Option<String>,
    pub callback_secret: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for MomoConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: "https://sandbox.momodeveloper.mtn.com".to_string(),
            subscription_key: None,
            api_user: None,
            api_key: None,
            target_environment: "sandbox".to_string(),
            currency: "RWF".to_string(),
            country_code: "250".to_string(),
            callback_url: None,
            callback_secret: None,
            timeout_secs: 30,
            max_retries: 3,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PollPolicyConfig {
    pub interval_secs: u64,
    pub max_attempts: Option<u32>,
    pub on_check_error: CheckErrorPolicy,
}

impl PollPolicyConfig {
    pub fn to_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_secs(self.interval_secs),
            max_attempts: self.max_attempts,
            on_check_error: self.on_check_error,
        }
    }
}

impl From<PollPolicy> for PollPolicyConfig {
    fn from(policy: PollPolicy) -> Self {
        Self {
            interval_secs: policy.interval.as_secs(),
            max_attempts: policy.max_attempts,
            on_check_error: policy.on_check_error,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PollingConfig {
    pub single: PollPolicyConfig,
    pub bulk: PollPolicyConfig,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            single: PollPolicy::single_fee().into(),
            bulk: PollPolicy::bulk().into(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReconcilerConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    pub max_pending_age_secs: i64,
    pub batch_size: i64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 60,
            max_pending_age_secs: 900,
            batch_size: 100,
        }
    }
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let config = Config::builder()
            // Start with default values
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("server.base_url", "http://localhost:8080")?
            .set_default("database.url", "sqlite://cooperative.db?mode=rwc")?
            .set_default("database.max_connections", 10)?
            .set_default("auth.session_secret", "change-me-in-production")?
            .set_default("auth.session_duration_hours", 24)?
            .set_default("momo.enabled", false)?
            .set_default("momo.base_url", "https://sandbox.momodeveloper.mtn.com")?
            .set_default("momo.target_environment", "sandbox")?
            .set_default("momo.currency", "RWF")?
            .set_default("momo.country_code", "250")?
            .set_default("momo.timeout_secs", 30)?
            .set_default("momo.max_retries", 3)?

            // Add config file if it exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))

            // Add environment variables (with COOPERATIVE__ prefix, double underscore separates levels)
            .add_source(Environment::with_prefix("COOPERATIVE").separator("__"))

            .build()?;

        config.try_deserialize()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
                base_url: "http://localhost:8080".to_string(),
            },
            database: DatabaseConfig {
                url: "sqlite://cooperative.db?mode=rwc".to_string(),
                max_connections: 10,
            },
            auth: AuthConfig {
                session_secret: "change-me-in-production".to_string(),
                session_duration_hours: 24,
            },
            momo: MomoConfig::default(),
            polling: PollingConfig::default(),
            reconciler: ReconcilerConfig::default(),
        }
    }
}
