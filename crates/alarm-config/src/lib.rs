//! Alarm dispatcher configuration
//!
//! TOML-based configuration with environment variable override support,
//! mirroring the teacher's `fc-config` crate.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    ValidationError(String),
}

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub bus: BusConfig,
    pub database: DatabaseConfig,
    pub kv: KvConfig,
    pub dedup: DedupConfig,
    pub rate_limit: RateLimitConfig,
    pub breaker: BreakerConfig,
    pub modem_pool: ModemPoolConfig,
    pub dlq: DlqConfig,
    pub worker: WorkerConfig,
    pub channels: ChannelsConfig,
    pub features: FeatureFlags,
    pub dev_mode: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bus: BusConfig::default(),
            database: DatabaseConfig::default(),
            kv: KvConfig::default(),
            dedup: DedupConfig::default(),
            rate_limit: RateLimitConfig::default(),
            breaker: BreakerConfig::default(),
            modem_pool: ModemPoolConfig::default(),
            dlq: DlqConfig::default(),
            worker: WorkerConfig::default(),
            channels: ChannelsConfig::default(),
            features: FeatureFlags::default(),
            dev_mode: false,
        }
    }
}

impl AppConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bus.url.is_empty() {
            return Err(ConfigError::ValidationError(
                "bus.url is required".to_string(),
            ));
        }
        Ok(())
    }
}

/// AMQP message bus (C7 consumer / C8 replay target).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub url: String,
    pub queue_name: String,
    pub dlq_queue_name: String,
    pub prefetch_count: u16,
    pub requeue_backoff_base_secs: u64,
    pub requeue_backoff_cap_secs: u64,
    pub max_delivery_attempts: u32,
    pub paused_requeue_delay_secs: u32,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            queue_name: "alarms".to_string(),
            dlq_queue_name: "alarms.malformed".to_string(),
            prefetch_count: 10,
            requeue_backoff_base_secs: 1,
            requeue_backoff_cap_secs: 30,
            max_delivery_attempts: 3,
            paused_requeue_delay_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub dsn: String,
    pub min_connections: u32,
    pub max_connections: u32,
    pub target_connections: u32,
    pub query_timeout_secs: u64,
    pub pool_recreate_cooldown_secs: u64,
    pub pool_recreate_failure_threshold: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            dsn: "postgres://localhost/alarms".to_string(),
            min_connections: 2,
            max_connections: 20,
            target_connections: 10,
            query_timeout_secs: 10,
            pool_recreate_cooldown_secs: 10,
            pool_recreate_failure_threshold: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KvConfig {
    pub url: String,
}

impl Default for KvConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    pub window_secs: i64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self { window_secs: 300 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub per_device_per_channel_secs: i64,
    pub global_per_minute: GlobalRateLimits,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            per_device_per_channel_secs: 60,
            global_per_minute: GlobalRateLimits::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalRateLimits {
    pub sms: u32,
    pub email: u32,
    pub voice: u32,
    pub push: u32,
}

impl Default for GlobalRateLimits {
    fn default() -> Self {
        Self {
            sms: 600,
            email: 1200,
            voice: 120,
            push: 3000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub cool_down_secs: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cool_down_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModemPoolConfig {
    pub health_probe_interval_secs: u64,
    pub health_probe_timeout_secs: u64,
    pub consecutive_failures_to_unhealthy: u32,
}

impl Default for ModemPoolConfig {
    fn default() -> Self {
        Self {
            health_probe_interval_secs: 30,
            health_probe_timeout_secs: 5,
            consecutive_failures_to_unhealthy: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DlqConfig {
    pub reprocess_interval_secs: u64,
    pub reprocess_batch_size: u32,
    pub max_attempts: i32,
}

impl Default for DlqConfig {
    fn default() -> Self {
        Self {
            reprocess_interval_secs: 300,
            reprocess_batch_size: 50,
            max_attempts: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub heartbeat_interval_secs: u64,
    pub heartbeat_ttl_multiplier: i64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 30,
            heartbeat_ttl_multiplier: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelsConfig {
    pub adapter_timeout_secs: u64,
    pub email: EmailConfig,
    pub sms: SmsConfig,
    pub voice: VoiceConfig,
    pub push: PushConfig,
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            adapter_timeout_secs: 30,
            email: EmailConfig::default(),
            sms: SmsConfig::default(),
            voice: VoiceConfig::default(),
            push: PushConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_username: String,
    pub smtp_password: String,
    pub smtp_use_tls: bool,
    pub from_address: String,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            smtp_host: "localhost".to_string(),
            smtp_port: 587,
            smtp_username: String::new(),
            smtp_password: String::new(),
            smtp_use_tls: true,
            from_address: "alerts@example.com".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmsConfig {
    pub adapter_timeout_secs: u64,
}

impl Default for SmsConfig {
    fn default() -> Self {
        Self {
            adapter_timeout_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    pub provider_url: String,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            provider_url: "https://voice.example.com/calls".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    pub provider_url: String,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            provider_url: "https://push.example.com/send".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureFlags {
    pub webhooks_enabled: bool,
    pub rate_limiting_enabled: bool,
    pub listen_notify_enabled: bool,
    pub push_enabled: bool,
    pub mock_sms: bool,
    pub mock_email: bool,
    pub override_quiet_hours_for_critical: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            webhooks_enabled: false,
            rate_limiting_enabled: true,
            listen_notify_enabled: false,
            push_enabled: true,
            mock_sms: false,
            mock_email: false,
            override_quiet_hours_for_critical: true,
        }
    }
}
