use crate::{AppConfig, ConfigError};
use std::env;
use std::path::{Path, PathBuf};

/// Standard search paths checked in order when no explicit path is given.
const CONFIG_PATHS: &[&str] = &[
    "alarm-dispatcher.toml",
    "config/alarm-dispatcher.toml",
    "/etc/alarm-dispatcher/config.toml",
];

/// Loads [`AppConfig`] from a TOML file, applying `ALARM_*` environment
/// variable overrides on top. Mirrors the teacher's loader: explicit path,
/// then `ALARM_CONFIG` env var, then the standard search paths, then
/// built-in defaults if nothing is found.
pub struct ConfigLoader {
    explicit_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { explicit_path: None }
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            explicit_path: Some(path.into()),
        }
    }

    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let mut config = match self.find_config_file() {
            Some(path) => {
                tracing::info!(path = %path.display(), "loading configuration file");
                AppConfig::from_file(&path)?
            }
            None => {
                tracing::warn!("no configuration file found, starting from defaults");
                AppConfig::default()
            }
        };

        self.apply_env_overrides(&mut config);
        config.validate()?;
        Ok(config)
    }

    fn find_config_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.explicit_path {
            if path.exists() {
                return Some(path.clone());
            }
            tracing::warn!(path = %path.display(), "explicit config path does not exist");
        }

        if let Ok(path) = env::var("ALARM_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
            tracing::warn!(path = %path.display(), "ALARM_CONFIG path does not exist");
        }

        for candidate in CONFIG_PATHS {
            let path = Path::new(candidate);
            if path.exists() {
                return Some(path.to_path_buf());
            }
        }

        None
    }

    fn apply_env_overrides(&self, config: &mut AppConfig) {
        if let Ok(val) = env::var("ALARM_BUS_URL") {
            config.bus.url = val;
        }
        if let Ok(val) = env::var("ALARM_BUS_QUEUE_NAME") {
            config.bus.queue_name = val;
        }
        if let Ok(val) = env::var("ALARM_BUS_PREFETCH_COUNT") {
            if let Ok(v) = val.parse() {
                config.bus.prefetch_count = v;
            }
        }
        if let Ok(val) = env::var("ALARM_BUS_MAX_DELIVERY_ATTEMPTS") {
            if let Ok(v) = val.parse() {
                config.bus.max_delivery_attempts = v;
            }
        }

        if let Ok(val) = env::var("ALARM_DATABASE_DSN") {
            config.database.dsn = val;
        }
        if let Ok(val) = env::var("ALARM_DATABASE_MAX_CONNECTIONS") {
            if let Ok(v) = val.parse() {
                config.database.max_connections = v;
            }
        }

        if let Ok(val) = env::var("ALARM_KV_URL") {
            config.kv.url = val;
        }

        if let Ok(val) = env::var("ALARM_DEDUP_WINDOW_SECS") {
            if let Ok(v) = val.parse() {
                config.dedup.window_secs = v;
            }
        }

        if let Ok(val) = env::var("ALARM_RATE_LIMIT_ENABLED") {
            if let Ok(v) = val.parse() {
                config.rate_limit.enabled = v;
            }
        }
        if let Ok(val) = env::var("ALARM_RATE_LIMIT_PER_DEVICE_PER_CHANNEL_SECS") {
            if let Ok(v) = val.parse() {
                config.rate_limit.per_device_per_channel_secs = v;
            }
        }

        if let Ok(val) = env::var("ALARM_BREAKER_FAILURE_THRESHOLD") {
            if let Ok(v) = val.parse() {
                config.breaker.failure_threshold = v;
            }
        }
        if let Ok(val) = env::var("ALARM_BREAKER_COOL_DOWN_SECS") {
            if let Ok(v) = val.parse() {
                config.breaker.cool_down_secs = v;
            }
        }

        if let Ok(val) = env::var("ALARM_DLQ_REPROCESS_INTERVAL_SECS") {
            if let Ok(v) = val.parse() {
                config.dlq.reprocess_interval_secs = v;
            }
        }
        if let Ok(val) = env::var("ALARM_DLQ_MAX_ATTEMPTS") {
            if let Ok(v) = val.parse() {
                config.dlq.max_attempts = v;
            }
        }

        if let Ok(val) = env::var("ALARM_WORKER_HEARTBEAT_INTERVAL_SECS") {
            if let Ok(v) = val.parse() {
                config.worker.heartbeat_interval_secs = v;
            }
        }

        if let Ok(val) = env::var("ALARM_EMAIL_SMTP_HOST") {
            config.channels.email.smtp_host = val;
        }
        if let Ok(val) = env::var("ALARM_EMAIL_SMTP_PORT") {
            if let Ok(v) = val.parse() {
                config.channels.email.smtp_port = v;
            }
        }
        if let Ok(val) = env::var("ALARM_EMAIL_SMTP_USERNAME") {
            config.channels.email.smtp_username = val;
        }
        if let Ok(val) = env::var("ALARM_EMAIL_SMTP_PASSWORD") {
            config.channels.email.smtp_password = val;
        }
        if let Ok(val) = env::var("ALARM_EMAIL_FROM_ADDRESS") {
            config.channels.email.from_address = val;
        }

        if let Ok(val) = env::var("ALARM_VOICE_PROVIDER_URL") {
            config.channels.voice.provider_url = val;
        }
        if let Ok(val) = env::var("ALARM_PUSH_PROVIDER_URL") {
            config.channels.push.provider_url = val;
        }

        if let Ok(val) = env::var("ALARM_FEATURE_WEBHOOKS_ENABLED") {
            if let Ok(v) = val.parse() {
                config.features.webhooks_enabled = v;
            }
        }
        if let Ok(val) = env::var("ALARM_FEATURE_RATE_LIMITING_ENABLED") {
            if let Ok(v) = val.parse() {
                config.features.rate_limiting_enabled = v;
            }
        }
        if let Ok(val) = env::var("ALARM_FEATURE_LISTEN_NOTIFY_ENABLED") {
            if let Ok(v) = val.parse() {
                config.features.listen_notify_enabled = v;
            }
        }
        if let Ok(val) = env::var("ALARM_FEATURE_PUSH_ENABLED") {
            if let Ok(v) = val.parse() {
                config.features.push_enabled = v;
            }
        }
        if let Ok(val) = env::var("ALARM_MOCK_SMS") {
            if let Ok(v) = val.parse() {
                config.features.mock_sms = v;
            }
        }
        if let Ok(val) = env::var("ALARM_MOCK_EMAIL") {
            if let Ok(v) = val.parse() {
                config.features.mock_email = v;
            }
        }

        if let Ok(val) = env::var("ALARM_DEV_MODE") {
            if let Ok(v) = val.parse() {
                config.dev_mode = v;
            }
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_fails_validation_without_bus_url() {
        let config = AppConfig::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_find_config_file_returns_none_when_nothing_exists() {
        let loader = ConfigLoader::with_path("/nonexistent/path/alarm.toml");
        assert!(loader.find_config_file().is_none());
    }

    #[test]
    fn test_env_override_applies_bus_url() {
        env::set_var("ALARM_BUS_URL", "amqp://test-host/%2f");
        let loader = ConfigLoader::new();
        let mut config = AppConfig::default();
        loader.apply_env_overrides(&mut config);
        assert_eq!(config.bus.url, "amqp://test-host/%2f");
        env::remove_var("ALARM_BUS_URL");
    }
}
