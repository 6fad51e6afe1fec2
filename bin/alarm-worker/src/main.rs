//! Alarm notification dispatcher worker process.
//!
//! Startup order: load config, init logging, connect the database and
//! Redis, build the channel adapters and circuit breakers, start the modem
//! pool's background tasks, start the system-state poller and worker
//! heartbeat, then start consuming from the bus. Shutdown reverses that:
//! stop the consumer first, let in-flight work drain, then stop the
//! background tasks and close the pools.

use alarm_channels::breaker::CircuitBreakerSet;
use alarm_channels::ratelimit::{GlobalRateLimits, RateLimiterSet};
use alarm_channels::{email::EmailAdapter, push::PushAdapter, sms::SmsAdapter, voice::VoiceAdapter, ChannelAdapter};
use alarm_common::Channel;
use alarm_config::ConfigLoader;
use alarm_core::adapters::MockableAdapter;
use alarm_core::admin::Admin;
use alarm_core::consumer::{ConsumerLoop, ConsumerLoopConfig};
use alarm_core::dedup::Gate;
use alarm_core::dlq::{DbDlqWriter, Reprocessor, ReprocessorConfig};
use alarm_core::processor::Processor;
use alarm_core::state::StateManager;
use alarm_core::workers::WorkerRegistry;
use alarm_db::postgres::PostgresStore;
use alarm_db::pool::PoolConfig;
use alarm_modempool::{ModemPool, ModemPoolConfig};
use alarm_queue::amqp::{AmqpConfig, AmqpConsumer};
use alarm_queue::AlarmConsumer;
use std::collections::HashMap;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    alarm_common::logging::init_default_logging();

    let config = match ConfigLoader::new().load() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "failed to load configuration");
            return ExitCode::from(1);
        }
    };

    if config.bus.url.is_empty() {
        tracing::error!("ALARM_BUS_URL is required, refusing to start");
        return ExitCode::from(1);
    }

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "fatal startup error");
            ExitCode::from(1)
        }
    }
}

async fn run(config: alarm_config::AppConfig) -> Result<(), String> {
    let pool_config = PoolConfig {
        dsn: config.database.dsn.clone(),
        min_connections: config.database.min_connections,
        max_connections: config.database.max_connections,
        query_timeout_secs: config.database.query_timeout_secs,
        recreate_cooldown_secs: config.database.pool_recreate_cooldown_secs,
        recreate_failure_threshold: config.database.pool_recreate_failure_threshold,
    };
    let persistence = alarm_db::PersistencePool::connect(pool_config).await.map_err(|e| e.to_string())?;
    let store: Arc<PostgresStore> = Arc::new(PostgresStore::new(persistence.clone()));

    let redis_client = redis::Client::open(config.kv.url.clone()).map_err(|e| e.to_string())?;
    let redis_conn = redis::aio::ConnectionManager::new(redis_client).await.ok();
    if redis_conn.is_none() {
        tracing::warn!("could not connect to Redis at startup, per-device rate limiting will fail open");
    }

    let breakers = Arc::new(CircuitBreakerSet::new(config.breaker.failure_threshold, config.breaker.cool_down_secs));

    let rate_limiter = Arc::new(RateLimiterSet::new(
        GlobalRateLimits {
            sms: config.rate_limit.global_per_minute.sms,
            email: config.rate_limit.global_per_minute.email,
            voice: config.rate_limit.global_per_minute.voice,
            push: config.rate_limit.global_per_minute.push,
        },
        redis_conn,
        config.rate_limit.per_device_per_channel_secs,
        config.features.rate_limiting_enabled,
    ));

    let state = StateManager::new(store.clone(), Duration::from_secs(10)).await.map_err(|e| e.to_string())?;
    state.clone().spawn_poll_loop();

    let modem_pool = ModemPool::new(
        store.clone(),
        ModemPoolConfig {
            health_probe_interval_secs: config.modem_pool.health_probe_interval_secs,
            health_probe_timeout_secs: config.modem_pool.health_probe_timeout_secs,
            consecutive_failures_to_unhealthy: config.modem_pool.consecutive_failures_to_unhealthy,
        },
    );
    modem_pool.refresh().await.map_err(|e| e.to_string())?;
    modem_pool.clone().spawn_health_probes();
    modem_pool.clone().spawn_package_rollover(chrono::Duration::days(30));

    let gate = Arc::new(Gate::new(
        store.clone(),
        store.clone(),
        rate_limiter.clone(),
        config.dedup.window_secs,
        config.features.override_quiet_hours_for_critical,
    ));

    let mut adapters: HashMap<Channel, Arc<dyn ChannelAdapter>> = HashMap::new();

    let email_live: Arc<dyn ChannelAdapter> = Arc::new(
        EmailAdapter::new(&alarm_channels::email::EmailConfig {
            smtp_host: config.channels.email.smtp_host.clone(),
            smtp_port: config.channels.email.smtp_port,
            smtp_username: config.channels.email.smtp_username.clone(),
            smtp_password: config.channels.email.smtp_password.clone(),
            smtp_use_tls: config.channels.email.smtp_use_tls,
            from_address: config.channels.email.from_address.clone(),
        })
        .map_err(|e| e)?,
    );
    adapters.insert(Channel::Email, Arc::new(MockableAdapter::new(Channel::Email, email_live, state.clone())));

    let sms_live: Arc<dyn ChannelAdapter> = Arc::new(SmsAdapter::new(
        modem_pool.clone(),
        &alarm_channels::sms::SmsConfig { adapter_timeout_secs: config.channels.sms.adapter_timeout_secs },
    ));
    adapters.insert(Channel::Sms, Arc::new(MockableAdapter::new(Channel::Sms, sms_live, state.clone())));

    let voice_live: Arc<dyn ChannelAdapter> = Arc::new(VoiceAdapter::new(&alarm_channels::voice::VoiceConfig {
        provider_url: config.channels.voice.provider_url.clone(),
        adapter_timeout_secs: config.channels.adapter_timeout_secs,
    }));
    adapters.insert(Channel::Voice, Arc::new(MockableAdapter::new(Channel::Voice, voice_live, state.clone())));

    if config.features.push_enabled {
        let push_live: Arc<dyn ChannelAdapter> = Arc::new(PushAdapter::new(&alarm_channels::push::PushConfig {
            provider_url: config.channels.push.provider_url.clone(),
            adapter_timeout_secs: config.channels.adapter_timeout_secs,
        }));
        adapters.insert(Channel::Push, Arc::new(MockableAdapter::new(Channel::Push, push_live, state.clone())));
    }

    let dlq_writer = Arc::new(DbDlqWriter::new(store.clone()));

    let processor = Arc::new(Processor::new(
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        gate,
        breakers.clone(),
        adapters,
        dlq_writer,
    ));

    let workers = Arc::new(WorkerRegistry::new(
        store.clone(),
        Duration::from_secs(config.worker.heartbeat_interval_secs),
        config.worker.heartbeat_ttl_multiplier,
    ));
    workers.clone().spawn();

    let reprocessor = Arc::new(Reprocessor::new(
        store.clone(),
        processor.clone(),
        breakers.clone(),
        state.clone(),
        workers.worker_id().to_string(),
        ReprocessorConfig {
            interval: Duration::from_secs(config.dlq.reprocess_interval_secs),
            batch_size: config.dlq.reprocess_batch_size as i64,
            max_attempts: config.dlq.max_attempts,
        },
    ));
    reprocessor.clone().spawn();

    let _admin = Admin::new(breakers.clone(), state.clone(), reprocessor.clone(), store.clone(), modem_pool.clone(), store.clone());

    let amqp_config = AmqpConfig {
        uri: config.bus.url.clone(),
        queue_name: config.bus.queue_name.clone(),
        prefetch_count: config.bus.prefetch_count,
        ..AmqpConfig::default()
    };
    let consumer: Arc<dyn AlarmConsumer> = Arc::new(AmqpConsumer::new(amqp_config));

    let consumer_loop = Arc::new(ConsumerLoop::new(
        consumer.clone(),
        processor.clone(),
        state.clone(),
        ConsumerLoopConfig {
            max_delivery_attempts: config.bus.max_delivery_attempts,
            paused_requeue_delay_secs: config.bus.paused_requeue_delay_secs,
        },
    ));

    tracing::info!(
        queue = %config.bus.queue_name,
        dev_mode = config.dev_mode,
        "alarm dispatcher worker starting"
    );

    let loop_handle = tokio::spawn(consumer_loop.clone().run());

    shutdown_signal().await;
    tracing::info!("shutdown signal received, draining in-flight work");
    consumer_loop.stop();

    if tokio::time::timeout(Duration::from_secs(30), loop_handle).await.is_err() {
        tracing::warn!("consumer loop did not drain within grace period");
    }
    if let Err(e) = consumer.stop().await {
        tracing::error!(error = %e, "error stopping bus consumer");
    }

    tracing::info!("alarm dispatcher worker stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
