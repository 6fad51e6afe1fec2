//! SMS modem pool.
//!
//! Selects a modem for an outbound SMS, respecting per-modem concurrency,
//! remaining quota, and health. Background tasks keep health and package
//! (billing cycle) state current without blocking the selection path.

use alarm_common::{Modem, ModemHealth};
use alarm_db::ModemRepository;
use chrono::{Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, RwLock, Semaphore};

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

/// A modem selected for a send, holding a concurrency permit for the
/// duration of the caller's in-flight request. Dropping it releases the
/// slot.
pub struct SelectedModem {
    pub modem: Modem,
    _permit: OwnedSemaphorePermit,
}

pub struct ModemPool {
    repo: Arc<dyn ModemRepository>,
    cache: RwLock<Vec<Modem>>,
    semaphores: DashMap<i64, Arc<Semaphore>>,
    consecutive_health_failures: DashMap<i64, u32>,
    dedicated_imei_map: DashMap<String, i64>,
    config: ModemPoolConfig,
    health_client: reqwest::Client,
}

impl ModemPool {
    pub fn new(repo: Arc<dyn ModemRepository>, config: ModemPoolConfig) -> Arc<Self> {
        Arc::new(Self {
            repo,
            cache: RwLock::new(Vec::new()),
            semaphores: DashMap::new(),
            consecutive_health_failures: DashMap::new(),
            dedicated_imei_map: DashMap::new(),
            health_client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(config.health_probe_timeout_secs))
                .build()
                .unwrap_or_default(),
            config,
        })
    }

    /// Reloads the modem roster from the database. Call at startup and
    /// periodically so quota/health changes made elsewhere (or by another
    /// worker instance) become visible.
    pub async fn refresh(&self) -> alarm_db::Result<()> {
        let modems = self.repo.list_enabled().await?;
        for modem in &modems {
            self.semaphores
                .entry(modem.id)
                .or_insert_with(|| Arc::new(Semaphore::new(modem.max_concurrent_sms.max(1) as usize)));
        }
        *self.cache.write().await = modems;
        Ok(())
    }

    /// Routes a specific IMEI to a specific modem regardless of the normal
    /// priority ordering, as long as that modem remains selectable.
    pub fn set_dedicated(&self, imei: impl Into<String>, modem_id: i64) {
        self.dedicated_imei_map.insert(imei.into(), modem_id);
    }

    pub fn clear_dedicated(&self, imei: &str) {
        self.dedicated_imei_map.remove(imei);
    }

    /// Selects a modem for `imei` able to carry `service`, acquiring a
    /// concurrency permit. Returns `None` if no modem has capacity right
    /// now — the caller should treat that as `all_modems_exhausted`.
    pub async fn select(&self, imei: &str, service: &str) -> Option<SelectedModem> {
        let cache = self.cache.read().await;

        if let Some(dedicated_id) = self.dedicated_imei_map.get(imei).map(|v| *v) {
            if let Some(modem) = cache.iter().find(|m| m.id == dedicated_id) {
                if modem.is_selectable(service) {
                    if let Some(selected) = self.try_acquire(modem) {
                        return Some(selected);
                    }
                }
            }
        }

        let mut candidates: Vec<&Modem> = cache.iter().filter(|m| m.is_selectable(service)).collect();
        rank_candidates(&mut candidates);

        for modem in candidates {
            if let Some(selected) = self.try_acquire(modem) {
                return Some(selected);
            }
        }

        None
    }

    fn try_acquire(&self, modem: &Modem) -> Option<SelectedModem> {
        let semaphore = self.semaphores.get(&modem.id)?.clone();
        let permit = semaphore.try_acquire_owned().ok()?;
        Some(SelectedModem {
            modem: modem.clone(),
            _permit: permit,
        })
    }

    /// Call after a successful send through `modem_id`. Persists the
    /// increment and updates the in-memory cache so the next `select()` call
    /// sees the new count without waiting for a `refresh()`.
    pub async fn record_send_success(&self, modem_id: i64) {
        match self.repo.increment_usage(modem_id).await {
            Ok(new_count) => {
                let mut cache = self.cache.write().await;
                if let Some(m) = cache.iter_mut().find(|m| m.id == modem_id) {
                    m.sms_sent_count = new_count;
                }
            }
            Err(e) => tracing::error!(modem_id, error = %e, "failed to record modem usage"),
        }
    }

    /// Called by a health probe or a failed send. After
    /// `consecutive_failures_to_unhealthy` consecutive failures, the modem
    /// is marked unhealthy both in the cache and in the database.
    pub async fn report_health_failure(&self, modem_id: i64) {
        let failures = {
            let mut entry = self.consecutive_health_failures.entry(modem_id).or_insert(0);
            *entry += 1;
            *entry
        };

        if failures >= self.config.consecutive_failures_to_unhealthy {
            if let Err(e) = self.repo.set_health(modem_id, false, Utc::now()).await {
                tracing::error!(modem_id, error = %e, "failed to persist modem health transition");
            }
            let mut cache = self.cache.write().await;
            if let Some(m) = cache.iter_mut().find(|m| m.id == modem_id) {
                m.health_status = ModemHealth::Unhealthy;
            }
        }
    }

    pub async fn report_health_success(&self, modem_id: i64) {
        let was_unhealthy = {
            let mut cache = self.cache.write().await;
            match cache.iter_mut().find(|m| m.id == modem_id) {
                Some(m) => {
                    let was = m.health_status == ModemHealth::Unhealthy;
                    m.health_status = ModemHealth::Healthy;
                    was
                }
                None => false,
            }
        };
        self.consecutive_health_failures.insert(modem_id, 0);

        if was_unhealthy {
            if let Err(e) = self.repo.set_health(modem_id, true, Utc::now()).await {
                tracing::error!(modem_id, error = %e, "failed to persist modem health transition");
            }
        }
    }

    /// Resets a modem's billing package outside the normal rollover
    /// schedule, for the admin surface.
    pub async fn admin_reset_package(&self, modem_id: i64, new_start: chrono::DateTime<Utc>, new_end: chrono::DateTime<Utc>) -> alarm_db::Result<()> {
        self.repo.reset_package(modem_id, new_start, new_end).await?;
        let mut cache = self.cache.write().await;
        if let Some(m) = cache.iter_mut().find(|m| m.id == modem_id) {
            m.sms_sent_count = 0;
            m.package_start = new_start;
            m.package_end = new_end;
        }
        Ok(())
    }

    /// Spawns the background health-probe loop. Each tick, every enabled
    /// modem is pinged; one success clears the failure streak, a single
    /// failure only trips to unhealthy once the threshold is crossed.
    pub fn spawn_health_probes(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(self.config.health_probe_interval_secs));
            loop {
                ticker.tick().await;
                let modems = self.cache.read().await.clone();
                for modem in modems {
                    let url = format!("https://{}/health", modem.host);
                    match self.health_client.get(&url).send().await {
                        Ok(resp) if resp.status().is_success() => self.report_health_success(modem.id).await,
                        _ => self.report_health_failure(modem.id).await,
                    }
                }
            }
        })
    }

    /// Spawns the background package-rollover loop: once a modem's billing
    /// package has ended, its usage counter resets for the next cycle.
    pub fn spawn_package_rollover(self: Arc<Self>, cycle_len: ChronoDuration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(3600));
            loop {
                ticker.tick().await;
                let now = Utc::now();
                let modems = self.cache.read().await.clone();
                for modem in modems {
                    if now > modem.package_end {
                        let new_start = now;
                        let new_end = now + cycle_len;
                        if let Err(e) = self.repo.reset_package(modem.id, new_start, new_end).await {
                            tracing::error!(modem_id = modem.id, error = %e, "failed to roll over modem package");
                            continue;
                        }
                        let mut cache = self.cache.write().await;
                        if let Some(m) = cache.iter_mut().find(|m| m.id == modem.id) {
                            m.sms_sent_count = 0;
                            m.package_start = new_start;
                            m.package_end = new_end;
                        }
                    }
                }
            }
        })
    }
}

/// Orders candidates by priority descending, remaining quota descending,
/// sms_sent_count ascending (spec §4.7). Extracted so the ordering itself is
/// testable without a database.
fn rank_candidates(candidates: &mut [&Modem]) {
    candidates.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| b.remaining_quota().cmp(&a.remaining_quota()))
            .then_with(|| a.sms_sent_count.cmp(&b.sms_sent_count))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn modem(id: i64, priority: i32, sms_limit: i32, sms_sent_count: i32) -> Modem {
        Modem {
            id,
            name: format!("modem-{id}"),
            host: "127.0.0.1".to_string(),
            credentials: String::new(),
            cert_fingerprint: None,
            modem_id: id.to_string(),
            enabled: true,
            priority,
            max_concurrent_sms: 1,
            sms_sent_count,
            sms_limit,
            package_cost: 0.0,
            package_currency: "USD".to_string(),
            package_start: Utc::now(),
            package_end: Utc::now() + ChronoDuration::days(30),
            allowed_services: vec!["sms".to_string()],
            health_status: ModemHealth::Healthy,
            last_health_check: None,
        }
    }

    #[test]
    fn test_rank_prefers_higher_priority() {
        let low = modem(1, 1, 100, 0);
        let high = modem(2, 5, 100, 0);
        let mut candidates = vec![&low, &high];
        rank_candidates(&mut candidates);
        assert_eq!(candidates[0].id, 2);
    }

    #[test]
    fn test_rank_breaks_priority_tie_on_remaining_quota() {
        let fuller = modem(1, 3, 100, 90);
        let emptier = modem(2, 3, 100, 10);
        let mut candidates = vec![&fuller, &emptier];
        rank_candidates(&mut candidates);
        assert_eq!(candidates[0].id, 2);
    }

    #[test]
    fn test_rank_breaks_remaining_quota_tie_on_sent_count() {
        let busier = modem(1, 3, 100, 50);
        let idler = modem(2, 3, 150, 0);
        let mut candidates = vec![&busier, &idler];
        rank_candidates(&mut candidates);
        assert_eq!(candidates[0].id, 2);
    }

    #[test]
    fn test_is_selectable_respects_service_and_quota() {
        let mut m = modem(1, 1, 10, 10);
        assert!(!m.is_selectable("sms"));
        m.sms_sent_count = 5;
        assert!(m.is_selectable("sms"));
        assert!(!m.is_selectable("voice"));
    }
}
