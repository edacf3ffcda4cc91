use crate::common::config::PushConfig;
use crate::common::error::ApiResult;
use crate::storage::TokenStore;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time;
use tracing::{error, info};

#[derive(Debug, Clone)]
pub struct SweepReport {
    pub deleted: u64,
    pub cutoff: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Recurring background timers. The sweep interval restarts from zero
/// when the process restarts; "last run" is not persisted.
pub struct ScheduledTasks {
    tokens: Arc<dyn TokenStore>,
    sweep_interval: Duration,
    retention: chrono::Duration,
    last_sweep: Arc<RwLock<Option<SweepReport>>>,
}

impl ScheduledTasks {
    pub fn new(tokens: Arc<dyn TokenStore>, push_config: &PushConfig) -> Self {
        Self {
            tokens,
            sweep_interval: Duration::from_secs(push_config.janitor_interval_secs),
            retention: chrono::Duration::days(push_config.janitor_retention_days),
            last_sweep: Arc::new(RwLock::new(None)),
        }
    }

    pub async fn start_all(&self) {
        self.start_token_janitor().await;
    }

    /// Deletes tokens left invalid beyond the retention window. A failed
    /// sweep is logged; the next tick retries the same condition.
    async fn start_token_janitor(&self) {
        let interval = self.sweep_interval;
        let retention = self.retention;
        let tokens = self.tokens.clone();
        let last_sweep = self.last_sweep.clone();

        tokio::spawn(async move {
            let mut interval_timer = time::interval(interval);
            interval_timer.set_missed_tick_behavior(time::MissedTickBehavior::Skip);

            loop {
                interval_timer.tick().await;
                match sweep_once(&*tokens, retention).await {
                    Ok(report) => {
                        *last_sweep.write().await = Some(report);
                    }
                    Err(e) => {
                        error!("Token sweep failed: {}", e);
                    }
                }
            }
        });
    }

    pub async fn trigger_sweep(&self) -> ApiResult<SweepReport> {
        let report = sweep_once(&*self.tokens, self.retention).await?;
        *self.last_sweep.write().await = Some(report.clone());
        Ok(report)
    }

    pub async fn last_sweep(&self) -> Option<SweepReport> {
        self.last_sweep.read().await.clone()
    }
}

async fn sweep_once(tokens: &dyn TokenStore, retention: chrono::Duration) -> ApiResult<SweepReport> {
    let cutoff = Utc::now() - retention;
    let deleted = tokens.delete_stale(cutoff).await?;

    info!("Cleaned up {} invalid push tokens", deleted);
    Ok(SweepReport {
        deleted,
        cutoff,
        finished_at: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryTokenStorage;

    fn push_config(interval_secs: u64) -> PushConfig {
        PushConfig {
            janitor_interval_secs: interval_secs,
            ..PushConfig::default()
        }
    }

    fn stale_invalid_token(token: &str, days_old: i64) -> crate::storage::PushTokenRecord {
        let mut record = MemoryTokenStorage::record(token, &["mosque-a"]);
        record.is_valid = false;
        record.updated_at = Utc::now() - chrono::Duration::days(days_old);
        record
    }

    #[tokio::test]
    async fn test_sweep_respects_retention_boundary() {
        let tokens = Arc::new(MemoryTokenStorage::new());
        tokens.insert(stale_invalid_token("ExponentPushToken[ancient]", 31));
        tokens.insert(stale_invalid_token("ExponentPushToken[recent]", 29));

        // Valid tokens are never swept, however old.
        let mut old_but_valid = MemoryTokenStorage::record("ExponentPushToken[valid]", &[]);
        old_but_valid.updated_at = Utc::now() - chrono::Duration::days(365);
        tokens.insert(old_but_valid);

        let tasks = ScheduledTasks::new(tokens.clone(), &push_config(86400));
        let report = tasks.trigger_sweep().await.unwrap();

        assert_eq!(report.deleted, 1);
        assert!(tokens.get("ExponentPushToken[ancient]").is_none());
        assert!(tokens.get("ExponentPushToken[recent]").is_some());
        assert!(tokens.get("ExponentPushToken[valid]").is_some());
    }

    #[tokio::test]
    async fn test_trigger_sweep_records_report() {
        let tokens = Arc::new(MemoryTokenStorage::new());
        let tasks = ScheduledTasks::new(tokens, &push_config(86400));

        assert!(tasks.last_sweep().await.is_none());
        tasks.trigger_sweep().await.unwrap();

        let report = tasks.last_sweep().await.unwrap();
        assert_eq!(report.deleted, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_janitor_runs_on_interval() {
        let tokens = Arc::new(MemoryTokenStorage::new());
        tokens.insert(stale_invalid_token("ExponentPushToken[ancient]", 31));

        let tasks = ScheduledTasks::new(tokens.clone(), &push_config(86400));
        tasks.start_all().await;

        // First tick fires immediately.
        time::sleep(Duration::from_secs(1)).await;
        assert!(tokens.get("ExponentPushToken[ancient]").is_none());
        assert_eq!(tasks.last_sweep().await.unwrap().deleted, 1);

        // A token going stale later is collected on a subsequent tick.
        tokens.insert(stale_invalid_token("ExponentPushToken[later]", 31));
        time::sleep(Duration::from_secs(86400)).await;
        assert!(tokens.get("ExponentPushToken[later]").is_none());
    }
}
