//! In-memory store implementations for tests. Semantics mirror the
//! Postgres storages, including the failure-counter behavior of
//! `mark_invalid` and the merge-union of `register`.

use crate::common::error::ApiResult;
use crate::storage::mosque::MosqueDirectory;
use crate::storage::push_token::{
    token_preview, PushTokenRecord, RegisterTokenParams, SubscriberStats, TokenStore,
};
use crate::storage::user::UserDirectory;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Mutex;
use tracing::info;

#[derive(Debug, Default)]
pub struct MemoryTokenStorage {
    records: Mutex<HashMap<String, PushTokenRecord>>,
}

impl MemoryTokenStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: PushTokenRecord) {
        self.records
            .lock()
            .unwrap()
            .insert(record.token.clone(), record);
    }

    pub fn get(&self, token: &str) -> Option<PushTokenRecord> {
        self.records.lock().unwrap().get(token).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rewrites a record's `updated_at`, for retention-window tests.
    pub fn backdate(&self, token: &str, updated_at: DateTime<Utc>) {
        if let Some(record) = self.records.lock().unwrap().get_mut(token) {
            record.updated_at = updated_at;
        }
    }

    pub fn record(token: &str, subscriptions: &[&str]) -> PushTokenRecord {
        let now = Utc::now();
        PushTokenRecord {
            token: token.to_string(),
            owner_id: None,
            subscriptions: subscriptions.iter().map(|s| s.to_string()).collect(),
            platform: "android".to_string(),
            is_valid: true,
            last_used_at: Some(now),
            failure_count: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStorage {
    async fn find_by_mosque(&self, mosque_id: &str) -> ApiResult<Vec<PushTokenRecord>> {
        let records = self.records.lock().unwrap();
        let mut matches: Vec<PushTokenRecord> = records
            .values()
            .filter(|r| r.is_valid && r.subscriptions.iter().any(|s| s == mosque_id))
            .cloned()
            .collect();
        // Stable order keeps ticket-alignment assertions deterministic.
        matches.sort_by(|a, b| a.token.cmp(&b.token));
        Ok(matches)
    }

    async fn find_by_token(&self, token: &str) -> ApiResult<Option<PushTokenRecord>> {
        Ok(self.records.lock().unwrap().get(token).cloned())
    }

    async fn register(&self, params: RegisterTokenParams) -> ApiResult<PushTokenRecord> {
        let now = Utc::now();
        let mut records = self.records.lock().unwrap();

        let record = match records.get_mut(&params.token) {
            Some(existing) => {
                let mut merged: BTreeSet<String> =
                    existing.subscriptions.iter().cloned().collect();
                merged.extend(params.subscriptions.iter().cloned());
                existing.subscriptions = merged.into_iter().collect();
                if params.owner_id.is_some() {
                    existing.owner_id = params.owner_id.clone();
                }
                existing.platform = params.platform.clone();
                existing.is_valid = true;
                existing.failure_count = 0;
                existing.last_used_at = Some(now);
                existing.updated_at = now;
                existing.clone()
            }
            None => {
                let subscriptions: BTreeSet<String> = params.subscriptions.into_iter().collect();
                let record = PushTokenRecord {
                    token: params.token.clone(),
                    owner_id: params.owner_id,
                    subscriptions: subscriptions.into_iter().collect(),
                    platform: params.platform,
                    is_valid: true,
                    last_used_at: Some(now),
                    failure_count: 0,
                    created_at: now,
                    updated_at: now,
                };
                records.insert(params.token, record.clone());
                record
            }
        };

        Ok(record)
    }

    async fn remove_subscription(&self, token: &str, mosque_id: &str) -> ApiResult<()> {
        if let Some(record) = self.records.lock().unwrap().get_mut(token) {
            record.subscriptions.retain(|s| s != mosque_id);
            record.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn mark_invalid(&self, token: &str) -> ApiResult<()> {
        if let Some(record) = self.records.lock().unwrap().get_mut(token) {
            record.is_valid = false;
            record.failure_count += 1;
            record.updated_at = Utc::now();
            info!("Marked token as invalid: {}", token_preview(token));
        }
        Ok(())
    }

    async fn delete_stale(&self, cutoff: DateTime<Utc>) -> ApiResult<u64> {
        let mut records = self.records.lock().unwrap();
        let before = records.len();
        records.retain(|_, r| r.is_valid || r.updated_at >= cutoff);
        Ok((before - records.len()) as u64)
    }

    async fn mosque_stats(&self, mosque_id: &str) -> ApiResult<SubscriberStats> {
        let records = self.records.lock().unwrap();
        let subscribed: Vec<&PushTokenRecord> = records
            .values()
            .filter(|r| r.subscriptions.iter().any(|s| s == mosque_id))
            .collect();

        let active = subscribed.iter().filter(|r| r.is_valid).count() as i64;
        let mut platforms: HashMap<String, i64> = HashMap::new();
        for record in subscribed.iter().filter(|r| r.is_valid) {
            *platforms.entry(record.platform.clone()).or_insert(0) += 1;
        }

        Ok(SubscriberStats {
            total: subscribed.len() as i64,
            active,
            inactive: subscribed.len() as i64 - active,
            platforms,
        })
    }
}

/// Combined mosque/user directory fake.
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    mosques: Mutex<HashSet<String>>,
    followed: Mutex<HashMap<String, Vec<String>>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_mosque(&self, mosque_id: &str) {
        self.mosques.lock().unwrap().insert(mosque_id.to_string());
    }

    pub fn set_followed(&self, user_id: &str, mosque_ids: &[&str]) {
        self.followed.lock().unwrap().insert(
            user_id.to_string(),
            mosque_ids.iter().map(|s| s.to_string()).collect(),
        );
    }
}

#[async_trait]
impl MosqueDirectory for MemoryDirectory {
    async fn active_mosque_exists(&self, mosque_id: &str) -> ApiResult<bool> {
        Ok(self.mosques.lock().unwrap().contains(mosque_id))
    }
}

#[async_trait]
impl UserDirectory for MemoryDirectory {
    async fn followed_mosques(&self, user_id: &str) -> ApiResult<Vec<String>> {
        Ok(self
            .followed
            .lock()
            .unwrap()
            .get(user_id)
            .cloned()
            .unwrap_or_default())
    }
}
