//! Pool state and round-robin key selection
//!
//! The manager owns the fixed key pool, the per-key counters, and the read
//! cursor, guarded as one unit. Selection scans in pool order from the
//! cursor, wrapping, and returns the first eligible key — no weighting, so a
//! selection is O(N) and deterministic given the state.
//!
//! Cooldown transitions are implicit: an over-used key becomes eligible again
//! the moment its window elapses, with no state change. Error-capped keys
//! stay excluded until an explicit reset.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use common::redact;
use upstream::ErrorClassification;

use crate::error::{Error, Result};
use crate::record::{KeyLimits, KeyRecord};
use crate::store::{NullStore, PersistedState, StateStore};

/// What selection does when a full scan finds no eligible key.
///
/// The two deployment variants want different things: a serving process
/// prefers to limp along on recycled keys, a browser session prefers to
/// surface the condition to the user. One code path, explicit flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExhaustionPolicy {
    /// Report exhaustion to the caller
    Fail,
    /// Clear all failure markings and hand out the first pool entry
    RecoverAll,
}

/// Tunables for the rotation manager.
#[derive(Debug, Clone)]
pub struct RotationConfig {
    pub limits: KeyLimits,
    /// Attempt ceiling for `run_with_rotation`
    pub max_attempts: u32,
    /// Fixed delay between rotation attempts
    pub retry_delay: std::time::Duration,
    pub exhaustion: ExhaustionPolicy,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            limits: KeyLimits::default(),
            max_attempts: 3,
            retry_delay: std::time::Duration::from_secs(1),
            exhaustion: ExhaustionPolicy::Fail,
        }
    }
}

/// Pool records plus the read cursor, mutated as one unit.
pub(crate) struct PoolState {
    pub(crate) records: Vec<KeyRecord>,
    pub(crate) cursor: usize,
}

/// Read-only per-key summary for operators. The key is redacted.
#[derive(Debug, Clone, Serialize)]
pub struct KeyStats {
    pub index: usize,
    pub key: String,
    pub usage_count: u32,
    pub error_count: u32,
    pub last_used_at: u64,
    pub eligible: bool,
    pub is_current: bool,
}

/// Rotation manager owning a fixed pool of interchangeable API keys.
///
/// Constructed explicitly and shared via `Arc` by whatever context needs it;
/// the persistence backend is injected so tests and multi-tenant hosts get
/// isolated state.
pub struct RotationManager {
    pub(crate) state: RwLock<PoolState>,
    pub(crate) config: RotationConfig,
    pub(crate) store: Box<dyn StateStore>,
}

impl RotationManager {
    /// In-memory manager with no persistence.
    pub fn new(keys: Vec<String>, config: RotationConfig) -> Self {
        let records = keys.into_iter().map(KeyRecord::new).collect::<Vec<_>>();
        info!(keys = records.len(), "rotation manager initialized");
        Self {
            state: RwLock::new(PoolState { records, cursor: 0 }),
            config,
            store: Box::new(NullStore),
        }
    }

    /// Manager backed by a persistence store.
    ///
    /// Previously saved counters and cursor are rehydrated; missing, corrupt,
    /// or pool-mismatched state silently falls back to a fresh pool.
    pub async fn with_store(
        keys: Vec<String>,
        config: RotationConfig,
        store: Box<dyn StateStore>,
    ) -> Self {
        let mut state = PoolState {
            records: keys.into_iter().map(KeyRecord::new).collect(),
            cursor: 0,
        };
        if let Some(saved) = store.load().await {
            apply_saved(&mut state, saved);
        }
        info!(keys = state.records.len(), "rotation manager initialized");
        Self {
            state: RwLock::new(state),
            config,
            store,
        }
    }

    /// Hand out the next eligible key, bumping its usage counter.
    ///
    /// Scans round-robin from the cursor and advances the cursor past the
    /// returned key. When the whole pool is ineligible, the behavior depends
    /// on the configured `ExhaustionPolicy`.
    pub async fn acquire(&self) -> Result<String> {
        let now = now_millis();
        let (key, snapshot) = {
            let mut state = self.state.write().await;
            let idx = match scan_eligible(&state, &self.config.limits, now) {
                Some(idx) => idx,
                None => self.recover_or_exhaust(&mut state, now)?,
            };
            state.cursor = (idx + 1) % state.records.len();
            state.records[idx].record_usage(now);
            let record = &state.records[idx];
            debug!(
                key = %redact(&record.key),
                usage = record.usage_count,
                "key handed out"
            );
            metrics::counter!("rotation_handouts_total").increment(1);
            (record.key.clone(), snapshot_of(&state))
        };
        self.persist(&snapshot).await;
        Ok(key)
    }

    /// Record a failure against `key` and return the next key to try.
    ///
    /// Rate-limited failures force the key into cooldown immediately. The
    /// returned key is a peek — the cursor is not advanced, so the following
    /// `acquire` hands out the same key (with a usage bump). `None` signals
    /// exhaustion under the `Fail` policy.
    pub async fn report_failure(
        &self,
        key: &str,
        classification: ErrorClassification,
    ) -> Result<Option<String>> {
        let now = now_millis();
        let (next, snapshot) = {
            let mut state = self.state.write().await;
            let Some(record) = state.records.iter_mut().find(|r| r.key == key) else {
                return Err(Error::UnknownKey(redact(key)));
            };
            record.record_failure(classification, &self.config.limits, now);
            warn!(
                key = %redact(key),
                errors = record.error_count,
                ?classification,
                "key failure recorded"
            );
            if classification == ErrorClassification::RateLimited {
                metrics::counter!("rotation_key_cooldowns_total").increment(1);
            }

            let next = match scan_eligible(&state, &self.config.limits, now) {
                Some(idx) => Some(state.records[idx].key.clone()),
                None => match self.recover_or_exhaust(&mut state, now) {
                    Ok(idx) => Some(state.records[idx].key.clone()),
                    Err(_) => None,
                },
            };
            (next, snapshot_of(&state))
        };
        self.persist(&snapshot).await;
        Ok(next)
    }

    /// Bookkeeping hook for successful calls. Flushes state; counters are
    /// untouched for now.
    pub async fn report_success(&self, key: &str) {
        let snapshot = {
            let state = self.state.read().await;
            if !state.records.iter().any(|r| r.key == key) {
                warn!(key = %redact(key), "success reported for key outside the pool");
                return;
            }
            snapshot_of(&state)
        };
        self.persist(&snapshot).await;
    }

    /// Reset a single key's counters, restoring its eligibility.
    pub async fn reset_key(&self, key: &str) -> Result<()> {
        let snapshot = {
            let mut state = self.state.write().await;
            let record = state
                .records
                .iter_mut()
                .find(|r| r.key == key)
                .ok_or_else(|| Error::UnknownKey(redact(key)))?;
            record.reset();
            info!(key = %redact(key), "key counters reset");
            snapshot_of(&state)
        };
        self.persist(&snapshot).await;
        Ok(())
    }

    /// Reset a key by its pool index (the operator surface only ever sees
    /// redacted keys, so resets address by position).
    pub async fn reset_key_at(&self, index: usize) -> Result<()> {
        let snapshot = {
            let mut state = self.state.write().await;
            let record = state
                .records
                .get_mut(index)
                .ok_or_else(|| Error::UnknownKey(format!("index {index}")))?;
            record.reset();
            info!(key = %redact(&record.key), index, "key counters reset");
            snapshot_of(&state)
        };
        self.persist(&snapshot).await;
        Ok(())
    }

    /// Reset every key, rewind the cursor, and discard persisted state.
    pub async fn reset_all(&self) {
        {
            let mut state = self.state.write().await;
            for record in &mut state.records {
                record.reset();
            }
            state.cursor = 0;
        }
        info!("rotation state reset");
        if let Err(e) = self.store.clear().await {
            warn!(error = %e, "failed to discard persisted rotation state");
        }
    }

    /// Per-key summary for the operator surface. Pure read.
    pub async fn stats(&self) -> Vec<KeyStats> {
        let state = self.state.read().await;
        let now = now_millis();
        state
            .records
            .iter()
            .enumerate()
            .map(|(index, record)| KeyStats {
                index,
                key: redact(&record.key),
                usage_count: record.usage_count,
                error_count: record.error_count,
                last_used_at: record.last_used_at,
                eligible: record.is_eligible(&self.config.limits, now),
                is_current: index == state.cursor,
            })
            .collect()
    }

    /// Pool health summary for the health endpoint.
    ///
    /// Status mapping: all eligible → healthy, some eligible → degraded,
    /// none eligible → unhealthy.
    pub async fn health(&self) -> serde_json::Value {
        let state = self.state.read().await;
        let now = now_millis();
        let limits = &self.config.limits;
        let cooldown_millis = limits.cooldown.as_millis() as u64;

        let mut keys = Vec::new();
        let mut eligible_count = 0usize;
        let mut cooling_count = 0usize;
        let mut capped_count = 0usize;

        for record in &state.records {
            if record.error_capped(limits) {
                capped_count += 1;
                keys.push(serde_json::json!({
                    "key": redact(&record.key),
                    "status": "error_capped",
                    "errors": record.error_count
                }));
            } else if !record.is_eligible(limits, now) {
                let elapsed = now.saturating_sub(record.last_used_at);
                let remaining = cooldown_millis.saturating_sub(elapsed) / 1000;
                cooling_count += 1;
                keys.push(serde_json::json!({
                    "key": redact(&record.key),
                    "status": "cooling_down",
                    "cooldown_remaining_secs": remaining
                }));
            } else {
                eligible_count += 1;
                keys.push(serde_json::json!({
                    "key": redact(&record.key),
                    "status": "eligible"
                }));
            }
        }

        let total = state.records.len();
        let pool_status = if eligible_count == total && total > 0 {
            "healthy"
        } else if eligible_count > 0 {
            "degraded"
        } else {
            "unhealthy"
        };

        serde_json::json!({
            "status": pool_status,
            "keys_total": total,
            "keys_eligible": eligible_count,
            "keys_cooling_down": cooling_count,
            "keys_error_capped": capped_count,
            "keys": keys
        })
    }

    /// Exhaustion fallback: under `RecoverAll` (and a non-empty pool) clear
    /// every failure marking and return index 0; otherwise build the
    /// exhausted error.
    fn recover_or_exhaust(&self, state: &mut PoolState, now: u64) -> Result<usize> {
        if self.config.exhaustion == ExhaustionPolicy::RecoverAll && !state.records.is_empty() {
            warn!("no eligible key left, clearing failure markings on the whole pool");
            metrics::counter!("rotation_pool_recovered_total").increment(1);
            for record in &mut state.records {
                record.reset();
            }
            state.cursor = 0;
            return Ok(0);
        }
        metrics::counter!("rotation_exhausted_total").increment(1);
        Err(Error::PoolExhausted(exhausted_message(
            state,
            &self.config.limits,
            now,
        )))
    }

    /// Flush a snapshot to the store; failures are logged, never propagated.
    pub(crate) async fn persist(&self, snapshot: &PersistedState) {
        if let Err(e) = self.store.save(snapshot).await {
            warn!(error = %e, "failed to persist rotation state");
        }
    }
}

/// Scan the pool in order from the cursor, wrapping, for the first eligible
/// key. Does not mutate anything.
fn scan_eligible(state: &PoolState, limits: &KeyLimits, now: u64) -> Option<usize> {
    let n = state.records.len();
    for offset in 0..n {
        let idx = (state.cursor + offset) % n;
        if state.records[idx].is_eligible(limits, now) {
            return Some(idx);
        }
    }
    None
}

/// Build a persistable snapshot of the pool.
fn snapshot_of(state: &PoolState) -> PersistedState {
    PersistedState {
        cursor: state.cursor,
        usage_counts: state.records.iter().map(|r| r.usage_count).collect(),
        error_counts: state.records.iter().map(|r| r.error_count).collect(),
        last_used_at: state.records.iter().map(|r| r.last_used_at).collect(),
    }
}

/// Overlay saved counters onto a fresh pool, rejecting snapshots that don't
/// match the pool shape.
fn apply_saved(state: &mut PoolState, saved: PersistedState) {
    let n = state.records.len();
    if saved.usage_counts.len() != n
        || saved.error_counts.len() != n
        || saved.last_used_at.len() != n
        || (n > 0 && saved.cursor >= n)
    {
        warn!("saved rotation state does not match the key pool, starting fresh");
        return;
    }
    for (i, record) in state.records.iter_mut().enumerate() {
        record.usage_count = saved.usage_counts[i];
        record.error_count = saved.error_counts[i];
        record.last_used_at = saved.last_used_at[i];
    }
    state.cursor = saved.cursor;
    debug!(cursor = state.cursor, "rotation state rehydrated");
}

/// JSON summary of pool counts for the exhausted error.
fn exhausted_message(state: &PoolState, limits: &KeyLimits, now: u64) -> String {
    let mut eligible = 0usize;
    let mut cooling = 0usize;
    let mut capped = 0usize;
    for record in &state.records {
        if record.error_capped(limits) {
            capped += 1;
        } else if !record.is_eligible(limits, now) {
            cooling += 1;
        } else {
            eligible += 1;
        }
    }
    serde_json::json!({
        "error": {
            "type": "pool_exhausted",
            "message": "no eligible key available",
            "pool": {
                "keys_total": state.records.len(),
                "keys_eligible": eligible,
                "keys_cooling_down": cooling,
                "keys_error_capped": capped
            }
        }
    })
    .to_string()
}

/// Current wall-clock time as unix milliseconds.
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::JsonFileStore;
    use std::time::Duration;

    fn test_limits() -> KeyLimits {
        KeyLimits {
            max_usage: 100,
            max_errors: 5,
            cooldown: Duration::from_secs(3600),
        }
    }

    fn test_config() -> RotationConfig {
        RotationConfig {
            limits: test_limits(),
            max_attempts: 3,
            retry_delay: Duration::ZERO,
            exhaustion: ExhaustionPolicy::Fail,
        }
    }

    fn manager_with(keys: &[&str], config: RotationConfig) -> RotationManager {
        RotationManager::new(keys.iter().map(|k| k.to_string()).collect(), config)
    }

    const KEYS: &[&str] = &["alpha-key-000001", "bravo-key-000002", "charlie-key-0003"];

    #[tokio::test]
    async fn round_robin_returns_each_key_once_in_pool_order() {
        let manager = manager_with(KEYS, test_config());

        assert_eq!(manager.acquire().await.unwrap(), KEYS[0]);
        assert_eq!(manager.acquire().await.unwrap(), KEYS[1]);
        assert_eq!(manager.acquire().await.unwrap(), KEYS[2]);
        // Wraps back to the start
        assert_eq!(manager.acquire().await.unwrap(), KEYS[0]);
    }

    #[tokio::test]
    async fn acquire_bumps_usage_and_last_used() {
        let manager = manager_with(KEYS, test_config());
        manager.acquire().await.unwrap();

        let stats = manager.stats().await;
        assert_eq!(stats[0].usage_count, 1);
        assert!(stats[0].last_used_at > 0);
        assert_eq!(stats[1].usage_count, 0);
        assert_eq!(stats[1].last_used_at, 0);
    }

    #[tokio::test]
    async fn error_capped_key_is_skipped_until_reset() {
        let mut config = test_config();
        config.limits.max_errors = 1;
        let manager = manager_with(KEYS, config);

        manager
            .report_failure(KEYS[0], ErrorClassification::Fatal)
            .await
            .unwrap();

        for _ in 0..4 {
            assert_ne!(manager.acquire().await.unwrap(), KEYS[0]);
        }
    }

    #[tokio::test]
    async fn usage_ceiling_exhausts_the_pool() {
        let mut config = test_config();
        config.limits.max_usage = 1;
        let manager = manager_with(&KEYS[..2], config);

        manager.acquire().await.unwrap();
        manager.acquire().await.unwrap();

        let err = manager.acquire().await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("pool_exhausted"), "error: {msg}");

        let json: serde_json::Value =
            serde_json::from_str(msg.strip_prefix("pool exhausted: ").unwrap_or(&msg)).unwrap();
        assert_eq!(json["error"]["pool"]["keys_total"], 2);
        assert_eq!(json["error"]["pool"]["keys_eligible"], 0);
        assert_eq!(json["error"]["pool"]["keys_cooling_down"], 2);
        assert_eq!(json["error"]["pool"]["keys_error_capped"], 0);
    }

    #[tokio::test]
    async fn cooldown_elapses_and_key_returns() {
        let mut config = test_config();
        config.limits.max_usage = 1;
        config.limits.cooldown = Duration::from_millis(10);
        let manager = manager_with(&KEYS[..1], config);

        manager.acquire().await.unwrap();
        assert!(manager.acquire().await.is_err());

        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(manager.acquire().await.unwrap(), KEYS[0]);
    }

    #[tokio::test]
    async fn quota_failure_fast_forwards_fresh_key_into_cooldown() {
        let manager = manager_with(KEYS, test_config());

        // Never used, a single rate-limited failure excludes it immediately
        manager
            .report_failure(KEYS[0], ErrorClassification::RateLimited)
            .await
            .unwrap();

        let stats = manager.stats().await;
        assert!(!stats[0].eligible);
        assert_eq!(stats[0].usage_count, 100);
        assert_eq!(stats[0].error_count, 1);
        assert!(stats[1].eligible);
    }

    #[tokio::test]
    async fn fatal_failures_accumulate_to_the_error_ceiling() {
        let mut config = test_config();
        config.limits.max_errors = 2;
        let manager = manager_with(KEYS, config);

        manager
            .report_failure(KEYS[0], ErrorClassification::Fatal)
            .await
            .unwrap();
        assert!(manager.stats().await[0].eligible);

        manager
            .report_failure(KEYS[0], ErrorClassification::Fatal)
            .await
            .unwrap();
        assert!(!manager.stats().await[0].eligible);
    }

    #[tokio::test]
    async fn report_failure_peeks_the_next_key_without_advancing() {
        let manager = manager_with(KEYS, test_config());

        let next = manager
            .report_failure(KEYS[0], ErrorClassification::RateLimited)
            .await
            .unwrap();
        assert_eq!(next.as_deref(), Some(KEYS[1]));

        // The peeked key is what the next acquire hands out
        assert_eq!(manager.acquire().await.unwrap(), KEYS[1]);
    }

    #[tokio::test]
    async fn report_failure_signals_exhaustion_under_fail_policy() {
        let manager = manager_with(&KEYS[..1], test_config());

        let next = manager
            .report_failure(KEYS[0], ErrorClassification::RateLimited)
            .await
            .unwrap();
        assert_eq!(next, None);
    }

    #[tokio::test]
    async fn report_failure_recovers_pool_under_recover_all_policy() {
        let mut config = test_config();
        config.exhaustion = ExhaustionPolicy::RecoverAll;
        let manager = manager_with(&KEYS[..2], config);

        manager
            .report_failure(KEYS[0], ErrorClassification::RateLimited)
            .await
            .unwrap();
        let next = manager
            .report_failure(KEYS[1], ErrorClassification::RateLimited)
            .await
            .unwrap();

        // Whole pool was ineligible: failure markings cleared, first key returned
        assert_eq!(next.as_deref(), Some(KEYS[0]));
        let stats = manager.stats().await;
        assert!(stats.iter().all(|s| s.eligible));
        assert!(stats.iter().all(|s| s.error_count == 0));
    }

    #[tokio::test]
    async fn report_failure_unknown_key_errors_redacted() {
        let manager = manager_with(KEYS, test_config());
        let err = manager
            .report_failure("intruder-key-9999", ErrorClassification::Fatal)
            .await
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("unknown key"), "got: {msg}");
        assert!(!msg.contains("intruder-key-9999"), "got: {msg}");
    }

    #[tokio::test]
    async fn reset_key_restores_eligibility() {
        let manager = manager_with(KEYS, test_config());
        manager
            .report_failure(KEYS[0], ErrorClassification::RateLimited)
            .await
            .unwrap();
        assert!(!manager.stats().await[0].eligible);

        manager.reset_key(KEYS[0]).await.unwrap();
        assert!(manager.stats().await[0].eligible);
    }

    #[tokio::test]
    async fn reset_key_at_addresses_by_index() {
        let manager = manager_with(KEYS, test_config());
        manager
            .report_failure(KEYS[2], ErrorClassification::RateLimited)
            .await
            .unwrap();

        manager.reset_key_at(2).await.unwrap();
        assert!(manager.stats().await[2].eligible);

        let err = manager.reset_key_at(7).await.unwrap_err();
        assert!(err.to_string().contains("index 7"));
    }

    #[tokio::test]
    async fn reset_all_rewinds_cursor_and_clears_counters() {
        let manager = manager_with(KEYS, test_config());
        manager.acquire().await.unwrap();
        manager.acquire().await.unwrap();
        manager
            .report_failure(KEYS[2], ErrorClassification::RateLimited)
            .await
            .unwrap();

        manager.reset_all().await;

        let stats = manager.stats().await;
        assert!(stats.iter().all(|s| s.usage_count == 0));
        assert!(stats.iter().all(|s| s.error_count == 0));
        assert!(stats[0].is_current);
        assert_eq!(manager.acquire().await.unwrap(), KEYS[0]);
    }

    #[tokio::test]
    async fn recover_all_acquire_recycles_exhausted_pool() {
        let mut config = test_config();
        config.limits.max_usage = 1;
        config.exhaustion = ExhaustionPolicy::RecoverAll;
        let manager = manager_with(&KEYS[..2], config);

        manager.acquire().await.unwrap();
        manager.acquire().await.unwrap();

        // Third hand-out recovers the pool and starts over at the first key
        assert_eq!(manager.acquire().await.unwrap(), KEYS[0]);
        let stats = manager.stats().await;
        assert_eq!(stats[0].usage_count, 1);
        assert_eq!(stats[1].usage_count, 0);
    }

    #[tokio::test]
    async fn empty_pool_reports_exhaustion_under_both_policies() {
        let manager = manager_with(&[], test_config());
        assert!(matches!(
            manager.acquire().await.unwrap_err(),
            Error::PoolExhausted(_)
        ));

        let mut config = test_config();
        config.exhaustion = ExhaustionPolicy::RecoverAll;
        let manager = manager_with(&[], config);
        assert!(matches!(
            manager.acquire().await.unwrap_err(),
            Error::PoolExhausted(_)
        ));
    }

    #[tokio::test]
    async fn stats_redact_keys_and_mark_the_cursor() {
        let manager = manager_with(KEYS, test_config());
        manager.acquire().await.unwrap();

        let stats = manager.stats().await;
        assert_eq!(stats[0].key, "alpha-ke...");
        assert!(stats.iter().all(|s| !s.key.contains("000")));
        assert!(!stats[0].is_current);
        assert!(stats[1].is_current);
        assert!(!stats[2].is_current);
    }

    #[tokio::test]
    async fn health_tracks_pool_degradation() {
        let manager = manager_with(&KEYS[..2], test_config());
        assert_eq!(manager.health().await["status"], "healthy");

        manager
            .report_failure(KEYS[0], ErrorClassification::RateLimited)
            .await
            .unwrap();
        let health = manager.health().await;
        assert_eq!(health["status"], "degraded");
        assert_eq!(health["keys_cooling_down"], 1);
        let keys = health["keys"].as_array().unwrap();
        assert_eq!(keys[0]["status"], "cooling_down");
        assert!(keys[0]["cooldown_remaining_secs"].as_u64().unwrap() > 0);

        manager
            .report_failure(KEYS[1], ErrorClassification::RateLimited)
            .await
            .unwrap();
        assert_eq!(manager.health().await["status"], "unhealthy");
    }

    #[tokio::test]
    async fn health_reports_error_capped_keys() {
        let mut config = test_config();
        config.limits.max_errors = 1;
        let manager = manager_with(&KEYS[..1], config);

        manager
            .report_failure(KEYS[0], ErrorClassification::Fatal)
            .await
            .unwrap();

        let health = manager.health().await;
        assert_eq!(health["status"], "unhealthy");
        assert_eq!(health["keys_error_capped"], 1);
        assert_eq!(health["keys"][0]["status"], "error_capped");
    }

    #[tokio::test]
    async fn persistence_roundtrip_restores_counters_and_cursor() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rotation.json");
        let keys: Vec<String> = KEYS.iter().map(|k| k.to_string()).collect();

        {
            let manager = RotationManager::with_store(
                keys.clone(),
                test_config(),
                Box::new(JsonFileStore::new(path.clone())),
            )
            .await;
            manager.acquire().await.unwrap();
            manager.acquire().await.unwrap();
            manager
                .report_failure(KEYS[1], ErrorClassification::Fatal)
                .await
                .unwrap();
        }

        let manager = RotationManager::with_store(
            keys,
            test_config(),
            Box::new(JsonFileStore::new(path)),
        )
        .await;

        let stats = manager.stats().await;
        assert_eq!(stats[0].usage_count, 1);
        assert_eq!(stats[1].usage_count, 1);
        assert_eq!(stats[1].error_count, 1);
        assert_eq!(stats[2].usage_count, 0);
        // Cursor survived: rotation continues where it left off
        assert!(stats[2].is_current);
        assert_eq!(manager.acquire().await.unwrap(), KEYS[2]);
    }

    #[tokio::test]
    async fn corrupt_persisted_state_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rotation.json");
        tokio::fs::write(&path, "]]not json[[").await.unwrap();

        let manager = RotationManager::with_store(
            KEYS.iter().map(|k| k.to_string()).collect(),
            test_config(),
            Box::new(JsonFileStore::new(path)),
        )
        .await;

        let stats = manager.stats().await;
        assert!(stats.iter().all(|s| s.usage_count == 0));
        assert!(stats[0].is_current);
    }

    #[tokio::test]
    async fn mismatched_pool_size_discards_saved_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rotation.json");

        {
            let manager = RotationManager::with_store(
                KEYS[..2].iter().map(|k| k.to_string()).collect(),
                test_config(),
                Box::new(JsonFileStore::new(path.clone())),
            )
            .await;
            manager.acquire().await.unwrap();
        }

        // Same path, different pool size: the snapshot no longer applies
        let manager = RotationManager::with_store(
            KEYS.iter().map(|k| k.to_string()).collect(),
            test_config(),
            Box::new(JsonFileStore::new(path)),
        )
        .await;

        let stats = manager.stats().await;
        assert!(stats.iter().all(|s| s.usage_count == 0));
    }

    #[tokio::test]
    async fn reset_all_discards_persisted_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rotation.json");
        let keys: Vec<String> = KEYS.iter().map(|k| k.to_string()).collect();

        let manager = RotationManager::with_store(
            keys.clone(),
            test_config(),
            Box::new(JsonFileStore::new(path.clone())),
        )
        .await;
        manager.acquire().await.unwrap();
        assert!(path.exists());

        manager.reset_all().await;
        assert!(!path.exists());
    }
}
