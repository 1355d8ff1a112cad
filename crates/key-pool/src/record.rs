//! Per-key usage and failure bookkeeping
//!
//! Usage-based and error-based eviction are independent axes: a key can be
//! healthy but exhausted (cooldown since its last use) or unhealthy (error
//! ceiling reached). Eligibility is a pure function of the record and the
//! current time; the mutation methods carry no I/O.

use std::time::Duration;

use upstream::ErrorClassification;

/// Eligibility ceilings shared by every key in a pool.
#[derive(Debug, Clone)]
pub struct KeyLimits {
    /// Hand-outs before the key enters cooldown
    pub max_usage: u32,
    /// Failures before the key is excluded until an explicit reset
    pub max_errors: u32,
    /// Exclusion window after an over-used key's last hand-out
    pub cooldown: Duration,
}

impl Default for KeyLimits {
    fn default() -> Self {
        Self {
            max_usage: 100,
            max_errors: 5,
            cooldown: Duration::from_secs(60 * 60),
        }
    }
}

/// Health and usage counters for a single key in the pool.
#[derive(Debug, Clone)]
pub struct KeyRecord {
    pub key: String,
    pub usage_count: u32,
    pub error_count: u32,
    /// Unix milliseconds of the last hand-out, 0 if never used
    pub last_used_at: u64,
}

impl KeyRecord {
    pub fn new(key: String) -> Self {
        Self {
            key,
            usage_count: 0,
            error_count: 0,
            last_used_at: 0,
        }
    }

    /// Whether the key may be selected at `now_millis`.
    ///
    /// Ineligible once the error ceiling is reached, or while an over-used
    /// key is still inside its cooldown window. A key whose cooldown has
    /// elapsed is eligible again without any counter change.
    pub fn is_eligible(&self, limits: &KeyLimits, now_millis: u64) -> bool {
        if self.error_count >= limits.max_errors {
            return false;
        }
        let in_cooldown = self.usage_count >= limits.max_usage
            && now_millis.saturating_sub(self.last_used_at) < limits.cooldown.as_millis() as u64;
        !in_cooldown
    }

    /// Whether the key is excluded by the error ceiling specifically.
    pub fn error_capped(&self, limits: &KeyLimits) -> bool {
        self.error_count >= limits.max_errors
    }

    /// Record a hand-out at `now_millis`.
    pub fn record_usage(&mut self, now_millis: u64) {
        self.usage_count = self.usage_count.saturating_add(1);
        self.last_used_at = now_millis;
    }

    /// Record a failure.
    ///
    /// Rate-limited failures fast-forward the usage counter to the ceiling
    /// and stamp the last-used time, so the key enters cooldown immediately
    /// instead of needing the remaining usage budget to drain naturally.
    pub fn record_failure(
        &mut self,
        classification: ErrorClassification,
        limits: &KeyLimits,
        now_millis: u64,
    ) {
        self.error_count = self.error_count.saturating_add(1);
        if classification == ErrorClassification::RateLimited {
            self.usage_count = limits.max_usage;
            self.last_used_at = now_millis;
        }
    }

    /// Clear all counters, restoring eligibility.
    pub fn reset(&mut self) {
        self.usage_count = 0;
        self.error_count = 0;
        self.last_used_at = 0;
    }
}
