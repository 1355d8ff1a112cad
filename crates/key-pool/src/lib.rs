//! Key rotation pool for a rate-limited upstream API
//!
//! Manages a fixed pool of interchangeable API keys with round-robin
//! selection, per-key usage and failure counters, cooldown windows for
//! over-used keys, bounded retry across keys, and optional durable state.
//! The pool membership never changes at runtime — only the counters and the
//! read cursor move.
//!
//! Key lifecycle:
//! 1. Manager constructed from the configured key list; saved counters are
//!    rehydrated when a `StateStore` is injected
//! 2. `acquire` scans round-robin from the cursor for an eligible key and
//!    bumps its usage counter
//! 3. A rate-limited failure fast-forwards the key into cooldown and rotates
//!    to the next key; a fatal failure is surfaced immediately
//! 4. Cooldown elapses (or an operator resets the key) → eligible again
//! 5. Every mutation is flushed to the injected store; flush failures are
//!    logged and swallowed

pub mod error;
pub mod manager;
pub mod record;
pub mod retry;
pub mod store;

pub use error::{Error, Result};
pub use manager::{ExhaustionPolicy, KeyStats, RotationConfig, RotationManager};
pub use record::{KeyLimits, KeyRecord};
pub use store::{JsonFileStore, NullStore, PersistedState, StateStore};
