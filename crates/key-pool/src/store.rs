//! Durable rotation state
//!
//! The manager flushes a snapshot after every mutation and rehydrates once at
//! construction. Missing or corrupt state is never an error — the pool just
//! starts fresh. Writes use atomic temp-file + rename so a crash mid-write
//! cannot corrupt the state file.
//!
//! Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
//! (`Box<dyn StateStore>`).

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Snapshot of rotation state, indexed in parallel with the fixed key pool.
///
/// The keys themselves are never written — only counters and the cursor.
/// A snapshot whose array lengths don't match the pool is discarded at load.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    pub cursor: usize,
    pub usage_counts: Vec<u32>,
    pub error_counts: Vec<u32>,
    pub last_used_at: Vec<u64>,
}

/// Persistence backend for rotation state.
///
/// `load` never fails — unreadable state is reported as `None`. `save` and
/// `clear` may fail with I/O errors; the manager logs and swallows them, so
/// a broken backend degrades to in-memory operation.
pub trait StateStore: Send + Sync {
    fn load(&self) -> Pin<Box<dyn Future<Output = Option<PersistedState>> + Send + '_>>;

    fn save<'a>(
        &'a self,
        state: &'a PersistedState,
    ) -> Pin<Box<dyn Future<Output = std::io::Result<()>> + Send + 'a>>;

    fn clear(&self) -> Pin<Box<dyn Future<Output = std::io::Result<()>> + Send + '_>>;
}

/// No-op store for deployments that keep state in memory only.
pub struct NullStore;

impl StateStore for NullStore {
    fn load(&self) -> Pin<Box<dyn Future<Output = Option<PersistedState>> + Send + '_>> {
        Box::pin(async { None })
    }

    fn save<'a>(
        &'a self,
        _state: &'a PersistedState,
    ) -> Pin<Box<dyn Future<Output = std::io::Result<()>> + Send + 'a>> {
        Box::pin(async { Ok(()) })
    }

    fn clear(&self) -> Pin<Box<dyn Future<Output = std::io::Result<()>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }
}

/// JSON file store: one document under a well-known path.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl StateStore for JsonFileStore {
    fn load(&self) -> Pin<Box<dyn Future<Output = Option<PersistedState>> + Send + '_>> {
        Box::pin(async move {
            let contents = match tokio::fs::read_to_string(&self.path).await {
                Ok(c) => c,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "failed to read rotation state");
                    return None;
                }
            };
            match serde_json::from_str(&contents) {
                Ok(state) => {
                    debug!(path = %self.path.display(), "loaded rotation state");
                    Some(state)
                }
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "corrupt rotation state, starting fresh");
                    None
                }
            }
        })
    }

    fn save<'a>(
        &'a self,
        state: &'a PersistedState,
    ) -> Pin<Box<dyn Future<Output = std::io::Result<()>> + Send + 'a>> {
        Box::pin(async move { write_atomic(&self.path, state).await })
    }

    fn clear(&self) -> Pin<Box<dyn Future<Output = std::io::Result<()>> + Send + '_>> {
        Box::pin(async move {
            match tokio::fs::remove_file(&self.path).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e),
            }
        })
    }
}

/// Write the snapshot to a file atomically.
///
/// Writes to a temporary file in the same directory, then renames it over
/// the target. File permissions are 0600 since the state reveals usage
/// patterns of the credentials.
async fn write_atomic(path: &Path, state: &PersistedState) -> std::io::Result<()> {
    let json = serde_json::to_string_pretty(state).map_err(std::io::Error::other)?;

    let dir = path.parent().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "state path has no parent directory",
        )
    })?;

    let tmp_path = dir.join(format!(".rotation-state.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes()).await?;

    // 0600: owner read/write only (unix only)
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms).await?;
    }

    tokio::fs::rename(&tmp_path, path).await?;

    debug!(path = %path.display(), "persisted rotation state");
    Ok(())
}
