//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! API keys are loaded from the GEMINI_API_KEYS env var or keys_file,
//! never stored in the TOML directly to avoid leaking secrets.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use common::Secret;
use key_pool::{ExhaustionPolicy, KeyLimits, RotationConfig};
use serde::Deserialize;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub rotation: RotationSection,
}

/// HTTP gateway settings
#[derive(Debug, Deserialize)]
pub struct GatewayConfig {
    pub listen_addr: SocketAddr,
    pub upstream_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Path to a file with one API key per line (alternative to GEMINI_API_KEYS)
    #[serde(default)]
    pub keys_file: Option<PathBuf>,
    #[serde(skip)]
    pub keys: Vec<Secret<String>>,
}

/// Rotation tunables, all with deploy-sensible defaults.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RotationSection {
    pub max_usage_per_key: u32,
    pub max_errors_per_key: u32,
    pub cooldown_secs: u64,
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
    /// Exhaustion fallback: "fail" or "recover-all"
    pub exhaustion: ExhaustionPolicy,
    /// Where to persist rotation state; in-memory only when unset
    pub state_path: Option<PathBuf>,
}

impl Default for RotationSection {
    fn default() -> Self {
        Self {
            max_usage_per_key: 100,
            max_errors_per_key: 5,
            cooldown_secs: 3600,
            max_attempts: 3,
            retry_delay_ms: 1000,
            // A serving process limps along on recycled keys rather than
            // turning away every request
            exhaustion: ExhaustionPolicy::RecoverAll,
            state_path: None,
        }
    }
}

impl RotationSection {
    /// Translate the TOML section into the pool's config type.
    pub fn rotation_config(&self) -> RotationConfig {
        RotationConfig {
            limits: KeyLimits {
                max_usage: self.max_usage_per_key,
                max_errors: self.max_errors_per_key,
                cooldown: Duration::from_secs(self.cooldown_secs),
            },
            max_attempts: self.max_attempts,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            exhaustion: self.exhaustion,
        }
    }
}

fn default_timeout() -> u64 {
    60
}

fn default_max_connections() -> usize {
    1000
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// API key resolution order:
    /// 1. GEMINI_API_KEYS env var (comma-separated)
    /// 2. keys_file path from config (one key per line)
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if !config.gateway.upstream_url.starts_with("http://")
            && !config.gateway.upstream_url.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "upstream_url must start with http:// or https://, got: {}",
                config.gateway.upstream_url
            )));
        }

        if config.gateway.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if config.gateway.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        if config.rotation.max_attempts == 0 {
            return Err(common::Error::Config(
                "max_attempts must be greater than 0".into(),
            ));
        }

        // Resolve keys: env var takes precedence over file
        let raw_keys: Vec<String> = if let Ok(value) = std::env::var("GEMINI_API_KEYS") {
            value.split(',').map(str::trim).map(str::to_owned).collect()
        } else if let Some(ref keys_file) = config.gateway.keys_file {
            let contents = std::fs::read_to_string(keys_file).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read keys_file {}: {e}",
                    keys_file.display()
                ))
            })?;
            contents.lines().map(str::trim).map(str::to_owned).collect()
        } else {
            Vec::new()
        };

        config.gateway.keys = raw_keys
            .into_iter()
            .filter(|k| !k.is_empty())
            .map(Secret::new)
            .collect();

        if config.gateway.keys.is_empty() {
            return Err(common::Error::Config(
                "no API keys configured: set GEMINI_API_KEYS or keys_file".into(),
            ));
        }

        Ok(config)
    }

    /// Clone the key pool out of the config for manager construction.
    pub fn api_keys(&self) -> Vec<String> {
        self.gateway
            .keys
            .iter()
            .map(|k| k.expose().clone())
            .collect()
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("key-gateway.toml")
    }
}
