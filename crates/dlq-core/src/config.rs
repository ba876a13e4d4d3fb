use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::retry::RetryPolicy;

/// Retry policy parameters (optional section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Failed attempts allowed before a job is marked failed.
    pub max_retries: u32,
    /// Base delay in seconds for exponential backoff (2.0 = 2s, 4s, 8s...).
    pub base_delay_secs: f64,
    /// Maximum backoff delay in seconds.
    pub max_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_secs: 2.0,
            max_delay_secs: 60,
        }
    }
}

impl RetryConfig {
    fn base_delay(&self) -> Result<Duration> {
        Duration::try_from_secs_f64(self.base_delay_secs).with_context(|| {
            format!(
                "retry.base_delay_secs = {} is not a valid delay",
                self.base_delay_secs
            )
        })
    }
}

/// Client polling parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    /// Delay between two poll cycles in milliseconds.
    pub interval_ms: u64,
    /// Extra polls after the queue has no non-terminal job left.
    pub drain_cycles: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: 2_000,
            drain_cycles: 3,
        }
    }
}

/// Global configuration loaded from `~/.config/dlq/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqConfig {
    /// Maximum number of jobs downloading at once.
    pub max_concurrent: usize,
    /// Scheduling loop period in milliseconds.
    pub tick_interval_ms: u64,
    /// Minimum delay between two progress writes for one job.
    pub progress_interval_ms: u64,
    /// How long an idempotency key deduplicates resubmissions.
    pub idempotency_ttl_secs: u64,
    /// How long pause/cancel waits for a running job to release its resources.
    pub cancel_timeout_secs: u64,
    /// Scratch directory for in-progress jobs (default: XDG state dir).
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
    /// Client-side permanent library (default: XDG data dir).
    #[serde(default)]
    pub library_dir: Option<PathBuf>,
    /// Optional retry policy; if missing, built-in defaults are used.
    #[serde(default)]
    pub retry: Option<RetryConfig>,
    #[serde(default)]
    pub poll: PollConfig,
}

impl Default for DlqConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            tick_interval_ms: 2_000,
            progress_interval_ms: 100,
            idempotency_ttl_secs: 24 * 60 * 60,
            cancel_timeout_secs: 30,
            work_dir: None,
            library_dir: None,
            retry: None,
            poll: PollConfig::default(),
        }
    }
}

impl DlqConfig {
    /// Reject values that cannot be turned into durations.
    pub fn validate(&self) -> Result<()> {
        if let Some(retry) = &self.retry {
            retry.base_delay()?;
        }
        Ok(())
    }

    /// Policy from `[retry]`. A base delay that fails [`validate`](Self::validate)
    /// falls back to the built-in default.
    pub fn retry_policy(&self) -> RetryPolicy {
        let retry = self.retry.clone().unwrap_or_default();
        RetryPolicy {
            max_retries: retry.max_retries,
            base_delay: retry
                .base_delay()
                .unwrap_or(RetryPolicy::default().base_delay),
            max_delay: Duration::from_secs(retry.max_delay_secs),
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    pub fn idempotency_ttl(&self) -> Duration {
        Duration::from_secs(self.idempotency_ttl_secs)
    }

    pub fn cancel_timeout(&self) -> Duration {
        Duration::from_secs(self.cancel_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll.interval_ms.max(1))
    }

    /// Scratch root: configured `work_dir` or `~/.local/state/dlq/work`.
    pub fn work_root(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.work_dir {
            return Ok(dir.clone());
        }
        let xdg_dirs = xdg::BaseDirectories::with_prefix("dlq")?;
        Ok(xdg_dirs.get_state_home().join("dlq").join("work"))
    }

    /// Library root: configured `library_dir` or `~/.local/share/dlq/library`.
    pub fn library_root(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.library_dir {
            return Ok(dir.clone());
        }
        let xdg_dirs = xdg::BaseDirectories::with_prefix("dlq")?;
        Ok(xdg_dirs.get_data_home().join("dlq").join("library"))
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("dlq")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<DlqConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = DlqConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: DlqConfig = toml::from_str(&data)?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}
