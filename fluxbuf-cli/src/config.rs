//! Forwarder configuration

use anyhow::{bail, Context, Result};
use fluxbuf_core::BufferConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Forwarder configuration, loaded from a JSON file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForwarderConfig {
    /// Directory receiving one file per flushed chunk
    pub output_dir: PathBuf,
    /// Tag attached to every record read from stdin
    pub tag: String,
    /// Width of a time bucket in seconds
    pub timekey: i64,
    /// Seconds to wait after a bucket ends before enqueueing it
    pub timekey_wait: i64,
    /// Records per buffer write
    pub batch_size: usize,
    /// Flusher and ticker period in milliseconds
    pub flush_interval_ms: u64,
    /// Delay before retrying a write rejected for lack of space
    pub retry_wait_ms: u64,
    /// Buffer settings
    pub buffer: BufferConfig,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("out"),
            tag: "stdin".into(),
            timekey: 60,
            timekey_wait: 10,
            batch_size: 100,
            flush_interval_ms: 1000,
            retry_wait_ms: 100,
            buffer: BufferConfig::default(),
        }
    }
}

impl ForwarderConfig {
    /// Load a config file; missing fields keep their defaults
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.timekey <= 0 {
            bail!("timekey must be positive, got {}", self.timekey);
        }
        if self.timekey_wait < 0 {
            bail!("timekey_wait must not be negative, got {}", self.timekey_wait);
        }
        if self.batch_size == 0 {
            bail!("batch_size must be positive");
        }
        if self.flush_interval_ms == 0 {
            bail!("flush_interval_ms must be positive");
        }
        self.buffer.validate()?;
        Ok(())
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn retry_wait(&self) -> Duration {
        Duration::from_millis(self.retry_wait_ms)
    }
}
