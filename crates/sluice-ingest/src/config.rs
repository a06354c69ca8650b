//! Process configuration
//!
//! Layered as defaults, then an optional TOML file, then `SLUICE__*`
//! environment variables (`SLUICE__SINK__URL`, `SLUICE__JOB__MAX_CONCURRENT_TASKS`).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::writer::{SinkKind, DEFAULT_BATCH_SIZE};

// ============================================================================
// Configuration Constants
// ============================================================================

/// Environment prefix for layered configuration.
pub const ENV_PREFIX: &str = "SLUICE";

/// Default sink connection timeout in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default number of partition tasks running at once.
pub const DEFAULT_MAX_CONCURRENT_TASKS: usize = 4;

/// Default job name when none is configured.
pub const DEFAULT_JOB_NAME: &str = "sluice";

/// Default directory for committed run state.
pub const DEFAULT_STATE_DIR: &str = ".sluice/state";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SluiceConfig {
    pub sink: SinkConfig,
    pub job: JobConfig,
}

/// Sink connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    pub kind: SinkKind,
    pub url: Option<String>,
    /// Database prepended to bare table names
    pub qualifier: Option<String>,
    pub batch_size: usize,
    pub connect_timeout_secs: u64,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            kind: SinkKind::default(),
            url: None,
            qualifier: None,
            batch_size: DEFAULT_BATCH_SIZE,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
        }
    }
}

/// Job runner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    pub name: String,
    pub max_concurrent_tasks: usize,
    pub state_dir: PathBuf,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_JOB_NAME.to_string(),
            max_concurrent_tasks: DEFAULT_MAX_CONCURRENT_TASKS,
            state_dir: PathBuf::from(DEFAULT_STATE_DIR),
        }
    }
}

impl SluiceConfig {
    /// Load `.env`, the optional config file and the environment
    pub fn load(file: Option<&Path>) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: SluiceConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.sink.batch_size == 0 {
            anyhow::bail!("sink.batch_size must be greater than 0");
        }

        if self.sink.connect_timeout_secs == 0 {
            anyhow::bail!("sink.connect_timeout_secs must be greater than 0");
        }

        if let Some(url) = &self.sink.url {
            if url.trim().is_empty() {
                anyhow::bail!("sink.url cannot be empty when set");
            }
        }

        if self.job.max_concurrent_tasks == 0 {
            anyhow::bail!("job.max_concurrent_tasks must be greater than 0");
        }

        if self.job.name.trim().is_empty() {
            anyhow::bail!("job.name cannot be empty");
        }

        Ok(())
    }
}
