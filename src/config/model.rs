// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value as JsonValue;

/// Top-level configuration as read from a TOML file, before validation.
///
/// ```toml
/// [pool]
/// workers = 4
/// job_timeout = "10m"
///
/// [[provider]]
/// name = "sweep"
/// tree = "model.json"
///
/// [[provider.job]]
/// name = "quick"
/// steps = 4
/// step_ms = 50
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub pool: RawPoolSection,

    #[serde(default)]
    pub provider: Vec<ProviderConfig>,
}

/// `[pool]` section as written.
#[derive(Debug, Clone, Deserialize)]
pub struct RawPoolSection {
    /// Absent or 0 means "resolve automatically".
    #[serde(default)]
    pub workers: Option<usize>,

    /// Per-job timeout, e.g. `"500ms"`, `"30s"`, `"10m"`, `"1h"`.
    #[serde(default)]
    pub job_timeout: Option<String>,

    /// Kill orphaned workers left over from an earlier coordinator.
    #[serde(default = "default_reap_strays")]
    pub reap_strays: bool,

    /// Worker executable; defaults to the running executable.
    #[serde(default)]
    pub worker_exe: Option<PathBuf>,
}

fn default_reap_strays() -> bool {
    true
}

impl Default for RawPoolSection {
    fn default() -> Self {
        Self {
            workers: None,
            job_timeout: None,
            reap_strays: default_reap_strays(),
            worker_exe: None,
        }
    }
}

/// `[[provider]]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderConfig {
    pub name: String,

    /// JSON model tree whose `Simulation` nodes become jobs. Relative paths
    /// resolve against the config file's directory.
    #[serde(default)]
    pub tree: Option<PathBuf>,

    #[serde(default)]
    pub job: Vec<JobConfig>,
}

/// `[[provider.job]]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct JobConfig {
    pub name: String,

    #[serde(default = "default_steps")]
    pub steps: u64,

    #[serde(default)]
    pub step_ms: u64,

    /// Shell command the worker runs instead of simulated steps.
    #[serde(default)]
    pub command: Option<String>,

    /// Make the job fail with this message.
    #[serde(default)]
    pub fail: Option<String>,

    /// Filler job: executed but never tracked for progress.
    #[serde(default)]
    pub noop: bool,

    /// Extra node properties passed through to the worker untouched.
    #[serde(default)]
    pub properties: BTreeMap<String, JsonValue>,
}

fn default_steps() -> u64 {
    1
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            steps: default_steps(),
            step_ms: 0,
            command: None,
            fail: None,
            noop: false,
            properties: BTreeMap::new(),
        }
    }
}

/// Validated `[pool]` settings.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub workers: Option<usize>,
    pub job_timeout: Option<Duration>,
    pub reap_strays: bool,
    pub worker_exe: Option<PathBuf>,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            workers: None,
            job_timeout: None,
            reap_strays: default_reap_strays(),
            worker_exe: None,
        }
    }
}

/// A validated configuration.
///
/// Only obtainable through `TryFrom<RawConfigFile>` (see `validate.rs`),
/// so holding one means the invariants checked there hold.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub pool: PoolSettings,
    pub providers: Vec<ProviderConfig>,
    /// Directory relative `tree` paths resolve against.
    pub base_dir: PathBuf,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(pool: PoolSettings, providers: Vec<ProviderConfig>) -> Self {
        Self {
            pool,
            providers,
            base_dir: PathBuf::from("."),
        }
    }

    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = dir.into();
        self
    }
}
