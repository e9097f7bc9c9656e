use anyhow::{Context, Result};
use confyg::{env, Confygery};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::index::IndexSettings;
use crate::path::PathFinderConfig;

/// Configuration for sonority.
///
/// Configuration is loaded from multiple sources with the following priority:
/// 1. CLI arguments (highest priority)
/// 2. Environment variables (SONORITY_* prefix)
/// 3. Config file (~/.config/sonority/config.toml)
/// 4. Built-in defaults (lowest priority)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to the SQLite database.
    ///
    /// Can be set via:
    /// - CLI: --db /path/to/db
    /// - ENV: SONORITY_DATABASE_PATH
    /// - Config: database_path = "/path/to/db"
    /// - Default: ~/.local/share/sonority/sonority.db
    #[serde(default = "default_db_path")]
    pub database_path: PathBuf,

    /// Directory holding built index artifacts.
    ///
    /// Can be set via:
    /// - CLI: --index-dir /path/to/dir
    /// - ENV: SONORITY_INDEX_DIR
    /// - Default: ~/.local/share/sonority/indices
    #[serde(default = "default_index_dir")]
    pub index_dir: PathBuf,

    /// Optional TOML file replacing the built-in metric catalog.
    #[serde(default)]
    pub catalog_path: Option<PathBuf>,

    /// Commit unit for vector computation.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default)]
    pub stats: StatsConfig,

    #[serde(default)]
    pub index: IndexSettings,

    #[serde(default)]
    pub path: PathFinderConfig,
}

/// Settings for normalization statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    /// Number of documents sampled by default.
    pub sample_size: u64,

    /// Smallest accepted sample, as a fraction of all documents.
    pub min_sample_fraction: f64,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            sample_size: 10_000,
            min_sample_fraction: 0.01,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: default_db_path(),
            index_dir: default_index_dir(),
            catalog_path: None,
            batch_size: default_batch_size(),
            stats: StatsConfig::default(),
            index: IndexSettings::default(),
            path: PathFinderConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment variables.
    ///
    /// Searches for config file at: ~/.config/sonority/config.toml
    /// Reads environment variables with SONORITY_ prefix.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        let config_path = config_file_path();

        let mut builder = Confygery::new()
            .context("Failed to create config builder")?;

        if config_path.exists() {
            let path_str = config_path.to_str()
                .ok_or_else(|| anyhow::anyhow!("Config path contains invalid UTF-8"))?;
            builder.add_file(path_str)
                .context("Failed to load config file")?;
        }

        let env_opts = env::Options::with_top_level("sonority");
        builder.add_env(env_opts)
            .context("Failed to load environment variables")?;

        let config: Self = builder.build()
            .context("Failed to build configuration")?;

        Ok(config)
    }

    /// Override the database and index locations given on the command line.
    #[must_use]
    pub fn with_overrides(mut self, db_path: Option<PathBuf>, index_dir: Option<PathBuf>) -> Self {
        if let Some(db_path) = db_path {
            self.database_path = db_path;
        }
        if let Some(index_dir) = index_dir {
            self.index_dir = index_dir;
        }
        self
    }
}

fn default_batch_size() -> usize {
    10_000
}

fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sonority")
}

/// Get the default database path.
///
/// Returns: ~/.local/share/sonority/sonority.db (or platform equivalent)
fn default_db_path() -> PathBuf {
    data_dir().join("sonority.db")
}

fn default_index_dir() -> PathBuf {
    data_dir().join("indices")
}

/// Get the config file path.
///
/// Returns:
/// - Linux: ~/.config/sonority/config.toml
/// - macOS: ~/Library/Application Support/sonority/config.toml
/// - Windows: %APPDATA%\sonority\config.toml
pub fn config_file_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sonority")
        .join("config.toml")
}

/// Get the example config file content.
pub fn example_config() -> &'static str {
    r#"# Sonority Configuration File
#
# Configuration is loaded from multiple sources with the following priority:
# 1. CLI arguments (highest priority)
# 2. Environment variables (SONORITY_* prefix)
# 3. This config file
# 4. Built-in defaults (lowest priority)

# Path to the SQLite database holding submissions, vectors and stats
#database_path = "/path/to/custom/sonority.db"

# Directory for built index artifacts (<metric>_<distance>_<trees>.ann)
#index_dir = "/path/to/indices"

# Replace the built-in metric catalog with definitions from a TOML file
#catalog_path = "/path/to/metrics.toml"

# Number of recordings committed per transaction when computing vectors
batch_size = 10000

[stats]
# Documents sampled to estimate per-metric mean and standard deviation
sample_size = 10000
# Samples smaller than this fraction of all documents are rejected
min_sample_fraction = 0.01

[index]
default_distance = "angular"
default_trees = 10
leaf_size = 32
# Fix the build randomness for reproducible indexes
#seed = 42

[path]
initial_neighbours = 55
growth_factor = 2.0
max_stall_steps = 3
sample_fraction = 0.7
#seed = 42
"#
}

/// Create default config file if it doesn't exist.
///
/// Returns true if a new file was created, false if it already existed.
pub fn ensure_config_file() -> Result<bool> {
    let config_path = config_file_path();

    if config_path.exists() {
        return Ok(false);
    }

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)
            .context("Failed to create config directory")?;
    }

    std::fs::write(&config_path, example_config())
        .context("Failed to write config file")?;

    Ok(true)
}
