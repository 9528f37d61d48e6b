//! Configuration loader.
//!
//! Loads configuration from:
//! 1. Default values (platform cache/config directories)
//! 2. `<config dir>/plugin-catalog/settings.yaml`
//! 3. Environment variables with `PLUGIN_CATALOG_` prefix
//!
//! Nothing here is process-global: components receive a `CatalogConfig`.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_DIR: &str = "plugin-catalog";
const COMMAND_TREE_DIR: &str = "plugin_command_tree";

/// Paths and behaviour switches for the catalog subsystem
#[derive(Debug, Deserialize, Clone)]
pub struct CatalogConfig {
    /// Directory holding `catalog.yaml`
    pub catalog_cache_dir: PathBuf,
    /// Directory holding the command-tree cache; defaults under the catalog dir
    #[serde(default)]
    pub command_tree_cache_dir: Option<PathBuf>,
    /// Client configuration listing the active contexts
    pub client_config_path: PathBuf,
    /// Seconds to wait for a file lock; 0 waits forever
    #[serde(default = "default_lock_timeout_secs")]
    pub lock_timeout_secs: u64,
    /// Prefer standalone plugins over context-scoped ones with the same name/target
    #[serde(default)]
    pub standalone_over_context_plugins: bool,
}

fn default_lock_timeout_secs() -> u64 {
    60
}

fn default_catalog_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|d| d.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from(".cache").join(APP_DIR))
}

fn default_client_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from(".config").join(APP_DIR))
        .join("config.yaml")
}

fn default_settings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_DIR).join("settings.yaml"))
}

impl CatalogConfig {
    /// Everything under `root`; used by tests and sandboxed runs.
    pub fn for_root(root: &Path) -> Self {
        Self {
            catalog_cache_dir: root.to_path_buf(),
            command_tree_cache_dir: Some(root.join(COMMAND_TREE_DIR)),
            client_config_path: root.join("config.yaml"),
            lock_timeout_secs: 10,
            standalone_over_context_plugins: false,
        }
    }

    pub fn command_tree_dir(&self) -> PathBuf {
        self.command_tree_cache_dir
            .clone()
            .unwrap_or_else(|| self.catalog_cache_dir.join(COMMAND_TREE_DIR))
    }

    pub fn lock_timeout(&self) -> Option<Duration> {
        match self.lock_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

/// Load configuration from all sources
pub fn load_config() -> Result<CatalogConfig, ConfigError> {
    load_config_from(default_settings_path().as_deref())
}

/// Load configuration using `settings` as the optional settings file
pub fn load_config_from(settings: Option<&Path>) -> Result<CatalogConfig, ConfigError> {
    let mut builder = Config::builder()
        .set_default(
            "catalog_cache_dir",
            default_catalog_cache_dir().to_string_lossy().to_string(),
        )?
        .set_default(
            "client_config_path",
            default_client_config_path().to_string_lossy().to_string(),
        )?
        .set_default("lock_timeout_secs", default_lock_timeout_secs())?
        .set_default("standalone_over_context_plugins", false)?;

    if let Some(path) = settings {
        if path.exists() {
            builder = builder.add_source(File::from(path.to_path_buf()).required(false));
        }
    }

    // e.g. PLUGIN_CATALOG_CATALOG_CACHE_DIR=/tmp/cache,
    // PLUGIN_CATALOG_STANDALONE_OVER_CONTEXT_PLUGINS=true
    builder = builder.add_source(Environment::with_prefix("PLUGIN_CATALOG").try_parsing(true));

    builder.build()?.try_deserialize()
}
