//! Catalog Store - the on-disk record of installed plugins.
//!
//! Layout of `catalog.yaml`:
//! - `indexByPath`: installation path -> full plugin record
//! - `indexByName`: `name` / `name_target` -> installation paths
//! - `standAlonePlugins`: plugins usable regardless of the active context
//! - `serverPlugins`: context name -> plugins scoped to that context
//!
//! Mutations happen under an exclusive lock on the file itself, held from
//! load until save so that read-modify-write is atomic across processes.

use crate::config::CatalogConfig;
use crate::error::{CatalogError, Result};
use crate::lock::FileLock;
use crate::types::{plugin_name_target, PluginInfo, Target};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Catalog file name inside the catalog cache directory
pub const CATALOG_FILE_NAME: &str = "catalog.yaml";

/// Schema version written by this build.
///
/// Older CLIs drop unknown fields when they rewrite the file, so a stored
/// version only describes the last writer.
pub const CURRENT_SCHEMA_VERSION: u32 = 2;

/// Maps an association key to one installation path
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct PluginAssociation(BTreeMap<String, String>);

impl PluginAssociation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the entry for `name`/`target`
    pub fn add(&mut self, name: &str, target: Target, installation_path: &str) {
        self.0.insert(
            plugin_name_target(name, target),
            installation_path.to_string(),
        );
    }

    pub fn insert_key(&mut self, key: &str, installation_path: &str) {
        self.0.insert(key.to_string(), installation_path.to_string());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(|s| s.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'de> Deserialize<'de> for PluginAssociation {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        nullable(deserializer).map(Self)
    }
}

/// Root persisted structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Catalog {
    #[serde(default, skip_serializing_if = "is_zero")]
    pub schema_version: u32,
    #[serde(default, deserialize_with = "nullable")]
    pub index_by_path: BTreeMap<String, PluginInfo>,
    #[serde(default, deserialize_with = "nullable")]
    pub index_by_name: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub stand_alone_plugins: PluginAssociation,
    #[serde(default, deserialize_with = "nullable")]
    pub server_plugins: BTreeMap<String, PluginAssociation>,
}

fn is_zero(v: &u32) -> bool {
    *v == 0
}

/// Treat an explicit YAML `null` the same as an absent map.
fn nullable<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl Catalog {
    /// Decode catalog YAML. Blank content is an empty catalog.
    pub fn decode(content: &str) -> std::result::Result<Self, serde_yaml::Error> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content)
    }

    pub fn encode(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|source| CatalogError::Encode { source })
    }

    /// Association for `context_name`; the empty name is the standalone one.
    pub fn association(&self, context_name: &str) -> Option<&PluginAssociation> {
        if context_name.is_empty() {
            Some(&self.stand_alone_plugins)
        } else {
            self.server_plugins.get(context_name)
        }
    }

    /// Like [`Catalog::association`], creating the server entry if missing.
    pub fn association_mut(&mut self, context_name: &str) -> &mut PluginAssociation {
        if context_name.is_empty() {
            &mut self.stand_alone_plugins
        } else {
            self.server_plugins
                .entry(context_name.to_string())
                .or_default()
        }
    }

    /// Resolve every entry of an association through `indexByPath`.
    ///
    /// Entries whose path has no record are reported in the second vector.
    pub fn resolve(&self, association: &PluginAssociation) -> (Vec<PluginInfo>, Vec<String>) {
        let mut plugins = Vec::with_capacity(association.len());
        let mut dangling = Vec::new();
        for (key, path) in association.iter() {
            match self.index_by_path.get(path) {
                Some(info) => plugins.push(info.clone()),
                None => dangling.push(key.to_string()),
            }
        }
        (plugins, dangling)
    }

    /// Plugin addressed by an association key in `context_name`, or else by
    /// its installation path
    pub fn find(&self, context_name: &str, key_or_path: &str) -> Option<&PluginInfo> {
        self.association(context_name)
            .and_then(|association| association.get(key_or_path))
            .and_then(|path| self.index_by_path.get(path))
            .or_else(|| self.index_by_path.get(key_or_path))
    }

    /// Plugins referenced by any association, standalone first, each
    /// installation path once
    pub fn all_plugins(&self) -> Vec<PluginInfo> {
        let mut seen = HashSet::new();
        std::iter::once(&self.stand_alone_plugins)
            .chain(self.server_plugins.values())
            .flat_map(|association| self.resolve(association).0)
            .filter(|plugin| seen.insert(plugin.installation_path.clone()))
            .collect()
    }

    /// Record `path` under `key` in `indexByName` unless already present
    pub fn index_name(&mut self, key: &str, path: &str) {
        let paths = self.index_by_name.entry(key.to_string()).or_default();
        if !paths.iter().any(|p| p == path) {
            paths.push(path.to_string());
        }
    }
}

/// Reads and writes `catalog.yaml` under one cache directory
#[derive(Debug, Clone)]
pub struct CatalogStore {
    path: PathBuf,
    lock_timeout: Option<Duration>,
}

impl CatalogStore {
    pub fn new(config: &CatalogConfig) -> Self {
        Self {
            path: config.catalog_cache_dir.join(CATALOG_FILE_NAME),
            lock_timeout: config.lock_timeout(),
        }
    }

    /// Store rooted at `dir`, waiting indefinitely for locks
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            path: dir.join(CATALOG_FILE_NAME),
            lock_timeout: None,
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the catalog.
    ///
    /// With `acquire_write_lock` the exclusive lock is returned and must be
    /// kept until [`CatalogStore::save`]. Otherwise the file is read under a
    /// transient shared lock. A missing file yields an empty catalog.
    pub fn load(&self, acquire_write_lock: bool) -> Result<(Catalog, Option<FileLock>)> {
        if acquire_write_lock {
            let mut lock = FileLock::acquire_exclusive(&self.path, self.lock_timeout)?;
            let content = lock.read_to_string()?;
            let catalog = self.decode(&content)?;
            return Ok((catalog, Some(lock)));
        }

        let Some(mut lock) = FileLock::acquire_shared(&self.path, self.lock_timeout)? else {
            debug!(path = %self.path.display(), "no catalog file, starting empty");
            return Ok((Catalog::default(), None));
        };
        let content = lock.read_to_string()?;
        lock.release();
        Ok((self.decode(&content)?, None))
    }

    /// Persist `catalog` through the write lock obtained from [`CatalogStore::load`]
    pub fn save(&self, catalog: &Catalog, lock: Option<&mut FileLock>) -> Result<()> {
        let lock = match lock {
            Some(lock) if lock.path() == self.path => lock,
            _ => {
                return Err(CatalogError::NotLocked {
                    operation: "save catalog",
                })
            }
        };
        let yaml = catalog.encode()?;
        lock.rewrite(yaml.as_bytes())?;
        debug!(
            path = %self.path.display(),
            plugins = catalog.index_by_path.len(),
            "saved catalog"
        );
        Ok(())
    }

    /// Delete the catalog file. A missing file is not an error.
    pub fn clean(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CatalogError::io("remove catalog", &self.path, e)),
        }
    }

    fn decode(&self, content: &str) -> Result<Catalog> {
        Catalog::decode(content).map_err(|source| CatalogError::Decode {
            path: self.path.clone(),
            source,
        })
    }
}
