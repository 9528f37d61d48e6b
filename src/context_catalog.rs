//! Context Catalog - CRUD over one association of a loaded catalog.
//!
//! The empty context name addresses the standalone plugins; any other name
//! addresses that context's server plugins. A view lives for one logical
//! operation: readers hold a snapshot, updaters hold the write lock until
//! they are unlocked or dropped.

use crate::catalog::{Catalog, CatalogStore, PluginAssociation};
use crate::error::{CatalogError, Result};
use crate::lock::FileLock;
use crate::types::{plugin_name_target, PluginInfo, Target};
use tracing::{debug, warn};

/// Read access to installed plugins
pub trait PluginCatalogReader {
    /// Look up a plugin by association key (`name` or `name_target`)
    fn get(&self, key: &str) -> Option<PluginInfo>;
    fn list(&self) -> Vec<PluginInfo>;
}

/// Write access; only obtainable with the catalog write lock held
pub trait PluginCatalogUpdater: PluginCatalogReader {
    fn upsert(&mut self, plugin: &PluginInfo) -> Result<()>;
    fn delete(&mut self, key: &str) -> Result<()>;
    /// Release the write lock. The view cannot be used afterwards.
    fn unlock(self)
    where
        Self: Sized;
}

/// A view over one association of the catalog
#[derive(Debug)]
pub struct ContextCatalog {
    store: CatalogStore,
    catalog: Catalog,
    context_name: String,
    lock: Option<FileLock>,
}

impl ContextCatalog {
    /// Read-only view for `context_name` ("" for standalone plugins)
    pub fn open(store: &CatalogStore, context_name: &str) -> Result<Self> {
        Self::new(store, context_name, false)
    }

    /// Updatable view; holds the exclusive catalog lock until unlocked
    pub fn open_for_update(store: &CatalogStore, context_name: &str) -> Result<Self> {
        Self::new(store, context_name, true)
    }

    fn new(store: &CatalogStore, context_name: &str, lock_catalog: bool) -> Result<Self> {
        let (catalog, lock) = store.load(lock_catalog)?;
        Ok(Self {
            store: store.clone(),
            catalog,
            context_name: context_name.to_string(),
            lock,
        })
    }

    pub fn context_name(&self) -> &str {
        &self.context_name
    }

    pub fn is_locked(&self) -> bool {
        self.lock.is_some()
    }

    fn association(&self) -> Option<&PluginAssociation> {
        self.catalog.association(&self.context_name)
    }

    fn save(&mut self) -> Result<()> {
        self.store.save(&self.catalog, self.lock.as_mut())
    }
}

impl PluginCatalogReader for ContextCatalog {
    fn get(&self, key: &str) -> Option<PluginInfo> {
        let path = self.association()?.get(key)?;
        self.catalog.index_by_path.get(path).cloned()
    }

    fn list(&self) -> Vec<PluginInfo> {
        let Some(association) = self.association() else {
            return Vec::new();
        };
        let (plugins, dangling) = self.catalog.resolve(association);
        for key in dangling {
            warn!(
                context = %self.context_name,
                plugin = %key,
                "catalog entry points at an unknown installation path, skipping"
            );
        }
        plugins
    }
}

impl PluginCatalogUpdater for ContextCatalog {
    fn upsert(&mut self, plugin: &PluginInfo) -> Result<()> {
        if self.lock.is_none() {
            return Err(CatalogError::NotLocked {
                operation: "upsert plugin",
            });
        }
        if plugin.name.trim().is_empty() {
            return Err(CatalogError::InvalidPlugin("plugin name is empty".into()));
        }
        if plugin.installation_path.trim().is_empty() {
            return Err(CatalogError::InvalidPlugin(format!(
                "plugin '{}' has no installation path",
                plugin.name
            )));
        }

        let key = plugin.key();
        let path = plugin.installation_path.as_str();
        let association = self.catalog.association_mut(&self.context_name);
        association.add(&plugin.name, plugin.target, path);

        // Older CLIs recorded global and kubernetes plugins under the unknown
        // target; both entries must never be visible at once.
        if plugin.target.overlaps_unknown() {
            association.remove(&plugin_name_target(&plugin.name, Target::Unknown));
        } else if plugin.target == Target::Unknown {
            association.remove(&plugin_name_target(&plugin.name, Target::Kubernetes));
            association.remove(&plugin_name_target(&plugin.name, Target::Global));
        }

        self.catalog
            .index_by_path
            .insert(path.to_string(), plugin.clone());
        self.catalog.index_name(&key, path);

        self.save()?;
        debug!(
            context = %self.context_name,
            plugin = %key,
            path = %path,
            "upserted plugin"
        );
        Ok(())
    }

    fn delete(&mut self, key: &str) -> Result<()> {
        if self.lock.is_none() {
            return Err(CatalogError::NotLocked {
                operation: "delete plugin",
            });
        }
        if self.context_name.is_empty() {
            self.catalog.stand_alone_plugins.remove(key);
        } else if let Some(association) = self.catalog.server_plugins.get_mut(&self.context_name) {
            association.remove(key);
        }
        self.save()?;
        debug!(context = %self.context_name, plugin = %key, "deleted plugin");
        Ok(())
    }

    fn unlock(self) {
        drop(self);
    }
}
