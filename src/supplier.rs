//! Plugin Supplier - the effective list of installed plugins.
//!
//! Combines the standalone plugins with the plugins of every active context,
//! resolves standalone/context collisions and drops plugins whose supported
//! context types are all inactive.

use crate::catalog::CatalogStore;
use crate::config::CatalogConfig;
use crate::context_catalog::{ContextCatalog, PluginCatalogReader};
use crate::contexts::ActiveContexts;
use crate::error::Result;
use crate::types::{PluginInfo, Target};
use std::collections::HashSet;
use tracing::{debug, warn};

pub trait PluginSupplier {
    fn get_installed_plugins(&self) -> Result<Vec<PluginInfo>>;
}

/// Supplies installed plugins from the catalog
pub struct InstalledPluginSupplier<'a> {
    store: CatalogStore,
    contexts: &'a dyn ActiveContexts,
    standalone_over_context: bool,
}

impl<'a> InstalledPluginSupplier<'a> {
    pub fn new(config: &CatalogConfig, contexts: &'a dyn ActiveContexts) -> Self {
        Self {
            store: CatalogStore::new(config),
            contexts,
            standalone_over_context: config.standalone_over_context_plugins,
        }
    }

    pub fn with_store(store: CatalogStore, contexts: &'a dyn ActiveContexts) -> Self {
        Self {
            store,
            contexts,
            standalone_over_context: false,
        }
    }

    /// Let standalone plugins win over context plugins with the same name/target
    pub fn standalone_over_context(mut self, enabled: bool) -> Self {
        self.standalone_over_context = enabled;
        self
    }

    pub fn get_installed_standalone_plugins(&self) -> Result<Vec<PluginInfo>> {
        Ok(ContextCatalog::open(&self.store, "")?.list())
    }

    /// Plugins of every active context, concatenated in context-name order
    pub fn get_installed_server_plugins(&self) -> Result<Vec<PluginInfo>> {
        let names = self.contexts.active_context_names()?;
        if names.is_empty() {
            return Ok(Vec::new());
        }
        // One snapshot serves every context
        let (catalog, _) = self.store.load(false)?;
        let mut plugins = Vec::new();
        for name in names {
            let Some(association) = catalog.association(&name) else {
                continue;
            };
            let (resolved, dangling) = catalog.resolve(association);
            for key in dangling {
                warn!(
                    context = %name,
                    plugin = %key,
                    "catalog entry points at an unknown installation path, skipping"
                );
            }
            plugins.extend(resolved);
        }
        Ok(plugins)
    }

    /// Whether a plugin with this name and target is visible to the CLI
    pub fn is_plugin_installed(&self, name: &str, target: Target) -> Result<bool> {
        Ok(self
            .get_installed_plugins()?
            .iter()
            .any(|p| p.name == name && p.target == target))
    }
}

impl PluginSupplier for InstalledPluginSupplier<'_> {
    fn get_installed_plugins(&self) -> Result<Vec<PluginInfo>> {
        let mut standalone = self.get_installed_standalone_plugins()?;
        let mut server = self.get_installed_server_plugins()?;

        if self.standalone_over_context {
            server = remove_duplicates(server, &standalone);
        } else {
            standalone = remove_duplicates(standalone, &server);
        }
        debug!(
            server = server.len(),
            standalone = standalone.len(),
            "resolved installed plugins"
        );

        server.extend(standalone);
        filter_plugins_by_active_context_type(server, self.contexts)
    }
}

/// Drop from `plugins` every entry whose name and target appear in `winners`
fn remove_duplicates(plugins: Vec<PluginInfo>, winners: &[PluginInfo]) -> Vec<PluginInfo> {
    let taken: HashSet<(&str, Target)> = winners
        .iter()
        .map(|p| (p.name.as_str(), p.target))
        .collect();
    plugins
        .into_iter()
        .filter(|p| !taken.contains(&(p.name.as_str(), p.target)))
        .collect()
}

/// Keep plugins that are unrestricted or support at least one active context type
pub fn filter_plugins_by_active_context_type(
    plugins: Vec<PluginInfo>,
    contexts: &dyn ActiveContexts,
) -> Result<Vec<PluginInfo>> {
    let active = contexts.active_context_types()?;
    Ok(plugins
        .into_iter()
        .filter(|p| {
            p.supported_context_type.is_empty()
                || p
                    .supported_context_type
                    .iter()
                    .any(|ct| active.contains_key(ct))
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context_catalog::PluginCatalogUpdater;
    use crate::contexts::ClientConfig;
    use crate::types::ContextType;
    use tempfile::TempDir;

    fn install(store: &CatalogStore, context: &str, plugin: &PluginInfo) {
        let mut cc = ContextCatalog::open_for_update(store, context).unwrap();
        cc.upsert(plugin).unwrap();
        cc.unlock();
    }

    fn plugin(name: &str, target: Target, origin: &str) -> PluginInfo {
        let mut info = PluginInfo::new(name, target, &format!("/{}/{}/{}", origin, name, target));
        info.discovery = origin.to_string();
        info
    }

    #[test]
    fn test_context_plugin_wins_by_default() {
        let dir = TempDir::new().unwrap();
        let store = CatalogStore::in_dir(dir.path());
        install(&store, "", &plugin("cluster", Target::Kubernetes, "standalone"));
        install(&store, "prod", &plugin("cluster", Target::Kubernetes, "context"));

        let contexts = ClientConfig::with_active([(ContextType::Kubernetes, "prod")]);
        let supplier = InstalledPluginSupplier::with_store(store, &contexts);
        let plugins = supplier.get_installed_plugins().unwrap();

        assert_eq!(plugins.len(), 1);
        assert_eq!(plugins[0].discovery, "context");
    }

    #[test]
    fn test_standalone_wins_when_toggled() {
        let dir = TempDir::new().unwrap();
        let store = CatalogStore::in_dir(dir.path());
        install(&store, "", &plugin("cluster", Target::Kubernetes, "standalone"));
        install(&store, "prod", &plugin("cluster", Target::Kubernetes, "context"));

        let contexts = ClientConfig::with_active([(ContextType::Kubernetes, "prod")]);
        let supplier =
            InstalledPluginSupplier::with_store(store, &contexts).standalone_over_context(true);
        let plugins = supplier.get_installed_plugins().unwrap();

        assert_eq!(plugins.len(), 1);
        assert_eq!(plugins[0].discovery, "standalone");
    }

    #[test]
    fn test_no_active_contexts_returns_standalone() {
        let dir = TempDir::new().unwrap();
        let store = CatalogStore::in_dir(dir.path());
        install(&store, "", &plugin("login", Target::Global, "standalone"));
        install(&store, "prod", &plugin("cluster", Target::Kubernetes, "context"));

        let contexts = ClientConfig::default();
        let supplier = InstalledPluginSupplier::with_store(store, &contexts);
        assert!(supplier.get_installed_server_plugins().unwrap().is_empty());

        let plugins = supplier.get_installed_plugins().unwrap();
        assert_eq!(plugins.len(), 1);
        assert_eq!(plugins[0].name, "login");
        assert!(supplier.is_plugin_installed("login", Target::Global).unwrap());
        assert!(!supplier
            .is_plugin_installed("cluster", Target::Kubernetes)
            .unwrap());
    }

    #[test]
    fn test_same_plugin_in_two_contexts_is_kept_twice() {
        let dir = TempDir::new().unwrap();
        let store = CatalogStore::in_dir(dir.path());
        install(&store, "prod", &plugin("cluster", Target::Kubernetes, "prod"));
        install(&store, "saas", &plugin("cluster", Target::Kubernetes, "saas"));

        let contexts = ClientConfig::with_active([
            (ContextType::Kubernetes, "prod"),
            (ContextType::MissionControl, "saas"),
        ]);
        let supplier = InstalledPluginSupplier::with_store(store, &contexts);
        let plugins = supplier.get_installed_plugins().unwrap();
        assert_eq!(plugins.len(), 2);
    }

    #[test]
    fn test_server_plugins_listed_before_standalone() {
        let dir = TempDir::new().unwrap();
        let store = CatalogStore::in_dir(dir.path());
        install(&store, "", &plugin("login", Target::Global, "standalone"));
        install(&store, "prod", &plugin("cluster", Target::Kubernetes, "context"));

        let contexts = ClientConfig::with_active([(ContextType::Kubernetes, "prod")]);
        let supplier = InstalledPluginSupplier::with_store(store, &contexts);
        let names: Vec<String> = supplier
            .get_installed_plugins()
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["cluster", "login"]);
    }

    #[test]
    fn test_dangling_server_entries_are_skipped() {
        let dir = TempDir::new().unwrap();
        let store = CatalogStore::in_dir(dir.path());
        let p = plugin("cluster", Target::Kubernetes, "context");
        install(&store, "prod", &p);

        let (mut catalog, mut lock) = store.load(true).unwrap();
        catalog
            .association_mut("prod")
            .insert_key("ghost_kubernetes", "/nowhere");
        store.save(&catalog, lock.as_mut()).unwrap();
        drop(lock);

        let contexts = ClientConfig::with_active([(ContextType::Kubernetes, "prod")]);
        let supplier = InstalledPluginSupplier::with_store(store, &contexts);
        assert_eq!(supplier.get_installed_server_plugins().unwrap(), vec![p]);
    }

    #[test]
    fn test_context_type_filter() {
        let mut restricted = plugin("cluster", Target::Kubernetes, "standalone");
        restricted.supported_context_type = vec![ContextType::Kubernetes];
        let open = plugin("login", Target::Global, "standalone");

        let none = ClientConfig::default();
        let kept =
            filter_plugins_by_active_context_type(vec![restricted.clone(), open.clone()], &none)
                .unwrap();
        assert_eq!(kept, vec![open.clone()]);

        let tmc_only = ClientConfig::with_active([(ContextType::MissionControl, "saas")]);
        let kept = filter_plugins_by_active_context_type(
            vec![restricted.clone(), open.clone()],
            &tmc_only,
        )
        .unwrap();
        assert_eq!(kept, vec![open.clone()]);

        let k8s = ClientConfig::with_active([(ContextType::Kubernetes, "prod")]);
        let kept =
            filter_plugins_by_active_context_type(vec![restricted.clone(), open.clone()], &k8s)
                .unwrap();
        assert_eq!(kept, vec![restricted, open]);
    }

    #[test]
    fn test_supplier_applies_context_type_filter() {
        let dir = TempDir::new().unwrap();
        let store = CatalogStore::in_dir(dir.path());
        let mut restricted = plugin("cluster", Target::Kubernetes, "standalone");
        restricted.supported_context_type = vec![ContextType::Kubernetes];
        install(&store, "", &restricted);

        let none = ClientConfig::default();
        let supplier = InstalledPluginSupplier::with_store(store.clone(), &none);
        assert!(supplier.get_installed_plugins().unwrap().is_empty());

        let k8s = ClientConfig::with_active([(ContextType::Kubernetes, "prod")]);
        let supplier = InstalledPluginSupplier::with_store(store, &k8s);
        assert_eq!(supplier.get_installed_plugins().unwrap(), vec![restricted]);
    }
}
