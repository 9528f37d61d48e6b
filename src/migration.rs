//! Startup repair of catalogs written by older CLI versions.
//!
//! Each step is idempotent and runs on one locked snapshot that is saved
//! exactly once. Failures are logged and swallowed: a damaged catalog must
//! never prevent the CLI from starting.

use crate::catalog::{Catalog, CatalogStore, PluginAssociation, CURRENT_SCHEMA_VERSION};
use crate::contexts::ActiveContexts;
use crate::error::Result;
use crate::types::{plugin_name_target, PluginInfo, Target};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// One ordered repair step
pub struct MigrationStep {
    /// Schema version that introduced the step
    pub version: u32,
    pub name: &'static str,
    apply: fn(&mut Catalog, &[String]) -> bool,
}

impl MigrationStep {
    /// Apply to `catalog`; returns whether anything changed
    pub fn apply(&self, catalog: &mut Catalog, active_contexts: &[String]) -> bool {
        (self.apply)(catalog, active_contexts)
    }
}

/// All steps, oldest first.
///
/// The stored schema version is not used to skip steps: an older CLI
/// rewriting the file drops it and may reintroduce legacy entries.
pub const MIGRATIONS: &[MigrationStep] = &[
    MigrationStep {
        version: 1,
        name: "delete-incorrect-unknown-entries",
        apply: delete_incorrect_entries,
    },
    MigrationStep {
        version: 2,
        name: "migrate-context-plugins-to-standalone",
        apply: move_context_plugins_to_standalone,
    },
];

/// Drop unknown-target entries shadowed by a global or kubernetes entry of
/// the same name in the same association.
fn prune_unknown_entries(
    association: &mut PluginAssociation,
    index_by_path: &BTreeMap<String, PluginInfo>,
) -> bool {
    let stale: Vec<String> = association
        .iter()
        .filter_map(|(_, path)| index_by_path.get(path))
        .filter(|plugin| plugin.target.overlaps_unknown())
        .map(|plugin| plugin_name_target(&plugin.name, Target::Unknown))
        .collect();

    let mut changed = false;
    for key in stale {
        if association.remove(&key).is_some() {
            debug!(plugin = %key, "removed legacy unknown-target entry");
            changed = true;
        }
    }
    changed
}

fn delete_incorrect_entries(catalog: &mut Catalog, _active_contexts: &[String]) -> bool {
    let mut changed = prune_unknown_entries(&mut catalog.stand_alone_plugins, &catalog.index_by_path);
    for association in catalog.server_plugins.values_mut() {
        changed |= prune_unknown_entries(association, &catalog.index_by_path);
    }
    changed
}

fn move_context_plugins_to_standalone(catalog: &mut Catalog, active_contexts: &[String]) -> bool {
    let mut changed = false;
    for context in active_contexts {
        let Some(association) = catalog.server_plugins.remove(context) else {
            continue;
        };
        for (key, path) in association.iter() {
            catalog.stand_alone_plugins.insert_key(key, path);
        }
        info!(
            context = %context,
            count = association.len(),
            "moved context plugins to standalone"
        );
        changed = true;
    }
    if changed {
        prune_unknown_entries(&mut catalog.stand_alone_plugins, &catalog.index_by_path);
    }
    changed
}

fn apply_steps(
    store: &CatalogStore,
    steps: &[&MigrationStep],
    contexts: &dyn ActiveContexts,
    stamp_version: bool,
) -> Result<Vec<&'static str>> {
    let active = contexts.active_context_names()?;
    let (mut catalog, mut lock) = store.load(true)?;

    let mut applied = Vec::new();
    for step in steps {
        if step.apply(&mut catalog, &active) {
            applied.push(step.name);
        }
    }
    if stamp_version {
        catalog.schema_version = CURRENT_SCHEMA_VERSION;
    }
    store.save(&catalog, lock.as_mut())?;
    Ok(applied)
}

fn run_best_effort(
    what: &str,
    store: &CatalogStore,
    steps: &[&MigrationStep],
    contexts: &dyn ActiveContexts,
    stamp_version: bool,
) -> Vec<&'static str> {
    match apply_steps(store, steps, contexts, stamp_version) {
        Ok(applied) => {
            if !applied.is_empty() {
                info!(steps = ?applied, "catalog {} changed entries", what);
            }
            applied
        }
        Err(e) => {
            warn!(error = %e, path = %store.path().display(), "catalog {} skipped", what);
            Vec::new()
        }
    }
}

/// Run every migration step and stamp the current schema version.
///
/// Returns the names of steps that changed the catalog.
pub fn run_startup_migrations(
    store: &CatalogStore,
    contexts: &dyn ActiveContexts,
) -> Vec<&'static str> {
    let steps: Vec<&MigrationStep> = MIGRATIONS.iter().collect();
    run_best_effort("migration", store, &steps, contexts, true)
}

/// Remove unknown-target entries that coexist with a same-name global or
/// kubernetes entry, in every association.
pub fn delete_incorrect_plugin_entries_from_catalog(store: &CatalogStore) {
    run_best_effort("cleanup", store, &[&MIGRATIONS[0]], &NoContexts, false);
}

/// Move the plugins of every active context into the standalone plugins and
/// drop those contexts' associations.
pub fn migrate_context_plugins_as_standalone_if_needed(
    store: &CatalogStore,
    contexts: &dyn ActiveContexts,
) {
    run_best_effort("context migration", store, &[&MIGRATIONS[1]], contexts, false);
}

struct NoContexts;

impl ActiveContexts for NoContexts {
    fn active_context_names(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    fn active_context_types(&self) -> Result<BTreeMap<crate::types::ContextType, String>> {
        Ok(BTreeMap::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contexts::ClientConfig;
    use crate::error::CatalogError;
    use crate::types::ContextType;
    use std::fs;
    use tempfile::TempDir;

    fn record(catalog: &mut Catalog, context: &str, name: &str, target: Target) -> String {
        let path = format!("/plugins/{}/{}/{}", context, name, target);
        let info = PluginInfo::new(name, target, &path);
        catalog.index_by_path.insert(path.clone(), info);
        catalog.association_mut(context).add(name, target, &path);
        path
    }

    fn write(store: &CatalogStore, catalog: &Catalog) {
        let (_, mut lock) = store.load(true).unwrap();
        store.save(catalog, lock.as_mut()).unwrap();
    }

    fn read(store: &CatalogStore) -> Catalog {
        store.load(false).unwrap().0
    }

    #[test]
    fn test_delete_incorrect_entries_everywhere() {
        let dir = TempDir::new().unwrap();
        let store = CatalogStore::in_dir(dir.path());

        let mut catalog = Catalog::default();
        record(&mut catalog, "", "cluster", Target::Unknown);
        record(&mut catalog, "", "cluster", Target::Kubernetes);
        record(&mut catalog, "", "login", Target::Unknown);
        record(&mut catalog, "prod", "secret", Target::Unknown);
        record(&mut catalog, "prod", "secret", Target::Global);
        record(&mut catalog, "prod", "apply", Target::Unknown);
        record(&mut catalog, "prod", "apply", Target::MissionControl);
        write(&store, &catalog);

        delete_incorrect_plugin_entries_from_catalog(&store);

        let repaired = read(&store);
        let standalone = &repaired.stand_alone_plugins;
        assert!(!standalone.contains_key("cluster"));
        assert!(standalone.contains_key("cluster_kubernetes"));
        assert!(standalone.contains_key("login"));

        let prod = &repaired.server_plugins["prod"];
        assert!(!prod.contains_key("secret"));
        assert!(prod.contains_key("secret_global"));
        assert!(prod.contains_key("apply"));
        assert!(prod.contains_key("apply_mission-control"));

        // Records are never dropped from the path index
        assert_eq!(repaired.index_by_path.len(), catalog.index_by_path.len());
    }

    #[test]
    fn test_unknown_entry_in_other_association_is_kept() {
        let mut catalog = Catalog::default();
        record(&mut catalog, "", "cluster", Target::Kubernetes);
        record(&mut catalog, "prod", "cluster", Target::Unknown);

        assert!(!MIGRATIONS[0].apply(&mut catalog, &[]));
        assert!(catalog.server_plugins["prod"].contains_key("cluster"));
    }

    #[test]
    fn test_migrate_context_plugins_to_standalone() {
        let dir = TempDir::new().unwrap();
        let store = CatalogStore::in_dir(dir.path());

        let mut catalog = Catalog::default();
        record(&mut catalog, "", "login", Target::Global);
        record(&mut catalog, "prod", "cluster", Target::Kubernetes);
        record(&mut catalog, "prod", "apply", Target::MissionControl);
        record(&mut catalog, "stale", "secret", Target::Kubernetes);
        write(&store, &catalog);

        let contexts = ClientConfig::with_active([(ContextType::Kubernetes, "prod")]);
        migrate_context_plugins_as_standalone_if_needed(&store, &contexts);

        let migrated = read(&store);
        assert!(!migrated.server_plugins.contains_key("prod"));
        assert!(migrated.server_plugins.contains_key("stale"));
        let standalone = &migrated.stand_alone_plugins;
        assert_eq!(standalone.len(), 3);
        assert!(standalone.contains_key("cluster_kubernetes"));
        assert!(standalone.contains_key("apply_mission-control"));
        assert!(standalone.contains_key("login_global"));
    }

    #[test]
    fn test_migration_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = CatalogStore::in_dir(dir.path());

        let mut catalog = Catalog::default();
        record(&mut catalog, "prod", "cluster", Target::Kubernetes);
        record(&mut catalog, "", "cluster", Target::Unknown);
        write(&store, &catalog);

        let contexts = ClientConfig::with_active([(ContextType::Kubernetes, "prod")]);
        migrate_context_plugins_as_standalone_if_needed(&store, &contexts);
        let once = read(&store);
        migrate_context_plugins_as_standalone_if_needed(&store, &contexts);
        let twice = read(&store);

        assert_eq!(once, twice);
        assert!(!once.stand_alone_plugins.contains_key("cluster"));
    }

    #[test]
    fn test_startup_migrations_stamp_version() {
        let dir = TempDir::new().unwrap();
        let store = CatalogStore::in_dir(dir.path());

        let mut catalog = Catalog::default();
        record(&mut catalog, "", "cluster", Target::Unknown);
        record(&mut catalog, "", "cluster", Target::Global);
        write(&store, &catalog);

        let contexts = ClientConfig::default();
        let applied = run_startup_migrations(&store, &contexts);
        assert_eq!(applied, vec!["delete-incorrect-unknown-entries"]);
        assert_eq!(read(&store).schema_version, CURRENT_SCHEMA_VERSION);

        assert!(run_startup_migrations(&store, &contexts).is_empty());
    }

    #[test]
    fn test_startup_migrations_on_fresh_install() {
        let dir = TempDir::new().unwrap();
        let store = CatalogStore::in_dir(dir.path());

        let applied = run_startup_migrations(&store, &ClientConfig::default());
        assert!(applied.is_empty());
        assert!(store.path().exists());
    }

    #[test]
    fn test_corrupt_catalog_is_left_alone() {
        let dir = TempDir::new().unwrap();
        let store = CatalogStore::in_dir(dir.path());
        fs::write(store.path(), "indexByPath: [broken").unwrap();

        assert!(run_startup_migrations(&store, &ClientConfig::default()).is_empty());
        delete_incorrect_plugin_entries_from_catalog(&store);

        assert_eq!(
            fs::read_to_string(store.path()).unwrap(),
            "indexByPath: [broken"
        );
        assert!(matches!(store.load(false), Err(CatalogError::Decode { .. })));
    }
}
