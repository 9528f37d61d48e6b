//! plugin-catalog - inspect and maintain the installed-plugin catalog.

use anyhow::Context;
use clap::{Parser, Subcommand};
use plugin_catalog::config::load_config;
use plugin_catalog::migration::run_startup_migrations;
use plugin_catalog::{
    CatalogConfig, CatalogError, CatalogStore, ClientConfig, CommandTreeCache, ContextCatalog,
    InstalledPluginSupplier, PluginCatalogReader, PluginCatalogUpdater, PluginCommandTreeCache,
    PluginInfo, PluginSupplier,
};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "plugin-catalog")]
#[command(author, version, about = "Inspect and maintain the installed-plugin catalog")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print JSON instead of YAML
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List installed plugins (plugins visible to the CLI unless a scope is given)
    List {
        /// Only plugins installed for this context
        #[arg(short, long, conflicts_with_all = ["standalone", "all"])]
        context: Option<String>,

        /// Only standalone plugins
        #[arg(long, conflicts_with = "all")]
        standalone: bool,

        /// Every plugin in the catalog, whether or not its context is active
        #[arg(long)]
        all: bool,
    },

    /// Show one plugin by key (`name` or `name_target`)
    Get {
        key: String,

        /// Context the plugin is installed for (standalone if omitted)
        #[arg(short, long, default_value = "")]
        context: String,
    },

    /// Remove a plugin from the catalog and drop its cached command tree
    Delete {
        key: String,

        #[arg(short, long, default_value = "")]
        context: String,
    },

    /// Repair catalog entries written by older CLI versions
    Migrate,

    /// Show the cached command tree of a plugin, building it if needed
    Tree {
        /// Plugin key (`name` or `name_target`) or installation path
        key: String,

        #[arg(short, long, default_value = "")]
        context: String,

        /// Name of the CLI root command
        #[arg(long, default_value = "tanzu")]
        root: String,

        /// Rebuild even if a tree is cached
        #[arg(long)]
        rebuild: bool,
    },

    /// Drop the cached command tree of one plugin, or of all plugins
    TreeDelete {
        /// Plugin key or installation path; every tree when omitted
        key: Option<String>,

        #[arg(short, long, default_value = "")]
        context: String,
    },

    /// Delete the catalog and the command-tree cache
    Clean,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "plugin_catalog=debug"
    } else {
        "plugin_catalog=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = load_config().context("Failed to load configuration")?;
    let contexts = ClientConfig::load(&config.client_config_path).unwrap_or_else(|e| {
        warn!(error = %e, "Ignoring unreadable client configuration");
        ClientConfig::default()
    });
    let store = CatalogStore::new(&config);

    if !matches!(cli.command, Commands::Migrate | Commands::Clean) {
        run_startup_migrations(&store, &contexts);
    }

    match cli.command {
        Commands::List {
            context,
            standalone,
            all,
        } => cmd_list(&config, &store, &contexts, context, standalone, all, cli.json),
        Commands::Get { key, context } => cmd_get(&store, &key, &context, cli.json),
        Commands::Delete { key, context } => cmd_delete(&config, &store, &key, &context),
        Commands::Migrate => cmd_migrate(&store, &contexts),
        Commands::Tree {
            key,
            context,
            root,
            rebuild,
        } => cmd_tree(&config, &store, &key, &context, &root, rebuild, cli.json),
        Commands::TreeDelete { key, context } => {
            cmd_tree_delete(&config, &store, key.as_deref(), &context)
        }
        Commands::Clean => cmd_clean(&config, &store),
    }
}

fn print<T: Serialize>(value: &T, json: bool) -> anyhow::Result<()> {
    let out = if json {
        serde_json::to_string_pretty(value)?
    } else {
        serde_yaml::to_string(value)?
    };
    println!("{}", out.trim_end());
    Ok(())
}

/// Resolve a plugin key in `context`, falling back to an installation path
fn find_plugin(store: &CatalogStore, key: &str, context: &str) -> anyhow::Result<PluginInfo> {
    let (catalog, _) = store.load(false)?;
    catalog
        .find(context, key)
        .cloned()
        .ok_or_else(|| CatalogError::PluginNotFound(key.to_string()).into())
}

fn cmd_list(
    config: &CatalogConfig,
    store: &CatalogStore,
    contexts: &ClientConfig,
    context: Option<String>,
    standalone: bool,
    all: bool,
    json: bool,
) -> anyhow::Result<()> {
    let plugins = match (context, standalone, all) {
        (Some(context), _, _) => ContextCatalog::open(store, &context)?.list(),
        (None, true, _) => ContextCatalog::open(store, "")?.list(),
        (None, false, true) => store.load(false)?.0.all_plugins(),
        (None, false, false) => InstalledPluginSupplier::new(config, contexts)
            .get_installed_plugins()
            .context("Failed to list installed plugins")?,
    };
    print(&plugins, json)
}

fn cmd_get(store: &CatalogStore, key: &str, context: &str, json: bool) -> anyhow::Result<()> {
    let plugin = find_plugin(store, key, context)?;
    print(&plugin, json)
}

fn cmd_delete(
    config: &CatalogConfig,
    store: &CatalogStore,
    key: &str,
    context: &str,
) -> anyhow::Result<()> {
    let mut catalog = ContextCatalog::open_for_update(store, context)?;
    let plugin = catalog
        .get(key)
        .ok_or_else(|| CatalogError::PluginNotFound(key.to_string()))?;
    catalog.delete(key)?;
    catalog.unlock();

    PluginCommandTreeCache::new(config)
        .delete_plugin_tree(&plugin)
        .context("Failed to drop cached command tree")?;
    info!(plugin = %key, "Deleted plugin from catalog");
    Ok(())
}

fn cmd_migrate(store: &CatalogStore, contexts: &ClientConfig) -> anyhow::Result<()> {
    let applied = run_startup_migrations(store, contexts);
    if applied.is_empty() {
        println!("Catalog is up to date");
    } else {
        for step in applied {
            println!("Applied {}", step);
        }
    }
    Ok(())
}

fn cmd_tree(
    config: &CatalogConfig,
    store: &CatalogStore,
    key: &str,
    context: &str,
    root: &str,
    rebuild: bool,
    json: bool,
) -> anyhow::Result<()> {
    let plugin = find_plugin(store, key, context)?;
    let cache = PluginCommandTreeCache::new(config);
    if rebuild {
        cache.construct_and_add_tree(root, &plugin)?;
    }
    let tree = cache
        .get_tree(root, &plugin)
        .with_context(|| format!("Failed to build command tree for '{}'", plugin.name))?;
    print(&tree, json)
}

fn cmd_tree_delete(
    config: &CatalogConfig,
    store: &CatalogStore,
    key: Option<&str>,
    context: &str,
) -> anyhow::Result<()> {
    let cache = PluginCommandTreeCache::new(config);
    match key {
        Some(key) => cache.delete_plugin_tree(&find_plugin(store, key, context)?)?,
        None => cache.delete_tree()?,
    }
    Ok(())
}

fn cmd_clean(config: &CatalogConfig, store: &CatalogStore) -> anyhow::Result<()> {
    store.clean()?;
    PluginCommandTreeCache::new(config).delete_tree()?;
    info!(path = %store.path().display(), "Removed plugin catalog and command-tree cache");
    Ok(())
}
