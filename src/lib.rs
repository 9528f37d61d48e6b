//! plugin-catalog - installed-plugin bookkeeping for plugin-based CLIs
//!
//! Tracks which plugin binaries are installed, standalone or per context, in
//! a lock-protected YAML catalog, repairs catalogs left by older CLI
//! versions, and caches each plugin's command tree so the CLI can route and
//! complete commands without running every plugin binary.

pub mod catalog;
pub mod command_tree;
pub mod config;
pub mod context_catalog;
pub mod contexts;
pub mod error;
pub mod lock;
pub mod migration;
pub mod plugin_docs;
pub mod supplier;
pub mod types;

pub use catalog::{Catalog, CatalogStore, PluginAssociation};
pub use command_tree::{CommandNode, CommandTreeCache, PluginCommandTreeCache};
pub use config::CatalogConfig;
pub use context_catalog::{ContextCatalog, PluginCatalogReader, PluginCatalogUpdater};
pub use contexts::{ActiveContexts, ClientConfig};
pub use error::{CatalogError, Result};
pub use supplier::{InstalledPluginSupplier, PluginSupplier};
pub use types::{ContextType, PluginInfo, Target};
