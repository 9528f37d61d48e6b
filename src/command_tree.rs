//! Plugin Command-Tree Cache.
//!
//! Remembers, per plugin installation path, the plugin's subcommands and
//! their aliases so that building the root command or completing input does
//! not have to run every plugin binary. A tree is built once from the
//! plugin's help output and replaced wholesale when rebuilt.
//!
//! Cache file (`command_tree.yaml`):
//!
//! ```yaml
//! commandTree:
//!   /plugins/cluster/v1.0.0:
//!     aliases: [cl, cluster]
//!     subcommands:
//!       create: {}
//! ```

use crate::config::CatalogConfig;
use crate::error::{CatalogError, Result};
use crate::lock::FileLock;
use crate::plugin_docs::{parse_help, BinaryHelpGenerator, PluginDocsGenerator};
use crate::types::PluginInfo;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const COMMAND_TREE_FILE_NAME: &str = "command_tree.yaml";

/// Deepest command nesting followed before giving up on a plugin
const MAX_COMMAND_DEPTH: usize = 16;

/// One command level of a plugin
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandNode {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub subcommands: BTreeMap<String, CommandNode>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub aliases: BTreeSet<String>,
}

impl CommandNode {
    pub fn new() -> Self {
        Self::default()
    }

    /// Follow `path` by subcommand name
    pub fn find(&self, path: &[&str]) -> Option<&CommandNode> {
        path.iter()
            .try_fold(self, |node, name| node.subcommands.get(*name))
    }

    /// Subcommand named `name` or having `name` among its aliases
    pub fn resolve(&self, name: &str) -> Option<(&str, &CommandNode)> {
        if let Some((key, node)) = self.subcommands.get_key_value(name) {
            return Some((key.as_str(), node));
        }
        self.subcommands
            .iter()
            .find(|(_, node)| node.aliases.contains(name))
            .map(|(key, node)| (key.as_str(), node))
    }

    fn detach(&mut self, path: &[String]) -> Option<CommandNode> {
        let (last, parents) = path.split_last()?;
        let mut node = self;
        for name in parents {
            node = node.subcommands.get_mut(name)?;
        }
        node.subcommands.remove(last)
    }

    fn attach(&mut self, path: &[String], subtree: CommandNode) {
        let mut node = self;
        for name in path {
            node = node.subcommands.entry(name.clone()).or_default();
        }
        node.merge(subtree);
    }

    fn merge(&mut self, other: CommandNode) {
        self.aliases.extend(other.aliases);
        for (name, child) in other.subcommands {
            self.subcommands.entry(name).or_default().merge(child);
        }
    }
}

/// Operations the CLI uses on the cache
pub trait CommandTreeCache {
    /// Cached tree for `plugin`, building and storing it on a miss
    fn get_tree(&self, root_command: &str, plugin: &PluginInfo) -> Result<CommandNode>;
    /// Build the tree for `plugin` and replace any cached one
    fn construct_and_add_tree(&self, root_command: &str, plugin: &PluginInfo) -> Result<()>;
    fn delete_plugin_tree(&self, plugin: &PluginInfo) -> Result<()>;
    /// Drop every cached tree, including the backing file
    fn delete_tree(&self) -> Result<()>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PluginCommandTree {
    #[serde(default)]
    command_tree: BTreeMap<String, CommandNode>,
}

impl PluginCommandTree {
    fn decode(path: &Path, content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content).map_err(|source| CatalogError::Decode {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// File-backed command-tree cache
pub struct PluginCommandTreeCache<G: PluginDocsGenerator = BinaryHelpGenerator> {
    path: PathBuf,
    lock_timeout: Option<Duration>,
    generator: G,
}

impl PluginCommandTreeCache<BinaryHelpGenerator> {
    pub fn new(config: &CatalogConfig) -> Self {
        Self {
            path: config.command_tree_dir().join(COMMAND_TREE_FILE_NAME),
            lock_timeout: config.lock_timeout(),
            generator: BinaryHelpGenerator,
        }
    }
}

impl<G: PluginDocsGenerator> PluginCommandTreeCache<G> {
    /// Cache stored in `dir`, reading plugin help through `generator`
    pub fn with_generator(dir: &Path, generator: G) -> Self {
        Self {
            path: dir.join(COMMAND_TREE_FILE_NAME),
            lock_timeout: None,
            generator,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn generator(&self) -> &G {
        &self.generator
    }

    /// Cached tree for `plugin` without building one
    pub fn cached_tree(&self, plugin: &PluginInfo) -> Result<Option<CommandNode>> {
        Ok(self
            .read_cache()?
            .command_tree
            .remove(&plugin.installation_path))
    }

    /// Build a plugin's tree without touching the cache
    pub fn construct_tree(&self, root_command: &str, plugin: &PluginInfo) -> Result<CommandNode> {
        let mut builder = TreeBuilder {
            generator: &self.generator,
            plugin,
            processed: HashSet::new(),
        };
        let mut root = builder.build(&mut Vec::new())?;
        apply_command_map(root_command, plugin, &mut root);
        Ok(root)
    }

    fn read_cache(&self) -> Result<PluginCommandTree> {
        let Some(mut lock) = FileLock::acquire_shared(&self.path, self.lock_timeout)? else {
            return Ok(PluginCommandTree::default());
        };
        let content = lock.read_to_string()?;
        lock.release();
        PluginCommandTree::decode(&self.path, &content)
    }

    fn update_cache(&self, update: impl FnOnce(&mut PluginCommandTree)) -> Result<()> {
        let mut lock = FileLock::acquire_exclusive(&self.path, self.lock_timeout)?;
        let mut cache = PluginCommandTree::decode(&self.path, &lock.read_to_string()?)?;
        update(&mut cache);
        let yaml =
            serde_yaml::to_string(&cache).map_err(|source| CatalogError::Encode { source })?;
        lock.rewrite(yaml.as_bytes())
    }

    fn store_tree(&self, plugin: &PluginInfo, tree: CommandNode) -> Result<()> {
        self.update_cache(|cache| {
            cache
                .command_tree
                .insert(plugin.installation_path.clone(), tree);
        })?;
        info!(plugin = %plugin.name, path = %plugin.installation_path, "cached plugin command tree");
        Ok(())
    }
}

impl<G: PluginDocsGenerator> CommandTreeCache for PluginCommandTreeCache<G> {
    fn get_tree(&self, root_command: &str, plugin: &PluginInfo) -> Result<CommandNode> {
        if let Some(tree) = self.cached_tree(plugin)? {
            debug!(plugin = %plugin.name, "command tree cache hit");
            return Ok(tree);
        }
        // Plugin binaries may be slow, so the lock is only taken to store
        let tree = self.construct_tree(root_command, plugin)?;
        self.store_tree(plugin, tree.clone())?;
        Ok(tree)
    }

    fn construct_and_add_tree(&self, root_command: &str, plugin: &PluginInfo) -> Result<()> {
        let tree = self.construct_tree(root_command, plugin)?;
        self.store_tree(plugin, tree)
    }

    fn delete_plugin_tree(&self, plugin: &PluginInfo) -> Result<()> {
        if !self.path.exists() {
            return Ok(());
        }
        self.update_cache(|cache| {
            cache.command_tree.remove(&plugin.installation_path);
        })?;
        debug!(plugin = %plugin.name, "removed plugin command tree");
        Ok(())
    }

    fn delete_tree(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CatalogError::io("remove command tree cache", &self.path, e)),
        }
    }
}

/// Walks a plugin's help pages depth first.
///
/// `processed` is construction-only state and never reaches the cache.
struct TreeBuilder<'a, G: PluginDocsGenerator> {
    generator: &'a G,
    plugin: &'a PluginInfo,
    processed: HashSet<Vec<String>>,
}

impl<G: PluginDocsGenerator> TreeBuilder<'_, G> {
    fn build(&mut self, path: &mut Vec<String>) -> Result<CommandNode> {
        if path.len() > MAX_COMMAND_DEPTH {
            return Err(self.format_error(path, "command nesting is too deep".to_string()));
        }
        if !self.processed.insert(path.clone()) {
            return Ok(CommandNode::new());
        }

        let text = self.generator.help_text(self.plugin, path)?;
        let summary =
            parse_help(&text).map_err(|message| self.format_error(path.as_slice(), message))?;

        let mut node = CommandNode {
            subcommands: BTreeMap::new(),
            aliases: summary.aliases.into_iter().collect(),
        };
        for name in summary.subcommands {
            path.push(name);
            let child = self.build(path)?;
            if let Some(name) = path.pop() {
                node.subcommands.insert(name, child);
            }
        }
        Ok(node)
    }

    fn format_error(&self, path: &[String], message: String) -> CatalogError {
        CatalogError::HelpFormat {
            plugin: self.plugin.name.clone(),
            command: path.join(" "),
            message,
        }
    }
}

fn split_path(path: &str) -> Vec<String> {
    path.split_whitespace().map(String::from).collect()
}

fn strip_root_command(root_command: &str, mut path: Vec<String>) -> Vec<String> {
    if path.first().map(String::as_str) == Some(root_command) {
        path.remove(0);
    }
    path
}

/// Relocate remapped commands to their destination inside the plugin tree.
///
/// A remap of the plugin root moves where the plugin is mounted in the CLI.
/// Subcommand destinations are taken relative to that mount point; ones
/// outside it are left where the plugin declares them.
fn apply_command_map(root_command: &str, plugin: &PluginInfo, root: &mut CommandNode) {
    let (root_maps, sub_maps): (Vec<_>, Vec<_>) = plugin
        .command_map
        .iter()
        .partition(|entry| entry.source_command_path.trim().is_empty());

    let mut mount = plugin.mount_path();
    for entry in root_maps {
        mount = strip_root_command(root_command, split_path(&entry.destination_command_path));
        root.aliases.extend(entry.aliases.iter().cloned());
    }

    for entry in sub_maps {
        let source = split_path(&entry.source_command_path);
        let destination =
            strip_root_command(root_command, split_path(&entry.destination_command_path));
        let relative = match destination.strip_prefix(mount.as_slice()) {
            Some(relative) if !relative.is_empty() => relative.to_vec(),
            _ => {
                warn!(
                    plugin = %plugin.name,
                    source = %entry.source_command_path,
                    destination = %entry.destination_command_path,
                    "remapped command lies outside the plugin, keeping it in place"
                );
                continue;
            }
        };
        let Some(mut subtree) = root.detach(&source) else {
            warn!(
                plugin = %plugin.name,
                source = %entry.source_command_path,
                "remapped command not declared by the plugin"
            );
            continue;
        };
        if let (Some(old), Some(new)) = (source.last(), relative.last()) {
            if subtree.aliases.remove(old) {
                subtree.aliases.insert(new.clone());
            }
        }
        subtree.aliases.extend(entry.aliases.iter().cloned());
        root.attach(&relative, subtree);
    }
}
