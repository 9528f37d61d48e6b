//! Plugin help output: how command-tree construction learns a plugin's
//! subcommands and aliases.
//!
//! The only contract with a plugin binary is its cobra-style `-h` output:
//!
//! ```text
//! Usage:
//!   cluster [command]
//!
//! Aliases:
//!   cluster, cl
//!
//! Available Commands:
//!   create      Create a cluster
//!   delete      Delete a cluster
//!
//! Flags:
//!   -h, --help   help for cluster
//! ```
//!
//! Anything that swaps this for a structured protocol only needs a new
//! [`PluginDocsGenerator`].

use crate::error::{CatalogError, Result};
use crate::types::PluginInfo;
use regex::Regex;
use std::process::Command;
use std::sync::LazyLock;
use tracing::debug;

/// Subcommands every cobra binary gets for free
const BUILTIN_COMMANDS: &[&str] = &["help", "completion"];

static SECTION_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Z][A-Za-z ]*):\s*$").expect("valid section regex"));
/// Cobra pads names to at least 11 columns and then adds a single space, so
/// a long name may be followed by exactly one space before its description.
static COMMAND_ROW: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s{2,}(\S+)(?:\s+.*)?$").expect("valid row regex"));

/// Produces the help output of one command of a plugin
pub trait PluginDocsGenerator {
    /// `command_path` is relative to the plugin root; empty is the root itself
    fn help_text(&self, plugin: &PluginInfo, command_path: &[String]) -> Result<String>;
}

/// Runs `<installationPath> <command_path...> -h`
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryHelpGenerator;

impl PluginDocsGenerator for BinaryHelpGenerator {
    fn help_text(&self, plugin: &PluginInfo, command_path: &[String]) -> Result<String> {
        debug!(
            plugin = %plugin.name,
            command = %command_path.join(" "),
            "invoking plugin help"
        );
        let output = Command::new(&plugin.installation_path)
            .args(command_path)
            .arg("-h")
            .output()
            .map_err(|e| CatalogError::PluginExec {
                plugin: plugin.name.clone(),
                message: format!("failed to run {}: {}", plugin.installation_path, e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CatalogError::PluginExec {
                plugin: plugin.name.clone(),
                message: format!(
                    "'{} -h' exited with {}: {}",
                    command_path.join(" "),
                    output.status,
                    stderr.trim()
                ),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// What one help page declares
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HelpSummary {
    pub aliases: Vec<String>,
    pub subcommands: Vec<String>,
}

#[derive(Clone, Copy, PartialEq)]
enum Section {
    Preamble,
    Aliases,
    Commands,
    Other,
}

/// Parse cobra-style help output.
///
/// Fails when there is no `Usage:` section or an `Aliases:` section is empty.
pub fn parse_help(text: &str) -> std::result::Result<HelpSummary, String> {
    let mut summary = HelpSummary::default();
    let mut section = Section::Preamble;
    let mut saw_usage = false;
    let mut aliases_pending = false;

    for line in text.lines() {
        if let Some(caps) = SECTION_HEADER.captures(line) {
            if aliases_pending {
                return Err("'Aliases:' section has no entries".to_string());
            }
            let header = &caps[1];
            section = if header == "Usage" {
                saw_usage = true;
                Section::Other
            } else if header == "Aliases" {
                aliases_pending = true;
                Section::Aliases
            } else if header.ends_with("Commands") {
                Section::Commands
            } else {
                Section::Other
            };
            continue;
        }

        if line.trim().is_empty() {
            if aliases_pending {
                return Err("'Aliases:' section has no entries".to_string());
            }
            if section == Section::Aliases {
                section = Section::Other;
            }
            continue;
        }

        match section {
            Section::Aliases if aliases_pending => {
                summary.aliases = line
                    .split(',')
                    .map(str::trim)
                    .filter(|a| !a.is_empty())
                    .map(String::from)
                    .collect();
                aliases_pending = false;
            }
            Section::Commands => {
                if let Some(caps) = COMMAND_ROW.captures(line) {
                    let name = &caps[1];
                    if !BUILTIN_COMMANDS.contains(&name)
                        && !summary.subcommands.iter().any(|s| s == name)
                    {
                        summary.subcommands.push(name.to_string());
                    }
                }
            }
            _ => {}
        }
    }

    if aliases_pending {
        return Err("'Aliases:' section has no entries".to_string());
    }
    if !saw_usage {
        return Err("missing 'Usage:' section".to_string());
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLUSTER_HELP: &str = "\
Manage clusters

Usage:
  cluster [command]

Aliases:
  cluster, cl, clusters

Available Commands:
  create      Create a cluster
  completion  Generate the autocompletion script
  delete      Delete a cluster
  help        Help about any command

Node Commands:
  node-pool   Manage node pools

Flags:
  -h, --help   help for cluster

Use \"cluster [command] --help\" for more information about a command.
";

    #[test]
    fn test_parse_full_help() {
        let summary = parse_help(CLUSTER_HELP).unwrap();
        assert_eq!(summary.aliases, vec!["cluster", "cl", "clusters"]);
        assert_eq!(summary.subcommands, vec!["create", "delete", "node-pool"]);
    }

    #[test]
    fn test_parse_leaf_without_aliases() {
        let help = "Usage:\n  cluster create NAME [flags]\n\nFlags:\n  -h, --help   help\n";
        let summary = parse_help(help).unwrap();
        assert!(summary.aliases.is_empty());
        assert!(summary.subcommands.is_empty());
    }

    #[test]
    fn test_missing_usage_is_rejected() {
        let err = parse_help("error: unknown flag -h\n").unwrap_err();
        assert!(err.contains("Usage"));
        assert!(parse_help("").is_err());
    }

    #[test]
    fn test_empty_aliases_section_is_rejected() {
        let help = "Usage:\n  x\n\nAliases:\n\nFlags:\n";
        assert!(parse_help(help).is_err());
        assert!(parse_help("Usage:\n  x\nAliases:\n").is_err());
    }

    #[test]
    fn test_flags_and_examples_are_not_commands() {
        let help = "\
Usage:
  x [command]

Examples:
  x create  something

Flags:
  -v, --verbose   chatty
";
        assert!(parse_help(help).unwrap().subcommands.is_empty());
    }

    #[test]
    fn test_long_command_names_keep_single_space_rows() {
        // Rows as cobra pads them: max(11, longest name) columns plus one space
        let help = "\
Usage:
  cluster [command]

Available Commands:
  abcdefghijk Eleven characters
  create      Create a cluster

Cluster Commands:
  create          Create a cluster
  upgrade-cluster Upgrade a cluster
";
        let summary = parse_help(help).unwrap();
        assert_eq!(
            summary.subcommands,
            vec!["abcdefghijk", "create", "upgrade-cluster"]
        );
    }

    #[test]
    fn test_command_row_without_description() {
        let help = "Usage:\n  x [command]\n\nAvailable Commands:\n  bare\n";
        assert_eq!(parse_help(help).unwrap().subcommands, vec!["bare"]);
    }

    #[test]
    fn test_binary_generator_reports_missing_binary() {
        let plugin = PluginInfo::new(
            "ghost",
            crate::types::Target::Global,
            "/definitely/not/a/plugin/binary",
        );
        let err = BinaryHelpGenerator.help_text(&plugin, &[]).unwrap_err();
        assert!(matches!(err, CatalogError::PluginExec { .. }));
    }
}
