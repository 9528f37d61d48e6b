//! Plugin records and the small closed vocabularies they use.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// The command group a plugin attaches to.
///
/// `Unknown` is the placeholder written by CLI versions that predate named
/// targets. It serializes as the empty string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Target {
    Global,
    Kubernetes,
    MissionControl,
    Operations,
    #[default]
    Unknown,
}

impl Target {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::Kubernetes => "kubernetes",
            Self::MissionControl => "mission-control",
            Self::Operations => "operations",
            Self::Unknown => "",
        }
    }

    /// Lenient parse used when decoding stored records. Anything unrecognized
    /// is treated as the legacy placeholder.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "global" => Self::Global,
            "kubernetes" | "k8s" => Self::Kubernetes,
            "mission-control" | "tmc" => Self::MissionControl,
            "operations" | "ops" => Self::Operations,
            _ => Self::Unknown,
        }
    }

    /// Global and kubernetes were both written as "unknown" by older CLIs.
    pub fn overlaps_unknown(&self) -> bool {
        matches!(self, Self::Global | Self::Kubernetes)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Target {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match Self::parse(s) {
            Self::Unknown if !s.trim().is_empty() && s.trim() != "unknown" => Err(format!(
                "Invalid target '{}'. Must be: global, kubernetes, mission-control, operations",
                s
            )),
            target => Ok(target),
        }
    }
}

impl From<String> for Target {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl From<Target> for String {
    fn from(t: Target) -> Self {
        t.as_str().to_string()
    }
}

/// Kind of context a user can be logged into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ContextType {
    #[serde(rename = "kubernetes", alias = "k8s")]
    Kubernetes,
    #[serde(rename = "mission-control", alias = "tmc")]
    MissionControl,
    #[serde(rename = "tanzu")]
    Tanzu,
}

impl fmt::Display for ContextType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Kubernetes => write!(f, "kubernetes"),
            Self::MissionControl => write!(f, "mission-control"),
            Self::Tanzu => write!(f, "tanzu"),
        }
    }
}

/// Relocates a plugin command to another place in the CLI command tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandMapEntry {
    /// Space-separated path within the plugin; empty means the plugin root
    #[serde(default)]
    pub source_command_path: String,
    /// Space-separated path in the CLI where the command should appear
    pub destination_command_path: String,
    /// Space-separated CLI paths this entry replaces
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub overrides: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
}

/// Full metadata of one installed plugin binary.
///
/// Identity is (name, target, installation path); the rest is descriptive.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginInfo {
    pub name: String,
    #[serde(default)]
    pub target: Target,
    #[serde(default)]
    pub installation_path: String,
    #[serde(default)]
    pub version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, rename = "buildSHA", skip_serializing_if = "String::is_empty")]
    pub build_sha: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub digest: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub group: String,
    #[serde(default, rename = "docURL", skip_serializing_if = "String::is_empty")]
    pub doc_url: String,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
    /// Name of the discovery source the plugin was installed from
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub discovery: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub default_feature_flags: BTreeMap<String, bool>,
    /// Context types the plugin is usable with; empty means unrestricted
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub supported_context_type: Vec<ContextType>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub invoked_as: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command_map: Vec<CommandMapEntry>,
}

impl PluginInfo {
    pub fn new(name: &str, target: Target, installation_path: &str) -> Self {
        Self {
            name: name.to_string(),
            target,
            installation_path: installation_path.to_string(),
            ..Default::default()
        }
    }

    /// Key of this plugin in a plugin association
    pub fn key(&self) -> String {
        plugin_name_target(&self.name, self.target)
    }

    /// Command path at which the plugin is mounted below the CLI root
    pub fn mount_path(&self) -> Vec<String> {
        match self.target {
            Target::MissionControl | Target::Operations => {
                vec![self.target.as_str().to_string(), self.name.clone()]
            }
            _ => vec![self.name.clone()],
        }
    }
}

/// Composite association key: `name` for the legacy target, `name_target` otherwise.
pub fn plugin_name_target(name: &str, target: Target) -> String {
    match target {
        Target::Unknown => name.to_string(),
        _ => format!("{}_{}", name, target),
    }
}
