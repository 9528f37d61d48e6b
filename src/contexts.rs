//! Active-context lookup.
//!
//! The catalog only needs to know which contexts are active and of which
//! type. `ClientConfig` reads that from the CLI client configuration file:
//!
//! ```yaml
//! contexts:
//!   - name: prod
//!     contextType: kubernetes
//! currentContext:
//!   kubernetes: prod
//! ```

use crate::error::{CatalogError, Result};
use crate::types::ContextType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

/// Source of the currently active contexts
pub trait ActiveContexts {
    /// Names of all active contexts, sorted and without duplicates
    fn active_context_names(&self) -> Result<Vec<String>>;
    /// Active context name per context type
    fn active_context_types(&self) -> Result<BTreeMap<ContextType, String>>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextEntry {
    pub name: String,
    pub context_type: ContextType,
}

/// CLI client configuration, reduced to what the catalog consumes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    #[serde(default)]
    pub contexts: Vec<ContextEntry>,
    #[serde(default)]
    pub current_context: BTreeMap<ContextType, String>,
}

impl ClientConfig {
    /// Load from `path`. A missing file means no contexts.
    pub fn load(path: &Path) -> Result<Self> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(CatalogError::io("read client config", path, e)),
        };
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&content).map_err(|source| CatalogError::Decode {
            path: path.to_path_buf(),
            source,
        })
    }

    /// In-memory configuration with the given active contexts
    pub fn with_active<I, S>(active: I) -> Self
    where
        I: IntoIterator<Item = (ContextType, S)>,
        S: Into<String>,
    {
        let mut config = Self::default();
        for (context_type, name) in active {
            let name = name.into();
            config.contexts.push(ContextEntry {
                name: name.clone(),
                context_type,
            });
            config.current_context.insert(context_type, name);
        }
        config
    }
}

impl ActiveContexts for ClientConfig {
    fn active_context_names(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.current_context.values().cloned().collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    fn active_context_types(&self) -> Result<BTreeMap<ContextType, String>> {
        Ok(self.current_context.clone())
    }
}
