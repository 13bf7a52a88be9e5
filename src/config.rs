use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::models::vocab;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub graph: GraphConfig,
    #[serde(default)]
    pub import: ImportConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Root for collection corpus files: `<data_dir>/<collection>/...`
    pub data_dir: PathBuf,
    /// Root for contribution working dirs: `<contrib_dir>/<collection>/<id>/`
    pub contrib_dir: PathBuf,
    /// Scratch space for archive extraction. One subdirectory per batch,
    /// removed on every exit path.
    pub scratch_dir: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GraphConfig {
    /// Base URI for minting collection/item/document subjects.
    #[serde(default = "default_base_uri")]
    pub base_uri: String,
    /// Predicates allowed multiple objects per subject. Merges never
    /// replace statements under these predicates, only append.
    #[serde(default = "default_multi_valued")]
    pub multi_valued_predicates: Vec<String>,
}

impl Default for GraphConfig {
    fn default() -> Self {
        GraphConfig {
            base_uri: default_base_uri(),
            multi_valued_predicates: default_multi_valued(),
        }
    }
}

fn default_base_uri() -> String {
    "http://corpus-vault.dev/catalog".to_string()
}

fn default_multi_valued() -> Vec<String> {
    vec![vocab::HAS_DOCUMENT.to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct ImportConfig {
    /// Default naming strategy, overridable per import invocation.
    /// Accepted forms: `delimiter:<d>:<field>`, `offset:<n>`,
    /// `whole-name`, `document-prefix`.
    #[serde(default = "default_strategy")]
    pub naming_strategy: String,
}

impl Default for ImportConfig {
    fn default() -> Self {
        ImportConfig {
            naming_strategy: default_strategy(),
        }
    }
}

fn default_strategy() -> String {
    "delimiter:-:1".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.graph.base_uri.is_empty() {
        anyhow::bail!("graph.base_uri must not be empty");
    }

    if config.graph.multi_valued_predicates.iter().any(|p| p.is_empty()) {
        anyhow::bail!("graph.multi_valued_predicates must not contain empty entries");
    }

    // Fail early on an unparseable default strategy rather than at import time
    crate::resolve::NamingStrategy::parse(&config.import.naming_strategy)
        .with_context(|| "import.naming_strategy is not a recognized strategy")?;

    Ok(config)
}
