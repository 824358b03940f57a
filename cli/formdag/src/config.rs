//! `formdag.toml` parsing.
//!
//! ```toml
//! [engine]
//! non_relevant = "clear"
//! publish_summaries = false
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use formdag_dag::EngineConfig;
use serde::{Deserialize, Serialize};

/// Name of the configuration file looked up from the working directory.
pub const CONFIG_FILE: &str = "formdag.toml";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormdagConfig {
    /// Recalculation engine settings.
    #[serde(default)]
    pub engine: EngineConfig,
}

impl FormdagConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))
    }

    /// Search `start_dir` and its ancestors for `formdag.toml`.
    pub fn find_and_load(start_dir: &Path) -> Result<Option<Self>> {
        let mut dir = start_dir.to_path_buf();
        loop {
            let candidate = dir.join(CONFIG_FILE);
            if candidate.is_file() {
                log::debug!("using {}", candidate.display());
                return Self::load(&candidate).map(Some);
            }
            if !dir.pop() {
                return Ok(None);
            }
        }
    }
}
