//! Server-level configuration overlay.
//!
//! Loads the library's [`relaycast_core::Config`] from an optional YAML
//! file, then applies environment variable and CLI overrides as a
//! second pass.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use relaycast_core::Config as CoreConfig;

/// Thin wrapper adding the one override this binary needs (the data
/// directory) on top of the library's own config record.
pub struct ServerConfig {
    pub core: CoreConfig,
}

impl ServerConfig {
    /// Loads the core config from `path`, or its defaults if none was
    /// given, then applies `RELAYCAST_DATA_DIR` if set.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut core = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file: {}", path.display()))?;
            CoreConfig::from_yaml(&content)
                .with_context(|| format!("failed to parse config file: {}", path.display()))?
        } else {
            CoreConfig::default()
        };

        if let Ok(val) = std::env::var("RELAYCAST_DATA_DIR") {
            core.data_dir = val;
        }

        Ok(Self { core })
    }

    pub fn apply_data_dir_override(&mut self, data_dir: Option<PathBuf>) {
        if let Some(dir) = data_dir {
            self.core.data_dir = dir.display().to_string();
        }
    }
}
