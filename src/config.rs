use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fs;
use std::io;
use std::path::Path;

/// Optional per-plugin settings read while the plugin is loading.
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    /// Overrides `Plugin::log_amx_errors` when present.
    #[serde(default)]
    pub log_amx_errors: Option<bool>,
    #[serde(default = "BridgeConfig::default_prefix_log_lines")]
    pub prefix_log_lines: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self { log_amx_errors: None, prefix_log_lines: Self::default_prefix_log_lines() }
    }
}

impl BridgeConfig {
    const fn default_prefix_log_lines() -> bool {
        true
    }

    /// Reads `path`; a missing file is `Ok(None)`.
    pub fn load(path: impl AsRef<Path>) -> Result<Option<Self>> {
        let path = path.as_ref();
        match fs::read(path) {
            Ok(bytes) => {
                let cfg = serde_json::from_slice(&bytes)
                    .with_context(|| format!("Failed to parse config file {}", path.display()))?;
                Ok(Some(cfg))
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(anyhow!(err).context(format!("Failed to read config file {}", path.display()))),
        }
    }

    pub fn log_amx_errors_or(&self, fallback: bool) -> bool {
        self.log_amx_errors.unwrap_or(fallback)
    }
}
