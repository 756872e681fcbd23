use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Server configuration loaded from `trellis.yaml`.
///
/// Every field has a default so a missing or partial file still yields a
/// usable config; command-line flags override whatever the file says.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default = "default_db")]
    pub db: PathBuf,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_version() -> u32 {
    1
}

fn default_db() -> PathBuf {
    PathBuf::from("trellis.db")
}

fn default_port() -> u16 {
    4141
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            db: default_db(),
            port: default_port(),
        }
    }
}

impl Config {
    /// Load from an explicit path, or fall back to `trellis.yaml` in the
    /// working directory. No file at all is fine — defaults apply.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        let path = match explicit {
            Some(p) => p.to_path_buf(),
            None => {
                let fallback = PathBuf::from("trellis.yaml");
                if !fallback.exists() {
                    return Ok(Self::default());
                }
                fallback
            }
        };
        let data = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&data)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }
}
