//! Engine configuration

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Configuration for the trace engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Address the trace endpoint binds to. Loopback only; connections from
    /// other hosts are rejected.
    pub bind_address: String,

    /// How long a symbol query waits for its response before failing with a
    /// timeout. `None` waits until the response arrives or the connection
    /// drops.
    #[serde(with = "humantime_serde")]
    pub query_timeout: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:46618".to_string(),
            query_timeout: Some(Duration::from_secs(10)),
        }
    }
}

/// Load an engine configuration from a TOML file
pub fn load_config(path: &Path) -> Result<EngineConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path).map_err(ConfigError::Read)?;
    Ok(toml::from_str(&content)?)
}
