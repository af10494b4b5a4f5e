//! Runtime Configuration
//!
//! Settings consumed by the access processor. They can be built in code,
//! parsed from JSON, or read from `STRATA_*` environment variables.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RuntimeError};

/// Name of the host the application runs on, used to build locations.
pub const ENV_APP_HOST: &str = "STRATA_APP_HOST";
/// Directory where values transferred back to the application land.
pub const ENV_WORKING_DIR: &str = "STRATA_WORKING_DIR";
/// Enables graph edge emission when set to `true` or `1`.
pub const ENV_GRAPH: &str = "STRATA_GRAPH";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Host name of the application side.
    pub app_host: String,

    /// Directory into which "open" transfers materialize files for the
    /// application.
    pub working_dir: PathBuf,

    /// Emit nodes and edges to the graph observer.
    pub draw_graph: bool,

    /// Name given to the access processor thread.
    pub processor_thread_name: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            app_host: "localhost".to_string(),
            working_dir: std::env::temp_dir().join("strata"),
            draw_graph: false,
            processor_thread_name: "access-processor".to_string(),
        }
    }
}

impl RuntimeConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(raw: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(raw).map_err(|e| RuntimeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by the `STRATA_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(host) = std::env::var(ENV_APP_HOST) {
            config.app_host = host;
        }
        if let Ok(dir) = std::env::var(ENV_WORKING_DIR) {
            config.working_dir = PathBuf::from(dir);
        }
        if let Ok(flag) = std::env::var(ENV_GRAPH) {
            config.draw_graph = parse_flag(&flag)?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.app_host.trim().is_empty() {
            return Err(RuntimeError::Config("app_host must not be empty".into()));
        }
        if self.processor_thread_name.trim().is_empty() {
            return Err(RuntimeError::Config(
                "processor_thread_name must not be empty".into(),
            ));
        }
        Ok(())
    }
}

fn parse_flag(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(RuntimeError::Config(format!(
            "{ENV_GRAPH} expects a boolean, got {other:?}"
        ))),
    }
}
