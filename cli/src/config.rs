//! Run configuration

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Logger settings
#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    pub json: bool,
    pub no_color: bool,
    pub verbose: u8,
    pub quiet: bool,
    pub add_caller: bool,
}

/// Everything a run needs, gathered from flags and `XDPERF_*` variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub log: LogConfig,
    pub plugin_name: String,
    pub plugin_path: PathBuf,
    pub plugin_config: Option<PathBuf>,
    pub bpf_object: PathBuf,
    pub device: String,
    pub parallelism: usize,
    pub count: u64,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("plugin name is required")]
    MissingPlugin,

    #[error("device is required")]
    MissingDevice,

    #[error("parallelism must be positive")]
    Parallelism,

    #[error("count must be positive")]
    Count,

    #[error("count must be greater than or equal to parallelism")]
    CountBelowParallelism,

    #[error("failed to read plugin config {}: {source}", path.display())]
    PluginConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse plugin config {}: {reason}", path.display())]
    PluginConfigParse { path: PathBuf, reason: String },
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.plugin_name.is_empty() {
            return Err(ConfigError::MissingPlugin);
        }
        if self.device.is_empty() {
            return Err(ConfigError::MissingDevice);
        }
        if self.parallelism == 0 {
            return Err(ConfigError::Parallelism);
        }
        if self.count == 0 {
            return Err(ConfigError::Count);
        }
        // count is the total across all workers
        if self.count < self.parallelism as u64 {
            return Err(ConfigError::CountBelowParallelism);
        }
        Ok(())
    }

    /// Bytes handed to `plugin_init`: the config file re-encoded as JSON,
    /// or `{}` when none was given.
    pub fn plugin_config_bytes(&self) -> Result<Vec<u8>, ConfigError> {
        match &self.plugin_config {
            Some(path) => load_plugin_config(path),
            None => Ok(b"{}".to_vec()),
        }
    }
}

fn load_plugin_config(path: &Path) -> Result<Vec<u8>, ConfigError> {
    let raw = std::fs::read(path).map_err(|source| ConfigError::PluginConfigRead {
        path: path.to_path_buf(),
        source,
    })?;
    let parse_err = |reason: String| ConfigError::PluginConfigParse {
        path: path.to_path_buf(),
        reason,
    };

    let is_json = path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let value: serde_json::Value = if is_json {
        serde_json::from_slice(&raw).map_err(|e| parse_err(e.to_string()))?
    } else {
        serde_yaml::from_slice(&raw).map_err(|e| parse_err(e.to_string()))?
    };

    serde_json::to_vec(&value).map_err(|e| parse_err(e.to_string()))
}
