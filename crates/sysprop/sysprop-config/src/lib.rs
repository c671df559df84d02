use serde::Deserialize;
use std::path::Path;

#[derive(Deserialize, Debug)]
pub struct PropConfig {
    #[serde(default = "defaults::area_path")]
    pub area_path: String,
    #[serde(default = "defaults::area_env_var")]
    pub area_env_var: String,
    #[serde(default = "defaults::service_socket")]
    pub service_socket: String,
    #[serde(default = "defaults::log_level")]
    pub log_level: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read '{path}'")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config")]
    Parse(#[from] toml::de::Error),
}

mod defaults {
    pub fn area_path() -> String {
        "/dev/__properties__/area".into()
    }

    pub fn area_env_var() -> String {
        "SYSPROP_WORKSPACE".into()
    }

    pub fn service_socket() -> String {
        "/dev/socket/propd".into()
    }

    pub fn log_level() -> String {
        "info".into()
    }
}

impl Default for PropConfig {
    fn default() -> Self {
        PropConfig {
            area_path: defaults::area_path(),
            area_env_var: defaults::area_env_var(),
            service_socket: defaults::service_socket(),
            log_level: defaults::log_level(),
        }
    }
}

impl PropConfig {
    pub fn load(path: impl AsRef<Path> + ToString) -> Result<Self, ConfigError> {
        let toml_str = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        let config: PropConfig = toml::from_str(&toml_str)?;
        Ok(config)
    }
}
