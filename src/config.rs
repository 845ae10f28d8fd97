//! Configuration file
//!
//! ```toml
//! devices_dir = "/opt/atmel/devices"
//! cache_dir = "/tmp/avrfuse"
//! fixups = "my-fixups.ron"
//!
//! [programmer]
//! id = "usbasp"
//! interface = "isp"
//! port = "usb"
//! bitclock = "10"
//! extra_args = ["-F"]
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use thiserror::Error;

/// Error type for configuration loading
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read
    #[error("failed to read {path}: {source}")]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },
    /// The file is not valid TOML for this schema
    #[error("invalid configuration {path}: {source}")]
    Parse {
        /// File path
        path: PathBuf,
        /// Underlying error
        source: toml::de::Error,
    },
}

/// avrdude programmer settings
#[derive(Debug, Default, Clone, PartialEq, Eq, serde::Deserialize)]
#[serde(default)]
pub struct ProgrammerConfig {
    /// avrdude programmer id (`-c`)
    pub id: Option<String>,
    /// Programming interface name
    pub interface: Option<String>,
    /// Port (`-P`)
    pub port: Option<String>,
    /// Baud rate (`-b`)
    pub baudrate: Option<u32>,
    /// Bit clock period (`-B`)
    pub bitclock: Option<String>,
    /// Further arguments passed as is
    pub extra_args: Vec<String>,
}

/// Contents of the configuration file
#[derive(Debug, Default, Clone, PartialEq, Eq, serde::Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory with part descriptions
    pub devices_dir: Option<PathBuf>,
    /// Directory for parsed part descriptions
    pub cache_dir: Option<PathBuf>,
    /// Extra part description correction table (RON)
    pub fixups: Option<PathBuf>,
    /// avrdude settings
    pub programmer: ProgrammerConfig,
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "avrfuse")
}

impl Config {
    /// Default location of the configuration file
    pub fn default_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Default descriptor cache directory
    pub fn default_cache_dir() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.cache_dir().to_path_buf())
    }

    /// Parse a configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Load the configuration
    ///
    /// An explicitly given file must exist. Without one, the default
    /// location is tried and a missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) if path.is_file() => path,
                _ => {
                    log::debug!("No configuration file, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        let content = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        let config =
            Self::from_toml_str(&content).map_err(|source| ConfigError::Parse {
                path: path.clone(),
                source,
            })?;
        log::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full() {
        let config = Config::from_toml_str(
            r#"
            devices_dir = "/opt/devices"
            cache_dir = "/tmp/avrfuse"

            [programmer]
            id = "usbasp"
            interface = "isp"
            baudrate = 19200
            extra_args = ["-F", "-V"]
            "#,
        )
        .unwrap();

        assert_eq!(config.devices_dir, Some(PathBuf::from("/opt/devices")));
        assert_eq!(config.cache_dir, Some(PathBuf::from("/tmp/avrfuse")));
        assert_eq!(config.fixups, None);
        assert_eq!(config.programmer.id.as_deref(), Some("usbasp"));
        assert_eq!(config.programmer.baudrate, Some(19200));
        assert_eq!(config.programmer.port, None);
        assert_eq!(config.programmer.extra_args, vec!["-F", "-V"]);
    }

    #[test]
    fn test_parse_empty() {
        assert_eq!(Config::from_toml_str("").unwrap(), Config::default());
    }

    #[test]
    fn test_unknown_type_is_an_error() {
        assert!(Config::from_toml_str("devices_dir = 3").is_err());
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[programmer]\nid = \"avrisp2\"\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.programmer.id.as_deref(), Some("avrisp2"));

        assert!(matches!(
            Config::load(Some(&dir.path().join("missing.toml"))),
            Err(ConfigError::Io { .. })
        ));
    }
}
