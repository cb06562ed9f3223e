//! Configuration parser for loading and merging configuration files.
//!
//! This module handles loading configuration from YAML files and environment
//! variables, with proper precedence and error handling.

use crate::error::{AddonError, ConfigError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::spec::ServiceConfig;

/// Environment variable naming an explicit configuration file.
pub const CONFIG_ENV_VAR: &str = "ATOM_ADDONS_CONFIG";

/// Configuration parser for loading the service configuration.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving relative paths.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new configuration parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving relative paths.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<ServiceConfig> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        if !path.exists() {
            return Err(AddonError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            AddonError::Config(ConfigError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<ServiceConfig> {
        debug!("Parsing YAML configuration");

        // An empty file is a valid, fully defaulted configuration
        if content.trim().is_empty() {
            return Ok(ServiceConfig::default());
        }

        let mut config: ServiceConfig = serde_yaml::from_str(content).map_err(|e| {
            let location = source.map(|p| p.display().to_string());
            AddonError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location,
            })
        })?;

        Self::resolve_paths(&mut config);

        debug!("Parsed configuration for cluster: {}", config.cluster.id);
        Ok(config)
    }

    /// Loads the configuration from `path` if given, otherwise searches for
    /// one and falls back to defaults. Environment overrides apply last.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicit file cannot be read or parsed.
    pub fn load(&self, path: Option<&Path>) -> Result<ServiceConfig> {
        let explicit = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var(CONFIG_ENV_VAR).ok().map(PathBuf::from));

        let mut config = match explicit {
            Some(path) => self.load_file(path)?,
            None => {
                let start = self
                    .base_path
                    .clone()
                    .or_else(|| std::env::current_dir().ok())
                    .unwrap_or_else(|| PathBuf::from("."));
                match find_config_file(&start) {
                    Ok(found) => self.load_file(found)?,
                    Err(_) => {
                        debug!("No configuration file found, using defaults");
                        ServiceConfig::default()
                    }
                }
            }
        };

        Self::apply_env_overrides(&mut config);
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(config: &mut ServiceConfig) {
        if let Ok(id) = std::env::var("ATOM_ADDONS_CLUSTER_ID") {
            debug!("Overriding cluster.id from environment");
            config.cluster.id = id;
        }

        if let Ok(ip) = std::env::var("ATOM_ADDONS_PUBLIC_IP") {
            debug!("Overriding cluster.public_ip from environment");
            config.cluster.public_ip = Some(ip);
        }

        if let Ok(backend) = std::env::var("ATOM_ADDONS_GATEWAY_BACKEND") {
            match backend.parse() {
                Ok(backend) => config.gateway.backend = backend,
                Err(e) => warn!("Ignoring ATOM_ADDONS_GATEWAY_BACKEND: {e}"),
            }
        }

        if let Ok(backend) = std::env::var("ATOM_ADDONS_REGISTRY_BACKEND") {
            match backend.parse() {
                Ok(backend) => config.registry.backend = backend,
                Err(e) => warn!("Ignoring ATOM_ADDONS_REGISTRY_BACKEND: {e}"),
            }
        }

        if let Ok(path) = std::env::var("ATOM_ADDONS_REGISTRY_PATH") {
            debug!("Overriding registry.path from environment");
            config.registry.path = Some(expand_home(Path::new(&path)));
        }

        if let Ok(bucket) = std::env::var("ATOM_ADDONS_REGISTRY_BUCKET") {
            debug!("Overriding registry.bucket from environment");
            config.registry.bucket = Some(bucket);
        }
    }

    /// Expands `~` in configured paths.
    fn resolve_paths(config: &mut ServiceConfig) {
        if let Some(path) = config.registry.path.as_mut() {
            *path = expand_home(path);
        }
        if let Some(path) = config.cluster.kubeconfig.as_mut() {
            *path = expand_home(path);
        }
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                AddonError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }
}

/// Replaces a leading `~` with the home directory.
fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir().map_or_else(|| path.to_path_buf(), |home| home.join(rest)),
        Err(_) => path.to_path_buf(),
    }
}

/// Default configuration file names to search for.
pub const DEFAULT_CONFIG_FILES: &[&str] = &["atom-addons.yaml", "atom-addons.yml"];

/// Finds the configuration file in the current directory or parent directories.
///
/// # Errors
///
/// Returns an error if no configuration file is found.
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = current.join(filename);
            if config_path.exists() {
                info!("Found configuration file: {}", config_path.display());
                return Ok(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(AddonError::Config(ConfigError::FileNotFound {
        path: start.join(DEFAULT_CONFIG_FILES[0]),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GatewayBackend, RegistryBackend};

    #[test]
    fn test_parse_empty_config() {
        let config = ConfigParser::new().parse_yaml("", None).expect("parse");
        assert_eq!(config, ServiceConfig::default());
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r"
cluster:
  id: dev-cluster
  public_ip: 10.0.0.10
  storage_class: standard
gateway:
  backend: simulated
registry:
  backend: s3
  bucket: addon-records
  prefix: addons
  region: eu-west-1
polling:
  interval_ms: 250
  port_timeout_secs: 10
operators:
  redis:
    image: quay.io/spotahome/redis-operator:v1.0.0
";
        let config = ConfigParser::new().parse_yaml(yaml, None).expect("parse");

        assert_eq!(config.cluster.id, "dev-cluster");
        assert_eq!(config.cluster.public_ip.as_deref(), Some("10.0.0.10"));
        assert_eq!(config.gateway.backend, GatewayBackend::Simulated);
        assert_eq!(config.registry.backend, RegistryBackend::S3);
        assert_eq!(config.registry.bucket.as_deref(), Some("addon-records"));
        assert_eq!(config.polling.interval_ms, 250);
        assert_eq!(config.polling.port_timeout_secs, 10);
        // Unspecified fields keep their defaults
        assert_eq!(config.polling.workload_timeout_secs, 600);
        assert_eq!(config.operators.mysql5.agent_image, "cuijx/mysql5-agent");
        assert_eq!(config.operators.redis.image, "quay.io/spotahome/redis-operator:v1.0.0");
    }

    #[test]
    fn test_parse_rejects_unknown_backend() {
        let result = ConfigParser::new().parse_yaml("registry:\n  backend: etcd\n", None);
        assert!(matches!(
            result,
            Err(AddonError::Config(ConfigError::ParseError { .. }))
        ));
    }

    #[test]
    fn test_find_config_file_in_parent() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("atom-addons.yaml"), "cluster:\n  id: found\n").expect("write");
        let nested = dir.path().join("a/b");
        std::fs::create_dir_all(&nested).expect("mkdir");

        let found = find_config_file(&nested).expect("found");
        assert_eq!(found, dir.path().join("atom-addons.yaml"));

        let config = ConfigParser::new().load_file(found).expect("load");
        assert_eq!(config.cluster.id, "found");
    }

    #[test]
    fn test_missing_explicit_file() {
        let result = ConfigParser::new().load_file("/nonexistent/atom-addons.yaml");
        assert!(matches!(
            result,
            Err(AddonError::Config(ConfigError::FileNotFound { .. }))
        ));
    }
}
