//! Configuration module for the add-on engine.
//!
//! This module handles all configuration-related functionality:
//! - Parsing and deserializing `atom-addons.yaml`
//! - Environment and `.env` overrides
//! - Validation of configuration values

mod spec;
mod parser;
mod validator;

pub use spec::{
    ClusterConfig, GatewayBackend, GatewayConfig, Mysql5OperatorConfig, OperatorImage,
    OperatorsConfig, PollingConfig, RedisOperatorImage, RegistryBackend, RegistryConfig,
    ServiceConfig,
};
pub use parser::{CONFIG_ENV_VAR, ConfigParser, DEFAULT_CONFIG_FILES, find_config_file};
pub use validator::{ConfigValidator, ValidationError, ValidationResult, is_valid_name};
