//! Configuration validation for the service configuration.
//!
//! Collects every problem in one pass so `atomctl validate` can report them
//! together; the first error becomes the returned error.

use crate::error::{AddonError, ConfigError, Result};
use tracing::debug;

use super::spec::{RegistryBackend, ServiceConfig};

/// Longest DNS-1123 label.
const MAX_LABEL_LEN: usize = 63;

/// Validator for the service configuration.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a service configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if validation fails.
    pub fn validate(&self, config: &ServiceConfig) -> Result<ValidationResult> {
        let result = self.check(config);

        match result.errors.first() {
            None => {
                debug!("Configuration validation passed");
                Ok(result)
            }
            Some(first_error) => Err(AddonError::Config(ConfigError::ValidationError {
                message: first_error.message.clone(),
                field: Some(first_error.field.clone()),
            })),
        }
    }

    /// Runs every check and returns all findings without failing.
    #[must_use]
    pub fn check(&self, config: &ServiceConfig) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_cluster(config, &mut result);
        Self::validate_registry(config, &mut result);
        Self::validate_polling(config, &mut result);
        Self::validate_operators(config, &mut result);

        result
    }

    fn validate_cluster(config: &ServiceConfig, result: &mut ValidationResult) {
        if !is_valid_name(&config.cluster.id) {
            result.errors.push(ValidationError {
                field: String::from("cluster.id"),
                message: format!(
                    "Cluster id '{}' is invalid. Must be a lowercase DNS-1123 label.",
                    config.cluster.id
                ),
            });
        }

        if config.cluster.public_ip.is_none() {
            result
                .warnings
                .push(String::from("cluster.public_ip is not set; exported add-ons will have no service domain"));
        }
    }

    fn validate_registry(config: &ServiceConfig, result: &mut ValidationResult) {
        let registry = &config.registry;
        match registry.backend {
            RegistryBackend::S3 => {
                if registry.bucket.as_deref().is_none_or(str::is_empty) {
                    result.errors.push(ValidationError {
                        field: String::from("registry.bucket"),
                        message: String::from("S3 bucket is required when using s3 registry backend"),
                    });
                }
            }
            RegistryBackend::Local => {}
            RegistryBackend::Memory => {
                result
                    .warnings
                    .push(String::from("memory registry loses every record when the process exits"));
            }
        }
    }

    fn validate_polling(config: &ServiceConfig, result: &mut ValidationResult) {
        let polling = &config.polling;

        if polling.interval_ms == 0 {
            result.errors.push(ValidationError {
                field: String::from("polling.interval_ms"),
                message: String::from("Poll interval must be greater than zero"),
            });
            return;
        }

        if polling.interval_ms > 1_000 {
            result.warnings.push(format!(
                "polling.interval_ms is {}ms; readiness will be detected slowly",
                polling.interval_ms
            ));
        }

        let timeouts = [
            ("polling.port_timeout_secs", polling.port_timeout_secs),
            ("polling.secret_timeout_secs", polling.secret_timeout_secs),
            ("polling.workload_timeout_secs", polling.workload_timeout_secs),
        ];
        for (field, secs) in timeouts {
            if secs.saturating_mul(1_000) < polling.interval_ms {
                result.errors.push(ValidationError {
                    field: field.to_string(),
                    message: format!("Timeout of {secs}s is shorter than the poll interval"),
                });
            }
        }
    }

    fn validate_operators(config: &ServiceConfig, result: &mut ValidationResult) {
        let images = [
            ("operators.mysql5.image", &config.operators.mysql5.image),
            ("operators.mysql5.agent_image", &config.operators.mysql5.agent_image),
            ("operators.postgres.image", &config.operators.postgres.image),
            ("operators.redis.image", &config.operators.redis.image),
        ];
        for (field, image) in images {
            if image.trim().is_empty() {
                result.errors.push(ValidationError {
                    field: field.to_string(),
                    message: String::from("Image cannot be empty"),
                });
            }
        }
    }
}

/// Returns true if `name` is a valid DNS-1123 label: at most 63 lowercase
/// alphanumeric characters or hyphens, starting and ending alphanumeric.
#[must_use]
pub fn is_valid_name(name: &str) -> bool {
    if name.is_empty() || name.len() > MAX_LABEL_LEN {
        return false;
    }

    let alphanumeric = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit();

    if !name.starts_with(alphanumeric) || !name.ends_with(alphanumeric) {
        return false;
    }

    name.chars().all(|c| alphanumeric(c) || c == '-')
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub const fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_name() {
        assert!(is_valid_name("orders"));
        assert!(is_valid_name("my-db-123"));
        assert!(is_valid_name("1st"));
        assert!(is_valid_name("a"));
    }

    #[test]
    fn test_invalid_name() {
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("Orders")); // uppercase
        assert!(!is_valid_name("-orders")); // starts with hyphen
        assert!(!is_valid_name("orders-")); // ends with hyphen
        assert!(!is_valid_name("my_db")); // underscore
        assert!(!is_valid_name(&"a".repeat(64)));
    }

    #[test]
    fn test_default_config_is_valid() {
        let result = ConfigValidator::new()
            .validate(&ServiceConfig::default())
            .expect("valid");
        assert!(result.is_valid());
        // No public ip configured
        assert_eq!(result.warning_count(), 1);
    }

    #[test]
    fn test_s3_requires_bucket() {
        let mut config = ServiceConfig::default();
        config.registry.backend = RegistryBackend::S3;

        let result = ConfigValidator::new().check(&config);
        assert_eq!(result.error_count(), 1);
        assert_eq!(result.errors[0].field, "registry.bucket");
    }

    #[test]
    fn test_polling_bounds() {
        let mut config = ServiceConfig::default();
        config.polling.interval_ms = 0;
        assert!(ConfigValidator::new().validate(&config).is_err());

        config.polling.interval_ms = 10_000;
        config.polling.port_timeout_secs = 8;
        let result = ConfigValidator::new().check(&config);
        assert_eq!(result.error_count(), 1);
        assert_eq!(result.errors[0].field, "polling.port_timeout_secs");
        assert!(result.warnings.iter().any(|w| w.contains("interval")));
    }
}
