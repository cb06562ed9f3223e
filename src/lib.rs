// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(dead_code)]                   // Unused code is forbidden
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// Tests assert with expect() and panic!() on unexpected variants
#![cfg_attr(test, allow(clippy::expect_used, clippy::panic, clippy::unwrap_used))]

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Atom Addons
//!
//! A saga-based provisioning engine for Kubernetes add-on services:
//! operator-managed databases, caches, applications and the operators
//! themselves.
//!
//! ## Overview
//!
//! Provisioning an add-on touches several cluster objects in a fixed order
//! (namespace, RBAC, configuration, the operator's custom resource) and then
//! waits for the operator to produce what the caller needs (a node port, a
//! generated password, a ready statefulset). This crate runs those steps as
//! a saga:
//!
//! - Steps run strictly in order against a [`gateway::ResourceGateway`]
//! - A failing step triggers compensation of every completed step, in reverse
//! - Readiness waits poll at a fixed interval under a timeout
//! - A successful run is recorded in an [`registry::AddonRegistry`] so
//!   teardown knows exactly which objects to delete
//!
//! ## Modules
//!
//! - [`config`]: Service configuration parsing and validation
//! - [`gateway`]: Cluster gateway (Kubernetes and in-memory)
//! - [`registry`]: Instance registry backends (local, S3, memory)
//! - [`readiness`]: Readiness polling and conditions
//! - [`saga`]: Step model and saga executor
//! - [`addons`]: Add-on definitions
//! - [`provisioner`]: Provision and deprovision entry points
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! type: mysqlv5
//! name: orders
//! namespace: shop
//! members: 3
//! export: true
//! database: orders
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod addons;
pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod provisioner;
pub mod readiness;
pub mod registry;
pub mod saga;

// ============================================================================
// Re-exports
// ============================================================================

pub use addons::{simulated_gateway, AddonCatalog, AddonDefinition, AddonRequest, AddonSummary};
pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigParser, ConfigValidator, ServiceConfig};
pub use error::{AddonError, Result};
pub use gateway::{InMemoryGateway, KubeGateway, ResourceGateway, ResourceKind, ResourceRef};
pub use provisioner::{AddonProvisioner, TeardownReport};
pub use readiness::{poll_until_ready, PollSettings, ReadinessCondition};
pub use registry::{
    AddonIdentity, AddonInstance, AddonRegistry, AddonType, IdentityLocks, InstanceStatus,
    LocalAddonRegistry, MemoryAddonRegistry, PartialIdentity, S3AddonRegistry,
};
pub use saga::{RunBounds, SagaExecutor, SagaOutcome, SharedUsage, Step};
