//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::registry::{AddonIdentity, AddonType, InstanceStatus, PartialIdentity};

/// atomctl - Provision databases, operators and applications on Kubernetes.
#[derive(Parser, Debug)]
#[command(name = "atomctl")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, global = true, env = "ATOM_ADDONS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Log format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub log_format: LogFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a default configuration file.
    Init {
        /// Directory to initialize (defaults to current directory).
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Force overwrite existing files.
        #[arg(short, long)]
        force: bool,
    },

    /// Validate the configuration and, optionally, a request file.
    Validate {
        /// Request file to check.
        request: Option<PathBuf>,

        /// Show all warnings, not just errors.
        #[arg(short, long)]
        warnings: bool,
    },

    /// Show the steps a request would run.
    Plan {
        /// Request file (YAML or JSON).
        request: PathBuf,
    },

    /// Provision an add-on.
    Provision {
        /// Request file (YAML or JSON).
        request: PathBuf,

        /// Give up and roll back after this many seconds.
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Tear down an add-on and delete its record.
    Deprovision {
        /// Instance to tear down.
        #[command(flatten)]
        identity: IdentityArgs,

        /// Stop after this many seconds.
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Show one recorded instance.
    Get {
        /// Instance to show.
        #[command(flatten)]
        identity: IdentityArgs,
    },

    /// List recorded instances in a namespace.
    List {
        /// Namespace to list.
        #[arg(short, long)]
        namespace: String,

        /// Cluster id (configured default otherwise).
        #[arg(long)]
        cluster: Option<String>,

        /// Only this add-on type.
        #[arg(short = 't', long = "type", conflicts_with = "exclude_type")]
        addon_type: Option<AddonType>,

        /// Every add-on type except this one.
        #[arg(long)]
        exclude_type: Option<AddonType>,
    },

    /// Change the status of a recorded instance.
    SetStatus {
        /// Instance to update.
        #[command(flatten)]
        identity: IdentityArgs,

        /// New status (ready, degraded, maintenance).
        #[arg(short, long)]
        status: InstanceStatus,
    },
}

/// Identity of an instance on the command line.
#[derive(Args, Debug, Clone)]
pub struct IdentityArgs {
    /// Add-on type.
    #[arg(short = 't', long = "type")]
    pub addon_type: AddonType,

    /// Instance name.
    #[arg(long)]
    pub name: String,

    /// Namespace.
    #[arg(short, long)]
    pub namespace: String,

    /// Cluster id (configured default otherwise).
    #[arg(long)]
    pub cluster: Option<String>,
}

impl IdentityArgs {
    /// Builds the identity, falling back to the default cluster.
    #[must_use]
    pub fn identity(&self, default_cluster: &str) -> AddonIdentity {
        AddonIdentity::new(
            self.addon_type,
            self.cluster.as_deref().unwrap_or(default_cluster),
            &self.namespace,
            &self.name,
        )
    }
}

/// Builds a listing filter, falling back to the default cluster.
#[must_use]
pub fn list_filter(namespace: &str, cluster: Option<&str>, default_cluster: &str) -> PartialIdentity {
    PartialIdentity::new(cluster.unwrap_or(default_cluster), namespace)
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

/// Log format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

impl Cli {
    /// Parses CLI arguments from the command line.
    #[must_use]
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deprovision_args() {
        let cli = Cli::try_parse_from([
            "atomctl",
            "--output",
            "json",
            "deprovision",
            "--type",
            "mysqlv5",
            "--name",
            "orders",
            "--namespace",
            "shop",
            "--timeout",
            "30",
        ])
        .expect("parse");

        assert!(matches!(cli.output, OutputFormat::Json));
        match cli.command {
            Commands::Deprovision { identity, timeout } => {
                assert_eq!(timeout, Some(30));
                let id = identity.identity("dev");
                assert_eq!(id.addon_type, AddonType::MySqlV5);
                assert_eq!(id.cluster_id, "dev");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_list_type_filters_conflict() {
        let result = Cli::try_parse_from([
            "atomctl", "list", "-n", "shop", "--type", "redis", "--exclude-type", "operator",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_set_status_parses_status() {
        let cli = Cli::try_parse_from([
            "atomctl", "set-status", "-t", "redis", "--name", "cache", "-n", "shop", "--status", "maintenance",
        ])
        .expect("parse");
        assert!(matches!(
            cli.command,
            Commands::SetStatus {
                status: InstanceStatus::Maintenance,
                ..
            }
        ));
    }
}
