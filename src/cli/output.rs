//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use serde::Serialize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::addons::AddonSummary;
use crate::error::{AddonError, Severity};
use crate::provisioner::TeardownReport;
use crate::registry::{AddonInstance, InstanceStatus};
use crate::saga::{ActionKind, StepDescription};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Plan step row for table display.
#[derive(Tabled)]
struct PlanStepRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Step")]
    name: String,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Target")]
    target: String,
    #[tabled(rename = "Undo")]
    compensated: String,
}

/// Instance row for table display.
#[derive(Tabled)]
struct InstanceRow {
    #[tabled(rename = "Type")]
    addon_type: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Resources")]
    resources: usize,
    #[tabled(rename = "Updated")]
    updated: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    fn json<T: Serialize>(value: &T) -> String {
        serde_json::to_string_pretty(value).unwrap_or_default()
    }

    /// Formats the steps of a plan.
    #[must_use]
    pub fn format_plan(&self, steps: &[StepDescription]) -> String {
        match self.format {
            OutputFormat::Json => Self::json(&steps),
            OutputFormat::Text => {
                let rows: Vec<PlanStepRow> = steps
                    .iter()
                    .enumerate()
                    .map(|(i, step)| PlanStepRow {
                        index: i + 1,
                        name: step.name.clone(),
                        action: Self::format_action(step.action),
                        target: Self::truncate(&step.target, 70),
                        compensated: if step.compensated { "yes" } else { "" }.to_string(),
                    })
                    .collect();

                let mut output = String::from("\nProvisioning plan\n\n");
                output.push_str(&Table::new(rows).to_string());
                let _ = write!(output, "\n\n{} step(s)\n", steps.len());
                output
            }
        }
    }

    /// Formats the result of a successful provision.
    #[must_use]
    pub fn format_summary(&self, summary: &AddonSummary) -> String {
        match self.format {
            OutputFormat::Json => Self::json(summary),
            OutputFormat::Text => {
                let identity = &summary.identity;
                let mut output = format!(
                    "{} Provisioned {} {}/{}\n\n",
                    "✓".green(),
                    identity.addon_type,
                    identity.namespace,
                    identity.name
                );
                let _ = writeln!(output, "   Host: {}", summary.host);
                if let Some(port) = summary.port {
                    let _ = writeln!(output, "   Port: {port}");
                }
                if let Some(domain) = &summary.domain {
                    let _ = writeln!(output, "   Domain: {domain}");
                }
                if let Some(username) = &summary.username {
                    let _ = writeln!(output, "   Username: {username}");
                }
                if summary.password.is_some() {
                    let _ = writeln!(output, "   Password: {}", "(hidden, use --output json)".dimmed());
                }
                if let Some(database) = &summary.database {
                    let _ = writeln!(output, "   Database: {database}");
                }
                let _ = writeln!(output, "   Resources: {}", summary.resources.len());
                output
            }
        }
    }

    /// Formats a teardown report.
    #[must_use]
    pub fn format_teardown(&self, report: &TeardownReport) -> String {
        match self.format {
            OutputFormat::Json => Self::json(report),
            OutputFormat::Text => {
                let mut output = format!("{} Deprovisioned\n\n", "✓".green());
                for resource in &report.deleted {
                    let _ = writeln!(output, "   {} {resource}", "-".red());
                }
                for resource in &report.skipped {
                    let _ = writeln!(output, "   {} {resource} (already gone)", "·".dimmed());
                }
                output
            }
        }
    }

    /// Formats one recorded instance.
    #[must_use]
    pub fn format_instance(&self, instance: &AddonInstance) -> String {
        match self.format {
            OutputFormat::Json => Self::json(instance),
            OutputFormat::Text => {
                let identity = &instance.identity;
                let mut output = format!("\n{identity}\n\n");
                let _ = writeln!(output, "   Status: {}", Self::format_status(instance.status));
                let _ = writeln!(output, "   Created: {}", instance.created_at.format("%Y-%m-%d %H:%M:%S"));
                let _ = writeln!(output, "   Updated: {}", instance.updated_at.format("%Y-%m-%d %H:%M:%S"));
                let _ = writeln!(output, "\n   Resources ({}):", instance.resources.len());
                for resource in &instance.resources {
                    let _ = writeln!(output, "     {resource}");
                }
                output
            }
        }
    }

    /// Formats a list of instances.
    #[must_use]
    pub fn format_instances(&self, instances: &[AddonInstance]) -> String {
        match self.format {
            OutputFormat::Json => Self::json(&instances),
            OutputFormat::Text => {
                if instances.is_empty() {
                    return "   No add-ons recorded.\n".to_string();
                }
                let rows: Vec<InstanceRow> = instances
                    .iter()
                    .map(|i| InstanceRow {
                        addon_type: i.identity.addon_type.to_string(),
                        name: i.identity.name.clone(),
                        status: Self::format_status(i.status),
                        resources: i.resources.len(),
                        updated: i.updated_at.format("%Y-%m-%d %H:%M").to_string(),
                    })
                    .collect();
                let mut output = Table::new(rows).to_string();
                output.push('\n');
                output
            }
        }
    }

    /// Formats an error with its machine code.
    #[must_use]
    pub fn format_error(&self, error: &AddonError) -> String {
        match self.format {
            OutputFormat::Json => Self::json(&serde_json::json!({
                "status": "error",
                "code": error.code(),
                "retryable": error.is_retryable(),
                "message": error.to_string(),
            })),
            OutputFormat::Text => {
                let marker = match error.severity() {
                    Severity::Critical => "✗ CRITICAL".red().bold().to_string(),
                    Severity::Failed => "✗".red().to_string(),
                    Severity::Rejected => "✗".yellow().to_string(),
                };
                let mut output = format!("{marker} {error} [{}]\n", error.code());
                if error.is_retryable() {
                    let _ = writeln!(output, "   The same call may succeed if repeated.");
                }
                output
            }
        }
    }

    /// Formats a plain status message.
    #[must_use]
    pub fn format_message(&self, message: &str) -> String {
        match self.format {
            OutputFormat::Json => Self::json(&serde_json::json!({ "status": "success", "message": message })),
            OutputFormat::Text => format!("{} {message}\n", "✓".green()),
        }
    }

    /// Formats an action kind with color.
    fn format_action(action: ActionKind) -> String {
        match action {
            ActionKind::Namespace => "namespace".dimmed().to_string(),
            ActionKind::Shared => "~shared".yellow().to_string(),
            ActionKind::Create => "+create".green().to_string(),
            ActionKind::Await => "await".cyan().to_string(),
        }
    }

    /// Formats an instance status with color.
    fn format_status(status: InstanceStatus) -> String {
        match status {
            InstanceStatus::Ready => "ready".green().to_string(),
            InstanceStatus::Degraded => "degraded".red().to_string(),
            InstanceStatus::Maintenance => "maintenance".yellow().to_string(),
        }
    }

    /// Truncates a string to a maximum number of characters.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{kept}...")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::test_support::instance;
    use crate::registry::AddonType;

    #[test]
    fn test_error_json_carries_code() {
        let formatter = OutputFormatter::new(OutputFormat::Json);
        let output = formatter.format_error(&AddonError::InstanceBusy {
            identity: "redis/dev/shop/cache".to_string(),
        });
        let value: serde_json::Value = serde_json::from_str(&output).expect("json");
        assert_eq!(value["code"], "instance_busy");
        assert_eq!(value["retryable"], true);
    }

    #[test]
    fn test_instances_json_is_array() {
        let formatter = OutputFormatter::new(OutputFormat::Json);
        let output = formatter.format_instances(&[instance(AddonType::Redis, "cache")]);
        let value: serde_json::Value = serde_json::from_str(&output).expect("json");
        assert_eq!(value[0]["name"], "cache");
        assert_eq!(value[0]["type"], "redis");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(OutputFormatter::truncate("short", 10), "short");
        assert_eq!(OutputFormatter::truncate("abcdefghijkl", 8), "abcde...");
    }
}
