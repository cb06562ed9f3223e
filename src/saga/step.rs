//! Provisioning steps.
//!
//! A step is data: what to do going forward, and implicitly what undoing it
//! means. The executor interprets the action; definitions only build lists
//! of steps.

use serde::Serialize;
use serde_json::Value;
use std::fmt;

use crate::gateway::ResourceRef;
use crate::readiness::{PollSettings, ReadinessCondition};

/// What a step does.
#[derive(Debug, Clone)]
pub enum StepAction {
    /// Create a namespace if absent. Namespaces are shared and never
    /// compensated.
    EnsureNamespace {
        /// Namespace name.
        name: String,
    },

    /// Create a shared object if absent. Compensated only when this run
    /// created it, and never recorded as owned.
    EnsureShared {
        /// The shared object.
        resource: ResourceRef,
        /// Manifest used when it has to be created.
        manifest: Value,
    },

    /// Create an exclusively owned object.
    Create {
        /// The object to create.
        resource: ResourceRef,
        /// Its manifest.
        manifest: Value,
        /// Everything this step owns in creation order, including objects
        /// the platform derives from it.
        owned: Vec<ResourceRef>,
    },

    /// Wait until a condition holds on a target.
    AwaitReadiness {
        /// Condition name reported on timeout.
        condition_name: String,
        /// Object to observe.
        target: ResourceRef,
        /// Predicate to evaluate.
        condition: ReadinessCondition,
        /// Cadence and bound.
        settings: PollSettings,
        /// Output key under which the extracted value is kept.
        output: Option<String>,
    },
}

/// One named unit of a saga.
#[derive(Debug, Clone)]
pub struct Step {
    /// Step name, unique within a definition.
    pub name: String,
    /// The step's action.
    pub action: StepAction,
}

impl Step {
    /// Ensures a namespace exists.
    #[must_use]
    pub fn ensure_namespace(name: &str, namespace: &str) -> Self {
        Self {
            name: name.to_string(),
            action: StepAction::EnsureNamespace {
                name: namespace.to_string(),
            },
        }
    }

    /// Ensures a shared object exists.
    #[must_use]
    pub fn ensure_shared(name: &str, resource: ResourceRef, manifest: Value) -> Self {
        Self {
            name: name.to_string(),
            action: StepAction::EnsureShared { resource, manifest },
        }
    }

    /// Creates one owned object.
    #[must_use]
    pub fn create(name: &str, resource: ResourceRef, manifest: Value) -> Self {
        let owned = vec![resource.clone()];
        Self {
            name: name.to_string(),
            action: StepAction::Create {
                resource,
                manifest,
                owned,
            },
        }
    }

    /// Creates an object that also owns objects the platform derives from
    /// it. `derived` come first in the owned list so teardown removes the
    /// parent before them.
    #[must_use]
    pub fn create_with_derived(
        name: &str,
        resource: ResourceRef,
        manifest: Value,
        derived: Vec<ResourceRef>,
    ) -> Self {
        let mut owned = derived;
        owned.push(resource.clone());
        Self {
            name: name.to_string(),
            action: StepAction::Create {
                resource,
                manifest,
                owned,
            },
        }
    }

    /// Waits for a condition on a target.
    #[must_use]
    pub fn await_ready(
        name: &str,
        condition_name: &str,
        target: ResourceRef,
        condition: ReadinessCondition,
        settings: PollSettings,
    ) -> Self {
        Self {
            name: name.to_string(),
            action: StepAction::AwaitReadiness {
                condition_name: condition_name.to_string(),
                target,
                condition,
                settings,
                output: None,
            },
        }
    }

    /// Keeps the value a readiness step extracts under `key`.
    #[must_use]
    pub fn output(mut self, key: &str) -> Self {
        if let StepAction::AwaitReadiness { output, .. } = &mut self.action {
            *output = Some(key.to_string());
        }
        self
    }

    /// Describes the step without running it.
    #[must_use]
    pub fn describe(&self) -> StepDescription {
        let (action, target, compensated) = match &self.action {
            StepAction::EnsureNamespace { name } => (ActionKind::Namespace, format!("Namespace/{name}"), false),
            StepAction::EnsureShared { resource, .. } => (ActionKind::Shared, resource.to_string(), true),
            StepAction::Create { owned, .. } => (
                ActionKind::Create,
                owned.iter().map(ToString::to_string).collect::<Vec<_>>().join(", "),
                true,
            ),
            StepAction::AwaitReadiness {
                condition_name,
                target,
                settings,
                ..
            } => (
                ActionKind::Await,
                format!("{target} until {condition_name} (timeout {:?})", settings.timeout),
                false,
            ),
        };

        StepDescription {
            name: self.name.clone(),
            action,
            target,
            compensated,
        }
    }
}

/// Kind of step action, for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    /// Namespace creation.
    Namespace,
    /// Shared object creation.
    Shared,
    /// Owned object creation.
    Create,
    /// Readiness wait.
    Await,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Namespace => "namespace",
            Self::Shared => "shared",
            Self::Create => "create",
            Self::Await => "await",
        };
        f.write_str(s)
    }
}

/// Human-readable summary of a step.
#[derive(Debug, Clone, Serialize)]
pub struct StepDescription {
    /// Step name.
    pub name: String,
    /// Action kind.
    pub action: ActionKind,
    /// What the step acts on.
    pub target: String,
    /// Whether a later failure undoes this step.
    pub compensated: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{CustomKind, ResourceKind};
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn test_derived_resources_precede_parent() {
        let cr = ResourceRef::namespaced(
            ResourceKind::Custom(CustomKind::new("mysql.oracle.com", "v1", "MySQLCluster", "mysql5clusters")),
            "shop",
            "orders",
        );
        let pvc = ResourceRef::namespaced(ResourceKind::PersistentVolumeClaim, "shop", "data-orders-0");

        let step = Step::create_with_derived("cluster", cr.clone(), json!({}), vec![pvc.clone()]);
        match step.action {
            StepAction::Create { owned, .. } => assert_eq!(owned, vec![pvc, cr]),
            other => panic!("unexpected action: {other:?}"),
        }
    }

    #[test]
    fn test_describe() {
        let step = Step::await_ready(
            "poll-port",
            "port-allocated",
            ResourceRef::namespaced(ResourceKind::Service, "shop", "orders-public"),
            ReadinessCondition::NodePortAllocated,
            PollSettings::new(Duration::from_millis(100), Duration::from_secs(8)),
        )
        .output("port");

        let description = step.describe();
        assert_eq!(description.action, ActionKind::Await);
        assert!(!description.compensated);
        assert!(description.target.contains("port-allocated"));
        assert!(matches!(
            step.action,
            StepAction::AwaitReadiness { output: Some(ref key), .. } if key == "port"
        ));

        let ns = Step::ensure_namespace("namespace", "shop").describe();
        assert_eq!(ns.action, ActionKind::Namespace);
        assert!(!ns.compensated);
    }
}
