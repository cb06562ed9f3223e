//! Saga executor for provisioning steps.
//!
//! Steps run strictly in order. When one fails, every step that already
//! succeeded is compensated in reverse order before the error is returned.
//! Compensation is best effort: a failed deletion is logged and reported
//! alongside the original error, and the remaining compensations still run.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{AddonError, CompensationFailure, CompensationReport, GatewayError, PollError, Result};
use crate::gateway::{GatewayResult, ResourceGateway, ResourceKind, ResourceRef};
use crate::readiness::wait_for;

use super::step::{Step, StepAction};

/// Deadline and cancellation for one provision or deprovision call.
#[derive(Debug, Clone, Default)]
pub struct RunBounds {
    /// Instant after which the current step is treated as failed.
    pub deadline: Option<Instant>,
    /// Caller cancellation.
    pub cancel: CancellationToken,
}

impl RunBounds {
    /// No deadline, never cancelled unless the token is triggered.
    #[must_use]
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Bounds the run to `timeout` from now.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
            cancel: CancellationToken::new(),
        }
    }

    /// Uses an existing cancellation token.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Returns why the run must stop, if it must.
    #[must_use]
    pub fn interruption(&self) -> Option<&'static str> {
        if self.cancel.is_cancelled() {
            Some(CANCELLED)
        } else if self.deadline.is_some_and(|d| Instant::now() >= d) {
            Some(DEADLINE_EXCEEDED)
        } else {
            None
        }
    }

    /// Runs a future unless the deadline passes or the token fires first.
    ///
    /// # Errors
    ///
    /// Returns the interruption reason if the future did not finish.
    pub async fn guard<F: Future>(&self, future: F) -> std::result::Result<F::Output, &'static str> {
        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(CANCELLED),
            () = deadline => Err(DEADLINE_EXCEEDED),
            output = future => Ok(output),
        }
    }
}

/// Interruption cause when the caller cancels.
const CANCELLED: &str = "cancelled";

/// Interruption cause when the deadline passes.
const DEADLINE_EXCEEDED: &str = "deadline exceeded";

/// What a successful saga produced.
#[derive(Debug, Clone, Default)]
pub struct SagaOutcome {
    /// Owned resources in creation order.
    pub resources: Vec<ResourceRef>,
    /// Values extracted by readiness steps.
    pub outputs: BTreeMap<String, Value>,
    /// Names of the completed steps.
    pub completed: Vec<String>,
}

/// How a step failed.
#[derive(Debug)]
enum StepError {
    Failed(String),
    Timeout { condition: String, last_error: Option<String> },
}

/// Side effects of a successful step.
#[derive(Debug, Default)]
struct StepEffect {
    /// Objects to delete if a later step fails.
    created: Vec<ResourceRef>,
    /// Objects owned by the instance.
    owned: Vec<ResourceRef>,
    /// Extracted readiness value.
    output: Option<(String, Value)>,
}

/// Compensation registered by a completed step.
#[derive(Debug)]
struct Compensation {
    step: String,
    targets: Vec<ResourceRef>,
    shared: bool,
}

/// Answers whether a shared object this saga created is still relied on
/// by something other than the running saga.
///
/// Consulted before a shared object is compensated. Without one, shared
/// objects created by the saga are always deleted on failure.
#[async_trait]
pub trait SharedUsage: Send + Sync {
    /// Returns true if `resource` must survive compensation.
    async fn in_use_elsewhere(&self, resource: &ResourceRef) -> bool;
}

/// Executes provisioning sagas against a gateway.
pub struct SagaExecutor<'a> {
    gateway: &'a dyn ResourceGateway,
    shared_usage: Option<&'a dyn SharedUsage>,
}

impl std::fmt::Debug for SagaExecutor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SagaExecutor")
            .field("gateway", &self.gateway.backend_type())
            .field("shared_usage", &self.shared_usage.is_some())
            .finish()
    }
}

impl<'a> SagaExecutor<'a> {
    /// Creates a new executor.
    #[must_use]
    pub const fn new(gateway: &'a dyn ResourceGateway) -> Self {
        Self {
            gateway,
            shared_usage: None,
        }
    }

    /// Checks shared objects with `usage` before compensating them.
    #[must_use]
    pub const fn with_shared_usage(mut self, usage: &'a dyn SharedUsage) -> Self {
        self.shared_usage = Some(usage);
        self
    }

    /// Runs every step in order.
    ///
    /// # Errors
    ///
    /// Returns [`AddonError::StepFailed`] or [`AddonError::ReadinessTimeout`]
    /// after compensating every completed step. Compensation failures are
    /// attached to the error.
    pub async fn execute(&self, saga: &str, steps: &[Step], bounds: &RunBounds) -> Result<SagaOutcome> {
        info!("Starting saga {saga} ({} steps)", steps.len());

        let mut outcome = SagaOutcome::default();
        let mut compensations: Vec<Compensation> = Vec::new();

        for step in steps {
            info!(saga = %saga, step = %step.name, "Executing step");

            let result = match bounds.guard(self.forward(step, bounds)).await {
                Ok(result) => result,
                Err(reason) => Err(StepError::Failed(reason.to_string())),
            };

            match result {
                Ok(effect) => {
                    if !effect.created.is_empty() {
                        compensations.push(Compensation {
                            step: step.name.clone(),
                            targets: effect.created,
                            shared: matches!(step.action, StepAction::EnsureShared { .. }),
                        });
                    }
                    outcome.resources.extend(effect.owned);
                    if let Some((key, value)) = effect.output {
                        outcome.outputs.insert(key, value);
                    }
                    outcome.completed.push(step.name.clone());
                }
                Err(error) => {
                    warn!(saga = %saga, step = %step.name, "Step failed: {error:?}; compensating");
                    let compensation = self.compensate(&compensations).await;
                    return Err(match error {
                        StepError::Failed(cause) => AddonError::StepFailed {
                            step: step.name.clone(),
                            cause,
                            compensation,
                        },
                        StepError::Timeout { condition, last_error } => AddonError::ReadinessTimeout {
                            condition,
                            last_error,
                            compensation,
                        },
                    });
                }
            }
        }

        info!("Saga {saga} completed ({} owned resources)", outcome.resources.len());
        Ok(outcome)
    }

    async fn forward(&self, step: &Step, bounds: &RunBounds) -> std::result::Result<StepEffect, StepError> {
        match &step.action {
            StepAction::EnsureNamespace { name } => {
                let created = self
                    .gateway
                    .create_namespace_if_absent(name)
                    .await
                    .map_err(|e| StepError::Failed(e.to_string()))?;
                debug!("Namespace {name} (created: {created})");
                Ok(StepEffect::default())
            }

            StepAction::EnsureShared { resource, manifest } => {
                let existing = get_ref(self.gateway, resource)
                    .await
                    .map_err(|e| StepError::Failed(e.to_string()))?;
                if existing.is_some() {
                    debug!("Shared {resource} already present");
                    return Ok(StepEffect::default());
                }

                match create_ref(self.gateway, resource, manifest).await {
                    Ok(()) => Ok(StepEffect {
                        created: vec![resource.clone()],
                        ..StepEffect::default()
                    }),
                    Err(GatewayError::AlreadyExists { .. }) => Ok(StepEffect::default()),
                    Err(e) => Err(StepError::Failed(e.to_string())),
                }
            }

            StepAction::Create { resource, manifest, owned } => {
                create_ref(self.gateway, resource, manifest)
                    .await
                    .map_err(|e| StepError::Failed(e.to_string()))?;
                Ok(StepEffect {
                    created: owned.clone(),
                    owned: owned.clone(),
                    output: None,
                })
            }

            StepAction::AwaitReadiness {
                condition_name,
                target,
                condition,
                settings,
                output,
            } => match wait_for(self.gateway, target, condition, *settings, &bounds.cancel).await {
                Ok(value) => Ok(StepEffect {
                    output: output.as_ref().map(|key| (key.clone(), value)),
                    ..StepEffect::default()
                }),
                Err(PollError::Timeout { last_error, .. }) => Err(StepError::Timeout {
                    condition: condition_name.clone(),
                    last_error,
                }),
                Err(PollError::Cancelled) => Err(StepError::Failed(CANCELLED.to_string())),
            },
        }
    }

    /// Undoes completed steps in reverse order.
    async fn compensate(&self, compensations: &[Compensation]) -> CompensationReport {
        let mut report = CompensationReport::default();

        for compensation in compensations.iter().rev() {
            for target in compensation.targets.iter().rev() {
                if compensation.shared && self.in_use_elsewhere(target).await {
                    info!(step = %compensation.step, "Keeping shared {target}, still in use");
                    continue;
                }
                debug!(step = %compensation.step, "Compensating {target}");
                if let Err(e) = delete_ref(self.gateway, target).await {
                    warn!(step = %compensation.step, "Compensation failed for {target}: {e}");
                    report.failures.push(CompensationFailure {
                        step: compensation.step.clone(),
                        cause: format!("{target}: {e}"),
                    });
                }
            }
        }

        if report.is_clean() {
            info!("Compensated {} step(s)", compensations.len());
        }
        report
    }

    async fn in_use_elsewhere(&self, target: &ResourceRef) -> bool {
        match self.shared_usage {
            Some(usage) => usage.in_use_elsewhere(target).await,
            None => false,
        }
    }
}

/// Creates the object a reference points to.
async fn create_ref(gateway: &dyn ResourceGateway, resource: &ResourceRef, manifest: &Value) -> GatewayResult<()> {
    match (&resource.kind, resource.namespace()) {
        (ResourceKind::Custom(custom), Some(namespace)) => {
            gateway.create_custom_resource(custom, namespace, manifest).await?;
        }
        (kind, namespace) => {
            gateway.create_resource(kind, namespace, manifest).await?;
        }
    }
    Ok(())
}

/// Fetches the object a reference points to.
pub(crate) async fn get_ref(gateway: &dyn ResourceGateway, resource: &ResourceRef) -> GatewayResult<Option<Value>> {
    gateway
        .get_resource(&resource.kind, resource.namespace(), &resource.name)
        .await
}

/// Deletes the object a reference points to. Absent objects are fine.
pub(crate) async fn delete_ref(gateway: &dyn ResourceGateway, resource: &ResourceRef) -> GatewayResult<()> {
    match (&resource.kind, resource.namespace()) {
        (ResourceKind::Custom(custom), Some(namespace)) => {
            gateway.delete_custom_resource(custom, namespace, &resource.name).await
        }
        (kind, namespace) => gateway.delete_resource(kind, namespace, &resource.name).await,
    }
}
