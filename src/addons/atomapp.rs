//! Generic single-image applications.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{ParamsError, Result};
use crate::gateway::{ResourceKind, ResourceRef};
use crate::readiness::ReadinessCondition;
use crate::registry::{AddonIdentity, AddonPayload, AddonType, AtomAppData};
use crate::saga::{SagaOutcome, Step};

use super::manifests::{self, label, ContainerSpec};
use super::{in_range, output_i64, service_host, AddonCatalog, AddonDefinition, AddonSummary};

const APP_LABEL: &str = "app";

/// Parameters of an application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AtomAppParams {
    /// Application name.
    pub name: String,
    /// Target namespace.
    pub namespace: String,
    /// Target cluster id.
    #[serde(default)]
    pub cluster_id: Option<String>,
    /// Container image.
    pub image: String,
    /// Replicas, 1 to 20.
    #[serde(default)]
    pub replicas: Option<i32>,
    /// Container port.
    #[serde(default)]
    pub port: Option<i32>,
    /// Environment variables.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Expose the application through a node port.
    #[serde(default)]
    pub export: bool,
}

impl AtomAppParams {
    pub(super) fn resolve(&self, catalog: &AddonCatalog) -> std::result::Result<AtomAppDefinition, ParamsError> {
        let identity = catalog.identity(
            AddonType::AtomApp,
            self.cluster_id.as_deref(),
            &self.namespace,
            &self.name,
        )?;
        if self.image.trim().is_empty() {
            return Err(ParamsError::Missing { field: "image" });
        }

        Ok(AtomAppDefinition {
            identity,
            image: self.image.clone(),
            replicas: in_range("replicas", self.replicas, 1, 1, 20)?,
            port: in_range("port", self.port, 8080, 1, 65535)?,
            env: self.env.clone(),
            export: self.export,
            catalog: catalog.clone(),
        })
    }
}

/// A resolved application.
#[derive(Debug, Clone)]
pub struct AtomAppDefinition {
    identity: AddonIdentity,
    image: String,
    replicas: i32,
    port: i32,
    env: BTreeMap<String, String>,
    export: bool,
    catalog: AddonCatalog,
}

impl AtomAppDefinition {
    fn name(&self) -> &str {
        &self.identity.name
    }

    fn node_port_service(&self) -> Option<String> {
        self.export.then(|| format!("{}-public", self.name()))
    }
}

impl AddonDefinition for AtomAppDefinition {
    fn identity(&self) -> &AddonIdentity {
        &self.identity
    }

    fn plan(&self) -> Result<Vec<Step>> {
        let ns = self.identity.namespace.as_str();
        let name = self.name();
        let labels = label(APP_LABEL, name);
        let container = ContainerSpec {
            image: self.image.clone(),
            port: Some(self.port),
            env: self.env.clone(),
            ..ContainerSpec::default()
        };

        let mut steps = vec![
            Step::ensure_namespace("namespace", ns),
            Step::create(
                "deployment",
                ResourceRef::namespaced(ResourceKind::Deployment, ns, name),
                manifests::deployment(name, &labels, self.replicas, &container)?,
            ),
            Step::create(
                "service",
                ResourceRef::namespaced(ResourceKind::Service, ns, name),
                manifests::service(name, &labels, self.port, false)?,
            ),
        ];

        if let Some(svc) = self.node_port_service() {
            steps.push(Step::create(
                "node-port-service",
                ResourceRef::namespaced(ResourceKind::Service, ns, &svc),
                manifests::service(&svc, &labels, self.port, true)?,
            ));
            steps.push(
                Step::await_ready(
                    "poll-port",
                    "port-allocated",
                    ResourceRef::namespaced(ResourceKind::Service, ns, &svc),
                    ReadinessCondition::NodePortAllocated,
                    self.catalog.polling.port(),
                )
                .output("port"),
            );
        }

        steps.push(Step::await_ready(
            "poll-deployment-ready",
            "deployment-ready",
            ResourceRef::namespaced(ResourceKind::Deployment, ns, name),
            ReadinessCondition::DeploymentReady,
            self.catalog.polling.workload(),
        ));

        Ok(steps)
    }

    fn payload(&self, outcome: &SagaOutcome) -> AddonPayload {
        AddonPayload::AtomApp(AtomAppData {
            deployment_name: self.name().to_string(),
            service_name: self.name().to_string(),
            node_port_service_name: self.node_port_service(),
            port: output_i64(outcome, "port").and_then(|p| i32::try_from(p).ok()),
            service_domain: if self.export {
                self.catalog.public_ip.clone()
            } else {
                Some(service_host(self.name(), &self.identity.namespace))
            },
            image: self.image.clone(),
            replicas: self.replicas,
        })
    }

    fn summary(&self, outcome: &SagaOutcome) -> AddonSummary {
        let mut summary = AddonSummary::new(self.identity.clone(), self.name(), outcome);
        if self.export {
            summary.port = output_i64(outcome, "port");
            summary.domain.clone_from(&self.catalog.public_ip);
        } else {
            summary.port = Some(i64::from(self.port));
            summary.domain = Some(service_host(self.name(), &self.identity.namespace));
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> AtomAppParams {
        AtomAppParams {
            name: "web".to_string(),
            namespace: "shop".to_string(),
            image: "nginx:1.27".to_string(),
            ..AtomAppParams::default()
        }
    }

    #[test]
    fn test_plan_with_export() {
        let mut p = params();
        p.export = true;
        let definition = p.resolve(&AddonCatalog::default()).expect("resolve");
        let names: Vec<String> = definition
            .plan()
            .expect("plan")
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(
            names,
            vec![
                "namespace",
                "deployment",
                "service",
                "node-port-service",
                "poll-port",
                "poll-deployment-ready",
            ]
        );
    }

    #[test]
    fn test_image_required() {
        let mut p = params();
        p.image = String::new();
        assert!(matches!(
            p.resolve(&AddonCatalog::default()),
            Err(ParamsError::Missing { field: "image" })
        ));
    }

    #[test]
    fn test_port_range() {
        let mut p = params();
        p.port = Some(70_000);
        assert!(matches!(
            p.resolve(&AddonCatalog::default()),
            Err(ParamsError::OutOfRange { field: "port", .. })
        ));
    }
}
