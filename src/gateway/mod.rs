//! Cluster resource gateway.
//!
//! This module provides the verbs the engine uses to create, read and delete
//! cluster objects, with a Kubernetes-backed implementation and an in-memory
//! one for tests and dry runs.

mod client;
mod cluster;
mod memory;
mod types;

pub use client::{GatewayResult, ResourceGateway};
pub use cluster::KubeGateway;
pub use memory::{Controller, GatewayCall, InMemoryGateway, NodePortAllocator, ReadyWorkloads, SpawnedObject};
pub use types::{CustomKind, ResourceKind, ResourceRef};
