//! Narrow async seam over the API server.
//!
//! The reconcile orchestrator only talks to a [`ClusterStore`]; `KubeStore`
//! backs it with a live cluster and `MemoryStore` with plain maps for tests.

mod kubernetes;
mod memory;

pub use kubernetes::KubeStore;
pub use memory::{MemoryStore, StoreCall, StoreOp};

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use kube::core::DynamicObject;

use crate::controller::types::RouteKind;
use crate::crd::{SimpleApi, SimpleApiStatus};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("rejected by api server: {0}")]
    Rejected(String),
    #[error("transient: {0}")]
    Transient(String),
    #[error("serialization: {0}")]
    Serialization(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::AlreadyExists(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

impl From<kube::Error> for StoreError {
    fn from(e: kube::Error) -> Self {
        match e {
            kube::Error::Api(ae) => match ae.code {
                404 => StoreError::NotFound(ae.message),
                409 if ae.reason == "AlreadyExists" => {
                    StoreError::AlreadyExists(ae.message)
                }
                409 => StoreError::Conflict(ae.message),
                400 | 422 => StoreError::Rejected(ae.message),
                _ => StoreError::Transient(format!("{}: {}", ae.code, ae.message)),
            },
            kube::Error::SerdeError(e) => StoreError::Serialization(e.to_string()),
            other => StoreError::Transient(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Everything one reconcile pass needs from the cluster.
///
/// Owner references travel inside the objects handed to the create/replace
/// calls; there is no separate ownership write.
#[async_trait]
pub trait ClusterStore: Send + Sync {
    async fn get_app(
        &self,
        ns: &str,
        name: &str,
    ) -> Result<Option<SimpleApi>, StoreError>;

    /// Deployments matching an equality label selector (`k=v,k2=v2`).
    async fn list_workloads(
        &self,
        ns: &str,
        selector: &str,
    ) -> Result<Vec<Deployment>, StoreError>;

    /// Services matching an equality label selector (`k=v,k2=v2`).
    async fn list_endpoints(
        &self,
        ns: &str,
        selector: &str,
    ) -> Result<Vec<Service>, StoreError>;

    async fn create_workload(
        &self,
        ns: &str,
        obj: &Deployment,
    ) -> Result<(), StoreError>;

    async fn create_endpoint(
        &self,
        ns: &str,
        obj: &Service,
    ) -> Result<(), StoreError>;

    async fn delete_workload(&self, ns: &str, name: &str) -> Result<(), StoreError>;

    async fn delete_endpoint(&self, ns: &str, name: &str) -> Result<(), StoreError>;

    async fn get_route(
        &self,
        kind: RouteKind,
        ns: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>, StoreError>;

    async fn create_route(
        &self,
        kind: RouteKind,
        ns: &str,
        obj: &DynamicObject,
    ) -> Result<(), StoreError>;

    /// Replace guarded by the object's resourceVersion; a stale one is a
    /// [`StoreError::Conflict`].
    async fn replace_route(
        &self,
        kind: RouteKind,
        ns: &str,
        obj: &DynamicObject,
    ) -> Result<(), StoreError>;

    async fn patch_status(
        &self,
        ns: &str,
        name: &str,
        status: &SimpleApiStatus,
    ) -> Result<(), StoreError>;
}

/// Parse an equality-only label selector into key/value pairs.
pub fn parse_selector(selector: &str) -> Vec<(String, String)> {
    selector
        .split(',')
        .filter_map(|term| {
            let (k, v) = term.split_once('=')?;
            let k = k.trim();
            if k.is_empty() {
                return None;
            }
            Some((k.to_string(), v.trim().trim_start_matches('=').to_string()))
        })
        .collect()
}
