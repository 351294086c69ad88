use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::core::{DynamicObject, ObjectMeta};
use tokio::sync::Mutex;

use super::{ClusterStore, StoreError, parse_selector};
use crate::controller::types::RouteKind;
use crate::crd::{SimpleApi, SimpleApiStatus};

/// Operations a failure can be injected into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    GetApp,
    ListWorkloads,
    ListEndpoints,
    CreateWorkload,
    CreateEndpoint,
    DeleteWorkload,
    DeleteEndpoint,
    GetRoute,
    CreateRoute,
    ReplaceRoute,
    PatchStatus,
}

/// A write that reached the store, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    CreateWorkload(String),
    CreateEndpoint(String),
    DeleteWorkload(String),
    DeleteEndpoint(String),
    CreateRoute(String),
    ReplaceRoute(String),
    PatchStatus(String),
}

type Key = (String, String);

#[derive(Default)]
struct State {
    apps: BTreeMap<Key, SimpleApi>,
    workloads: BTreeMap<Key, Deployment>,
    endpoints: BTreeMap<Key, Service>,
    routes: BTreeMap<(RouteKind, String, String), DynamicObject>,
    calls: Vec<StoreCall>,
    failures: Vec<(StoreOp, StoreError)>,
    revision: u64,
}

impl State {
    fn next_revision(&mut self) -> String {
        self.revision += 1;
        self.revision.to_string()
    }

    fn take_failure(&mut self, op: StoreOp) -> Result<(), StoreError> {
        match self.failures.iter().position(|(o, _)| *o == op) {
            Some(i) => Err(self.failures.remove(i).1),
            None => Ok(()),
        }
    }

    fn stamp(&mut self, meta: &mut ObjectMeta, ns: &str) {
        meta.namespace = Some(ns.to_string());
        meta.resource_version = Some(self.next_revision());
        if meta.uid.is_none() {
            meta.uid = Some(format!("uid-{}", self.revision));
        }
    }
}

fn key(ns: &str, name: &str) -> Key {
    (ns.to_string(), name.to_string())
}

fn matches_selector(meta: &ObjectMeta, selector: &[(String, String)]) -> bool {
    let labels = meta.labels.as_ref();
    selector
        .iter()
        .all(|(k, v)| labels.and_then(|l| l.get(k)) == Some(v))
}

fn owned_by(meta: &ObjectMeta, uid: &str) -> bool {
    meta.owner_references
        .as_ref()
        .map(|refs| refs.iter().any(|r| r.uid == uid))
        .unwrap_or(false)
}

fn name_of(meta: &ObjectMeta) -> Result<String, StoreError> {
    meta.name
        .clone()
        .ok_or_else(|| StoreError::Rejected("object has no name".into()))
}

/// In-process [`ClusterStore`] with API-server-like semantics: AlreadyExists
/// on duplicate create, NotFound on missing delete, resourceVersion checks on
/// replace and owner-reference cascade on app deletion.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite an app; assigns uid, generation and
    /// resourceVersion when missing.
    pub async fn insert_app(&self, mut app: SimpleApi) -> SimpleApi {
        let mut st = self.state.lock().await;
        let ns = app
            .metadata
            .namespace
            .clone()
            .unwrap_or_else(|| "default".to_string());
        let name = app.metadata.name.clone().unwrap_or_default();
        st.stamp(&mut app.metadata, &ns);
        if app.metadata.generation.is_none() {
            app.metadata.generation = Some(1);
        }
        st.apps.insert(key(&ns, &name), app.clone());
        app
    }

    /// Mutate an app's spec the way a user edit would: generation bumps,
    /// status is kept.
    pub async fn update_app<F>(&self, ns: &str, name: &str, f: F) -> Option<SimpleApi>
    where
        F: FnOnce(&mut SimpleApi),
    {
        let mut st = self.state.lock().await;
        let rv = st.next_revision();
        let app = st.apps.get_mut(&key(ns, name))?;
        f(app);
        app.metadata.generation = Some(app.metadata.generation.unwrap_or(0) + 1);
        app.metadata.resource_version = Some(rv);
        Some(app.clone())
    }

    pub async fn app(&self, ns: &str, name: &str) -> Option<SimpleApi> {
        self.state.lock().await.apps.get(&key(ns, name)).cloned()
    }

    /// Remove an app. With `cascade`, everything it controls goes too, as
    /// the garbage collector would eventually do.
    pub async fn delete_app(&self, ns: &str, name: &str, cascade: bool) {
        let mut st = self.state.lock().await;
        let Some(app) = st.apps.remove(&key(ns, name)) else {
            return;
        };
        let Some(uid) = app.metadata.uid.filter(|_| cascade) else {
            return;
        };
        st.workloads.retain(|_, d| !owned_by(&d.metadata, &uid));
        st.endpoints.retain(|_, s| !owned_by(&s.metadata, &uid));
        st.routes.retain(|_, r| !owned_by(&r.metadata, &uid));
    }

    pub async fn mark_deleting(&self, ns: &str, name: &str) {
        let mut st = self.state.lock().await;
        if let Some(app) = st.apps.get_mut(&key(ns, name)) {
            app.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
        }
    }

    /// Seed a workload without recording a call.
    pub async fn insert_workload(&self, ns: &str, mut obj: Deployment) {
        let mut st = self.state.lock().await;
        let name = obj.metadata.name.clone().unwrap_or_default();
        st.stamp(&mut obj.metadata, ns);
        st.workloads.insert(key(ns, &name), obj);
    }

    /// Seed an endpoint without recording a call.
    pub async fn insert_endpoint(&self, ns: &str, mut obj: Service) {
        let mut st = self.state.lock().await;
        let name = obj.metadata.name.clone().unwrap_or_default();
        st.stamp(&mut obj.metadata, ns);
        st.endpoints.insert(key(ns, &name), obj);
    }

    /// Seed a routing object without recording a call.
    pub async fn insert_route(&self, kind: RouteKind, ns: &str, mut obj: DynamicObject) {
        let mut st = self.state.lock().await;
        let name = obj.metadata.name.clone().unwrap_or_default();
        st.stamp(&mut obj.metadata, ns);
        st.routes.insert((kind, ns.to_string(), name), obj);
    }

    /// Names of stored workloads in a namespace, sorted.
    pub async fn workload_names(&self, ns: &str) -> Vec<String> {
        let st = self.state.lock().await;
        st.workloads
            .keys()
            .filter(|(n, _)| n == ns)
            .map(|(_, name)| name.clone())
            .collect()
    }

    /// Names of stored endpoints in a namespace, sorted.
    pub async fn endpoint_names(&self, ns: &str) -> Vec<String> {
        let st = self.state.lock().await;
        st.endpoints
            .keys()
            .filter(|(n, _)| n == ns)
            .map(|(_, name)| name.clone())
            .collect()
    }

    pub async fn workload(&self, ns: &str, name: &str) -> Option<Deployment> {
        self.state.lock().await.workloads.get(&key(ns, name)).cloned()
    }

    pub async fn endpoint(&self, ns: &str, name: &str) -> Option<Service> {
        self.state.lock().await.endpoints.get(&key(ns, name)).cloned()
    }

    pub async fn route(&self, kind: RouteKind, ns: &str, name: &str) -> Option<DynamicObject> {
        let st = self.state.lock().await;
        st.routes
            .get(&(kind, ns.to_string(), name.to_string()))
            .cloned()
    }

    /// Make the next call of `op` fail with `err`; queued failures are
    /// consumed in order.
    pub async fn fail_next(&self, op: StoreOp, err: StoreError) {
        self.state.lock().await.failures.push((op, err));
    }

    pub async fn calls(&self) -> Vec<StoreCall> {
        self.state.lock().await.calls.clone()
    }

    pub async fn clear_calls(&self) {
        self.state.lock().await.calls.clear();
    }
}

#[async_trait]
impl ClusterStore for MemoryStore {
    async fn get_app(
        &self,
        ns: &str,
        name: &str,
    ) -> Result<Option<SimpleApi>, StoreError> {
        let mut st = self.state.lock().await;
        st.take_failure(StoreOp::GetApp)?;
        Ok(st.apps.get(&key(ns, name)).cloned())
    }

    async fn list_workloads(
        &self,
        ns: &str,
        selector: &str,
    ) -> Result<Vec<Deployment>, StoreError> {
        let mut st = self.state.lock().await;
        st.take_failure(StoreOp::ListWorkloads)?;
        let sel = parse_selector(selector);
        Ok(st
            .workloads
            .iter()
            .filter(|((n, _), d)| n == ns && matches_selector(&d.metadata, &sel))
            .map(|(_, d)| d.clone())
            .collect())
    }

    async fn list_endpoints(
        &self,
        ns: &str,
        selector: &str,
    ) -> Result<Vec<Service>, StoreError> {
        let mut st = self.state.lock().await;
        st.take_failure(StoreOp::ListEndpoints)?;
        let sel = parse_selector(selector);
        Ok(st
            .endpoints
            .iter()
            .filter(|((n, _), s)| n == ns && matches_selector(&s.metadata, &sel))
            .map(|(_, s)| s.clone())
            .collect())
    }

    async fn create_workload(
        &self,
        ns: &str,
        obj: &Deployment,
    ) -> Result<(), StoreError> {
        let mut st = self.state.lock().await;
        st.take_failure(StoreOp::CreateWorkload)?;
        let name = name_of(&obj.metadata)?;
        if st.workloads.contains_key(&key(ns, &name)) {
            return Err(StoreError::AlreadyExists(format!("deployment {ns}/{name}")));
        }
        let mut obj = obj.clone();
        st.stamp(&mut obj.metadata, ns);
        st.workloads.insert(key(ns, &name), obj);
        st.calls.push(StoreCall::CreateWorkload(name));
        Ok(())
    }

    async fn create_endpoint(
        &self,
        ns: &str,
        obj: &Service,
    ) -> Result<(), StoreError> {
        let mut st = self.state.lock().await;
        st.take_failure(StoreOp::CreateEndpoint)?;
        let name = name_of(&obj.metadata)?;
        if st.endpoints.contains_key(&key(ns, &name)) {
            return Err(StoreError::AlreadyExists(format!("service {ns}/{name}")));
        }
        let mut obj = obj.clone();
        st.stamp(&mut obj.metadata, ns);
        st.endpoints.insert(key(ns, &name), obj);
        st.calls.push(StoreCall::CreateEndpoint(name));
        Ok(())
    }

    async fn delete_workload(&self, ns: &str, name: &str) -> Result<(), StoreError> {
        let mut st = self.state.lock().await;
        st.take_failure(StoreOp::DeleteWorkload)?;
        if st.workloads.remove(&key(ns, name)).is_none() {
            return Err(StoreError::NotFound(format!("deployment {ns}/{name}")));
        }
        st.calls.push(StoreCall::DeleteWorkload(name.to_string()));
        Ok(())
    }

    async fn delete_endpoint(&self, ns: &str, name: &str) -> Result<(), StoreError> {
        let mut st = self.state.lock().await;
        st.take_failure(StoreOp::DeleteEndpoint)?;
        if st.endpoints.remove(&key(ns, name)).is_none() {
            return Err(StoreError::NotFound(format!("service {ns}/{name}")));
        }
        st.calls.push(StoreCall::DeleteEndpoint(name.to_string()));
        Ok(())
    }

    async fn get_route(
        &self,
        kind: RouteKind,
        ns: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>, StoreError> {
        let mut st = self.state.lock().await;
        st.take_failure(StoreOp::GetRoute)?;
        Ok(st
            .routes
            .get(&(kind, ns.to_string(), name.to_string()))
            .cloned())
    }

    async fn create_route(
        &self,
        kind: RouteKind,
        ns: &str,
        obj: &DynamicObject,
    ) -> Result<(), StoreError> {
        let mut st = self.state.lock().await;
        st.take_failure(StoreOp::CreateRoute)?;
        let name = name_of(&obj.metadata)?;
        let k = (kind, ns.to_string(), name.clone());
        if st.routes.contains_key(&k) {
            return Err(StoreError::AlreadyExists(format!("{kind} {ns}/{name}")));
        }
        let mut obj = obj.clone();
        st.stamp(&mut obj.metadata, ns);
        st.routes.insert(k, obj);
        st.calls.push(StoreCall::CreateRoute(name));
        Ok(())
    }

    async fn replace_route(
        &self,
        kind: RouteKind,
        ns: &str,
        obj: &DynamicObject,
    ) -> Result<(), StoreError> {
        let mut st = self.state.lock().await;
        st.take_failure(StoreOp::ReplaceRoute)?;
        let name = name_of(&obj.metadata)?;
        let k = (kind, ns.to_string(), name.clone());
        let Some(current) = st.routes.get(&k) else {
            return Err(StoreError::NotFound(format!("{kind} {ns}/{name}")));
        };
        if obj.metadata.resource_version.is_some()
            && obj.metadata.resource_version != current.metadata.resource_version
        {
            return Err(StoreError::Conflict(format!(
                "{kind} {ns}/{name}: resourceVersion is stale"
            )));
        }
        let mut obj = obj.clone();
        obj.metadata.uid = current.metadata.uid.clone();
        st.stamp(&mut obj.metadata, ns);
        st.routes.insert(k, obj);
        st.calls.push(StoreCall::ReplaceRoute(name));
        Ok(())
    }

    async fn patch_status(
        &self,
        ns: &str,
        name: &str,
        status: &SimpleApiStatus,
    ) -> Result<(), StoreError> {
        let mut st = self.state.lock().await;
        st.take_failure(StoreOp::PatchStatus)?;
        let Some(app) = st.apps.get_mut(&key(ns, name)) else {
            return Err(StoreError::NotFound(format!("simpleapi {ns}/{name}")));
        };
        app.status = Some(status.clone());
        st.calls.push(StoreCall::PatchStatus(name.to_string()));
        Ok(())
    }
}
