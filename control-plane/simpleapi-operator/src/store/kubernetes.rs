use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use kube::Client;
use kube::api::{
    Api, DeleteParams, ListParams, Patch, PatchParams, PostParams,
};
use kube::core::DynamicObject;
use serde_json::json;
use tracing::{debug, instrument};

use super::{ClusterStore, StoreError};
use crate::controller::types::RouteKind;
use crate::crd::{SimpleApi, SimpleApiStatus};
use crate::templates::route::api_resource;

/// [`ClusterStore`] backed by the Kubernetes API server.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
    field_manager: String,
}

impl KubeStore {
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
        }
    }

    fn post_params(&self) -> PostParams {
        PostParams {
            dry_run: false,
            field_manager: Some(self.field_manager.clone()),
        }
    }

    fn route_api(&self, kind: RouteKind, ns: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), ns, &api_resource(kind))
    }
}

fn object_name(meta: &kube::core::ObjectMeta) -> Result<&str, StoreError> {
    meta.name
        .as_deref()
        .ok_or_else(|| StoreError::Rejected("object has no name".into()))
}

#[async_trait]
impl ClusterStore for KubeStore {
    async fn get_app(
        &self,
        ns: &str,
        name: &str,
    ) -> Result<Option<SimpleApi>, StoreError> {
        let api: Api<SimpleApi> = Api::namespaced(self.client.clone(), ns);
        Ok(api.get_opt(name).await?)
    }

    async fn list_workloads(
        &self,
        ns: &str,
        selector: &str,
    ) -> Result<Vec<Deployment>, StoreError> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), ns);
        let list = api.list(&ListParams::default().labels(selector)).await?;
        Ok(list.items)
    }

    async fn list_endpoints(
        &self,
        ns: &str,
        selector: &str,
    ) -> Result<Vec<Service>, StoreError> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), ns);
        let list = api.list(&ListParams::default().labels(selector)).await?;
        Ok(list.items)
    }

    #[instrument(level = "debug", skip_all, fields(ns = %ns, name = ?obj.metadata.name))]
    async fn create_workload(
        &self,
        ns: &str,
        obj: &Deployment,
    ) -> Result<(), StoreError> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), ns);
        api.create(&self.post_params(), obj).await?;
        debug!("deployment created");
        Ok(())
    }

    #[instrument(level = "debug", skip_all, fields(ns = %ns, name = ?obj.metadata.name))]
    async fn create_endpoint(
        &self,
        ns: &str,
        obj: &Service,
    ) -> Result<(), StoreError> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), ns);
        api.create(&self.post_params(), obj).await?;
        debug!("service created");
        Ok(())
    }

    async fn delete_workload(&self, ns: &str, name: &str) -> Result<(), StoreError> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), ns);
        // Background propagation lets the GC remove the ReplicaSets and pods.
        api.delete(name, &DeleteParams::background()).await?;
        Ok(())
    }

    async fn delete_endpoint(&self, ns: &str, name: &str) -> Result<(), StoreError> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), ns);
        api.delete(name, &DeleteParams::background()).await?;
        Ok(())
    }

    async fn get_route(
        &self,
        kind: RouteKind,
        ns: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>, StoreError> {
        Ok(self.route_api(kind, ns).get_opt(name).await?)
    }

    async fn create_route(
        &self,
        kind: RouteKind,
        ns: &str,
        obj: &DynamicObject,
    ) -> Result<(), StoreError> {
        self.route_api(kind, ns)
            .create(&self.post_params(), obj)
            .await?;
        Ok(())
    }

    async fn replace_route(
        &self,
        kind: RouteKind,
        ns: &str,
        obj: &DynamicObject,
    ) -> Result<(), StoreError> {
        let name = object_name(&obj.metadata)?;
        self.route_api(kind, ns)
            .replace(name, &self.post_params(), obj)
            .await?;
        Ok(())
    }

    async fn patch_status(
        &self,
        ns: &str,
        name: &str,
        status: &SimpleApiStatus,
    ) -> Result<(), StoreError> {
        let api: Api<SimpleApi> = Api::namespaced(self.client.clone(), ns);
        let patch = json!({ "status": status });
        let pp = PatchParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        };
        api.patch_status(name, &pp, &Patch::Merge(&patch)).await?;
        Ok(())
    }
}
