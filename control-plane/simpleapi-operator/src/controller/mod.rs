pub mod backoff;
pub mod reconcile;
pub mod retention;
pub mod status;
pub mod types;


use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::{apps::v1::Deployment, core::v1::Service};
use kube::{
    Client, Resource, ResourceExt,
    api::Api,
    core::DynamicObject,
    runtime::{
        Controller,
        controller::{self, Action, Config as ControllerConfig},
        watcher::Config,
    },
};
use tracing::{debug, info, warn};

use crate::config::OperatorConfig;
use crate::crd::SimpleApi;
use crate::desired::SpecError;
use crate::naming::Naming;
use crate::store::{ClusterStore, KubeStore, StoreError};
use crate::templates::owner::OwnershipError;
use crate::templates::route::api_resource;

use self::backoff::{ErrorBackoff, object_key};
use self::types::{RouteKind, Stage, UnknownRouteKind};

pub use self::reconcile::{
    NextStep, ReconcileReport, RouteOutcome, reconcile, reconcile_app,
};

#[derive(thiserror::Error, Debug)]
pub enum ReconcileErr {
    #[error("{stage}: {source}")]
    Store {
        stage: Stage,
        #[source]
        source: StoreError,
    },
    #[error(transparent)]
    Ownership(#[from] OwnershipError),
    #[error("invalid spec: {0}")]
    InvalidSpec(#[from] SpecError),
}

impl ReconcileErr {
    pub fn is_conflict(&self) -> bool {
        matches!(self, ReconcileErr::Store { source, .. } if source.is_conflict())
    }
}

pub struct ControllerContext {
    pub store: Arc<dyn ClusterStore>,
    pub cfg: OperatorConfig,
    pub naming: Naming,
    pub route_kind: RouteKind,
    pub backoff: ErrorBackoff,
}

impl ControllerContext {
    pub fn new(
        store: Arc<dyn ClusterStore>,
        cfg: OperatorConfig,
    ) -> Result<Self, UnknownRouteKind> {
        let cfg = cfg.normalized();
        Ok(Self {
            store,
            naming: cfg.naming(),
            route_kind: cfg.route_kind()?,
            backoff: ErrorBackoff::new(
                Duration::from_secs(cfg.error_backoff_base_secs),
                Duration::from_secs(cfg.error_backoff_max_secs),
            ),
            cfg,
        })
    }
}

fn scoped_api<K>(client: &Client, ns: Option<&str>) -> Api<K>
where
    K: Resource<Scope = NamespaceResourceScope>,
    <K as Resource>::DynamicType: Default,
{
    match ns {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

/// Watch SimpleApi objects plus the Deployments, Services and route objects
/// they own, and reconcile until a shutdown signal arrives.
pub async fn run_controller(
    client: Client,
    cfg: OperatorConfig,
) -> anyhow::Result<()> {
    let store = Arc::new(KubeStore::new(client.clone(), cfg.field_manager.clone()));
    let ctx = Arc::new(ControllerContext::new(store, cfg)?);
    let ns = ctx.cfg.watch_namespace.as_deref();

    let apps: Api<SimpleApi> = scoped_api(&client, ns);
    let deployments: Api<Deployment> = scoped_api(&client, ns);
    let services: Api<Service> = scoped_api(&client, ns);
    let route_ar = api_resource(ctx.route_kind);
    let routes: Api<DynamicObject> = match ns {
        Some(ns) => Api::namespaced_with(client.clone(), ns, &route_ar),
        None => Api::all_with(client.clone(), &route_ar),
    };
    // Only children we label are worth watching.
    let owned = Config::default().labels(&format!(
        "{}={}",
        ctx.naming.managed_by_label, ctx.naming.managed_by
    ));

    info!(
        namespace = ns.unwrap_or("<all>"),
        route_kind = %ctx.route_kind,
        retained = ctx.cfg.retained_versions,
        concurrency = ctx.cfg.concurrency,
        "starting simpleapi controller"
    );
    Controller::new(apps, Config::default())
        .owns(deployments, owned.clone())
        .owns(services, owned.clone())
        .owns_with(routes, route_ar, owned)
        .with_config(ControllerConfig::default().concurrency(ctx.cfg.concurrency))
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx.clone())
        .for_each(|res| {
            let ctx = ctx.clone();
            async move {
                match res {
                    Ok((obj_ref, action)) => {
                        debug!(object = %obj_ref, ?action, "reconciled")
                    }
                    // Gone before its reconcile ran; nothing will clear it later.
                    Err(controller::Error::ObjectNotFound(obj_ref)) => {
                        forget(&ctx, obj_ref.namespace.as_deref(), &obj_ref.name);
                        debug!(object = %obj_ref, "object deleted before reconcile")
                    }
                    Err(e) => warn!(error = %e, "reconcile error"),
                }
            }
        })
        .await;

    info!("simpleapi controller stopped");
    Ok(())
}

/// Drop per-object state kept for an object that no longer exists.
fn forget(ctx: &ControllerContext, ns: Option<&str>, name: &str) {
    ctx.backoff.reset(&object_key(ns.unwrap_or("default"), name));
}

pub fn error_policy(
    obj: Arc<SimpleApi>,
    err: &ReconcileErr,
    ctx: Arc<ControllerContext>,
) -> Action {
    let key = object_key(
        &obj.namespace().unwrap_or_else(|| "default".to_string()),
        &obj.name_any(),
    );
    match err {
        // Retrying cannot help until the user edits the object.
        ReconcileErr::InvalidSpec(_) => {
            ctx.backoff.reset(&key);
            Action::await_change()
        }
        e if e.is_conflict() => {
            debug!(%key, "reconcile conflict; requeue shortly");
            Action::requeue(Duration::from_secs(1))
        }
        e => {
            let delay = ctx.backoff.next_delay(&key);
            warn!(%key, error = %e, ?delay, "reconcile failed; backing off");
            Action::requeue(delay)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::SimpleApiSpec;
    use crate::store::MemoryStore;

    fn ctx() -> Arc<ControllerContext> {
        Arc::new(
            ControllerContext::new(
                Arc::new(MemoryStore::new()),
                OperatorConfig::default(),
            )
            .unwrap(),
        )
    }

    fn obj() -> Arc<SimpleApi> {
        let mut o = SimpleApi::new(
            "my-api",
            SimpleApiSpec {
                image: "img".into(),
                version: "v1".into(),
                port: 8080,
                replicas: None,
                ingress_host_name: None,
                image_pull_secret: None,
                image_pull_policy: None,
                service_account_name: None,
                envoy_gateway: None,
                envoy_gateway_namespace: None,
                startup_probe: None,
            },
        );
        o.metadata.namespace = Some("apps".into());
        Arc::new(o)
    }

    #[test]
    fn conflicts_requeue_after_one_second() {
        let err = ReconcileErr::Store {
            stage: Stage::RoutingSync,
            source: StoreError::Conflict("stale".into()),
        };
        assert!(err.is_conflict());
        assert_eq!(
            error_policy(obj(), &err, ctx()),
            Action::requeue(Duration::from_secs(1))
        );
    }

    #[test]
    fn transient_errors_back_off_per_object() {
        let c = ctx();
        let err = ReconcileErr::Store {
            stage: Stage::Applying,
            source: StoreError::Transient("unavailable".into()),
        };
        assert_eq!(
            error_policy(obj(), &err, c.clone()),
            Action::requeue(Duration::from_secs(5))
        );
        assert_eq!(
            error_policy(obj(), &err, c.clone()),
            Action::requeue(Duration::from_secs(10))
        );
        assert_eq!(c.backoff.failures("apps/my-api"), 2);
    }

    #[test]
    fn forgetting_a_deleted_object_clears_its_backoff() {
        let c = ctx();
        let err = ReconcileErr::Store {
            stage: Stage::Applying,
            source: StoreError::Transient("unavailable".into()),
        };
        error_policy(obj(), &err, c.clone());
        assert_eq!(c.backoff.tracked(), 1);
        forget(&c, Some("apps"), "my-api");
        assert_eq!(c.backoff.tracked(), 0);
    }

    #[test]
    fn invalid_spec_waits_for_a_change() {
        let err = ReconcileErr::InvalidSpec(SpecError::EmptyImage);
        assert_eq!(error_policy(obj(), &err, ctx()), Action::await_change());
    }

    #[test]
    fn context_applies_config() {
        let mut cfg = OperatorConfig::default();
        cfg.route.kind = "ingress".into();
        cfg.retained_versions = 0;
        let c = ControllerContext::new(Arc::new(MemoryStore::new()), cfg).unwrap();
        assert_eq!(c.route_kind, RouteKind::Ingress);
        assert_eq!(c.cfg.retained_versions, 1);
    }

    #[test]
    fn context_refuses_unknown_route_kind() {
        let mut cfg = OperatorConfig::default();
        cfg.route.kind = "gateway".into();
        let err = ControllerContext::new(Arc::new(MemoryStore::new()), cfg)
            .err()
            .unwrap();
        assert_eq!(err, UnknownRouteKind("gateway".into()));
    }
}
