//! Drives the reconciler through a full application lifecycle against the
//! in-memory store: first deploy, upgrades, rollback and deletion.

use std::sync::Arc;

use simpleapi_operator::config::OperatorConfig;
use simpleapi_operator::controller::{
    ControllerContext, NextStep, ReconcileReport, RouteOutcome, reconcile_app,
};
use simpleapi_operator::controller::types::RouteKind;
use simpleapi_operator::store::MemoryStore;

mod common;
use common::simple_api;

const NS: &str = "team-a";
const APP: &str = "orders";

async fn pass(ctx: &ControllerContext, now: i64) -> ReconcileReport {
    reconcile_app(ctx, NS, APP, now).await.expect("reconcile")
}

async fn set_version(store: &MemoryStore, version: &str) {
    store
        .update_app(NS, APP, |a| a.spec.version = version.into())
        .await
        .expect("app exists");
}

#[test_log::test(tokio::test)]
async fn upgrade_rollback_and_delete() {
    let store = Arc::new(MemoryStore::new());
    store.insert_app(simple_api(NS, APP, "v1")).await;
    let ctx = ControllerContext::new(store.clone(), OperatorConfig::default())
        .expect("default config is valid");

    let report = pass(&ctx, 1_000).await;
    assert_eq!(report.route, RouteOutcome::Created);
    assert_eq!(report.next, NextStep::Resync);
    assert_eq!(store.workload_names(NS).await, vec!["orders-v1"]);

    // Converged: nothing to write.
    assert!(!pass(&ctx, 1_010).await.wrote_anything());

    set_version(&store, "v2").await;
    pass(&ctx, 2_000).await;
    set_version(&store, "v3").await;
    let report = pass(&ctx, 3_000).await;
    assert_eq!(report.route, RouteOutcome::Updated);
    assert_eq!(
        store.workload_names(NS).await,
        vec!["orders-v2", "orders-v3"]
    );
    assert_eq!(
        store.endpoint_names(NS).await,
        vec!["orders-v2-svc", "orders-v3-svc"]
    );

    // Rolling back to a live version keeps both and creates nothing.
    set_version(&store, "v2").await;
    let report = pass(&ctx, 4_000).await;
    assert!(report.created.is_empty());
    assert!(report.deleted.is_empty());
    let status = store.app(NS, APP).await.and_then(|a| a.status).expect("status");
    assert_eq!(status.active_version.as_deref(), Some("v2"));
    assert_eq!(status.retained_versions, vec!["v2", "v3"]);

    let route = store
        .route(RouteKind::HttpRoute, NS, "orders-route")
        .await
        .expect("route");
    let text = route.data.to_string();
    assert!(text.contains("orders-v2-svc") && text.contains("orders-v3-svc"));

    store.delete_app(NS, APP, true).await;
    let report = pass(&ctx, 5_000).await;
    assert_eq!(report.next, NextStep::AwaitChange);
    assert!(store.workload_names(NS).await.is_empty());
    assert!(store.endpoint_names(NS).await.is_empty());
    assert!(store.route(RouteKind::HttpRoute, NS, "orders-route").await.is_none());
}
