use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use kube::runtime::controller::Action;
use tracing::{debug, info, instrument, trace};

use super::backoff::object_key;
use super::retention::{Classification, ObservedVersion, classify};
use super::status::{failed, ready, should_patch_status};
use super::types::Stage;
use super::{ControllerContext, ReconcileErr};
use crate::crd::SimpleApi;
use crate::desired::DesiredState;
use crate::naming::Naming;
use crate::routing::{RouteAction, desired_route, plan_route};
use crate::store::StoreError;
use crate::templates::workload::endpoint;
use crate::templates::{render_route, synthesize};
use crate::version::Version;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextStep {
    /// Converged; come back after the periodic resync interval.
    Resync,
    /// Nothing to do until the object changes.
    AwaitChange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    Created,
    Updated,
    Unchanged,
    Skipped,
}

/// What one pass did; returned for logging and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Names of created workloads and endpoints, in call order
    pub created: Vec<String>,
    /// Names of deleted workloads and endpoints, in call order
    pub deleted: Vec<String>,
    pub route: RouteOutcome,
    pub keep: Vec<Version>,
    pub status_patched: bool,
    pub next: NextStep,
}

impl ReconcileReport {
    fn new(next: NextStep) -> Self {
        Self {
            created: Vec::new(),
            deleted: Vec::new(),
            route: RouteOutcome::Skipped,
            keep: Vec::new(),
            status_patched: false,
            next,
        }
    }

    pub fn wrote_anything(&self) -> bool {
        !self.created.is_empty()
            || !self.deleted.is_empty()
            || matches!(self.route, RouteOutcome::Created | RouteOutcome::Updated)
            || self.status_patched
    }
}

fn at(stage: Stage) -> impl Fn(StoreError) -> ReconcileErr {
    move |source| ReconcileErr::Store { stage, source }
}

fn rfc3339(unix_secs: i64) -> String {
    DateTime::<Utc>::from_timestamp(unix_secs, 0)
        .unwrap_or_default()
        .to_rfc3339()
}

/// kube-runtime entry point.
#[instrument(skip_all, fields(ns = %obj.namespace().unwrap_or_else(|| "default".into()), name = %obj.name_any()))]
pub async fn reconcile(
    obj: Arc<SimpleApi>,
    ctx: Arc<ControllerContext>,
) -> Result<Action, ReconcileErr> {
    let ns = obj.namespace().unwrap_or_else(|| "default".to_string());
    let name = obj.name_any();
    let key = object_key(&ns, &name);

    let report = reconcile_app(&ctx, &ns, &name, Utc::now().timestamp()).await?;
    ctx.backoff.reset(&key);
    if report.wrote_anything() {
        info!(
            created = ?report.created,
            deleted = ?report.deleted,
            route = ?report.route,
            keep = ?report.keep,
            "reconcile: converged"
        );
    } else {
        debug!(keep = ?report.keep, "reconcile: no changes");
    }
    Ok(match report.next {
        NextStep::Resync => Action::requeue(ctx.cfg.resync()),
        NextStep::AwaitChange => Action::await_change(),
    })
}

/// One level-triggered pass for `ns/name`, everything re-derived from the
/// store. `now` (unix seconds) stamps newly created versions.
pub async fn reconcile_app(
    ctx: &ControllerContext,
    ns: &str,
    name: &str,
    now: i64,
) -> Result<ReconcileReport, ReconcileErr> {
    let store = ctx.store.as_ref();
    let naming = &ctx.naming;

    // Fetching
    let Some(app) = store.get_app(ns, name).await.map_err(at(Stage::Fetching))? else {
        ctx.backoff.reset(&object_key(ns, name));
        return cleanup_orphans(ctx, ns, name).await;
    };
    if app.metadata.deletion_timestamp.is_some() {
        ctx.backoff.reset(&object_key(ns, name));
        debug!(%ns, %name, "reconcile: object is being deleted; leaving cleanup to GC");
        return Ok(ReconcileReport::new(NextStep::AwaitChange));
    }

    let desired = match DesiredState::from_resource(&app, naming) {
        Ok(d) => d,
        Err(e) => {
            info!(%ns, %name, error = %e, "reconcile: spec cannot be materialized");
            let status = failed(
                rfc3339(now),
                app.metadata.generation,
                e.to_string(),
                app.status.as_ref(),
            );
            if should_patch_status(app.status.as_ref(), &status) {
                store
                    .patch_status(ns, name, &status)
                    .await
                    .map_err(at(Stage::Status))?;
            }
            return Err(ReconcileErr::InvalidSpec(e));
        }
    };

    let selector = naming.app_selector(&desired.app);
    let workloads = store
        .list_workloads(ns, &selector)
        .await
        .map_err(at(Stage::Fetching))?;
    let endpoints = store
        .list_endpoints(ns, &selector)
        .await
        .map_err(at(Stage::Fetching))?;

    let observed: Vec<ObservedVersion> = workloads
        .iter()
        .filter_map(|d| observe(&d.metadata, &desired.app, naming))
        .collect();
    let workload_ports: HashMap<Version, i32> = workloads
        .iter()
        .filter_map(|d| {
            let version = version_of(&d.metadata, &desired.app, naming)?;
            Some((version, container_port(d)?))
        })
        .collect();
    let live_endpoints: Vec<LiveEndpoint> = endpoints
        .iter()
        .filter_map(|s| {
            Some(LiveEndpoint {
                version: version_of(&s.metadata, &desired.app, naming)?,
                name: s.metadata.name.clone()?,
                port: service_port(s),
            })
        })
        .collect();

    let class = classify(
        &observed,
        &desired.version,
        now,
        ctx.cfg.retained_versions,
    );
    trace!(%ns, %name, ?class, "reconcile: classified versions");

    let mut report = ReconcileReport::new(NextStep::Resync);
    let snapshot = Snapshot {
        observed: &observed,
        workload_ports: &workload_ports,
        live_endpoints: &live_endpoints,
    };
    let ports = apply_versions(ctx, &desired, &class, &snapshot, now, &mut report).await?;

    // RoutingSync
    report.route = sync_route(ctx, &desired, &class.keep, &ports).await?;
    report.keep = class.keep.clone();

    let route_name = naming.route_name(&desired.app);
    let status = ready(
        rfc3339(now),
        desired.generation,
        &desired.version,
        &class.keep,
        &route_name,
    );
    if should_patch_status(app.status.as_ref(), &status) {
        match store.patch_status(ns, name, &status).await {
            Ok(()) => report.status_patched = true,
            Err(e) if e.is_not_found() => {
                info!(%ns, %name, "reconcile: object vanished before status patch");
            }
            Err(e) => return Err(at(Stage::Status)(e)),
        }
    }
    Ok(report)
}

/// An endpoint found in the store and the port it exposes.
struct LiveEndpoint {
    version: Version,
    name: String,
    port: Option<i32>,
}

/// What the store held at the start of the pass.
struct Snapshot<'a> {
    observed: &'a [ObservedVersion],
    workload_ports: &'a HashMap<Version, i32>,
    live_endpoints: &'a [LiveEndpoint],
}

/// Applying: create the desired version, repair endpoints of kept versions,
/// delete evicted workloads and any endpoint whose version is not kept.
///
/// Returns the port each kept version's endpoint exposes after the pass.
async fn apply_versions(
    ctx: &ControllerContext,
    desired: &DesiredState,
    class: &Classification,
    seen: &Snapshot<'_>,
    now: i64,
    report: &mut ReconcileReport,
) -> Result<HashMap<Version, i32>, ReconcileErr> {
    let store = ctx.store.as_ref();
    let naming = &ctx.naming;
    let ns = desired.namespace.as_str();
    let live_endpoints = seen.live_endpoints;

    let mut ports: HashMap<Version, i32> = live_endpoints
        .iter()
        .filter(|e| class.keeps(&e.version))
        .filter_map(|e| Some((e.version.clone(), e.port?)))
        .collect();

    if class.create {
        // Synthesizing
        let (workload, svc) = synthesize(desired, naming, now);
        let wname = workload.metadata.name.clone().unwrap_or_default();
        info!(%ns, app = %desired.app, version = %desired.version, workload = %wname, "creating version");
        match store.create_workload(ns, &workload).await {
            Ok(()) => report.created.push(wname),
            Err(e) if e.is_already_exists() => {
                info!(%ns, workload = %wname, "workload already exists");
            }
            Err(e) => return Err(at(Stage::Applying)(e)),
        }
        if !has_endpoint(live_endpoints, &desired.version) {
            create_endpoint(ctx, ns, &svc, report).await?;
            ports.insert(desired.version.clone(), desired.port);
        }
    }

    for version in &class.keep {
        if has_endpoint(live_endpoints, version)
            || (class.create && version == &desired.version)
        {
            continue;
        }
        let stamp = seen
            .observed
            .iter()
            .find(|o| &o.version == version)
            .and_then(|o| o.deployed_at)
            .unwrap_or(now);
        // The pods keep listening on the port they were created with.
        let port = seen
            .workload_ports
            .get(version)
            .copied()
            .unwrap_or(desired.port);
        info!(%ns, app = %desired.app, %version, port, "repairing missing endpoint");
        let svc = endpoint(desired, naming, version, port, stamp);
        create_endpoint(ctx, ns, &svc, report).await?;
        ports.insert(version.clone(), port);
    }

    for evicted in &class.evict {
        info!(%ns, app = %desired.app, version = %evicted.version, workload = %evicted.workload, "evicting version");
        match store.delete_workload(ns, &evicted.workload).await {
            Ok(()) => report.deleted.push(evicted.workload.clone()),
            Err(e) if e.is_not_found() => {
                info!(%ns, workload = %evicted.workload, "workload already gone");
            }
            Err(e) => return Err(at(Stage::Applying)(e)),
        }
    }
    for LiveEndpoint { version, name: svc_name, .. } in live_endpoints {
        if class.keeps(version) {
            continue;
        }
        match store.delete_endpoint(ns, svc_name).await {
            Ok(()) => report.deleted.push(svc_name.clone()),
            Err(e) if e.is_not_found() => {
                info!(%ns, endpoint = %svc_name, "endpoint already gone");
            }
            Err(e) => return Err(at(Stage::Applying)(e)),
        }
    }
    Ok(ports)
}

async fn create_endpoint(
    ctx: &ControllerContext,
    ns: &str,
    svc: &Service,
    report: &mut ReconcileReport,
) -> Result<(), ReconcileErr> {
    let sname = svc.metadata.name.clone().unwrap_or_default();
    match ctx.store.create_endpoint(ns, svc).await {
        Ok(()) => report.created.push(sname),
        Err(e) if e.is_already_exists() => {
            info!(%ns, endpoint = %sname, "endpoint already exists");
        }
        Err(e) => return Err(at(Stage::Applying)(e)),
    }
    Ok(())
}

async fn sync_route(
    ctx: &ControllerContext,
    desired: &DesiredState,
    keep: &[Version],
    ports: &HashMap<Version, i32>,
) -> Result<RouteOutcome, ReconcileErr> {
    let store = ctx.store.as_ref();
    let kind = ctx.route_kind;
    let ns = desired.namespace.as_str();
    let rule = desired_route(desired, keep, ports, &ctx.naming, &ctx.cfg.route);
    let rendered = render_route(&rule, kind, &desired.owner);

    let existing = store
        .get_route(kind, ns, &rule.name)
        .await
        .map_err(at(Stage::RoutingSync))?;
    match plan_route(existing.as_ref(), rendered, &desired.owner)? {
        RouteAction::Create(obj) => {
            info!(%ns, route = %rule.name, %kind, rules = rule.rules.len(), "creating route");
            store.create_route(kind, ns, &obj).await.map_err(|e| {
                // Someone created it between our get and create; retry soon.
                let e = if e.is_already_exists() {
                    StoreError::Conflict(e.to_string())
                } else {
                    e
                };
                at(Stage::RoutingSync)(e)
            })?;
            Ok(RouteOutcome::Created)
        }
        RouteAction::Update(obj) => {
            info!(%ns, route = %rule.name, %kind, rules = rule.rules.len(), "updating route");
            store
                .replace_route(kind, ns, &obj)
                .await
                .map_err(at(Stage::RoutingSync))?;
            Ok(RouteOutcome::Updated)
        }
        RouteAction::Noop => Ok(RouteOutcome::Unchanged),
    }
}

/// The SimpleApi is gone but labelled children may still be around (GC lag
/// or a missed owner reference). Deleting them is idempotent.
async fn cleanup_orphans(
    ctx: &ControllerContext,
    ns: &str,
    name: &str,
) -> Result<ReconcileReport, ReconcileErr> {
    let store = ctx.store.as_ref();
    let selector = ctx.naming.app_selector(name);
    let mut report = ReconcileReport::new(NextStep::AwaitChange);

    let workloads = store
        .list_workloads(ns, &selector)
        .await
        .map_err(at(Stage::Fetching))?;
    for w in workloads {
        let Some(wname) = w.metadata.name else { continue };
        match store.delete_workload(ns, &wname).await {
            Ok(()) => report.deleted.push(wname),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(at(Stage::Applying)(e)),
        }
    }
    let endpoints = store
        .list_endpoints(ns, &selector)
        .await
        .map_err(at(Stage::Fetching))?;
    for s in endpoints {
        let Some(sname) = s.metadata.name else { continue };
        match store.delete_endpoint(ns, &sname).await {
            Ok(()) => report.deleted.push(sname),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(at(Stage::Applying)(e)),
        }
    }
    if !report.deleted.is_empty() {
        info!(%ns, %name, deleted = ?report.deleted, "reconcile: removed orphaned children");
    }
    Ok(report)
}

fn has_endpoint(live: &[LiveEndpoint], version: &Version) -> bool {
    live.iter().any(|e| &e.version == version)
}

fn service_port(svc: &Service) -> Option<i32> {
    svc.spec.as_ref()?.ports.as_ref()?.first().map(|p| p.port)
}

fn container_port(workload: &Deployment) -> Option<i32> {
    let pod = workload.spec.as_ref()?.template.spec.as_ref()?;
    pod.containers
        .first()?
        .ports
        .as_ref()?
        .first()
        .map(|p| p.container_port)
}

/// Version of a workload or endpoint: the version label, else the token
/// recovered from the object name.
fn version_of(meta: &ObjectMeta, app: &str, naming: &Naming) -> Option<Version> {
    let labels: Option<&BTreeMap<String, String>> = meta.labels.as_ref();
    labels
        .and_then(|l| l.get(&naming.version_label))
        .filter(|v| !v.trim().is_empty())
        .map(|v| Version::new(v))
        .or_else(|| {
            let name = meta.name.as_deref()?;
            naming
                .version_from_name(app, name)
                .map(|v| Version::new(&v))
        })
}

fn observe(meta: &ObjectMeta, app: &str, naming: &Naming) -> Option<ObservedVersion> {
    let version = version_of(meta, app, naming)?;
    let workload = meta.name.clone()?;
    let deployed_at = meta
        .annotations
        .as_ref()
        .and_then(|a| a.get(&naming.deployed_at_annotation))
        .and_then(|s| s.trim().parse::<i64>().ok());
    Some(ObservedVersion {
        version,
        workload,
        deployed_at,
    })
}
