//! Desired routing for the retained versions and the create/update/noop
//! decision against what the store holds.

use std::collections::{BTreeMap, HashMap};

use kube::core::DynamicObject;
use serde_json::{Value as JsonValue, json};

use crate::config::RouteConfig;
use crate::desired::DesiredState;
use crate::naming::Naming;
use crate::templates::owner::{
    OwnerInfo, OwnershipError, is_controlled_by, set_controller_owner,
};
use crate::version::Version;

pub const RULE_WEIGHT: i32 = 1;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GatewayParent {
    pub name: String,
    pub namespace: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteEntry {
    pub version: String,
    pub path_prefix: String,
    pub backend: String,
    pub port: i32,
    pub weight: i32,
}

/// The single routing object of one application.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoutingRule {
    pub name: String,
    pub namespace: String,
    pub labels: BTreeMap<String, String>,
    pub hostname: Option<String>,
    pub parent: GatewayParent,
    pub ingress_class: String,
    pub rules: Vec<RouteEntry>,
}

/// One rule per kept version, in keep order (oldest first).
///
/// `ports` holds the port each version's endpoint actually exposes; versions
/// missing from it fall back to the current spec port.
pub fn desired_route(
    desired: &DesiredState,
    keep: &[Version],
    ports: &HashMap<Version, i32>,
    naming: &Naming,
    cfg: &RouteConfig,
) -> RoutingRule {
    let gw = desired.gateway.as_ref();
    let parent = GatewayParent {
        name: gw
            .and_then(|g| g.name.clone())
            .unwrap_or_else(|| cfg.gateway_name.clone()),
        namespace: gw
            .and_then(|g| g.namespace.clone())
            .unwrap_or_else(|| cfg.gateway_namespace.clone()),
    };
    let mut labels = BTreeMap::new();
    labels.insert(naming.app_label.clone(), desired.app.clone());
    labels.insert(naming.managed_by_label.clone(), naming.managed_by.clone());

    RoutingRule {
        name: naming.route_name(&desired.app),
        namespace: desired.namespace.clone(),
        labels,
        hostname: desired.hostname.clone(),
        parent,
        ingress_class: cfg.ingress_class.clone(),
        rules: keep
            .iter()
            .map(|v| RouteEntry {
                version: v.as_str().to_string(),
                path_prefix: naming.path_prefix_for(v.as_str()),
                backend: naming.endpoint_name(&desired.app, v.as_str()),
                port: ports.get(v).copied().unwrap_or(desired.port),
                weight: RULE_WEIGHT,
            })
            .collect(),
    }
}

#[derive(Clone, Debug)]
pub enum RouteAction {
    Create(DynamicObject),
    Update(DynamicObject),
    Noop,
}

/// Decide how to bring the stored routing object to `desired`.
///
/// An existing object keeps its identity (name, uid, resourceVersion) and
/// foreign owner references; its spec is replaced as a whole.
pub fn plan_route(
    existing: Option<&DynamicObject>,
    desired: DynamicObject,
    owner: &OwnerInfo,
) -> Result<RouteAction, OwnershipError> {
    let Some(current) = existing else {
        return Ok(RouteAction::Create(desired));
    };
    let want_spec = desired.data.get("spec").cloned().unwrap_or(JsonValue::Null);
    let want_labels = desired.metadata.labels.clone().unwrap_or_default();

    let spec_ok = current
        .data
        .get("spec")
        .map(|have| json_contains(have, &want_spec))
        .unwrap_or(false);
    let labels_ok = {
        let have = current.metadata.labels.as_ref();
        want_labels
            .iter()
            .all(|(k, v)| have.and_then(|h| h.get(k)) == Some(v))
    };
    if spec_ok && labels_ok && is_controlled_by(&current.metadata, owner) {
        return Ok(RouteAction::Noop);
    }

    let mut next = current.clone();
    set_controller_owner(&mut next.metadata, owner)?;
    match next.data.as_object_mut() {
        Some(map) => {
            map.insert("spec".to_string(), want_spec);
        }
        None => next.data = json!({ "spec": want_spec }),
    }
    let mut labels = next.metadata.labels.take().unwrap_or_default();
    labels.extend(want_labels);
    next.metadata.labels = Some(labels);
    if next.types.is_none() {
        next.types = desired.types;
    }
    Ok(RouteAction::Update(next))
}

/// True when every field of `want` is present in `have` with the same value.
///
/// Objects may carry extra (server-defaulted) keys; arrays must match
/// element-wise. A key missing from `have` only matches an empty `want`.
pub fn json_contains(have: &JsonValue, want: &JsonValue) -> bool {
    match (have, want) {
        (JsonValue::Object(h), JsonValue::Object(w)) => w.iter().all(|(k, wv)| {
            match h.get(k) {
                Some(hv) => json_contains(hv, wv),
                None => is_empty(wv),
            }
        }),
        (JsonValue::Array(h), JsonValue::Array(w)) => {
            h.len() == w.len()
                && h.iter().zip(w.iter()).all(|(hv, wv)| json_contains(hv, wv))
        }
        (JsonValue::Null, w) => is_empty(w),
        (h, w) => h == w,
    }
}

fn is_empty(v: &JsonValue) -> bool {
    match v {
        JsonValue::Null => true,
        JsonValue::Array(a) => a.is_empty(),
        JsonValue::Object(o) => o.is_empty(),
        _ => false,
    }
}
