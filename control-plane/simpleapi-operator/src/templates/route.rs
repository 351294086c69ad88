use k8s_openapi::api::networking::v1::Ingress;
use kube::core::{DynamicObject, GroupVersionKind};
use kube::discovery::ApiResource;
use serde_json::{Value as JsonValue, json};

use crate::controller::types::RouteKind;
use crate::routing::RoutingRule;

use super::owner::OwnerInfo;

pub const GATEWAY_API_GROUP: &str = "gateway.networking.k8s.io";

pub fn api_resource(kind: RouteKind) -> ApiResource {
    match kind {
        RouteKind::HttpRoute => ApiResource::from_gvk_with_plural(
            &GroupVersionKind::gvk(GATEWAY_API_GROUP, "v1", "HTTPRoute"),
            "httproutes",
        ),
        RouteKind::Ingress => ApiResource::erase::<Ingress>(&()),
    }
}

/// Render the routing object for `kind`, owned by `owner` from the start.
pub fn render_route(
    rule: &RoutingRule,
    kind: RouteKind,
    owner: &OwnerInfo,
) -> DynamicObject {
    let spec = match kind {
        RouteKind::HttpRoute => http_route_spec(rule),
        RouteKind::Ingress => ingress_spec(rule),
    };
    let mut obj = DynamicObject::new(&rule.name, &api_resource(kind))
        .within(&rule.namespace)
        .data(json!({ "spec": spec }));
    obj.metadata.labels = Some(rule.labels.clone());
    obj.metadata.owner_references = Some(vec![owner.controller_ref()]);
    obj
}

// Defaulted fields (group, kind, path type, weight) are spelled out so the
// stored object compares equal to the rendered one.
fn http_route_spec(rule: &RoutingRule) -> JsonValue {
    let rules: Vec<JsonValue> = rule
        .rules
        .iter()
        .map(|r| {
            json!({
                "matches": [{
                    "path": { "type": "PathPrefix", "value": r.path_prefix }
                }],
                "backendRefs": [{
                    "group": "",
                    "kind": "Service",
                    "name": r.backend,
                    "port": r.port,
                    "weight": r.weight,
                }]
            })
        })
        .collect();
    let hostnames: Vec<&str> = rule.hostname.as_deref().into_iter().collect();
    json!({
        "parentRefs": [{
            "group": GATEWAY_API_GROUP,
            "kind": "Gateway",
            "name": rule.parent.name,
            "namespace": rule.parent.namespace,
        }],
        "hostnames": hostnames,
        "rules": rules,
    })
}

fn ingress_spec(rule: &RoutingRule) -> JsonValue {
    let paths: Vec<JsonValue> = rule
        .rules
        .iter()
        .map(|r| {
            json!({
                "path": r.path_prefix,
                "pathType": "Prefix",
                "backend": {
                    "service": {
                        "name": r.backend,
                        "port": { "number": r.port }
                    }
                }
            })
        })
        .collect();
    json!({
        "ingressClassName": rule.ingress_class,
        "rules": [{
            "host": rule.hostname,
            "http": { "paths": paths }
        }]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::{GatewayParent, RouteEntry};
    use std::collections::BTreeMap;

    fn rule(hostname: Option<&str>) -> RoutingRule {
        RoutingRule {
            name: "my-api-route".into(),
            namespace: "apps".into(),
            labels: BTreeMap::from([("app".to_string(), "my-api".to_string())]),
            hostname: hostname.map(str::to_string),
            parent: GatewayParent {
                name: "eg".into(),
                namespace: "envoy-gateway-system".into(),
            },
            ingress_class: "nginx".into(),
            rules: ["v21", "v22"]
                .into_iter()
                .map(|v| RouteEntry {
                    version: v.into(),
                    path_prefix: format!("/api/{v}"),
                    backend: format!("my-api-{v}-svc"),
                    port: 8080,
                    weight: 1,
                })
                .collect(),
        }
    }

    fn owner() -> OwnerInfo {
        OwnerInfo::new("apps.api.test/v1alpha1", "SimpleApi", "my-api", Some("uid-1"))
            .unwrap()
    }

    #[test]
    fn http_route_has_rule_per_version() {
        let obj = render_route(&rule(None), RouteKind::HttpRoute, &owner());
        let types = obj.types.as_ref().unwrap();
        assert_eq!(types.api_version, "gateway.networking.k8s.io/v1");
        assert_eq!(types.kind, "HTTPRoute");
        assert_eq!(obj.metadata.namespace.as_deref(), Some("apps"));
        let spec = &obj.data["spec"];
        assert_eq!(spec["hostnames"], json!([]));
        assert_eq!(spec["parentRefs"][0]["name"], "eg");
        let rules = spec["rules"].as_array().unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0]["matches"][0]["path"]["value"], "/api/v21");
        assert_eq!(rules[1]["backendRefs"][0]["name"], "my-api-v22-svc");
        assert_eq!(rules[1]["backendRefs"][0]["weight"], 1);
        assert_eq!(
            obj.metadata.owner_references.as_ref().unwrap()[0].uid,
            "uid-1"
        );
    }

    #[test]
    fn http_route_carries_hostname() {
        let obj = render_route(
            &rule(Some("api.example.com")),
            RouteKind::HttpRoute,
            &owner(),
        );
        assert_eq!(obj.data["spec"]["hostnames"], json!(["api.example.com"]));
    }

    #[test]
    fn ingress_paths_follow_rules() {
        let obj = render_route(&rule(Some("api.example.com")), RouteKind::Ingress, &owner());
        let types = obj.types.as_ref().unwrap();
        assert_eq!(types.api_version, "networking.k8s.io/v1");
        assert_eq!(types.kind, "Ingress");
        let spec = &obj.data["spec"];
        assert_eq!(spec["ingressClassName"], "nginx");
        assert_eq!(spec["rules"][0]["host"], "api.example.com");
        let paths = spec["rules"][0]["http"]["paths"].as_array().unwrap();
        assert_eq!(paths.len(), 2);
        assert_eq!(paths[0]["path"], "/api/v21");
        assert_eq!(paths[0]["pathType"], "Prefix");
        assert_eq!(paths[1]["backend"]["service"]["name"], "my-api-v22-svc");
        assert_eq!(paths[1]["backend"]["service"]["port"]["number"], 8080);
    }

    #[test]
    fn ingress_spec_deserializes_into_typed_ingress() {
        let obj = render_route(&rule(None), RouteKind::Ingress, &owner());
        let spec: k8s_openapi::api::networking::v1::IngressSpec =
            serde_json::from_value(obj.data["spec"].clone()).unwrap();
        assert_eq!(spec.rules.unwrap()[0].host, None);
    }
}
