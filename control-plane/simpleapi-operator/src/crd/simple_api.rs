use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const API_GROUP: &str = "apps.api.test";
pub const API_VERSION: &str = "apps.api.test/v1alpha1";
pub const KIND: &str = "SimpleApi";

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "apps.api.test",
    version = "v1alpha1",
    kind = "SimpleApi",
    plural = "simpleapis",
    shortname = "sapi",
    namespaced,
    status = "SimpleApiStatus",
    printcolumn = r#"{"name":"Version","type":"string","jsonPath":".spec.version"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SimpleApiSpec {
    /// Image repository; the tag is taken from `version`
    pub image: String,
    /// Version identifier, e.g. "v21"
    pub version: String,
    /// Container and Service port
    pub port: i32,
    /// Replicas per version (default 1)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    /// Hostname matched by the route
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress_host_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_secret: Option<String>,
    /// Always | IfNotPresent | Never (default IfNotPresent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,
    /// Parent Gateway of the HTTPRoute; operator default when omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub envoy_gateway: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub envoy_gateway_namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub startup_probe: Option<StartupProbeSpec>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StartupProbeSpec {
    pub path: String,
    /// Defaults to the spec port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_delay_seconds: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period_seconds: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_threshold: Option<i32>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SimpleApiStatus {
    /// Ready | Failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_version: Option<String>,
    /// Live versions, oldest first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub retained_versions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
}
