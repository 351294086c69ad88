use std::time::Duration;

use envconfig::Envconfig;

use crate::controller::types::{RouteKind, UnknownRouteKind};
use crate::naming::Naming;

#[derive(Envconfig, Clone, Debug)]
pub struct OperatorConfig {
    #[envconfig(from = "HTTP_PORT", default = "8088")]
    pub http_port: u16,

    /// Restrict the controller to one namespace; all namespaces when unset.
    /// Env: SIMPLEAPI_WATCH_NAMESPACE
    #[envconfig(from = "SIMPLEAPI_WATCH_NAMESPACE")]
    pub watch_namespace: Option<String>,

    /// How many versions stay live per application (including the desired one).
    #[envconfig(from = "SIMPLEAPI_RETAINED_VERSIONS", default = "2")]
    pub retained_versions: usize,

    /// Periodic resync after a successful reconcile.
    #[envconfig(from = "SIMPLEAPI_RESYNC_SECS", default = "60")]
    pub resync_secs: u64,

    /// Max reconciles running at once across different objects.
    #[envconfig(from = "SIMPLEAPI_CONCURRENCY", default = "2")]
    pub concurrency: u16,

    #[envconfig(from = "SIMPLEAPI_FIELD_MANAGER", default = "simpleapi-operator")]
    pub field_manager: String,

    #[envconfig(from = "SIMPLEAPI_ERROR_BACKOFF_BASE_SECS", default = "5")]
    pub error_backoff_base_secs: u64,

    #[envconfig(from = "SIMPLEAPI_ERROR_BACKOFF_MAX_SECS", default = "300")]
    pub error_backoff_max_secs: u64,

    #[envconfig(nested)]
    pub route: RouteConfig,
}

#[derive(Envconfig, Clone, Debug)]
pub struct RouteConfig {
    /// httproute | ingress
    /// Env: SIMPLEAPI_ROUTE_KIND
    #[envconfig(from = "SIMPLEAPI_ROUTE_KIND", default = "httproute")]
    pub kind: String,

    /// Default parent Gateway for HTTPRoutes
    #[envconfig(from = "SIMPLEAPI_GATEWAY_NAME", default = "eg")]
    pub gateway_name: String,

    #[envconfig(
        from = "SIMPLEAPI_GATEWAY_NAMESPACE",
        default = "envoy-gateway-system"
    )]
    pub gateway_namespace: String,

    /// ingressClassName used when kind=ingress
    #[envconfig(from = "SIMPLEAPI_INGRESS_CLASS", default = "nginx")]
    pub ingress_class: String,

    #[envconfig(from = "SIMPLEAPI_PATH_PREFIX", default = "/api/")]
    pub path_prefix: String,
}

impl OperatorConfig {
    /// Clamp values that would make the loop misbehave.
    ///
    /// - retained_versions: at least 1 (the desired version is always kept)
    /// - concurrency: at least 1
    /// - error backoff: base at least 1s, max not below base
    pub fn normalized(mut self) -> Self {
        self.retained_versions = self.retained_versions.max(1);
        self.concurrency = self.concurrency.max(1);
        self.error_backoff_base_secs = self.error_backoff_base_secs.max(1);
        self.error_backoff_max_secs =
            self.error_backoff_max_secs.max(self.error_backoff_base_secs);
        self
    }

    pub fn route_kind(&self) -> Result<RouteKind, UnknownRouteKind> {
        self.route.kind.parse()
    }

    pub fn naming(&self) -> Naming {
        Naming::default().with_path_prefix(&self.route.path_prefix)
    }

    pub fn resync(&self) -> Duration {
        Duration::from_secs(self.resync_secs)
    }
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            http_port: 8088,
            watch_namespace: None,
            retained_versions: 2,
            resync_secs: 60,
            concurrency: 2,
            field_manager: "simpleapi-operator".into(),
            error_backoff_base_secs: 5,
            error_backoff_max_secs: 300,
            route: RouteConfig::default(),
        }
    }
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            kind: "httproute".into(),
            gateway_name: "eg".into(),
            gateway_namespace: "envoy-gateway-system".into(),
            ingress_class: "nginx".into(),
            path_prefix: "/api/".into(),
        }
    }
}
