#![allow(dead_code)]

use std::time::Duration;

use k8s_openapi::api::apps::v1::Deployment;
use kube::{Client, api::Api};
use simpleapi_operator::crd::{SimpleApi, SimpleApiSpec};
use tokio::task::JoinHandle;

// DNS-1123 safe numeric suffix for unique names
pub const DIGITS: [char; 10] =
    ['0', '1', '2', '3', '4', '5', '6', '7', '8', '9'];
pub fn uniq(prefix: &str) -> String {
    format!("{prefix}-{}", nanoid::nanoid!(6, &DIGITS))
}

// Env guard utilities
pub struct EnvGuard {
    key: &'static str,
    old: Option<String>,
}
impl Drop for EnvGuard {
    fn drop(&mut self) {
        unsafe {
            if let Some(ref v) = self.old {
                std::env::set_var(self.key, v);
            } else {
                std::env::remove_var(self.key);
            }
        }
    }
}
pub fn set_env(key: &'static str, val: &str) -> EnvGuard {
    let old = std::env::var(key).ok();
    unsafe {
        std::env::set_var(key, val);
    }
    EnvGuard { key, old }
}

pub fn simple_api(ns: &str, name: &str, version: &str) -> SimpleApi {
    let mut app = SimpleApi::new(
        name,
        SimpleApiSpec {
            image: "nginx".into(),
            version: version.into(),
            port: 80,
            replicas: Some(1),
            ingress_host_name: None,
            image_pull_secret: None,
            image_pull_policy: None,
            service_account_name: None,
            envoy_gateway: None,
            envoy_gateway_namespace: None,
            startup_probe: None,
        },
    );
    app.metadata.namespace = Some(ns.to_string());
    app
}

/// Poll `check` once a second until it holds or `secs` elapse.
pub async fn wait_until<F, Fut>(secs: u64, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..secs {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    false
}

pub async fn deployment_exists(client: Client, ns: &str, name: &str) -> bool {
    let api: Api<Deployment> = Api::namespaced(client, ns);
    api.get_opt(name).await.ok().flatten().is_some()
}

// RAII guard to ensure controller abort + cleanup
pub struct ControllerGuard {
    ns: String,
    name: String,
    client: Client,
    ctrl: Option<JoinHandle<()>>,
}

impl ControllerGuard {
    pub fn new(ns: &str, name: &str, client: Client) -> Self {
        Self {
            ns: ns.to_string(),
            name: name.to_string(),
            client,
            ctrl: None,
        }
    }
    pub fn with_controller(mut self, ctrl: JoinHandle<()>) -> Self {
        self.ctrl = Some(ctrl);
        self
    }
}

impl Drop for ControllerGuard {
    fn drop(&mut self) {
        if let Some(ref handle) = self.ctrl {
            handle.abort();
        }
        let ns = self.ns.clone();
        let name = self.name.clone();
        let client = self.client.clone();
        // Children are owned by the SimpleApi; the GC removes them.
        let _ = tokio::spawn(async move {
            let api: Api<SimpleApi> = Api::namespaced(client, &ns);
            let _ = api.delete(&name, &Default::default()).await;
        });
    }
}
