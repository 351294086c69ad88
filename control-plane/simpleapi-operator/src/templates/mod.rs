pub mod owner;
pub mod route;
pub mod workload;

pub use owner::{OwnerInfo, OwnershipError, is_controlled_by, set_controller_owner};
pub use route::render_route;
pub use workload::synthesize;

#[cfg(test)]
pub(crate) mod test_support {
    use crate::desired::DesiredState;
    use crate::version::Version;

    use super::OwnerInfo;

    pub fn desired(app: &str, version: &str) -> DesiredState {
        DesiredState {
            namespace: "apps".into(),
            app: app.into(),
            image: "ghcr.io/acme/my-api".into(),
            image_tag: version.into(),
            version: Version::new(version),
            port: 8080,
            replicas: 1,
            hostname: None,
            image_pull_secret: None,
            image_pull_policy: "IfNotPresent".into(),
            service_account_name: "default".into(),
            gateway: None,
            startup_probe: None,
            owner: OwnerInfo {
                api_version: "apps.api.test/v1alpha1".into(),
                kind: "SimpleApi".into(),
                name: app.into(),
                uid: "uid-1".into(),
            },
            generation: Some(1),
        }
    }
}
