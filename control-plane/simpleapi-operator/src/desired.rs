use kube::{Resource, ResourceExt};

use crate::crd::simple_api::{API_VERSION, KIND};
use crate::crd::{SimpleApi, StartupProbeSpec};
use crate::naming::{Naming, NamingError};
use crate::templates::owner::{OwnerInfo, OwnershipError};
use crate::version::Version;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SpecError {
    #[error(transparent)]
    Naming(#[from] NamingError),
    #[error("image must not be empty")]
    EmptyImage,
    #[error("port {0} is outside 1..=65535")]
    PortOutOfRange(i32),
    #[error("replicas must not be negative, got {0}")]
    NegativeReplicas(i32),
    #[error(transparent)]
    Ownership(#[from] OwnershipError),
}

/// Validated, read-only view of a `SimpleApi` for one reconcile pass.
#[derive(Clone, Debug, PartialEq)]
pub struct DesiredState {
    pub namespace: String,
    pub app: String,
    pub image: String,
    /// Tag as written by the user (case preserved)
    pub image_tag: String,
    pub version: Version,
    pub port: i32,
    pub replicas: i32,
    pub hostname: Option<String>,
    pub image_pull_secret: Option<String>,
    pub image_pull_policy: String,
    pub service_account_name: String,
    pub gateway: Option<GatewayOverride>,
    pub startup_probe: Option<StartupProbeSpec>,
    pub owner: OwnerInfo,
    pub generation: Option<i64>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GatewayOverride {
    pub name: Option<String>,
    pub namespace: Option<String>,
}

fn non_empty(v: &Option<String>) -> Option<String> {
    v.as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

impl DesiredState {
    pub fn from_resource(
        obj: &SimpleApi,
        naming: &Naming,
    ) -> Result<Self, SpecError> {
        let spec = &obj.spec;
        let app = obj.name_any();
        let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());

        naming.validate(&app, &spec.version)?;
        let image = spec.image.trim();
        if image.is_empty() {
            return Err(SpecError::EmptyImage);
        }
        if !(1..=65535).contains(&spec.port) {
            return Err(SpecError::PortOutOfRange(spec.port));
        }
        let replicas = spec.replicas.unwrap_or(1);
        if replicas < 0 {
            return Err(SpecError::NegativeReplicas(replicas));
        }
        let owner =
            OwnerInfo::new(API_VERSION, KIND, &app, obj.meta().uid.as_deref())?;

        let gateway = match (non_empty(&spec.envoy_gateway), non_empty(&spec.envoy_gateway_namespace)) {
            (None, None) => None,
            (name, namespace) => Some(GatewayOverride { name, namespace }),
        };

        Ok(Self {
            namespace,
            image: image.to_string(),
            image_tag: spec.version.trim().to_string(),
            version: Version::new(&spec.version),
            port: spec.port,
            replicas,
            hostname: non_empty(&spec.ingress_host_name),
            image_pull_secret: non_empty(&spec.image_pull_secret),
            image_pull_policy: non_empty(&spec.image_pull_policy)
                .unwrap_or_else(|| "IfNotPresent".to_string()),
            service_account_name: non_empty(&spec.service_account_name)
                .unwrap_or_else(|| "default".to_string()),
            gateway,
            startup_probe: spec.startup_probe.clone(),
            owner,
            generation: obj.meta().generation,
            app,
        })
    }

    /// `<image>:<tag>`
    pub fn image_ref(&self) -> String {
        format!("{}:{}", self.image, self.image_tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::SimpleApiSpec;

    fn app(name: &str, version: &str) -> SimpleApi {
        let mut obj = SimpleApi::new(
            name,
            SimpleApiSpec {
                image: "ghcr.io/acme/my-api".into(),
                version: version.into(),
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
        obj.metadata.namespace = Some("apps".into());
        obj.metadata.uid = Some("uid-1".into());
        obj.metadata.generation = Some(3);
        obj
    }

    #[test]
    fn defaults_are_applied() {
        let d = DesiredState::from_resource(&app("my-api", "V21"), &Naming::default())
            .unwrap();
        assert_eq!(d.namespace, "apps");
        assert_eq!(d.version.as_str(), "v21");
        assert_eq!(d.image_ref(), "ghcr.io/acme/my-api:V21");
        assert_eq!(d.replicas, 1);
        assert_eq!(d.image_pull_policy, "IfNotPresent");
        assert_eq!(d.service_account_name, "default");
        assert_eq!(d.owner.uid, "uid-1");
        assert_eq!(d.gateway, None);
        assert_eq!(d.generation, Some(3));
    }

    #[test]
    fn blank_optionals_are_ignored() {
        let mut obj = app("my-api", "v1");
        obj.spec.image_pull_secret = Some("  ".into());
        obj.spec.envoy_gateway = Some("edge".into());
        let d = DesiredState::from_resource(&obj, &Naming::default()).unwrap();
        assert_eq!(d.image_pull_secret, None);
        assert_eq!(
            d.gateway,
            Some(GatewayOverride {
                name: Some("edge".into()),
                namespace: None
            })
        );
    }

    #[test]
    fn invalid_specs_are_rejected() {
        let n = Naming::default();
        let mut obj = app("my-api", "v1");
        obj.spec.port = 0;
        assert_eq!(
            DesiredState::from_resource(&obj, &n),
            Err(SpecError::PortOutOfRange(0))
        );

        let mut obj = app("my-api", "v1");
        obj.spec.image = " ".into();
        assert_eq!(DesiredState::from_resource(&obj, &n), Err(SpecError::EmptyImage));

        let mut obj = app("my-api", "v1");
        obj.spec.replicas = Some(-1);
        assert_eq!(
            DesiredState::from_resource(&obj, &n),
            Err(SpecError::NegativeReplicas(-1))
        );

        let obj = app("my-api", "v1.2");
        assert!(matches!(
            DesiredState::from_resource(&obj, &n),
            Err(SpecError::Naming(_))
        ));

        let mut obj = app("my-api", "v1");
        obj.metadata.uid = None;
        assert!(matches!(
            DesiredState::from_resource(&obj, &n),
            Err(SpecError::Ownership(OwnershipError::MissingUid(_)))
        ));
    }
}
