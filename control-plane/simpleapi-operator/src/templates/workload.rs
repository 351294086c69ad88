use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, HTTPGetAction, LocalObjectReference, PodSpec,
    PodTemplateSpec, Probe, Service, ServicePort, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crate::desired::DesiredState;
use crate::naming::Naming;
use crate::version::Version;

/// Build the Deployment and Service of the desired version.
///
/// Pure: the same (desired, timestamp) always yields the same objects, so a
/// redelivered create for the same version hits AlreadyExists on identical
/// names.
pub fn synthesize(
    desired: &DesiredState,
    naming: &Naming,
    timestamp: i64,
) -> (Deployment, Service) {
    (
        workload(desired, naming, timestamp),
        endpoint(desired, naming, &desired.version, desired.port, timestamp),
    )
}

fn object_meta(
    desired: &DesiredState,
    naming: &Naming,
    name: String,
    version: &Version,
    timestamp: i64,
) -> ObjectMeta {
    let mut annotations = BTreeMap::new();
    annotations.insert(
        naming.deployed_at_annotation.clone(),
        timestamp.to_string(),
    );
    ObjectMeta {
        name: Some(name),
        namespace: Some(desired.namespace.clone()),
        labels: Some(naming.labels(&desired.app, version.as_str())),
        annotations: Some(annotations),
        owner_references: Some(vec![desired.owner.controller_ref()]),
        ..Default::default()
    }
}

pub fn workload(
    desired: &DesiredState,
    naming: &Naming,
    timestamp: i64,
) -> Deployment {
    let version = &desired.version;
    let selector = naming.selector_labels(&desired.app, version.as_str());

    let startup_probe = desired.startup_probe.as_ref().map(|p| Probe {
        http_get: Some(HTTPGetAction {
            path: Some(p.path.clone()),
            port: IntOrString::Int(p.port.unwrap_or(desired.port)),
            ..Default::default()
        }),
        initial_delay_seconds: p.initial_delay_seconds,
        period_seconds: p.period_seconds,
        failure_threshold: p.failure_threshold,
        ..Default::default()
    });

    let container = Container {
        name: desired.app.clone(),
        image: Some(desired.image_ref()),
        image_pull_policy: Some(desired.image_pull_policy.clone()),
        ports: Some(vec![ContainerPort {
            container_port: desired.port,
            ..Default::default()
        }]),
        startup_probe,
        ..Default::default()
    };

    let pod_spec = PodSpec {
        automount_service_account_token: Some(false),
        service_account_name: Some(desired.service_account_name.clone()),
        containers: vec![container],
        image_pull_secrets: desired.image_pull_secret.as_ref().map(|s| {
            vec![LocalObjectReference { name: s.clone() }]
        }),
        ..Default::default()
    };

    Deployment {
        metadata: object_meta(
            desired,
            naming,
            naming.workload_name(&desired.app, version.as_str()),
            version,
            timestamp,
        ),
        spec: Some(DeploymentSpec {
            replicas: Some(desired.replicas),
            selector: LabelSelector {
                match_labels: Some(selector.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(selector),
                    ..Default::default()
                }),
                spec: Some(pod_spec),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Service of `version` exposing `port`. `version` may be a kept older
/// version whose endpoint went missing; its pods listen on the port they were
/// created with, not necessarily the current one.
pub fn endpoint(
    desired: &DesiredState,
    naming: &Naming,
    version: &Version,
    port: i32,
    timestamp: i64,
) -> Service {
    Service {
        metadata: object_meta(
            desired,
            naming,
            naming.endpoint_name(&desired.app, version.as_str()),
            version,
            timestamp,
        ),
        spec: Some(ServiceSpec {
            selector: Some(naming.selector_labels(&desired.app, version.as_str())),
            ports: Some(vec![ServicePort {
                name: Some("http".to_string()),
                port,
                target_port: Some(IntOrString::Int(port)),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}
