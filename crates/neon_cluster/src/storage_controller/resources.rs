use std::collections::BTreeMap;

use k8s_openapi::{
    api::{
        apps::v1::{Deployment, DeploymentSpec, DeploymentStrategy},
        core::v1::{
            Container, ContainerPort, EnvVar, EnvVarSource, PodSpec, PodTemplateSpec, SecretKeySelector,
            Service, ServicePort, ServiceSpec,
        },
    },
    apimachinery::pkg::{apis::meta::v1::LabelSelector, util::intstr::IntOrString},
};
use kube::api::ObjectMeta;

use super::{storage_controller_name, STORAGE_CONTROLLER_PORT};
use crate::api::v1::neoncluster::NeonCluster;
use crate::util::labels::APP_NAME_LABEL;

/// Env var the database URL is injected into, referenced from the container args.
pub const DATABASE_URL_ENV: &str = "DATABASE_URL";

fn selector_labels(name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(APP_NAME_LABEL.to_string(), name.to_string())])
}

pub fn deployment(cluster: &NeonCluster, cluster_name: &str, namespace: &str) -> Deployment {
    let name = storage_controller_name(cluster_name);
    let labels = selector_labels(&name);
    let database = &cluster.spec.storage_controller_database_secret;

    Deployment {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            strategy: Some(DeploymentStrategy {
                type_: Some("RollingUpdate".to_string()),
                ..Default::default()
            }),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: "storage-controller".to_string(),
                        image: Some(cluster.spec.neon_image.clone()),
                        image_pull_policy: Some("IfNotPresent".to_string()),
                        command: Some(vec!["storage_controller".to_string()]),
                        args: Some(
                            vec![
                                "--dev",
                                "-l",
                                "0.0.0.0:8080",
                                "--initial-split-shards",
                                "0",
                                "--database-url",
                                "$(DATABASE_URL)",
                            ]
                            .into_iter()
                            .map(String::from)
                            .collect(),
                        ),
                        env: Some(vec![EnvVar {
                            name: DATABASE_URL_ENV.to_string(),
                            value_from: Some(EnvVarSource {
                                secret_key_ref: Some(SecretKeySelector {
                                    name: database.name.clone(),
                                    key: database.key.clone(),
                                    ..Default::default()
                                }),
                                ..Default::default()
                            }),
                            ..Default::default()
                        }]),
                        ports: Some(vec![ContainerPort {
                            name: Some("http".to_string()),
                            container_port: STORAGE_CONTROLLER_PORT,
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn service(cluster_name: &str, namespace: &str) -> Service {
    let name = storage_controller_name(cluster_name);

    Service {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: Some(namespace.to_string()),
            labels: Some(selector_labels(&name)),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(selector_labels(&name)),
            ports: Some(vec![ServicePort {
                name: Some("http".to_string()),
                port: STORAGE_CONTROLLER_PORT,
                target_port: Some(IntOrString::Int(STORAGE_CONTROLLER_PORT)),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}
