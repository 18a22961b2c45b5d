use std::collections::BTreeMap;

use k8s_openapi::{
    api::{
        apps::v1::{Deployment, DeploymentSpec, DeploymentStrategy},
        core::v1::{Container, ContainerPort, PodSpec, PodTemplateSpec, Service, ServicePort, ServiceSpec},
    },
    apimachinery::pkg::{apis::meta::v1::LabelSelector, util::intstr::IntOrString},
};
use kube::api::ObjectMeta;

use crate::api::v1::neoncluster::NeonCluster;
use crate::util::labels::APP_NAME_LABEL;

pub const STORAGE_BROKER_PORT: i32 = 50051;

pub fn storage_broker_name(cluster: &str) -> String {
    format!("{cluster}-storage-broker")
}

/// Endpoint safekeepers and pageservers use to reach the broker.
pub fn storage_broker_endpoint(cluster: &str) -> String {
    format!("http://{}:{}", storage_broker_name(cluster), STORAGE_BROKER_PORT)
}

fn selector_labels(name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(APP_NAME_LABEL.to_string(), name.to_string())])
}

pub fn deployment(cluster: &NeonCluster, cluster_name: &str, namespace: &str) -> Deployment {
    let name = storage_broker_name(cluster_name);
    let labels = selector_labels(&name);

    Deployment {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: Some(namespace.to_string()),
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
                        name: "storage-broker".to_string(),
                        image: Some(cluster.spec.neon_image.clone()),
                        image_pull_policy: Some("IfNotPresent".to_string()),
                        command: Some(vec!["storage_broker".to_string()]),
                        args: Some(vec![
                            "--listen-addr".to_string(),
                            format!("0.0.0.0:{STORAGE_BROKER_PORT}"),
                        ]),
                        ports: Some(vec![ContainerPort {
                            name: Some("http".to_string()),
                            container_port: STORAGE_BROKER_PORT,
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
    let name = storage_broker_name(cluster_name);

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
                port: STORAGE_BROKER_PORT,
                target_port: Some(IntOrString::Int(STORAGE_BROKER_PORT)),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    #[test]
    fn broker_listens_on_grpc_port() {
        let deployment = deployment(&fixtures::cluster("c1"), "c1", "default");
        let spec = deployment.spec.unwrap();
        assert_eq!(spec.replicas, Some(1));

        let container = &spec.template.spec.unwrap().containers[0];
        assert_eq!(container.image.as_deref(), Some("neondatabase/neon:8463"));
        assert_eq!(
            container.args.as_deref(),
            Some(&["--listen-addr".to_string(), "0.0.0.0:50051".to_string()][..])
        );
    }

    #[test]
    fn endpoint_points_at_the_service() {
        assert_eq!(storage_broker_endpoint("c1"), "http://c1-storage-broker:50051");
        assert_eq!(service("c1", "ns").metadata.name.as_deref(), Some("c1-storage-broker"));
    }
}
