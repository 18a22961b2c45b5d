use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, EnvVarSource, ObjectFieldSelector, PersistentVolumeClaim,
    PersistentVolumeClaimVolumeSource, Pod, PodSecurityContext, PodSpec, Service, ServicePort, ServiceSpec, Volume,
    VolumeMount,
};
use kube::api::ObjectMeta;

use crate::api::v1alpha1::neonsafekeeper::NeonSafekeeper;
use crate::storage_broker::storage_broker_endpoint;
use crate::util::labels::{component_labels, SAFEKEEPER_LABEL};
use crate::util::volume::persistent_volume_claim;

pub const SAFEKEEPER_PG_PORT: i32 = 5454;
pub const SAFEKEEPER_HTTP_PORT: i32 = 7676;

const STORAGE_VOLUME: &str = "safekeeper-storage";

/// Name shared by the claim, pod and service of one safekeeper.
pub fn safekeeper_name(cluster: &str, id: u32) -> String {
    format!("{cluster}-safekeeper-{id}")
}

fn labels(safekeeper: &NeonSafekeeper, name: &str) -> BTreeMap<String, String> {
    component_labels(&safekeeper.spec.cluster, "safekeeper", (SAFEKEEPER_LABEL, name))
}

pub fn persistent_volume_claim_for(safekeeper: &NeonSafekeeper, name: &str, namespace: &str) -> PersistentVolumeClaim {
    persistent_volume_claim(
        &safekeeper_name(&safekeeper.spec.cluster, safekeeper.spec.id),
        namespace,
        labels(safekeeper, name),
        &safekeeper.spec.storage_config,
    )
}

pub fn pod(safekeeper: &NeonSafekeeper, name: &str, namespace: &str, image: &str) -> Pod {
    let pod_name = safekeeper_name(&safekeeper.spec.cluster, safekeeper.spec.id);
    let command = format!(
        "/usr/local/bin/safekeeper --id={id} --broker-endpoint={broker} --listen-pg=0.0.0.0:{pg} \
         --listen-http=0.0.0.0:{http} --advertise-pg={pod_name}:{pg} --datadir /data",
        id = safekeeper.spec.id,
        broker = storage_broker_endpoint(&safekeeper.spec.cluster),
        pg = SAFEKEEPER_PG_PORT,
        http = SAFEKEEPER_HTTP_PORT,
    );

    Pod {
        metadata: ObjectMeta {
            name: Some(pod_name.clone()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels(safekeeper, name)),
            ..Default::default()
        },
        spec: Some(PodSpec {
            security_context: Some(PodSecurityContext {
                run_as_user: Some(1000),
                run_as_group: Some(1000),
                fs_group: Some(1000),
                ..Default::default()
            }),
            containers: vec![Container {
                name: "safekeeper".to_string(),
                image: Some(image.to_string()),
                command: Some(vec!["/bin/bash".to_string()]),
                args: Some(vec!["-c".to_string(), command]),
                ports: Some(vec![
                    ContainerPort {
                        container_port: SAFEKEEPER_PG_PORT,
                        ..Default::default()
                    },
                    ContainerPort {
                        container_port: SAFEKEEPER_HTTP_PORT,
                        ..Default::default()
                    },
                ]),
                env: Some(vec![
                    EnvVar {
                        name: "DEFAULT_PG_VERSION".to_string(),
                        value: Some("15".to_string()),
                        ..Default::default()
                    },
                    EnvVar {
                        name: "POD_NAME".to_string(),
                        value_from: Some(EnvVarSource {
                            field_ref: Some(ObjectFieldSelector {
                                field_path: "metadata.name".to_string(),
                                ..Default::default()
                            }),
                            ..Default::default()
                        }),
                        ..Default::default()
                    },
                ]),
                volume_mounts: Some(vec![VolumeMount {
                    name: STORAGE_VOLUME.to_string(),
                    mount_path: "/data".to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }],
            volumes: Some(vec![Volume {
                name: STORAGE_VOLUME.to_string(),
                persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                    claim_name: pod_name,
                    ..Default::default()
                }),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn service(safekeeper: &NeonSafekeeper, name: &str, namespace: &str) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(safekeeper_name(&safekeeper.spec.cluster, safekeeper.spec.id)),
            namespace: Some(namespace.to_string()),
            labels: Some(labels(safekeeper, name)),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(BTreeMap::from([(SAFEKEEPER_LABEL.to_string(), name.to_string())])),
            ports: Some(vec![
                ServicePort {
                    name: Some("pg".to_string()),
                    port: SAFEKEEPER_PG_PORT,
                    protocol: Some("TCP".to_string()),
                    ..Default::default()
                },
                ServicePort {
                    name: Some("http".to_string()),
                    port: SAFEKEEPER_HTTP_PORT,
                    protocol: Some("TCP".to_string()),
                    ..Default::default()
                },
            ]),
            ..Default::default()
        }),
        ..Default::default()
    }
}
