use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, ContainerPort, EmptyDirVolumeSource, EnvVar, PodSpec, PodTemplateSpec, Volume,
    VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};

use super::{
    app_selector, compute_deployment_name, compute_labels, compute_spec_name, storage_id_labels,
    CLUSTER_NAME_ANNOTATION, COMPUTE_ID_ANNOTATION, COMPUTE_POSTGRES_PORT,
};
use crate::api::v1::{neonbranch::NeonBranch, neonproject::NeonProject};

pub fn compute_deployment(
    branch: &NeonBranch,
    branch_name: &str,
    namespace: &str,
    project: &NeonProject,
    operator_url: &str,
) -> Deployment {
    let deployment_name = compute_deployment_name(branch_name);

    let selector = app_selector(branch_name);
    let mut labels = selector.clone();
    labels.extend(storage_id_labels(branch, project));
    labels.extend(compute_labels(branch_name, project));

    // Read back by the compute spec endpoint
    let annotations = BTreeMap::from([
        (COMPUTE_ID_ANNOTATION.to_string(), branch_name.to_string()),
        (CLUSTER_NAME_ANNOTATION.to_string(), project.spec.cluster_name.clone()),
    ]);

    Deployment {
        metadata: ObjectMeta {
            name: Some(deployment_name),
            namespace: Some(namespace.to_string()),
            labels: Some(labels.clone()),
            annotations: Some(annotations),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(selector),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: "compute-node".to_string(),
                        image: Some(format!("neondatabase/compute-node-v{}", branch.spec.pg_version)),
                        args: Some(vec![
                            "--pgdata".to_string(),
                            "/.neon/data/pgdata".to_string(),
                            format!("--connstr=postgresql://cloud_admin:@0.0.0.0:{COMPUTE_POSTGRES_PORT}/postgres"),
                            "--compute-id".to_string(),
                            branch_name.to_string(),
                            "-p".to_string(),
                            operator_url.to_string(),
                            "--pgbin".to_string(),
                            "/usr/local/bin/postgres".to_string(),
                        ]),
                        ports: Some(vec![ContainerPort {
                            container_port: COMPUTE_POSTGRES_PORT,
                            ..Default::default()
                        }]),
                        volume_mounts: Some(vec![
                            VolumeMount {
                                name: "spec-volume".to_string(),
                                mount_path: "/var".to_string(),
                                ..Default::default()
                            },
                            VolumeMount {
                                name: "pgdata".to_string(),
                                mount_path: "/.neon/data".to_string(),
                                ..Default::default()
                            },
                        ]),
                        env: Some(vec![EnvVar {
                            name: "OTEL_SDK_DISABLED".to_string(),
                            value: Some("true".to_string()),
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }],
                    volumes: Some(vec![
                        Volume {
                            name: "spec-volume".to_string(),
                            config_map: Some(ConfigMapVolumeSource {
                                name: compute_spec_name(branch_name),
                                ..Default::default()
                            }),
                            ..Default::default()
                        },
                        Volume {
                            name: "pgdata".to_string(),
                            empty_dir: Some(EmptyDirVolumeSource {
                                size_limit: Some(Quantity("500Mi".to_string())),
                                ..Default::default()
                            }),
                            ..Default::default()
                        },
                    ]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    }
}
