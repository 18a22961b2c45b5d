use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, ContainerPort, EmptyDirVolumeSource, EnvVar, EnvVarSource,
    PersistentVolumeClaimVolumeSource, Pod, PodSecurityContext, PodSpec, SecretKeySelector, Volume, VolumeMount,
};
use kube::api::ObjectMeta;

use super::{labels, pageserver_name, PAGESERVER_HTTP_PORT, PAGESERVER_PG_PORT};
use crate::api::v1::neoncluster::NeonCluster;
use crate::api::v1alpha1::neonpageserver::NeonPageserver;

const STORAGE_VOLUME: &str = "pageserver-storage";
const CONFIGMAP_VOLUME: &str = "pageserver-config";
const CONFIG_VOLUME: &str = "config";
const AVAILABILITY_ZONE: &str = "se-ume";

/// Keys of the bucket credentials secret exported to the pageserver environment.
const BUCKET_ENV: [&str; 5] = [
    "AWS_ACCESS_KEY_ID",
    "AWS_SECRET_ACCESS_KEY",
    "AWS_REGION",
    "BUCKET_NAME",
    "AWS_ENDPOINT_URL",
];

/// Shell script of the init step: identity, registration metadata and the rendered config.
pub fn setup_script(pageserver: &NeonPageserver, namespace: &str) -> String {
    let host = format!(
        "{}.{}",
        pageserver_name(&pageserver.spec.cluster, pageserver.spec.id),
        namespace
    );
    let metadata = serde_json::json!({
        "host": host,
        "http_host": host,
        "http_port": PAGESERVER_HTTP_PORT,
        "port": PAGESERVER_PG_PORT,
        "availability_zone_id": AVAILABILITY_ZONE,
    });

    format!(
        "echo \"id={id}\" > /config/identity.toml\n\
         echo '{metadata}' > /config/metadata.json\n\
         cp /configmap/pageserver.toml /config/pageserver.toml\n",
        id = pageserver.spec.id,
    )
}

fn secret_env(secret: &str, key: &str) -> EnvVar {
    EnvVar {
        name: key.to_string(),
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: secret.to_string(),
                key: key.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn plain_env(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        ..Default::default()
    }
}

/// Pageserver pod running the cluster's image and default Postgres version.
pub fn pod(pageserver: &NeonPageserver, name: &str, namespace: &str, cluster: &NeonCluster) -> Pod {
    let pod_name = pageserver_name(&pageserver.spec.cluster, pageserver.spec.id);

    let mut env = vec![
        plain_env("RUST_LOG", "debug"),
        plain_env("DEFAULT_PG_VERSION", &cluster.spec.default_pg_version.to_string()),
    ];
    env.extend(
        BUCKET_ENV
            .iter()
            .map(|key| secret_env(&pageserver.spec.bucket_credentials_secret, key)),
    );

    Pod {
        metadata: ObjectMeta {
            name: Some(pod_name.clone()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels(pageserver, name)),
            ..Default::default()
        },
        spec: Some(PodSpec {
            security_context: Some(PodSecurityContext {
                run_as_user: Some(1000),
                run_as_group: Some(1000),
                fs_group: Some(1000),
                ..Default::default()
            }),
            init_containers: Some(vec![Container {
                name: "setup-config".to_string(),
                image: Some("busybox:latest".to_string()),
                command: Some(vec!["/bin/sh".to_string(), "-c".to_string()]),
                args: Some(vec![setup_script(pageserver, namespace)]),
                volume_mounts: Some(vec![
                    VolumeMount {
                        name: CONFIGMAP_VOLUME.to_string(),
                        mount_path: "/configmap".to_string(),
                        ..Default::default()
                    },
                    VolumeMount {
                        name: CONFIG_VOLUME.to_string(),
                        mount_path: "/config".to_string(),
                        ..Default::default()
                    },
                ]),
                ..Default::default()
            }]),
            containers: vec![Container {
                name: "pageserver".to_string(),
                image: Some(cluster.spec.neon_image.clone()),
                image_pull_policy: Some("Always".to_string()),
                command: Some(vec!["/usr/local/bin/pageserver".to_string()]),
                ports: Some(vec![
                    ContainerPort {
                        container_port: PAGESERVER_PG_PORT,
                        ..Default::default()
                    },
                    ContainerPort {
                        container_port: PAGESERVER_HTTP_PORT,
                        ..Default::default()
                    },
                ]),
                env: Some(env),
                volume_mounts: Some(vec![
                    VolumeMount {
                        name: STORAGE_VOLUME.to_string(),
                        mount_path: "/data/.neon/tenants".to_string(),
                        ..Default::default()
                    },
                    VolumeMount {
                        name: CONFIG_VOLUME.to_string(),
                        mount_path: "/data/.neon".to_string(),
                        ..Default::default()
                    },
                ]),
                ..Default::default()
            }],
            volumes: Some(vec![
                Volume {
                    name: STORAGE_VOLUME.to_string(),
                    persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                        claim_name: pod_name.clone(),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
                Volume {
                    name: CONFIGMAP_VOLUME.to_string(),
                    config_map: Some(ConfigMapVolumeSource {
                        name: pod_name,
                        ..Default::default()
                    }),
                    ..Default::default()
                },
                Volume {
                    name: CONFIG_VOLUME.to_string(),
                    empty_dir: Some(EmptyDirVolumeSource::default()),
                    ..Default::default()
                },
            ]),
            ..Default::default()
        }),
        ..Default::default()
    }
}
