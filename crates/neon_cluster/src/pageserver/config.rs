use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::api::ObjectMeta;

use super::{labels, pageserver_name, PAGESERVER_HTTP_PORT, PAGESERVER_PG_PORT};
use crate::api::v1alpha1::neonpageserver::NeonPageserver;
use crate::storage_broker::storage_broker_endpoint;
use crate::storage_controller::{storage_controller_name, STORAGE_CONTROLLER_PORT};
use crate::util::errors::Result;
use crate::util::secrets::secret_value;

pub const CONFIG_FILE: &str = "pageserver.toml";

/// Remote storage settings read from the bucket credentials secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteStorage {
    pub bucket_name: String,
    pub bucket_region: String,
    pub endpoint: String,
}

impl RemoteStorage {
    pub fn from_secret(secret: &Secret) -> Result<Self> {
        Ok(Self {
            bucket_name: secret_value(secret, "BUCKET_NAME")?,
            bucket_region: secret_value(secret, "AWS_REGION")?,
            endpoint: secret_value(secret, "AWS_ENDPOINT_URL")?,
        })
    }
}

pub fn pageserver_toml(cluster: &str, storage: &RemoteStorage) -> String {
    format!(
        r#"control_plane_api = "http://{controller}:{controller_port}/upcall/v1/"
listen_pg_addr = "0.0.0.0:{PAGESERVER_PG_PORT}"
listen_http_addr = "0.0.0.0:{PAGESERVER_HTTP_PORT}"
broker_endpoint = "{broker}"
pg_distrib_dir='/usr/local/'
[remote_storage]
bucket_name = "{bucket}"
bucket_region = "{region}"
prefix_in_bucket = "pageserver"
endpoint = "{endpoint}"
"#,
        controller = storage_controller_name(cluster),
        controller_port = STORAGE_CONTROLLER_PORT,
        broker = storage_broker_endpoint(cluster),
        bucket = storage.bucket_name,
        region = storage.bucket_region,
        endpoint = storage.endpoint,
    )
}

pub fn config_map(pageserver: &NeonPageserver, name: &str, namespace: &str, storage: &RemoteStorage) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(pageserver_name(&pageserver.spec.cluster, pageserver.spec.id)),
            namespace: Some(namespace.to_string()),
            labels: Some(labels(pageserver, name)),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            CONFIG_FILE.to_string(),
            pageserver_toml(&pageserver.spec.cluster, storage),
        )])),
        ..Default::default()
    }
}
