use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use kube::api::ObjectMeta;

use super::{labels, pageserver_name, PAGESERVER_HTTP_PORT, PAGESERVER_PG_PORT};
use crate::api::v1alpha1::neonpageserver::NeonPageserver;
use crate::util::labels::PAGESERVER_LABEL;

pub fn service(pageserver: &NeonPageserver, name: &str, namespace: &str) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(pageserver_name(&pageserver.spec.cluster, pageserver.spec.id)),
            namespace: Some(namespace.to_string()),
            labels: Some(labels(pageserver, name)),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(BTreeMap::from([(PAGESERVER_LABEL.to_string(), name.to_string())])),
            ports: Some(vec![
                ServicePort {
                    name: Some("pg".to_string()),
                    port: PAGESERVER_PG_PORT,
                    protocol: Some("TCP".to_string()),
                    ..Default::default()
                },
                ServicePort {
                    name: Some("http".to_string()),
                    port: PAGESERVER_HTTP_PORT,
                    protocol: Some("TCP".to_string()),
                    ..Default::default()
                },
            ]),
            ..Default::default()
        }),
        ..Default::default()
    }
}
