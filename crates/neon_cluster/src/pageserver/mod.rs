use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::PersistentVolumeClaim;

use crate::api::v1alpha1::{neonpageserver::NeonPageserver, NodeId};
use crate::util::labels::{component_labels, PAGESERVER_LABEL};
use crate::util::volume::persistent_volume_claim;

pub mod config;
pub mod pod;
pub mod service;

pub const PAGESERVER_PG_PORT: i32 = 6400;
pub const PAGESERVER_HTTP_PORT: i32 = 9898;

/// Name shared by the claim, config map, pod and service of one pageserver.
pub fn pageserver_name(cluster: &str, id: NodeId) -> String {
    format!("{cluster}-pageserver-{id}")
}

/// `postgres://` connection string computes use to reach a pageserver.
pub fn pageserver_connstring(cluster: &str, id: NodeId, namespace: &str) -> String {
    format!(
        "postgres://no_user@{}.{}:{}",
        pageserver_name(cluster, id),
        namespace,
        PAGESERVER_PG_PORT
    )
}

pub(crate) fn labels(pageserver: &NeonPageserver, name: &str) -> BTreeMap<String, String> {
    component_labels(&pageserver.spec.cluster, "pageserver", (PAGESERVER_LABEL, name))
}

pub fn persistent_volume_claim_for(pageserver: &NeonPageserver, name: &str, namespace: &str) -> PersistentVolumeClaim {
    persistent_volume_claim(
        &pageserver_name(&pageserver.spec.cluster, pageserver.spec.id),
        namespace,
        labels(pageserver, name),
        &pageserver.spec.storage_config,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connstring_uses_service_dns() {
        assert_eq!(
            pageserver_connstring("c1", NodeId(3), "db"),
            "postgres://no_user@c1-pageserver-3.db:6400"
        );
    }
}
