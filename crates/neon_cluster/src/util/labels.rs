use std::collections::BTreeMap;

pub const APP_NAME_LABEL: &str = "app.kubernetes.io/name";
pub const CLUSTER_LABEL: &str = "molnett.org/cluster";
pub const COMPONENT_LABEL: &str = "molnett.org/component";
pub const BRANCH_LABEL: &str = "molnett.org/branch";
pub const SAFEKEEPER_LABEL: &str = "molnett.org/safekeeper";
pub const PAGESERVER_LABEL: &str = "molnett.org/pageserver";

/// Labels shared by every child of a storage node or compute: cluster, component and the
/// identity label of the owning resource.
pub fn component_labels(cluster: &str, component: &str, identity: (&str, &str)) -> BTreeMap<String, String> {
    BTreeMap::from([
        (CLUSTER_LABEL.to_string(), cluster.to_string()),
        (COMPONENT_LABEL.to_string(), component.to_string()),
        (identity.0.to_string(), identity.1.to_string()),
    ])
}

/// Renders labels as a `k=v,k=v` selector.
pub fn selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}
