use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::ObjectMeta;
use serde::Serialize;

use super::{compute_labels, compute_spec_name};
use crate::api::v1::neonproject::NeonProject;
use crate::util::errors::Result;
use crate::util::jwt_keys::{Ed25519KeyPair, Jwks};

pub const SPEC_FILE: &str = "spec.json";

#[derive(Serialize)]
pub struct ComputeCtlConfig {
    pub jwks: Jwks,
}

/// Boot-time spec mounted into the compute; only carries the keys compute_ctl trusts.
#[derive(Serialize)]
struct BootstrapSpec {
    format_version: &'static str,
    compute_ctl_config: ComputeCtlConfig,
}

pub fn compute_config_map(
    branch_name: &str,
    namespace: &str,
    project: &NeonProject,
    key_pair: &Ed25519KeyPair,
) -> Result<ConfigMap> {
    let spec = BootstrapSpec {
        format_version: "1.0",
        compute_ctl_config: ComputeCtlConfig {
            jwks: key_pair.to_jwks(),
        },
    };

    Ok(ConfigMap {
        metadata: ObjectMeta {
            name: Some(compute_spec_name(branch_name)),
            namespace: Some(namespace.to_string()),
            labels: Some(compute_labels(branch_name, project)),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(SPEC_FILE.to_string(), serde_json::to_string(&spec)?)])),
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use assert_json_diff::assert_json_eq;
    use serde_json::json;

    #[test]
    fn spec_json_embeds_the_public_key() {
        let pair = Ed25519KeyPair::generate();
        let project = fixtures::project("p1", "c1");
        let cm = compute_config_map("main", "default", &project, &pair).unwrap();

        assert_eq!(cm.metadata.name.as_deref(), Some("main-compute-spec"));
        let labels = cm.metadata.labels.unwrap();
        assert_eq!(labels["molnett.org/cluster"], "c1");
        assert_eq!(labels["molnett.org/branch"], "main");

        let data = cm.data.unwrap();
        let spec: serde_json::Value = serde_json::from_str(&data[SPEC_FILE]).unwrap();
        assert_json_eq!(
            spec,
            json!({
                "format_version": "1.0",
                "compute_ctl_config": {"jwks": {"keys": [serde_json::to_value(pair.to_jwk()).unwrap()]}}
            })
        );
    }
}
