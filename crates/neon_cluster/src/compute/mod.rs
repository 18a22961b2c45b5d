use std::collections::BTreeMap;

use crate::api::v1::{neonbranch::NeonBranch, neonproject::NeonProject};
use crate::util::labels::{component_labels, BRANCH_LABEL};

pub mod config_map;
pub mod deployment;
pub mod service;
pub mod spec;

pub use config_map::compute_config_map;
pub use deployment::compute_deployment;
pub use service::{admin_service, postgres_service};
pub use spec::generate_compute_spec;

pub const COMPUTE_POSTGRES_PORT: i32 = 55433;
pub const COMPUTE_ADMIN_PORT: i32 = 3080;

pub const TENANT_ID_LABEL: &str = "neon.tenant_id";
pub const TIMELINE_ID_LABEL: &str = "neon.timeline_id";
pub const CLUSTER_NAME_ANNOTATION: &str = "neon.cluster_name";
pub const COMPUTE_ID_ANNOTATION: &str = "neon.compute_id";

pub fn compute_deployment_name(branch: &str) -> String {
    format!("{branch}-compute-node")
}

pub fn compute_spec_name(branch: &str) -> String {
    format!("{branch}-compute-spec")
}

/// Selector label every compute pod carries.
pub fn app_selector(branch: &str) -> BTreeMap<String, String> {
    BTreeMap::from([("app".to_string(), compute_deployment_name(branch))])
}

pub(crate) fn compute_labels(branch_name: &str, project: &NeonProject) -> BTreeMap<String, String> {
    component_labels(&project.spec.cluster_name, "compute", (BRANCH_LABEL, branch_name))
}

/// Tenant and timeline labels, empty values while the ids are not generated yet.
pub(crate) fn storage_id_labels(branch: &NeonBranch, project: &NeonProject) -> BTreeMap<String, String> {
    BTreeMap::from([
        (
            TENANT_ID_LABEL.to_string(),
            project.tenant_id().unwrap_or_default().to_string(),
        ),
        (
            TIMELINE_ID_LABEL.to_string(),
            branch.timeline_id().unwrap_or_default().to_string(),
        ),
    ])
}
