use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::api::v1::{conditions_schema, PGVersion};
use crate::util::status::set_phase_and_ready;

pub const PHASE_PENDING: &str = "Pending";
pub const PHASE_CREATING: &str = "Creating";
pub const PHASE_READY: &str = "Ready";
pub const PHASE_TENANT_CREATION_FAILED: &str = "TenantCreationFailed";
pub const PHASE_PAGESERVER_CONNECTION_ERROR: &str = "PageserverConnectionError";

/// A project maps to one tenant on the cluster's storage.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(kind = "NeonProject", group = "oltp.molnett.org", version = "v1", namespaced)]
#[kube(status = "NeonProjectStatus", shortname = "neonproject")]
pub struct NeonProjectSpec {
    pub cluster_name: String,

    // 32 character hex string, generated once and never changed
    pub tenant_id: Option<String>,

    #[serde(default)]
    pub pg_version: PGVersion,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, PartialEq, JsonSchema)]
pub struct NeonProjectStatus {
    #[serde(default)]
    #[schemars(schema_with = "conditions_schema")]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub phase: Option<String>,
}

impl NeonProjectStatus {
    pub fn pending(&mut self) {
        set_phase_and_ready(self, PHASE_PENDING, false, "ProjectIsNotReady", "Project is pending");
    }

    pub fn creating(&mut self) {
        set_phase_and_ready(self, PHASE_CREATING, false, "ProjectIsNotReady", "Project is being created");
    }

    pub fn ready(&mut self) {
        set_phase_and_ready(self, PHASE_READY, true, "ProjectIsReady", "Project is ready");
    }

    pub fn tenant_creation_failed(&mut self, message: &str) {
        set_phase_and_ready(self, PHASE_TENANT_CREATION_FAILED, false, "TenantCreationFailed", message);
    }

    pub fn pageserver_connection_error(&mut self, message: &str) {
        set_phase_and_ready(
            self,
            PHASE_PAGESERVER_CONNECTION_ERROR,
            false,
            "PageserverConnectionError",
            message,
        );
    }
}

impl NeonProject {
    /// Tenant id once it has been generated.
    pub fn tenant_id(&self) -> Option<&str> {
        self.spec.tenant_id.as_deref().filter(|id| !id.is_empty())
    }
}

impl_status!(NeonProject, NeonProjectStatus);
