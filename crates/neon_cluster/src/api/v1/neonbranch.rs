use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::api::v1::{conditions_schema, PGVersion};
use crate::util::status::set_phase_and_ready;

pub const PHASE_CREATING: &str = "Creating";
pub const PHASE_READY: &str = "Ready";
pub const PHASE_CANNOT_CREATE_RESOURCES: &str = "CannotCreateResources";
pub const PHASE_TIMELINE_CREATION_FAILED: &str = "TimelineCreationFailed";

/// A branch is one timeline of a project's tenant plus the compute serving it.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(kind = "NeonBranch", group = "oltp.molnett.org", version = "v1", namespaced)]
#[kube(status = "NeonBranchStatus", shortname = "neonbranch")]
pub struct NeonBranchSpec {
    pub id: String,
    pub name: String,

    // 32 character hex string, generated once and never changed
    pub timeline_id: Option<String>,

    #[serde(default)]
    pub pg_version: PGVersion,
    /// Name of the NeonProject in the same namespace
    pub project_id: String,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, PartialEq, JsonSchema)]
pub struct NeonBranchStatus {
    #[serde(default)]
    #[schemars(schema_with = "conditions_schema")]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub phase: Option<String>,
}

impl NeonBranchStatus {
    pub fn creating(&mut self) {
        set_phase_and_ready(self, PHASE_CREATING, false, "BranchIsNotReady", "Branch is being created");
    }

    pub fn ready(&mut self) {
        set_phase_and_ready(self, PHASE_READY, true, "BranchIsReady", "Branch is ready");
    }

    pub fn cannot_create_resources(&mut self) {
        set_phase_and_ready(
            self,
            PHASE_CANNOT_CREATE_RESOURCES,
            false,
            "BranchIsNotReady",
            "Branch compute resources could not be created",
        );
    }

    pub fn timeline_creation_failed(&mut self, message: &str) {
        set_phase_and_ready(
            self,
            PHASE_TIMELINE_CREATION_FAILED,
            false,
            "TimelineCreationFailed",
            message,
        );
    }

    pub fn project_not_ready(&mut self, message: &str) {
        set_phase_and_ready(self, PHASE_TIMELINE_CREATION_FAILED, false, "ProjectNotReady", message);
    }
}

impl NeonBranch {
    /// Timeline id once it has been generated.
    pub fn timeline_id(&self) -> Option<&str> {
        self.spec.timeline_id.as_deref().filter(|id| !id.is_empty())
    }
}

impl_status!(NeonBranch, NeonBranchStatus);
