use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::api::v1::conditions_schema;
use crate::api::v1alpha1::{
    StorageConfig, PHASE_CANNOT_CREATE_RESOURCES, PHASE_CREATING, PHASE_INVALID_SPEC, PHASE_READY,
};
use crate::util::status::set_phase_and_ready;

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    kind = "NeonSafekeeper",
    group = "oltp.molnett.org",
    version = "v1alpha1",
    namespaced
)]
#[kube(status = "NeonSafekeeperStatus", shortname = "neonsafekeeper")]
pub struct NeonSafekeeperSpec {
    pub id: u32,

    pub cluster: String,

    #[serde(default)]
    pub storage_config: StorageConfig,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, PartialEq, JsonSchema)]
pub struct NeonSafekeeperStatus {
    #[serde(default)]
    #[schemars(schema_with = "conditions_schema")]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub phase: Option<String>,
}

impl NeonSafekeeperStatus {
    pub fn creating(&mut self) {
        set_phase_and_ready(self, PHASE_CREATING, false, "SafekeeperIsNotReady", "Safekeeper is not ready");
    }

    pub fn ready(&mut self) {
        set_phase_and_ready(self, PHASE_READY, true, "SafekeeperIsReady", "Safekeeper is ready");
    }

    pub fn invalid_spec(&mut self, message: &str) {
        set_phase_and_ready(self, PHASE_INVALID_SPEC, false, "SafekeeperIsNotReady", message);
    }

    pub fn cannot_create_resources(&mut self) {
        set_phase_and_ready(
            self,
            PHASE_CANNOT_CREATE_RESOURCES,
            false,
            "SafekeeperIsNotReady",
            "Safekeeper resources could not be created",
        );
    }
}

impl_status!(NeonSafekeeper, NeonSafekeeperStatus);
