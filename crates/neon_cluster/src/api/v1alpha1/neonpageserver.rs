use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::api::v1::conditions_schema;
use crate::api::v1alpha1::{
    NodeId, StorageConfig, PHASE_CANNOT_CREATE_RESOURCES, PHASE_CREATING, PHASE_INVALID_SPEC, PHASE_READY,
};
use crate::util::status::set_phase_and_ready;

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    kind = "NeonPageserver",
    group = "oltp.molnett.org",
    version = "v1alpha1",
    namespaced
)]
#[kube(status = "NeonPageserverStatus", shortname = "neonpageserver")]
pub struct NeonPageserverSpec {
    pub id: NodeId,

    pub cluster: String,
    pub bucket_credentials_secret: String,

    #[serde(default)]
    pub storage_config: StorageConfig,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, PartialEq, JsonSchema)]
pub struct NeonPageserverStatus {
    #[serde(default)]
    #[schemars(schema_with = "conditions_schema")]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub phase: Option<String>,
}

impl NeonPageserverStatus {
    pub fn creating(&mut self) {
        set_phase_and_ready(self, PHASE_CREATING, false, "PageserverIsNotReady", "Pageserver is not ready");
    }

    pub fn ready(&mut self) {
        set_phase_and_ready(self, PHASE_READY, true, "PageserverIsReady", "Pageserver is ready");
    }

    pub fn invalid_spec(&mut self, message: &str) {
        set_phase_and_ready(self, PHASE_INVALID_SPEC, false, "PageserverIsNotReady", message);
    }

    pub fn cannot_create_resources(&mut self) {
        set_phase_and_ready(
            self,
            PHASE_CANNOT_CREATE_RESOURCES,
            false,
            "PageserverIsNotReady",
            "Pageserver resources could not be created",
        );
    }
}

impl_status!(NeonPageserver, NeonPageserverStatus);
