use std::fmt;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::api::v1::{conditions_schema, PGVersion};
use crate::util::status::set_phase_and_ready;

/// Reference to one key of a secret in the cluster's namespace.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
pub struct SecretKeyReference {
    pub name: String,
    #[serde(default = "default_database_key")]
    pub key: String,
}

fn default_database_key() -> String {
    "uri".to_string()
}

/// Generate the Kubernetes wrapper struct `NeonCluster` from our Spec and Status struct
///
/// A cluster owns the shared storage services: the signing keypair secret, the storage
/// controller and the storage broker.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(kind = "NeonCluster", group = "oltp.molnett.org", version = "v1", namespaced)]
#[kube(status = "NeonClusterStatus", shortname = "neoncluster")]
pub struct NeonClusterSpec {
    #[serde(default = "default_num_safekeepers")]
    #[schemars(range(min = 3))]
    pub num_safekeepers: u8,
    #[serde(default = "default_pg_version")]
    pub default_pg_version: PGVersion,
    #[serde(default = "default_neon_image")]
    pub neon_image: String,

    /// Secret with `AWS_*` and `BUCKET_NAME` keys for pageserver remote storage
    pub bucket_credentials_secret: String,
    /// Postgres connection URI used by the storage controller
    pub storage_controller_database_secret: SecretKeyReference,
}

fn default_num_safekeepers() -> u8 {
    3
}
fn default_pg_version() -> PGVersion {
    PGVersion::PG16
}
fn default_neon_image() -> String {
    "neondatabase/neon:8463".to_string()
}

/// The status object of `NeonCluster`
#[derive(Deserialize, Serialize, Clone, Default, Debug, PartialEq, JsonSchema)]
pub struct NeonClusterStatus {
    #[serde(default)]
    #[schemars(schema_with = "conditions_schema")]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub phase: Option<String>,
    #[serde(default)]
    pub storage_broker_status: ComponentStatus,
    #[serde(default)]
    pub storage_controller_status: ComponentStatus,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, PartialEq, Eq, JsonSchema)]
pub struct ComponentStatus {
    pub ready_instances: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterPhase {
    Creating,
    Ready,
    CannotCreateClusterResources,
}

impl ClusterPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            ClusterPhase::Creating => "Creating",
            ClusterPhase::Ready => "Ready",
            ClusterPhase::CannotCreateClusterResources => "CannotCreateClusterResources",
        }
    }
}

impl fmt::Display for ClusterPhase {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl NeonClusterStatus {
    pub fn creating(&mut self) {
        set_phase_and_ready(
            self,
            ClusterPhase::Creating.as_str(),
            false,
            "ClusterIsNotReady",
            "Cluster Is Not Ready",
        );
    }

    pub fn cannot_create_resources(&mut self) {
        set_phase_and_ready(
            self,
            ClusterPhase::CannotCreateClusterResources.as_str(),
            false,
            "ClusterIsNotReady",
            "Cluster Is Not Ready",
        );
    }

    pub fn ready(&mut self) {
        set_phase_and_ready(self, ClusterPhase::Ready.as_str(), true, "ClusterIsReady", "Cluster is ready");
    }
}

impl_status!(NeonCluster, NeonClusterStatus);
