use std::fmt::{self, Display};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub mod neonpageserver;
pub mod neonsafekeeper;

pub const PHASE_CREATING: &str = "Creating";
pub const PHASE_READY: &str = "Ready";
pub const PHASE_INVALID_SPEC: &str = "InvalidSpec";
pub const PHASE_CANNOT_CREATE_RESOURCES: &str = "CannotCreateResources";

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, JsonSchema)]
#[serde(transparent)]
pub struct NodeId(pub u64);

impl Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
pub struct StorageConfig {
    /// Storage class to use for persistent volume claims
    pub storage_class: Option<String>,
    /// Size of the persistent volume
    #[serde(default = "default_storage_size")]
    pub size: String,
}

fn default_storage_size() -> String {
    "10Gi".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_class: None,
            size: default_storage_size(),
        }
    }
}
