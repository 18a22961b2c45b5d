pub mod client;
pub mod resources;
pub mod types;

pub use client::{CoordinationError, ProvisionOutcome, StorageControllerClient, StorageCoordinator};

/// HTTP port of the storage controller service.
pub const STORAGE_CONTROLLER_PORT: i32 = 8080;

/// Name shared by the storage controller deployment and service of a cluster.
pub fn storage_controller_name(cluster: &str) -> String {
    format!("{cluster}-storage-controller")
}
