pub mod config;
pub mod errors;
pub mod ids;
pub mod jwt_keys;
pub mod labels;
pub mod metrics;
pub mod secrets;
pub mod status;
pub mod store;
pub mod subresource;
pub mod subset;
pub mod telemetry;
pub mod volume;

pub use errors::{Error, Result};
