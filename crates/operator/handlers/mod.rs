pub mod compute;
pub mod health;
pub mod metrics;
