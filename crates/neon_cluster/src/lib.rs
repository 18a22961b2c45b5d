pub mod api;
pub mod compute;
pub mod controllers;
pub mod pageserver;
pub mod safekeeper;
pub mod storage_broker;
pub mod storage_controller;
pub mod util;

#[cfg(any(test, feature = "test-util"))]
pub mod fixtures;
