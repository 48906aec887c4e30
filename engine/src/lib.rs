//! Discovery Engine Library
//!
//! Selects devices for dynamic operator deployments by querying discovery
//! repositories over publish/subscribe, ranking the candidates against device
//! templates and deploying on the best device.

pub mod app;
pub mod deploy;
pub mod discovery;
pub mod engine;
pub mod errors;
pub mod filesys;
pub mod logs;
pub mod messaging;
pub mod models;
pub mod mqtt;
pub mod storage;
pub mod utils;
pub mod workers;
