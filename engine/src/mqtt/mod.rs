//! MQTT transport for the discovery protocol

pub mod client;
pub mod topics;
