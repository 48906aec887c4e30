//! Domain models shared by the gateway, the processor and the engine

pub mod candidates;
pub mod deployment;
pub mod description;
pub mod messages;
pub mod template;
pub mod topic;
