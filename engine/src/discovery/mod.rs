//! Discovery: repository protocol, candidate processing and scoring

pub mod gateway;
pub mod processor;
pub mod scoring;
