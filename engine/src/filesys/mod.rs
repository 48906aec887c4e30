//! Thin async wrappers around files and directories

pub mod dir;
pub mod file;
