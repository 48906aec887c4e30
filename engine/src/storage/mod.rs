//! Persistent state: layout, settings and the document repositories

pub mod layout;
pub mod repository;
pub mod settings;
