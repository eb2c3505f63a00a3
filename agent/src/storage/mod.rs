//! On-disk layout, settings and persisted state

pub mod layout;
pub mod settings;
pub mod state;
