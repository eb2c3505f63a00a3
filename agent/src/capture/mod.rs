//! Capture sessions

pub mod controller;
pub mod session;
