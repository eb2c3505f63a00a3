//! MQTT activity transport

pub mod assembler;
pub mod client;
pub mod topics;
