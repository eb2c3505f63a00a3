//! Camera access module

pub mod device;
pub mod frame;
pub mod manager;
pub mod network;
pub mod reference;
pub mod resolution;
pub mod settings;
