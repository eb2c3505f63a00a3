//! Background workers

pub mod cache_sweep;
pub mod monitor;
pub mod mqtt;
pub mod poller;
pub mod stream;
