//! Video assembly

pub mod encoder;
pub mod progress;
