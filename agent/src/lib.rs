//! Timelapser Library
//!
//! Activity-triggered timelapse capture: transports feed an activity state
//! machine, which starts and stops capture sessions that are later encoded
//! to video with ffmpeg.

pub mod activity;
pub mod app;
pub mod camera;
pub mod capture;
pub mod errors;
pub mod filesys;
pub mod logs;
pub mod mqtt;
pub mod server;
pub mod storage;
pub mod utils;
pub mod video;
pub mod workers;
