//! Integration tests

mod support;
mod test_camera;
mod test_controller;
mod test_fsm;
mod test_server;
mod test_transport;
mod test_video;
