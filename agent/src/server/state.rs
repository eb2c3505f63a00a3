//! Server state

use std::sync::Arc;

use crate::activity::monitor::ActivityMonitor;
use crate::app::state::AppState;
use crate::capture::controller::CaptureController;

/// Server state shared across handlers
pub struct ServerState {
    pub app: Arc<AppState>,
}

impl ServerState {
    pub fn new(app: Arc<AppState>) -> Self {
        Self { app }
    }

    pub fn controller(&self) -> &CaptureController {
        &self.app.controller
    }

    pub fn monitor(&self) -> &ActivityMonitor {
        &self.app.monitor
    }
}
