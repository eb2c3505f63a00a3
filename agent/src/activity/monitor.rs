//! Activity monitor: applies state machine decisions to a listener

use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::activity::fsm::{ActivityStateMachine, CaptureCommand, MonitorState};
use crate::activity::ignore::IgnoreRuleSet;
use crate::activity::status::ActivityStatus;

/// Receiver of activity transitions.
///
/// Implementations must be idempotent: a start while already capturing or a
/// stop while idle is a no-op.
#[async_trait]
pub trait ActivityListener: Send + Sync {
    async fn activity_started(&self, file: Option<String>);

    async fn activity_stopped(&self);
}

/// Activity monitor
pub struct ActivityMonitor {
    machine: Mutex<ActivityStateMachine>,
    rules: RwLock<IgnoreRuleSet>,
    listener: Arc<dyn ActivityListener>,
}

impl ActivityMonitor {
    pub fn new(listener: Arc<dyn ActivityListener>, rules: IgnoreRuleSet) -> Self {
        Self {
            machine: Mutex::new(ActivityStateMachine::new()),
            rules: RwLock::new(rules),
            listener,
        }
    }

    /// Replace the ignore rules
    pub fn set_ignored_patterns(&self, patterns: &[String]) {
        let rules = IgnoreRuleSet::new(patterns);
        *self.rules.write().unwrap_or_else(|e| e.into_inner()) = rules;
        info!("Updated ignored patterns: {:?}", patterns);
    }

    pub fn ignored_patterns(&self) -> Vec<String> {
        self.rules.read().unwrap_or_else(|e| e.into_inner()).patterns()
    }

    pub fn state(&self) -> MonitorState {
        self.machine.lock().unwrap_or_else(|e| e.into_inner()).state()
    }

    pub fn current_file(&self) -> Option<String> {
        self.machine
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .last_file()
            .map(str::to_string)
    }

    /// Feed one status update through the state machine and notify the listener
    pub async fn handle(&self, status: &ActivityStatus) -> Vec<CaptureCommand> {
        let commands = {
            let rules = self.rules.read().unwrap_or_else(|e| e.into_inner());
            let mut machine = self.machine.lock().unwrap_or_else(|e| e.into_inner());
            machine.process(status, &rules)
        };

        if let Some(file) = &status.current_file {
            debug!("Current file: {}", file);
        }

        for command in &commands {
            match command {
                CaptureCommand::Start { file } => {
                    info!("Activity started ({:?}), notifying capture controller", file);
                    self.listener.activity_started(file.clone()).await;
                }
                CaptureCommand::Stop => {
                    info!("Activity stopped, notifying capture controller");
                    self.listener.activity_stopped().await;
                }
            }
        }

        commands
    }
}
