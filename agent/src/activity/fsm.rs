//! Finite state machine turning activity observations into capture commands

use serde::Serialize;

use crate::activity::ignore::IgnoreRuleSet;
use crate::activity::status::ActivityStatus;

/// Capture state as seen by the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorState {
    /// No activity running
    Idle,

    /// Activity running and being captured
    Capturing,

    /// Activity running but matched an ignore rule
    Ignored,
}

/// Command emitted towards the capture controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureCommand {
    Start { file: Option<String> },
    Stop,
}

/// Activity state machine
#[derive(Debug, Clone)]
pub struct ActivityStateMachine {
    state: MonitorState,
    last_file: Option<String>,
}

impl ActivityStateMachine {
    pub fn new() -> Self {
        Self {
            state: MonitorState::Idle,
            last_file: None,
        }
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    pub fn is_capturing(&self) -> bool {
        self.state == MonitorState::Capturing
    }

    /// Last file seen while running, including an ignored one
    pub fn last_file(&self) -> Option<&str> {
        self.last_file.as_deref()
    }

    /// Process one status update and return the commands to apply, in order
    pub fn process(&mut self, status: &ActivityStatus, rules: &IgnoreRuleSet) -> Vec<CaptureCommand> {
        let mut commands = Vec::new();

        if !status.is_running {
            if self.is_capturing() {
                commands.push(CaptureCommand::Stop);
            }
            self.state = MonitorState::Idle;
            self.last_file = None;
            return commands;
        }

        let file = status.current_file.clone();

        if rules.is_ignored(file.as_deref()) {
            if self.is_capturing() {
                commands.push(CaptureCommand::Stop);
            }
            self.state = MonitorState::Ignored;
            self.last_file = file;
            return commands;
        }

        match self.state {
            MonitorState::Idle | MonitorState::Ignored => {
                commands.push(CaptureCommand::Start { file: file.clone() });
                self.state = MonitorState::Capturing;
                self.last_file = file;
            }
            MonitorState::Capturing => {
                // A missing file or the first file of a session is not a change
                if let Some(new_file) = file {
                    match &self.last_file {
                        Some(previous) if *previous != new_file => {
                            commands.push(CaptureCommand::Stop);
                            commands.push(CaptureCommand::Start {
                                file: Some(new_file.clone()),
                            });
                        }
                        _ => {}
                    }
                    self.last_file = Some(new_file);
                }
            }
        }

        commands
    }
}

impl Default for ActivityStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
