//! Pairs the running and file topics into activity status updates

use tracing::debug;

use crate::activity::status::ActivityStatus;
use crate::mqtt::topics::TopicKind;

/// Combines the two pub/sub signals.
///
/// A running signal is held until its file is known. A not-running signal
/// is reported immediately and forgets the file.
#[derive(Debug)]
pub struct PubSubAssembler {
    running_token: String,
    pending_running: bool,
    reported_running: bool,
    file: Option<String>,
}

impl PubSubAssembler {
    pub fn new(running_token: impl Into<String>) -> Self {
        Self {
            running_token: running_token.into(),
            pending_running: false,
            reported_running: false,
            file: None,
        }
    }

    fn is_running_token(&self, payload: &str) -> bool {
        payload.trim().eq_ignore_ascii_case(self.running_token.trim())
    }

    /// Feed one message; returns a status when one is ready
    pub fn on_message(&mut self, kind: TopicKind, payload: &str) -> Option<ActivityStatus> {
        match kind {
            TopicKind::Running if self.is_running_token(payload) => match &self.file {
                Some(file) => {
                    self.pending_running = false;
                    self.reported_running = true;
                    Some(ActivityStatus::running(file.clone()))
                }
                None => {
                    debug!("Running signal received, waiting for the file name");
                    self.pending_running = true;
                    None
                }
            },
            TopicKind::Running => {
                self.pending_running = false;
                self.reported_running = false;
                self.file = None;
                Some(ActivityStatus::stopped())
            }
            TopicKind::File => {
                let file = payload.trim();
                if file.is_empty() {
                    return None;
                }
                let changed = self.file.as_deref() != Some(file);
                self.file = Some(file.to_string());

                if self.pending_running || (self.reported_running && changed) {
                    self.pending_running = false;
                    self.reported_running = true;
                    Some(ActivityStatus::running(file))
                } else {
                    None
                }
            }
        }
    }
}
