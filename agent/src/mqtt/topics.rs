//! MQTT topic definitions

/// Which activity signal a topic carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicKind {
    Running,
    File,
}

/// The pair of topics an activity source publishes on
#[derive(Debug, Clone)]
pub struct ActivityTopics {
    pub running: String,
    pub file: String,
}

impl ActivityTopics {
    pub fn new(running: impl Into<String>, file: impl Into<String>) -> Self {
        Self {
            running: running.into(),
            file: file.into(),
        }
    }

    /// Topics to subscribe to
    pub fn all(&self) -> [&str; 2] {
        [&self.running, &self.file]
    }

    /// Classify an incoming topic
    pub fn classify(&self, topic: &str) -> Option<TopicKind> {
        if topic == self.running {
            Some(TopicKind::Running)
        } else if topic == self.file {
            Some(TopicKind::File)
        } else {
            None
        }
    }
}
