//! Storage layout configuration

use std::path::PathBuf;

use crate::errors::AgentError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// Storage layout for the agent
#[derive(Debug, Clone)]
pub struct StorageLayout {
    /// Directory holding settings, state and logs
    pub base_dir: PathBuf,

    /// Directory holding one subdirectory per capture session
    pub timelapse_dir: PathBuf,
}

impl StorageLayout {
    pub fn new(base_dir: impl Into<PathBuf>, timelapse_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            timelapse_dir: timelapse_dir.into(),
        }
    }

    pub fn settings_file(&self) -> File {
        File::new(self.base_dir.join("settings.json"))
    }

    /// Persisted controller state
    pub fn state_file(&self) -> File {
        File::new(self.base_dir.join("state.json"))
    }

    pub fn logs_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("logs"))
    }

    pub fn timelapse_dir(&self) -> Dir {
        Dir::new(&self.timelapse_dir)
    }

    /// Directory of one session; the id must already be validated
    pub fn session_dir(&self, session_id: &str) -> Dir {
        self.timelapse_dir().subdir(session_id)
    }

    /// Create the directories
    pub async fn setup(&self) -> Result<(), AgentError> {
        Dir::new(&self.base_dir).create().await?;
        self.timelapse_dir().create().await?;
        Ok(())
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        let base_dir = std::env::var_os("HOME")
            .or_else(|| std::env::var_os("USERPROFILE"))
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".timelapser");

        Self::new(base_dir, "./timelapses")
    }
}
