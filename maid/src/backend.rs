pub mod command;


use crate::config::{BackendConfig, ConfigErrors};
use std::io::Write;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Failed to spawn {command}")]
    Spawn {
        command: String,
        #[source]
        error: std::io::Error,
    },
    #[error("{command} exited with status {status:?}")]
    Status { command: String, status: Option<i32> },
    #[error("{command} ran into its timeout")]
    Timeout { command: String },
    #[error("Failed to forward output")]
    Io(#[from] std::io::Error),
}

/// Access to the storage elements, everything the maid needs from the outside
pub trait Backend {
    /// names of all entries of a directory, in no particular order
    fn list(&self, path: &str) -> Result<Vec<String>, BackendError>;

    /// Replicate `path` to `destination`, progress lines are written to `progress`
    fn replicate(
        &self,
        path: &str,
        destination: &str,
        recursive: bool,
        progress: &mut dyn Write,
    ) -> Result<(), BackendError>;
}

#[derive(Clone, Debug)]
pub enum Backends {
    Command(command::CommandBackend),
}

impl Backends {
    pub fn load(config: &BackendConfig) -> Result<Self, ConfigErrors> {
        match config.name.to_lowercase().as_str() {
            "command" => Ok(Self::Command(command::CommandBackend::load(config)?)),
            _ => Err(ConfigErrors::UnsupportedBackend(config.name.clone())),
        }
    }
}

impl Backend for Backends {
    fn list(&self, path: &str) -> Result<Vec<String>, BackendError> {
        match self {
            Self::Command(backend) => backend.list(path),
        }
    }

    fn replicate(
        &self,
        path: &str,
        destination: &str,
        recursive: bool,
        progress: &mut dyn Write,
    ) -> Result<(), BackendError> {
        match self {
            Self::Command(backend) => backend.replicate(path, destination, recursive, progress),
        }
    }
}
