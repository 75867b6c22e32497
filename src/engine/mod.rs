//! The transcoding engine seen as a capability: a private working storage
//! plus the ability to run one argument list against it.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::progress::ProgressSink;

pub mod ffmpeg;
#[cfg(test)]
pub mod memory;

pub use ffmpeg::{FfmpegEngine, FfmpegEngineFactory};

/// Errors reported by an engine instance
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EngineError {
    /// The engine could not be initialized
    #[error("engine failed to load: {0}")]
    Load(String),

    /// One invocation failed; `diagnostics` holds whatever the engine logged
    #[error("engine command failed: {message}")]
    Exec {
        message: String,
        diagnostics: String,
    },

    #[error("command exceeded the {0:?} watchdog")]
    TimedOut(Duration),

    #[error("command was cancelled")]
    Cancelled,

    #[error("no entry named '{0}' in engine storage")]
    MissingEntry(String),

    #[error("invalid entry name '{0}'")]
    InvalidEntry(String),

    #[error("engine storage I/O failed: {0}")]
    Storage(String),

    #[error("engine used before load() or after terminate()")]
    NotReady,
}

impl EngineError {
    pub fn exec(message: impl Into<String>, diagnostics: impl Into<String>) -> Self {
        Self::Exec {
            message: message.into(),
            diagnostics: diagnostics.into(),
        }
    }

    /// Diagnostic text attached to the error, if any
    pub fn diagnostics(&self) -> Option<&str> {
        match self {
            EngineError::Exec { diagnostics, .. } => Some(diagnostics),
            _ => None,
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Storage(err.to_string())
    }
}

/// Output of a successful invocation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecOutput {
    pub diagnostics: String,
}

/// One isolated engine instance. Instances share no state with each other.
#[async_trait]
pub trait Engine: Send {
    /// Prepare the instance; must succeed before any other call
    async fn load(&mut self) -> Result<(), EngineError>;

    async fn write_input(&mut self, name: &str, bytes: &[u8]) -> Result<(), EngineError>;

    /// Run one argument list, reporting completion to `progress`
    async fn exec(
        &mut self,
        args: &[String],
        progress: &ProgressSink,
    ) -> Result<ExecOutput, EngineError>;

    async fn read_output(&mut self, name: &str) -> Result<Vec<u8>, EngineError>;

    async fn delete_entry(&mut self, name: &str) -> Result<(), EngineError>;

    /// Release every resource held by the instance
    async fn terminate(&mut self) -> Result<(), EngineError>;
}

/// Builds fresh, unloaded engine instances for the worker pool
pub trait EngineFactory: Send + Sync {
    fn create(&self) -> Box<dyn Engine>;
}

/// Reject names that could escape the engine's working storage
pub(crate) fn check_entry_name(name: &str) -> Result<(), EngineError> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\'])
        || name.contains('\0')
    {
        return Err(EngineError::InvalidEntry(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_names() {
        assert!(check_entry_name("segment_0.mp4").is_ok());
        assert!(check_entry_name("a b.mkv").is_ok());
        assert!(check_entry_name("").is_err());
        assert!(check_entry_name("..").is_err());
        assert!(check_entry_name("../etc/passwd").is_err());
        assert!(check_entry_name("dir\\file").is_err());
    }

    #[test]
    fn test_exec_error_carries_diagnostics() {
        let err = EngineError::exec("exit status 1", "Duration: 00:00:10.00");
        assert_eq!(err.diagnostics(), Some("Duration: 00:00:10.00"));
        assert_eq!(EngineError::Cancelled.diagnostics(), None);
    }
}
