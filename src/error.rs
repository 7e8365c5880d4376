use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum BrewError {
    #[error("Homebrew not found at {0}")]
    NotFound(String),

    #[error("Homebrew is installed but not working: {0}")]
    NotWorking(String),

    #[error("Command timed out after {}s: brew {}", .duration.as_secs(), .args.join(" "))]
    Timeout { duration: Duration, args: Vec<String> },

    #[error("brew {} failed{}: {}", .args.join(" "), exit_suffix(.code), .output.trim())]
    Execution {
        args: Vec<String>,
        code: Option<i32>,
        output: String,
    },

    #[error("Failed to start brew {}: {message}", .args.join(" "))]
    Spawn { args: Vec<String>, message: String },

    #[error("No JSON payload found in command output")]
    NoPayload,

    #[error("Failed to parse JSON: {0}")]
    Json(#[source] Arc<serde_json::Error>),

    #[error("{name}: target already exists and can be replaced with --force")]
    RecoverableConflict { name: String },

    #[error("IO error: {0}")]
    Io(#[source] Arc<std::io::Error>),
}

impl BrewError {
    /// True for the two installation-validation failures.
    pub fn is_validation(&self) -> bool {
        matches!(self, BrewError::NotFound(_) | BrewError::NotWorking(_))
    }
}

impl From<serde_json::Error> for BrewError {
    fn from(err: serde_json::Error) -> Self {
        BrewError::Json(Arc::new(err))
    }
}

impl From<std::io::Error> for BrewError {
    fn from(err: std::io::Error) -> Self {
        BrewError::Io(Arc::new(err))
    }
}

fn exit_suffix(code: &Option<i32>) -> String {
    code.map(|c| format!(" (exit {c})")).unwrap_or_default()
}

pub type Result<T> = std::result::Result<T, BrewError>;
