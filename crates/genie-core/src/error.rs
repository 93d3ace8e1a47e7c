use std::time::Duration;

use thiserror::Error;

/// Message shown to the user for any failed request
pub const FETCH_FAILED: &str = "Failed to fetch response. Please try again.";

/// Why a single request failed. Every variant is terminal for that request.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChatError {
    #[error("graph endpoint returned status {0}")]
    Status(u16),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("no data from graph endpoint for {0:?}")]
    Timeout(Duration),

    #[error("request cancelled")]
    Cancelled,

    #[error("request task ended abnormally: {0}")]
    Aborted(String),
}

impl ChatError {
    /// The text stored in `last_error` for this failure
    pub fn user_message(&self) -> &'static str {
        match self {
            ChatError::Cancelled => "Request cancelled.",
            _ => FETCH_FAILED,
        }
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        ChatError::Transport(err.to_string())
    }
}

/// Failures of a speech capability
#[derive(Debug, Error)]
pub enum VoiceError {
    #[error("{0} is not supported on this platform")]
    Unsupported(&'static str),

    #[error("failed to launch `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no command configured for {0}")]
    NotConfigured(&'static str),
}
