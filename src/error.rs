use std::{fmt, io};

use regex::Error as RegexError;
use serde::{Deserialize, Serialize};
use serde_json::Error as JsonError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
pub enum InferenceError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Duplicate {role} strategy for signature {signature}")]
    DuplicateStrategy { role: String, signature: String },
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("File System error: {0}")]
    Io(String),
    #[error("Loop in belief network: {0}")]
    LoopDetected(String),
    #[error("No {role} strategy found for signature {signature}")]
    NoStrategyFound { role: String, signature: String },
    #[error("Item Not Found: {0}")]
    NotFound(String),
    #[error("Numerical error: {0}")]
    Numerical(String),
    #[error("Parse error at line {line}: {message}")]
    Parse { line: usize, message: String },
    #[error("(De)Serialization error: {0}")]
    Serialization(String),
    #[error("Stale reference: {0} has been decommissioned")]
    StaleReference(String),
    #[error("Transport error talking to {peer}: {reason}")]
    Transport { peer: String, reason: String },
    #[error("Unknown network: {0}")]
    UnknownNetwork(String),
    #[error("Unknown parent '{parent}' of variable '{variable}': {reason}")]
    UnknownParent {
        variable: String,
        parent: String,
        reason: String,
    },
}

impl InferenceError {
    pub fn transport(peer: impl Into<String>, reason: impl Into<String>) -> Self {
        InferenceError::Transport {
            peer: peer.into(),
            reason: reason.into(),
        }
    }

    /// The peer could not be reached; a reconnect may help.
    pub fn is_transport(&self) -> bool {
        matches!(self, InferenceError::Transport { .. })
    }

    /// The target exists no longer; reconnecting will not help.
    pub fn is_stale(&self) -> bool {
        matches!(self, InferenceError::StaleReference(_))
    }

    /// Either failure mode after which an edge to the peer is dropped.
    pub fn is_link_failure(&self) -> bool {
        self.is_transport() || self.is_stale()
    }
}

impl From<toml::de::Error> for InferenceError {
    fn from(src: toml::de::Error) -> InferenceError {
        InferenceError::Serialization(format!("Toml deserialization error: {src}"))
    }
}

impl From<toml::ser::Error> for InferenceError {
    fn from(src: toml::ser::Error) -> InferenceError {
        InferenceError::Serialization(format!("Toml serialization error: {src}"))
    }
}

impl From<JsonError> for InferenceError {
    fn from(src: JsonError) -> InferenceError {
        InferenceError::Serialization(format!("JSON (de)serialization error: {src}"))
    }
}

impl From<io::Error> for InferenceError {
    fn from(x: io::Error) -> Self {
        match x.kind() {
            io::ErrorKind::NotFound => InferenceError::NotFound(format!("{x}")),
            _ => InferenceError::Io(format!("IOError: {}: {x}", x.kind())),
        }
    }
}

impl From<fmt::Error> for InferenceError {
    fn from(x: fmt::Error) -> Self {
        InferenceError::Serialization(format!("{x}"))
    }
}

impl From<RegexError> for InferenceError {
    fn from(x: RegexError) -> Self {
        InferenceError::Serialization(format!("Regex parse failed: {x}"))
    }
}
