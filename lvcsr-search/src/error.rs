//! Error types for search operations
//!
//! Only conditions that make the result untrustworthy are errors here.
//! Recoverable search outcomes (empty beam, no sentence found, expansion
//! budget exhausted, cancellation) are reported through status values.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SearchError>;

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Invalid model: {0}")]
    InvalidModel(String),

    #[error("Missing triphone: no model for {0} and no fallback phone")]
    MissingTriphone(String),

    #[error("Unknown phone: {0}")]
    UnknownPhone(String),

    #[error("Unknown word: {0}")]
    UnknownWord(String),

    #[error("Input too short: {frames} frames given, at least {minimum} required")]
    InputTooShort { frames: usize, minimum: usize },

    #[error("Acoustic input mismatch: {0}")]
    InputMismatch(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SearchError {
    pub fn invalid_model<S: Into<String>>(msg: S) -> Self {
        Self::InvalidModel(msg.into())
    }

    pub fn missing_triphone<S: Into<String>>(name: S) -> Self {
        Self::MissingTriphone(name.into())
    }

    pub fn input_mismatch<S: Into<String>>(msg: S) -> Self {
        Self::InputMismatch(msg.into())
    }

    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::ConfigError(msg.into())
    }
}
