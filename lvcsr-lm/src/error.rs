//! Error types for language model loading

use thiserror::Error;

pub type Result<T> = std::result::Result<T, LmError>;

#[derive(Error, Debug)]
pub enum LmError {
    #[error("Parse error at line {line}: {msg}")]
    Parse { line: usize, msg: String },

    #[error("Invalid model: {0}")]
    InvalidModel(String),

    #[error("Word not in language model: {0}")]
    UnknownWord(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LmError {
    pub fn parse<S: Into<String>>(line: usize, msg: S) -> Self {
        Self::Parse {
            line,
            msg: msg.into(),
        }
    }

    pub fn invalid_model<S: Into<String>>(msg: S) -> Self {
        Self::InvalidModel(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = LmError::parse(12, "bad count");
        assert_eq!(err.to_string(), "Parse error at line 12: bad count");
        let err = LmError::UnknownWord("foo".to_string());
        assert_eq!(err.to_string(), "Word not in language model: foo");
    }
}
