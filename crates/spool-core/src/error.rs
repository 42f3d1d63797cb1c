use thiserror::Error;

use crate::ports::ExecutorError;

#[derive(Debug, Error)]
pub enum SpoolError {
    #[error("executor rejected task: {0}")]
    Executor(#[from] ExecutorError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cancelled")]
    Cancelled,

    #[error("parse error: {0}")]
    Parse(String),

    #[error("invalid config: {0}")]
    Config(String),
}

impl SpoolError {
    pub fn parse(message: impl Into<String>) -> Self {
        SpoolError::Parse(message.into())
    }
}

impl From<serde_json::Error> for SpoolError {
    fn from(e: serde_json::Error) -> Self {
        SpoolError::Parse(format!("json decode: {e}"))
    }
}
