//! Error types for the macro runtime

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Build, bind, compile or value failure reported by the compiler core.
    /// A `.error` directive reached at run time also lands here.
    #[error("{0}")]
    Macro(#[from] macro_core::Error),

    #[error("execution error at instruction {pc}: {message}")]
    ExecutionError { pc: usize, message: String },

    #[error("No macro loaded")]
    NotLoaded,

    #[error("step limit of {0} instructions exceeded")]
    StepLimit(u64),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Invalid instruction text: {0}")]
    InvalidFormat(String),
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;

impl RuntimeError {
    /// The macro-level error, when this is one
    pub fn as_macro(&self) -> Option<&macro_core::Error> {
        match self {
            RuntimeError::Macro(e) => Some(e),
            _ => None,
        }
    }
}
