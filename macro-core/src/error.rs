//! Error types for the macro compiler

use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// Build-time failure in macro source or call-site text.
    /// Also raised by the `.error` directive when the macro runs.
    SyntaxError { message: String, line: usize, col: usize },

    /// Value-level failure: wrong accessor, index out of range, missing value,
    /// division by zero, unparsable text
    CalculationError { message: String },

    /// Builder/generator invariant violation
    InternalError { message: String },

    /// Malformed template resource
    TemplateError { message: String, line: usize },

    /// I/O error
    IoError { message: String },

    /// Configuration (macro.toml) error
    Config(String),
}

impl Error {
    pub fn syntax(message: impl Into<String>, line: usize, col: usize) -> Self {
        Error::SyntaxError { message: message.into(), line, col }
    }

    pub fn calculation(message: impl Into<String>) -> Self {
        Error::CalculationError { message: message.into() }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Error::InternalError { message: message.into() }
    }

    pub fn template(message: impl Into<String>, line: usize) -> Self {
        Error::TemplateError { message: message.into(), line }
    }

    /// Source position of the error, when it has one
    pub fn position(&self) -> Option<(usize, usize)> {
        match self {
            Error::SyntaxError { line, col, .. } => Some((*line, *col)),
            Error::TemplateError { line, .. } => Some((*line, 1)),
            _ => None,
        }
    }

    /// Re-anchor a syntax error produced for a single line onto a source line.
    /// Other error kinds pass through untouched.
    pub fn at_line(self, line: usize) -> Self {
        match self {
            Error::SyntaxError { message, col, .. } => Error::SyntaxError { message, line, col },
            other => other,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::SyntaxError { message, line, col } => {
                write!(f, "Syntax error at {}:{}: {}", line, col, message)
            }
            Error::CalculationError { message } => {
                write!(f, "Calculation error: {}", message)
            }
            Error::InternalError { message } => {
                write!(f, "Internal error: {}", message)
            }
            Error::TemplateError { message, line } => {
                write!(f, "Template error at line {}: {}", line, message)
            }
            Error::IoError { message } => {
                write!(f, "I/O error: {}", message)
            }
            Error::Config(message) => {
                write!(f, "Config error: {}", message)
            }
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IoError {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_position() {
        let err = Error::syntax("unknown name 'q'", 3, 7);
        assert_eq!(err.to_string(), "Syntax error at 3:7: unknown name 'q'");
        assert_eq!(err.position(), Some((3, 7)));
    }

    #[test]
    fn test_at_line_only_touches_syntax_errors() {
        let err = Error::syntax("bad", 1, 4).at_line(12);
        assert_eq!(err, Error::syntax("bad", 12, 4));

        let calc = Error::calculation("division by zero").at_line(12);
        assert_eq!(calc, Error::calculation("division by zero"));
        assert_eq!(calc.position(), None);
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing.mac");
        let err: Error = io.into();
        assert!(matches!(err, Error::IoError { ref message } if message.contains("missing.mac")));
    }
}
