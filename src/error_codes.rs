use std::fmt;

use anyhow::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodedErrorKind {
    /// Bad flag values, detected before any input is read.
    Config,
    /// Unreadable or malformed input, or an unsupported URL scheme.
    Input,
    /// HTTP failures: status, redirect, timeout, content type.
    Network,
    /// The output stream rejected a write.
    Write,
}

impl CodedErrorKind {
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Config => 2,
            Self::Input => 3,
            Self::Network => 4,
            Self::Write => 5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CodedError {
    pub code: &'static str,
    pub message: String,
    pub kind: CodedErrorKind,
}

impl CodedError {
    pub fn config(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(code, message, CodedErrorKind::Config)
    }

    pub fn input(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(code, message, CodedErrorKind::Input)
    }

    pub fn network(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(code, message, CodedErrorKind::Network)
    }

    pub fn write(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(code, message, CodedErrorKind::Write)
    }

    fn new(code: &'static str, message: impl Into<String>, kind: CodedErrorKind) -> Self {
        Self {
            code,
            message: message.into(),
            kind,
        }
    }
}

impl fmt::Display for CodedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for CodedError {}

pub fn find_coded_error(error: &Error) -> Option<&CodedError> {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<CodedError>())
}

/// Process exit status for a failed run.
pub fn exit_code_for(error: &Error) -> i32 {
    find_coded_error(error)
        .map(|coded| coded.kind.exit_code())
        .unwrap_or(1)
}
