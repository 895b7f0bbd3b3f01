// src/error.rs

//! Crate-wide error type
//!
//! Every error classifies into one of five kinds:
//!
//! | Kind | Meaning |
//! |------|---------|
//! | Skip | a precondition makes the operation inapplicable |
//! | Warn | a soft anomaly that does not fail the run |
//! | Fail | a domain or policy violation |
//! | Timeout | a waiter exceeded its bound or was cancelled |
//! | Internal | a contract violation (empty helper output, bad JSON) |
//!
//! Joined errors keep every member so a cleanup failure never hides the
//! failure that triggered the cleanup.

use std::fmt;
use thiserror::Error;

/// Result type alias using the crate error
pub type Result<T> = std::result::Result<T, Error>;

/// Classification of an error, used by the CLI for exit codes and icons
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Skip,
    Warn,
    Fail,
    Timeout,
    Internal,
}

impl ErrorKind {
    /// Short lowercase name, also used as the message prefix of the
    /// check-style variants
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Skip => "skip",
            Self::Warn => "warn",
            Self::Fail => "fail",
            Self::Timeout => "timeout",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced by the solver, the cloud pipelines and the runner
#[derive(Debug, Error)]
pub enum Error {
    /// Operation does not apply
    #[error("skip: {0}")]
    Skip(String),

    /// Soft anomaly
    #[error("warn: {0}")]
    Warn(String),

    /// Domain failure
    #[error("fail: {0}")]
    Fail(String),

    /// Waiter ran out of time
    #[error("timeout: {0}")]
    TimeoutError(String),

    /// Ambient cancellation fired while waiting
    #[error("operation cancelled: {0}")]
    Cancelled(String),

    /// Contract violation
    #[error("internal error: {0}")]
    InternalError(String),

    /// Error reported by the depsolve helper (or synthesized for it)
    #[error("DNF error occurred: {kind}: {reason}")]
    DepsolveError { kind: String, reason: String },

    /// Depsolve chain rejected before the helper was called
    #[error("invalid package set chain: {0}")]
    ChainError(String),

    /// Repository configuration problem
    #[error("invalid repository configuration: {0}")]
    RepoConfigError(String),

    /// Lookup miss
    #[error("{0}")]
    NotFound(String),

    /// Unsupported or malformed architecture
    #[error("{0}")]
    InvalidArch(String),

    /// Unsupported boot mode
    #[error("invalid boot mode: {0}")]
    InvalidBootMode(String),

    /// Cloud provider call failed
    #[error("{0}")]
    CloudError(String),

    /// Parse error for helper output or provider responses
    #[error("parse error: {0}")]
    ParseError(String),

    /// External command exited unsuccessfully
    #[error("command '{command}' failed ({status}): {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    /// External command could not be located
    #[error("tool not found: {0}")]
    ToolNotFound(String),

    /// Configuration file or flag problem
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Error with added context
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<Error>,
    },

    /// Several errors surfaced together
    #[error("{0}")]
    Joined(JoinedErrors),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Skip(_) => ErrorKind::Skip,
            Self::Warn(_) => ErrorKind::Warn,
            Self::TimeoutError(_) | Self::Cancelled(_) => ErrorKind::Timeout,
            Self::InternalError(_) | Self::ParseError(_) | Self::Io(_) | Self::Json(_) => {
                ErrorKind::Internal
            }
            Self::DepsolveError { kind, .. } if kind == "InternalError" => ErrorKind::Internal,
            Self::Context { source, .. } => source.kind(),
            Self::Joined(joined) => joined.kind(),
            _ => ErrorKind::Fail,
        }
    }

    pub fn is_skip(&self) -> bool {
        self.kind() == ErrorKind::Skip
    }

    pub fn is_warn(&self) -> bool {
        self.kind() == ErrorKind::Warn
    }

    pub fn is_fail(&self) -> bool {
        self.kind() == ErrorKind::Fail
    }

    pub fn is_timeout(&self) -> bool {
        self.kind() == ErrorKind::Timeout
    }

    pub fn is_internal(&self) -> bool {
        self.kind() == ErrorKind::Internal
    }

    /// Build a skip error from any displayable reason
    pub fn skip(reason: impl fmt::Display) -> Self {
        Self::Skip(reason.to_string())
    }

    /// Build a warning from any displayable reason
    pub fn warn(reason: impl fmt::Display) -> Self {
        Self::Warn(reason.to_string())
    }

    /// Build a failure from any displayable reason
    pub fn fail(reason: impl fmt::Display) -> Self {
        Self::Fail(reason.to_string())
    }

    /// Wrap this error with a context message
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Join a primary error with a secondary one (typically a cleanup failure)
    pub fn join(primary: Error, secondary: Error) -> Self {
        let mut joined = match primary {
            Self::Joined(joined) => joined,
            other => JoinedErrors(vec![other]),
        };
        joined.push(secondary);
        Self::Joined(joined)
    }

    /// Collapse a list of errors: none yields `Ok`, one is returned as-is,
    /// more become a joined error
    pub fn from_list(mut errors: Vec<Error>) -> Result<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(Self::Joined(JoinedErrors(errors))),
        }
    }
}

/// Ordered list of errors displayed one per line
#[derive(Debug, Default)]
pub struct JoinedErrors(pub Vec<Error>);

impl JoinedErrors {
    pub fn push(&mut self, err: Error) {
        match err {
            Error::Joined(inner) => self.0.extend(inner.0),
            other => self.0.push(other),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Error> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The kind of the first member decides the kind of the whole
    pub fn kind(&self) -> ErrorKind {
        self.0
            .first()
            .map(Error::kind)
            .unwrap_or(ErrorKind::Internal)
    }
}

impl fmt::Display for JoinedErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", err)?;
        }
        Ok(())
    }
}

/// Extension trait adding context to results
pub trait ResultExt<T> {
    fn context(self, context: impl Into<String>) -> Result<T>;

    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().context(context))
    }

    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| e.into().context(f()))
    }
}
