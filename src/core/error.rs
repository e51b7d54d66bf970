// (C) 2025 - Enzo Lombardi

//! Error types for euporie-core operations.
//!
//! This module provides the main error types used throughout the library,
//! with proper backtrace support and context preservation.

use std::backtrace::Backtrace;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

/// Error type for euporie-core operations.
///
/// Wraps error kinds with backtrace support for debugging.
///
/// # Examples
///
/// ```rust,no_run
/// use euporie_core::core::error::Result;
///
/// fn init_app() -> Result<()> {
///     // Operations that can fail
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct EuporieError {
    kind: ErrorKind,
    backtrace: Backtrace,
}

/// The specific kind of error that occurred.
#[derive(Debug)]
#[allow(dead_code)]
pub(crate) enum ErrorKind {
    /// I/O operation failed
    Io(std::io::Error),

    /// JSON (de)serialization failed - nbformat or a Jupyter wire message
    Json(serde_json::Error),

    /// Terminal initialization failed
    TerminalInit(String),

    /// Invalid input provided
    InvalidInput(String),

    /// Parse error
    Parse(String),

    /// File operation failed
    FileOperation {
        path: PathBuf,
        source: std::io::Error,
    },

    /// No kernel is attached to the session this operation needs one for
    KernelMissing,

    /// The kernel process could not be started
    KernelStartFailure(String),

    /// Rendering a cell output failed
    Rendering(String),

    /// The terminal did not answer a capability query before its deadline
    TerminalQueryTimeout,

    /// A Comm-protocol operation failed (unknown target, bad state sync, ...)
    Comm(String),

    /// Saving the notebook to disk failed
    FileSave(PathBuf, std::io::Error),

    /// A kernel wire message was malformed or failed signature verification
    WireProtocol(String),
}

impl EuporieError {
    pub(crate) fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            backtrace: Backtrace::capture(),
        }
    }

    /// Creates a terminal initialization error.
    pub(crate) fn terminal_init(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::TerminalInit(msg.into()))
    }

    /// Creates an invalid input error.
    #[allow(dead_code)]
    pub(crate) fn invalid_input(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput(msg.into()))
    }

    /// Creates a parse error.
    #[allow(dead_code)]
    pub(crate) fn parse(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Parse(msg.into()))
    }

    /// Creates a file operation error.
    #[allow(dead_code)]
    pub(crate) fn file_operation(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::new(ErrorKind::FileOperation {
            path: path.into(),
            source,
        })
    }

    /// Creates a "no kernel attached" error.
    pub(crate) fn kernel_missing() -> Self {
        Self::new(ErrorKind::KernelMissing)
    }

    /// Creates a kernel start-up failure error.
    pub(crate) fn kernel_start_failure(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::KernelStartFailure(msg.into()))
    }

    /// Creates a rendering failure error.
    pub(crate) fn rendering(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Rendering(msg.into()))
    }

    /// Creates a terminal-query timeout error.
    pub(crate) fn terminal_query_timeout() -> Self {
        Self::new(ErrorKind::TerminalQueryTimeout)
    }

    /// Creates a Comm-protocol error.
    pub(crate) fn comm(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Comm(msg.into()))
    }

    /// Creates a notebook-save failure error.
    pub(crate) fn file_save(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::new(ErrorKind::FileSave(path.into(), source))
    }

    /// Creates a wire-protocol error.
    pub(crate) fn wire_protocol(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::WireProtocol(msg.into()))
    }

    /// Returns `true` if this error is an I/O error.
    pub fn is_io(&self) -> bool {
        matches!(self.kind, ErrorKind::Io(_))
    }

    /// Returns `true` if this error is a terminal initialization error.
    pub fn is_terminal_init(&self) -> bool {
        matches!(self.kind, ErrorKind::TerminalInit(_))
    }

    /// Returns `true` if this error is an invalid input error.
    pub fn is_invalid_input(&self) -> bool {
        matches!(self.kind, ErrorKind::InvalidInput(_))
    }

    /// Returns `true` if this error is a parse error.
    pub fn is_parse(&self) -> bool {
        matches!(self.kind, ErrorKind::Parse(_))
    }

    /// Returns `true` if this error is a file operation error.
    pub fn is_file_operation(&self) -> bool {
        matches!(self.kind, ErrorKind::FileOperation { .. })
    }

    /// Returns `true` if this error means no kernel is attached.
    pub fn is_kernel_missing(&self) -> bool {
        matches!(self.kind, ErrorKind::KernelMissing)
    }

    /// Returns `true` if a terminal capability query timed out.
    pub fn is_terminal_query_timeout(&self) -> bool {
        matches!(self.kind, ErrorKind::TerminalQueryTimeout)
    }

    /// Returns the file path if this is a file operation or file-save error.
    pub fn file_path(&self) -> Option<&std::path::Path> {
        match &self.kind {
            ErrorKind::FileOperation { path, .. } | ErrorKind::FileSave(path, _) => Some(path),
            _ => None,
        }
    }
}

impl Display for EuporieError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            ErrorKind::Io(e) => write!(f, "I/O error: {}", e)?,
            ErrorKind::Json(e) => write!(f, "JSON error: {}", e)?,
            ErrorKind::TerminalInit(msg) => write!(f, "Terminal initialization failed: {}", msg)?,
            ErrorKind::InvalidInput(msg) => write!(f, "Invalid input: {}", msg)?,
            ErrorKind::Parse(msg) => write!(f, "Parse error: {}", msg)?,
            ErrorKind::FileOperation { path, source } => write!(
                f,
                "File operation failed for '{}': {}",
                path.display(),
                source
            )?,
            ErrorKind::KernelMissing => write!(f, "no kernel is attached to this notebook")?,
            ErrorKind::KernelStartFailure(msg) => write!(f, "kernel failed to start: {}", msg)?,
            ErrorKind::Rendering(msg) => write!(f, "failed to render output: {}", msg)?,
            ErrorKind::TerminalQueryTimeout => {
                write!(f, "terminal did not answer a capability query in time")?
            }
            ErrorKind::Comm(msg) => write!(f, "comm protocol error: {}", msg)?,
            ErrorKind::FileSave(path, source) => {
                write!(f, "failed to save notebook to '{}': {}", path.display(), source)?
            }
            ErrorKind::WireProtocol(msg) => write!(f, "kernel wire protocol error: {}", msg)?,
        }

        // Include backtrace if captured
        if self.backtrace.status() == std::backtrace::BacktraceStatus::Captured {
            write!(f, "\n\nBacktrace:\n{}", self.backtrace)?;
        }

        Ok(())
    }
}

impl std::error::Error for EuporieError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            ErrorKind::Io(e) => Some(e),
            ErrorKind::Json(e) => Some(e),
            ErrorKind::FileOperation { source, .. } => Some(source),
            ErrorKind::FileSave(_, source) => Some(source),
            _ => None,
        }
    }
}

impl From<std::io::Error> for EuporieError {
    fn from(e: std::io::Error) -> Self {
        Self::new(ErrorKind::Io(e))
    }
}

impl From<serde_json::Error> for EuporieError {
    fn from(e: serde_json::Error) -> Self {
        Self::new(ErrorKind::Json(e))
    }
}

/// Result type for euporie-core operations.
///
/// This is a type alias for `Result<T, EuporieError>`.
pub type Result<T> = std::result::Result<T, EuporieError>;
