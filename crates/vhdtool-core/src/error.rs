//! Error types for the vhdtool core library.

use std::path::PathBuf;

use crate::engine::errno;

/// The main error type for vhdtool operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error with optional path context.
    #[error("I/O error{}: {source}", path.as_ref().map(|p| format!(" at '{}'", p.display())).unwrap_or_default())]
    Io {
        source: std::io::Error,
        path: Option<PathBuf>,
    },

    /// Buffer alignment must be at least one byte.
    #[error("Invalid alignment: {alignment}")]
    InvalidAlignment { alignment: usize },

    /// A size or length is out of range.
    #[error("Invalid size: {message}")]
    InvalidSize { message: String },

    /// An offset is out of range.
    #[error("Invalid offset: {message}")]
    InvalidOffset { message: String },

    /// A combination of arguments that cannot be used together.
    #[error("Mutually exclusive arguments: {message}")]
    MutuallyExclusiveArguments { message: String },

    /// Unknown disk type name.
    #[error("Invalid disk type '{name}'. Valid disk types are: {valid}")]
    InvalidDiskType { name: String, valid: String },

    /// Unknown open flag name.
    #[error("Invalid open flag '{name}'. Valid open flags are: {valid}")]
    InvalidOpenFlag { name: String, valid: String },

    /// The engine reported a failure.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// The engine could not create the destination container.
    #[error("Failed to create '{}': {source}", path.display())]
    CreateFailure { path: PathBuf, source: Box<Error> },

    /// The engine could not open a container.
    #[error("Failed to open '{}': {source}", path.display())]
    OpenFailure { path: PathBuf, source: Box<Error> },

    /// A streaming conversion step failed partway through.
    #[error("Conversion failed at sector {sector}: {source}")]
    ConversionFailure { sector: u64, source: Box<Error> },

    /// The engine library or one of its symbols could not be loaded.
    #[error("libvhd unavailable: {message}")]
    LibraryUnavailable { message: String },

    /// A sub-field of an on-disk structure could not be decoded.
    #[error("Decode error: {message}")]
    Decode { message: String },
}

/// A specialized Result type for vhdtool operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create an I/O error with path context.
    pub fn io(source: std::io::Error, path: impl Into<PathBuf>) -> Self {
        Self::Io {
            source,
            path: Some(path.into()),
        }
    }

    /// Create an I/O error without path context.
    pub fn io_simple(source: std::io::Error) -> Self {
        Self::Io { source, path: None }
    }

    /// Create an invalid size error.
    pub fn invalid_size(message: impl Into<String>) -> Self {
        Self::InvalidSize {
            message: message.into(),
        }
    }

    /// Create an invalid offset error.
    pub fn invalid_offset(message: impl Into<String>) -> Self {
        Self::InvalidOffset {
            message: message.into(),
        }
    }

    /// Create a mutually exclusive arguments error.
    pub fn mutually_exclusive(message: impl Into<String>) -> Self {
        Self::MutuallyExclusiveArguments {
            message: message.into(),
        }
    }

    /// Create a library loading error.
    pub fn library_unavailable(message: impl Into<String>) -> Self {
        Self::LibraryUnavailable {
            message: message.into(),
        }
    }

    /// Create a decode error.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Wrap an error as a container creation failure.
    pub fn create_failure(path: impl Into<PathBuf>, source: Error) -> Self {
        Self::CreateFailure {
            path: path.into(),
            source: Box::new(source),
        }
    }

    /// Wrap an error as a container open failure.
    pub fn open_failure(path: impl Into<PathBuf>, source: Error) -> Self {
        Self::OpenFailure {
            path: path.into(),
            source: Box::new(source),
        }
    }

    /// Wrap an error as a streaming conversion failure at `sector`.
    pub fn conversion_failure(sector: u64, source: Error) -> Self {
        Self::ConversionFailure {
            sector,
            source: Box::new(source),
        }
    }

    /// True for errors raised while validating arguments, before any I/O.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::InvalidAlignment { .. }
                | Self::InvalidSize { .. }
                | Self::InvalidOffset { .. }
                | Self::MutuallyExclusiveArguments { .. }
                | Self::InvalidDiskType { .. }
                | Self::InvalidOpenFlag { .. }
        )
    }

    /// The platform error number behind this error, if any.
    pub fn errno(&self) -> Option<i32> {
        match self {
            Self::Engine(e) => e.errno,
            Self::Io { source, .. } => source.raw_os_error(),
            Self::CreateFailure { source, .. }
            | Self::OpenFailure { source, .. }
            | Self::ConversionFailure { source, .. } => source.errno(),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(source: std::io::Error) -> Self {
        Self::io_simple(source)
    }
}

/// A failure reported by the external engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{operation} failed with code {code}{}", errno_suffix(*errno))]
pub struct EngineError {
    /// Name of the engine call that failed.
    pub operation: &'static str,
    /// Raw return code of the call.
    pub code: i32,
    /// Platform error number, when the engine provided one.
    pub errno: Option<i32>,
}

impl EngineError {
    pub fn new(operation: &'static str, code: i32, errno: Option<i32>) -> Self {
        Self {
            operation,
            code,
            errno,
        }
    }
}

/// Renders ` (ENAME: message)` for a known errno.
fn errno_suffix(errno: Option<i32>) -> String {
    match errno {
        Some(errno) => match errno::lookup(errno) {
            Some(entry) => format!(" ({}: {})", entry.name, entry.message),
            None => format!(" (errno {})", errno),
        },
        None => String::new(),
    }
}
