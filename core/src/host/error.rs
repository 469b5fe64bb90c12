use std::path::PathBuf;

use thiserror::Error;

/// Failure to bring a plugin library into the process
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("core library not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("failed to open core library {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },
    #[error("core library {} is missing required symbol `{symbol}`", .path.display())]
    MissingSymbol {
        path: PathBuf,
        symbol: &'static str,
        #[source]
        source: libloading::Error,
    },
    #[error("core reports API version {found}, host speaks {expected}")]
    ApiVersion { found: u32, expected: u32 },
}

/// Misuse of a loaded host, or a plugin refusing a request
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    #[error("core is not initialized")]
    NotInitialized,
    #[error("core is already initialized")]
    AlreadyInitialized,
    #[error("another core is already active in this process")]
    AlreadyActive,
    #[error("path contains an interior NUL byte: {0}")]
    InvalidPath(String),
    #[error("no content is loaded")]
    NoContent,
    #[error("core refused to {0} state")]
    StateRefused(&'static str),
}
