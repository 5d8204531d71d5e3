//! Error types for recoverable runtime failures.
//!
//! The runtime draws a hard line between two classes of failure:
//!
//! - **Recoverable errors** are returned as [`Result<T, Error>`]: bad
//!   configuration, lifecycle calls made in the wrong state that can be
//!   detected before any state exists, segment exhaustion through the `try_`
//!   allocation APIs, and transport enqueue failures.
//! - **Usage errors** (double fulfilment, out-of-order persona scopes, waiting
//!   from inside progress, ...) are not represented here at all. They go
//!   through [`crate::diagnostic::fatal`] and end the job.
//!
//! Nothing crosses the asynchronous boundary: a future never carries an
//! error, and a remotely executed callable that fails is a logic bug.

use core::fmt;
use std::sync::Arc;

use crate::Rank;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // === Configuration ===
    /// A configuration value could not be parsed or is out of range.
    InvalidConfig,
    /// The TOML config file could not be read or parsed.
    ConfigFile,

    // === Lifecycle ===
    /// The calling thread is already bound to a runtime.
    AlreadyInitialized,
    /// The runtime has been finalized.
    Finalized,
    /// The operation is not permitted in the configured execution mode.
    ExecutionMode,

    // === Memory ===
    /// The shared segment cannot satisfy an allocation.
    SegmentExhausted,
    /// An allocation request had an invalid size or alignment.
    InvalidAllocation,

    // === Transport ===
    /// A rank identifier is outside `0..rank_n`.
    RankOutOfRange,
    /// The transport rejected a packet or RMA request.
    Transport,
}

impl ErrorKind {
    /// Returns the error category for this kind.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidConfig | Self::ConfigFile => ErrorCategory::Config,
            Self::AlreadyInitialized | Self::Finalized | Self::ExecutionMode => {
                ErrorCategory::Lifecycle
            }
            Self::SegmentExhausted | Self::InvalidAllocation => ErrorCategory::Memory,
            Self::RankOutOfRange | Self::Transport => ErrorCategory::Transport,
        }
    }

    /// Returns the recoverability classification for this error kind.
    ///
    /// Segment exhaustion is the only condition that can clear by itself,
    /// once other ranks release memory.
    #[must_use]
    pub const fn recoverability(&self) -> Recoverability {
        match self {
            Self::SegmentExhausted => Recoverability::Transient,
            Self::InvalidConfig
            | Self::ConfigFile
            | Self::AlreadyInitialized
            | Self::Finalized
            | Self::ExecutionMode
            | Self::InvalidAllocation
            | Self::RankOutOfRange => Recoverability::Permanent,
            Self::Transport => Recoverability::Unknown,
        }
    }

    /// Returns true if this error is typically retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self.recoverability(), Recoverability::Transient)
    }

    const fn name(self) -> &'static str {
        match self {
            Self::InvalidConfig => "InvalidConfig",
            Self::ConfigFile => "ConfigFile",
            Self::AlreadyInitialized => "AlreadyInitialized",
            Self::Finalized => "Finalized",
            Self::ExecutionMode => "ExecutionMode",
            Self::SegmentExhausted => "SegmentExhausted",
            Self::InvalidAllocation => "InvalidAllocation",
            Self::RankOutOfRange => "RankOutOfRange",
            Self::Transport => "Transport",
        }
    }
}

/// Classification of error recoverability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Recoverability {
    /// Temporary failure that may succeed on retry.
    Transient,
    /// Permanent failure that will not succeed on retry.
    Permanent,
    /// Depends on context.
    Unknown,
}

/// High-level error category for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Configuration failures.
    Config,
    /// Init/finalize bracket violations.
    Lifecycle,
    /// Shared segment failures.
    Memory,
    /// Transport-layer failures.
    Transport,
}

/// Diagnostic context for an error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ErrorContext {
    /// The rank that observed the error, when bound to a runtime.
    pub rank: Option<Rank>,
    /// The peer rank involved, for transfers and packets.
    pub peer: Option<Rank>,
}

impl ErrorContext {
    /// Context naming the rank that observed the error.
    #[must_use]
    pub const fn on_rank(rank: Rank) -> Self {
        Self {
            rank: Some(rank),
            peer: None,
        }
    }
}

/// The main error type for pgasync operations.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
    context: ErrorContext,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            source: None,
            context: ErrorContext {
                rank: None,
                peer: None,
            },
        }
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Adds a message description to the error.
    #[must_use]
    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Adds structured context to the error.
    #[must_use]
    pub fn with_context(mut self, ctx: ErrorContext) -> Self {
        self.context = ctx;
        self
    }

    /// Adds a source error to the chain.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Shorthand for a configuration error with a message.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidConfig).with_message(msg)
    }

    /// Returns the error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    /// Returns the recoverability classification.
    #[must_use]
    pub const fn recoverability(&self) -> Recoverability {
        self.kind.recoverability()
    }

    /// Returns true if this error is typically retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// Returns the error message, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Returns the diagnostic context.
    #[must_use]
    pub const fn context(&self) -> &ErrorContext {
        &self.context
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind.name())?;
        if let Some(msg) = &self.message {
            write!(f, ": {msg}")?;
        }
        if let Some(rank) = self.context.rank {
            write!(f, " (rank {rank})")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl From<crate::memory::AllocError> for Error {
    fn from(err: crate::memory::AllocError) -> Self {
        let kind = match err {
            crate::memory::AllocError::Exhausted { .. } => ErrorKind::SegmentExhausted,
            crate::memory::AllocError::BadAlignment(_) | crate::memory::AllocError::UnknownAddress(_) => {
                ErrorKind::InvalidAllocation
            }
        };
        Self::new(kind).with_message(err.to_string())
    }
}

impl From<crate::transport::TransportError> for Error {
    fn from(err: crate::transport::TransportError) -> Self {
        let kind = match err {
            crate::transport::TransportError::RankOutOfRange { .. } => ErrorKind::RankOutOfRange,
            _ => ErrorKind::Transport,
        };
        Self::new(kind).with_message(err.to_string()).with_source(err)
    }
}

/// A specialized Result type for pgasync operations.
#[allow(clippy::result_large_err)]
pub type Result<T> = core::result::Result<T, Error>;

/// Extension trait for adding context to Results.
pub trait ResultExt<T> {
    /// Attach a context message on error.
    fn context(self, msg: impl Into<String>) -> Result<T>;
    /// Attach context message computed lazily on error.
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for core::result::Result<T, E> {
    fn context(self, msg: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().prefixed(msg.into()))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| e.into().prefixed(f()))
    }
}

impl Error {
    fn prefixed(mut self, msg: String) -> Self {
        self.message = Some(match self.message.take() {
            Some(inner) => format!("{msg}: {inner}"),
            None => msg,
        });
        self
    }
}
