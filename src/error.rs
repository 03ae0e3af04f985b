//! Error types for regstats
//!
//! Recoverable failures (building collectors, registering them with the
//! exporter) are returned as [`StatsError`]. Invariant violations in the
//! calling layer are not recoverable and go through [`fatal!`](crate::fatal).

use thiserror::Error;

/// Result type alias for regstats operations
pub type Result<T> = std::result::Result<T, StatsError>;

/// Main error type for regstats operations
#[derive(Error, Debug)]
pub enum StatsError {
    /// The exporter rejected a collector or metric descriptor
    #[error("Exporter error for block {block}: {source}")]
    Exporter {
        block: String,
        #[source]
        source: prometheus::Error,
    },

    /// Register size outside the supported set (1, 2, 4 or 8 bytes)
    #[error("Unsupported register size: {0} bytes")]
    UnsupportedSize(usize),

    /// Invalid metric or block specification
    #[error("Invalid specification: {0}")]
    InvalidSpec(String),
}

/// Log a diagnostic and abort the current operation.
///
/// Used for programming errors in the calling layer (foreign zone handles,
/// bad register sizes, zero-length arrays) and for poisoned locks. The
/// message must name the object involved.
#[macro_export]
macro_rules! fatal {
    ($($arg:tt)+) => {{
        let msg = format!($($arg)+);
        $crate::__log::error!("{}", msg);
        panic!("{}", msg)
    }};
}
