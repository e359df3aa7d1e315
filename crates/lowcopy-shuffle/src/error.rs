//! Error types for the lowcopy-shuffle subsystem

use crate::stream::LayerKind;

/// Errors raised while initializing the read path or reading a shuffle block.
///
/// Classification itself never fails: anything it cannot understand degrades
/// to the heap-copy reader. These errors come from registry construction,
/// configuration parsing and the readers' I/O.
#[derive(Debug, thiserror::Error)]
pub enum ShuffleError {
    /// A structural layer kind has no accessor in the unwrap registry
    #[error("unwrap registry has no accessor for layer kind {kind}")]
    MissingAccessor {
        /// Layer kind that was not registered
        kind: LayerKind,
    },
    /// A structural layer kind was registered but marked as not unwrappable
    #[error("layer kind {kind} must be unwrappable, registered as unsupported")]
    UnsupportedStructuralLayer {
        /// Offending layer kind
        kind: LayerKind,
    },
    /// Configuration could not be parsed or failed validation
    #[error("invalid read stream config: {0}")]
    InvalidConfig(String),
    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for lowcopy-shuffle operations.
pub type Result<T> = std::result::Result<T, ShuffleError>;
