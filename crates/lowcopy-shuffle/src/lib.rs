#![warn(missing_docs)]

//! Shuffle read path: decorator chain unwrapping, low-copy resource classification, read stream selection
//!
//! Selection: Chain → Unwrap (lifecycle / codec / checksum) → Classify (file | direct buffer | none) → Reader
//! Readers:   file segment (low copy) | direct buffer (low copy) | heap copy

pub mod classify;
pub mod codec;
pub mod config;
pub mod error;
pub mod factory;
pub mod reader;
pub mod region;
pub mod registry;
pub mod stream;
pub mod unwrap;

pub use classify::{Classification, Classified, ResourceClassifier};
pub use codec::{CodecKind, CodecStream, DecoderFactory};
pub use config::{ReadStreamConfig, DEFAULT_BUFFER_SIZE, MAX_BUFFER_SIZE};
pub use error::{Result, ShuffleError};
pub use factory::{ReadOptions, ShuffleReadStreamFactory};
pub use reader::{ReadStreamKind, ShuffleReadStream};
pub use region::{BufferRegion, MemoryPlacement};
pub use registry::{Access, UnwrapRegistry, UnwrapRegistryBuilder};
pub use stream::{LayerKind, ReleaseGuard, ShuffleStream};
pub use unwrap::{ChainUnwrapper, Descent, FileResource, Peeled, Unwrapped};
