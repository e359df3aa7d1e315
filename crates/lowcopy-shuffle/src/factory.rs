//! Read stream factory: picks the cheapest reader for a shuffle block.

use std::num::NonZeroUsize;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::classify::{Classification, ResourceClassifier};
use crate::reader::ShuffleReadStream;
use crate::registry::UnwrapRegistry;
use crate::stream::ShuffleStream;

/// Mode flags supplied by the shuffle read call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadOptions {
    /// Native shuffle: the block is known to carry no codec layer in the chain
    pub force_compress: bool,
    /// Sort shuffle with a codec the native engine decodes itself
    pub customized_codec: bool,
    /// Preferred transfer size of the returned reader
    pub buffer_size: NonZeroUsize,
}

impl ReadOptions {
    /// Options with both mode flags off.
    pub fn new(buffer_size: NonZeroUsize) -> Self {
        Self {
            force_compress: false,
            customized_codec: false,
            buffer_size,
        }
    }

    /// Set the forced-compression flag.
    pub fn force_compress(mut self, force_compress: bool) -> Self {
        self.force_compress = force_compress;
        self
    }

    /// Set the customized-codec flag.
    pub fn customized_codec(mut self, customized_codec: bool) -> Self {
        self.customized_codec = customized_codec;
        self
    }
}

/// Builds [`ShuffleReadStream`]s from shuffle block stream chains.
///
/// Cheap to clone and safe to share between worker threads; the only shared
/// state is the immutable unwrap registry.
#[derive(Debug, Clone)]
pub struct ShuffleReadStreamFactory {
    classifier: ResourceClassifier,
}

impl ShuffleReadStreamFactory {
    /// Factory using `registry`.
    pub fn new(registry: Arc<UnwrapRegistry>) -> Self {
        Self {
            classifier: ResourceClassifier::new(registry),
        }
    }

    /// The classifier in use.
    pub fn classifier(&self) -> &ResourceClassifier {
        &self.classifier
    }

    /// Positional form of [`create`](Self::create).
    pub fn create_with_flags(
        &self,
        outer: ShuffleStream,
        force_compress: bool,
        customized_codec: bool,
        buffer_size: NonZeroUsize,
    ) -> ShuffleReadStream {
        self.create(
            outer,
            ReadOptions {
                force_compress,
                customized_codec,
                buffer_size,
            },
        )
    }

    /// Build the reader for `outer`.
    ///
    /// Never fails: anything that cannot be read without copying gets a
    /// heap-copy reader. Low-copy readers always keep `outer` itself, so its
    /// release semantics are preserved.
    #[instrument(
        skip(self, outer, options),
        fields(
            force_compress = options.force_compress,
            customized_codec = options.customized_codec,
            buffer_size = options.buffer_size.get()
        )
    )]
    pub fn create(&self, outer: ShuffleStream, options: ReadOptions) -> ShuffleReadStream {
        let buffer_size = options.buffer_size;

        let reader = if options.force_compress {
            let classified = self.classifier.classify(&outer, false);
            match classified.classification {
                Classification::File(resource) => ShuffleReadStream::file_segment(
                    outer,
                    resource.file,
                    resource.remaining,
                    buffer_size,
                    options.force_compress,
                ),
                Classification::Buffer(region) => ShuffleReadStream::direct_buffer(
                    outer,
                    region,
                    buffer_size,
                    options.force_compress,
                ),
                Classification::NoLowCopy => {
                    ShuffleReadStream::heap_copy(outer, buffer_size, options.force_compress)
                }
            }
        } else if options.customized_codec {
            let classified = self.classifier.classify(&outer, true);
            match (classified.classification, classified.descent) {
                (_, None) => ShuffleReadStream::heap_copy(outer, buffer_size, false),
                (Classification::File(resource), Some(_)) => ShuffleReadStream::file_segment(
                    outer,
                    resource.file,
                    resource.remaining,
                    buffer_size,
                    options.customized_codec,
                ),
                (Classification::Buffer(region), Some(_)) => ShuffleReadStream::direct_buffer(
                    outer,
                    region,
                    buffer_size,
                    options.customized_codec,
                ),
                (Classification::NoLowCopy, Some(descent)) => {
                    // The peeled lifecycle, codec and checksum layers are dropped
                    // here; their release obligations move into the reader.
                    let peeled = descent.apply(outer);
                    ShuffleReadStream::heap_copy_with_releases(
                        peeled.stream,
                        peeled.releases,
                        buffer_size,
                        options.customized_codec,
                    )
                }
            }
        } else {
            ShuffleReadStream::heap_copy(outer, buffer_size, false)
        };

        debug!(
            reader = ?reader.kind(),
            compressed = reader.is_compressed(),
            "shuffle read stream created"
        );
        reader
    }
}
