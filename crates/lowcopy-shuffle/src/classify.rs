//! Resource classifier: finds the terminal resource a stream can be read from
//! without copying.

use std::sync::Arc;

use tracing::debug;

use crate::region::BufferRegion;
use crate::registry::UnwrapRegistry;
use crate::stream::ShuffleStream;
use crate::unwrap::{ChainUnwrapper, Descent, FileResource};

/// Terminal resource found for a stream.
#[derive(Debug, Clone)]
pub enum Classification {
    /// File segment behind a length limiter
    File(FileResource),
    /// Unread part of a direct memory region
    Buffer(BufferRegion),
    /// Nothing that can be read without copying
    NoLowCopy,
}

impl Classification {
    /// True for the file and buffer variants.
    pub fn is_low_copy(&self) -> bool {
        !matches!(self, Classification::NoLowCopy)
    }

    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Classification::File(_) => "file",
            Classification::Buffer(_) => "buffer",
            Classification::NoLowCopy => "none",
        }
    }
}

/// Outcome of one classification attempt.
#[derive(Debug, Clone)]
pub struct Classified {
    /// Resource found
    pub classification: Classification,
    /// Layers peeled before inspecting the terminal; `None` when the codec
    /// path could not get past a compression layer
    pub descent: Option<Descent>,
}

/// Classifies shuffle streams by their reachable terminal resource.
#[derive(Debug, Clone)]
pub struct ResourceClassifier {
    unwrapper: ChainUnwrapper,
}

impl ResourceClassifier {
    /// Classifier using `registry`.
    pub fn new(registry: Arc<UnwrapRegistry>) -> Self {
        Self {
            unwrapper: ChainUnwrapper::new(registry),
        }
    }

    /// The unwrapper in use.
    pub fn unwrapper(&self) -> &ChainUnwrapper {
        &self.unwrapper
    }

    /// Classify `stream`.
    ///
    /// With `via_codec_path` the compression layer is looked through as well;
    /// otherwise only the lifecycle and checksum layers are peeled. A file
    /// segment always wins over a memory region.
    pub fn classify(&self, stream: &ShuffleStream, via_codec_path: bool) -> Classified {
        let unwrapped = if via_codec_path {
            match self.unwrapper.unwrap_lifecycle_and_codec_layers(stream) {
                Some(unwrapped) => unwrapped,
                None => {
                    debug!(layers = ?stream.layers(), "codec layer blocks low-copy read");
                    return Classified {
                        classification: Classification::NoLowCopy,
                        descent: None,
                    };
                }
            }
        } else {
            self.unwrapper.unwrap_lifecycle_and_integrity_layers(stream)
        };

        let classification = if let Some(file) = self.unwrapper.as_file_backed_resource(unwrapped.stream) {
            Classification::File(file)
        } else if let Some(region) = self.unwrapper.as_direct_buffer_resource(unwrapped.stream) {
            Classification::Buffer(region)
        } else {
            Classification::NoLowCopy
        };
        debug!(
            via_codec_path,
            resource = classification.name(),
            reached = %unwrapped.stream.kind(),
            "stream classified"
        );
        Classified {
            classification,
            descent: Some(unwrapped.descent),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{CodecKind, DecoderFactory};
    use std::fs::File;
    use std::io::{Read, Write};

    fn classifier() -> ResourceClassifier {
        ResourceClassifier::new(UnwrapRegistry::standard())
    }

    fn file_with(data: &[u8]) -> File {
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(data).unwrap();
        std::io::Seek::rewind(&mut file).unwrap();
        file
    }

    fn passthrough() -> DecoderFactory {
        Arc::new(|source: Box<dyn Read + Send>| -> std::io::Result<Box<dyn Read + Send>> {
            Ok(source)
        })
    }

    #[test]
    fn file_segment_through_lifecycle_layers() {
        let stream = ShuffleStream::file(file_with(&[7u8; 64]))
            .limited(4096)
            .checked()
            .with_release(|| {});
        let classified = classifier().classify(&stream, false);
        match classified.classification {
            Classification::File(resource) => assert_eq!(resource.remaining, 4096),
            other => panic!("expected file, got {:?}", other),
        }
    }

    #[test]
    fn direct_buffer_classified() {
        let stream = ShuffleStream::direct_buffer(BufferRegion::direct(b"abc".to_vec())).checked();
        let classified = classifier().classify(&stream, false);
        assert!(matches!(classified.classification, Classification::Buffer(_)));
    }

    #[test]
    fn heap_buffer_not_low_copy() {
        let stream = ShuffleStream::direct_buffer(BufferRegion::heap(b"abc".to_vec()));
        assert!(!classifier().classify(&stream, false).classification.is_low_copy());
    }

    #[test]
    fn bare_file_not_trusted() {
        let stream = ShuffleStream::file(file_with(b"abc")).checked();
        assert!(!classifier().classify(&stream, false).classification.is_low_copy());
    }

    #[test]
    fn forced_path_ignores_codec() {
        let stream = ShuffleStream::file(file_with(b"abc")).limited(3).lz4();
        let classified = classifier().classify(&stream, false);
        assert!(!classified.classification.is_low_copy());
        assert!(classified.descent.unwrap().is_empty());
    }

    #[test]
    fn codec_path_reaches_file() {
        let stream = ShuffleStream::file(file_with(b"abc"))
            .limited(3)
            .checked()
            .lz4()
            .with_release(|| {});
        let classified = classifier().classify(&stream, true);
        assert!(matches!(classified.classification, Classification::File(_)));
    }

    #[test]
    fn codec_path_snappy_fails_step_one() {
        let stream = ShuffleStream::file(file_with(b"abc"))
            .limited(3)
            .codec(CodecKind::Snappy, passthrough())
            .with_release(|| {});
        let classified = classifier().classify(&stream, true);
        assert!(!classified.classification.is_low_copy());
        assert!(classified.descent.is_none());
    }

    #[test]
    fn classification_leaves_chain_readable() {
        let stream = ShuffleStream::file(file_with(b"block bytes")).limited(11).checked();
        let _ = classifier().classify(&stream, false);
        let mut stream = stream;
        let mut out = String::new();
        stream.read_to_string(&mut out).unwrap();
        assert_eq!(out, "block bytes");
    }
}
