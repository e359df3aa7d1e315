//! Chain unwrapper: peels known decorator layers off a shuffle stream.
//!
//! All operations borrow the chain and never change it. Each one records the
//! layers it peeled as a [`Descent`], which the factory can later replay on the
//! owned chain once it has decided to forward an inner stream.

use std::fs::File;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::codec::CodecStream;
use crate::region::BufferRegion;
use crate::registry::{Access, UnwrapRegistry};
use crate::stream::{LayerKind, ReleaseGuard, ShuffleStream};

/// Ordered list of layer kinds peeled off a chain, outermost first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Descent {
    steps: Vec<LayerKind>,
}

impl Descent {
    /// Peeled layer kinds.
    pub fn steps(&self) -> &[LayerKind] {
        &self.steps
    }

    /// True if nothing was peeled.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    fn push(&mut self, kind: LayerKind) {
        self.steps.push(kind);
    }

    /// Replay the peel on an owned chain.
    ///
    /// Release obligations of peeled buffer-releasing layers are returned to the
    /// caller. The chain must be the one the descent was computed on; a shape
    /// mismatch stops the replay where it occurs.
    pub fn apply(&self, stream: ShuffleStream) -> Peeled {
        let mut stream = stream;
        let mut releases = Vec::new();
        for expected in &self.steps {
            if stream.kind() != *expected {
                warn!(expected = %expected, found = %stream.kind(), "descent no longer matches chain");
                break;
            }
            match stream.into_peeled() {
                Ok((inner, guard)) => {
                    releases.extend(guard);
                    stream = inner;
                }
                Err(unchanged) => {
                    warn!(layer = %expected, "layer became unreachable during descent replay");
                    stream = unchanged;
                    break;
                }
            }
        }
        Peeled { stream, releases }
    }
}

/// Owned result of replaying a [`Descent`].
#[derive(Debug)]
pub struct Peeled {
    /// Innermost stream reached
    pub stream: ShuffleStream,
    /// Release obligations taken over from peeled buffer-releasing layers
    pub releases: Vec<ReleaseGuard>,
}

/// A borrowed inner stream plus the layers peeled to reach it.
#[derive(Debug)]
pub struct Unwrapped<'a> {
    /// Stream reached
    pub stream: &'a ShuffleStream,
    /// Layers peeled on the way
    pub descent: Descent,
}

impl<'a> Unwrapped<'a> {
    fn unchanged(stream: &'a ShuffleStream) -> Self {
        Self {
            stream,
            descent: Descent::default(),
        }
    }
}

/// A file-backed terminal reached through a length limiter.
#[derive(Debug, Clone)]
pub struct FileResource {
    /// Shared file handle, positioned at the start of the unread segment
    pub file: Arc<File>,
    /// Bytes the length limiter still allows; forwarded as-is
    pub remaining: u64,
}

enum Step<'a> {
    Peeled(&'a ShuffleStream),
    NotPresent,
    Inaccessible,
}

/// Peels decorator layers according to an [`UnwrapRegistry`].
#[derive(Debug, Clone)]
pub struct ChainUnwrapper {
    registry: Arc<UnwrapRegistry>,
}

impl ChainUnwrapper {
    /// Unwrapper using `registry`.
    pub fn new(registry: Arc<UnwrapRegistry>) -> Self {
        Self { registry }
    }

    /// Registry in use.
    pub fn registry(&self) -> &Arc<UnwrapRegistry> {
        &self.registry
    }

    fn peel_release<'a>(&self, stream: &'a ShuffleStream) -> Step<'a> {
        match stream {
            ShuffleStream::BufferReleasing(b) if self.registry.unwraps(LayerKind::BufferReleasing) => {
                match b.delegate() {
                    Some(delegate) => Step::Peeled(delegate),
                    None => {
                        warn!("buffer-releasing layer has no delegate, stream already closed");
                        Step::Inaccessible
                    }
                }
            }
            _ => Step::NotPresent,
        }
    }

    fn peel_checked<'a>(&self, stream: &'a ShuffleStream) -> Step<'a> {
        match stream {
            ShuffleStream::Checked(c) if self.registry.unwraps(LayerKind::Checked) => {
                Step::Peeled(c.inner())
            }
            _ => Step::NotPresent,
        }
    }

    /// Peel at most one buffer-releasing layer, then at most one checksum layer.
    ///
    /// Used ahead of the forced low-copy path, where the chain carries no codec.
    /// If a layer is present but cannot be seen through, the original stream is
    /// returned.
    pub fn unwrap_lifecycle_and_integrity_layers<'a>(
        &self,
        stream: &'a ShuffleStream,
    ) -> Unwrapped<'a> {
        let mut descent = Descent::default();
        let mut current = stream;
        match self.peel_release(current) {
            Step::Peeled(inner) => {
                descent.push(LayerKind::BufferReleasing);
                current = inner;
            }
            Step::NotPresent => {}
            Step::Inaccessible => return Unwrapped::unchanged(stream),
        }
        match self.peel_checked(current) {
            Step::Peeled(inner) => {
                descent.push(LayerKind::Checked);
                current = inner;
            }
            Step::NotPresent => {}
            Step::Inaccessible => return Unwrapped::unchanged(stream),
        }
        Unwrapped {
            stream: current,
            descent,
        }
    }

    /// Peel at most one buffer-releasing layer, then a codec layer, then a
    /// checksum layer under the codec.
    ///
    /// `None` means the codec cannot be seen through and only a copying reader
    /// over the original stream is possible.
    pub fn unwrap_lifecycle_and_codec_layers<'a>(
        &self,
        stream: &'a ShuffleStream,
    ) -> Option<Unwrapped<'a>> {
        let mut descent = Descent::default();
        let mut current = stream;
        match self.peel_release(current) {
            Step::Peeled(inner) => {
                descent.push(LayerKind::BufferReleasing);
                current = inner;
            }
            Step::NotPresent => {}
            Step::Inaccessible => return None,
        }

        let decoded = self.unwrap_codec_layer(current)?;
        descent.steps.extend(decoded.descent.steps);
        current = decoded.stream;

        if let Step::Peeled(inner) = self.peel_checked(current) {
            descent.push(LayerKind::Checked);
            current = inner;
        }
        Some(Unwrapped {
            stream: current,
            descent,
        })
    }

    /// Look through one compression layer.
    ///
    /// A stream with no recognizable codec on top comes back unchanged; `None`
    /// is reserved for codecs that are present but cannot be seen through.
    pub fn unwrap_codec_layer<'a>(&self, stream: &'a ShuffleStream) -> Option<Unwrapped<'a>> {
        match stream {
            ShuffleStream::Buffered(b) if self.registry.unwraps(LayerKind::Buffered) => {
                let ShuffleStream::Codec(codec) = b.inner() else {
                    return Some(Unwrapped::unchanged(stream));
                };
                match self.registry.access(LayerKind::Codec(codec.kind())) {
                    Some(Access::BehindBuffer | Access::Unwrap) => {
                        let source = self.codec_source(codec)?;
                        Some(Unwrapped {
                            stream: source,
                            descent: Descent {
                                steps: vec![LayerKind::Buffered, LayerKind::Codec(codec.kind())],
                            },
                        })
                    }
                    _ => Some(Unwrapped::unchanged(stream)),
                }
            }
            ShuffleStream::Codec(codec) => match self.registry.access(LayerKind::Codec(codec.kind())) {
                Some(Access::Unsupported) => {
                    debug!(codec = %codec.kind(), "codec cannot be unwrapped, copying path required");
                    None
                }
                Some(Access::Unwrap) => {
                    let source = self.codec_source(codec)?;
                    Some(Unwrapped {
                        stream: source,
                        descent: Descent {
                            steps: vec![LayerKind::Codec(codec.kind())],
                        },
                    })
                }
                Some(Access::BehindBuffer) | None => Some(Unwrapped::unchanged(stream)),
            },
            _ => Some(Unwrapped::unchanged(stream)),
        }
    }

    fn codec_source<'a>(&self, codec: &'a CodecStream) -> Option<&'a ShuffleStream> {
        let source = codec.source();
        if source.is_none() {
            warn!(codec = %codec.kind(), "codec source unreachable, decoding already started");
        }
        source
    }

    /// File handle and remaining length, if `stream` is a length limiter directly over a file.
    pub fn as_file_backed_resource(&self, stream: &ShuffleStream) -> Option<FileResource> {
        if !self.registry.unwraps(LayerKind::LengthLimited) || !self.registry.unwraps(LayerKind::File) {
            return None;
        }
        let ShuffleStream::LengthLimited(limited) = stream else {
            return None;
        };
        match limited.inner() {
            ShuffleStream::File(file) => Some(FileResource {
                file: Arc::clone(file.handle()),
                remaining: limited.remaining(),
            }),
            other => {
                debug!(inner = %other.kind(), "length limiter does not wrap a file");
                None
            }
        }
    }

    /// Unread part of the memory region, if `stream` reads from direct memory.
    pub fn as_direct_buffer_resource(&self, stream: &ShuffleStream) -> Option<BufferRegion> {
        if !self.registry.unwraps(LayerKind::DirectBuffer) {
            return None;
        }
        match stream {
            ShuffleStream::DirectBuffer(buffer) if buffer.region().is_direct() => Some(buffer.unread()),
            ShuffleStream::DirectBuffer(_) => {
                debug!("memory region is on the heap, not eligible for low-copy read");
                None
            }
            _ => None,
        }
    }
}
