//! Shuffle block stream chains.
//!
//! The transfer layer hands out a block as a chain of decorator nodes, outermost
//! first. Every node is a working reader, so a chain can always be consumed as a
//! plain `Read`. The closed [`ShuffleStream`] enum lets the unwrapper look
//! inside a chain with an ordinary `match` instead of poking at private fields.

use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::sync::Arc;

use crate::codec::{CodecKind, CodecStream, DecoderFactory};
use crate::region::BufferRegion;

/// Tag identifying the kind of a decorator node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayerKind {
    /// Releases a network buffer when the stream is closed
    BufferReleasing,
    /// Running CRC32 over the bytes read
    Checked,
    /// Read-ahead buffer
    Buffered,
    /// Compression decoder
    Codec(CodecKind),
    /// Caps the bytes readable from the inner stream
    LengthLimited,
    /// Terminal memory region
    DirectBuffer,
    /// Terminal file handle
    File,
    /// Reader of a kind this crate does not know
    Opaque,
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayerKind::BufferReleasing => write!(f, "BufferReleasing"),
            LayerKind::Checked => write!(f, "Checked"),
            LayerKind::Buffered => write!(f, "Buffered"),
            LayerKind::Codec(kind) => write!(f, "Codec({})", kind),
            LayerKind::LengthLimited => write!(f, "LengthLimited"),
            LayerKind::DirectBuffer => write!(f, "DirectBuffer"),
            LayerKind::File => write!(f, "File"),
            LayerKind::Opaque => write!(f, "Opaque"),
        }
    }
}

/// Release obligation of a network buffer.
///
/// The callback runs exactly once: on [`ReleaseGuard::release`] or when the
/// guard is dropped, whichever comes first.
pub struct ReleaseGuard {
    callback: Option<Box<dyn FnOnce() + Send>>,
}

impl ReleaseGuard {
    /// Wrap a release callback.
    pub fn new(callback: impl FnOnce() + Send + 'static) -> Self {
        Self {
            callback: Some(Box::new(callback)),
        }
    }

    /// Run the callback now. Later calls and the eventual drop are no-ops.
    pub fn release(&mut self) {
        if let Some(callback) = self.callback.take() {
            callback();
        }
    }

    /// True once the callback has run.
    pub fn is_released(&self) -> bool {
        self.callback.is_none()
    }
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for ReleaseGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReleaseGuard")
            .field("released", &self.is_released())
            .finish()
    }
}

/// Holds a delegate stream and releases the backing buffer on close.
pub struct BufferReleasingStream {
    // Declared before `guard` so the delegate is dropped before the buffer is released.
    delegate: Option<Box<ShuffleStream>>,
    guard: ReleaseGuard,
}

impl BufferReleasingStream {
    /// Wrap `delegate`, running `release` when the stream is closed or dropped.
    pub fn new(delegate: ShuffleStream, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            delegate: Some(Box::new(delegate)),
            guard: ReleaseGuard::new(release),
        }
    }

    /// The delegate, or `None` once the stream has been closed.
    pub fn delegate(&self) -> Option<&ShuffleStream> {
        self.delegate.as_deref()
    }

    /// Drop the delegate and release the buffer.
    pub fn close(&mut self) {
        self.delegate = None;
        self.guard.release();
    }

    fn into_parts(self) -> (Option<ShuffleStream>, ReleaseGuard) {
        (self.delegate.map(|d| *d), self.guard)
    }
}

impl Read for BufferReleasingStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.delegate.as_mut() {
            Some(delegate) => delegate.read(buf),
            None => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "shuffle buffer already released",
            )),
        }
    }
}

/// Computes a CRC32 over every byte read through it.
pub struct CheckedStream {
    inner: Box<ShuffleStream>,
    hasher: crc32fast::Hasher,
}

impl CheckedStream {
    /// Wrap `inner` with a fresh checksum.
    pub fn new(inner: ShuffleStream) -> Self {
        Self {
            inner: Box::new(inner),
            hasher: crc32fast::Hasher::new(),
        }
    }

    /// The wrapped stream.
    pub fn inner(&self) -> &ShuffleStream {
        &self.inner
    }

    /// CRC32 of the bytes read so far.
    pub fn checksum(&self) -> u32 {
        self.hasher.clone().finalize()
    }

    fn into_inner(self) -> ShuffleStream {
        *self.inner
    }
}

impl Read for CheckedStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }
}

/// Read-ahead buffer over an inner stream.
pub struct BufferedStream {
    reader: BufReader<Box<ShuffleStream>>,
}

impl BufferedStream {
    /// Wrap `inner` with a buffer of `capacity` bytes.
    pub fn with_capacity(capacity: usize, inner: ShuffleStream) -> Self {
        Self {
            reader: BufReader::with_capacity(capacity, Box::new(inner)),
        }
    }

    /// The wrapped stream.
    pub fn inner(&self) -> &ShuffleStream {
        self.reader.get_ref()
    }

    fn into_inner(self) -> ShuffleStream {
        *self.reader.into_inner()
    }
}

impl Read for BufferedStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}

/// Limits the bytes readable from the inner stream.
pub struct LengthLimitedStream {
    inner: Box<ShuffleStream>,
    left: u64,
}

impl LengthLimitedStream {
    /// Allow at most `limit` bytes to be read from `inner`.
    pub fn new(inner: ShuffleStream, limit: u64) -> Self {
        Self {
            inner: Box::new(inner),
            left: limit,
        }
    }

    /// The wrapped stream.
    pub fn inner(&self) -> &ShuffleStream {
        &self.inner
    }

    /// Bytes that may still be read.
    pub fn remaining(&self) -> u64 {
        self.left
    }

    fn into_inner(self) -> ShuffleStream {
        *self.inner
    }
}

impl Read for LengthLimitedStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.left == 0 {
            return Ok(0);
        }
        let max = buf.len().min(usize::try_from(self.left).unwrap_or(usize::MAX));
        let n = self.inner.read(&mut buf[..max])?;
        self.left -= n as u64;
        Ok(n)
    }
}

/// Reads from a memory region. Terminal.
pub struct DirectBufferStream {
    region: BufferRegion,
    pos: usize,
}

impl DirectBufferStream {
    /// Read `region` from its start.
    pub fn new(region: BufferRegion) -> Self {
        Self { region, pos: 0 }
    }

    /// The whole region, including bytes already read.
    pub fn region(&self) -> &BufferRegion {
        &self.region
    }

    /// The bytes not yet read.
    pub fn unread(&self) -> BufferRegion {
        self.region.tail(self.pos)
    }
}

impl Read for DirectBufferStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let data = &self.region.bytes()[self.pos..];
        let n = data.len().min(buf.len());
        buf[..n].copy_from_slice(&data[..n]);
        self.pos += n;
        Ok(n)
    }
}

/// Reads from an open file at its current position. Terminal.
pub struct FileStream {
    file: Arc<File>,
}

impl FileStream {
    /// Read from `file`.
    pub fn new(file: File) -> Self {
        Self {
            file: Arc::new(file),
        }
    }

    /// Shared handle to the file.
    pub fn handle(&self) -> &Arc<File> {
        &self.file
    }
}

impl Read for FileStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (&*self.file).read(buf)
    }
}

/// A node in a shuffle block stream chain.
pub enum ShuffleStream {
    /// See [`BufferReleasingStream`]
    BufferReleasing(BufferReleasingStream),
    /// See [`CheckedStream`]
    Checked(CheckedStream),
    /// See [`BufferedStream`]
    Buffered(BufferedStream),
    /// See [`CodecStream`]
    Codec(CodecStream),
    /// See [`LengthLimitedStream`]
    LengthLimited(LengthLimitedStream),
    /// See [`DirectBufferStream`]
    DirectBuffer(DirectBufferStream),
    /// See [`FileStream`]
    File(FileStream),
    /// Any other reader; never unwrapped
    Opaque(Box<dyn Read + Send>),
}

impl ShuffleStream {
    /// Terminal node reading from `file`.
    pub fn file(file: File) -> Self {
        ShuffleStream::File(FileStream::new(file))
    }

    /// Terminal node reading from `region`.
    pub fn direct_buffer(region: BufferRegion) -> Self {
        ShuffleStream::DirectBuffer(DirectBufferStream::new(region))
    }

    /// Terminal node for a reader of unknown kind.
    pub fn opaque(reader: impl Read + Send + 'static) -> Self {
        ShuffleStream::Opaque(Box::new(reader))
    }

    /// Wrap in a length limiter.
    pub fn limited(self, limit: u64) -> Self {
        ShuffleStream::LengthLimited(LengthLimitedStream::new(self, limit))
    }

    /// Wrap in a checksum layer.
    pub fn checked(self) -> Self {
        ShuffleStream::Checked(CheckedStream::new(self))
    }

    /// Wrap in a read-ahead buffer.
    pub fn buffered(self, capacity: usize) -> Self {
        ShuffleStream::Buffered(BufferedStream::with_capacity(capacity, self))
    }

    /// Wrap in a buffer-releasing layer.
    pub fn with_release(self, release: impl FnOnce() + Send + 'static) -> Self {
        ShuffleStream::BufferReleasing(BufferReleasingStream::new(self, release))
    }

    /// Wrap in a Zstd decoder.
    pub fn zstd(self) -> Self {
        ShuffleStream::Codec(CodecStream::zstd(self))
    }

    /// Wrap in an LZ4 frame decoder.
    pub fn lz4(self) -> Self {
        ShuffleStream::Codec(CodecStream::lz4(self))
    }

    /// Wrap in a decoder built by `factory` on first read.
    pub fn codec(self, kind: CodecKind, factory: DecoderFactory) -> Self {
        ShuffleStream::Codec(CodecStream::with_decoder(kind, self, factory))
    }

    /// Kind of this node.
    pub fn kind(&self) -> LayerKind {
        match self {
            ShuffleStream::BufferReleasing(_) => LayerKind::BufferReleasing,
            ShuffleStream::Checked(_) => LayerKind::Checked,
            ShuffleStream::Buffered(_) => LayerKind::Buffered,
            ShuffleStream::Codec(c) => LayerKind::Codec(c.kind()),
            ShuffleStream::LengthLimited(_) => LayerKind::LengthLimited,
            ShuffleStream::DirectBuffer(_) => LayerKind::DirectBuffer,
            ShuffleStream::File(_) => LayerKind::File,
            ShuffleStream::Opaque(_) => LayerKind::Opaque,
        }
    }

    /// The next inner node, if this is a decorator whose inner node is reachable.
    pub fn inner(&self) -> Option<&ShuffleStream> {
        match self {
            ShuffleStream::BufferReleasing(b) => b.delegate(),
            ShuffleStream::Checked(c) => Some(c.inner()),
            ShuffleStream::Buffered(b) => Some(b.inner()),
            ShuffleStream::Codec(c) => c.source(),
            ShuffleStream::LengthLimited(l) => Some(l.inner()),
            ShuffleStream::DirectBuffer(_) | ShuffleStream::File(_) | ShuffleStream::Opaque(_) => {
                None
            }
        }
    }

    /// Kinds of every reachable node, outermost first.
    pub fn layers(&self) -> Vec<LayerKind> {
        let mut layers = Vec::new();
        let mut current = Some(self);
        while let Some(stream) = current {
            layers.push(stream.kind());
            current = stream.inner();
        }
        layers
    }

    /// Consume this decorator and return its inner node.
    ///
    /// A buffer-releasing layer hands its release obligation back alongside the
    /// delegate. Terminals and decorators with an unreachable inner node are
    /// returned unchanged as `Err`.
    pub(crate) fn into_peeled(self) -> Result<(ShuffleStream, Option<ReleaseGuard>), ShuffleStream> {
        match self {
            ShuffleStream::BufferReleasing(b) => match b.into_parts() {
                (Some(delegate), guard) => Ok((delegate, Some(guard))),
                (None, guard) => Err(ShuffleStream::BufferReleasing(BufferReleasingStream {
                    delegate: None,
                    guard,
                })),
            },
            ShuffleStream::Checked(c) => Ok((c.into_inner(), None)),
            ShuffleStream::Buffered(b) => Ok((b.into_inner(), None)),
            ShuffleStream::Codec(c) => c
                .into_source()
                .map(|source| (source, None))
                .map_err(ShuffleStream::Codec),
            ShuffleStream::LengthLimited(l) => Ok((l.into_inner(), None)),
            terminal => Err(terminal),
        }
    }
}

impl Read for ShuffleStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            ShuffleStream::BufferReleasing(s) => s.read(buf),
            ShuffleStream::Checked(s) => s.read(buf),
            ShuffleStream::Buffered(s) => s.read(buf),
            ShuffleStream::Codec(s) => s.read(buf),
            ShuffleStream::LengthLimited(s) => s.read(buf),
            ShuffleStream::DirectBuffer(s) => s.read(buf),
            ShuffleStream::File(s) => s.read(buf),
            ShuffleStream::Opaque(s) => s.read(buf),
        }
    }
}

impl fmt::Debug for ShuffleStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShuffleStream")
            .field("layers", &self.layers())
            .finish()
    }
}
