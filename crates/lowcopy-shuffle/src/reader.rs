//! Read streams handed to the native engine.
//!
//! Three variants: a file segment read straight from the file handle, a direct
//! memory region served by reference, and a generic copy through a bounce
//! buffer. Each one keeps the stream it was built from alive until closed, so
//! the release obligations of that stream are honored.

use std::fs::File;
use std::io::{self, Read};
use std::num::NonZeroUsize;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::config::MAX_BUFFER_SIZE;
use crate::region::BufferRegion;
use crate::stream::{ReleaseGuard, ShuffleStream};

/// Which read strategy a [`ShuffleReadStream`] uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReadStreamKind {
    /// Low-copy read of a file segment
    FileSegment,
    /// Low-copy read of a direct memory region
    DirectBuffer,
    /// Copy through a heap buffer
    HeapCopy,
}

/// Reads a file segment directly from the file handle.
pub struct FileSegmentReader {
    source: Option<ShuffleStream>,
    file: Arc<File>,
    remaining: u64,
    buffer_size: NonZeroUsize,
    compressed: bool,
}

impl FileSegmentReader {
    /// Bytes left in the segment.
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    /// Shared file handle.
    pub fn file(&self) -> &Arc<File> {
        &self.file
    }
}

impl Read for FileSegmentReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.source.is_none() || self.remaining == 0 {
            return Ok(0);
        }
        let max = buf
            .len()
            .min(self.buffer_size.get())
            .min(usize::try_from(self.remaining).unwrap_or(usize::MAX));
        let n = (&*self.file).read(&mut buf[..max])?;
        self.remaining -= n as u64;
        Ok(n)
    }
}

/// Serves bytes of a direct memory region without copying it.
pub struct DirectBufferReader {
    source: Option<ShuffleStream>,
    region: BufferRegion,
    pos: usize,
    buffer_size: NonZeroUsize,
    compressed: bool,
}

impl DirectBufferReader {
    /// Region being served, including bytes already consumed.
    pub fn region(&self) -> &BufferRegion {
        &self.region
    }

    /// Next slice of at most `buffer_size` bytes, shared with the region.
    pub fn next_chunk(&mut self) -> Option<Bytes> {
        if self.source.is_none() || self.pos >= self.region.len() {
            return None;
        }
        let end = self.pos.saturating_add(self.buffer_size.get()).min(self.region.len());
        let chunk = self.region.bytes().slice(self.pos..end);
        self.pos = end;
        Some(chunk)
    }
}

impl Read for DirectBufferReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.source.is_none() {
            return Ok(0);
        }
        let data = &self.region.bytes()[self.pos..];
        let n = data.len().min(buf.len());
        buf[..n].copy_from_slice(&data[..n]);
        self.pos += n;
        Ok(n)
    }
}

/// Copies bytes out of a stream through a heap buffer.
pub struct HeapCopyReader {
    // Declared before `releases` so the stream is dropped before its buffers are released.
    source: Option<ShuffleStream>,
    releases: Vec<ReleaseGuard>,
    buffer: Vec<u8>,
    start: usize,
    end: usize,
    buffer_size: NonZeroUsize,
    compressed: bool,
}

impl HeapCopyReader {
    /// Number of release obligations carried for layers peeled off the source.
    pub fn pending_releases(&self) -> usize {
        self.releases.iter().filter(|r| !r.is_released()).count()
    }
}

impl Read for HeapCopyReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Some(source) = self.source.as_mut() else {
            return Ok(0);
        };
        if self.start == self.end {
            let n = source.read(&mut self.buffer)?;
            if n == 0 {
                return Ok(0);
            }
            self.start = 0;
            self.end = n;
        }
        let n = (self.end - self.start).min(buf.len());
        buf[..n].copy_from_slice(&self.buffer[self.start..self.start + n]);
        self.start += n;
        Ok(n)
    }
}

/// Stream handed to the native engine for one shuffle block.
pub enum ShuffleReadStream {
    /// See [`FileSegmentReader`]
    FileSegment(FileSegmentReader),
    /// See [`DirectBufferReader`]
    DirectBuffer(DirectBufferReader),
    /// See [`HeapCopyReader`]
    HeapCopy(HeapCopyReader),
}

impl ShuffleReadStream {
    /// Low-copy reader over a file segment.
    pub fn file_segment(
        source: ShuffleStream,
        file: Arc<File>,
        remaining: u64,
        buffer_size: NonZeroUsize,
        compressed: bool,
    ) -> Self {
        ShuffleReadStream::FileSegment(FileSegmentReader {
            source: Some(source),
            file,
            remaining,
            buffer_size,
            compressed,
        })
    }

    /// Low-copy reader over a direct memory region.
    pub fn direct_buffer(
        source: ShuffleStream,
        region: BufferRegion,
        buffer_size: NonZeroUsize,
        compressed: bool,
    ) -> Self {
        ShuffleReadStream::DirectBuffer(DirectBufferReader {
            source: Some(source),
            region,
            pos: 0,
            buffer_size,
            compressed,
        })
    }

    /// Copying reader over `source`.
    pub fn heap_copy(source: ShuffleStream, buffer_size: NonZeroUsize, compressed: bool) -> Self {
        Self::heap_copy_with_releases(source, Vec::new(), buffer_size, compressed)
    }

    /// Copying reader over `source`, also owning release obligations of layers
    /// that were peeled off above it.
    pub fn heap_copy_with_releases(
        source: ShuffleStream,
        releases: Vec<ReleaseGuard>,
        buffer_size: NonZeroUsize,
        compressed: bool,
    ) -> Self {
        ShuffleReadStream::HeapCopy(HeapCopyReader {
            source: Some(source),
            releases,
            buffer: vec![0u8; buffer_size.get().min(MAX_BUFFER_SIZE)],
            start: 0,
            end: 0,
            buffer_size,
            compressed,
        })
    }

    /// Read strategy.
    pub fn kind(&self) -> ReadStreamKind {
        match self {
            ShuffleReadStream::FileSegment(_) => ReadStreamKind::FileSegment,
            ShuffleReadStream::DirectBuffer(_) => ReadStreamKind::DirectBuffer,
            ShuffleReadStream::HeapCopy(_) => ReadStreamKind::HeapCopy,
        }
    }

    /// True if the bytes delivered are still compressed and must be decoded by the consumer.
    pub fn is_compressed(&self) -> bool {
        match self {
            ShuffleReadStream::FileSegment(r) => r.compressed,
            ShuffleReadStream::DirectBuffer(r) => r.compressed,
            ShuffleReadStream::HeapCopy(r) => r.compressed,
        }
    }

    /// Preferred transfer size.
    pub fn buffer_size(&self) -> NonZeroUsize {
        match self {
            ShuffleReadStream::FileSegment(r) => r.buffer_size,
            ShuffleReadStream::DirectBuffer(r) => r.buffer_size,
            ShuffleReadStream::HeapCopy(r) => r.buffer_size,
        }
    }

    /// The stream this reader was built from, until closed.
    pub fn source(&self) -> Option<&ShuffleStream> {
        match self {
            ShuffleReadStream::FileSegment(r) => r.source.as_ref(),
            ShuffleReadStream::DirectBuffer(r) => r.source.as_ref(),
            ShuffleReadStream::HeapCopy(r) => r.source.as_ref(),
        }
    }

    /// True once [`close`](Self::close) has run.
    pub fn is_closed(&self) -> bool {
        self.source().is_none()
    }

    /// Drop the source stream and release its buffers. Later reads return 0.
    pub fn close(&mut self) {
        match self {
            ShuffleReadStream::FileSegment(r) => r.source = None,
            ShuffleReadStream::DirectBuffer(r) => r.source = None,
            ShuffleReadStream::HeapCopy(r) => {
                r.source = None;
                r.releases.iter_mut().for_each(ReleaseGuard::release);
                r.buffer = Vec::new();
                r.start = 0;
                r.end = 0;
            }
        }
    }
}

impl Read for ShuffleReadStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            ShuffleReadStream::FileSegment(r) => r.read(buf),
            ShuffleReadStream::DirectBuffer(r) => r.read(buf),
            ShuffleReadStream::HeapCopy(r) => r.read(buf),
        }
    }
}

impl std::fmt::Debug for ShuffleReadStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShuffleReadStream")
            .field("kind", &self.kind())
            .field("compressed", &self.is_compressed())
            .field("source", &self.source())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn size(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    #[test]
    fn file_segment_stops_at_remaining() {
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(b"0123456789").unwrap();
        std::io::Seek::rewind(&mut file).unwrap();
        let stream = ShuffleStream::file(file).limited(6);
        let handle = match &stream {
            ShuffleStream::LengthLimited(l) => match l.inner() {
                ShuffleStream::File(f) => f.handle().clone(),
                _ => unreachable!(),
            },
            _ => unreachable!(),
        };
        let mut reader = ShuffleReadStream::file_segment(stream, handle, 6, size(4), false);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"012345");
        assert_eq!(reader.kind(), ReadStreamKind::FileSegment);
    }

    #[test]
    fn direct_buffer_chunks_share_region() {
        let region = BufferRegion::direct(b"abcdefg".to_vec());
        let stream = ShuffleStream::direct_buffer(region.clone());
        let mut reader = ShuffleReadStream::direct_buffer(stream, region, size(3), true);
        assert!(reader.is_compressed());
        let ShuffleReadStream::DirectBuffer(inner) = &mut reader else {
            unreachable!()
        };
        let chunks: Vec<Bytes> = std::iter::from_fn(|| inner.next_chunk()).collect();
        assert_eq!(
            chunks,
            vec![
                Bytes::from_static(b"abc"),
                Bytes::from_static(b"def"),
                Bytes::from_static(b"g"),
            ]
        );
    }

    #[test]
    fn direct_buffer_huge_transfer_size_after_read() {
        let region = BufferRegion::direct(b"abcdefg".to_vec());
        let stream = ShuffleStream::direct_buffer(region.clone());
        let mut reader = ShuffleReadStream::direct_buffer(stream, region, NonZeroUsize::MAX, false);
        let mut head = [0u8; 2];
        reader.read_exact(&mut head).unwrap();
        let ShuffleReadStream::DirectBuffer(inner) = &mut reader else {
            unreachable!()
        };
        assert_eq!(inner.next_chunk(), Some(Bytes::from_static(b"cdefg")));
        assert_eq!(inner.next_chunk(), None);
    }

    #[test]
    fn heap_copy_bounce_buffer_is_capped() {
        let stream = ShuffleStream::direct_buffer(BufferRegion::heap(b"abc".to_vec()));
        let mut reader = ShuffleReadStream::heap_copy(stream, NonZeroUsize::MAX, false);
        assert_eq!(reader.buffer_size(), NonZeroUsize::MAX);
        if let ShuffleReadStream::HeapCopy(r) = &reader {
            assert_eq!(r.buffer.len(), MAX_BUFFER_SIZE);
        }
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"abc");
    }

    #[test]
    fn heap_copy_reads_through_small_buffer() {
        let data: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        let stream = ShuffleStream::direct_buffer(BufferRegion::heap(data.clone())).checked();
        let mut reader = ShuffleReadStream::heap_copy(stream, size(7), false);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
        assert_eq!(reader.buffer_size().get(), 7);
    }

    #[test]
    fn close_releases_carried_guards_once() {
        let released = Arc::new(AtomicUsize::new(0));
        let counter = released.clone();
        let guard = ReleaseGuard::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let stream = ShuffleStream::direct_buffer(BufferRegion::heap(b"ab".to_vec()));
        let mut reader =
            ShuffleReadStream::heap_copy_with_releases(stream, vec![guard], size(8), true);
        if let ShuffleReadStream::HeapCopy(r) = &reader {
            assert_eq!(r.pending_releases(), 1);
        }
        reader.close();
        reader.close();
        assert!(reader.is_closed());
        assert_eq!(reader.read(&mut [0u8; 4]).unwrap(), 0);
        drop(reader);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn close_drops_source_chain_release() {
        let released = Arc::new(AtomicUsize::new(0));
        let counter = released.clone();
        let stream = ShuffleStream::direct_buffer(BufferRegion::direct(b"ab".to_vec()))
            .with_release(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        let mut reader = ShuffleReadStream::direct_buffer(
            stream,
            BufferRegion::direct(b"ab".to_vec()),
            size(8),
            false,
        );
        reader.close();
        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert!(reader.source().is_none());
    }
}
