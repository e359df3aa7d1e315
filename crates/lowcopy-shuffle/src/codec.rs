//! Compression decoder layers.
//!
//! A codec node decodes lazily: until the first read it still owns its source
//! stream and the unwrapper can see through it. The first read moves the source
//! into the decoder, after which the source is no longer inspectable.

use std::fmt;
use std::io::{self, Read};
use std::sync::Arc;

use crate::stream::ShuffleStream;

/// Compression codec of a decoder layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecKind {
    /// Zstandard
    Zstd,
    /// LZ4 frame format
    Lz4,
    /// LZF
    Lzf,
    /// Snappy framing
    Snappy,
    /// Any other codec, identified by name
    Other(&'static str),
}

impl fmt::Display for CodecKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecKind::Zstd => write!(f, "zstd"),
            CodecKind::Lz4 => write!(f, "lz4"),
            CodecKind::Lzf => write!(f, "lzf"),
            CodecKind::Snappy => write!(f, "snappy"),
            CodecKind::Other(name) => write!(f, "{}", name),
        }
    }
}

/// Builds a decoding reader over a compressed source.
pub type DecoderFactory =
    Arc<dyn Fn(Box<dyn Read + Send>) -> io::Result<Box<dyn Read + Send>> + Send + Sync>;

/// Decoder factory backed by the `zstd` crate.
pub fn zstd_decoder() -> DecoderFactory {
    Arc::new(
        |source: Box<dyn Read + Send>| -> io::Result<Box<dyn Read + Send>> {
            Ok(Box::new(zstd::stream::read::Decoder::new(source)?))
        },
    )
}

/// Decoder factory backed by the `lz4_flex` frame format.
pub fn lz4_decoder() -> DecoderFactory {
    Arc::new(
        |source: Box<dyn Read + Send>| -> io::Result<Box<dyn Read + Send>> {
            Ok(Box::new(lz4_flex::frame::FrameDecoder::new(source)))
        },
    )
}

enum CodecState {
    Pending {
        source: Box<ShuffleStream>,
        factory: DecoderFactory,
    },
    Decoding(Box<dyn Read + Send>),
    Broken,
}

/// Decompresses its source stream.
pub struct CodecStream {
    kind: CodecKind,
    state: CodecState,
}

impl CodecStream {
    /// Decoder of `kind` over `source`, built with `factory` on first read.
    pub fn with_decoder(kind: CodecKind, source: ShuffleStream, factory: DecoderFactory) -> Self {
        Self {
            kind,
            state: CodecState::Pending {
                source: Box::new(source),
                factory,
            },
        }
    }

    /// Zstd decoder over `source`.
    pub fn zstd(source: ShuffleStream) -> Self {
        Self::with_decoder(CodecKind::Zstd, source, zstd_decoder())
    }

    /// LZ4 frame decoder over `source`.
    pub fn lz4(source: ShuffleStream) -> Self {
        Self::with_decoder(CodecKind::Lz4, source, lz4_decoder())
    }

    /// Codec of this layer.
    pub fn kind(&self) -> CodecKind {
        self.kind
    }

    /// The compressed source, while decoding has not started yet.
    pub fn source(&self) -> Option<&ShuffleStream> {
        match &self.state {
            CodecState::Pending { source, .. } => Some(source),
            CodecState::Decoding(_) | CodecState::Broken => None,
        }
    }

    /// True once the first read has handed the source to the decoder.
    pub fn is_decoding(&self) -> bool {
        !matches!(self.state, CodecState::Pending { .. })
    }

    pub(crate) fn into_source(self) -> Result<ShuffleStream, Self> {
        match self.state {
            CodecState::Pending { source, .. } => Ok(*source),
            state => Err(Self {
                kind: self.kind,
                state,
            }),
        }
    }

    fn decoder(&mut self) -> io::Result<&mut Box<dyn Read + Send>> {
        if let CodecState::Pending { .. } = self.state {
            if let CodecState::Pending { source, factory } =
                std::mem::replace(&mut self.state, CodecState::Broken)
            {
                let source: Box<dyn Read + Send> = source;
                self.state = CodecState::Decoding(factory(source)?);
            }
        }
        match &mut self.state {
            CodecState::Decoding(decoder) => Ok(decoder),
            _ => Err(io::Error::new(
                io::ErrorKind::Other,
                format!("{} decoder failed to initialize", self.kind),
            )),
        }
    }
}

impl Read for CodecStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.decoder()?.read(buf)
    }
}
