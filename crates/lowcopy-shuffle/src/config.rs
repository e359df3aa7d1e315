//! Read stream configuration

use std::num::NonZeroUsize;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::codec::CodecKind;
use crate::error::{Result, ShuffleError};
use crate::factory::{ReadOptions, ShuffleReadStreamFactory};
use crate::registry::{Access, UnwrapRegistry};
use crate::stream::LayerKind;

/// Default transfer size of the returned readers (64 KiB).
pub const DEFAULT_BUFFER_SIZE: NonZeroUsize = match NonZeroUsize::new(64 * 1024) {
    Some(size) => size,
    None => panic!("default buffer size must be non-zero"),
};

/// Largest accepted transfer size (64 MiB).
pub const MAX_BUFFER_SIZE: usize = 64 * 1024 * 1024;

/// Configuration for the shuffle read path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadStreamConfig {
    /// Preferred transfer size of the returned readers; zero is rejected
    pub buffer_size: NonZeroUsize,
    /// Native shuffle mode: the chain carries no codec layer
    pub force_compress: bool,
    /// The native engine decodes the shuffle codec itself
    pub customized_codec: bool,
    /// Only look through Zstd when it sits under a read-ahead buffer
    pub zstd_requires_buffered: bool,
    /// Look through LZ4 layers
    pub lz4_unwrappable: bool,
    /// Look through LZF layers
    pub lzf_unwrappable: bool,
}

impl Default for ReadStreamConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            force_compress: false,
            customized_codec: false,
            zstd_requires_buffered: true,
            lz4_unwrappable: true,
            lzf_unwrappable: true,
        }
    }
}

impl ReadStreamConfig {
    /// Parse from JSON; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ShuffleError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject transfer sizes above [`MAX_BUFFER_SIZE`].
    pub fn validate(&self) -> Result<()> {
        if self.buffer_size.get() > MAX_BUFFER_SIZE {
            return Err(ShuffleError::InvalidConfig(format!(
                "buffer_size {} exceeds {}",
                self.buffer_size, MAX_BUFFER_SIZE
            )));
        }
        Ok(())
    }

    /// Mode flags for the factory.
    pub fn options(&self) -> ReadOptions {
        ReadOptions {
            force_compress: self.force_compress,
            customized_codec: self.customized_codec,
            buffer_size: self.buffer_size,
        }
    }

    /// Unwrap registry matching the codec settings. Snappy is never unwrappable.
    pub fn registry(&self) -> Result<Arc<UnwrapRegistry>> {
        let toggle = |enabled: bool| {
            if enabled {
                Access::Unwrap
            } else {
                Access::Unsupported
            }
        };
        let zstd = if self.zstd_requires_buffered {
            Access::BehindBuffer
        } else {
            Access::Unwrap
        };
        UnwrapRegistry::builder()
            .structural()
            .register(LayerKind::Buffered, Access::Unwrap)
            .register(LayerKind::Codec(CodecKind::Zstd), zstd)
            .register(LayerKind::Codec(CodecKind::Lz4), toggle(self.lz4_unwrappable))
            .register(LayerKind::Codec(CodecKind::Lzf), toggle(self.lzf_unwrappable))
            .register(LayerKind::Codec(CodecKind::Snappy), Access::Unsupported)
            .build()
    }

    /// Factory built from this configuration.
    pub fn factory(&self) -> Result<ShuffleReadStreamFactory> {
        self.validate()?;
        Ok(ShuffleReadStreamFactory::new(self.registry()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::ReadStreamKind;
    use crate::region::BufferRegion;
    use crate::stream::ShuffleStream;

    #[test]
    fn defaults() {
        let config = ReadStreamConfig::default();
        assert_eq!(config.buffer_size.get(), 65536);
        assert!(!config.force_compress);
        assert!(config.zstd_requires_buffered);
    }

    #[test]
    fn parse_partial_json() {
        let config =
            ReadStreamConfig::from_json(r#"{"buffer_size": 4096, "customized_codec": true}"#)
                .unwrap();
        assert_eq!(config.buffer_size.get(), 4096);
        assert!(config.customized_codec);
        assert!(config.lz4_unwrappable);
        let options = config.options();
        assert!(options.customized_codec);
        assert!(!options.force_compress);
    }

    #[test]
    fn zero_buffer_size_rejected() {
        let err = ReadStreamConfig::from_json(r#"{"buffer_size": 0}"#).unwrap_err();
        assert!(matches!(err, ShuffleError::InvalidConfig(_)));
    }

    #[test]
    fn oversized_buffer_rejected() {
        let json = format!(r#"{{"buffer_size": {}}}"#, usize::MAX);
        let err = ReadStreamConfig::from_json(&json).unwrap_err();
        assert!(matches!(err, ShuffleError::InvalidConfig(_)));

        let config = ReadStreamConfig {
            buffer_size: NonZeroUsize::new(MAX_BUFFER_SIZE + 1).unwrap(),
            ..Default::default()
        };
        assert!(config.factory().is_err());
        assert!(ReadStreamConfig::from_json(&format!(r#"{{"buffer_size": {}}}"#, MAX_BUFFER_SIZE))
            .is_ok());
    }

    #[test]
    fn malformed_json_rejected() {
        assert!(ReadStreamConfig::from_json("{buffer_size").is_err());
    }

    #[test]
    fn registry_follows_codec_flags() {
        let config = ReadStreamConfig {
            zstd_requires_buffered: false,
            lz4_unwrappable: false,
            ..Default::default()
        };
        let registry = config.registry().unwrap();
        assert_eq!(
            registry.access(LayerKind::Codec(CodecKind::Zstd)),
            Some(Access::Unwrap)
        );
        assert_eq!(
            registry.access(LayerKind::Codec(CodecKind::Lz4)),
            Some(Access::Unsupported)
        );
        assert_eq!(
            registry.access(LayerKind::Codec(CodecKind::Snappy)),
            Some(Access::Unsupported)
        );
    }

    #[test]
    fn relaxed_zstd_still_reaches_buffered_direct_region() {
        let chain = || {
            ShuffleStream::direct_buffer(BufferRegion::direct(b"block".to_vec()))
                .checked()
                .zstd()
                .buffered(1024)
                .with_release(|| {})
        };
        for zstd_requires_buffered in [true, false] {
            let config = ReadStreamConfig {
                customized_codec: true,
                zstd_requires_buffered,
                ..Default::default()
            };
            let reader = config.factory().unwrap().create(chain(), config.options());
            assert_eq!(reader.kind(), ReadStreamKind::DirectBuffer);
        }
    }

    #[test]
    fn relaxed_zstd_unwraps_without_buffer() {
        let config = ReadStreamConfig {
            customized_codec: true,
            zstd_requires_buffered: false,
            ..Default::default()
        };
        let chain = ShuffleStream::direct_buffer(BufferRegion::direct(b"block".to_vec()))
            .checked()
            .zstd()
            .with_release(|| {});
        let reader = config.factory().unwrap().create(chain, config.options());
        assert_eq!(reader.kind(), ReadStreamKind::DirectBuffer);
    }

    #[test]
    fn json_roundtrip() {
        let config = ReadStreamConfig {
            force_compress: true,
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(ReadStreamConfig::from_json(&json).unwrap(), config);
    }
}
