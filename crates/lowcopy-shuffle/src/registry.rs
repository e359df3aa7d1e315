//! Capability table describing how each decorator kind may be reached into.
//!
//! Built once at initialization, then shared read-only behind an `Arc`.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::codec::CodecKind;
use crate::error::{Result, ShuffleError};
use crate::stream::LayerKind;

/// Layer kinds every registry must be able to reach into.
pub const STRUCTURAL_LAYERS: [LayerKind; 5] = [
    LayerKind::BufferReleasing,
    LayerKind::Checked,
    LayerKind::LengthLimited,
    LayerKind::DirectBuffer,
    LayerKind::File,
];

/// How the unwrapper may treat a layer kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Inner stream (or terminal handle) may be taken directly
    Unwrap,
    /// Inner stream may only be taken when the layer sits directly under a `Buffered` layer
    BehindBuffer,
    /// Layer is known but must never be seen through
    Unsupported,
}

/// Immutable map from layer kind to [`Access`].
#[derive(Debug, Clone)]
pub struct UnwrapRegistry {
    access: HashMap<LayerKind, Access>,
}

impl UnwrapRegistry {
    /// Start an empty builder.
    pub fn builder() -> UnwrapRegistryBuilder {
        UnwrapRegistryBuilder::default()
    }

    /// Registry for the standard shuffle compression stack.
    ///
    /// Zstd is reachable only behind a read-ahead buffer, LZ4 and LZF directly,
    /// Snappy never.
    pub fn standard() -> Arc<Self> {
        let registry = Self::builder()
            .structural()
            .register(LayerKind::Buffered, Access::Unwrap)
            .register(LayerKind::Codec(CodecKind::Zstd), Access::BehindBuffer)
            .register(LayerKind::Codec(CodecKind::Lz4), Access::Unwrap)
            .register(LayerKind::Codec(CodecKind::Lzf), Access::Unwrap)
            .register(LayerKind::Codec(CodecKind::Snappy), Access::Unsupported);
        Arc::new(Self {
            access: registry.access,
        })
    }

    /// Access rule for `kind`, if registered.
    pub fn access(&self, kind: LayerKind) -> Option<Access> {
        self.access.get(&kind).copied()
    }

    /// True if `kind` is registered as directly unwrappable.
    pub fn unwraps(&self, kind: LayerKind) -> bool {
        self.access(kind) == Some(Access::Unwrap)
    }

    /// Number of registered kinds.
    pub fn len(&self) -> usize {
        self.access.len()
    }

    /// True if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.access.is_empty()
    }
}

/// Builder for [`UnwrapRegistry`].
#[derive(Debug, Default)]
pub struct UnwrapRegistryBuilder {
    access: HashMap<LayerKind, Access>,
}

impl UnwrapRegistryBuilder {
    /// Register an access rule, replacing any earlier rule for the same kind.
    pub fn register(mut self, kind: LayerKind, access: Access) -> Self {
        self.access.insert(kind, access);
        self
    }

    /// Register every structural layer as unwrappable.
    pub fn structural(self) -> Self {
        STRUCTURAL_LAYERS
            .iter()
            .fold(self, |builder, kind| builder.register(*kind, Access::Unwrap))
    }

    /// Validate and freeze the table.
    ///
    /// Fails if any structural layer is missing or not unwrappable: without them
    /// no resource can ever be classified and the read path is misconfigured.
    pub fn build(self) -> Result<Arc<UnwrapRegistry>> {
        for kind in STRUCTURAL_LAYERS {
            match self.access.get(&kind) {
                None => return Err(ShuffleError::MissingAccessor { kind }),
                Some(Access::Unwrap) => {}
                Some(_) => return Err(ShuffleError::UnsupportedStructuralLayer { kind }),
            }
        }
        debug!(kinds = self.access.len(), "unwrap registry built");
        Ok(Arc::new(UnwrapRegistry {
            access: self.access,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_registry_rules() {
        let registry = UnwrapRegistry::standard();
        assert!(registry.unwraps(LayerKind::BufferReleasing));
        assert!(registry.unwraps(LayerKind::Buffered));
        assert_eq!(
            registry.access(LayerKind::Codec(CodecKind::Zstd)),
            Some(Access::BehindBuffer)
        );
        assert_eq!(
            registry.access(LayerKind::Codec(CodecKind::Snappy)),
            Some(Access::Unsupported)
        );
        assert_eq!(registry.access(LayerKind::Opaque), None);
    }

    #[test]
    fn build_requires_structural_layers() {
        let err = UnwrapRegistry::builder()
            .register(LayerKind::BufferReleasing, Access::Unwrap)
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            ShuffleError::MissingAccessor {
                kind: LayerKind::Checked
            }
        ));
    }

    #[test]
    fn build_rejects_unsupported_structural_layer() {
        let err = UnwrapRegistry::builder()
            .structural()
            .register(LayerKind::LengthLimited, Access::Unsupported)
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            ShuffleError::UnsupportedStructuralLayer {
                kind: LayerKind::LengthLimited
            }
        ));
    }

    #[test]
    fn build_accepts_structural_only() {
        let registry = UnwrapRegistry::builder().structural().build().unwrap();
        assert_eq!(registry.len(), STRUCTURAL_LAYERS.len());
        assert_eq!(registry.access(LayerKind::Buffered), None);
    }
}
