//! Contiguous memory regions backing shuffle blocks received over the network.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Where a memory region lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum MemoryPlacement {
    /// Off-heap memory with a stable address, safe to hand to the native engine by reference
    Direct,
    /// Ordinary memory that may be moved or reused, must be copied before handoff
    #[default]
    Heap,
}

/// A reference-counted view of a memory region.
///
/// Cloning is cheap: the underlying bytes are shared, never copied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferRegion {
    data: Bytes,
    placement: MemoryPlacement,
}

impl BufferRegion {
    /// Wrap bytes with an explicit placement.
    pub fn new(data: impl Into<Bytes>, placement: MemoryPlacement) -> Self {
        Self {
            data: data.into(),
            placement,
        }
    }

    /// Region living in direct (off-heap) memory.
    pub fn direct(data: impl Into<Bytes>) -> Self {
        Self::new(data, MemoryPlacement::Direct)
    }

    /// Region living in heap memory.
    pub fn heap(data: impl Into<Bytes>) -> Self {
        Self::new(data, MemoryPlacement::Heap)
    }

    /// Placement of the region.
    pub fn placement(&self) -> MemoryPlacement {
        self.placement
    }

    /// True if the region may be referenced by address without copying.
    pub fn is_direct(&self) -> bool {
        self.placement == MemoryPlacement::Direct
    }

    /// The shared bytes.
    pub fn bytes(&self) -> &Bytes {
        &self.data
    }

    /// Region length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True if the region holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Sub-region starting at `offset`, sharing the same storage and placement.
    pub fn tail(&self, offset: usize) -> Self {
        let offset = offset.min(self.data.len());
        Self {
            data: self.data.slice(offset..),
            placement: self.placement,
        }
    }
}
