//! World configuration.

use std::mem::size_of;

use crate::{component::ComponentInfo, entity::Entity};

/// Byte budget of one chunk when nothing else is configured.
pub const DEFAULT_CHUNK_BYTES: usize = 16 * 1024;

/// Configuration for a [`World`](crate::World).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorldConfig {
    /// Target size of one chunk in bytes. Capacity is derived from the
    /// per-row footprint of each archetype.
    pub chunk_bytes: usize,
    /// Fixed rows per chunk, overriding `chunk_bytes`.
    pub chunk_capacity: Option<usize>,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            chunk_bytes: std::env::var("CHUNKFLOW_CHUNK_BYTES")
                .ok()
                .and_then(|bytes| bytes.parse().ok())
                .unwrap_or(DEFAULT_CHUNK_BYTES),
            chunk_capacity: None,
        }
    }
}

impl WorldConfig {
    /// Config with a fixed number of rows per chunk.
    #[must_use]
    pub fn with_chunk_capacity(capacity: usize) -> Self {
        Self {
            chunk_capacity: Some(capacity),
            ..Self::default()
        }
    }

    /// Rows per chunk for an archetype with the given columns. Never zero.
    #[must_use]
    pub fn rows_for(&self, infos: &[ComponentInfo]) -> usize {
        if let Some(capacity) = self.chunk_capacity {
            return capacity.max(1);
        }
        let row_bytes = size_of::<Entity>() + infos.iter().map(ComponentInfo::size).sum::<usize>();
        (self.chunk_bytes / row_bytes).max(1)
    }
}
