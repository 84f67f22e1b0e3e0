//! Chunks - fixed-capacity structure-of-arrays blocks.
//!
//! Every chunk belongs to exactly one archetype and holds one [`Column`] per
//! component type of that archetype, plus the entity handles of its rows.
//! Rows `0..len` are initialised in every column; rows past `len` are not.
//!
//! Each column carries a `last_written` timestamp. Timestamps are atomics so
//! that passes can stamp chunks through a shared borrow of the world.

use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

use crate::{
    archetype::ArchetypeId, component::ComponentInfo, entity::Entity, storage::Column,
};

/// A contiguous run of rows inside one chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChunkSlice {
    pub archetype: ArchetypeId,
    /// Index of the chunk inside its archetype.
    pub chunk: usize,
    pub start: usize,
    pub count: usize,
}

impl ChunkSlice {
    /// One past the last row of the slice.
    #[must_use]
    pub const fn end(&self) -> usize {
        self.start + self.count
    }
}

pub struct Chunk {
    capacity: usize,
    entities: Vec<Entity>,
    columns: Vec<Column>,
    last_written: Box<[AtomicU64]>,
}

impl Chunk {
    /// Create an empty chunk with one column per component info.
    pub(crate) fn new<'a>(
        infos: impl IntoIterator<Item = &'a ComponentInfo>,
        capacity: usize,
        timestamp: u64,
    ) -> Self {
        let columns: Vec<Column> = infos
            .into_iter()
            .map(|info| Column::new(info.clone(), capacity))
            .collect();
        let last_written = columns.iter().map(|_| AtomicU64::new(timestamp)).collect();

        Self {
            capacity,
            entities: Vec::with_capacity(capacity),
            columns,
            last_written,
        }
    }

    /// Number of live rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.entities.len() >= self.capacity
    }

    /// Free rows left in this chunk.
    #[must_use]
    pub fn free_rows(&self) -> usize {
        self.capacity - self.entities.len()
    }

    /// Entity handles of the live rows, in row order.
    #[must_use]
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    #[must_use]
    pub fn column(&self, index: usize) -> Option<&Column> {
        self.columns.get(index)
    }

    pub(crate) fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub(crate) fn columns_mut(&mut self) -> &mut [Column] {
        &mut self.columns
    }

    /// Timestamp of the last write to the column at `index`.
    #[must_use]
    pub fn last_written(&self, index: usize) -> u64 {
        self.last_written
            .get(index)
            .map_or(0, |stamp| stamp.load(Ordering::Acquire))
    }

    /// Record a write to the column at `index`. Timestamps never go backwards.
    pub fn stamp(&self, index: usize, timestamp: u64) {
        if let Some(stamp) = self.last_written.get(index) {
            stamp.fetch_max(timestamp, Ordering::AcqRel);
        }
    }

    /// Record a write to every column.
    pub fn stamp_all(&self, timestamp: u64) {
        for stamp in &*self.last_written {
            stamp.fetch_max(timestamp, Ordering::AcqRel);
        }
    }

    /// Append a row with every component default-initialised.
    ///
    /// # Panics
    ///
    /// Panics if the chunk is full.
    pub(crate) fn push_default(&mut self, entity: Entity) -> usize {
        // SAFETY: every column is initialised right below
        let row = unsafe { self.push_uninit(entity) };
        for column in &mut self.columns {
            // SAFETY: the row was just reserved and is uninitialised
            unsafe { column.write_default(row) };
        }
        row
    }

    /// Append a row without initialising any column.
    ///
    /// # Safety
    ///
    /// The caller must initialise the row in every column before the chunk is
    /// read or dropped.
    ///
    /// # Panics
    ///
    /// Panics if the chunk is full.
    pub(crate) unsafe fn push_uninit(&mut self, entity: Entity) -> usize {
        assert!(!self.is_full(), "push into a full chunk");
        let row = self.entities.len();
        self.entities.push(entity);
        row
    }

    /// Remove `row` by moving the last live row into it.
    ///
    /// Columns for which `drop_column` returns `true` have their value at
    /// `row` dropped; the others are assumed to have been moved out already.
    /// Returns the entity that now occupies `row`, if a row was moved.
    ///
    /// # Safety
    ///
    /// `row < len`, and values not dropped here must have been moved out.
    pub(crate) unsafe fn swap_remove_with(
        &mut self,
        row: usize,
        mut drop_column: impl FnMut(usize) -> bool,
    ) -> Option<Entity> {
        debug_assert!(row < self.entities.len());
        let last = self.entities.len() - 1;

        for (index, column) in self.columns.iter_mut().enumerate() {
            // SAFETY: row is live; after the drop it is refilled from `last`
            unsafe {
                if drop_column(index) {
                    column.drop_at(row);
                }
                column.move_within(last, row);
            }
        }

        self.entities.swap_remove(row);
        (row < last).then(|| self.entities[row])
    }
}

impl Drop for Chunk {
    fn drop(&mut self) {
        let len = self.entities.len();
        for column in &mut self.columns {
            if column.info().needs_drop() {
                for row in 0..len {
                    // SAFETY: rows below len are initialised
                    unsafe { column.drop_at(row) };
                }
            }
        }
    }
}

impl fmt::Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chunk")
            .field("len", &self.entities.len())
            .field("capacity", &self.capacity)
            .field("columns", &self.columns.len())
            .finish()
    }
}
