//! Type-erased column storage.
//!
//! A column is one fixed-capacity array of a single component type. It never
//! reallocates: once a chunk is created its columns stay put, so a pointer
//! into a column is stable until the row is removed.
//!
//! Columns do not track which rows are initialised; the owning chunk does.

use std::{alloc::Layout, ptr::NonNull};

use crate::component::ComponentInfo;

pub struct Column {
    data: NonNull<u8>,
    capacity: usize,
    info: ComponentInfo,
}

// SAFETY: Column owns its allocation and component types are `Send + Sync`.
unsafe impl Send for Column {}
unsafe impl Sync for Column {}

impl Column {
    /// Allocate an uninitialised column with room for `capacity` components.
    #[must_use]
    pub fn new(info: ComponentInfo, capacity: usize) -> Self {
        if capacity == 0 || info.size() == 0 {
            // Zero-sized types still need an aligned, non-null address.
            let data = NonNull::new(std::ptr::without_provenance_mut::<u8>(info.align()))
                .unwrap_or(NonNull::dangling());
            return Self {
                data,
                capacity,
                info,
            };
        }

        let layout = Self::array_layout(&info, capacity);

        // SAFETY: layout has a non-zero size
        let data = unsafe {
            let ptr = std::alloc::alloc(layout);
            if ptr.is_null() {
                std::alloc::handle_alloc_error(layout);
            }
            NonNull::new_unchecked(ptr)
        };

        Self {
            data,
            capacity,
            info,
        }
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub const fn info(&self) -> &ComponentInfo {
        &self.info
    }

    /// Raw pointer to the component slot at `row`.
    ///
    /// Writing through the pointer is allowed as long as no reference to the
    /// same slot is alive; the column itself holds no references into `data`.
    ///
    /// # Safety
    ///
    /// `row` must be less than or equal to `capacity`.
    #[must_use]
    pub unsafe fn ptr_at(&self, row: usize) -> *mut u8 {
        debug_assert!(row <= self.capacity);
        // SAFETY: caller keeps row within the allocation (one-past-end allowed)
        unsafe { self.data.as_ptr().add(row * self.info.size()) }
    }

    /// Write the default value into `row`.
    ///
    /// # Safety
    ///
    /// `row < capacity` and the slot must be uninitialised.
    pub unsafe fn write_default(&mut self, row: usize) {
        unsafe { self.info.write_default(self.ptr_at(row)) };
    }

    /// Drop the value stored at `row`, leaving the slot uninitialised.
    ///
    /// # Safety
    ///
    /// `row < capacity` and the slot must be initialised.
    pub unsafe fn drop_at(&mut self, row: usize) {
        unsafe { self.info.drop_in_place(self.ptr_at(row)) };
    }

    /// Bitwise-move the value at `from` into `to`. `from` becomes uninitialised.
    ///
    /// # Safety
    ///
    /// Both rows are in bounds, `from` is initialised and `to` is not.
    pub unsafe fn move_within(&mut self, from: usize, to: usize) {
        if from == to {
            return;
        }
        // SAFETY: distinct rows never overlap
        unsafe {
            std::ptr::copy_nonoverlapping(self.ptr_at(from), self.ptr_at(to), self.info.size());
        }
    }

    /// Bitwise-move the value at `row` into `dst[dst_row]`.
    ///
    /// # Safety
    ///
    /// Both columns store the same component type, both rows are in bounds,
    /// the source is initialised and the destination is not. The source slot
    /// is logically uninitialised afterwards.
    pub unsafe fn move_to(&self, row: usize, dst: &mut Self, dst_row: usize) {
        debug_assert_eq!(self.info.id(), dst.info.id());
        unsafe {
            std::ptr::copy_nonoverlapping(self.ptr_at(row), dst.ptr_at(dst_row), self.info.size());
        }
    }

    /// View `count` components starting at `start`.
    ///
    /// # Safety
    ///
    /// - `T` is the column's component type.
    /// - The rows are initialised and not mutably borrowed elsewhere.
    #[must_use]
    pub unsafe fn slice<T: 'static>(&self, start: usize, count: usize) -> &[T] {
        debug_assert!(self.info.is::<T>(), "Type mismatch in Column::slice");
        debug_assert!(start + count <= self.capacity);
        unsafe { std::slice::from_raw_parts(self.ptr_at(start).cast::<T>(), count) }
    }

    /// Mutable view of `count` components starting at `start`.
    ///
    /// # Safety
    ///
    /// - `T` is the column's component type.
    /// - The rows are initialised and no other reference to them exists for
    ///   the returned lifetime.
    #[allow(clippy::mut_from_ref)]
    #[must_use]
    pub unsafe fn slice_mut<T: 'static>(&self, start: usize, count: usize) -> &mut [T] {
        debug_assert!(self.info.is::<T>(), "Type mismatch in Column::slice_mut");
        debug_assert!(start + count <= self.capacity);
        unsafe { std::slice::from_raw_parts_mut(self.ptr_at(start).cast::<T>(), count) }
    }

    fn array_layout(info: &ComponentInfo, count: usize) -> Layout {
        let size = info.size().checked_mul(count).expect("Layout overflow");
        // SAFETY: align comes from a valid Layout and is a power of two
        unsafe { Layout::from_size_align_unchecked(size, info.align()) }
    }
}

impl Drop for Column {
    fn drop(&mut self) {
        if self.capacity > 0 && self.info.size() > 0 {
            let layout = Self::array_layout(&self.info, self.capacity);
            // SAFETY: data was allocated with this layout
            unsafe {
                std::alloc::dealloc(self.data.as_ptr(), layout);
            }
        }
    }
}
