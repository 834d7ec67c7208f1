//! Shared control block of a pipe.
//!
//! # Memory Layout
//!
//! ```text
//! ┌─────────────┬──────────┬────────────┬─────────────┬──────────┬───────────┐
//! │ initialized │ capacity │ read_index │ write_index │ read_end │ write_end │
//! └─────────────┴──────────┴────────────┴─────────────┴──────────┴───────────┘
//! ```
//!
//! The block lives in its own segment, apart from the ring bytes. Indices and
//! end markers are only touched while holding the matching side's mutex; they
//! are atomics so every process can hold a shared reference to the block.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use shmpipe_derive::FromShm;

/// Marks a block whose fields have been set up by some process.
pub(crate) const INITIALIZED: u32 = 0x1876_3023;

/// End marker value meaning "no end of stream declared".
const NO_END: usize = 0;

#[derive(FromShm, Default, Debug)]
#[repr(C)]
pub(crate) struct ControlBlock {
    initialized: AtomicU32,
    capacity: AtomicUsize,
    read_index: AtomicUsize,
    write_index: AtomicUsize,
    read_end: AtomicUsize,
    write_end: AtomicUsize,
}

impl ControlBlock {
    /// Capacity chosen by the initializing process, or `None` if no process
    /// has finished initializing the block yet.
    pub fn capacity_if_initialized(&self) -> Option<usize> {
        if self.initialized.load(Ordering::Acquire) == INITIALIZED {
            Some(self.capacity.load(Ordering::Relaxed))
        } else {
            None
        }
    }

    /// Must be called with the open mutex held, after re-checking
    /// [`capacity_if_initialized`](Self::capacity_if_initialized).
    pub fn initialize(&self, capacity: usize) {
        self.capacity.store(capacity, Ordering::Relaxed);
        self.read_index.store(0, Ordering::Relaxed);
        self.write_index.store(0, Ordering::Relaxed);
        self.read_end.store(NO_END, Ordering::Relaxed);
        self.write_end.store(NO_END, Ordering::Relaxed);
        self.initialized.store(INITIALIZED, Ordering::Release);
    }

    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Relaxed)
    }

    pub fn read_index(&self) -> usize {
        self.read_index.load(Ordering::Relaxed)
    }

    pub fn write_index(&self) -> usize {
        self.write_index.load(Ordering::Relaxed)
    }

    /// Moves the read index one past `pos`. Reader mutex held.
    pub fn advance_read(&self, pos: usize) {
        self.read_index.store(self.next(pos), Ordering::Relaxed);
    }

    /// Moves the write index one past `pos`. Writer mutex held.
    pub fn advance_write(&self, pos: usize) {
        self.write_index.store(self.next(pos), Ordering::Relaxed);
    }

    fn next(&self, pos: usize) -> usize {
        let next = pos + 1;
        if next == self.capacity() {
            0
        } else {
            next
        }
    }

    /// Encodes a ring position as an end marker. Position 0 is stored as
    /// `capacity` since 0 means "no end".
    pub fn end_marker(&self, pos: usize) -> usize {
        if pos == 0 {
            self.capacity()
        } else {
            pos
        }
    }

    /// True if readers must stop before reading `pos`.
    pub fn read_ends_at(&self, pos: usize) -> bool {
        let end = self.read_end.load(Ordering::Acquire);
        end != NO_END && end == self.end_marker(pos)
    }

    /// True if a writer must stop before writing `pos`. A call that has not
    /// written anything yet never starts once an end is declared.
    pub fn write_ends_at(&self, pos: usize, first_byte: bool) -> bool {
        let end = self.write_end.load(Ordering::Acquire);
        end != NO_END && (first_byte || end == self.end_marker(pos))
    }

    pub fn is_read_closed(&self) -> bool {
        self.read_end.load(Ordering::Acquire) != NO_END
    }

    pub fn is_write_closed(&self) -> bool {
        self.write_end.load(Ordering::Acquire) != NO_END
    }

    /// Sets the read end unless one is already declared. Reader mutex held.
    pub fn declare_read_end(&self, marker: usize) {
        let _ = self.read_end.compare_exchange(
            NO_END,
            marker,
            Ordering::Release,
            Ordering::Relaxed,
        );
    }

    /// Sets the write end unless one is already declared. Writer mutex held.
    pub fn declare_write_end(&self, marker: usize) {
        let _ = self.write_end.compare_exchange(
            NO_END,
            marker,
            Ordering::Release,
            Ordering::Relaxed,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(capacity: usize) -> ControlBlock {
        let block = ControlBlock::default();
        block.initialize(capacity);
        block
    }

    #[test]
    fn zeroed_block_is_uninitialized() {
        let block = ControlBlock::default();
        assert_eq!(block.capacity_if_initialized(), None);
        block.initialize(8);
        assert_eq!(block.capacity_if_initialized(), Some(8));
    }

    #[test]
    fn indices_wrap_at_capacity() {
        let block = block(3);
        block.advance_write(block.write_index());
        block.advance_write(block.write_index());
        assert_eq!(block.write_index(), 2);
        block.advance_write(block.write_index());
        assert_eq!(block.write_index(), 0);
        block.advance_read(2);
        assert_eq!(block.read_index(), 0);
    }

    #[test]
    fn position_zero_is_encoded_as_capacity() {
        let block = block(4);
        assert_eq!(block.end_marker(0), 4);
        assert_eq!(block.end_marker(3), 3);

        block.declare_read_end(block.end_marker(0));
        assert!(block.read_ends_at(0));
        assert!(!block.read_ends_at(1));
    }

    #[test]
    fn no_end_declared_never_stops() {
        let block = block(4);
        for pos in 0..4 {
            assert!(!block.read_ends_at(pos));
            assert!(!block.write_ends_at(pos, true));
        }
    }

    #[test]
    fn write_end_stops_new_calls_anywhere() {
        let block = block(4);
        block.declare_write_end(2);
        assert!(block.write_ends_at(0, true));
        assert!(!block.write_ends_at(1, false));
        assert!(block.write_ends_at(2, false));
    }

    #[test]
    fn end_markers_are_never_reset() {
        let block = block(4);
        block.declare_write_end(1);
        block.declare_write_end(3);
        assert!(block.write_ends_at(1, false));
        assert!(!block.write_ends_at(3, false));
        assert!(block.is_write_closed());
        assert!(!block.is_read_closed());
    }
}
