//! Byte pipe between processes over shared memory.
//!
//! A pipe is a ring buffer in a named shared memory segment plus a control
//! block in a second segment. Two counting semaphores track free slots and
//! readable bytes, and one mutex per side serializes index updates:
//!
//! ```text
//!   writer                                               reader
//!   ──────                                               ──────
//!   space.wait()                                         data.wait()
//!   lock(write)                                          lock(read)
//!     pos = write_index; ring[pos] = byte; advance         pos = read_index; byte = ring[pos]; advance
//!   unlock(write)                                        unlock(read)
//!   data.post()                                          space.post()
//! ```
//!
//! The lock is taken per byte, never for a whole transfer, so a reader and a
//! writer can work on a partially filled ring at the same time. The byte is
//! copied before its side's lock is released: with several writers, a data
//! permit posted by one writer could otherwise let a reader consume the slot
//! another writer has claimed but not yet filled (and likewise for readers
//! freeing slots).
//!
//! Every named object outlives the processes using it. Call [`Pipe::unlink`]
//! or [`Pipe::unlink_name`] once all peers are done.

use std::io;
use std::mem::size_of;

use bytemuck::Pod;
use tracing::{debug, trace, warn};

use crate::control::ControlBlock;
use crate::error::{Error, Result};
use crate::name::PipeNames;
use crate::shm::{FromShm, Shm};
use crate::sync::{NamedMutex, NamedSemaphore};

/// Capacity used when none is given.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Largest capacity a POSIX semaphore can count.
pub const MAX_CAPACITY: usize = i32::MAX as usize;

pub struct OpenOptions {
    capacity: usize,
    mode: u32,
}

impl OpenOptions {
    pub fn new() -> Self {
        OpenOptions {
            capacity: DEFAULT_CAPACITY,
            mode: 0o600,
        }
    }

    /// Ring size in bytes. Only used if this open creates the pipe; attaching
    /// to an existing pipe keeps the creator's capacity.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Permission bits of every object this open creates.
    pub fn mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    /// Creates the pipe `name` or attaches to it.
    pub fn open(self, name: &str) -> Result<Pipe> {
        if self.capacity == 0 || self.capacity > MAX_CAPACITY {
            return Err(Error::Capacity {
                requested: self.capacity,
                max: MAX_CAPACITY,
            });
        }
        let names = PipeNames::new(name)?;

        let write_mutex = NamedMutex::open(&names.write_mutex, self.mode)?;
        let read_mutex = NamedMutex::open(&names.read_mutex, self.mode)?;
        let open_mutex = NamedMutex::open(&names.open_mutex, self.mode)?;
        let info = Shm::open_or_create(&names.info, size_of::<ControlBlock>(), self.mode)?;

        let ring = {
            let block = ControlBlock::from_shm(&info)?;
            match block.capacity_if_initialized() {
                Some(capacity) => Shm::open_or_create(&names.ring, capacity, self.mode)?,
                None => {
                    let _guard = open_mutex.lock()?;
                    match block.capacity_if_initialized() {
                        Some(capacity) => Shm::open_or_create(&names.ring, capacity, self.mode)?,
                        None => {
                            // The ring is sized before the sentinel is published.
                            let ring = Shm::open_or_create(&names.ring, self.capacity, self.mode)?;
                            block.initialize(self.capacity);
                            debug!(pipe = name, capacity = self.capacity, "created pipe");
                            ring
                        }
                    }
                }
            }
        };

        let capacity = ring.len();
        if capacity > MAX_CAPACITY {
            return Err(Error::Capacity {
                requested: capacity,
                max: MAX_CAPACITY,
            });
        }
        let data = NamedSemaphore::open(&names.data, 0, self.mode)?;
        let space = NamedSemaphore::open(&names.space, capacity as u32, self.mode)?;
        debug!(pipe = name, capacity, "attached to pipe");

        Ok(Pipe {
            name: name.to_owned(),
            names,
            write_mutex,
            read_mutex,
            info,
            ring,
            data,
            space,
        })
    }
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// A handle on a named inter-process pipe.
///
/// Handles are `Send + Sync`; any number of threads and processes may read
/// and write concurrently, although byte order across concurrent writers is
/// only the order in which they claimed slots.
pub struct Pipe {
    name: String,
    names: PipeNames,
    write_mutex: NamedMutex,
    read_mutex: NamedMutex,
    info: Shm,
    ring: Shm,
    /// Counts bytes ready to read.
    data: NamedSemaphore,
    /// Counts free slots.
    space: NamedSemaphore,
}

impl Pipe {
    pub fn options() -> OpenOptions {
        OpenOptions::new()
    }

    /// Creates or attaches to `name`; `capacity` only applies when creating.
    pub fn new(name: &str, capacity: usize) -> Result<Self> {
        Pipe::options().capacity(capacity).open(name)
    }

    /// Creates or attaches to `name` with the default capacity.
    pub fn open(name: &str) -> Result<Self> {
        Pipe::options().open(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.ring.len()
    }

    fn block(&self) -> Result<&ControlBlock> {
        ControlBlock::from_shm(&self.info)
    }

    /// Writes all of `data`, blocking while the ring is full.
    ///
    /// Returns `false` if the write side is closed before every byte went
    /// out. Bytes written before that stay in the pipe.
    pub fn write(&self, data: &[u8]) -> Result<bool> {
        Ok(self.write_bytes(data)? == data.len())
    }

    /// Writes the bytes of `value`.
    pub fn write_value<T: Pod>(&self, value: &T) -> Result<bool> {
        self.write(bytemuck::bytes_of(value))
    }

    /// Fills all of `buf`, blocking while the ring is empty.
    ///
    /// Returns `false` if the read side reaches an end of stream first. The
    /// bytes read before that are left in `buf`.
    pub fn read(&self, buf: &mut [u8]) -> Result<bool> {
        Ok(self.read_bytes(buf)? == buf.len())
    }

    /// Reads `size_of::<T>()` bytes into `value`.
    pub fn read_value<T: Pod>(&self, value: &mut T) -> Result<bool> {
        self.read(bytemuck::bytes_of_mut(value))
    }

    fn write_bytes(&self, data: &[u8]) -> Result<usize> {
        let block = self.block()?;
        for (i, &byte) in data.iter().enumerate() {
            self.space.wait()?;

            {
                let _guard = self.write_mutex.lock()?;
                let pos = block.write_index();
                if block.write_ends_at(pos, i == 0) {
                    // Hand the permit on so other blocked writers see the end too.
                    self.space.post()?;
                    trace!(pipe = %self.name, written = i, "write side closed");
                    return Ok(i);
                }
                debug_assert!(pos < self.ring.len());
                // SAFETY: `pos` is inside the ring and the space permit means
                // every reader is done with it.
                unsafe { self.ring.as_ptr().add(pos).write(byte) };
                block.advance_write(pos);
            }

            self.data.post()?;
        }
        Ok(data.len())
    }

    fn read_bytes(&self, buf: &mut [u8]) -> Result<usize> {
        let block = self.block()?;
        for (i, slot) in buf.iter_mut().enumerate() {
            self.data.wait()?;

            {
                let _guard = self.read_mutex.lock()?;
                let pos = block.read_index();
                if block.read_ends_at(pos) {
                    self.data.post()?;
                    trace!(pipe = %self.name, read = i, "read side closed");
                    return Ok(i);
                }
                debug_assert!(pos < self.ring.len());
                // SAFETY: `pos` is inside the ring and the data permit means
                // its writer has stored the byte.
                *slot = unsafe { self.ring.as_ptr().add(pos).read() };
                block.advance_read(pos);
            }

            self.space.post()?;
        }
        Ok(buf.len())
    }

    /// Number of bytes queued at the time of the call.
    ///
    /// Other processes may change it right away. A completely full ring has
    /// equal indices and reports 0.
    pub fn available(&self) -> Result<usize> {
        let block = self.block()?;
        let (r, w) = {
            let _read = self.read_mutex.lock()?;
            let _write = self.write_mutex.lock()?;
            (block.read_index(), block.write_index())
        };
        if w < r {
            Ok(block.capacity() - r + w)
        } else {
            Ok(w - r)
        }
    }

    /// Declares the end of the stream on the write side.
    ///
    /// Later and in-progress writes return `false`. Readers still get every
    /// byte written so far, then their reads return `false` instead of
    /// blocking.
    ///
    /// Waits for one free slot if the ring is full, so the end position can
    /// be told apart from a full ring.
    pub fn close_write(&self) -> Result<()> {
        let block = self.block()?;
        if block.is_write_closed() {
            return Ok(());
        }
        self.space.wait()?;
        {
            let _read = self.read_mutex.lock()?;
            let _write = self.write_mutex.lock()?;
            let end = block.end_marker(block.write_index());
            block.declare_write_end(end);
            block.declare_read_end(end);
        }
        // Wake one blocked peer on each side; whoever hits the end passes it on.
        self.space.post()?;
        self.data.post()?;
        debug!(pipe = %self.name, "closed write side");
        Ok(())
    }

    /// Declares the end of the stream on the read side.
    ///
    /// Reads stop at the current position and writers get `false` rather
    /// than blocking on a ring nobody drains.
    pub fn close_read(&self) -> Result<()> {
        let block = self.block()?;
        if block.is_read_closed() && block.is_write_closed() {
            return Ok(());
        }
        {
            let _read = self.read_mutex.lock()?;
            let _write = self.write_mutex.lock()?;
            block.declare_read_end(block.end_marker(block.read_index()));
            block.declare_write_end(block.end_marker(block.write_index()));
        }
        self.data.post()?;
        self.space.post()?;
        debug!(pipe = %self.name, "closed read side");
        Ok(())
    }

    pub fn is_write_closed(&self) -> Result<bool> {
        Ok(self.block()?.is_write_closed())
    }

    pub fn is_read_closed(&self) -> Result<bool> {
        Ok(self.block()?.is_read_closed())
    }

    /// Removes every named object behind this pipe.
    ///
    /// Open handles, this one included, keep working on the old objects; a
    /// later open of the same name starts a fresh pipe. Returns `false` if
    /// any object could not be removed.
    pub fn unlink(&self) -> bool {
        unlink_all(&self.names)
    }

    /// Same as [`unlink`](Self::unlink) without an open handle.
    pub fn unlink_name(name: &str) -> bool {
        match PipeNames::new(name) {
            Ok(names) => unlink_all(&names),
            Err(err) => {
                warn!(%err, "cannot unlink pipe");
                false
            }
        }
    }
}

fn unlink_all(names: &PipeNames) -> bool {
    let results = [
        removed(&names.write_mutex, NamedMutex::unlink(&names.write_mutex)),
        removed(&names.read_mutex, NamedMutex::unlink(&names.read_mutex)),
        removed(&names.open_mutex, NamedMutex::unlink(&names.open_mutex)),
        removed(&names.info, Shm::unlink(&names.info)),
        removed(&names.ring, Shm::unlink(&names.ring)),
        removed(&names.data, NamedSemaphore::unlink(&names.data)),
        removed(&names.space, NamedSemaphore::unlink(&names.space)),
    ];
    results.iter().all(|&ok| ok)
}

fn removed(object: &str, result: Result<()>) -> bool {
    match result {
        Ok(()) => true,
        Err(err) if err.is_not_found() => {
            debug!(object, "already removed");
            false
        }
        Err(err) => {
            warn!(object, %err, "failed to remove");
            false
        }
    }
}

impl io::Write for &Pipe {
    /// Writes the whole buffer unless the write side closes midway.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.write_bytes(buf).map_err(io::Error::other)?;
        if n == 0 && !buf.is_empty() {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl io::Write for Pipe {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::Write::write(&mut &*self, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl io::Read for &Pipe {
    /// Blocks for one byte, then takes whatever else is already queued.
    /// Returns 0 at the end of the stream.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let queued = self.available().map_err(io::Error::other)?;
        let len = queued.clamp(1, buf.len());
        self.read_bytes(&mut buf[..len]).map_err(io::Error::other)
    }
}

impl io::Read for Pipe {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        io::Read::read(&mut &*self, buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(tag: &str) -> String {
        format!("shmpipe-pipe-{}-{}", tag, std::process::id())
    }

    #[test]
    fn rejects_bad_capacity() {
        for capacity in [0, MAX_CAPACITY + 1] {
            let err = Pipe::new(&name("capacity"), capacity).err().unwrap();
            assert!(matches!(err, Error::Capacity { .. }));
        }
    }

    #[test]
    fn fresh_pipe_is_empty() {
        let name = name("fresh");
        let pipe = Pipe::new(&name, 8).unwrap();
        assert_eq!(pipe.capacity(), 8);
        assert_eq!(pipe.available().unwrap(), 0);
        assert!(!pipe.is_write_closed().unwrap());
        assert!(!pipe.is_read_closed().unwrap());
        #[cfg(target_os = "linux")]
        {
            assert_eq!(pipe.space.value().unwrap(), 8);
            assert_eq!(pipe.data.value().unwrap(), 0);
        }
        assert!(pipe.unlink());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn semaphores_track_bytes_in_flight() {
        let name = name("counts");
        let pipe = Pipe::new(&name, 8).unwrap();
        assert!(pipe.write(b"abc").unwrap());
        assert_eq!(pipe.available().unwrap(), 3);
        assert_eq!(pipe.data.value().unwrap(), 3);
        assert_eq!(pipe.space.value().unwrap(), 5);

        let mut buf = [0u8; 2];
        assert!(pipe.read(&mut buf).unwrap());
        assert_eq!(&buf, b"ab");
        assert_eq!(pipe.data.value().unwrap(), 1);
        assert_eq!(pipe.space.value().unwrap(), 7);
        assert!(pipe.unlink());
    }

    #[test]
    fn available_counts_across_wrap() {
        let name = name("wrap");
        let pipe = Pipe::new(&name, 4).unwrap();
        let mut buf = [0u8; 3];
        assert!(pipe.write(&[1, 2, 3]).unwrap());
        assert!(pipe.read(&mut buf).unwrap());
        assert!(pipe.write(&[4, 5]).unwrap());
        // write index wrapped to 1, read index at 3
        assert_eq!(pipe.available().unwrap(), 2);
        assert!(pipe.read(&mut buf[..2]).unwrap());
        assert_eq!(&buf[..2], &[4, 5]);
        assert!(pipe.unlink());
    }

    #[test]
    fn unlink_name_rejects_invalid_name() {
        assert!(!Pipe::unlink_name("a/b"));
    }
}
