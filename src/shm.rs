use std::num::NonZero;
use std::ptr::NonNull;

use nix::sys::mman::shm_unlink;
use nix::unistd::ftruncate;
use nix::{
    fcntl::OFlag,
    libc::{c_void, mode_t},
    sys::mman::{mmap, munmap, shm_open, MapFlags, ProtFlags},
    sys::stat::Mode,
};

use crate::error::{Error, Result};

/// A `#[repr(C)]` type that can be viewed in place over a mapped segment.
///
/// # Safety
///
/// Implementors must be valid for every bit pattern (a fresh segment is all
/// zeroes) and must only be mutated through shared references, i.e. through
/// atomics, since any attached process may touch the memory concurrently.
/// Use `#[derive(FromShm)]` rather than implementing this by hand.
pub unsafe trait FromShm: Sized {
    fn from_shm(shm: &Shm) -> Result<&Self>;
}

/// A named POSIX shared memory segment mapped into this process.
///
/// Dropping it unmaps the memory but leaves the segment in place; only
/// [`Shm::unlink`] removes it.
#[derive(Debug)]
pub struct Shm {
    name: String,
    ptr: NonNull<c_void>,
    len: usize,
}

// SAFETY: the mapping is process-wide and owned by this handle. Concurrent
// access to its contents is coordinated by the callers.
unsafe impl Send for Shm {}
unsafe impl Sync for Shm {}

impl Shm {
    /// Creates `name` read-write with the given permission bits, or attaches
    /// to it if it already exists, and sizes it to `len` bytes.
    ///
    /// Resizing an existing segment to the size it already has leaves its
    /// contents alone, so attachers must pass the creator's length.
    pub fn open_or_create(name: &str, len: usize, mode: u32) -> Result<Self> {
        let nonzero = NonZero::new(len).ok_or(Error::Size {
            expected: 1,
            actual: 0,
        })?;
        let mode = Mode::from_bits_truncate(mode as mode_t);
        let fd = shm_open(name, OFlag::O_RDWR | OFlag::O_CREAT, mode)?;
        ftruncate(&fd, len as i64)?;
        // SAFETY: a fresh mapping chosen by the kernel, backed by `fd` which
        // was just sized to `len` bytes.
        let ptr = unsafe {
            mmap(
                None,
                nonzero,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                &fd,
                0,
            )?
        };
        Ok(Shm {
            name: name.to_owned(),
            ptr,
            len,
        })
    }

    pub fn unlink(name: &str) -> Result<()> {
        Ok(shm_unlink(name)?)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Start of the mapping. Other processes may write through their own
    /// mappings at any time, so never turn this into a `&mut [u8]`.
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr() as *mut u8
    }
}

impl Drop for Shm {
    fn drop(&mut self) {
        // SAFETY: `ptr`/`len` describe the mapping made in `map`, and no
        // borrow handed out by `FromShm` outlives `self`.
        if let Err(err) = unsafe { munmap(self.ptr, self.len) } {
            tracing::error!(name = %self.name, %err, "failed to unmap shared memory");
        }
    }
}
