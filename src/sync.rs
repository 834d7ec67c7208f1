use std::ffi::CString;
use std::ptr::NonNull;

use nix::errno::Errno;
use nix::libc::{self, c_uint, sem_t};

use crate::error::{Error, Result};

fn c_name(name: &str) -> Result<CString> {
    CString::new(name).map_err(|_| Error::InvalidName {
        name: name.to_owned(),
        reason: "name cannot contain NUL",
    })
}

/// A POSIX named counting semaphore.
///
/// The initial count only applies when this call creates the semaphore;
/// attaching to an existing one keeps its current count.
#[derive(Debug)]
pub struct NamedSemaphore {
    name: String,
    sem: NonNull<sem_t>,
}

// SAFETY: POSIX semaphores are safe to use from any thread, and the handle is
// only closed on drop.
unsafe impl Send for NamedSemaphore {}
unsafe impl Sync for NamedSemaphore {}

impl NamedSemaphore {
    pub fn open(name: &str, value: u32, mode: u32) -> Result<Self> {
        let cname = c_name(name)?;
        // SAFETY: `cname` is NUL-terminated; O_CREAT takes the mode and
        // initial value as variadic unsigned ints.
        let sem = unsafe {
            libc::sem_open(
                cname.as_ptr(),
                libc::O_CREAT,
                mode as c_uint,
                value as c_uint,
            )
        };
        if sem == libc::SEM_FAILED {
            return Err(Errno::last().into());
        }
        let sem = NonNull::new(sem).ok_or(Error::from(Errno::EINVAL))?;
        Ok(NamedSemaphore {
            name: name.to_owned(),
            sem,
        })
    }

    /// Blocks until the count is positive, then decrements it.
    pub fn wait(&self) -> Result<()> {
        loop {
            // SAFETY: `sem` came from a successful sem_open and is still open.
            match Errno::result(unsafe { libc::sem_wait(self.sem.as_ptr()) }) {
                Ok(_) => return Ok(()),
                Err(Errno::EINTR) => continue,
                Err(err) => return Err(err.into()),
            }
        }
    }

    pub fn post(&self) -> Result<()> {
        // SAFETY: `sem` came from a successful sem_open and is still open.
        Errno::result(unsafe { libc::sem_post(self.sem.as_ptr()) })?;
        Ok(())
    }

    /// Current count. Only a snapshot, peers may change it right away.
    #[cfg(target_os = "linux")]
    pub fn value(&self) -> Result<usize> {
        let mut value = 0;
        // SAFETY: `sem` is open and `value` is a valid out pointer.
        Errno::result(unsafe { libc::sem_getvalue(self.sem.as_ptr(), &mut value) })?;
        Ok(value.max(0) as usize)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn unlink(name: &str) -> Result<()> {
        let cname = c_name(name)?;
        // SAFETY: `cname` is NUL-terminated.
        Errno::result(unsafe { libc::sem_unlink(cname.as_ptr()) })?;
        Ok(())
    }
}

impl Drop for NamedSemaphore {
    fn drop(&mut self) {
        // SAFETY: closing our own handle; the named object stays alive.
        if let Err(err) = Errno::result(unsafe { libc::sem_close(self.sem.as_ptr()) }) {
            tracing::error!(name = %self.name, %err, "failed to close semaphore");
        }
    }
}

/// An inter-process mutex backed by a named semaphore with a count of one.
#[derive(Debug)]
pub struct NamedMutex {
    inner: NamedSemaphore,
}

impl NamedMutex {
    pub fn open(name: &str, mode: u32) -> Result<Self> {
        let inner = NamedSemaphore::open(name, 1, mode)?;
        Ok(NamedMutex { inner })
    }

    /// Blocks until the mutex is free. The returned guard unlocks on drop.
    pub fn lock(&self) -> Result<NamedMutexGuard<'_>> {
        self.inner.wait()?;
        Ok(NamedMutexGuard { mutex: self })
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn unlink(name: &str) -> Result<()> {
        NamedSemaphore::unlink(name)
    }
}

#[must_use = "the mutex unlocks as soon as the guard is dropped"]
pub struct NamedMutexGuard<'a> {
    mutex: &'a NamedMutex,
}

impl Drop for NamedMutexGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.mutex.inner.post() {
            tracing::error!(name = %self.mutex.name(), %err, "failed to unlock mutex");
        }
    }
}
