//! Inter-process byte pipes built from POSIX named shared memory and named
//! semaphores.
//!
//! ```no_run
//! use shmpipe::Pipe;
//!
//! # fn main() -> shmpipe::Result<()> {
//! // Either side may create the pipe; the first one picks the capacity.
//! let pipe = Pipe::new("events", 4096)?;
//! pipe.write(b"hello")?;
//!
//! let mut buf = [0u8; 5];
//! pipe.read(&mut buf)?;
//! assert_eq!(&buf, b"hello");
//!
//! // Named objects outlive every process until someone removes them.
//! pipe.unlink();
//! # Ok(())
//! # }
//! ```

// Lets `#[derive(FromShm)]` refer to `shmpipe::` paths inside this crate.
extern crate self as shmpipe;

mod control;
pub mod error;
mod name;
pub mod pipe;
pub mod shm;
pub mod sync;

pub use error::{Error, Result};
pub use pipe::{Pipe, DEFAULT_CAPACITY, MAX_CAPACITY};
pub use shm::{FromShm, Shm};
pub use shmpipe_derive::FromShm;
pub use sync::{NamedMutex, NamedMutexGuard, NamedSemaphore};
