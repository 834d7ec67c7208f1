use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid pipe name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("capacity must be between 1 and {max} bytes, got {requested}")]
    Capacity { requested: usize, max: usize },

    #[error("size of shared memory must be at least {expected} bytes, got {actual}")]
    Size { expected: usize, actual: usize },

    #[error("shared memory must have an alignment of {0}")]
    Alignment(usize),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl From<nix::Error> for Error {
    fn from(value: nix::Error) -> Self {
        Error::Io(value.into())
    }
}

impl Error {
    /// True when a named object to open or remove does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Io(err) if err.kind() == io::ErrorKind::NotFound)
    }
}
