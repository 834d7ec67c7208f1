//! POSIX object names derived from a pipe name.
//!
//! Every pipe is backed by seven named objects. Mutexes and semaphores both
//! live in the POSIX semaphore namespace, so each derived name carries a kind
//! tag on top of the side suffix.

use crate::error::{Error, Result};

const WRITE_SUFFIX: &str = "_ppw";
const READ_SUFFIX: &str = "_ppr";
const OPEN_SUFFIX: &str = "_ppo";
const INFO_SUFFIX: &str = "_ppi";
const RING_SUFFIX: &str = "_pp";

const MUTEX_TAG: &str = "_mtx";
const SEMAPHORE_TAG: &str = "_sem";
const MEMORY_TAG: &str = "_shm";

/// Linux stores named semaphores as `/dev/shm/sem.NAME`, so keep well below
/// `NAME_MAX` (255) once that prefix is added.
const MAX_OBJECT_NAME: usize = 250;

const LONGEST_DERIVED: usize = 1 + WRITE_SUFFIX.len() + MUTEX_TAG.len();

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PipeNames {
    pub write_mutex: String,
    pub read_mutex: String,
    pub open_mutex: String,
    pub info: String,
    pub ring: String,
    pub data: String,
    pub space: String,
}

impl PipeNames {
    pub fn new(name: &str) -> Result<Self> {
        let base = validate(name)?;
        Ok(PipeNames {
            write_mutex: object_name(base, WRITE_SUFFIX, MUTEX_TAG),
            read_mutex: object_name(base, READ_SUFFIX, MUTEX_TAG),
            open_mutex: object_name(base, OPEN_SUFFIX, MUTEX_TAG),
            info: object_name(base, INFO_SUFFIX, MEMORY_TAG),
            ring: object_name(base, RING_SUFFIX, MEMORY_TAG),
            data: object_name(base, WRITE_SUFFIX, SEMAPHORE_TAG),
            space: object_name(base, READ_SUFFIX, SEMAPHORE_TAG),
        })
    }
}

fn object_name(base: &str, suffix: &str, tag: &str) -> String {
    format!("/{base}{suffix}{tag}")
}

/// Returns the name without its optional leading slash.
fn validate(name: &str) -> Result<&str> {
    let invalid = |reason| Error::InvalidName {
        name: name.to_owned(),
        reason,
    };
    let base = name.strip_prefix('/').unwrap_or(name);
    if base.is_empty() {
        return Err(invalid("name cannot be empty"));
    }
    if base.contains('/') {
        return Err(invalid("name cannot contain '/' after the first character"));
    }
    if base.contains('\0') {
        return Err(invalid("name cannot contain NUL"));
    }
    if base.len() + LONGEST_DERIVED > MAX_OBJECT_NAME {
        return Err(invalid("name is too long"));
    }
    Ok(base)
}
