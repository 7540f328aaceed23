//! Single-process ownership of a data directory.

use std::fs::{File, OpenOptions};
use std::path::Path;

use fs2::FileExt;

use crate::error::Error;
use crate::Result;

pub const LOCK_FILE: &str = ".lock";

/// Exclusive advisory lock on `<dir>/.lock`, released when dropped.
#[derive(Debug)]
pub struct DirLock {
    _file: File,
}

impl DirLock {
    /// Takes the lock or fails with [`Error::Locked`] if another handle holds it.
    pub fn acquire(dir: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(dir.join(LOCK_FILE))?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Self { _file: file }),
            Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => {
                Err(Error::Locked(dir.display().to_string()))
            }
            Err(e) => Err(Error::Io(e)),
        }
    }
}
