//! Advisory per-resource locking.
//!
//! The legacy catalog assumed a single operator and raced freely when two
//! invocations touched the same name. Mutating operations here take a lock
//! file under `<base>/.locks/` first; a second invocation fails fast with
//! `Locked` instead of interleaving directory operations.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use crate::error::MoxenError;
use crate::paths::Layout;

/// A held lock. Dropping it releases the lock by removing the file.
#[derive(Debug)]
pub struct ResourceLock {
    path: PathBuf,
}

impl ResourceLock {
    /// Acquire the lock named `name`, failing with `Locked` if another
    /// invocation holds it. The file records the owning pid for operator
    /// debugging of stale locks.
    pub fn acquire(layout: &Layout, name: &str) -> Result<Self, MoxenError> {
        let dir = layout.locks_dir();
        fs::create_dir_all(&dir).map_err(|source| MoxenError::Io {
            context: format!("creating lock directory {}", dir.display()),
            source,
        })?;

        let path = dir.join(format!("{name}.lock"));
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                let _ = write!(file, "{}", std::process::id());
                tracing::debug!(name, "acquired resource lock");
                Ok(Self { path })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Err(MoxenError::Locked {
                name: name.to_string(),
            }),
            Err(source) => Err(MoxenError::Io {
                context: format!("creating lock file {}", path.display()),
                source,
            }),
        }
    }
}

impl Drop for ResourceLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}
