//! Single-writer guard for a workspace root

use super::WorkspaceContext;
use crate::error::ConfigurationError;
use fs2::FileExt;
use log::debug;
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::PathBuf;

/// Exclusive advisory lock on `<root>/.mech.lock`, released on drop.
#[derive(Debug)]
pub struct WorkspaceLock {
    file: File,
    path: PathBuf,
}

impl WorkspaceLock {
    /// Take the lock or fail fast with `WorkspaceBusy` when another run holds it.
    pub fn acquire(ctx: &WorkspaceContext) -> Result<Self, ConfigurationError> {
        ctx.ensure_root_exists()?;
        let path = ctx.lock_path();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| ConfigurationError::io(&path, e))?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                debug!("Acquired workspace lock {}", path.display());
                Ok(Self { file, path })
            }
            Err(err) if is_contended(&err) => Err(ConfigurationError::WorkspaceBusy(ctx.root().to_path_buf())),
            Err(err) => Err(ConfigurationError::io(&path, err)),
        }
    }
}

fn is_contended(err: &std::io::Error) -> bool {
    err.kind() == ErrorKind::WouldBlock || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

impl Drop for WorkspaceLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            debug!("Failed to release workspace lock {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_lock_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = WorkspaceContext::new(dir.path());

        let held = WorkspaceLock::acquire(&ctx).unwrap();
        let err = WorkspaceLock::acquire(&ctx).unwrap_err();
        assert!(matches!(err, ConfigurationError::WorkspaceBusy(_)));

        drop(held);
        assert!(WorkspaceLock::acquire(&ctx).is_ok());
    }
}
