//! Advisory file locking via `create_new` lockfiles and atomic rename
//! (spec §7's locking requirements). Ported from the teacher crate's
//! `lockfile.rs`.

use crate::error::BitResult;
use crate::serialize::{Deserialize, Serialize};
use anyhow::Context;
use std::cell::Cell;
use std::fs::File;
use std::io::BufReader;
use std::io::{self, prelude::*};
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};

const LOCK_FILE_EXT: &str = "lock";

bitflags! {
    pub struct LockfileFlags: u8 {
        const SET_READONLY = 1;
    }
}

#[derive(Debug)]
pub struct Lockfile {
    file: Option<File>,
    lockfile: File,
    flags: LockfileFlags,
    path: PathBuf,
    lockfile_path: PathBuf,
    committed: Cell<bool>,
    rolled_back: Cell<bool>,
}

impl Write for Lockfile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.lockfile.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.lockfile.flush()
    }
}

impl Lockfile {
    /// Creates `<path>.lock` via `create_new`, so a concurrent locker fails
    /// with `AlreadyExists` instead of silently clobbering this one.
    fn open(path: impl AsRef<Path>, flags: LockfileFlags) -> BitResult<Self> {
        let path = path.as_ref();
        assert!(!path.exists() || path.is_file(), "cannot create lock on symlinks or directories");
        let lockfile_path = path.with_extension(LOCK_FILE_EXT);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let lockfile = File::options().create_new(true).write(true).open(&lockfile_path).or_else(
            |err| match err.kind() {
                io::ErrorKind::AlreadyExists => Err(err).with_context(|| {
                    format!(
                        "failed to lock file `{}` (`{}` already exists)",
                        path.display(),
                        lockfile_path.display()
                    )
                }),
                _ => Err(err).with_context(|| format!("failed to create file `{}`", path.display())),
            },
        )?;

        let file = if path.exists() { Some(File::open(path)?) } else { None };

        Ok(Self {
            file,
            lockfile,
            flags,
            lockfile_path,
            path: path.to_path_buf(),
            committed: Cell::new(false),
            rolled_back: Cell::new(false),
        })
    }

    pub fn file(&self) -> Option<&File> {
        self.file.as_ref()
    }

    pub fn with_readonly<R>(
        path: impl AsRef<Path>,
        flags: LockfileFlags,
        f: impl FnOnce(&Self) -> BitResult<R>,
    ) -> BitResult<R> {
        Self::open(path, flags)?.with_readonly_inner(f)
    }

    fn with_readonly_inner<R>(&self, f: impl FnOnce(&Self) -> BitResult<R>) -> BitResult<R> {
        let r = f(self);
        self.rollback();
        r
    }

    pub fn with_mut<R>(
        path: impl AsRef<Path>,
        flags: LockfileFlags,
        f: impl FnOnce(&mut Self) -> BitResult<R>,
    ) -> BitResult<R> {
        Self::open(path, flags)?.with_mut_inner(f)
    }

    fn with_mut_inner<R>(mut self, f: impl FnOnce(&mut Self) -> BitResult<R>) -> BitResult<R> {
        match f(&mut self) {
            Ok(r) => {
                self.commit().with_context(|| {
                    format!(
                        "failed to write lockfile to `{}`; the updated contents are stored in `{}`; please remove this file when done",
                        self.path.display(),
                        self.lockfile_path.display()
                    )
                })?;
                Ok(r)
            }
            Err(err) => {
                self.rollback();
                Err(err)
            }
        }
    }

    /// Renames the lockfile onto the target path, making the write visible
    /// atomically. Commits on drop unless [`Lockfile::rollback`] was called.
    fn commit(&self) -> io::Result<()> {
        if self.rolled_back.get() {
            return Ok(());
        }
        let set_readonly = self.flags.contains(LockfileFlags::SET_READONLY);
        if set_readonly && self.path.exists() {
            let mut permissions = self.path.metadata()?.permissions();
            permissions.set_readonly(false);
            std::fs::set_permissions(&self.path, permissions)?;
        }

        std::fs::rename(&self.lockfile_path, &self.path)?;
        self.committed.set(true);

        if set_readonly {
            let mut permissions = self.path.metadata()?.permissions();
            permissions.set_readonly(true);
            std::fs::set_permissions(&self.path, permissions)?;
        }

        Ok(())
    }

    fn cleanup(&self) -> BitResult<()> {
        match std::fs::remove_file(&self.lockfile_path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| {
                format!("failed to remove lockfile `{}`", self.lockfile_path.display())
            }),
        }
    }

    pub fn rollback(&self) {
        self.rolled_back.set(true);
    }
}

impl Drop for Lockfile {
    fn drop(&mut self) {
        assert!(!self.rolled_back.get() || !self.committed.get());
        if self.rolled_back.get() || !self.committed.get() {
            self.cleanup().expect("failed to clean up lockfile");
        }
    }
}

/// A value backed by a locked file: the default on drop is to commit;
/// [`Filelock::rollback`] must be called explicitly to discard changes.
pub struct Filelock<T: Serialize> {
    data: T,
    lockfile: Lockfile,
    has_changes: bool,
    rolled_back: bool,
}

impl<T: Serialize + Deserialize + Default> Filelock<T> {
    pub fn lock_with_flags(path: impl AsRef<Path>, flags: LockfileFlags) -> BitResult<Self> {
        let mut lockfile = Lockfile::open(path, flags)?;
        let data = match &mut lockfile.file {
            Some(file) => T::deserialize(&mut BufReader::new(file))?,
            None => T::default(),
        };
        Ok(Filelock { lockfile, data, has_changes: false, rolled_back: false })
    }

    pub fn lock(path: impl AsRef<Path>) -> BitResult<Self> {
        Self::lock_with_flags(path, LockfileFlags::empty())
    }
}

impl<T: Serialize> Filelock<T> {
    pub fn rollback(&mut self) {
        self.rolled_back = true;
        self.lockfile.rollback();
    }
}

impl<T: Serialize> Drop for Filelock<T> {
    fn drop(&mut self) {
        if self.rolled_back || !self.has_changes {
            return;
        }
        self.data.serialize(&mut self.lockfile).expect("failed to write data (in Filelock)");
        self.lockfile.commit().expect("failed to commit lockfile (in Filelock)");
    }
}

impl<T: Serialize> Deref for Filelock<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

impl<T: Serialize> DerefMut for Filelock<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.has_changes = true;
        &mut self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn lockfile_commit_renames_over_target() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("HEAD");
        std::fs::write(&path, b"old").unwrap();

        Lockfile::with_mut(&path, LockfileFlags::empty(), |lock| {
            lock.write_all(b"new")?;
            Ok(())
        })
        .unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"new");
        assert!(!path.with_extension(LOCK_FILE_EXT).exists());
    }

    #[test]
    fn concurrent_lock_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("HEAD");
        let _guard = Lockfile::open(&path, LockfileFlags::empty()).unwrap();
        assert!(Lockfile::open(&path, LockfileFlags::empty()).is_err());
    }

    #[test]
    fn rollback_leaves_target_untouched() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("HEAD");
        std::fs::write(&path, b"old").unwrap();

        let result: BitResult<()> = Lockfile::with_mut(&path, LockfileFlags::empty(), |lock| {
            lock.write_all(b"new")?;
            bail!("simulated failure")
        });
        assert!(result.is_err());
        assert_eq!(std::fs::read(&path).unwrap(), b"old");
    }
}
