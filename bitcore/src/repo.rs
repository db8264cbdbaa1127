//! `Repo`: the concrete bundle of subsystems (object store, ref store, clock)
//! a caller constructs once and then passes by reference into the `history`/
//! `merge`/`wire` operations (spec §5 "no globals; explicit stateful
//! subsystems"). Grounded on the teacher crate's `repo.rs` shape, stripped of
//! its `'rcx` arena/thread-local-current-repo machinery — see DESIGN.md.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::BitResult;
use crate::obj::{BitObjKind, Oid};
use crate::odb::ObjectStore;
use crate::refs::store::FileRefStore;
use crate::refs::BitRef;
use crate::time::{Clock, SystemClock};

const DEFAULT_BRANCH: &str = "master";

pub struct Repo {
    /// `.git` directory (or the bare repository root).
    pub git_dir: PathBuf,
    /// Working tree root; `None` for a bare repository. Checkout itself is
    /// out of scope (spec §1 Non-goals); this is kept only so `git_dir`'s
    /// relationship to a worktree is representable.
    pub worktree: Option<PathBuf>,
    pub odb: ObjectStore,
    pub refs: FileRefStore,
    pub clock: Arc<dyn Clock>,
}

impl Repo {
    pub fn config_path(&self) -> PathBuf {
        self.git_dir.join("config")
    }

    /// Opens an existing repository rooted at `path`: either `path/.git` (a
    /// worktree) or `path` itself (a bare repository, signalled by a `HEAD`
    /// file directly inside it).
    pub fn open(path: impl AsRef<Path>) -> BitResult<Self> {
        let path = path.as_ref();
        let (git_dir, worktree) = if path.join(".git").is_dir() {
            (path.join(".git"), Some(path.to_path_buf()))
        } else if path.join("HEAD").is_file() {
            (path.to_path_buf(), None)
        } else {
            bail!("`{}` is not a git repository", path.display());
        };
        Ok(Self {
            odb: ObjectStore::open(&git_dir)?,
            refs: FileRefStore::open(git_dir.clone()),
            clock: Arc::new(SystemClock),
            git_dir,
            worktree,
        })
    }

    /// Creates the on-disk skeleton of a new repository at `path` and opens
    /// it: `objects/`, `refs/{heads,tags}`, and a `HEAD` pointing at the
    /// unborn default branch.
    pub fn init(path: impl AsRef<Path>, bare: bool) -> BitResult<Self> {
        let path = path.as_ref();
        let git_dir = if bare { path.to_path_buf() } else { path.join(".git") };
        std::fs::create_dir_all(git_dir.join("objects"))?;
        std::fs::create_dir_all(git_dir.join("objects/pack"))?;
        std::fs::create_dir_all(git_dir.join("refs/heads"))?;
        std::fs::create_dir_all(git_dir.join("refs/tags"))?;
        let head_path = git_dir.join("HEAD");
        if !head_path.exists() {
            std::fs::write(&head_path, format!("ref: refs/heads/{}\n", DEFAULT_BRANCH))?;
        }
        let config_path = git_dir.join("config");
        if !config_path.exists() {
            std::fs::write(&config_path, "")?;
        }
        info!("initialized repository at `{}`", git_dir.display());
        Ok(Self {
            odb: ObjectStore::open(&git_dir)?,
            refs: FileRefStore::open(git_dir.clone()),
            clock: Arc::new(SystemClock),
            worktree: if bare { None } else { Some(path.to_path_buf()) },
            git_dir,
        })
    }

    /// Substitutes a fixed clock, used by tests that need reproducible
    /// commit ids.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn read_obj(&self, oid: Oid) -> BitResult<BitObjKind> {
        self.odb.get(oid)
    }

    pub fn write_obj(&self, obj: &BitObjKind) -> BitResult<Oid> {
        self.odb.put(obj)
    }

    /// Resolves `HEAD` down to a direct object id, or `None` on an unborn
    /// branch (a symbolic `HEAD` whose target doesn't exist yet).
    pub fn resolve_head(&self) -> BitResult<Option<Oid>> {
        self.refs.resolve("HEAD")
    }

    pub fn head(&self) -> BitResult<BitRef> {
        self.refs.read("HEAD")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn init_creates_skeleton_and_unborn_head() {
        let dir = tempdir().unwrap();
        let repo = Repo::init(dir.path(), false).unwrap();
        assert!(repo.git_dir.join("objects").is_dir());
        assert!(repo.git_dir.join("refs/heads").is_dir());
        assert_eq!(repo.resolve_head().unwrap(), None);
    }

    #[test]
    fn open_finds_existing_git_dir() {
        let dir = tempdir().unwrap();
        Repo::init(dir.path(), false).unwrap();
        let repo = Repo::open(dir.path()).unwrap();
        assert_eq!(repo.git_dir, dir.path().join(".git"));
    }
}
