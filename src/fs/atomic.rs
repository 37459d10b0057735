use std::fs::{self, File};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{IoResultExt, Result};

/// an exclusive temp file that becomes a container only on commit
///
/// the file lives next to its destination so the final rename stays on one
/// filesystem. dropping an uncommitted target removes the temp file; the
/// destination is never touched before `commit`.
pub struct TempTarget {
    path: PathBuf,
    file: File,
    committed: bool,
}

impl TempTarget {
    /// create `.<stem>.<uuid>.tmp` inside `dir`
    pub fn create_in(dir: &Path, stem: &str) -> Result<Self> {
        fs::create_dir_all(dir).with_path(dir)?;
        let path = dir.join(format!(".{}.{}.tmp", stem, uuid::Uuid::new_v4()));
        let file = File::options()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .with_path(&path)?;
        Ok(Self {
            path,
            file,
            committed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_mut(&mut self) -> &mut File {
        &mut self.file
    }

    /// fsync and move into place, replacing any previous file at `dest`
    pub fn commit(mut self, dest: &Path) -> Result<()> {
        self.file.sync_all().with_path(&self.path)?;
        fs::rename(&self.path, dest).with_path(dest)?;
        self.committed = true;
        if let Some(parent) = dest.parent() {
            fsync_dir(parent)?;
        }
        Ok(())
    }

    /// like `commit`, but a present `dest` wins and the temp file is discarded
    ///
    /// returns whether the temp file was moved into place.
    pub fn commit_if_absent(self, dest: &Path) -> Result<bool> {
        if dest.exists() {
            debug!(path = %dest.display(), "destination already present, discarding temp file");
            return Ok(false);
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).with_path(parent)?;
        }
        self.commit(dest)?;
        Ok(true)
    }
}

impl Drop for TempTarget {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.path);
        }
    }
}

/// fsync a directory
pub fn fsync_dir(path: &Path) -> Result<()> {
    // directories cannot be opened for syncing on windows
    if cfg!(unix) {
        let dir = File::open(path).with_path(path)?;
        dir.sync_all().with_path(path)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_commit_moves_into_place() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("out.zip");

        let mut target = TempTarget::create_in(dir.path(), "out.zip").unwrap();
        target.file_mut().write_all(b"data").unwrap();
        let tmp = target.path().to_path_buf();
        target.commit(&dest).unwrap();

        assert_eq!(fs::read(&dest).unwrap(), b"data");
        assert!(!tmp.exists());
    }

    #[test]
    fn test_commit_replaces_existing() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("out.zip");
        fs::write(&dest, b"old").unwrap();

        let mut target = TempTarget::create_in(dir.path(), "out.zip").unwrap();
        target.file_mut().write_all(b"new").unwrap();
        target.commit(&dest).unwrap();

        assert_eq!(fs::read(&dest).unwrap(), b"new");
    }

    #[test]
    fn test_drop_abandons_temp_and_keeps_original() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("out.zip");
        fs::write(&dest, b"original").unwrap();

        let tmp = {
            let mut target = TempTarget::create_in(dir.path(), "out.zip").unwrap();
            target.file_mut().write_all(b"partial").unwrap();
            target.path().to_path_buf()
        };

        assert!(!tmp.exists());
        assert_eq!(fs::read(&dest).unwrap(), b"original");
    }

    #[test]
    fn test_commit_if_absent() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("ab").join("object.gz");

        let mut first = TempTarget::create_in(dir.path(), "object").unwrap();
        first.file_mut().write_all(b"one").unwrap();
        assert!(first.commit_if_absent(&dest).unwrap());

        let mut second = TempTarget::create_in(dir.path(), "object").unwrap();
        second.file_mut().write_all(b"two").unwrap();
        assert!(!second.commit_if_absent(&dest).unwrap());

        assert_eq!(fs::read(&dest).unwrap(), b"one");
    }
}
