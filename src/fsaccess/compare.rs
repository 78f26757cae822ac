//! `compare` variant: verifies a saveset against what's already on disk
//! instead of writing (spec §4.3 — "every 'write' op reads/stats the
//! existing filesystem and returns a DATA-COMPARE-MISMATCH error on any
//! divergence"). Read-only operations (`stat`/`scandir`/`readlink`/xattr
//! reads) simply delegate to the real filesystem.

use std::fs;
use std::os::unix::fs::{FileExt, MetadataExt};
use std::path::{Path, PathBuf};

use crate::error::FsAccessError;
use crate::fsaccess::full::FullFsAccess;
use crate::fsaccess::{sort_unsigned_byte, FSAccess, FileHandle, Metadata};

pub struct CompareFsAccess {
    full: FullFsAccess,
}

impl CompareFsAccess {
    pub fn new() -> Self {
        Self { full: FullFsAccess::new() }
    }
}

impl Default for CompareFsAccess {
    fn default() -> Self {
        Self::new()
    }
}

fn mismatch(path: &Path, detail: impl Into<String>) -> FsAccessError {
    FsAccessError::DataCompareMismatch { path: path.display().to_string(), detail: detail.into() }
}

pub struct CompareFileHandle {
    path: PathBuf,
    file: Option<fs::File>,
}

impl FileHandle for CompareFileHandle {
    fn pread(&mut self, buf: &mut [u8], offset: u64) -> Result<usize, FsAccessError> {
        match &self.file {
            Some(f) => Ok(f.read_at(buf, offset)?),
            None => Err(mismatch(&self.path, "file does not exist")),
        }
    }

    fn pwrite(&mut self, buf: &[u8], offset: u64) -> Result<usize, FsAccessError> {
        let file = self.file.as_ref().ok_or_else(|| mismatch(&self.path, "file does not exist"))?;
        let mut existing = vec![0u8; buf.len()];
        let n = file.read_at(&mut existing, offset)?;
        if n != buf.len() || existing != buf {
            return Err(mismatch(&self.path, format!("content differs at offset {offset}")));
        }
        Ok(buf.len())
    }

    fn set_len(&mut self, len: u64) -> Result<(), FsAccessError> {
        let file = self.file.as_ref().ok_or_else(|| mismatch(&self.path, "file does not exist"))?;
        let actual = file.metadata()?.size();
        if actual != len {
            return Err(mismatch(&self.path, format!("size {actual} != expected {len}")));
        }
        Ok(())
    }

    fn fstat(&self) -> Result<Metadata, FsAccessError> {
        let file = self.file.as_ref().ok_or_else(|| mismatch(&self.path, "file does not exist"))?;
        Ok(crate::fsaccess::full::meta_from_std(&file.metadata()?))
    }

    fn close(self: Box<Self>) -> Result<(), FsAccessError> {
        Ok(())
    }
}

impl FSAccess for CompareFsAccess {
    fn open(&self, path: &Path) -> Result<Box<dyn FileHandle>, FsAccessError> {
        self.full.open(path)
    }

    fn creat(&self, path: &Path, _tmp_path: &Path, _overwrite: bool, _mode: u32) -> Result<Box<dyn FileHandle>, FsAccessError> {
        let file = fs::File::open(path).ok();
        if file.is_none() {
            return Err(mismatch(path, "expected file does not exist"));
        }
        Ok(Box::new(CompareFileHandle { path: path.to_path_buf(), file }))
    }

    fn stat(&self, path: &Path) -> Result<Metadata, FsAccessError> {
        self.full.stat(path)
    }

    fn lstat(&self, path: &Path) -> Result<Metadata, FsAccessError> {
        self.full.lstat(path)
    }

    fn lutimes(&self, path: &Path, atime_ns: u64, mtime_ns: u64) -> Result<(), FsAccessError> {
        let m = self.full.lstat(path)?;
        if m.atime_ns != atime_ns || m.mtime_ns != mtime_ns {
            return Err(mismatch(path, "timestamps differ"));
        }
        Ok(())
    }

    fn lchown(&self, path: &Path, uid: u32, gid: u32) -> Result<(), FsAccessError> {
        let m = self.full.lstat(path)?;
        if m.uid != uid || m.gid != gid {
            return Err(mismatch(path, "ownership differs"));
        }
        Ok(())
    }

    fn chmod(&self, path: &Path, mode: u32) -> Result<(), FsAccessError> {
        let m = self.full.lstat(path)?;
        if m.mode & 0o7777 != mode & 0o7777 {
            return Err(mismatch(path, "permission bits differ"));
        }
        Ok(())
    }

    fn unlink(&self, path: &Path) -> Result<(), FsAccessError> {
        if path.exists() {
            return Err(mismatch(path, "expected file to not exist (incremental delete)"));
        }
        Ok(())
    }

    fn rmdir(&self, path: &Path) -> Result<(), FsAccessError> {
        if path.exists() {
            return Err(mismatch(path, "expected directory to not exist (incremental delete)"));
        }
        Ok(())
    }

    fn link(&self, existing: &Path, new_path: &Path) -> Result<(), FsAccessError> {
        let a = self.full.lstat(existing)?;
        let b = self.full.lstat(new_path)?;
        if a.ino != b.ino || a.dev != b.dev {
            return Err(mismatch(new_path, "not hardlinked to expected inode"));
        }
        Ok(())
    }

    fn symlink(&self, target: &str, path: &Path) -> Result<(), FsAccessError> {
        let actual = self.full.readlink(path)?;
        if actual != target {
            return Err(mismatch(path, format!("symlink target '{actual}' != expected '{target}'")));
        }
        Ok(())
    }

    fn readlink(&self, path: &Path) -> Result<String, FsAccessError> {
        self.full.readlink(path)
    }

    fn scandir(&self, path: &Path) -> Result<Vec<String>, FsAccessError> {
        let mut names = self.full.scandir(path)?;
        sort_unsigned_byte(&mut names);
        Ok(names)
    }

    fn mkdir(&self, path: &Path, mode: u32) -> Result<(), FsAccessError> {
        let m = self.full.lstat(path)?;
        if !m.is_dir() {
            return Err(mismatch(path, "expected a directory"));
        }
        if m.mode & 0o7777 != mode & 0o7777 {
            return Err(mismatch(path, "directory mode differs"));
        }
        Ok(())
    }

    fn mknod(&self, path: &Path, mode: u32, rdev: u64) -> Result<(), FsAccessError> {
        let m = self.full.lstat(path)?;
        if m.mode & libc::S_IFMT != mode & libc::S_IFMT || m.rdev != rdev {
            return Err(mismatch(path, "device node differs"));
        }
        Ok(())
    }

    fn llistxattr(&self, path: &Path) -> Result<Vec<String>, FsAccessError> {
        self.full.llistxattr(path)
    }

    fn lgetxattr(&self, path: &Path, name: &str) -> Result<Vec<u8>, FsAccessError> {
        self.full.lgetxattr(path, name)
    }

    fn lsetxattr(&self, path: &Path, name: &str, value: &[u8]) -> Result<(), FsAccessError> {
        let actual = self.full.lgetxattr(path, name)?;
        if actual != value {
            return Err(mismatch(path, format!("xattr '{name}' differs")));
        }
        Ok(())
    }
}
