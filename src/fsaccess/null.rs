//! `null` variant: list-only. Every operation returns `NotImplemented`
//! (spec §4.3); used by the `list`/`dumprecord` CLI subcommands, which
//! never dispatch restore operations in the first place but need some
//! `FSAccess` to satisfy the reader's generic restore-dispatch signature.

use std::path::Path;

use crate::error::FsAccessError;
use crate::fsaccess::{FSAccess, FileHandle, Metadata};

pub struct NullFsAccess;

impl NullFsAccess {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NullFsAccess {
    fn default() -> Self {
        Self::new()
    }
}

impl FSAccess for NullFsAccess {
    fn open(&self, _path: &Path) -> Result<Box<dyn FileHandle>, FsAccessError> {
        Err(FsAccessError::NotImplemented)
    }
    fn creat(&self, _path: &Path, _tmp_path: &Path, _overwrite: bool, _mode: u32) -> Result<Box<dyn FileHandle>, FsAccessError> {
        Err(FsAccessError::NotImplemented)
    }
    fn stat(&self, _path: &Path) -> Result<Metadata, FsAccessError> {
        Err(FsAccessError::NotImplemented)
    }
    fn lstat(&self, _path: &Path) -> Result<Metadata, FsAccessError> {
        Err(FsAccessError::NotImplemented)
    }
    fn lutimes(&self, _path: &Path, _atime_ns: u64, _mtime_ns: u64) -> Result<(), FsAccessError> {
        Err(FsAccessError::NotImplemented)
    }
    fn lchown(&self, _path: &Path, _uid: u32, _gid: u32) -> Result<(), FsAccessError> {
        Err(FsAccessError::NotImplemented)
    }
    fn chmod(&self, _path: &Path, _mode: u32) -> Result<(), FsAccessError> {
        Err(FsAccessError::NotImplemented)
    }
    fn unlink(&self, _path: &Path) -> Result<(), FsAccessError> {
        Err(FsAccessError::NotImplemented)
    }
    fn rmdir(&self, _path: &Path) -> Result<(), FsAccessError> {
        Err(FsAccessError::NotImplemented)
    }
    fn link(&self, _existing: &Path, _new_path: &Path) -> Result<(), FsAccessError> {
        Err(FsAccessError::NotImplemented)
    }
    fn symlink(&self, _target: &str, _path: &Path) -> Result<(), FsAccessError> {
        Err(FsAccessError::NotImplemented)
    }
    fn readlink(&self, _path: &Path) -> Result<String, FsAccessError> {
        Err(FsAccessError::NotImplemented)
    }
    fn scandir(&self, _path: &Path) -> Result<Vec<String>, FsAccessError> {
        Err(FsAccessError::NotImplemented)
    }
    fn mkdir(&self, _path: &Path, _mode: u32) -> Result<(), FsAccessError> {
        Err(FsAccessError::NotImplemented)
    }
    fn mknod(&self, _path: &Path, _mode: u32, _rdev: u64) -> Result<(), FsAccessError> {
        Err(FsAccessError::NotImplemented)
    }
    fn llistxattr(&self, _path: &Path) -> Result<Vec<String>, FsAccessError> {
        Err(FsAccessError::NotImplemented)
    }
    fn lgetxattr(&self, _path: &Path, _name: &str) -> Result<Vec<u8>, FsAccessError> {
        Err(FsAccessError::NotImplemented)
    }
    fn lsetxattr(&self, _path: &Path, _name: &str, _value: &[u8]) -> Result<(), FsAccessError> {
        Err(FsAccessError::NotImplemented)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_op_is_not_implemented() {
        let fs = NullFsAccess::new();
        assert!(matches!(fs.stat(Path::new("/x")), Err(FsAccessError::NotImplemented)));
        assert!(matches!(fs.mkdir(Path::new("/x"), 0o755), Err(FsAccessError::NotImplemented)));
    }
}
