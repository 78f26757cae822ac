//! `full` variant: performs the actual restore/backup syscalls.
//!
//! Grounded on the `nix`-based syscall style seen in
//! `examples/other_examples/*tarball-context.rs.rs` (the pack's closest
//! analogue of direct POSIX metadata/xattr manipulation from Rust), using
//! `nix` (fs/user features), the `xattr` crate, and `libc` for the few
//! calls neither wraps (`mknod`'s raw `dev_t` packing).

use std::fs::{self, File, OpenOptions};
use std::os::unix::fs::{FileExt, MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use nix::sys::stat::{utimensat, Mode, SFlag, UtimensatFlags};
use nix::sys::time::TimeSpec;
use nix::unistd::{fchownat, FchownatFlags};

use crate::error::FsAccessError;
use crate::fsaccess::{sort_unsigned_byte, FSAccess, FileHandle, Metadata};

pub struct FullFsAccess;

impl FullFsAccess {
    pub fn new() -> Self {
        Self
    }
}

impl Default for FullFsAccess {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn meta_from_std(m: &fs::Metadata) -> Metadata {
    Metadata {
        mode: m.mode(),
        uid: m.uid(),
        gid: m.gid(),
        size: m.size(),
        mtime_ns: m.mtime() as u64 * 1_000_000_000 + m.mtime_nsec() as u64,
        ctime_ns: m.ctime() as u64 * 1_000_000_000 + m.ctime_nsec() as u64,
        atime_ns: m.atime() as u64 * 1_000_000_000 + m.atime_nsec() as u64,
        rdev: m.rdev(),
        ino: m.ino(),
        dev: m.dev(),
        nlink: m.nlink(),
    }
}

pub struct FullFileHandle {
    file: File,
    tmp_path: Option<PathBuf>,
    final_path: PathBuf,
    overwrite: bool,
}

impl FileHandle for FullFileHandle {
    fn pread(&mut self, buf: &mut [u8], offset: u64) -> Result<usize, FsAccessError> {
        Ok(self.file.read_at(buf, offset)?)
    }

    fn pwrite(&mut self, buf: &[u8], offset: u64) -> Result<usize, FsAccessError> {
        Ok(self.file.write_at(buf, offset)?)
    }

    fn set_len(&mut self, len: u64) -> Result<(), FsAccessError> {
        Ok(self.file.set_len(len)?)
    }

    fn fstat(&self) -> Result<Metadata, FsAccessError> {
        Ok(meta_from_std(&self.file.metadata()?))
    }

    fn close(self: Box<Self>) -> Result<(), FsAccessError> {
        drop(self.file);
        if let Some(tmp) = self.tmp_path {
            if self.overwrite || !self.final_path.exists() {
                fs::rename(&tmp, &self.final_path)?;
            } else {
                // No-overwrite: link the temp file in under the final name,
                // then unlink the temp name (spec §4.3 restore dispatch).
                fs::hard_link(&tmp, &self.final_path)?;
                fs::remove_file(&tmp)?;
            }
        }
        Ok(())
    }
}

impl FSAccess for FullFsAccess {
    fn open(&self, path: &Path) -> Result<Box<dyn FileHandle>, FsAccessError> {
        let file = File::open(path)?;
        Ok(Box::new(FullFileHandle { file, tmp_path: None, final_path: path.to_path_buf(), overwrite: true }))
    }

    fn creat(&self, path: &Path, tmp_path: &Path, overwrite: bool, mode: u32) -> Result<Box<dyn FileHandle>, FsAccessError> {
        let file = OpenOptions::new().write(true).create(true).truncate(true).open(tmp_path)?;
        file.set_permissions(fs::Permissions::from_mode(mode))?;
        Ok(Box::new(FullFileHandle {
            file,
            tmp_path: Some(tmp_path.to_path_buf()),
            final_path: path.to_path_buf(),
            overwrite,
        }))
    }

    fn stat(&self, path: &Path) -> Result<Metadata, FsAccessError> {
        Ok(meta_from_std(&fs::metadata(path)?))
    }

    fn lstat(&self, path: &Path) -> Result<Metadata, FsAccessError> {
        Ok(meta_from_std(&fs::symlink_metadata(path)?))
    }

    fn lutimes(&self, path: &Path, atime_ns: u64, mtime_ns: u64) -> Result<(), FsAccessError> {
        let atime = TimeSpec::new((atime_ns / 1_000_000_000) as i64, (atime_ns % 1_000_000_000) as i64);
        let mtime = TimeSpec::new((mtime_ns / 1_000_000_000) as i64, (mtime_ns % 1_000_000_000) as i64);
        utimensat(None, path, &atime, &mtime, UtimensatFlags::NoFollowSymlink)?;
        Ok(())
    }

    fn lchown(&self, path: &Path, uid: u32, gid: u32) -> Result<(), FsAccessError> {
        fchownat(None, path, Some(uid.into()), Some(gid.into()), FchownatFlags::NoFollowSymlink)?;
        Ok(())
    }

    fn chmod(&self, path: &Path, mode: u32) -> Result<(), FsAccessError> {
        fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
        Ok(())
    }

    fn unlink(&self, path: &Path) -> Result<(), FsAccessError> {
        Ok(fs::remove_file(path)?)
    }

    fn rmdir(&self, path: &Path) -> Result<(), FsAccessError> {
        Ok(fs::remove_dir(path)?)
    }

    fn link(&self, existing: &Path, new_path: &Path) -> Result<(), FsAccessError> {
        Ok(fs::hard_link(existing, new_path)?)
    }

    fn symlink(&self, target: &str, path: &Path) -> Result<(), FsAccessError> {
        Ok(std::os::unix::fs::symlink(target, path)?)
    }

    fn readlink(&self, path: &Path) -> Result<String, FsAccessError> {
        Ok(fs::read_link(path)?.to_string_lossy().into_owned())
    }

    fn scandir(&self, path: &Path) -> Result<Vec<String>, FsAccessError> {
        let mut names: Vec<String> = fs::read_dir(path)?
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        sort_unsigned_byte(&mut names);
        Ok(names)
    }

    fn mkdir(&self, path: &Path, mode: u32) -> Result<(), FsAccessError> {
        match fs::create_dir(path) {
            Ok(()) => {
                fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn mknod(&self, path: &Path, mode: u32, rdev: u64) -> Result<(), FsAccessError> {
        let kind = SFlag::from_bits_truncate(mode & libc::S_IFMT);
        let perm = Mode::from_bits_truncate(mode & 0o7777);
        nix::sys::stat::mknod(path, kind, perm, rdev)?;
        Ok(())
    }

    fn llistxattr(&self, path: &Path) -> Result<Vec<String>, FsAccessError> {
        let list = xattr::list(path)?;
        Ok(list.map(|n| n.to_string_lossy().into_owned()).collect())
    }

    fn lgetxattr(&self, path: &Path, name: &str) -> Result<Vec<u8>, FsAccessError> {
        Ok(xattr::get(path, name)?.unwrap_or_default())
    }

    fn lsetxattr(&self, path: &Path, name: &str, value: &[u8]) -> Result<(), FsAccessError> {
        Ok(xattr::set(path, name, value)?)
    }
}
