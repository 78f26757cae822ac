//! The walker: traverses the source tree and feeds per-file headers and
//! raw payload buffers to the compressor (spec §4.2 "Walker
//! responsibilities"). Runs on the caller's thread — it is the pipeline's
//! driving producer (spec §5).

use std::collections::HashMap;
use std::path::Path;

use crate::error::WriterError;
use crate::fsaccess::{FSAccess, Metadata};
use crate::header::{self, FileHeader, HFL_HDLINK, HFL_XATTRS};
use crate::queue::SlotQueue;
use crate::wildcard;
use crate::writer::{ProducerSlot, WriterOptions};

/// In-tree signal file: causes the directory it sits in to be archived
/// as empty (no recursion, no child headers).
const SKIPDIR_SENTINEL: &str = "~SKIPDIR.FTB";
/// In-tree signal file: one wildcard per line, additive to any inherited
/// skip set, applied to children of the directory it sits in.
const SKIPNAMES_SENTINEL: &str = "~SKIPNAMES.FTB";

#[derive(Debug, Default, Clone, Copy)]
pub struct WalkStats {
    pub files: u64,
    pub dirs: u64,
    pub bytes_read: u64,
}

struct Walker<'a> {
    fs: &'a dyn FSAccess,
    opts: &'a WriterOptions,
    producer_q: &'a SlotQueue<ProducerSlot>,
    free_q: &'a SlotQueue<Vec<u8>>,
    next_fileno: u32,
    /// `(ino, mtimens) -> fileno`, populated only once a regular file's
    /// header has actually been emitted (see DESIGN.md's resolution of the
    /// since/hardlink open question).
    hardlinks: HashMap<(u64, u64), u32>,
    stats: WalkStats,
}

pub fn walk(
    root: &Path,
    fs: &dyn FSAccess,
    opts: &WriterOptions,
    producer_q: &SlotQueue<ProducerSlot>,
    free_q: &SlotQueue<Vec<u8>>,
) -> Result<WalkStats, WriterError> {
    let mut w = Walker {
        fs,
        opts,
        producer_q,
        free_q,
        next_fileno: 1,
        hardlinks: HashMap::new(),
        stats: WalkStats::default(),
    };
    let root_meta = w.lstat(root)?;
    w.walk_dir(root, root_meta.dev, &[])?;
    let end = header::encode_end_marker(w.next_fileno);
    w.producer_q.enqueue(ProducerSlot::Header(end));
    Ok(w.stats)
}

impl<'a> Walker<'a> {
    fn lstat(&self, path: &Path) -> Result<Metadata, WriterError> {
        self.fs.lstat(path).map_err(|e| WriterError::Source { path: path.display().to_string(), source: to_io(e) })
    }

    fn take_fileno(&mut self) -> u32 {
        let n = self.next_fileno;
        self.next_fileno += 1;
        n
    }

    /// Read a whole file's content, reusing a buffer handed back by the
    /// compressor through `free_q` when one is available (spec §5:
    /// "free-list pools for buffers and blocks").
    fn read_whole(&mut self, path: &Path, len: u64) -> Result<Vec<u8>, WriterError> {
        let mut handle = self
            .fs
            .open(path)
            .map_err(|e| WriterError::Source { path: path.display().to_string(), source: to_io(e) })?;
        let mut buf = self.free_q.try_dequeue().unwrap_or_default();
        buf.clear();
        buf.resize(len as usize, 0);
        let mut off = 0u64;
        while (off as usize) < buf.len() {
            let n = handle
                .pread(&mut buf[off as usize..], off)
                .map_err(|e| WriterError::Source { path: path.display().to_string(), source: to_io(e) })?;
            if n == 0 {
                // File shrank mid-backup: short reads pad with 0x69 (spec §8).
                for b in &mut buf[off as usize..] {
                    *b = 0x69;
                }
                break;
            }
            off += n as u64;
        }
        self.stats.bytes_read += buf.len() as u64;
        Ok(buf)
    }

    fn emit_header(&mut self, header: &FileHeader) -> Result<(), WriterError> {
        let bytes = header.encode().map_err(WriterError::Header)?;
        self.producer_q.enqueue(ProducerSlot::Header(bytes));
        Ok(())
    }

    fn emit_data(&mut self, buf: Vec<u8>) {
        self.producer_q.enqueue(ProducerSlot::Data { buf, pooled: false });
    }

    /// Like [`emit_data`](Self::emit_data), but marks the buffer as
    /// eligible to come back through `free_q` once the compressor is
    /// done deflating it, for [`read_whole`](Self::read_whole) to reuse.
    fn emit_data_pooled(&mut self, buf: Vec<u8>) {
        self.producer_q.enqueue(ProducerSlot::Data { buf, pooled: true });
    }

    fn base_header(&mut self, name: &str, m: &Metadata) -> FileHeader {
        FileHeader {
            mtimns: m.mtime_ns,
            ctimns: m.ctime_ns,
            atimns: m.atime_ns,
            size: 0,
            fileno: self.take_fileno(),
            stmode: m.mode,
            ownuid: m.uid,
            owngid: m.gid,
            flags: 0,
            name: name.to_string(),
            xattrs: Vec::new(),
        }
    }

    fn attach_xattrs(&self, path: &Path, header: &mut FileHeader) -> Result<(), WriterError> {
        let names = self
            .fs
            .llistxattr(path)
            .map_err(|e| WriterError::Source { path: path.display().to_string(), source: to_io(e) })?;
        if names.is_empty() {
            return Ok(());
        }
        header.flags |= HFL_XATTRS;
        for name in names {
            let value = self
                .fs
                .lgetxattr(path, &name)
                .map_err(|e| WriterError::Source { path: path.display().to_string(), source: to_io(e) })?;
            header.xattrs.push((name, value));
        }
        Ok(())
    }

    /// Read and parse `~SKIPNAMES.FTB` in `dir`, if present; returns
    /// additional wildcard patterns to append to the inherited set.
    fn read_skipnames(&mut self, dir: &Path) -> Result<Vec<String>, WriterError> {
        let path = dir.join(SKIPNAMES_SENTINEL);
        match self.fs.lstat(&path) {
            Ok(m) => {
                let bytes = self.read_whole(&path, m.size)?;
                let text = String::from_utf8_lossy(&bytes);
                Ok(text.lines().map(str::trim).filter(|l| !l.is_empty()).map(String::from).collect())
            }
            Err(_) => Ok(Vec::new()),
        }
    }

    fn has_skipdir(&self, dir: &Path) -> bool {
        self.fs.lstat(&dir.join(SKIPDIR_SENTINEL)).is_ok()
    }

    fn is_skipped(&self, name: &str, patterns: &[String]) -> bool {
        patterns.iter().any(|p| wildcard::matches(p, name))
    }

    fn walk_dir(&mut self, path: &Path, parent_dev: u64, inherited_skip: &[String]) -> Result<(), WriterError> {
        let meta = self.lstat(path)?;
        let is_mountpoint = meta.dev != parent_dev;
        let name = path.to_string_lossy().into_owned();

        let mut header = self.base_header(&name, &meta);
        self.attach_xattrs(path, &mut header)?;
        self.stats.dirs += 1;

        if is_mountpoint || self.has_skipdir(path) {
            header.size = 0;
            self.emit_header(&header)?;
            self.emit_data(header::encode_dir_children(&[]));
            return Ok(());
        }

        let mut skip = inherited_skip.to_vec();
        skip.extend(self.read_skipnames(path)?);

        let mut names = self
            .fs
            .scandir(path)
            .map_err(|e| WriterError::Source { path: path.display().to_string(), source: to_io(e) })?;
        names.retain(|n| n != SKIPDIR_SENTINEL && n != SKIPNAMES_SENTINEL && !self.is_skipped(n, &skip));

        let children_blob = header::encode_dir_children(&names);
        header.size = children_blob.len() as u64;
        self.emit_header(&header)?;
        self.emit_data(children_blob);

        for child_name in names {
            let child_path = path.join(&child_name);
            self.walk_entry(&child_path, meta.dev, &skip)?;
        }
        Ok(())
    }

    fn walk_entry(&mut self, path: &Path, parent_dev: u64, skip: &[String]) -> Result<(), WriterError> {
        let meta = self.lstat(path)?;

        if meta.is_socket() {
            return Ok(());
        }
        if meta.is_dir() {
            return self.walk_dir(path, parent_dev, skip);
        }

        let since_skip = meta.ctime_ns < self.opts.since_ns;
        let name = path.to_string_lossy().into_owned();

        if meta.is_regular() {
            self.stats.files += 1;
            let key = (meta.ino, meta.mtime_ns);

            if since_skip {
                // since elides both header and content for an up-to-date
                // regular file (spec §4.2). It is deliberately NOT recorded
                // in `hardlinks`: a fileno is only a valid HDLINK target once
                // its header has actually been emitted, so a hardlink
                // sibling of a since-skipped file falls back to being
                // archived as a fresh regular file rather than pointing at
                // a fileno nothing ever wrote (see DESIGN.md's resolution
                // of the since/hardlink open question).
                return Ok(());
            }

            if let Some(&earlier) = self.hardlinks.get(&key) {
                let mut header = self.base_header(&name, &meta);
                header.flags |= HFL_HDLINK;
                header.size = 4;
                self.attach_xattrs(path, &mut header)?;
                self.emit_header(&header)?;
                self.emit_data(earlier.to_le_bytes().to_vec());
                return Ok(());
            }

            let mut header = self.base_header(&name, &meta);
            self.hardlinks.insert(key, header.fileno);
            header.size = meta.size;
            self.attach_xattrs(path, &mut header)?;
            self.emit_header(&header)?;
            let data = self.read_whole(path, meta.size)?;
            self.emit_data_pooled(data);
            return Ok(());
        }

        if meta.is_symlink() {
            if since_skip {
                return Ok(());
            }
            self.stats.files += 1;
            let target = self
                .fs
                .readlink(path)
                .map_err(|e| WriterError::Source { path: path.display().to_string(), source: to_io(e) })?;
            let mut header = self.base_header(&name, &meta);
            header.size = target.len() as u64;
            self.attach_xattrs(path, &mut header)?;
            self.emit_header(&header)?;
            self.emit_data(target.into_bytes());
            return Ok(());
        }

        // Device / FIFO.
        if since_skip {
            return Ok(());
        }
        self.stats.files += 1;
        let mut header = self.base_header(&name, &meta);
        header.size = std::mem::size_of::<u64>() as u64;
        self.attach_xattrs(path, &mut header)?;
        self.emit_header(&header)?;
        self.emit_data(meta.rdev.to_le_bytes().to_vec());
        Ok(())
    }
}

fn to_io(e: crate::error::FsAccessError) -> std::io::Error {
    match e {
        crate::error::FsAccessError::Io(e) => e,
        other => std::io::Error::new(std::io::ErrorKind::Other, other.to_string()),
    }
}
