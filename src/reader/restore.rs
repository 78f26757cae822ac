//! Restore dispatch (spec §4.3 "Restore dispatch"): turns the header
//! stream into filesystem entries through an [`FSAccess`], applying
//! selector remapping, hardlink resolution, incremental directory
//! pruning, and deferred directory timestamps.
//!
//! Grounded on `examples/original_source/ftbreader.cpp`'s
//! `read_file`/`restore_regular`/`restore_directory`/`restore_symlink`
//! dispatch switch and its directory-timestamp stack.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{ReaderError, SsError};
use crate::fsaccess::FSAccess;
use crate::header::{FileHeader, HeaderRecord};
use crate::reader::interactive::{InteractiveAction, InteractiveHandler};
use crate::reader::stream::{Stream, StreamConfig};
use crate::reader::{ReaderOptions, RestoreStats};
use crate::simrderrs::SimRdErrs;
use crate::wildcard::{self, Selector, SelectResult};

struct PendingDirTime {
    path: PathBuf,
    atime_ns: u64,
    mtime_ns: u64,
}

/// `true` iff `name` (an archived path) is a strict descendant of `dir`.
fn path_is_under(name: &str, dir: &Path) -> bool {
    let dir_s = dir.to_string_lossy();
    name.len() > dir_s.len() && name.starts_with(dir_s.as_ref()) && name.as_bytes()[dir_s.len()] == b'/'
}

fn default_selectors(opts: &ReaderOptions) -> Vec<Selector> {
    if opts.selectors.is_empty() {
        // No explicit `<wildcard> -to <mapping>` pairs: restore everything
        // to its originally archived absolute path.
        vec![Selector::new("**", "")]
    } else {
        opts.selectors.clone()
    }
}

/// Payload byte count that follows a header record, independent of
/// whether the selector resolved it to a restore target (spec §3).
fn payload_len(h: &FileHeader) -> usize {
    if h.is_hardlink() {
        return 4;
    }
    match h.stmode & libc::S_IFMT {
        libc::S_IFCHR | libc::S_IFBLK | libc::S_IFIFO => 8,
        _ => h.size as usize,
    }
}

fn tmp_path_for(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_os_string();
    name.push(".ftbtmp");
    PathBuf::from(name)
}

fn mkdir_all(fs: &dyn FSAccess, dir: &Path) -> Result<(), ReaderError> {
    if dir.as_os_str().is_empty() || fs.lstat(dir).is_ok() {
        return Ok(());
    }
    if let Some(parent) = dir.parent() {
        mkdir_all(fs, parent)?;
    }
    fs.mkdir(dir, 0o755)?;
    Ok(())
}

fn ensure_parent_dirs(fs: &dyn FSAccess, target: &Path, mkdirs: bool) -> Result<(), ReaderError> {
    if !mkdirs {
        return Ok(());
    }
    if let Some(parent) = target.parent() {
        mkdir_all(fs, parent)?;
    }
    Ok(())
}

/// Recursively delete an existing filesystem entry that has no archived
/// counterpart (incremental restore pruning, spec §4.3).
fn remove_tree(fs: &dyn FSAccess, path: &Path) -> Result<(), ReaderError> {
    let meta = fs.lstat(path)?;
    if meta.is_dir() {
        for name in fs.scandir(path)? {
            remove_tree(fs, &path.join(name))?;
        }
        fs.rmdir(path)?;
    } else {
        fs.unlink(path)?;
    }
    Ok(())
}

/// Merge-walk the existing (sorted) directory listing against the
/// archived (sorted) child list, deleting every existing entry that
/// sorts strictly before the next archived name it hasn't been matched
/// against, plus any trailing extras (spec §4.3).
fn incremental_prune(fs: &dyn FSAccess, dir: &Path, archived_children: &[String]) -> Result<(), ReaderError> {
    let existing = fs.scandir(dir)?;
    let mut i = 0usize;
    let mut j = 0usize;
    while i < existing.len() {
        match archived_children.get(j) {
            Some(a) if existing[i].as_bytes() < a.as_bytes() => {
                remove_tree(fs, &dir.join(&existing[i]))?;
                i += 1;
            }
            Some(a) if existing[i] == *a => {
                i += 1;
                j += 1;
            }
            Some(_) => {
                j += 1;
            }
            None => {
                remove_tree(fs, &dir.join(&existing[i]))?;
                i += 1;
            }
        }
    }
    Ok(())
}

fn apply_common(fs: &dyn FSAccess, header: &FileHeader, target: &Path, is_symlink: bool) -> Result<(), ReaderError> {
    fs.lchown(target, header.ownuid, header.owngid)?;
    if !is_symlink {
        fs.chmod(target, header.stmode & 0o7777)?;
    }
    for (name, value) in &header.xattrs {
        fs.lsetxattr(target, name, value)?;
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn dispatch(
    fs: &dyn FSAccess,
    opts: &ReaderOptions,
    header: &FileHeader,
    target: &Path,
    payload: Vec<u8>,
    hardlink_map: &mut HashMap<u32, PathBuf>,
    dir_stack: &mut Vec<PendingDirTime>,
    stats: &mut RestoreStats,
) -> Result<(), ReaderError> {
    ensure_parent_dirs(fs, target, opts.mkdirs)?;

    if header.is_hardlink() {
        let fileno = u32::from_le_bytes(payload[..4].try_into().unwrap());
        if let Some(src) = hardlink_map.get(&fileno) {
            fs.link(src, target)?;
        }
        apply_common(fs, header, target, false)?;
        fs.lutimes(target, header.atimns, header.mtimns)?;
        stats.files_restored += 1;
        return Ok(());
    }

    match header.stmode & libc::S_IFMT {
        libc::S_IFDIR => {
            fs.mkdir(target, header.stmode & 0o7777)?;
            if opts.incremental {
                let children = crate::header::decode_dir_children(&payload)?;
                incremental_prune(fs, target, &children)?;
            }
            apply_common(fs, header, target, false)?;
            dir_stack.push(PendingDirTime { path: target.to_path_buf(), atime_ns: header.atimns, mtime_ns: header.mtimns });
            stats.dirs_restored += 1;
        }
        libc::S_IFLNK => {
            let link_target = String::from_utf8(payload).map_err(|_| crate::error::HeaderError::NotUtf8)?;
            fs.symlink(&link_target, target)?;
            apply_common(fs, header, target, true)?;
            fs.lutimes(target, header.atimns, header.mtimns)?;
            stats.files_restored += 1;
        }
        libc::S_IFCHR | libc::S_IFBLK | libc::S_IFIFO => {
            let rdev = u64::from_le_bytes(payload[..8].try_into().unwrap());
            fs.mknod(target, header.stmode, rdev)?;
            apply_common(fs, header, target, false)?;
            fs.lutimes(target, header.atimns, header.mtimns)?;
            stats.files_restored += 1;
        }
        _ => {
            let tmp = tmp_path_for(target);
            let mut handle = fs.creat(target, &tmp, opts.overwrite, header.stmode & 0o7777)?;
            handle.set_len(header.size)?;
            if !payload.is_empty() {
                handle.pwrite(&payload, 0)?;
            }
            handle.close()?;
            hardlink_map.insert(header.fileno, target.to_path_buf());
            apply_common(fs, header, target, false)?;
            fs.lutimes(target, header.atimns, header.mtimns)?;
            stats.files_restored += 1;
        }
    }
    Ok(())
}

/// Drive a saveset header-by-header, dispatching each selected entry
/// through `fs`. Used for `restore` (full FSAccess), `compare` (compare
/// FSAccess), and `list`/`xorvfy` (null FSAccess with `list_only`).
pub(crate) fn run(
    saveset_base: &Path,
    fs: &dyn FSAccess,
    opts: &ReaderOptions,
    simrderrs: SimRdErrs,
) -> Result<RestoreStats, ReaderError> {
    let cfg = StreamConfig {
        block_size: opts.block_size,
        cipher: opts.cipher.clone(),
        hasher: opts.hasher.clone(),
        key: opts.key.clone(),
    };
    let mut stream = Stream::open(saveset_base, cfg, simrderrs)?;
    let mut interactive = InteractiveHandler::new();
    let mut stats = RestoreStats::default();
    let mut hardlink_map: HashMap<u32, PathBuf> = HashMap::new();
    let mut dir_stack: Vec<PendingDirTime> = Vec::new();
    let mut last_fileno_completed: u32 = 0;
    let selectors = default_selectors(opts);

    'outer: loop {
        let header = match next_header_retrying(&mut stream, &mut interactive)? {
            Some(HeaderRecord::File(h)) => h,
            Some(HeaderRecord::End) | None => break,
        };

        if header.fileno > last_fileno_completed + 1 {
            stats.files_lost += (header.fileno - last_fileno_completed - 1) as u64;
        }
        last_fileno_completed = header.fileno;

        while let Some(top) = dir_stack.last() {
            if path_is_under(&header.name, &top.path) {
                break;
            }
            let top = dir_stack.pop().unwrap();
            let _ = fs.lutimes(&top.path, top.atime_ns, top.mtime_ns);
        }

        let plen = payload_len(&header);
        match wildcard::select(&selectors, &header.name) {
            SelectResult::Done => break 'outer,
            SelectResult::Skip => {
                if read_payload_retrying(&mut stream, &mut interactive, plen)?.is_none() {
                    break 'outer;
                }
                stats.files_skipped += 1;
            }
            SelectResult::To(path) => {
                let payload = match read_payload_retrying(&mut stream, &mut interactive, plen)? {
                    Some(p) => p,
                    None => break 'outer,
                };
                if opts.list_only {
                    stats.files_restored += 1;
                    if opts.verbose {
                        println!("{} {} {}", header.fileno, header.stmode, header.name);
                    }
                    continue;
                }
                let target = PathBuf::from(path);
                match dispatch(fs, opts, &header, &target, payload, &mut hardlink_map, &mut dir_stack, &mut stats) {
                    Ok(()) => {}
                    Err(e) => {
                        stats.files_failed += 1;
                        if opts.verbose {
                            eprintln!("ftbackup: restore failed for {}: {e}", target.display());
                        }
                    }
                }
            }
        }
    }

    while let Some(top) = dir_stack.pop() {
        let _ = fs.lutimes(&top.path, top.atime_ns, top.mtime_ns);
    }

    Ok(stats)
}

/// `next_header` wrapped with the interactive-error escalation (spec
/// §7). `Ok(None)` means the operator chose to abort/close early.
fn next_header_retrying(
    stream: &mut Stream,
    interactive: &mut InteractiveHandler,
) -> Result<Option<HeaderRecord>, ReaderError> {
    loop {
        match stream.next_header() {
            Ok(rec) => return Ok(Some(rec)),
            Err(ReaderError::Ss(SsError::SavesetEnded)) => return Ok(Some(HeaderRecord::End)),
            Err(ReaderError::Io(e)) => match interactive.on_unrecoverable(&e.to_string()) {
                InteractiveAction::Retry => continue,
                InteractiveAction::Skip | InteractiveAction::SkipAll => return Ok(Some(HeaderRecord::End)),
                InteractiveAction::Abort | InteractiveAction::Close => return Ok(None),
            },
            Err(e) => return Err(e),
        }
    }
}

fn read_payload_retrying(
    stream: &mut Stream,
    interactive: &mut InteractiveHandler,
    len: usize,
) -> Result<Option<Vec<u8>>, ReaderError> {
    loop {
        match stream.read_payload(len) {
            Ok(buf) => return Ok(Some(buf)),
            Err(ReaderError::Ss(SsError::SavesetEnded)) => return Ok(None),
            Err(ReaderError::Io(e)) => match interactive.on_unrecoverable(&e.to_string()) {
                InteractiveAction::Retry => continue,
                InteractiveAction::Skip | InteractiveAction::SkipAll => return Ok(None),
                InteractiveAction::Abort | InteractiveAction::Close => return Ok(None),
            },
            Err(e) => return Err(e),
        }
    }
}
