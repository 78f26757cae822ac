//! End-to-end saveset round trips (spec §8): a real `writer::backup` run
//! through `FullFsAccess` followed by a real `reader::restore` run,
//! exercising plain files/dirs/symlinks/hardlinks, XOR-parity recovery
//! from a corrupted block, and incremental-restore pruning.

use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use std::sync::{Arc, Mutex};

use rand::RngCore;
use tempfile::tempdir;

use ftbackup::block::BLOCK_HEADER_SIZE;
use ftbackup::crypto::get_hasher;
use ftbackup::fsaccess::FullFsAccess;
use ftbackup::wildcard::Selector;
use ftbackup::{reader, writer, BlockHeader, ReaderOptions, WriterOptions};

fn sha1_hasher() -> Arc<Mutex<Box<dyn ftbackup::Hasher>>> {
    Arc::new(Mutex::new(get_hasher("SHA1").unwrap()))
}

/// Selector that restores everything under `src` to the same relative
/// layout under `dst`.
fn remap(src: &Path, dst: &Path) -> Vec<Selector> {
    vec![Selector::new(format!("{}**", src.display()), dst.display().to_string())]
}

fn writer_opts(block_size: u32, xorgc: u8, xorsc: u8) -> WriterOptions {
    WriterOptions {
        block_size,
        xorgc,
        xorsc,
        segment_size: 0,
        since_ns: 0,
        cipher: None,
        hasher: sha1_hasher(),
        key: None,
        verbose: false,
        verbose_period_secs: 0,
    }
}

fn reader_opts(block_size: u32, selectors: Vec<Selector>, incremental: bool) -> ReaderOptions {
    ReaderOptions {
        block_size,
        cipher: None,
        hasher: sha1_hasher(),
        key: None,
        selectors,
        incremental,
        mkdirs: true,
        overwrite: true,
        verbose: false,
        verbose_period_secs: 0,
        list_only: false,
    }
}

#[test]
fn basic_round_trip_preserves_tree() {
    let src = tempdir().unwrap();
    let dst = tempdir().unwrap();
    let saveset = tempdir().unwrap();
    let saveset_path = saveset.path().join("ss");

    fs::create_dir(src.path().join("sub")).unwrap();
    fs::write(src.path().join("sub/a.txt"), b"hello, ftbackup").unwrap();
    std::os::unix::fs::symlink("a.txt", src.path().join("sub/link")).unwrap();
    fs::hard_link(src.path().join("sub/a.txt"), src.path().join("sub/hard")).unwrap();

    let fs_access = FullFsAccess::new();
    let opts = writer_opts(4096, 2, 31);
    let stats = writer::backup(src.path(), &saveset_path, &fs_access, &opts, None).unwrap();
    assert_eq!(stats.files, 3); // a.txt, link, hard
    assert_eq!(stats.dirs, 2); // root + sub

    let ropts = reader_opts(4096, remap(src.path(), dst.path()), false);
    let rstats = reader::restore(&saveset_path, &fs_access, &ropts, ftbackup::simrderrs::SimRdErrs::disabled()).unwrap();
    assert_eq!(rstats.files_failed, 0);
    assert_eq!(rstats.files_lost, 0);

    let restored_sub = dst.path().join("sub");
    assert_eq!(fs::read(restored_sub.join("a.txt")).unwrap(), b"hello, ftbackup");
    assert_eq!(fs::read_link(restored_sub.join("link")).unwrap(), Path::new("a.txt"));

    let a_meta = fs::metadata(restored_sub.join("a.txt")).unwrap();
    let hard_meta = fs::metadata(restored_sub.join("hard")).unwrap();
    assert_eq!(a_meta.ino(), hard_meta.ino());
}

#[test]
fn xor_recovery_survives_one_corrupted_block() {
    let src = tempdir().unwrap();
    let dst = tempdir().unwrap();
    let saveset = tempdir().unwrap();
    let saveset_path = saveset.path().join("ss");

    // Low-compressibility content spanning several blocks at this tiny
    // block size so there's more than one data/parity span to corrupt
    // into.
    let mut rng = rand::thread_rng();
    for i in 0..3 {
        let mut buf = vec![0u8; 4000];
        rng.fill_bytes(&mut buf);
        fs::write(src.path().join(format!("f{i}.bin")), &buf).unwrap();
    }

    let fs_access = FullFsAccess::new();
    let block_size = 4096u32;
    let opts = writer_opts(block_size, 1, 1); // one data block per parity block
    writer::backup(src.path(), &saveset_path, &fs_access, &opts, None).unwrap();

    corrupt_second_data_block(&saveset_path, block_size);

    let ropts = reader_opts(block_size, remap(src.path(), dst.path()), false);
    let rstats = reader::restore(&saveset_path, &fs_access, &ropts, ftbackup::simrderrs::SimRdErrs::disabled()).unwrap();
    assert_eq!(rstats.files_failed, 0);
    assert_eq!(rstats.files_lost, 0);

    for i in 0..3 {
        let original = fs::read(src.path().join(format!("f{i}.bin"))).unwrap();
        let restored = fs::read(dst.path().join(format!("f{i}.bin"))).unwrap();
        assert_eq!(original, restored, "file f{i}.bin not recovered byte-for-byte");
    }
}

/// Flip the last byte of the second data block's hash tail so its hash
/// check fails on read, forcing the reader down the XOR-recovery path.
/// The first data block is left untouched since `Stream::open` needs it
/// to calibrate the baseline before any corruption can be tolerated.
fn corrupt_second_data_block(saveset_path: &Path, block_size: u32) {
    let mut raw = fs::read(saveset_path).unwrap();
    let block_size = block_size as usize;
    let mut data_blocks_seen = 0;
    let mut offset = 0;
    while offset + block_size <= raw.len() {
        let header = BlockHeader::read(&raw[offset..offset + block_size]).unwrap();
        if !header.is_parity() {
            data_blocks_seen += 1;
            if data_blocks_seen == 2 {
                let last = offset + block_size - 1;
                raw[last] ^= 0xFF;
                fs::write(saveset_path, &raw).unwrap();
                return;
            }
        }
        offset += block_size;
    }
    panic!("saveset did not contain a second data block; test setup needs more source data");
}

#[test]
fn incremental_restore_prunes_stale_entries() {
    let src = tempdir().unwrap();
    let dst = tempdir().unwrap();
    let saveset = tempdir().unwrap();
    let saveset_path = saveset.path().join("ss");

    fs::write(src.path().join("keep.txt"), b"keep me").unwrap();

    let fs_access = FullFsAccess::new();
    let opts = writer_opts(4096, 2, 31);
    writer::backup(src.path(), &saveset_path, &fs_access, &opts, None).unwrap();

    let ropts = reader_opts(4096, remap(src.path(), dst.path()), false);
    reader::restore(&saveset_path, &fs_access, &ropts, ftbackup::simrderrs::SimRdErrs::disabled()).unwrap();

    // A file with no archived counterpart, as if left over from a prior
    // restore of a tree that has since dropped it.
    fs::write(dst.path().join("stale.txt"), b"leftover").unwrap();
    assert!(dst.path().join("stale.txt").exists());

    let incr_opts = reader_opts(4096, remap(src.path(), dst.path()), true);
    let rstats = reader::restore(&saveset_path, &fs_access, &incr_opts, ftbackup::simrderrs::SimRdErrs::disabled()).unwrap();
    assert_eq!(rstats.files_failed, 0);

    assert!(!dst.path().join("stale.txt").exists());
    assert_eq!(fs::read(dst.path().join("keep.txt")).unwrap(), b"keep me");
}

#[test]
fn block_header_offset_math_matches_body_layout() {
    // Sanity check for the corruption helper above: the tail byte it
    // flips must fall after the body and before the next block.
    let body_len = 4096usize - BLOCK_HEADER_SIZE - 20; // SHA1 digest, no cipher
    assert!(BLOCK_HEADER_SIZE + body_len < 4096);
}
