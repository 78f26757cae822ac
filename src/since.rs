//! `since`-file persisted state (spec §6): "a sorted record of `(ctimens,
//! path)` tuples". Kept as a plain line-oriented text file rather than a
//! binary blob, matching this corpus's habit of small persisted-state
//! files being human-readable text (see [`crate::simrderrs`] for the
//! sibling replay-log format).
//!
//! A since-file is produced by one backup run (one line per archived
//! regular file / symlink / special, its path and the ctime the walker
//! observed) and consumed by a later run's `-since-file` flag. The
//! consuming run's cutoff is the newest ctime recorded, i.e. "don't
//! re-emit content for anything at least as old as the last backup".

use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;

/// One `(ctimens, path)` record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinceEntry {
    pub ctimens: u64,
    pub path: String,
}

/// A loaded since-file: entries kept sorted by ctime ascending, matching
/// the on-disk invariant so a consumer can binary-search or simply take
/// the last entry's ctime as the cutoff.
#[derive(Debug, Clone, Default)]
pub struct SinceFile {
    entries: Vec<SinceEntry>,
}

impl SinceFile {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Record one archived path's ctime. Call order need not be sorted;
    /// [`write`](Self::write) sorts before persisting.
    pub fn record(&mut self, ctimens: u64, path: impl Into<String>) {
        self.entries.push(SinceEntry { ctimens, path: path.into() });
    }

    /// The cutoff nanosecond ctime a later backup should pass as `since`:
    /// the newest ctime this file recorded, or 0 if empty (archive
    /// everything).
    pub fn cutoff_ns(&self) -> u64 {
        self.entries.iter().map(|e| e.ctimens).max().unwrap_or(0)
    }

    pub fn entries(&self) -> &[SinceEntry] {
        &self.entries
    }

    /// Persist as sorted-by-ctime `ctimens\tpath` lines.
    pub fn write(&mut self, path: &Path) -> io::Result<()> {
        self.entries.sort_by_key(|e| e.ctimens);
        let mut f = File::create(path)?;
        for e in &self.entries {
            writeln!(f, "{}\t{}", e.ctimens, e.path)?;
        }
        Ok(())
    }

    pub fn read(path: &Path) -> io::Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let mut entries = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            let (ctimens, rest) = line
                .split_once('\t')
                .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "malformed since-file line"))?;
            let ctimens: u64 = ctimens
                .parse()
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "bad ctimens field"))?;
            entries.push(SinceEntry { ctimens, path: rest.to_string() });
        }
        Ok(Self { entries })
    }
}

/// `true` iff a file with this ctime should have its content elided,
/// per spec §4.2: "the test is `ctime < since` -> skip", so a ctime
/// exactly equal to `since` still *includes* the file.
pub fn content_skipped(ctimens: u64, since: u64) -> bool {
    ctimens < since
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn roundtrip_sorted_on_write() {
        let mut s = SinceFile::new();
        s.record(300, "/c");
        s.record(100, "/a");
        s.record(200, "/b");
        let tmp = NamedTempFile::new().unwrap();
        s.write(tmp.path()).unwrap();

        let loaded = SinceFile::read(tmp.path()).unwrap();
        let ctimes: Vec<u64> = loaded.entries().iter().map(|e| e.ctimens).collect();
        assert_eq!(ctimes, vec![100, 200, 300]);
        assert_eq!(loaded.cutoff_ns(), 300);
    }

    #[test]
    fn equal_ctime_is_not_skipped() {
        assert!(!content_skipped(500, 500));
        assert!(content_skipped(499, 500));
    }

    #[test]
    fn empty_cutoff_is_zero() {
        assert_eq!(SinceFile::new().cutoff_ns(), 0);
    }
}
