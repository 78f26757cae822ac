//! Simulated-read-error injection (spec §4.3/§6): `simrderrs` is a
//! modulus that periodically makes the reader act as though a saveset
//! read failed, exercising the XOR-recovery and resync paths without
//! needing actually corrupted media. Every injected failure is appended
//! to a line-oriented replay log of `(offset, timeval, timeval)` tuples
//! so a test run can be reproduced exactly from the log instead of the
//! modulus.

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// One logged simulated failure: the byte offset it hit, and the wall-clock
/// span (start, end) the injected failure occupied — kept for reproducing
/// timing-sensitive test runs, not for correctness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimRdErrEntry {
    pub offset: u64,
    pub start_us: u64,
    pub end_us: u64,
}

fn now_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

/// Reproducible read-error injector. Two modes:
///
/// - **Recording**: a `modulus > 0` makes every `modulus`-th call to
///   [`should_fail`](Self::should_fail) report a failure; each failure is
///   appended to the replay log if one is configured.
/// - **Replaying**: when constructed from a replay log
///   ([`SimRdErrs::from_replay_log`]), failures are injected at exactly
///   the logged offsets regardless of call count, so a flaky test run can
///   be reproduced byte-for-byte.
pub struct SimRdErrs {
    modulus: u64,
    calls: u64,
    replay: Option<Vec<u64>>,
    replay_idx: usize,
    log_path: Option<PathBuf>,
}

impl SimRdErrs {
    /// Inject a failure every `modulus` calls (`modulus == 0` disables
    /// injection entirely). Failures are appended to `log_path` if given.
    pub fn new(modulus: u64, log_path: Option<PathBuf>) -> Self {
        Self { modulus, calls: 0, replay: None, replay_idx: 0, log_path }
    }

    pub fn disabled() -> Self {
        Self::new(0, None)
    }

    /// Load a prior replay log and inject failures at exactly the logged
    /// offsets, in order, ignoring `modulus`.
    pub fn from_replay_log(path: &Path) -> io::Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let mut offsets = Vec::new();
        for line in reader.lines() {
            let line = line?;
            let mut parts = line.split('\t');
            let offset: u64 = parts
                .next()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "bad simrderrs offset"))?;
            offsets.push(offset);
        }
        Ok(Self { modulus: 0, calls: 0, replay: Some(offsets), replay_idx: 0, log_path: None })
    }

    /// Call once per saveset read attempt at `offset`. Returns `true` if
    /// this read should be made to fail.
    pub fn should_fail(&mut self, offset: u64) -> bool {
        if let Some(replay) = &self.replay {
            if self.replay_idx < replay.len() && replay[self.replay_idx] == offset {
                self.replay_idx += 1;
                return true;
            }
            return false;
        }

        self.calls += 1;
        if self.modulus == 0 || self.calls % self.modulus != 0 {
            return false;
        }
        let start_us = now_us();
        let end_us = now_us();
        if let Some(path) = &self.log_path {
            let _ = self.append_log(path, offset, start_us, end_us);
        }
        true
    }

    fn append_log(&self, path: &Path, offset: u64, start_us: u64, end_us: u64) -> io::Result<()> {
        let mut f = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(f, "{offset}\t{start_us}\t{end_us}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn modulus_zero_never_fails() {
        let mut s = SimRdErrs::disabled();
        for off in 0..10 {
            assert!(!s.should_fail(off));
        }
    }

    #[test]
    fn modulus_three_fails_every_third_call() {
        let mut s = SimRdErrs::new(3, None);
        let results: Vec<bool> = (0..6).map(|off| s.should_fail(off)).collect();
        assert_eq!(results, vec![false, false, true, false, false, true]);
    }

    #[test]
    fn recorded_failures_replay_identically() {
        let log = NamedTempFile::new().unwrap();
        let mut s = SimRdErrs::new(2, Some(log.path().to_path_buf()));
        let offsets = [10u64, 20, 30, 40];
        let first: Vec<bool> = offsets.iter().map(|&o| s.should_fail(o)).collect();

        let mut replay = SimRdErrs::from_replay_log(log.path()).unwrap();
        let second: Vec<bool> = offsets.iter().map(|&o| replay.should_fail(o)).collect();
        assert_eq!(first, second);
    }
}
