//! `HistorySink` (spec §1/§6): the history database is an external
//! collaborator — "a pluggable secondary index mapping filenames and
//! savesets to block sequence numbers". The core only needs to hand each
//! archived filename's `(saveset-id, filename, seqno, timestamp)` tuple
//! to whatever is plugged in; this module defines that trait plus one
//! concrete reference sink ([`JsonlHistorySink`]) so the crate is usable
//! standalone without a real history database.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

/// One notification the compressor emits per archived filename (spec
/// §2 "Compressor... emits filename notifications into a history
/// queue").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub saveset_id: String,
    pub filename: String,
    pub seqno: u32,
    pub timestamp_ns: u64,
}

/// External collaborator interface (spec §6). The writer's history
/// thread calls `record` once per archived filename; implementations are
/// free to batch, index, or discard as they see fit.
pub trait HistorySink: Send {
    fn record(&mut self, rec: HistoryRecord) -> io::Result<()>;

    /// Called once when the history thread shuts down (null sentinel
    /// reached). Default no-op; a buffering sink would flush here.
    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Reference sink: one JSON object per line, matching this corpus's
/// existing `serde_json` dependency and its preference for line-oriented
/// persisted state (see [`crate::since`], [`crate::simrderrs`]) over a
/// real embedded database.
pub struct JsonlHistorySink {
    file: File,
}

impl JsonlHistorySink {
    pub fn create(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { file })
    }
}

impl HistorySink for JsonlHistorySink {
    fn record(&mut self, rec: HistoryRecord) -> io::Result<()> {
        let line = serde_json::to_string(&rec)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        writeln!(self.file, "{line}")
    }

    fn close(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// No-op sink used when `-history-spec` is not given.
pub struct NullHistorySink;

impl HistorySink for NullHistorySink {
    fn record(&mut self, _rec: HistoryRecord) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader};
    use tempfile::NamedTempFile;

    #[test]
    fn jsonl_sink_writes_one_line_per_record() {
        let tmp = NamedTempFile::new().unwrap();
        {
            let mut sink = JsonlHistorySink::create(tmp.path()).unwrap();
            sink.record(HistoryRecord {
                saveset_id: "ss1".into(),
                filename: "/a".into(),
                seqno: 1,
                timestamp_ns: 1000,
            })
            .unwrap();
            sink.record(HistoryRecord {
                saveset_id: "ss1".into(),
                filename: "/b".into(),
                seqno: 2,
                timestamp_ns: 2000,
            })
            .unwrap();
            sink.close().unwrap();
        }
        let lines: Vec<String> = BufReader::new(File::open(tmp.path()).unwrap())
            .lines()
            .map(|l| l.unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"filename\":\"/a\""));
    }

    #[test]
    fn null_sink_discards() {
        let mut sink = NullHistorySink;
        sink.record(HistoryRecord {
            saveset_id: "x".into(),
            filename: "/y".into(),
            seqno: 1,
            timestamp_ns: 0,
        })
        .unwrap();
    }
}
