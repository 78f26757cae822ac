//! Single-threaded reader (spec §4.3/§5: "the reader pipeline is
//! sequential and cooperative — there is no concurrency to speak of").
//! [`stream`] turns segment files into a header/payload pull API;
//! [`restore`] drives that stream into filesystem effects through an
//! [`crate::fsaccess::FSAccess`]; [`interactive`] handles the tty error
//! prompt named in spec §7.

pub mod interactive;
pub mod restore;
pub mod stream;

pub use stream::{Stream, StreamConfig};

use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::crypto::{Cipher, Hasher};
use crate::error::ReaderError;
use crate::fsaccess::FSAccess;
use crate::simrderrs::SimRdErrs;
use crate::wildcard::Selector;

/// Tunables for one restore/compare/list run (spec §6).
#[derive(Clone)]
pub struct ReaderOptions {
    pub block_size: u32,
    pub cipher: Option<Arc<dyn Cipher>>,
    pub hasher: Arc<Mutex<Box<dyn Hasher>>>,
    pub key: Option<Vec<u8>>,
    /// `<wildcard> -to <mapping>` pairs, tried in order (spec §4.4). Empty
    /// means "restore everything to its originally archived path".
    pub selectors: Vec<Selector>,
    pub incremental: bool,
    pub mkdirs: bool,
    pub overwrite: bool,
    pub verbose: bool,
    pub verbose_period_secs: u64,
    /// Used by `list`/`xorvfy`: walk the whole saveset without touching
    /// the target `fs` at all, just tallying what was seen.
    pub list_only: bool,
}

/// Counts returned once a restore/compare/list run completes.
#[derive(Debug, Default, Clone)]
pub struct RestoreStats {
    pub files_restored: u64,
    pub dirs_restored: u64,
    pub files_skipped: u64,
    pub files_failed: u64,
    pub files_lost: u64,
}

/// Restore a saveset through `fs` (spec §4.3). `fs` determines the
/// behavior: [`crate::fsaccess::FullFsAccess`] performs real restoration,
/// [`crate::fsaccess::CompareFsAccess`] verifies without writing, and
/// [`crate::fsaccess::NullFsAccess`] (with `opts.list_only`) just walks
/// the header stream.
pub fn restore(
    saveset_base: &Path,
    fs: &dyn FSAccess,
    opts: &ReaderOptions,
    simrderrs: SimRdErrs,
) -> Result<RestoreStats, ReaderError> {
    restore::run(saveset_base, fs, opts, simrderrs)
}
