//! Crate-wide error types.
//!
//! Each layer gets its own `thiserror`-derived enum rather than one
//! monolithic error, matching the per-module error style used throughout
//! this codebase. [`SsError`] additionally carries the two exception-like
//! control-flow values the reference implementation raised as C++
//! exceptions (`LostSSBlock`, `EndOfSSFile`); the reader's dispatch loop
//! matches on them explicitly instead of unwinding.

use thiserror::Error;

/// Saveset-layer control flow and I/O failures.
#[derive(Error, Debug)]
pub enum SsError {
    #[error("block {0} is lost and cannot be recovered")]
    BlockLost(u32),

    #[error("end of saveset reached")]
    SavesetEnded,

    #[error("saveset I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("block header invalid: {0}")]
    BadBlock(String),

    #[error("block hash verification failed at seqno {0}")]
    HashMismatch(u32),

    #[error("no decryption key supplied but saveset is encrypted")]
    MissingKey,

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("segment {0} not found")]
    SegmentNotFound(String),
}

/// Cipher/hasher catalog and CBC-transform errors.
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("unknown cipher {name}")]
    UnknownCipher { name: String },

    #[error("unknown hasher {name}")]
    UnknownHasher { name: String },

    #[error("cipher key length {got} does not match required length {want}")]
    BadKeyLength { got: usize, want: usize },

    #[error("buffer length {0} is not a multiple of the cipher block size")]
    Unaligned(usize),
}

/// Header/path encoding errors (varint, directory delta, xattrs).
#[derive(Error, Debug)]
pub enum HeaderError {
    #[error("truncated header")]
    Truncated,

    #[error("header magic mismatch")]
    BadMagic,

    #[error("varint is longer than the maximum allowed width")]
    VarintOverflow,

    #[error("directory child name is malformed: {0}")]
    BadDirEntry(String),

    #[error("name is not valid UTF-8")]
    NotUtf8,
}

/// Target-filesystem failures raised by an [`crate::fsaccess::FSAccess`] implementation.
#[derive(Error, Debug)]
pub enum FsAccessError {
    #[error("operation not implemented by this FSAccess variant")]
    NotImplemented,

    #[error("data compare mismatch at {path}: {detail}")]
    DataCompareMismatch { path: String, detail: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Nix(#[from] nix::Error),
}

/// Top-level writer errors.
#[derive(Error, Debug)]
pub enum WriterError {
    #[error("source filesystem error at {path}: {source}")]
    Source { path: String, source: std::io::Error },

    #[error("a worker thread in the writer pipeline panicked")]
    WorkerPanicked,

    #[error(transparent)]
    Ss(#[from] SsError),

    #[error(transparent)]
    Header(#[from] HeaderError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Fs(#[from] FsAccessError),
}

/// Top-level reader/restore errors.
#[derive(Error, Debug)]
pub enum ReaderError {
    #[error(transparent)]
    Ss(#[from] SsError),

    #[error(transparent)]
    Header(#[from] HeaderError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Fs(#[from] FsAccessError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
