//! # ftbackup — fault-tolerant backup saveset format
//!
//! Format guarantees (spec §9):
//! - All multi-byte fields are little-endian
//! - Every block is self-describing: magic, seqno, xorno, nonce never
//!   leave the clear, so the reader can locate and sort blocks without
//!   the decryption key
//! - Every block carries a keyed hash tail; a failed hash is resolved
//!   through XOR parity recovery before being reported as lost
//! - Data and parity blocks interleave in fixed spans of `xorgc * xorsc`
//!   data blocks followed by `xorgc` parity blocks; `xorgc == 0` disables
//!   parity entirely
//! - `FSAccess` is a closed three-variant catalog (`full`/`compare`/
//!   `null`); `Cipher`/`Hasher` are open catalogs looked up by name

pub mod block;
pub mod crypto;
pub mod error;
pub mod fsaccess;
pub mod header;
pub mod history;
pub mod perf;
pub mod queue;
pub mod reader;
pub mod segment;
pub mod simrderrs;
pub mod since;
pub mod varint;
pub mod wildcard;
pub mod writer;
pub mod xor;

pub use block::{Baseline, BlockHeader, BLOCK_HEADER_SIZE, BLOCK_MAGIC, DEFAULT_BLOCK_SIZE, DEFAULT_XORGC, DEFAULT_XORSC};
pub use crypto::{get_cipher, get_hasher, Cipher, Hasher, CryptoError, DEFAULT_CIPHER, DEFAULT_HASHER};
pub use error::{FsAccessError, HeaderError, ReaderError, SsError, WriterError};
pub use fsaccess::{CompareFsAccess, FSAccess, FileHandle, FullFsAccess, NullFsAccess};
pub use header::{FileHeader, HeaderRecord};
pub use reader::{restore, ReaderOptions, RestoreStats};
pub use writer::{backup, BackupStats, WriterOptions};
