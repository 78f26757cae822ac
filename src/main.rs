use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use clap::{Parser, Subcommand};

use ftbackup::crypto::derive_cipher_key;
use ftbackup::fsaccess::{CompareFsAccess, FSAccess, FullFsAccess, NullFsAccess};
use ftbackup::history::JsonlHistorySink;
use ftbackup::simrderrs::SimRdErrs;
use ftbackup::since::SinceFile;
use ftbackup::wildcard::Selector;
use ftbackup::{
    get_cipher, get_hasher, reader, segment, since, writer, BlockHeader, Cipher, Hasher,
    ReaderOptions, WriterOptions, DEFAULT_BLOCK_SIZE, DEFAULT_HASHER, DEFAULT_XORGC, DEFAULT_XORSC,
};

const EX_OK: i32 = 0;
const EX_CMD: i32 = 1;
const EX_SSIO: i32 = 2;
const EX_FILIO: i32 = 3;
const EX_HIST: i32 = 4;

#[derive(Parser)]
#[command(name = "ftbackup", version = "1.0.0", about = "Fault-tolerant backup saveset writer/reader with XOR parity recovery")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Walk a directory tree into a saveset
    Backup {
        saveset: PathBuf,
        rootpath: PathBuf,
        #[arg(long, default_value_t = DEFAULT_BLOCK_SIZE)]
        blocksize: u32,
        #[arg(long, default_value_t = DEFAULT_XORSC)]
        xorsc: u8,
        #[arg(long, default_value_t = DEFAULT_XORGC)]
        xorgc: u8,
        /// Segment size in bytes; 0 (default) keeps everything in one file
        #[arg(long, default_value_t = 0)]
        segsize: u64,
        /// Read a prior backup's cutoff from this file, then overwrite it for the next run
        #[arg(long)]
        since_file: Option<PathBuf>,
        /// Cipher name (AES, AES128, AES256); omit to leave the saveset unencrypted
        #[arg(long)]
        encrypt: Option<String>,
        #[arg(long, default_value = DEFAULT_HASHER)]
        hash: String,
        /// Hex-encoded key material
        #[arg(long)]
        key: Option<String>,
        /// Read raw key material from a file instead of -key
        #[arg(long)]
        key_file: Option<PathBuf>,
        /// Append one JSON line per archived file to this history log
        #[arg(long)]
        history: Option<PathBuf>,
        #[arg(long)]
        verbose: bool,
        #[arg(long, default_value_t = 0)]
        verbsec: u64,
        /// Accepted for compatibility with the historical CLI; O_DIRECT is not used
        #[arg(long)]
        direct: bool,
        /// Accepted for compatibility with the historical CLI; fsync is not called
        #[arg(long)]
        sync: bool,
    },
    /// Restore a saveset onto the filesystem
    Restore {
        saveset: PathBuf,
        /// WILDCARD=MAPPING pair, repeatable; tried in order, first match wins
        #[arg(long = "select", value_parser = parse_select)]
        select: Vec<(String, String)>,
        #[arg(long)]
        decrypt: Option<String>,
        #[arg(long, default_value = DEFAULT_HASHER)]
        hash: String,
        #[arg(long)]
        key: Option<String>,
        #[arg(long)]
        key_file: Option<PathBuf>,
        #[arg(long, default_value_t = DEFAULT_BLOCK_SIZE)]
        blocksize: u32,
        /// Delete target entries with no archived counterpart
        #[arg(long)]
        incremental: bool,
        #[arg(long)]
        mkdirs: bool,
        #[arg(long)]
        overwrite: bool,
        #[arg(long)]
        verbose: bool,
        #[arg(long, default_value_t = 0)]
        verbsec: u64,
        #[arg(long, default_value_t = 0)]
        simrderrs: u64,
        #[arg(long)]
        simrderrs_log: Option<PathBuf>,
        #[arg(long)]
        simrderrs_replay: Option<PathBuf>,
    },
    /// Verify a saveset against an existing filesystem tree without writing
    Compare {
        saveset: PathBuf,
        #[arg(long = "select", value_parser = parse_select)]
        select: Vec<(String, String)>,
        #[arg(long)]
        decrypt: Option<String>,
        #[arg(long, default_value = DEFAULT_HASHER)]
        hash: String,
        #[arg(long)]
        key: Option<String>,
        #[arg(long)]
        key_file: Option<PathBuf>,
        #[arg(long, default_value_t = DEFAULT_BLOCK_SIZE)]
        blocksize: u32,
        #[arg(long)]
        verbose: bool,
        #[arg(long, default_value_t = 0)]
        verbsec: u64,
        #[arg(long, default_value_t = 0)]
        simrderrs: u64,
        #[arg(long)]
        simrderrs_log: Option<PathBuf>,
        #[arg(long)]
        simrderrs_replay: Option<PathBuf>,
    },
    /// List a saveset's contents without touching the filesystem
    List {
        saveset: PathBuf,
        #[arg(long = "select", value_parser = parse_select)]
        select: Vec<(String, String)>,
        #[arg(long)]
        decrypt: Option<String>,
        #[arg(long, default_value = DEFAULT_HASHER)]
        hash: String,
        #[arg(long)]
        key: Option<String>,
        #[arg(long)]
        key_file: Option<PathBuf>,
        #[arg(long, default_value_t = DEFAULT_BLOCK_SIZE)]
        blocksize: u32,
        #[arg(long)]
        verbose: bool,
    },
    /// Dump one block's cleartext header fields at a byte offset (diagnostic)
    Dumprecord {
        saveset: PathBuf,
        #[arg(long)]
        offset: u64,
        #[arg(long, default_value_t = DEFAULT_BLOCK_SIZE)]
        blocksize: u32,
    },
    /// Walk a whole saveset verifying XOR recoverability without restoring anything
    Xorvfy {
        saveset: PathBuf,
        #[arg(long)]
        decrypt: Option<String>,
        #[arg(long, default_value = DEFAULT_HASHER)]
        hash: String,
        #[arg(long)]
        key: Option<String>,
        #[arg(long)]
        key_file: Option<PathBuf>,
        #[arg(long, default_value_t = DEFAULT_BLOCK_SIZE)]
        blocksize: u32,
        #[arg(long)]
        verbose: bool,
        #[arg(long, default_value_t = 0)]
        simrderrs: u64,
        #[arg(long)]
        simrderrs_log: Option<PathBuf>,
    },
}

fn main() {
    let code = match Cli::parse().command {
        // ── Backup ───────────────────────────────────────────────────────
        Commands::Backup {
            saveset, rootpath, blocksize, xorsc, xorgc, segsize, since_file, encrypt, hash, key,
            key_file, history, verbose, verbsec, direct: _, sync: _,
        } => run_backup(
            saveset, rootpath, blocksize, xorsc, xorgc, segsize, since_file, encrypt, hash, key,
            key_file, history, verbose, verbsec,
        ),

        // ── Restore ──────────────────────────────────────────────────────
        Commands::Restore {
            saveset, select, decrypt, hash, key, key_file, blocksize, incremental, mkdirs,
            overwrite, verbose, verbsec, simrderrs, simrderrs_log, simrderrs_replay,
        } => {
            let opts = match build_reader_opts(
                blocksize, &decrypt, &hash, &key, &key_file, &select, incremental, mkdirs,
                overwrite, verbose, verbsec, false,
            ) {
                Ok(o) => o,
                Err(e) => return fail(EX_CMD, &e),
            };
            let simrderrs = match build_simrderrs(simrderrs, &simrderrs_log, &simrderrs_replay) {
                Ok(s) => s,
                Err(e) => return fail(EX_CMD, &e),
            };
            let fs = FullFsAccess::new();
            run_reader_mode(&saveset, &fs, &opts, simrderrs, "restore")
        }

        // ── Compare ──────────────────────────────────────────────────────
        Commands::Compare {
            saveset, select, decrypt, hash, key, key_file, blocksize, verbose, verbsec,
            simrderrs, simrderrs_log, simrderrs_replay,
        } => {
            let opts = match build_reader_opts(
                blocksize, &decrypt, &hash, &key, &key_file, &select, false, false, false,
                verbose, verbsec, false,
            ) {
                Ok(o) => o,
                Err(e) => return fail(EX_CMD, &e),
            };
            let simrderrs = match build_simrderrs(simrderrs, &simrderrs_log, &simrderrs_replay) {
                Ok(s) => s,
                Err(e) => return fail(EX_CMD, &e),
            };
            let fs = CompareFsAccess::new();
            run_reader_mode(&saveset, &fs, &opts, simrderrs, "compare")
        }

        // ── List ─────────────────────────────────────────────────────────
        Commands::List { saveset, select, decrypt, hash, key, key_file, blocksize, verbose } => {
            let opts = match build_reader_opts(
                blocksize, &decrypt, &hash, &key, &key_file, &select, false, false, false,
                verbose, 0, true,
            ) {
                Ok(o) => o,
                Err(e) => return fail(EX_CMD, &e),
            };
            let fs = NullFsAccess::new();
            run_reader_mode(&saveset, &fs, &opts, SimRdErrs::disabled(), "list")
        }

        // ── Dumprecord ───────────────────────────────────────────────────
        Commands::Dumprecord { saveset, offset, blocksize } => run_dumprecord(saveset, offset, blocksize),

        // ── Xorvfy ───────────────────────────────────────────────────────
        Commands::Xorvfy { saveset, decrypt, hash, key, key_file, blocksize, verbose, simrderrs, simrderrs_log } => {
            let opts = match build_reader_opts(
                blocksize, &decrypt, &hash, &key, &key_file, &[], false, false, false, verbose, 0, true,
            ) {
                Ok(o) => o,
                Err(e) => return fail(EX_CMD, &e),
            };
            let simrderrs = match build_simrderrs(simrderrs, &simrderrs_log, &None) {
                Ok(s) => s,
                Err(e) => return fail(EX_CMD, &e),
            };
            let fs = NullFsAccess::new();
            run_reader_mode(&saveset, &fs, &opts, simrderrs, "xorvfy")
        }
    };

    std::process::exit(code);
}

fn fail(code: i32, msg: &str) -> i32 {
    eprintln!("ftbackup: {msg}");
    code
}

#[allow(clippy::too_many_arguments)]
fn run_backup(
    saveset: PathBuf,
    rootpath: PathBuf,
    blocksize: u32,
    xorsc: u8,
    xorgc: u8,
    segsize: u64,
    since_file: Option<PathBuf>,
    encrypt: Option<String>,
    hash: String,
    key: Option<String>,
    key_file: Option<PathBuf>,
    history: Option<PathBuf>,
    verbose: bool,
    verbsec: u64,
) -> i32 {
    let hasher = match build_hasher(&hash) {
        Ok(h) => h,
        Err(e) => return fail(EX_CMD, &e),
    };
    let key_bytes = match read_key(&key, &key_file) {
        Ok(k) => k,
        Err(e) => return fail(EX_CMD, &e),
    };
    let cipher = match build_cipher(&encrypt, &key_bytes, &hash) {
        Ok(c) => c,
        Err(e) => return fail(EX_CMD, &e),
    };

    let baseline = ftbackup::Baseline { l2bs: blocksize.trailing_zeros() as u8, xorgc, xorsc };
    if !segment::is_valid_segsize(segsize, &baseline, blocksize as usize) {
        return fail(EX_CMD, "-segsize must be 0 or a multiple of the span size (blocksize * xorgc * (xorsc+1))");
    }

    let since_ns = match &since_file {
        Some(path) if path.exists() => match SinceFile::read(path) {
            Ok(sf) => sf.cutoff_ns(),
            Err(e) => return fail(EX_FILIO, &format!("reading -since-file: {e}")),
        },
        _ => 0,
    };

    let opts = WriterOptions {
        block_size: blocksize,
        xorgc,
        xorsc,
        segment_size: segsize,
        since_ns,
        cipher,
        hasher,
        key: key_bytes,
        verbose,
        verbose_period_secs: verbsec,
    };

    let history_sink: Option<Box<dyn ftbackup::history::HistorySink>> = match &history {
        Some(path) => match JsonlHistorySink::create(path) {
            Ok(s) => Some(Box::new(s)),
            Err(e) => return fail(EX_HIST, &format!("opening -history: {e}")),
        },
        None => None,
    };

    let fs = FullFsAccess::new();
    match writer::backup(&rootpath, &saveset, &fs, &opts, history_sink) {
        Ok(stats) => {
            if let Some(path) = &since_file {
                let mut sf = SinceFile::new();
                sf.record(now_ns(), "/");
                if let Err(e) = sf.write(path) {
                    return fail(EX_FILIO, &format!("writing -since-file: {e}"));
                }
            }
            println!(
                "{} files, {} dirs, {} bytes read, {} data blocks, {} parity blocks, {} segment(s)",
                stats.files, stats.dirs, stats.bytes_read, stats.data_blocks, stats.parity_blocks, stats.segments,
            );
            EX_OK
        }
        Err(e) => fail(EX_SSIO, &format!("backup failed: {e}")),
    }
}

fn run_reader_mode(
    saveset: &std::path::Path,
    fs: &dyn FSAccess,
    opts: &ReaderOptions,
    simrderrs: SimRdErrs,
    label: &str,
) -> i32 {
    match reader::restore(saveset, fs, opts, simrderrs) {
        Ok(stats) => {
            println!(
                "{label}: {} restored, {} dirs, {} skipped, {} failed, {} lost",
                stats.files_restored, stats.dirs_restored, stats.files_skipped, stats.files_failed, stats.files_lost,
            );
            if stats.files_failed > 0 || stats.files_lost > 0 { EX_FILIO } else { EX_OK }
        }
        Err(e) => fail(EX_SSIO, &format!("{label} failed: {e}")),
    }
}

fn run_dumprecord(saveset: PathBuf, offset: u64, blocksize: u32) -> i32 {
    let mut file = match std::fs::File::open(&saveset) {
        Ok(f) => f,
        Err(e) => return fail(EX_SSIO, &e.to_string()),
    };
    if let Err(e) = file.seek(SeekFrom::Start(offset)) {
        return fail(EX_SSIO, &e.to_string());
    }
    let mut raw = vec![0u8; blocksize as usize];
    if let Err(e) = file.read_exact(&mut raw) {
        return fail(EX_SSIO, &e.to_string());
    }
    match BlockHeader::read(&raw) {
        Ok(header) => {
            println!("── block @ offset {offset} ──────────────────────────────");
            println!("  seqno:   {}", header.seqno);
            println!("  xorno:   {} ({})", header.xorno, if header.is_parity() { "parity" } else { "data" });
            println!("  nonce:   {}", hex::encode(header.nonce));
            println!("  hdroffs: {} (meaningless if the saveset is encrypted and no -decrypt was given)", header.hdroffs);
            println!("  l2bs:    {} (block size {})", header.l2bs, 1u64 << header.l2bs);
            println!("  xorbc:   {}", header.xorbc);
            println!("  xorgc:   {}", header.xorgc);
            println!("  xorsc:   {}", header.xorsc);
            EX_OK
        }
        Err(e) => fail(EX_SSIO, &format!("bad block header: {e}")),
    }
}

// ── helpers ──────────────────────────────────────────────────────────────

fn parse_select(s: &str) -> Result<(String, String), String> {
    s.split_once('=').map(|(w, m)| (w.to_string(), m.to_string())).ok_or_else(|| format!("expected WILDCARD=MAPPING, got '{s}'"))
}

fn now_ns() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_nanos() as u64).unwrap_or(0)
}

fn read_key(key: &Option<String>, key_file: &Option<PathBuf>) -> Result<Option<Vec<u8>>, String> {
    if let Some(hexstr) = key {
        return hex::decode(hexstr).map(Some).map_err(|e| format!("-key: {e}"));
    }
    if let Some(path) = key_file {
        return std::fs::read(path).map(Some).map_err(|e| format!("-key-file: {e}"));
    }
    Ok(None)
}

fn build_hasher(name: &str) -> Result<Arc<Mutex<Box<dyn Hasher>>>, String> {
    get_hasher(name).map(|h| Arc::new(Mutex::new(h))).map_err(|e| e.to_string())
}

/// Build a keyed cipher from raw key material, hashing it down to the
/// cipher's key length the same way the reader must when it re-derives the
/// same key from the same `-key`/`-hash` pair (spec §6).
fn build_cipher(name: &Option<String>, key: &Option<Vec<u8>>, hash_name: &str) -> Result<Option<Arc<dyn Cipher>>, String> {
    let Some(name) = name else { return Ok(None) };
    let Some(key_bytes) = key else {
        return Err("-encrypt/-decrypt requires -key or -key-file".to_string());
    };
    let mut cipher = get_cipher(name).map_err(|e| e.to_string())?;
    let mut kdf_hasher = get_hasher(hash_name).map_err(|e| e.to_string())?;
    let derived = derive_cipher_key(kdf_hasher.as_mut(), key_bytes, cipher.default_key_size());
    cipher.set_key(&derived).map_err(|e| e.to_string())?;
    Ok(Some(Arc::from(cipher)))
}

#[allow(clippy::too_many_arguments)]
fn build_reader_opts(
    blocksize: u32,
    decrypt: &Option<String>,
    hash: &str,
    key: &Option<String>,
    key_file: &Option<PathBuf>,
    select: &[(String, String)],
    incremental: bool,
    mkdirs: bool,
    overwrite: bool,
    verbose: bool,
    verbsec: u64,
    list_only: bool,
) -> Result<ReaderOptions, String> {
    let hasher = build_hasher(hash)?;
    let key_bytes = read_key(key, key_file)?;
    let cipher = build_cipher(decrypt, &key_bytes, hash)?;
    let selectors = select.iter().map(|(w, m)| Selector::new(w.clone(), m.clone())).collect();
    Ok(ReaderOptions {
        block_size: blocksize,
        cipher,
        hasher,
        key: key_bytes,
        selectors,
        incremental,
        mkdirs,
        overwrite,
        verbose,
        verbose_period_secs: verbsec,
        list_only,
    })
}

fn build_simrderrs(modulus: u64, log: &Option<PathBuf>, replay: &Option<PathBuf>) -> Result<SimRdErrs, String> {
    if let Some(path) = replay {
        return SimRdErrs::from_replay_log(path).map_err(|e| format!("-simrderrs-replay: {e}"));
    }
    if modulus == 0 {
        return Ok(SimRdErrs::disabled());
    }
    Ok(SimRdErrs::new(modulus, log.clone()))
}
