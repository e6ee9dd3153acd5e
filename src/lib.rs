//! # bincore - Binary file ingestion for reverse-engineering tools
//!
//! This library opens binary files (ELF, Mach-O, PE, fat containers and
//! anything else via a catch-all), resolves the right format plugin,
//! extracts embedded sub-binaries from multi-architecture containers, and
//! exposes the analyses a disassembler front end needs first: concurrent
//! string extraction, whole-file hashing, address translation and a
//! class/method registry populated during parsing.
//!
//! ## Usage
//!
//! ```no_run
//! use bincore::{Bin, LoadOptions};
//!
//! let mut bin = Bin::new();
//! let id = bin.open_path("my_binary".as_ref(), LoadOptions::default()).unwrap();
//! let bf = bin.file_by_id(id).unwrap();
//!
//! for s in bin.strings(bf, 0, false).unwrap() {
//!     println!("{:#010x}: {}", s.vaddr, s.string);
//! }
//! ```
//!
//! All state lives in the [`Bin`] session object; there is no process
//! global. Several files can be open at once, with an explicit "current"
//! selection for the operations that target one file.

mod buffer;
mod classify;
mod error;
mod file;
mod format;
mod hashes;
mod object;
mod plugin;
mod strscan;
mod types;

pub use buffer::{FileDesc, IoDesc, MemDesc, SharedBuf};
pub use classify::{scan_bytes, DetectedString, ScanOptions, MAX_UNI_BLOCKS};
pub use error::{BinError, Result};
pub use file::{Bin, BinFile, XtrSubBinary, DEFAULT_HASH_LIMIT, DEFAULT_MAX_STR_BUF};
pub use format::{ElfPlugin, FatMachXtr, MachOPlugin, PePlugin};
pub use object::{BinClass, BinObject, ClassTable, ParsedObject};
pub use plugin::{AnyPlugin, BinPlugin, XtrPlugin, DEFAULT_MIN_STR_LENGTH};
pub use strscan::{CfStringStrategy, PointerTableStrategy};
pub use types::{
    BinField, BinInfo, BinString, BinSymbol, FileHashRecord, LoadOptions, Section, StrEncoding,
    TryCatchRegion, XtrMetadata,
};

// Re-export goblin so library clients can parse binaries themselves
pub use goblin;
