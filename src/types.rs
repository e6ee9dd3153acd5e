//! Core types shared across the loader, the string scanner and the hash
//! pipeline.

use serde::Serialize;

/// Encoding detected for a scanned string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StrEncoding {
    /// Printable 7-bit ASCII run.
    Ascii,
    /// Valid UTF-8 containing at least one multi-byte sequence.
    Utf8,
    /// UTF-16 little-endian code units.
    Utf16Le,
}

/// One string discovered by the scan engine.
///
/// `ordinal` is only meaningful after the final global sort; before the
/// merge step completes it is zero for every string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BinString {
    /// Decoded text payload.
    pub string: String,
    /// Length in characters.
    pub length: usize,
    /// Size in bytes including terminator/encoding overhead.
    pub size: usize,
    pub encoding: StrEncoding,
    /// Physical (file) offset.
    pub paddr: u64,
    /// Virtual address after translation through the bound object, or the
    /// physical offset when no object is bound or the offset is unmapped.
    pub vaddr: u64,
    /// Position in the final sorted result list.
    pub ordinal: u32,
}

/// One computed file hash: algorithm name plus its formatted value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileHashRecord {
    pub algo: String,
    pub hex: String,
}

/// A section of a parsed binary image.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Section {
    pub name: String,
    /// Physical offset within the owning file.
    pub paddr: u64,
    /// Virtual address once mapped.
    pub vaddr: u64,
    /// Size in bytes on disk.
    pub size: u64,
    /// Mapped size; equals `size` for most formats.
    pub vsize: u64,
    pub is_data: bool,
    pub has_strings: bool,
}

impl Section {
    /// Whether the section qualifies for a section-mode string scan.
    ///
    /// The `_const` substring catches the constant-data segments emitted by
    /// some language runtimes (Mach-O `__DATA_const`, split rodata).
    pub fn is_data_bearing(&self) -> bool {
        self.has_strings || self.is_data || self.name.contains("_const")
    }
}

/// A symbol record; also used for class methods.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BinSymbol {
    pub name: String,
    pub paddr: u64,
    pub vaddr: u64,
    pub size: u64,
    pub nargs: u32,
}

/// A named field inside a class record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BinField {
    pub name: String,
    pub vaddr: u64,
}

/// Summary information a plugin reports for a parsed image.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BinInfo {
    pub file: String,
    pub arch: String,
    pub machine: String,
    pub format: String,
    pub bits: u32,
    pub lang: Option<String>,
    pub has_crypto: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub file_hashes: Vec<FileHashRecord>,
}

/// Metadata an extractor plugin attaches to one embedded sub-binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XtrMetadata {
    pub arch: String,
    pub machine: String,
    pub format: String,
    pub bits: u32,
    pub has_crypto: bool,
}

/// Options applied when a plugin is bound to a buffer region.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadOptions {
    pub base_addr: u64,
    pub load_addr: u64,
}

/// An exception-handling region exposed by format plugins that carry
/// unwind/try-catch tables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TryCatchRegion {
    pub source: u64,
    pub from: u64,
    pub to: u64,
    pub handler: u64,
    pub filter: u64,
}
