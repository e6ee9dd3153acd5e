//! Built-in format plugins on top of goblin: ELF, Mach-O, PE, plus the fat
//! Mach-O extractor for multi-architecture containers.
//!
//! These cover the capability contract the core needs (sections, info,
//! address layout); they are deliberately not full-fidelity parsers.

use std::sync::Arc;

use goblin::elf::Elf;
use goblin::mach::{Mach, MachO};
use goblin::pe::PE;
use log::debug;

use crate::buffer::SharedBuf;
use crate::error::{BinError, Result};
use crate::file::XtrSubBinary;
use crate::object::ParsedObject;
use crate::plugin::{BinPlugin, XtrPlugin};
use crate::types::{BinInfo, BinSymbol, LoadOptions, Section, XtrMetadata};

fn arch_from_elf_machine(machine: u16) -> &'static str {
    match machine {
        goblin::elf::header::EM_X86_64 => "x86",
        goblin::elf::header::EM_386 => "x86",
        goblin::elf::header::EM_AARCH64 => "arm",
        goblin::elf::header::EM_ARM => "arm",
        _ => "unknown",
    }
}

fn machine_from_elf(machine: u16) -> &'static str {
    match machine {
        goblin::elf::header::EM_X86_64 => "x86-64",
        goblin::elf::header::EM_386 => "i386",
        goblin::elf::header::EM_AARCH64 => "aarch64",
        goblin::elf::header::EM_ARM => "arm",
        _ => "unknown",
    }
}

pub(crate) fn arch_from_macho_cputype(cputype: u32) -> &'static str {
    use goblin::mach::cputype::{CPU_TYPE_ARM, CPU_TYPE_ARM64, CPU_TYPE_X86, CPU_TYPE_X86_64};
    match cputype {
        CPU_TYPE_X86 | CPU_TYPE_X86_64 => "x86",
        CPU_TYPE_ARM | CPU_TYPE_ARM64 => "arm",
        _ => "unknown",
    }
}

fn arch_from_pe_machine(machine: u16) -> &'static str {
    use goblin::pe::header::{
        COFF_MACHINE_ARM64, COFF_MACHINE_ARMNT, COFF_MACHINE_X86, COFF_MACHINE_X86_64,
    };
    match machine {
        COFF_MACHINE_X86 | COFF_MACHINE_X86_64 => "x86",
        COFF_MACHINE_ARM64 | COFF_MACHINE_ARMNT => "arm",
        _ => "unknown",
    }
}

/// ELF format plugin.
#[derive(Debug)]
pub struct ElfPlugin;

impl BinPlugin for ElfPlugin {
    fn name(&self) -> &'static str {
        "elf"
    }

    fn matches(&self, buf: &[u8]) -> bool {
        buf.starts_with(&[0x7f, b'E', b'L', b'F'])
    }

    fn matches_filename(&self, filename: &str) -> bool {
        filename.ends_with(".so") || filename.ends_with(".o")
    }

    fn parse(&self, buf: &[u8], opts: &LoadOptions) -> Result<ParsedObject> {
        let elf = Elf::parse(buf).map_err(|e| BinError::Parse {
            plugin: "elf",
            reason: e.to_string(),
        })?;

        use goblin::elf::section_header::{SHF_ALLOC, SHF_EXECINSTR, SHT_PROGBITS, SHT_STRTAB};
        let mut sections = Vec::with_capacity(elf.section_headers.len());
        for sh in &elf.section_headers {
            let name = elf
                .shdr_strtab
                .get_at(sh.sh_name)
                .unwrap_or_default()
                .to_string();
            let alloc = sh.sh_flags & u64::from(SHF_ALLOC) != 0;
            let exec = sh.sh_flags & u64::from(SHF_EXECINSTR) != 0;
            sections.push(Section {
                is_data: sh.sh_type == SHT_PROGBITS && alloc && !exec,
                has_strings: sh.sh_type == SHT_STRTAB,
                name,
                paddr: sh.sh_offset,
                vaddr: sh.sh_addr,
                size: sh.sh_size,
                vsize: sh.sh_size,
            });
        }

        let mut symbols = Vec::new();
        for sym in elf.syms.iter() {
            if let Some(name) = elf.strtab.get_at(sym.st_name) {
                if !name.is_empty() {
                    symbols.push(BinSymbol {
                        name: name.to_string(),
                        vaddr: sym.st_value,
                        size: sym.st_size,
                        ..BinSymbol::default()
                    });
                }
            }
        }

        Ok(ParsedObject {
            base_addr: opts.base_addr,
            size: None,
            sections,
            symbols,
            info: BinInfo {
                arch: arch_from_elf_machine(elf.header.e_machine).into(),
                machine: machine_from_elf(elf.header.e_machine).into(),
                format: "elf".into(),
                bits: if elf.is_64 { 64 } else { 32 },
                ..BinInfo::default()
            },
            lang: None,
        })
    }
}

/// Mach-O (thin) format plugin.
#[derive(Debug)]
pub struct MachOPlugin;

impl BinPlugin for MachOPlugin {
    fn name(&self) -> &'static str {
        "mach0"
    }

    fn matches(&self, buf: &[u8]) -> bool {
        use goblin::mach::header::{MH_CIGAM, MH_CIGAM_64, MH_MAGIC, MH_MAGIC_64};
        let Some(magic) = buf.get(..4) else {
            return false;
        };
        let magic = u32::from_le_bytes([magic[0], magic[1], magic[2], magic[3]]);
        matches!(magic, MH_MAGIC | MH_MAGIC_64 | MH_CIGAM | MH_CIGAM_64)
    }

    fn matches_filename(&self, filename: &str) -> bool {
        filename.ends_with(".dylib")
    }

    fn parse(&self, buf: &[u8], opts: &LoadOptions) -> Result<ParsedObject> {
        let macho = MachO::parse(buf, 0).map_err(|e| BinError::Parse {
            plugin: "mach0",
            reason: e.to_string(),
        })?;

        let mut sections = Vec::new();
        for seg in &macho.segments {
            let segname = seg.name().unwrap_or_default().to_string();
            let is_data_seg = segname.starts_with("__DATA");
            let Ok(secs) = seg.sections() else {
                continue;
            };
            for (sec, _) in secs {
                let name = sec.name().unwrap_or_default().to_string();
                let has_strings = name == "__cstring"
                    || sec.flags & 0xff == goblin::mach::constants::S_CSTRING_LITERALS;
                sections.push(Section {
                    is_data: is_data_seg,
                    has_strings,
                    name,
                    paddr: u64::from(sec.offset),
                    vaddr: sec.addr,
                    size: sec.size,
                    vsize: sec.size,
                });
            }
        }

        let mut symbols = Vec::new();
        for sym in macho.symbols().flatten() {
            let (name, nlist) = sym;
            if !name.is_empty() {
                symbols.push(BinSymbol {
                    name: name.to_string(),
                    vaddr: nlist.n_value,
                    ..BinSymbol::default()
                });
            }
        }

        Ok(ParsedObject {
            base_addr: opts.base_addr,
            size: None,
            sections,
            symbols,
            info: BinInfo {
                arch: arch_from_macho_cputype(macho.header.cputype).into(),
                machine: arch_from_macho_cputype(macho.header.cputype).into(),
                format: "mach0".into(),
                bits: if macho.is_64 { 64 } else { 32 },
                ..BinInfo::default()
            },
            lang: None,
        })
    }
}

/// PE/COFF format plugin.
#[derive(Debug)]
pub struct PePlugin;

// subset of IMAGE_SCN_* flags the section classifier needs
const IMAGE_SCN_CNT_INITIALIZED_DATA: u32 = 0x0000_0040;
const IMAGE_SCN_MEM_EXECUTE: u32 = 0x2000_0000;

impl BinPlugin for PePlugin {
    fn name(&self) -> &'static str {
        "pe"
    }

    fn matches(&self, buf: &[u8]) -> bool {
        buf.starts_with(b"MZ")
    }

    fn matches_filename(&self, filename: &str) -> bool {
        filename.ends_with(".exe") || filename.ends_with(".dll")
    }

    fn parse(&self, buf: &[u8], opts: &LoadOptions) -> Result<ParsedObject> {
        let pe = PE::parse(buf).map_err(|e| BinError::Parse {
            plugin: "pe",
            reason: e.to_string(),
        })?;

        let image_base = pe.image_base as u64;
        let mut sections = Vec::with_capacity(pe.sections.len());
        for sec in &pe.sections {
            let name = sec.name().unwrap_or_default().to_string();
            let init_data = sec.characteristics & IMAGE_SCN_CNT_INITIALIZED_DATA != 0;
            let exec = sec.characteristics & IMAGE_SCN_MEM_EXECUTE != 0;
            sections.push(Section {
                is_data: init_data && !exec,
                has_strings: false,
                name,
                paddr: u64::from(sec.pointer_to_raw_data),
                vaddr: image_base + u64::from(sec.virtual_address),
                size: u64::from(sec.size_of_raw_data),
                vsize: u64::from(sec.virtual_size),
            });
        }

        let mut symbols = Vec::new();
        for export in &pe.exports {
            if let Some(name) = export.name {
                symbols.push(BinSymbol {
                    name: name.to_string(),
                    vaddr: image_base + export.rva as u64,
                    ..BinSymbol::default()
                });
            }
        }

        Ok(ParsedObject {
            base_addr: opts.base_addr,
            size: None,
            sections,
            symbols,
            info: BinInfo {
                arch: arch_from_pe_machine(pe.header.coff_header.machine).into(),
                machine: arch_from_pe_machine(pe.header.coff_header.machine).into(),
                format: "pe".into(),
                bits: if pe.is_64 { 64 } else { 32 },
                ..BinInfo::default()
            },
            lang: None,
        })
    }
}

/// Extractor for fat Mach-O containers: one descriptor per embedded
/// architecture, nothing parsed until a sub-binary is selected.
#[derive(Debug)]
pub struct FatMachXtr;

impl XtrPlugin for FatMachXtr {
    fn name(&self) -> &'static str {
        "xtr.fatmach0"
    }

    fn matches(&self, buf: &[u8]) -> bool {
        let Some(magic) = buf.get(..4) else {
            return false;
        };
        u32::from_be_bytes([magic[0], magic[1], magic[2], magic[3]]) == goblin::mach::fat::FAT_MAGIC
    }

    fn extract_all(&self, buf: &SharedBuf) -> Result<Vec<XtrSubBinary>> {
        let mach = Mach::parse(buf.as_bytes()).map_err(|e| BinError::Extract {
            plugin: "xtr.fatmach0",
            reason: e.to_string(),
        })?;
        let Mach::Fat(multi) = mach else {
            return Err(BinError::Extract {
                plugin: "xtr.fatmach0",
                reason: "not a fat container".into(),
            });
        };

        let arches = multi.arches().map_err(|e| BinError::Extract {
            plugin: "xtr.fatmach0",
            reason: e.to_string(),
        })?;

        let file_count = arches.len();
        let mut out = Vec::with_capacity(file_count);
        for arch in arches {
            let bits = if arch.cputype & goblin::mach::cputype::CPU_ARCH_ABI64 != 0 {
                64
            } else {
                32
            };
            let name = arch_from_macho_cputype(arch.cputype);
            debug!(
                "xtr.fatmach0: sub-binary {} bits={} offset={:#x} size={:#x}",
                name, bits, arch.offset, arch.size
            );
            out.push(XtrSubBinary::new(
                u64::from(arch.offset),
                u64::from(arch.size),
                buf.clone(),
                XtrMetadata {
                    arch: name.into(),
                    machine: name.into(),
                    format: "mach0".into(),
                    bits,
                    has_crypto: false,
                },
                file_count,
            ));
        }
        Ok(out)
    }
}

/// The plugin set a fresh registry starts with; the catch-all sits last so
/// content sniffing tries the real formats first.
pub(crate) fn builtin_plugins() -> Vec<Arc<dyn BinPlugin>> {
    vec![
        Arc::new(ElfPlugin),
        Arc::new(MachOPlugin),
        Arc::new(PePlugin),
        Arc::new(crate::plugin::AnyPlugin),
    ]
}

pub(crate) fn builtin_xtr_plugins() -> Vec<Arc<dyn XtrPlugin>> {
    vec![Arc::new(FatMachXtr)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elf_magic_sniff() {
        assert!(ElfPlugin.matches(&[0x7f, b'E', b'L', b'F', 2, 1]));
        assert!(!ElfPlugin.matches(b"MZ\x90\x00"));
        assert!(!ElfPlugin.matches(&[]));
    }

    #[test]
    fn test_pe_magic_sniff() {
        assert!(PePlugin.matches(b"MZ\x90\x00"));
        assert!(!PePlugin.matches(&[0x7f, b'E', b'L', b'F']));
    }

    #[test]
    fn test_macho_magic_sniff() {
        // MH_MAGIC_64 stored little-endian on disk
        assert!(MachOPlugin.matches(&[0xcf, 0xfa, 0xed, 0xfe]));
        assert!(!MachOPlugin.matches(&[0xca, 0xfe, 0xba, 0xbe]));
    }

    #[test]
    fn test_fat_magic_sniff() {
        assert!(FatMachXtr.matches(&[0xca, 0xfe, 0xba, 0xbe]));
        assert!(!FatMachXtr.matches(&[0xcf, 0xfa, 0xed, 0xfe]));
    }

    #[test]
    fn test_builtin_catch_all_is_last() {
        let plugins = builtin_plugins();
        assert_eq!(plugins.last().unwrap().name(), "any");
    }
}
