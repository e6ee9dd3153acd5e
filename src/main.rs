//! bincore - binary ingestion CLI
//!
//! Open a binary, pick the right format plugin (or an embedded
//! sub-binary), and print strings, file hashes or parsed metadata.

use anyhow::Result;
use clap::Parser;
use std::path::Path;

use bincore::{Bin, LoadOptions};

#[derive(Parser, Debug)]
#[command(name = "bincore")]
#[command(
    author,
    version,
    about = "Binary file ingestion: format detection, strings, hashes"
)]
#[command(long_about = "
bincore loads a binary through its format-plugin registry (ELF, Mach-O,
PE, fat containers, plus a catch-all) and runs the first analyses a
reverse-engineering session needs.

EXAMPLES:
    bincore target.elf                  # strings from data sections
    bincore --raw firmware.bin          # strings from the whole file
    bincore --hashes --json sample.exe  # md5/sha1/sha256/crc32/entropy
    bincore --arch arm --bits 64 fat    # select one slice of a fat Mach-O
")]
struct Cli {
    /// Target binary file to analyze
    #[arg(required = true)]
    target: String,

    /// Minimum string length (0 uses the plugin's preference)
    #[arg(short = 'm', long, default_value = "0")]
    min_length: usize,

    /// Scan the whole file instead of data-bearing sections
    #[arg(long)]
    raw: bool,

    /// Output as JSON
    #[arg(long)]
    json: bool,

    /// Compute and print file hashes instead of strings
    #[arg(long)]
    hashes: bool,

    /// Refuse to hash files larger than this many bytes (0 = no limit)
    #[arg(long, default_value_t = bincore::DEFAULT_HASH_LIMIT)]
    hash_limit: u64,

    /// Print parsed metadata and exit
    #[arg(long)]
    info: bool,

    /// Force a specific format plugin by name
    #[arg(long)]
    plugin: Option<String>,

    /// Select this architecture from a multi-arch container
    #[arg(long, requires = "bits")]
    arch: Option<String>,

    /// Bit width for --arch
    #[arg(long, requires = "arch")]
    bits: Option<u32>,

    /// Base address to load the binary at
    #[arg(long, default_value = "0")]
    base_addr: u64,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let path = Path::new(&cli.target);
    if !path.exists() {
        anyhow::bail!("File does not exist: {}", cli.target);
    }

    let mut bin = Bin::new();
    bin.force = cli.plugin.clone();
    let opts = LoadOptions {
        base_addr: cli.base_addr,
        load_addr: 0,
    };
    let mut id = bin.open_path(path, opts)?;

    // A container open yields descriptors, not a parsed object; pick the
    // requested slice (or report what is inside).
    if let Some(arch) = &cli.arch {
        let bits = cli.bits.unwrap_or(64);
        id = bin
            .find_by_arch_bits(arch, bits)
            .ok_or_else(|| anyhow::anyhow!("no sub-binary matches {arch}/{bits}"))?;
    } else if bin
        .file_by_id(id)
        .is_some_and(|bf| bf.object.is_none() && !bf.xtr_data.is_empty())
    {
        let bf = bin.file_by_id(id).unwrap();
        eprintln!("{}: multi-arch container, pick a slice with --arch/--bits:", cli.target);
        for sub in &bf.xtr_data {
            eprintln!(
                "  {}/{} at {:#x} ({} bytes)",
                sub.metadata.arch, sub.metadata.bits, sub.offset, sub.size
            );
        }
        std::process::exit(1);
    }
    bin.set_cur_by_id(id);

    if cli.hashes {
        let records = bin
            .compute_hashes(id, cli.hash_limit)?
            .ok_or_else(|| anyhow::anyhow!("file refused by the hash limit"))?;
        if cli.json {
            println!("{}", serde_json::to_string_pretty(&records)?);
        } else {
            for r in &records {
                println!("{}  {}", r.algo, r.hex);
            }
        }
        bin.set_hashes(records);
        return Ok(());
    }

    if cli.info {
        let bf = bin.file_by_id(id).unwrap();
        let Some(object) = bf.object.as_ref() else {
            anyhow::bail!("no parsed object for {}", cli.target);
        };
        if cli.json {
            println!("{}", serde_json::to_string_pretty(&object.info)?);
        } else {
            let info = &object.info;
            println!("file    {}", info.file);
            println!("format  {}", info.format);
            println!("arch    {}", info.arch);
            println!("machine {}", info.machine);
            println!("bits    {}", info.bits);
            if let Some(lang) = &info.lang {
                println!("lang    {lang}");
            }
        }
        return Ok(());
    }

    let bf = bin.file_by_id(id).unwrap();
    let strings = bin.strings(bf, cli.min_length, cli.raw)?;
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&strings)?);
    } else {
        for s in &strings {
            println!("{:#010x} {:#010x} {:>7?} {}", s.paddr, s.vaddr, s.encoding, s.string);
        }
    }
    Ok(())
}
