//! Concurrent string extraction over an open binary file.
//!
//! The engine partitions the file's address space into scan intervals,
//! fans them out across a fixed worker pool, merges the per-worker results
//! against a shared address-indexed table, resolves runtime string-pointer
//! tables in a secondary pass, and returns a globally ordered list.

use std::collections::{HashMap, VecDeque};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};

use log::{debug, warn};
use rayon::ThreadPoolBuilder;

use crate::classify::{self, ScanOptions};
use crate::error::{BinError, Result};
use crate::file::BinFile;
use crate::object::BinObject;
use crate::types::BinString;

/// Raw-mode intervals are rounded up to this boundary (64 KiB).
const INTERVAL_ALIGN: u64 = 0x10000;

/// `(physical offset, length)` unit of scan work, consumed by exactly one
/// worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ScanInterval {
    pub paddr: u64,
    pub psize: u64,
}

/// A secondary-scan strategy for language runtimes that store fixed-size
/// records pointing at constant strings elsewhere in the image.
pub trait PointerTableStrategy: Send + Sync + std::fmt::Debug {
    /// Does this section hold such a table?
    fn section_matches(&self, name: &str) -> bool;
    /// Record stride for the given bit width.
    fn record_size(&self, bits: u32) -> u64;
    /// Offset of the embedded string pointer within one record.
    fn pointer_offset(&self, bits: u32) -> u64;
    /// Prefix marking synthesized indirect strings.
    fn prefix(&self) -> &'static str;
}

/// Objective-C/Swift `__cfstring` constant-string tables: 32-byte records
/// on 64-bit targets (16 on 32-bit) with the string pointer 16 (8) bytes
/// in.
#[derive(Debug)]
pub struct CfStringStrategy;

impl PointerTableStrategy for CfStringStrategy {
    fn section_matches(&self, name: &str) -> bool {
        name.contains("__cfstring")
    }

    fn record_size(&self, bits: u32) -> u64 {
        if bits == 64 {
            32
        } else {
            16
        }
    }

    fn pointer_offset(&self, bits: u32) -> u64 {
        if bits == 64 {
            16
        } else {
            8
        }
    }

    fn prefix(&self) -> &'static str {
        "cstr."
    }
}

pub(crate) fn builtin_strategies() -> Vec<Arc<dyn PointerTableStrategy>> {
    vec![Arc::new(CfStringStrategy)]
}

/// Divide `[0, file_size)` into contiguous intervals, one share per worker,
/// each rounded up to the 64 KiB boundary and the last clipped to the file
/// end. A non-zero `max_interval` smaller than the computed share aborts
/// the scan: raw mode has no section structure to skip piecewise.
fn raw_intervals(file_size: u64, pool_size: usize, max_interval: u64) -> Result<Vec<ScanInterval>> {
    let mut chunk = file_size / pool_size.max(1) as u64;
    if chunk & (INTERVAL_ALIGN - 1) != 0 {
        chunk = (chunk + INTERVAL_ALIGN) & !(INTERVAL_ALIGN - 1);
    }
    if chunk == 0 {
        chunk = INTERVAL_ALIGN;
    }

    if max_interval != 0 && chunk > max_interval {
        warn!(
            "string scan: interval size ({chunk:#x}) exceeds the configured ceiling \
             ({max_interval:#x}), aborting"
        );
        return Err(BinError::ConfigViolation {
            computed: chunk,
            ceiling: max_interval,
        });
    }

    let mut intervals = Vec::new();
    let mut from = 0u64;
    while from < file_size {
        intervals.push(ScanInterval {
            paddr: from,
            psize: chunk.min(file_size - from),
        });
        from += chunk;
    }
    Ok(intervals)
}

/// One interval per data-bearing section; oversized sections are skipped
/// with a diagnostic rather than aborting the scan. Section offsets are
/// relative to the object's own byte range, so intervals are clipped
/// against `scan_size`, not the container.
fn section_intervals(
    object: Option<&BinObject>,
    scan_size: u64,
    max_interval: u64,
) -> Vec<ScanInterval> {
    let Some(object) = object else {
        return Vec::new();
    };
    let mut intervals = Vec::new();
    for section in &object.sections {
        if section.paddr >= scan_size || !section.is_data_bearing() {
            continue;
        }
        if max_interval != 0 && section.size > max_interval {
            warn!(
                "string scan: section {} size ({:#x}) exceeds the configured ceiling \
                 ({max_interval:#x}), skipping it",
                section.name, section.size
            );
            continue;
        }
        intervals.push(ScanInterval {
            paddr: section.paddr,
            psize: section.size.min(scan_size - section.paddr),
        });
    }
    intervals
}

/// Scan `bf` for strings.
///
/// Raw mode covers the bound object's whole byte range (the full file
/// when no object is bound); otherwise only data-bearing sections are
/// scanned and runtime pointer tables are resolved in a secondary pass.
/// Interval offsets stay relative to the object's range; `boffset` is
/// applied when reading from the container buffer and once more when
/// stamping the reported physical address. Results are sorted by
/// `(paddr, vaddr)` with ordinals assigned in final order.
pub(crate) fn scan(
    bf: &BinFile,
    min_length: usize,
    raw: bool,
    max_interval: u64,
    strategies: &[Arc<dyn PointerTableStrategy>],
) -> Result<Vec<BinString>> {
    let pool = ThreadPoolBuilder::new()
        .build()
        .map_err(|e| BinError::ThreadPool(e.to_string()))?;
    let pool_size = pool.current_num_threads().max(1);

    let object = bf.object.as_ref();
    let (boffset, scan_size) = match object {
        Some(o) => (o.boffset, o.size),
        None => (0, bf.size),
    };

    let intervals = if raw {
        raw_intervals(scan_size, pool_size, max_interval)?
    } else {
        section_intervals(object, scan_size, max_interval)
    };
    debug!(
        "string scan: {} intervals across {pool_size} workers",
        intervals.len()
    );

    let queue = Mutex::new(VecDeque::from(intervals));
    let table: Mutex<HashMap<u64, BinString>> = Mutex::new(HashMap::new());
    // serializes interval reads from the shared buffer, not the scan itself
    let io_lock = Mutex::new(());
    let opt = ScanOptions::new(min_length);
    let (tx, rx) = mpsc::channel::<Vec<BinString>>();

    pool.scope(|s| {
        for _ in 0..pool_size {
            let tx = tx.clone();
            let buf = bf.buffer().clone();
            let queue = &queue;
            let table = &table;
            let io_lock = &io_lock;
            s.spawn(move |_| {
                let local = scan_worker(&buf, object, boffset, queue, table, io_lock, &opt);
                let _ = tx.send(local);
            });
        }
    });
    drop(tx);

    let mut results: Vec<BinString> = Vec::new();
    for local in rx.try_iter() {
        results.extend(local);
    }

    if !raw {
        if let Some(object) = object {
            let mut table = table
                .into_inner()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            scan_pointer_tables(
                bf.buffer(),
                object,
                scan_size,
                &mut table,
                &mut results,
                max_interval,
                strategies,
            );
        }
    }

    results.sort_by(|a, b| a.paddr.cmp(&b.paddr).then(a.vaddr.cmp(&b.vaddr)));
    for (ordinal, bstr) in results.iter_mut().enumerate() {
        bstr.ordinal = ordinal as u32;
    }
    Ok(results)
}

/// Worker loop: pop intervals until the queue is drained, classify each
/// one, and publish translated hits to the shared address table. The hit
/// list itself stays worker-private and is handed back over the channel.
///
/// Interval offsets are object-relative; `boffset` shifts the buffer read
/// into the container and is folded into the reported physical address,
/// while address translation runs on the object-relative offset.
fn scan_worker(
    buf: &crate::buffer::SharedBuf,
    object: Option<&BinObject>,
    boffset: u64,
    queue: &Mutex<VecDeque<ScanInterval>>,
    table: &Mutex<HashMap<u64, BinString>>,
    io_lock: &Mutex<()>,
    opt: &ScanOptions,
) -> Vec<BinString> {
    let mut local = Vec::new();
    loop {
        let interval = {
            let mut q = queue.lock().unwrap();
            q.pop_front()
        };
        let Some(interval) = interval else {
            break;
        };
        debug!(
            "string scan: searching [{:#010x} : {:#010x}]",
            interval.paddr,
            interval.paddr + interval.psize
        );

        let mut block = vec![0u8; interval.psize as usize];
        let read = {
            let _guard = io_lock.lock().unwrap();
            buf.read_at(boffset + interval.paddr, &mut block)
        };
        block.truncate(read);

        for hit in classify::scan_bytes(&block, interval.paddr, opt) {
            let mut bstr = BinString {
                string: hit.text,
                length: hit.length,
                size: hit.size,
                encoding: hit.encoding,
                paddr: hit.offset + boffset,
                vaddr: hit.offset + boffset,
                ordinal: 0,
            };
            if let Some(object) = object {
                bstr.vaddr = object.p2v(hit.offset).unwrap_or(bstr.paddr);
                let mut t = table.lock().unwrap();
                t.insert(bstr.vaddr, bstr.clone());
            }
            local.push(bstr);
        }
    }
    local
}

/// Secondary pass: resolve runtime constant-string pointer tables against
/// the address table populated during the interval scan, synthesizing a
/// prefixed indirect string at each record's own virtual address.
fn scan_pointer_tables(
    buf: &crate::buffer::SharedBuf,
    object: &BinObject,
    scan_size: u64,
    table: &mut HashMap<u64, BinString>,
    results: &mut Vec<BinString>,
    max_interval: u64,
    strategies: &[Arc<dyn PointerTableStrategy>],
) {
    for section in &object.sections {
        if section.paddr >= scan_size {
            continue;
        }
        if max_interval != 0 && section.size > max_interval {
            warn!(
                "string scan: section {} size ({:#x}) exceeds the configured ceiling \
                 ({max_interval:#x}), skipping it",
                section.name, section.size
            );
            continue;
        }
        for strategy in strategies {
            if strategy.section_matches(&section.name) {
                scan_pointer_table_section(buf, object, table, results, section, strategy.as_ref());
            }
        }
    }
}

fn scan_pointer_table_section(
    buf: &crate::buffer::SharedBuf,
    object: &BinObject,
    table: &mut HashMap<u64, BinString>,
    results: &mut Vec<BinString>,
    section: &crate::types::Section,
    strategy: &dyn PointerTableStrategy,
) {
    let bits = if object.info.bits == 64 { 64 } else { 32 };
    let record_size = strategy.record_size(bits);
    let pointer_offset = strategy.pointer_offset(bits);
    let pointer_size: u64 = if bits == 64 { 8 } else { 4 };

    let mut sbuf = vec![0u8; section.size as usize];
    let read = buf.read_at(object.boffset + section.paddr + pointer_offset, &mut sbuf);
    sbuf.truncate(read);

    for i in (0..section.size).step_by(record_size as usize) {
        // a record whose pointer field would read past the section is cut off
        if i + pointer_size >= section.size {
            break;
        }
        let Some(bytes) = sbuf.get(i as usize..(i + pointer_size) as usize) else {
            break;
        };
        let pointee = if bits == 64 {
            u64::from_le_bytes(bytes.try_into().expect("8-byte slice"))
        } else {
            u64::from(u32::from_le_bytes(bytes.try_into().expect("4-byte slice")))
        };
        if pointee == 0 || pointee == u64::MAX {
            continue;
        }
        let Some(source) = table.get(&pointee) else {
            continue;
        };

        let slot_vaddr = section.vaddr + i;
        let synthesized = BinString {
            string: format!("{}{}", strategy.prefix(), source.string),
            length: source.length,
            size: source.size,
            encoding: source.encoding,
            ordinal: source.ordinal,
            vaddr: slot_vaddr,
            paddr: object
                .v2p(slot_vaddr)
                .map(|p| p + object.boffset)
                .unwrap_or(slot_vaddr),
        };
        results.push(synthesized.clone());
        // keyed by its own slot so later references resolve through it
        table.insert(slot_vaddr, synthesized);
    }
}
