//! Open binary files and the session-scoped registry.
//!
//! `Bin` replaces the classic process-global "current file" pointer with an
//! explicit session object the caller owns and threads through calls.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, error, warn};

use crate::buffer::{FileDesc, IoDesc, SharedBuf};
use crate::error::Result;
use crate::hashes;
use crate::object::{BinClass, BinObject};
use crate::plugin::{self, BinPlugin, XtrPlugin, DEFAULT_MIN_STR_LENGTH};
use crate::strscan::{self, PointerTableStrategy};
use crate::types::{
    BinString, BinSymbol, FileHashRecord, LoadOptions, TryCatchRegion, XtrMetadata,
};

/// Default ceiling on one scan interval (10 MiB); 0 disables the check.
pub const DEFAULT_MAX_STR_BUF: u64 = 10 * 1024 * 1024;
/// Default ceiling on hashable file size (50 MiB).
pub const DEFAULT_HASH_LIMIT: u64 = 50 * 1024 * 1024;

/// Pool-allocated numeric ids; freed ids are recycled.
#[derive(Debug, Default)]
struct IdPool {
    next: u32,
    free: Vec<u32>,
}

impl IdPool {
    fn grab(&mut self) -> u32 {
        if let Some(id) = self.free.pop() {
            return id;
        }
        let id = self.next;
        self.next += 1;
        id
    }

    fn release(&mut self, id: u32) {
        self.free.push(id);
    }
}

/// Metadata for one not-yet-materialized sub-binary inside a container.
///
/// Immutable once produced by the extractor except for the `loaded` flag,
/// which transitions false -> true exactly once via [`XtrSubBinary::claim`]
/// and never reverts.
#[derive(Debug)]
pub struct XtrSubBinary {
    pub offset: u64,
    pub size: u64,
    pub buf: SharedBuf,
    pub metadata: XtrMetadata,
    /// Number of embedded architectures in the owning container.
    pub file_count: usize,
    pub opts: LoadOptions,
    loaded: AtomicBool,
}

impl XtrSubBinary {
    pub fn new(
        offset: u64,
        size: u64,
        buf: SharedBuf,
        metadata: XtrMetadata,
        file_count: usize,
    ) -> Self {
        Self {
            offset,
            size,
            buf,
            metadata,
            file_count,
            opts: LoadOptions::default(),
            loaded: AtomicBool::new(false),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    /// Atomically claim this descriptor for materialization. Returns true
    /// exactly once; the flag is sticky.
    pub fn claim(&self) -> bool {
        self.loaded
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// One opened binary container, possibly holding multiple embedded images.
#[derive(Debug)]
pub struct BinFile {
    pub id: u32,
    pub path: String,
    /// File-descriptor handle assigned at open time.
    pub fd: u32,
    /// Total byte size of the container.
    pub size: u64,
    pub narch: usize,
    pub load_addr: u64,
    /// The parsed object. Declared before the buffer so derived data is
    /// torn down before the underlying bytes on drop.
    pub object: Option<BinObject>,
    pub(crate) buf: SharedBuf,
    pub(crate) xtr: Option<Arc<dyn XtrPlugin>>,
    pub xtr_data: Vec<XtrSubBinary>,
    desc: Option<Box<dyn IoDesc>>,
}

impl BinFile {
    fn new(id: u32, path: &str, fd: u32, buf: SharedBuf, xtr: Option<Arc<dyn XtrPlugin>>) -> Self {
        Self {
            id,
            path: path.to_string(),
            fd,
            size: buf.len(),
            narch: 0,
            load_addr: 0,
            object: None,
            buf,
            xtr,
            xtr_data: Vec::new(),
            desc: None,
        }
    }

    /// The plugin bound to the current object, if any.
    pub fn cur_plugin(&self) -> Option<Arc<dyn BinPlugin>> {
        self.object.as_ref().map(|o| o.plugin.clone())
    }

    /// The extractor that split this container, if one matched at open.
    pub fn xtr_plugin(&self) -> Option<Arc<dyn XtrPlugin>> {
        self.xtr.clone()
    }

    /// Declared base address of the current object.
    pub fn base_addr(&self) -> Option<u64> {
        self.object.as_ref().map(BinObject::base_addr)
    }

    /// Exception-handling regions from the bound plugin.
    pub fn try_catch(&self) -> Vec<TryCatchRegion> {
        match self.cur_plugin() {
            Some(p) => p.try_catch(self),
            None => Vec::new(),
        }
    }

    pub fn buffer(&self) -> &SharedBuf {
        &self.buf
    }
}

/// The session-scoped binary registry: plugin lists, open files, explicit
/// "current" selection and scan/hash configuration.
#[derive(Debug)]
pub struct Bin {
    plugins: Vec<Arc<dyn BinPlugin>>,
    xtr_plugins: Vec<Arc<dyn XtrPlugin>>,
    binfiles: Vec<BinFile>,
    ids: IdPool,
    next_fd: u32,
    cur: Option<u32>,
    /// Process-wide plugin override tried before everything else.
    pub force: Option<String>,
    /// Session minimum string length; 0 defers to the plugin default.
    pub min_str_length: usize,
    /// Scan interval ceiling; 0 disables it.
    pub max_str_buf: u64,
    /// Hash pipeline size ceiling.
    pub hash_limit: u64,
    strategies: Vec<Arc<dyn PointerTableStrategy>>,
}

impl Default for Bin {
    fn default() -> Self {
        Self::new()
    }
}

impl Bin {
    pub fn new() -> Self {
        Self {
            plugins: crate::format::builtin_plugins(),
            xtr_plugins: crate::format::builtin_xtr_plugins(),
            binfiles: Vec::new(),
            ids: IdPool::default(),
            next_fd: 0,
            cur: None,
            force: None,
            min_str_length: 0,
            max_str_buf: DEFAULT_MAX_STR_BUF,
            hash_limit: DEFAULT_HASH_LIMIT,
            strategies: strscan::builtin_strategies(),
        }
    }

    /// Register a format plugin ahead of the catch-all.
    pub fn register_plugin(&mut self, plugin: Arc<dyn BinPlugin>) {
        let at = self
            .plugins
            .iter()
            .position(|p| p.name() == "any")
            .unwrap_or(self.plugins.len());
        self.plugins.insert(at, plugin);
    }

    pub fn register_xtr_plugin(&mut self, plugin: Arc<dyn XtrPlugin>) {
        self.xtr_plugins.push(plugin);
    }

    pub fn register_strategy(&mut self, strategy: Arc<dyn PointerTableStrategy>) {
        self.strategies.push(strategy);
    }

    pub fn plugin_by_name(&self, name: &str) -> Option<Arc<dyn BinPlugin>> {
        self.plugins.iter().find(|p| p.name() == name).cloned()
    }

    fn resolve_plugin(&self, requested: Option<&str>, buf: &[u8], filename: &str) -> Arc<dyn BinPlugin> {
        plugin::resolve_plugin(&self.plugins, self.force.as_deref(), requested, buf, filename)
            // the registry installs the catch-all at construction
            .expect("catch-all plugin registered")
    }

    /// Open a file from disk; also attaches a streaming descriptor for the
    /// hash pipeline. Returns the new file's id.
    pub fn open_path(&mut self, path: &Path, opts: LoadOptions) -> Result<u32> {
        let data = std::fs::read(path)?;
        let name = path.to_string_lossy().into_owned();
        let id = self.open_buffer(&name, data, opts, None)?;
        let desc = FileDesc::open(path)?;
        if let Some(bf) = self.binfiles.iter_mut().find(|bf| bf.id == id) {
            bf.desc = Some(Box::new(desc));
        }
        Ok(id)
    }

    /// Open an in-memory buffer under `name`. Container formats matched by
    /// an extractor plugin are split into sub-binary descriptors instead of
    /// being parsed; everything else goes through plugin resolution and
    /// parsing immediately.
    pub fn open_buffer(
        &mut self,
        name: &str,
        data: Vec<u8>,
        opts: LoadOptions,
        requested_plugin: Option<&str>,
    ) -> Result<u32> {
        let buf = SharedBuf::new(data);

        if requested_plugin.is_none() && self.force.is_none() {
            let xtr = self
                .xtr_plugins
                .iter()
                .find(|x| x.matches(buf.as_bytes()))
                .cloned();
            if let Some(xtr) = xtr {
                return self.xtr_load_buffer(xtr, name, buf, opts);
            }
        }

        let plugin = self.resolve_plugin(requested_plugin, buf.as_bytes(), name);
        debug!("open {name}: plugin {}", plugin.name());
        let parsed = plugin.parse(buf.as_bytes(), &opts)?;

        let id = self.ids.grab();
        let fd = self.next_fd;
        self.next_fd += 1;

        let mut bf = BinFile::new(id, name, fd, buf, None);
        let size = bf.size;
        let mut object = BinObject::new(plugin, parsed, opts, 0, size);
        if object.info.file.is_empty() {
            object.info.file = name.to_string();
        }
        bf.object = Some(object);
        bf.desc = Some(Box::new(crate::buffer::MemDesc::new(
            bf.buf.as_bytes().to_vec(),
        )));
        self.binfiles.push(bf);
        if self.cur.is_none() {
            self.set_cur_by_id(id);
        }
        Ok(id)
    }

    /// Run an extractor plugin over a container buffer, storing the
    /// resulting descriptors against a (possibly pre-existing) BinFile.
    fn xtr_load_buffer(
        &mut self,
        xtr: Arc<dyn XtrPlugin>,
        name: &str,
        buf: SharedBuf,
        opts: LoadOptions,
    ) -> Result<u32> {
        let existing = self
            .binfiles
            .iter()
            .position(|bf| bf.path == name)
            .map(|i| self.binfiles[i].id);

        let id = match existing {
            Some(id) => id,
            None => {
                let id = self.ids.grab();
                let fd = self.next_fd;
                self.next_fd += 1;
                self.binfiles
                    .push(BinFile::new(id, name, fd, buf.clone(), Some(xtr.clone())));
                id
            }
        };

        let mut xtr_data = xtr.extract_all(&buf)?;
        for sub in &mut xtr_data {
            sub.opts = opts;
        }
        debug!(
            "open {name}: extractor {} found {} sub-binaries",
            xtr.name(),
            xtr_data.len()
        );

        // unwrap is fine, the file was found or pushed just above
        let bf = self.binfiles.iter_mut().find(|bf| bf.id == id).unwrap();
        bf.xtr_data = xtr_data;
        bf.load_addr = opts.load_addr;
        if self.cur.is_none() {
            self.cur = Some(id);
        }
        Ok(id)
    }

    /// Materialize the object for one extracted sub-binary: resolve a
    /// plugin against the descriptor's own buffer slice, parse, and copy
    /// the extractor metadata into the new object's info record.
    fn object_from_xtr_data(&mut self, file_idx: usize, sub_idx: usize) -> Result<()> {
        let (offset, size, meta, opts, file_count, buf, path) = {
            let bf = &self.binfiles[file_idx];
            let sub = &bf.xtr_data[sub_idx];
            (
                sub.offset,
                sub.size,
                sub.metadata.clone(),
                sub.opts,
                sub.file_count,
                sub.buf.clone(),
                bf.path.clone(),
            )
        };

        let bytes = buf.slice(offset, size);
        let plugin = self.resolve_plugin(None, bytes, &path);
        let parsed = plugin.parse(bytes, &opts)?;

        let mut object = BinObject::new(plugin, parsed, opts, offset, size);
        object.info.file = path;
        object.info.arch = meta.arch;
        object.info.machine = meta.machine;
        object.info.format = meta.format;
        object.info.bits = meta.bits;
        object.info.has_crypto = meta.has_crypto;

        let bf = &mut self.binfiles[file_idx];
        bf.narch = file_count;
        bf.object = Some(object);
        Ok(())
    }

    /// Select a sub-binary by architecture name (exact match) and bit
    /// width across all open files, materializing it on first match. The
    /// descriptor's loaded flag is sticky: a matched descriptor never
    /// matches again. `None` means "not found", not an error.
    pub fn find_by_arch_bits(&mut self, arch: &str, bits: u32) -> Option<u32> {
        let mut hit = None;
        'files: for (fi, bf) in self.binfiles.iter().enumerate() {
            for (si, sub) in bf.xtr_data.iter().enumerate() {
                if sub.metadata.arch == arch && sub.metadata.bits == bits && sub.claim() {
                    hit = Some((fi, si));
                    break 'files;
                }
            }
        }
        let (fi, si) = hit?;
        match self.object_from_xtr_data(fi, si) {
            Ok(()) => Some(self.binfiles[fi].id),
            Err(e) => {
                error!("cannot materialize sub-binary {arch}/{bits}: {e}");
                None
            }
        }
    }

    pub fn files(&self) -> impl Iterator<Item = &BinFile> {
        self.binfiles.iter()
    }

    pub fn file_by_id(&self, id: u32) -> Option<&BinFile> {
        self.binfiles.iter().find(|bf| bf.id == id)
    }

    pub fn file_by_id_mut(&mut self, id: u32) -> Option<&mut BinFile> {
        self.binfiles.iter_mut().find(|bf| bf.id == id)
    }

    pub fn file_by_fd(&self, fd: u32) -> Option<&BinFile> {
        self.binfiles.iter().find(|bf| bf.fd == fd)
    }

    pub fn file_by_name(&self, name: &str) -> Option<&BinFile> {
        self.binfiles.iter().find(|bf| bf.path == name)
    }

    /// The current file, if one is selected.
    pub fn cur(&self) -> Option<&BinFile> {
        self.cur.and_then(|id| self.file_by_id(id))
    }

    pub fn cur_mut(&mut self) -> Option<&mut BinFile> {
        let id = self.cur?;
        self.file_by_id_mut(id)
    }

    pub fn set_cur_by_id(&mut self, id: u32) -> bool {
        let Some(bf) = self.file_by_id(id) else {
            return false;
        };
        // adopt the plugin's preferred minimum string length once
        if self.min_str_length < 1 {
            if let Some(p) = bf.cur_plugin() {
                self.min_str_length = p.min_string_length();
            }
        }
        self.cur = Some(id);
        true
    }

    pub fn set_cur_by_fd(&mut self, fd: u32) -> bool {
        match self.file_by_fd(fd).map(|bf| bf.id) {
            Some(id) => self.set_cur_by_id(id),
            None => false,
        }
    }

    pub fn set_cur_by_name(&mut self, name: &str) -> bool {
        match self.file_by_name(name).map(|bf| bf.id) {
            Some(id) => self.set_cur_by_id(id),
            None => false,
        }
    }

    /// Close the file opened under `fd`. Returns false when no file uses
    /// that descriptor.
    pub fn close(&mut self, fd: u32) -> bool {
        match self.binfiles.iter().position(|bf| bf.fd == fd) {
            Some(idx) => {
                self.delete_at(idx);
                true
            }
            None => false,
        }
    }

    /// Remove one file by id.
    pub fn delete(&mut self, id: u32) -> bool {
        match self.binfiles.iter().position(|bf| bf.id == id) {
            Some(idx) => {
                self.delete_at(idx);
                true
            }
            None => false,
        }
    }

    fn delete_at(&mut self, idx: usize) {
        let bf = self.binfiles.remove(idx);
        if let Some(xtr) = bf.xtr_plugin() {
            debug!(
                "dropping {} sub-binary descriptors held by {}",
                bf.xtr_data.len(),
                xtr.name()
            );
        }
        if self.cur == Some(bf.id) {
            self.cur = None;
        }
        self.ids.release(bf.id);
        debug!("closed {} (id {})", bf.path, bf.id);
    }

    /// Flush the whole registry; returns how many files were open.
    pub fn delete_all(&mut self) -> u64 {
        let count = self.binfiles.len() as u64;
        for bf in self.binfiles.drain(..) {
            self.ids.release(bf.id);
        }
        self.cur = None;
        count
    }

    /// Extract strings from `bf`, raw (whole file) or section-scoped.
    /// A `min_length` of 0 defers to the plugin's preferred minimum, then
    /// the session's, then the global default.
    pub fn strings(&self, bf: &BinFile, min_length: usize, raw: bool) -> Result<Vec<BinString>> {
        let min_length = if min_length > 0 {
            min_length
        } else if let Some(p) = bf.cur_plugin() {
            p.min_string_length()
        } else if self.min_str_length > 0 {
            self.min_str_length
        } else {
            DEFAULT_MIN_STR_LENGTH
        };
        strscan::scan(bf, min_length, raw, self.max_str_buf, &self.strategies)
    }

    /// Compute the standard hash set (md5, sha1, sha256, crc32, entropy)
    /// plus any plugin-specific extras over the whole file. `Ok(None)`
    /// means the file was refused (no descriptor, or larger than `limit`).
    /// A `limit` of 0 disables the size ceiling entirely.
    pub fn compute_hashes(
        &mut self,
        id: u32,
        limit: u64,
    ) -> Result<Option<Vec<FileHashRecord>>> {
        let Some(idx) = self.binfiles.iter().position(|bf| bf.id == id) else {
            return Ok(None);
        };
        let Some(mut desc) = self.binfiles[idx].desc.take() else {
            warn!("no i/o descriptor for id {id}, cannot hash");
            return Ok(None);
        };
        let computed = hashes::compute_hashes(desc.as_mut(), limit);
        self.binfiles[idx].desc = Some(desc);

        let Some(mut records) = computed? else {
            return Ok(None);
        };
        let bf = &self.binfiles[idx];
        if let Some(plugin) = bf.cur_plugin() {
            if let Some(extra) = plugin.file_hashes(bf) {
                records.extend(extra);
            }
        }
        Ok(Some(records))
    }

    /// Install a freshly computed hash list on the current object's info,
    /// returning the previous list.
    pub fn set_hashes(&mut self, new_hashes: Vec<FileHashRecord>) -> Option<Vec<FileHashRecord>> {
        let bf = self.cur_mut()?;
        let object = bf.object.as_mut()?;
        Some(std::mem::replace(&mut object.info.file_hashes, new_hashes))
    }

    /// Add (or re-add) a class on the current object.
    pub fn add_class(
        &mut self,
        name: &str,
        super_name: Option<&str>,
        visibility: u32,
    ) -> Option<&BinClass> {
        let object = self.cur_mut()?.object.as_mut()?;
        Some(object.classes.add_class(name, super_name, visibility))
    }

    /// Add (or look up) a method on the current object.
    pub fn add_method(&mut self, klass: &str, method: &str, nargs: u32) -> Option<&BinSymbol> {
        let object = self.cur_mut()?.object.as_mut()?;
        Some(object.classes.add_method(klass, method, nargs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_plain(bin: &mut Bin, name: &str, data: &[u8]) -> u32 {
        bin.open_buffer(name, data.to_vec(), LoadOptions::default(), None)
            .unwrap()
    }

    #[test]
    fn test_open_buffer_assigns_ids_and_fds() {
        let mut bin = Bin::new();
        let a = open_plain(&mut bin, "a.bin", b"aaaa");
        let b = open_plain(&mut bin, "b.bin", b"bbbb");
        assert_ne!(a, b);
        assert_ne!(
            bin.file_by_id(a).unwrap().fd,
            bin.file_by_id(b).unwrap().fd
        );
        // first open becomes current
        assert_eq!(bin.cur().unwrap().id, a);
    }

    #[test]
    fn test_find_by_name_and_fd() {
        let mut bin = Bin::new();
        let id = open_plain(&mut bin, "target.bin", b"data");
        let fd = bin.file_by_id(id).unwrap().fd;
        assert_eq!(bin.file_by_name("target.bin").unwrap().id, id);
        assert_eq!(bin.file_by_fd(fd).unwrap().id, id);
        assert!(bin.file_by_name("other.bin").is_none());
    }

    #[test]
    fn test_set_cur_variants() {
        let mut bin = Bin::new();
        let a = open_plain(&mut bin, "a.bin", b"aaaa");
        let b = open_plain(&mut bin, "b.bin", b"bbbb");
        assert!(bin.set_cur_by_id(b));
        assert_eq!(bin.cur().unwrap().id, b);
        assert!(bin.set_cur_by_name("a.bin"));
        assert_eq!(bin.cur().unwrap().id, a);
        assert!(!bin.set_cur_by_id(999));
    }

    #[test]
    fn test_close_releases_and_clears_cur() {
        let mut bin = Bin::new();
        let id = open_plain(&mut bin, "a.bin", b"aaaa");
        let fd = bin.file_by_id(id).unwrap().fd;
        assert!(bin.close(fd));
        assert!(bin.cur().is_none());
        assert!(bin.file_by_id(id).is_none());
        assert!(!bin.close(fd));
    }

    #[test]
    fn test_delete_all_counts() {
        let mut bin = Bin::new();
        open_plain(&mut bin, "a.bin", b"aaaa");
        open_plain(&mut bin, "b.bin", b"bbbb");
        assert_eq!(bin.delete_all(), 2);
        assert_eq!(bin.delete_all(), 0);
        assert!(bin.cur().is_none());
    }

    #[test]
    fn test_id_recycled_after_delete() {
        let mut bin = Bin::new();
        let a = open_plain(&mut bin, "a.bin", b"aaaa");
        bin.delete(a);
        let b = open_plain(&mut bin, "b.bin", b"bbbb");
        assert_eq!(a, b);
    }

    #[test]
    fn test_xtr_claim_is_sticky() {
        let sub = XtrSubBinary::new(
            0,
            8,
            SharedBuf::new(vec![0u8; 8]),
            XtrMetadata {
                arch: "arm".into(),
                machine: "arm".into(),
                format: "mach0".into(),
                bits: 64,
                has_crypto: false,
            },
            1,
        );
        assert!(!sub.is_loaded());
        assert!(sub.claim());
        assert!(sub.is_loaded());
        assert!(!sub.claim());
    }

    #[test]
    fn test_materialized_object_copies_xtr_metadata() {
        #[derive(Debug)]
        struct ToyXtr;
        impl XtrPlugin for ToyXtr {
            fn name(&self) -> &'static str {
                "xtr.toy"
            }
            fn matches(&self, buf: &[u8]) -> bool {
                buf.starts_with(b"TOY!")
            }
            fn extract_all(&self, buf: &SharedBuf) -> Result<Vec<XtrSubBinary>> {
                Ok(vec![XtrSubBinary::new(
                    0,
                    buf.len(),
                    buf.clone(),
                    XtrMetadata {
                        arch: "toy".into(),
                        machine: "toy".into(),
                        format: "toyfmt".into(),
                        bits: 32,
                        has_crypto: true,
                    },
                    1,
                )])
            }
        }

        let mut bin = Bin::new();
        bin.register_xtr_plugin(Arc::new(ToyXtr));
        bin.open_buffer("a.toy", b"TOY!data".to_vec(), LoadOptions::default(), None)
            .unwrap();

        let id = bin.find_by_arch_bits("toy", 32).unwrap();
        let info = &bin.file_by_id(id).unwrap().object.as_ref().unwrap().info;
        assert_eq!(info.arch, "toy");
        assert_eq!(info.format, "toyfmt");
        assert_eq!(info.bits, 32);
        assert!(info.has_crypto);
    }

    #[test]
    fn test_add_class_and_method_on_cur() {
        let mut bin = Bin::new();
        open_plain(&mut bin, "a.bin", b"aaaa");
        bin.add_class("Foo", None, 0).unwrap();
        let m = bin.add_method("Foo", "bar", 0).unwrap();
        assert_eq!(m.name, "bar");
        let object = bin.cur().unwrap().object.as_ref().unwrap();
        assert_eq!(object.classes.len(), 1);
    }

    #[test]
    fn test_unparsed_buffer_falls_back_to_any() {
        let mut bin = Bin::new();
        let id = open_plain(&mut bin, "garbage.bin", &[0u8; 32]);
        let bf = bin.file_by_id(id).unwrap();
        assert_eq!(bf.cur_plugin().unwrap().name(), "any");
        // object size defaults to the whole buffer
        assert_eq!(bf.object.as_ref().unwrap().size, 32);
    }
}
