//! Parsed binary objects and the per-object class/method table.

use std::collections::HashMap;
use std::sync::Arc;

use crate::plugin::BinPlugin;
use crate::types::{BinField, BinInfo, BinSymbol, LoadOptions, Section};

/// What a format plugin hands back after binding to a buffer region.
#[derive(Debug, Default)]
pub struct ParsedObject {
    pub base_addr: u64,
    /// Reported object size; `None` means "use the buffer/sub-binary size".
    pub size: Option<u64>,
    pub sections: Vec<Section>,
    pub symbols: Vec<BinSymbol>,
    pub info: BinInfo,
    pub lang: Option<String>,
}

/// The parsed view of one binary image inside a [`crate::BinFile`].
#[derive(Debug)]
pub struct BinObject {
    pub plugin: Arc<dyn BinPlugin>,
    pub opts: LoadOptions,
    /// Byte offset of this image within the owning file's buffer.
    pub boffset: u64,
    /// Byte size of this image.
    pub size: u64,
    pub sections: Vec<Section>,
    pub symbols: Vec<BinSymbol>,
    pub info: BinInfo,
    pub classes: ClassTable,
}

impl BinObject {
    /// Bind `plugin`'s parse result to the region `[boffset, boffset +
    /// fallback_size)`. The fallback size applies when the plugin does not
    /// report one, which is the common case outside extractor paths.
    pub(crate) fn new(
        plugin: Arc<dyn BinPlugin>,
        parsed: ParsedObject,
        opts: LoadOptions,
        boffset: u64,
        fallback_size: u64,
    ) -> Self {
        let size = parsed.size.filter(|s| *s != 0).unwrap_or(fallback_size);
        let mut info = parsed.info;
        if info.lang.is_none() {
            info.lang = parsed.lang;
        }
        Self {
            plugin,
            opts,
            boffset,
            size,
            sections: parsed.sections,
            symbols: parsed.symbols,
            info,
            classes: ClassTable::default(),
        }
    }

    /// Declared base address from the load options.
    pub fn base_addr(&self) -> u64 {
        self.opts.base_addr
    }

    /// Translate a physical offset to a virtual address through the section
    /// list. `None` when no section maps the offset.
    pub fn p2v(&self, paddr: u64) -> Option<u64> {
        self.sections
            .iter()
            .find(|s| s.size > 0 && paddr >= s.paddr && paddr < s.paddr + s.size)
            .map(|s| s.vaddr + (paddr - s.paddr))
    }

    /// Translate a virtual address back to a physical offset.
    pub fn v2p(&self, vaddr: u64) -> Option<u64> {
        self.sections
            .iter()
            .find(|s| {
                let vsize = if s.vsize > 0 { s.vsize } else { s.size };
                vsize > 0 && vaddr >= s.vaddr && vaddr < s.vaddr + vsize
            })
            .map(|s| s.paddr + (vaddr - s.vaddr))
    }
}

/// A class (type) record populated incrementally by plugins during parsing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BinClass {
    pub name: String,
    pub super_name: Option<String>,
    pub visibility: u32,
    /// Insertion order, stable across re-adds.
    pub index: u32,
    pub methods: Vec<BinSymbol>,
    pub fields: Vec<BinField>,
}

/// Hash-indexed registry of classes and their methods.
///
/// Classes live in an insertion-ordered arena; lookups go through owned
/// composite keys instead of pointers into scratch buffers.
#[derive(Debug, Default)]
pub struct ClassTable {
    classes: Vec<BinClass>,
    by_name: HashMap<String, usize>,
    /// `"Class::method"` -> (class index, method index)
    methods: HashMap<String, (usize, usize)>,
}

impl ClassTable {
    /// Add a class, or return the existing one. On re-add only the
    /// superclass is overwritten (when given); the insertion index never
    /// changes.
    pub fn add_class(&mut self, name: &str, super_name: Option<&str>, visibility: u32) -> &BinClass {
        if let Some(&idx) = self.by_name.get(name) {
            if let Some(sup) = super_name {
                self.classes[idx].super_name = Some(sup.to_string());
            }
            return &self.classes[idx];
        }
        let index = self.classes.len();
        self.classes.push(BinClass {
            name: name.to_string(),
            super_name: super_name.map(str::to_string),
            visibility,
            index: index as u32,
            methods: Vec::new(),
            fields: Vec::new(),
        });
        self.by_name.insert(name.to_string(), index);
        &self.classes[index]
    }

    /// Ensure `klass` exists (created without a superclass if needed) and
    /// return its `method` record, creating it when absent. An existing
    /// record is returned unchanged, `nargs` included.
    pub fn add_method(&mut self, klass: &str, method: &str, nargs: u32) -> &BinSymbol {
        self.add_class(klass, None, 0);
        let cidx = self.by_name[klass];

        let key = format!("{klass}::{method}");
        if let Some(&(ci, mi)) = self.methods.get(&key) {
            return &self.classes[ci].methods[mi];
        }

        let midx = self.classes[cidx].methods.len();
        self.classes[cidx].methods.push(BinSymbol {
            name: method.to_string(),
            nargs,
            ..BinSymbol::default()
        });
        self.methods.insert(key, (cidx, midx));
        &self.classes[cidx].methods[midx]
    }

    pub fn class(&self, name: &str) -> Option<&BinClass> {
        self.by_name.get(name).map(|&i| &self.classes[i])
    }

    pub fn method(&self, klass: &str, method: &str) -> Option<&BinSymbol> {
        self.methods
            .get(&format!("{klass}::{method}"))
            .map(|&(ci, mi)| &self.classes[ci].methods[mi])
    }

    pub fn classes(&self) -> &[BinClass] {
        &self.classes
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}
