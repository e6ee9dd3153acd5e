//! Plugin capability contracts and the plugin-selection protocol.

use std::sync::Arc;

use crate::buffer::SharedBuf;
use crate::error::Result;
use crate::file::{BinFile, XtrSubBinary};
use crate::object::ParsedObject;
use crate::types::{FileHashRecord, LoadOptions, TryCatchRegion};

/// Default minimum string length when neither the caller nor the plugin
/// asks for one.
pub const DEFAULT_MIN_STR_LENGTH: usize = 4;

/// A format parser plugin: given bytes, produce sections/symbols/info, or
/// fail.
pub trait BinPlugin: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &'static str;

    /// Content sniff: does this buffer look like our format?
    fn matches(&self, buf: &[u8]) -> bool;

    /// Filename-pattern fallback used when no plugin matches by content.
    fn matches_filename(&self, _filename: &str) -> bool {
        false
    }

    /// Parse the buffer region into an object description.
    fn parse(&self, buf: &[u8], opts: &LoadOptions) -> Result<ParsedObject>;

    /// Minimum default string length this format prefers.
    fn min_string_length(&self) -> usize {
        DEFAULT_MIN_STR_LENGTH
    }

    /// Format-specific extra hash records, appended after the standard set.
    fn file_hashes(&self, _bf: &BinFile) -> Option<Vec<FileHashRecord>> {
        None
    }

    /// Exception-handling regions, for formats that carry them.
    fn try_catch(&self, _bf: &BinFile) -> Vec<TryCatchRegion> {
        Vec::new()
    }
}

/// An extractor plugin for container formats bundling several images.
pub trait XtrPlugin: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &'static str;

    fn matches(&self, buf: &[u8]) -> bool;

    /// Split the container into sub-binary descriptors without
    /// materializing any of them.
    fn extract_all(&self, buf: &SharedBuf) -> Result<Vec<XtrSubBinary>>;
}

/// Select a format plugin for a buffer, first match wins:
/// forced override, exact requested name, content sniff in registration
/// order, filename pattern, then the catch-all "any" plugin.
///
/// Returns `None` only when the catch-all is missing from `plugins`, which
/// is a registry configuration error rather than a runtime condition.
pub(crate) fn resolve_plugin(
    plugins: &[Arc<dyn BinPlugin>],
    force: Option<&str>,
    requested: Option<&str>,
    buf: &[u8],
    filename: &str,
) -> Option<Arc<dyn BinPlugin>> {
    let by_name = |name: &str| plugins.iter().find(|p| p.name() == name).cloned();

    if let Some(p) = force.and_then(by_name) {
        return Some(p);
    }
    if let Some(p) = requested.and_then(by_name) {
        return Some(p);
    }
    // the catch-all matches anything, keep it out of the sniffing stages
    if let Some(p) = plugins
        .iter()
        .find(|p| p.name() != "any" && p.matches(buf))
    {
        return Some(p.clone());
    }
    if let Some(p) = plugins
        .iter()
        .find(|p| p.name() != "any" && p.matches_filename(filename))
    {
        return Some(p.clone());
    }
    by_name("any")
}

/// The generic catch-all plugin: always matches, reports nothing.
#[derive(Debug)]
pub struct AnyPlugin;

impl BinPlugin for AnyPlugin {
    fn name(&self) -> &'static str {
        "any"
    }

    fn matches(&self, _buf: &[u8]) -> bool {
        true
    }

    fn parse(&self, _buf: &[u8], opts: &LoadOptions) -> Result<ParsedObject> {
        Ok(ParsedObject {
            base_addr: opts.base_addr,
            info: crate::types::BinInfo {
                format: "any".into(),
                arch: "unknown".into(),
                ..Default::default()
            },
            ..ParsedObject::default()
        })
    }
}
