use bytes::Bytes;
use symbolic::common::{ByteView, SelfCell};
use symbolic::demangle::{Demangle, DemangleOptions};
use symbolic::symcache::{Function, SymCache};

use crate::caching::{CacheEntry, CacheError};
use crate::types::ResolvedFrame;

/// Options for demangling all symbols.
const DEMANGLE_OPTIONS: DemangleOptions = DemangleOptions::complete().return_type(false);

pub type OwnedSymCache = SelfCell<ByteView<'static>, SymCache<'static>>;

/// An opened symbol table of one binary.
pub struct SymbolTable {
    symcache: OwnedSymCache,
}

impl std::fmt::Debug for SymbolTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymbolTable").finish_non_exhaustive()
    }
}

impl SymbolTable {
    /// Opens a serialized SymCache.
    pub fn parse(data: Bytes) -> CacheEntry<Self> {
        let view = ByteView::from_vec(Vec::from(data));
        let symcache = SelfCell::try_new(view, |p| unsafe { SymCache::parse(&*p) })
            .map_err(|e| {
                let dynerr: &dyn std::error::Error = &e; // tracing expects a `&dyn Error`
                tracing::error!(error = dynerr, "failed to open symbol table");
                CacheError::Malformed(e.to_string())
            })?;
        Ok(Self { symcache })
    }

    /// Resolves `address` to its frames, innermost inlined function first.
    ///
    /// An address that is not covered by the table yields no frames.
    pub fn lookup(&self, address: u64) -> Vec<ResolvedFrame> {
        self.symcache
            .get()
            .lookup(address)
            .map(|location| {
                let function = location.function();
                ResolvedFrame {
                    name: demangle(&function),
                    system_name: function.name().to_owned(),
                    file: location.file().map(|f| f.full_path()).unwrap_or_default(),
                    line: i64::from(location.line()),
                    is_fallback: false,
                }
            })
            .collect()
    }
}

fn demangle(function: &Function<'_>) -> String {
    function
        .name_for_demangling()
        .demangle(DEMANGLE_OPTIONS)
        .unwrap_or_else(|| function.name().to_owned())
}
