//! Caching of converted symbol tables.
//!
//! Symbol tables are kept in an [`ObjectStore`] keyed by build ID. On a miss the debug file is
//! downloaded, converted and written back to the store before it is returned. Concurrent
//! requests for the same build ID share one lookup.

use std::sync::Arc;

use bytes::Bytes;

use crate::download::DebuginfodClient;
use crate::symbols::{SymbolTable, process_elf_data};
use crate::types::sanitize_build_id;
use crate::utils::singleflight::SingleFlight;

mod cache_error;
pub mod objstore;

pub use cache_error::{CacheEntry, CacheError};
pub use objstore::{FilesystemStore, MemoryStore, ObjectStore, StoreError};

fn record_op(cache: &str, op: &str, status: &str) {
    metric!(
        counter("symbolizer.cache.operations") += 1,
        "cache" => cache,
        "op" => op,
        "status" => status,
    );
}

/// Write-through cache of symbol tables in front of debuginfod.
#[derive(Debug, Clone)]
pub struct SymbolCache {
    store: Arc<dyn ObjectStore>,
    debuginfo_store: Option<Arc<dyn ObjectStore>>,
    client: Arc<DebuginfodClient>,
    flights: Arc<SingleFlight<Bytes>>,
}

impl SymbolCache {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        debuginfo_store: Option<Arc<dyn ObjectStore>>,
        client: Arc<DebuginfodClient>,
    ) -> Self {
        Self {
            store,
            debuginfo_store,
            client,
            flights: Arc::new(SingleFlight::new()),
        }
    }

    /// Returns the opened symbol table of `build_id`.
    pub async fn get_symbol_table(&self, build_id: &str) -> CacheEntry<SymbolTable> {
        let data = self.get_symbol_table_bytes(build_id).await?;
        SymbolTable::parse(data)
    }

    /// Returns the serialized symbol table of `build_id`, creating it on a miss.
    ///
    /// Build IDs debuginfod recently reported as missing fail with [`CacheError::NotFound`]
    /// without touching the store. Failing to write a new table back to the store is logged
    /// and otherwise ignored. Callers asking for a build ID that is already being loaded wait
    /// for that load instead of starting their own.
    pub async fn get_symbol_table_bytes(&self, build_id: &str) -> CacheEntry<Bytes> {
        let build_id = match sanitize_build_id(build_id)? {
            "" => return Err(CacheError::InvalidBuildId(String::new())),
            id => id,
        };

        if self.client.is_known_missing(build_id) {
            record_op("negative", "get", "hit");
            return Err(CacheError::NotFound);
        }

        let this = self.clone();
        let key = build_id.to_owned();
        self.flights
            .run(build_id, async move { this.load_or_create(&key).await })
            .await
    }

    async fn load_or_create(&self, build_id: &str) -> CacheEntry<Bytes> {
        match self.store.get(build_id).await {
            Ok(data) => {
                record_op(self.store.name(), "get", "hit");
                return Ok(data);
            }
            Err(err) if err.is_not_found() => {
                record_op(self.store.name(), "get", "miss");
            }
            Err(err) => {
                record_op(self.store.name(), "get", "error");
                tracing::warn!(
                    build_id,
                    error = &err as &dyn std::error::Error,
                    "failed to read symbol table from store"
                );
            }
        }

        let debuginfo = self.fetch_debuginfo(build_id).await?;
        let symcache = process_elf_data(debuginfo).await?;

        match self.store.upload(build_id, symcache.clone()).await {
            Ok(()) => record_op(self.store.name(), "set", "success"),
            Err(err) => {
                record_op(self.store.name(), "set", "error");
                tracing::warn!(
                    build_id,
                    error = &err as &dyn std::error::Error,
                    "failed to store symbol table"
                );
            }
        }

        Ok(symcache)
    }

    async fn fetch_debuginfo(&self, build_id: &str) -> CacheEntry<Bytes> {
        if let Some(store) = &self.debuginfo_store {
            let key = format!("{build_id}/debuginfo");
            match store.get(&key).await {
                Ok(data) => {
                    record_op("debuginfo", "get", "hit");
                    return Ok(data);
                }
                Err(err) if err.is_not_found() => record_op("debuginfo", "get", "miss"),
                Err(err) => {
                    record_op("debuginfo", "get", "error");
                    tracing::warn!(
                        build_id,
                        error = &err as &dyn std::error::Error,
                        "failed to read debug file from store"
                    );
                }
            }
        }

        self.client.fetch_debuginfo(build_id).await
    }
}
