use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Url;
use symbolizer_service::caching::{MemoryStore, ObjectStore, StoreError, SymbolCache};
use symbolizer_service::config::{DebuginfodConfig, SymbolizerConfig};
use symbolizer_service::download::DebuginfodClient;
use symbolizer_service::profile::{Location, Mapping, Profile};
use symbolizer_service::symbolication::Symbolizer;
use symbolizer_test as test;

pub use test::{DEMO_BUILD_ID, HitCounter};

/// A client configuration that retries without waiting.
pub fn debuginfod_config() -> DebuginfodConfig {
    DebuginfodConfig {
        min_backoff: Duration::ZERO,
        max_backoff: Duration::ZERO,
        connect_timeout: Duration::from_secs(1),
        timeout: Duration::from_secs(5),
        ..Default::default()
    }
}

/// Sets up logging and creates a client for the debuginfod server at `base_url`.
pub fn setup_client(base_url: &Url) -> Arc<DebuginfodClient> {
    test::setup();
    Arc::new(DebuginfodClient::new(base_url, &debuginfod_config()).unwrap())
}

/// Creates a cache that keeps symbol tables in a fresh [`MemoryStore`].
pub fn setup_cache(base_url: &Url) -> (SymbolCache, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::default());
    let cache = SymbolCache::new(store.clone(), None, setup_client(base_url));
    (cache, store)
}

pub fn setup_symbolizer(base_url: &Url) -> Symbolizer {
    let (cache, _) = setup_cache(base_url);
    Symbolizer::new(cache, &SymbolizerConfig::default()).unwrap()
}

/// A store that has nothing and refuses every upload.
#[derive(Debug)]
pub struct ReadOnlyStore;

#[async_trait]
impl ObjectStore for ReadOnlyStore {
    fn name(&self) -> &'static str {
        "readonly"
    }

    async fn get(&self, _key: &str) -> Result<Bytes, StoreError> {
        Err(StoreError::NotFound)
    }

    async fn upload(&self, _key: &str, _data: Bytes) -> Result<(), StoreError> {
        Err(StoreError::Io {
            context: "failed to save object",
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
        })
    }
}

/// A [`MemoryStore`] that counts the uploads it receives.
#[derive(Debug, Default)]
pub struct CountingStore {
    inner: MemoryStore,
    uploads: AtomicUsize,
}

impl CountingStore {
    pub fn uploads(&self) -> usize {
        self.uploads.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ObjectStore for CountingStore {
    fn name(&self) -> &'static str {
        "counting"
    }

    async fn get(&self, key: &str) -> Result<Bytes, StoreError> {
        self.inner.get(key).await
    }

    async fn upload(&self, key: &str, data: Bytes) -> Result<(), StoreError> {
        self.uploads.fetch_add(1, Ordering::Relaxed);
        self.inner.upload(key, data).await
    }
}

/// Creates a profile with one unsymbolized mapping per `(filename, build_id)` and one location
/// per address.
pub fn make_profile(mappings: &[(&str, &str, Vec<u64>)]) -> Profile {
    let mut profile = Profile {
        string_table: vec![String::new()],
        ..Default::default()
    };

    fn intern(profile: &mut Profile, s: &str) -> i64 {
        profile.string_table.push(s.to_owned());
        profile.string_table.len() as i64 - 1
    }

    for (filename, build_id, addresses) in mappings {
        let mapping_id = profile.mapping.len() as u64 + 1;
        let filename = intern(&mut profile, filename);
        let build_id = intern(&mut profile, build_id);
        profile.mapping.push(Mapping {
            id: mapping_id,
            memory_start: 0x5555_0000_0000,
            memory_limit: 0x5555_0001_0000,
            filename,
            build_id,
            ..Default::default()
        });

        for &address in addresses {
            profile.location.push(Location {
                id: profile.location.len() as u64 + 1,
                mapping_id,
                address,
                ..Default::default()
            });
        }
    }

    profile
}

/// Returns `(name, filename, line)` of every line of the location at `index`.
pub fn frames(profile: &Profile, index: usize) -> Vec<(String, String, i64)> {
    profile.location[index]
        .line
        .iter()
        .map(|line| {
            let function = profile
                .function
                .iter()
                .find(|f| f.id == line.function_id)
                .unwrap();
            (
                profile.string(function.name).unwrap().to_owned(),
                profile.string(function.filename).unwrap().to_owned(),
                line.line,
            )
        })
        .collect()
}
