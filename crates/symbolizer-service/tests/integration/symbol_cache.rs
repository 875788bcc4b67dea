use std::sync::Arc;

use bytes::Bytes;
use symbolizer_service::caching::{CacheError, MemoryStore, ObjectStore, SymbolCache};
use symbolizer_service::types::ResolvedFrame;

use crate::{CountingStore, DEMO_BUILD_ID, HitCounter, ReadOnlyStore, setup_cache, setup_client};

fn frame(name: &str, line: i64) -> (String, i64) {
    (name.to_owned(), line)
}

fn names_and_lines(frames: Vec<ResolvedFrame>) -> Vec<(String, i64)> {
    frames.into_iter().map(|f| (f.name, f.line)).collect()
}

#[tokio::test]
async fn test_symbol_table_lookup() {
    let hitcounter = HitCounter::new();
    let (cache, _) = setup_cache(&hitcounter.url("/symbols/"));

    let table = cache.get_symbol_table(DEMO_BUILD_ID).await.unwrap();

    assert_eq!(
        names_and_lines(table.lookup(0x1155)),
        vec![frame("parse_count", 11)]
    );
    assert_eq!(names_and_lines(table.lookup(0x1172)), vec![frame("main", 16)]);
    // `square` is inlined into `main`
    assert_eq!(
        names_and_lines(table.lookup(0x119e)),
        vec![frame("square", 6), frame("main", 17)]
    );

    let frames = table.lookup(0x1155);
    assert!(frames[0].file.ends_with("demo.c"), "{:?}", frames[0].file);
    assert!(!frames[0].is_fallback);

    // before the first function
    assert!(table.lookup(0x10).is_empty());
}

#[tokio::test]
async fn test_symbol_table_is_stored() {
    let hitcounter = HitCounter::new();
    let (cache, store) = setup_cache(&hitcounter.url("/symbols/"));

    let first = cache.get_symbol_table_bytes(DEMO_BUILD_ID).await.unwrap();
    assert_eq!(hitcounter.accesses(), 1);
    assert_eq!(store.get(DEMO_BUILD_ID).await.unwrap(), first);

    let second = cache.get_symbol_table_bytes(DEMO_BUILD_ID).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(hitcounter.accesses(), 0);
}

#[tokio::test]
async fn test_concurrent_misses_are_loaded_once() {
    let hitcounter = HitCounter::new();
    let client = setup_client(&hitcounter.url("/symbols/"));
    let store = Arc::new(CountingStore::default());
    let cache = SymbolCache::new(store.clone(), None, client);

    let (a, b, c, d) = tokio::join!(
        cache.get_symbol_table_bytes(DEMO_BUILD_ID),
        cache.get_symbol_table_bytes(DEMO_BUILD_ID),
        cache.get_symbol_table_bytes(DEMO_BUILD_ID),
        cache.get_symbol_table_bytes(DEMO_BUILD_ID),
    );

    let a = a.unwrap();
    assert_eq!(b.unwrap(), a);
    assert_eq!(c.unwrap(), a);
    assert_eq!(d.unwrap(), a);
    assert_eq!(hitcounter.accesses(), 1);
    assert_eq!(store.uploads(), 1);
}

#[tokio::test]
async fn test_known_missing_skips_store() {
    let hitcounter = HitCounter::new();
    let (cache, store) = setup_cache(&hitcounter.url("/respond_statuscode/404/"));

    let result = cache.get_symbol_table_bytes("abcdef").await;
    assert_eq!(result, Err(CacheError::NotFound));
    assert_eq!(hitcounter.accesses(), 1);
    assert!(store.is_empty());

    // the negative cache answers before the store is asked
    store
        .upload("abcdef", Bytes::from_static(b"symcache"))
        .await
        .unwrap();
    let result = cache.get_symbol_table_bytes("abcdef").await;
    assert_eq!(result, Err(CacheError::NotFound));
    assert_eq!(hitcounter.accesses(), 0);
}

#[tokio::test]
async fn test_failed_upload_is_not_fatal() {
    let hitcounter = HitCounter::new();
    let client = setup_client(&hitcounter.url("/symbols/"));
    let cache = SymbolCache::new(Arc::new(ReadOnlyStore), None, client);

    let table = cache.get_symbol_table(DEMO_BUILD_ID).await.unwrap();
    assert_eq!(
        names_and_lines(table.lookup(0x1155)),
        vec![frame("parse_count", 11)]
    );

    // nothing was stored, but the debug file is still held in memory
    cache.get_symbol_table(DEMO_BUILD_ID).await.unwrap();
    assert_eq!(hitcounter.accesses(), 1);
}

#[tokio::test]
async fn test_debuginfo_store_is_used_before_debuginfod() {
    let hitcounter = HitCounter::new();
    let client = setup_client(&hitcounter.url("/respond_statuscode/500/"));

    let debuginfo_store = Arc::new(MemoryStore::default());
    let compressed = zstd::encode_all(&symbolizer_test::demo_debuginfo()[..], 3).unwrap();
    debuginfo_store
        .upload(&format!("{DEMO_BUILD_ID}/debuginfo"), Bytes::from(compressed))
        .await
        .unwrap();

    let store = Arc::new(MemoryStore::default());
    let cache = SymbolCache::new(store.clone(), Some(debuginfo_store), client);

    let table = cache.get_symbol_table(DEMO_BUILD_ID).await.unwrap();
    assert_eq!(names_and_lines(table.lookup(0x1172)), vec![frame("main", 16)]);
    assert_eq!(store.len(), 1);
    assert_eq!(hitcounter.accesses(), 0);
}

#[tokio::test]
async fn test_garbage_is_malformed() {
    let hitcounter = HitCounter::new();
    let (cache, store) = setup_cache(&hitcounter.url("/garbage_data/"));

    let result = cache.get_symbol_table_bytes("abcdef").await;
    assert!(matches!(result, Err(CacheError::Malformed(_))), "{result:?}");
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_empty_build_id_is_rejected() {
    let hitcounter = HitCounter::new();
    let (cache, _) = setup_cache(&hitcounter.url("/symbols/"));

    let result = cache.get_symbol_table_bytes("").await;
    assert_eq!(result, Err(CacheError::InvalidBuildId(String::new())));
    assert_eq!(hitcounter.accesses(), 0);
}
