use std::time::Duration;

use symbolizer_service::caching::CacheError;
use symbolizer_service::config::DebuginfodConfig;
use symbolizer_service::download::DebuginfodClient;
use symbolizer_service::download::compression::detect_compression;

use crate::{DEMO_BUILD_ID, HitCounter, debuginfod_config, setup_client};

#[tokio::test]
async fn test_fetch_debuginfo() {
    let hitcounter = HitCounter::new();
    let client = setup_client(&hitcounter.url("/symbols/"));

    let data = client.fetch_debuginfo(DEMO_BUILD_ID).await.unwrap();
    assert_eq!(data, symbolizer_test::demo_debuginfo());
    assert_eq!(
        hitcounter.all_hits(),
        vec![(format!("/symbols/buildid/{DEMO_BUILD_ID}/debuginfo"), 1)]
    );
}

#[tokio::test]
async fn test_fetched_files_are_kept_in_memory() {
    let hitcounter = HitCounter::new();
    let client = setup_client(&hitcounter.url("/symbols/"));

    let first = client.fetch_debuginfo(DEMO_BUILD_ID).await.unwrap();
    let second = client.fetch_debuginfo(DEMO_BUILD_ID).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(hitcounter.accesses(), 1);
}

#[tokio::test]
async fn test_not_found_is_remembered() {
    let hitcounter = HitCounter::new();
    let client = setup_client(&hitcounter.url("/respond_statuscode/404/"));

    assert!(!client.is_known_missing("abcdef"));
    for _ in 0..2 {
        let result = client.fetch_debuginfo("abcdef").await;
        assert_eq!(result, Err(CacheError::NotFound));
    }

    assert!(client.is_known_missing("abcdef"));
    assert_eq!(hitcounter.accesses(), 1);
}

#[tokio::test]
async fn test_missing_fixture_is_not_found() {
    let hitcounter = HitCounter::new();
    let client = setup_client(&hitcounter.url("/symbols/"));

    let result = client.fetch_debuginfo("0000000000").await;
    assert_eq!(result, Err(CacheError::NotFound));
}

#[tokio::test]
async fn test_retryable_statuses_are_retried() {
    let hitcounter = HitCounter::new();

    for status in [500, 503, 429] {
        let client = setup_client(&hitcounter.url(&format!("/respond_statuscode/{status}/")));

        let result = client.fetch_debuginfo("abcdef").await;
        let Err(CacheError::RetriesExhausted { attempts, source }) = result else {
            panic!("unexpected result for {status}: {result:?}");
        };
        assert_eq!(attempts, 3);
        assert!(matches!(*source, CacheError::HttpStatus { status: s, .. } if s == status));
        assert_eq!(hitcounter.accesses(), 3, "{status}");
        assert!(!client.is_known_missing("abcdef"));
    }
}

#[tokio::test]
async fn test_client_errors_are_not_retried() {
    let hitcounter = HitCounter::new();

    for status in [400, 401, 403] {
        let client = setup_client(&hitcounter.url(&format!("/respond_statuscode/{status}/")));

        let result = client.fetch_debuginfo("abcdef").await;
        let Err(CacheError::HttpStatus { status: actual, .. }) = result else {
            panic!("unexpected result for {status}: {result:?}");
        };
        assert_eq!(actual, status);
        assert_eq!(hitcounter.accesses(), 1, "{status}");
    }
}

#[tokio::test]
async fn test_retry_recovers() {
    let hitcounter = HitCounter::new();
    let client = setup_client(&hitcounter.url("/fail_first/2/"));

    let data = client.fetch_debuginfo("abcdef").await.unwrap();
    assert_eq!(&data[..], b"buildid/abcdef/debuginfo");
    assert_eq!(hitcounter.accesses(), 3);
}

#[tokio::test]
async fn test_concurrent_fetches_share_one_request() {
    let hitcounter = HitCounter::new();
    let client = setup_client(&hitcounter.url("/delay/200ms/"));

    let (a, b, c) = tokio::join!(
        client.fetch_debuginfo("abcdef"),
        client.fetch_debuginfo("abcdef"),
        client.fetch_debuginfo("abcdef"),
    );

    let expected = b"buildid/abcdef/debuginfo";
    assert_eq!(&a.unwrap()[..], expected);
    assert_eq!(&b.unwrap()[..], expected);
    assert_eq!(&c.unwrap()[..], expected);
    assert_eq!(hitcounter.accesses(), 1);
}

#[tokio::test]
async fn test_timeout() {
    symbolizer_test::setup();
    let hitcounter = HitCounter::new();
    let config = DebuginfodConfig {
        max_attempts: 2,
        timeout: Duration::from_millis(100),
        ..debuginfod_config()
    };
    let client = DebuginfodClient::new(&hitcounter.url("/delay/1h/"), &config).unwrap();

    let result = client.fetch_debuginfo("abcdef").await;
    let Err(CacheError::RetriesExhausted { attempts, source }) = result else {
        panic!("unexpected result: {result:?}");
    };
    assert_eq!(attempts, 2);
    assert_eq!(*source, CacheError::Timeout(Duration::from_millis(100)));
    assert_eq!(hitcounter.accesses(), 2);
}

#[tokio::test]
async fn test_compressed_body_is_returned_as_is() {
    let hitcounter = HitCounter::new();
    let client = setup_client(&hitcounter.url("/gzip_data/"));

    let data = client.fetch_debuginfo("abcdef").await.unwrap();
    assert_eq!(&data[..2], b"\x1f\x8b");

    let decompressed = detect_compression(data).unwrap();
    assert_eq!(&decompressed[..], b"buildid/abcdef/debuginfo");
}

#[tokio::test]
async fn test_redirects_are_followed() {
    let hitcounter = HitCounter::new();
    let client = setup_client(&hitcounter.url("/redirect/garbage_data/"));

    let data = client.fetch_debuginfo("abcdef").await.unwrap();
    assert_eq!(&data[..], b"buildid/abcdef/debuginfo");
    assert_eq!(
        hitcounter.all_hits(),
        vec![
            ("/garbage_data/buildid/abcdef/debuginfo".to_owned(), 1),
            ("/redirect/garbage_data/buildid/abcdef/debuginfo".to_owned(), 1),
        ]
    );
}

#[tokio::test]
async fn test_invalid_build_id_never_hits_the_server() {
    let hitcounter = HitCounter::new();
    let client = setup_client(&hitcounter.url("/garbage_data/"));

    for build_id in ["../../etc/passwd", "abc def", "abc?x=1"] {
        let result = client.fetch_debuginfo(build_id).await;
        assert_eq!(result, Err(CacheError::InvalidBuildId(build_id.to_owned())));
    }
    assert_eq!(hitcounter.accesses(), 0);
}
