use std::sync::Arc;

use symbolizer_service::caching::{FilesystemStore, MemoryStore, SymbolCache};
use symbolizer_service::config::SymbolizerConfig;
use symbolizer_service::profile::Profile;
use symbolizer_service::symbolication::Symbolizer;

use crate::{DEMO_BUILD_ID, HitCounter, frames, make_profile, setup_client, setup_symbolizer};

fn frame(name: &str, line: i64) -> (String, i64) {
    (name.to_owned(), line)
}

fn names_and_lines(profile: &Profile, index: usize) -> Vec<(String, i64)> {
    frames(profile, index)
        .into_iter()
        .map(|(name, _, line)| (name, line))
        .collect()
}

#[tokio::test]
async fn test_symbolize_profile() {
    let hitcounter = HitCounter::new();
    let symbolizer = setup_symbolizer(&hitcounter.url("/symbols/"));

    let mut profile = make_profile(&[(
        "/usr/bin/demo",
        DEMO_BUILD_ID,
        vec![0x1155, 0x119e, 0x1172],
    )]);
    symbolizer.symbolize_pprof(&mut profile).await.unwrap();

    assert_eq!(names_and_lines(&profile, 0), vec![frame("parse_count", 11)]);
    assert_eq!(
        names_and_lines(&profile, 1),
        vec![frame("square", 6), frame("main", 17)]
    );
    assert_eq!(names_and_lines(&profile, 2), vec![frame("main", 16)]);

    for (_, file, _) in frames(&profile, 1) {
        assert!(file.ends_with("demo.c"), "{file}");
    }

    // `main` is shared by two locations and starts at its smallest line
    let names: Vec<_> = profile
        .function
        .iter()
        .map(|f| profile.string(f.name).unwrap())
        .collect();
    assert_eq!(names, vec!["parse_count", "square", "main"]);
    assert_eq!(profile.function[2].start_line, 16);

    let mapping = &profile.mapping[0];
    assert!(mapping.has_functions);
    assert!(mapping.has_filenames);
    assert!(mapping.has_line_numbers);

    assert_eq!(hitcounter.accesses(), 1);
}

#[tokio::test]
async fn test_unknown_build_id_gets_fallback_frames() {
    let hitcounter = HitCounter::new();
    let symbolizer = setup_symbolizer(&hitcounter.url("/respond_statuscode/404/"));

    let mut profile = make_profile(&[("/usr/bin/demo", "deadbeef", vec![0x1155, 0x1172])]);
    symbolizer.symbolize_pprof(&mut profile).await.unwrap();

    assert_eq!(
        frames(&profile, 0),
        vec![("demo!0x1155".to_owned(), String::new(), 0)]
    );
    assert_eq!(
        frames(&profile, 1),
        vec![("demo!0x1172".to_owned(), String::new(), 0)]
    );
    assert!(!profile.mapping[0].has_functions);
    assert_eq!(hitcounter.accesses(), 1);
}

#[tokio::test]
async fn test_unresolvable_address_clears_has_functions() {
    let hitcounter = HitCounter::new();
    let symbolizer = setup_symbolizer(&hitcounter.url("/symbols/"));

    let mut profile = make_profile(&[("/usr/bin/demo", DEMO_BUILD_ID, vec![0x1155, 0x10])]);
    symbolizer.symbolize_pprof(&mut profile).await.unwrap();

    assert_eq!(names_and_lines(&profile, 0), vec![frame("parse_count", 11)]);
    assert_eq!(names_and_lines(&profile, 1), vec![frame("demo!0x10", 0)]);
    assert!(!profile.mapping[0].has_functions);
}

#[tokio::test]
async fn test_mixed_mappings() {
    let hitcounter = HitCounter::new();
    let client = setup_client(&hitcounter.url("/symbols/"));
    let store = Arc::new(MemoryStore::default());
    let cache = SymbolCache::new(store, None, client);
    let config = SymbolizerConfig {
        max_debuginfod_concurrency: 1,
        ..Default::default()
    };
    let symbolizer = Symbolizer::new(cache, &config).unwrap();

    let mut profile = make_profile(&[
        ("/usr/bin/demo", DEMO_BUILD_ID, vec![0x1155]),
        ("/usr/lib/libc.so.6", "0000aaaa", vec![0x29d90]),
        ("[vdso]", "", vec![0xa4c]),
        ("/usr/bin/other", "1111bbbb", vec![0x42]),
    ]);
    profile.mapping[3].has_functions = true;
    let untouched = profile.location[3].clone();

    symbolizer.symbolize_pprof(&mut profile).await.unwrap();

    assert_eq!(names_and_lines(&profile, 0), vec![frame("parse_count", 11)]);
    assert_eq!(names_and_lines(&profile, 1), vec![frame("libc.so.6!0x29d90", 0)]);
    assert_eq!(names_and_lines(&profile, 2), vec![frame("[vdso]!0xa4c", 0)]);
    assert_eq!(profile.location[3], untouched);

    let has_functions: Vec<_> = profile.mapping.iter().map(|m| m.has_functions).collect();
    assert_eq!(has_functions, vec![true, false, false, true]);

    // the empty build ID is never requested
    let mut hits: Vec<_> = hitcounter.all_hits().into_iter().map(|(uri, _)| uri).collect();
    hits.sort();
    assert_eq!(
        hits,
        vec![
            "/symbols/buildid/0000aaaa/debuginfo".to_owned(),
            format!("/symbols/buildid/{DEMO_BUILD_ID}/debuginfo"),
        ]
    );
}

#[tokio::test]
async fn test_symbol_tables_survive_restarts() {
    let hitcounter = HitCounter::new();
    let cache_dir = symbolizer_test::tempdir();

    for _ in 0..2 {
        let client = setup_client(&hitcounter.url("/symbols/"));
        let store = Arc::new(FilesystemStore::new(cache_dir.path().to_owned()));
        let cache = SymbolCache::new(store, None, client);
        let symbolizer = Symbolizer::new(cache, &SymbolizerConfig::default()).unwrap();

        let mut profile = make_profile(&[("/usr/bin/demo", DEMO_BUILD_ID, vec![0x1172])]);
        symbolizer.symbolize_pprof(&mut profile).await.unwrap();
        assert_eq!(names_and_lines(&profile, 0), vec![frame("main", 16)]);
    }

    assert!(cache_dir.path().join(DEMO_BUILD_ID).is_file());
    assert_eq!(hitcounter.accesses(), 1);
}

#[tokio::test]
async fn test_symbolized_profile_round_trips() {
    let hitcounter = HitCounter::new();
    let symbolizer = setup_symbolizer(&hitcounter.url("/symbols/"));

    let mut profile = make_profile(&[("/usr/bin/demo", DEMO_BUILD_ID, vec![0x119e])]);
    symbolizer.symbolize_pprof(&mut profile).await.unwrap();

    let encoded = profile.encode_gzip().unwrap();
    let decoded = Profile::decode_bytes(&encoded).unwrap();
    assert_eq!(decoded, profile);

    // a second pass has nothing left to do
    let mut again = decoded.clone();
    symbolizer.symbolize_pprof(&mut again).await.unwrap();
    assert_eq!(again, decoded);
}
