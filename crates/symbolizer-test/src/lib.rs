//! Helpers for testing the symbolizer against a local debuginfod server.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - Hold on to the [`HitCounter`] until all requests to it have been made. Once it is
//!    dropped the server stops and requests to it fail with connection errors.

use std::collections::BTreeMap;
use std::io::Write;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use axum::Router;
use axum::extract::{self, OriginalUri, Request, State};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use flate2::Compression;
use flate2::write::GzEncoder;
use reqwest::{StatusCode, Url};
use tower_http::services::ServeDir;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

pub use tempfile::TempDir;

/// Build ID of the debug file served under `/symbols`, built from `tests/fixtures/src/demo.c`.
pub const DEMO_BUILD_ID: &str = "a500ea6ead16c123957928b42e80df28f90bc1e2";

/// Setup the test environment.
///
/// Initializes logs: The logger only captures logs from the `symbolizer_service` crate and
/// mutes all other logs.
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("symbolizer_service=trace"))
        .with_target(false)
        .with_test_writer()
        .try_init()
        .ok();
}

/// Creates a temporary directory.
///
/// The directory is deleted when the [`TempDir`] instance is dropped.
pub fn tempdir() -> TempDir {
    TempDir::new().unwrap()
}

/// Returns the absolute path to the given fixture.
///
/// Fixtures are located in the `tests/fixtures` directory, located from the workspace root.
///
/// # Panics
///
/// Panics if the fixture path does not exist on the file system.
pub fn fixture(path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();

    let mut full_path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    full_path.pop(); // to /crates/
    full_path.pop(); // to /
    full_path.push("./tests/fixtures/");
    full_path.push(path);

    assert!(full_path.exists(), "'{}' does not exist", path.display());

    full_path
}

/// Returns the contents of a fixture.
///
/// # Panics
///
/// Panics if the fixture does not exist or cannot be read.
pub fn read_fixture(path: impl AsRef<Path>) -> Vec<u8> {
    std::fs::read(fixture(path)).unwrap()
}

/// Returns the debug file of [`DEMO_BUILD_ID`].
pub fn demo_debuginfo() -> Vec<u8> {
    read_fixture(format!("debuginfod/buildid/{DEMO_BUILD_ID}/debuginfo"))
}

/// Compresses `data` with gzip.
pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// A test server that binds to a random port and serves a web app.
///
/// This server requires a `tokio` runtime and is supposed to be run in a `tokio::test`. It
/// automatically stops serving when dropped.
#[derive(Debug)]
pub struct Server {
    pub handle: tokio::task::JoinHandle<()>,
    pub socket: SocketAddr,
}

impl Server {
    pub fn with_router(router: Router) -> Self {
        let addr = SocketAddr::from(([127, 0, 0, 1], 0));
        let listener = std::net::TcpListener::bind(addr).unwrap();
        listener.set_nonblocking(true).unwrap();
        let socket = listener.local_addr().unwrap();
        let listener = tokio::net::TcpListener::from_std(listener).unwrap();

        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self { handle, socket }
    }

    /// Returns the socket address that this server listens on.
    pub fn addr(&self) -> SocketAddr {
        self.socket
    }

    /// Returns the port that this server listens on.
    pub fn port(&self) -> u16 {
        self.addr().port()
    }

    /// Returns a full URL pointing to the given path.
    pub fn url(&self, path: &str) -> Url {
        let path = path.trim_start_matches('/');
        format!("http://127.0.0.1:{}/{}", self.port(), path)
            .parse()
            .unwrap()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

type Hits = Arc<Mutex<BTreeMap<String, usize>>>;

async fn count_hits(
    State(hits): State<Hits>,
    OriginalUri(uri): OriginalUri,
    request: Request,
    next: Next,
) -> Response {
    {
        let mut hits = hits.lock().unwrap();
        *hits.entry(uri.to_string()).or_default() += 1;
    }

    next.run(request).await
}

/// A debuginfod lookalike that records how often each URL was requested.
///
/// Every route takes the path the client appends (`buildid/{id}/debuginfo`) as its tail, so a
/// route prefix can be used directly as a debuginfod base URL:
///
///  - `/symbols/`: serves the debug files in `tests/fixtures/debuginfod`.
///  - `/respond_statuscode/{num}/`: responds with the given status code.
///  - `/garbage_data/`: responds with the requested path as body.
///  - `/gzip_data/`: responds with the gzip compressed path, without a `Content-Encoding`.
///  - `/delay/{time}/`: waits for the given [`humantime`] duration, then behaves like
///    `/garbage_data/`.
///  - `/fail_first/{num}/`: responds with `503` to the first `num` hits, then behaves like
///    `/garbage_data/`.
///  - `/redirect/{path}`: redirects to `/{path}`.
pub struct HitCounter {
    server: Server,
    hits: Hits,
}

impl HitCounter {
    pub fn new() -> Self {
        let hits = Hits::default();

        let router = Router::new()
            .nest_service("/symbols", ServeDir::new(fixture("debuginfod")))
            .route(
                "/redirect/*path",
                get(|extract::Path(path): extract::Path<String>| async move {
                    (StatusCode::FOUND, [("Location", format!("/{path}"))])
                }),
            )
            .route(
                "/delay/:time/*tail",
                get(
                    |extract::Path((time, tail)): extract::Path<(String, String)>| async move {
                        let duration = humantime::parse_duration(&time).unwrap();
                        tokio::time::sleep(duration).await;
                        tail
                    },
                ),
            )
            .route(
                "/respond_statuscode/:num/*tail",
                get(
                    |extract::Path((num, _)): extract::Path<(u16, String)>| async move {
                        StatusCode::from_u16(num).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
                    },
                ),
            )
            .route(
                "/fail_first/:num/*tail",
                get(
                    |State(hits): State<Hits>,
                     OriginalUri(uri): OriginalUri,
                     extract::Path((num, tail)): extract::Path<(usize, String)>| async move {
                        let seen = hits.lock().unwrap().get(&uri.to_string()).copied();
                        if seen.unwrap_or_default() <= num {
                            StatusCode::SERVICE_UNAVAILABLE.into_response()
                        } else {
                            tail.into_response()
                        }
                    },
                ),
            )
            .route(
                "/garbage_data/*tail",
                get(|extract::Path(tail): extract::Path<String>| async move { tail }),
            )
            .route(
                "/gzip_data/*tail",
                get(|extract::Path(tail): extract::Path<String>| async move {
                    gzip(tail.as_bytes())
                }),
            )
            .layer(middleware::from_fn_with_state(hits.clone(), count_hits))
            .with_state(hits.clone());

        let server = Server::with_router(router);

        Self { server, hits }
    }

    /// Returns the number of requests since the last call, and resets the counts.
    pub fn accesses(&self) -> usize {
        let map = std::mem::take(&mut *self.hits.lock().unwrap());
        map.into_values().sum()
    }

    /// Returns the requests per URL path since the last call, and resets the counts.
    pub fn all_hits(&self) -> Vec<(String, usize)> {
        let map = std::mem::take(&mut *self.hits.lock().unwrap());
        map.into_iter().collect()
    }

    pub fn url(&self, path: &str) -> Url {
        self.server.url(path)
    }
}

impl Default for HitCounter {
    fn default() -> Self {
        Self::new()
    }
}
