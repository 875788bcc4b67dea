use std::time::Duration;

use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::redirect;

use crate::config::DebuginfodConfig;

/// Creates the HTTP client used to talk to debuginfod.
pub fn create_client(config: &DebuginfodConfig) -> reqwest::Result<reqwest::Client> {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::ACCEPT_ENCODING,
        HeaderValue::from_static("gzip, deflate"),
    );

    let mut builder = reqwest::ClientBuilder::new()
        .gzip(true)
        .deflate(true)
        .default_headers(headers)
        .connect_timeout(config.connect_timeout)
        .timeout(config.timeout)
        .pool_idle_timeout(Duration::from_secs(90))
        .redirect(redirect::Policy::limited(config.max_redirects));

    if !config.user_agent.is_empty() {
        builder = builder.user_agent(config.user_agent.as_str());
    }

    builder.build()
}

/// Cuts `body` down to at most `limit` bytes without splitting a character.
pub fn truncate_body(body: &str, limit: usize) -> &str {
    if body.len() <= limit {
        return body;
    }
    let mut end = limit;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}
