#[macro_use]
pub mod metrics;

pub mod caching;
pub mod config;
pub mod download;
pub mod logging;
pub mod profile;
pub mod symbolication;
pub mod symbols;
pub mod types;
pub mod utils;
