// See <https://matklad.github.io/2021/02/27/delete-cargo-integration-tests.html>

pub mod debuginfod;
pub mod symbol_cache;
pub mod symbolization;
pub mod utils;

pub use utils::*;
