pub mod futures;
pub mod http;
pub mod singleflight;
