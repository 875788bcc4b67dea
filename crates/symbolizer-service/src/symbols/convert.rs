use std::io::Cursor;

use bytes::Bytes;
use symbolic::debuginfo::{FileFormat, Object};
use symbolic::symcache::SymCacheConverter;

use crate::caching::{CacheEntry, CacheError};
use crate::download::compression::detect_compression;

fn conversion_error(reason: &'static str, message: String) -> CacheError {
    metric!(counter("conversion.errors") += 1, "reason" => reason);
    tracing::warn!(reason, "{message}");
    CacheError::Malformed(message)
}

/// Turns a raw debug file, possibly compressed, into a serialized SymCache.
///
/// This is CPU-bound and runs on the blocking thread pool.
pub async fn process_elf_data(data: Bytes) -> CacheEntry<Bytes> {
    tokio::task::spawn_blocking(move || convert_elf(data))
        .await
        .map_err(CacheError::from_std_error)?
}

/// The synchronous part of [`process_elf_data`].
#[tracing::instrument(skip_all, fields(input_size = data.len()))]
pub fn convert_elf(data: Bytes) -> CacheEntry<Bytes> {
    let input_size = data.len();
    let data = detect_compression(data).map_err(|e| {
        conversion_error("compression_error", format!("failed to decompress: {e}"))
    })?;

    let object = Object::parse(&data)
        .map_err(|e| conversion_error("elf_parsing_error", format!("failed to parse ELF: {e}")))?;
    if object.file_format() != FileFormat::Elf {
        return Err(conversion_error(
            "elf_parsing_error",
            format!("expected an ELF file, found {}", object.file_format()),
        ));
    }

    let mut converter = SymCacheConverter::new();
    converter
        .process_object(&object)
        .map_err(|e| conversion_error("symcache_error", format!("failed to convert: {e}")))?;

    let mut writer = Cursor::new(Vec::with_capacity(input_size * 2));
    converter
        .serialize(&mut writer)
        .map_err(|e| conversion_error("symcache_error", format!("failed to write: {e}")))?;

    Ok(Bytes::from(writer.into_inner()))
}
