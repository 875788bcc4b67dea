use std::io::{self, Read};

use bytes::Bytes;
use flate2::read::MultiGzDecoder;

/// Decompresses a downloaded debug file in memory.
///
/// Input without a known compression header is returned unchanged.
pub fn detect_compression(data: Bytes) -> io::Result<Bytes> {
    if data.len() < 4 {
        // we don’t want to error for tiny files here
        metric!(counter("compression") += 1, "type" => "none");
        return Ok(data);
    }

    // For a comprehensive list also refer to
    // https://en.wikipedia.org/wiki/List_of_file_signatures
    match &data[..4] {
        // Magic bytes for zstd
        // https://tools.ietf.org/id/draft-kucherawy-dispatch-zstd-00.html#rfc.section.2.1.1
        [0x28, 0xb5, 0x2f, 0xfd] => {
            metric!(counter("compression") += 1, "type" => "zstd");

            let decoded = zstd::stream::decode_all(&data[..])?;
            Ok(Bytes::from(decoded))
        }
        // Magic bytes for gzip
        // https://tools.ietf.org/html/rfc1952#section-2.3.1
        [0x1f, 0x8b, _, _] => {
            metric!(counter("compression") += 1, "type" => "gz");

            // We assume MultiGzDecoder accepts a strict superset of input
            // values compared to GzDecoder.
            let mut decoded = Vec::with_capacity(data.len() * 2);
            MultiGzDecoder::new(&data[..]).read_to_end(&mut decoded)?;
            Ok(Bytes::from(decoded))
        }
        _ => {
            metric!(counter("compression") += 1, "type" => "none");
            Ok(data)
        }
    }
}
