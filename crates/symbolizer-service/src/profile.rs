//! The pprof profile model.
//!
//! Messages follow `profile.proto` from the google/pprof repository. Only the decoding and
//! encoding entry points are added on top of the generated shape.

use std::io::{self, Read, Write};

use flate2::Compression;
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use prost::Message;
use thiserror::Error;

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Profile {
    /// A description of the samples associated with each Sample.value.
    #[prost(message, repeated, tag = "1")]
    pub sample_type: Vec<ValueType>,
    /// The set of samples recorded in this profile.
    #[prost(message, repeated, tag = "2")]
    pub sample: Vec<Sample>,
    /// Mapping from address ranges to the image/binary/library mapped
    /// into that address range. `mapping[0]` will be the main binary.
    #[prost(message, repeated, tag = "3")]
    pub mapping: Vec<Mapping>,
    /// Useful program location
    #[prost(message, repeated, tag = "4")]
    pub location: Vec<Location>,
    /// Functions referenced by locations
    #[prost(message, repeated, tag = "5")]
    pub function: Vec<Function>,
    /// A common table for strings referenced by various messages.
    /// `string_table[0]` must always be "".
    #[prost(string, repeated, tag = "6")]
    pub string_table: Vec<String>,
    /// Index into string table.
    #[prost(int64, tag = "7")]
    pub drop_frames: i64,
    /// Index into string table.
    #[prost(int64, tag = "8")]
    pub keep_frames: i64,
    /// Time of collection (UTC) represented as nanoseconds past the epoch.
    #[prost(int64, tag = "9")]
    pub time_nanos: i64,
    /// Duration of the profile, if a duration makes sense.
    #[prost(int64, tag = "10")]
    pub duration_nanos: i64,
    /// The kind of events between sampled occurrences.
    #[prost(message, optional, tag = "11")]
    pub period_type: Option<ValueType>,
    /// The number of events between sampled occurrences.
    #[prost(int64, tag = "12")]
    pub period: i64,
    /// Indices into string table.
    #[prost(int64, repeated, tag = "13")]
    pub comment: Vec<i64>,
    /// Index into the string table of the type of the preferred sample value.
    #[prost(int64, tag = "14")]
    pub default_sample_type: i64,
}

/// ValueType describes the semantics and measurement units of a value.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ValueType {
    /// Index into string table.
    #[prost(int64, tag = "1")]
    pub r#type: i64,
    /// Index into string table.
    #[prost(int64, tag = "2")]
    pub unit: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Sample {
    /// The leaf is at `location_id[0]`.
    #[prost(uint64, repeated, tag = "1")]
    pub location_id: Vec<u64>,
    #[prost(int64, repeated, tag = "2")]
    pub value: Vec<i64>,
    #[prost(message, repeated, tag = "3")]
    pub label: Vec<Label>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Label {
    #[prost(int64, tag = "1")]
    pub key: i64,
    #[prost(int64, tag = "2")]
    pub str: i64,
    #[prost(int64, tag = "3")]
    pub num: i64,
    #[prost(int64, tag = "4")]
    pub num_unit: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Mapping {
    /// Unique nonzero id for the mapping.
    #[prost(uint64, tag = "1")]
    pub id: u64,
    /// Address at which the binary (or DLL) is loaded into memory.
    #[prost(uint64, tag = "2")]
    pub memory_start: u64,
    /// The limit of the address range occupied by this mapping.
    #[prost(uint64, tag = "3")]
    pub memory_limit: u64,
    /// Offset in the binary that corresponds to the first mapped address.
    #[prost(uint64, tag = "4")]
    pub file_offset: u64,
    /// The object this entry is loaded from. Index into string table.
    #[prost(int64, tag = "5")]
    pub filename: i64,
    /// The build ID of the object. Index into string table.
    #[prost(int64, tag = "6")]
    pub build_id: i64,
    #[prost(bool, tag = "7")]
    pub has_functions: bool,
    #[prost(bool, tag = "8")]
    pub has_filenames: bool,
    #[prost(bool, tag = "9")]
    pub has_line_numbers: bool,
    #[prost(bool, tag = "10")]
    pub has_inline_frames: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Location {
    /// Unique nonzero id for the location.
    #[prost(uint64, tag = "1")]
    pub id: u64,
    /// The 1-based id of the corresponding [`Mapping`].
    #[prost(uint64, tag = "2")]
    pub mapping_id: u64,
    /// The instruction address for this location.
    #[prost(uint64, tag = "3")]
    pub address: u64,
    /// Inlined frames first, the last entry is the caller they were inlined into.
    #[prost(message, repeated, tag = "4")]
    pub line: Vec<Line>,
    #[prost(bool, tag = "5")]
    pub is_folded: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Line {
    /// The id of the corresponding [`Function`].
    #[prost(uint64, tag = "1")]
    pub function_id: u64,
    /// Line number in source code.
    #[prost(int64, tag = "2")]
    pub line: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Function {
    /// Unique nonzero id for the function.
    #[prost(uint64, tag = "1")]
    pub id: u64,
    /// Human-readable name. Index into string table.
    #[prost(int64, tag = "2")]
    pub name: i64,
    /// Name as identified by the system, e.g. a mangled name. Index into string table.
    #[prost(int64, tag = "3")]
    pub system_name: i64,
    /// Source file containing the function. Index into string table.
    #[prost(int64, tag = "4")]
    pub filename: i64,
    /// Line number in source file.
    #[prost(int64, tag = "5")]
    pub start_line: i64,
}

/// An error decoding a serialized profile.
#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("failed to decompress profile")]
    Decompress(#[source] io::Error),
    #[error("failed to decode profile")]
    Decode(#[from] prost::DecodeError),
}

const GZIP_MAGIC: &[u8] = b"\x1f\x8b";

impl Profile {
    /// Decodes a profile, transparently unpacking gzip.
    pub fn decode_bytes(data: &[u8]) -> Result<Self, ProfileError> {
        if data.starts_with(GZIP_MAGIC) {
            let mut buf = Vec::new();
            MultiGzDecoder::new(data)
                .read_to_end(&mut buf)
                .map_err(ProfileError::Decompress)?;
            return Ok(Self::decode(buf.as_slice())?);
        }
        Ok(Self::decode(data)?)
    }

    /// Encodes the profile and compresses it with gzip, the way pprof files are stored on disk.
    pub fn encode_gzip(&self) -> io::Result<Vec<u8>> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&self.encode_to_vec())?;
        encoder.finish()
    }

    /// Returns the string at `index`, if it is in bounds.
    pub fn string(&self, index: i64) -> Option<&str> {
        usize::try_from(index)
            .ok()
            .and_then(|idx| self.string_table.get(idx))
            .map(String::as_str)
    }
}
