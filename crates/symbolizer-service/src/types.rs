use std::sync::LazyLock;

use regex::Regex;

use crate::caching::CacheError;

static BUILD_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_-]+$").unwrap());

/// Checks that a build ID is safe to use as a URL path segment and an object key.
///
/// The empty ID passes unchanged. Callers must not fetch it.
pub fn sanitize_build_id(build_id: &str) -> Result<&str, CacheError> {
    if build_id.is_empty() || BUILD_ID_RE.is_match(build_id) {
        Ok(build_id)
    } else {
        Err(CacheError::InvalidBuildId(build_id.to_owned()))
    }
}

/// One symbolized frame of a location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFrame {
    /// The demangled function name.
    pub name: String,
    /// The function name as found in the symbol table.
    pub system_name: String,
    pub file: String,
    /// Line number, 0 if unknown.
    pub line: i64,
    /// Set for the synthetic `binary!0xaddr` frame of an address that could not be resolved.
    pub is_fallback: bool,
}

impl ResolvedFrame {
    /// The placeholder for an address without symbol information.
    pub fn fallback(binary_name: &str, address: u64) -> Self {
        let binary_name = match binary_name {
            "" => "unknown",
            name => name,
        };
        let name = format!("{binary_name}!0x{address:x}");
        Self {
            system_name: name.clone(),
            name,
            file: String::new(),
            line: 0,
            is_fallback: true,
        }
    }
}

/// All unresolved locations of one mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolizationJob {
    /// The 1-based id of the mapping.
    pub mapping_id: u64,
    /// Sanitized, possibly empty.
    pub build_id: String,
    /// The file name of the mapped binary, without directories.
    pub binary_name: String,
    /// Indices into the profile's location table.
    pub locations: Vec<usize>,
    /// The address of each entry of `locations`.
    pub addresses: Vec<u64>,
}

/// The outcome of one [`SymbolizationJob`]: frames for each of its locations, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolizedMapping {
    pub mapping_id: u64,
    pub locations: Vec<usize>,
    pub frames: Vec<Vec<ResolvedFrame>>,
}
