//! Writes symbolization results back into a profile.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::profile::{Function, Line, Profile};
use crate::types::{ResolvedFrame, SymbolizedMapping};

/// Appends strings and functions to a profile, reusing existing entries.
struct ProfileWriter<'p> {
    profile: &'p mut Profile,
    strings: HashMap<String, i64>,
    /// `(name, filename)` string indices to the index in `profile.function`.
    functions: HashMap<(i64, i64), usize>,
    /// The largest function id in use.
    last_function_id: u64,
}

impl<'p> ProfileWriter<'p> {
    fn new(profile: &'p mut Profile) -> Self {
        let mut strings = HashMap::with_capacity(profile.string_table.len());
        for (idx, s) in profile.string_table.iter().enumerate() {
            strings.entry(s.clone()).or_insert(idx as i64);
        }
        let last_function_id = profile.function.iter().map(|f| f.id).max().unwrap_or(0);
        Self {
            profile,
            strings,
            functions: HashMap::new(),
            last_function_id,
        }
    }

    fn string(&mut self, s: &str) -> i64 {
        if let Some(&idx) = self.strings.get(s) {
            return idx;
        }
        let idx = self.profile.string_table.len() as i64;
        self.profile.string_table.push(s.to_owned());
        self.strings.insert(s.to_owned(), idx);
        idx
    }

    /// Returns the id of the function `frame` belongs to, creating it if needed.
    ///
    /// `start_line` keeps the smallest positive line seen for the function.
    fn function(&mut self, frame: &ResolvedFrame) -> u64 {
        let name = self.string(&frame.name);
        let filename = self.string(&frame.file);

        if let Some(&idx) = self.functions.get(&(name, filename)) {
            let function = &mut self.profile.function[idx];
            if frame.line > 0 && (function.start_line == 0 || frame.line < function.start_line) {
                function.start_line = frame.line;
            }
            return function.id;
        }

        let system_name = self.string(&frame.system_name);
        self.last_function_id += 1;
        let id = self.last_function_id;
        self.functions
            .insert((name, filename), self.profile.function.len());
        self.profile.function.push(Function {
            id,
            name,
            system_name,
            filename,
            start_line: frame.line,
        });
        id
    }
}

/// Fills the lines of every symbolized location and updates the affected mappings.
///
/// A mapping ends up with `has_functions` set only if each of its locations carries at least
/// one line that is not a fallback frame. Lines that were present before count as resolved.
pub fn update_profile(profile: &mut Profile, results: Vec<SymbolizedMapping>) {
    let mut symbolized_mappings = BTreeSet::new();
    let mut unresolved_locations = HashSet::new();

    let mut writer = ProfileWriter::new(profile);
    for result in results {
        symbolized_mappings.insert(result.mapping_id);

        for (loc_idx, frames) in result.locations.into_iter().zip(result.frames) {
            if frames.iter().all(|f| f.is_fallback) {
                unresolved_locations.insert(loc_idx);
            }

            let lines = frames
                .iter()
                .map(|frame| Line {
                    function_id: writer.function(frame),
                    line: frame.line,
                })
                .collect();
            writer.profile.location[loc_idx].line = lines;
        }
    }

    for mapping_id in symbolized_mappings {
        let resolved = profile
            .location
            .iter()
            .enumerate()
            .filter(|(_, loc)| loc.mapping_id == mapping_id)
            .all(|(idx, loc)| !loc.line.is_empty() && !unresolved_locations.contains(&idx));

        let mapping = &mut profile.mapping[(mapping_id - 1) as usize];
        mapping.has_functions = resolved;
        mapping.has_filenames = resolved;
        mapping.has_line_numbers = resolved;
    }
}
