//! Symbolization of native frames in pprof profiles.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use thiserror::Error;
use tokio::task::JoinError;

use crate::caching::{CacheError, SymbolCache, objstore};
use crate::config::{Config, ConfigError, SymbolizerConfig};
use crate::download::DebuginfodClient;
use crate::profile::Profile;
use crate::symbols::SymbolTable;
use crate::types::{ResolvedFrame, SymbolizationJob, SymbolizedMapping, sanitize_build_id};
use crate::utils::futures::{m, measure, try_join_bounded};

mod merge;

pub use merge::update_profile;

/// A profile that cannot be symbolized, or a symbolization task that failed.
#[derive(Debug, Error)]
pub enum SymbolizeError {
    #[error("invalid profile: location at index {index} has mapping id 0")]
    MissingMapping { index: usize },
    #[error("invalid profile: location at index {index} references non-existent mapping {mapping_id}")]
    UnknownMapping { index: usize, mapping_id: u64 },
    #[error(
        "invalid mapping {mapping_id}: {field} index {index} out of range (string table length: {len})"
    )]
    InvalidStringIndex {
        mapping_id: u64,
        field: &'static str,
        index: i64,
        len: usize,
    },
    #[error("invalid build ID in mapping {mapping_id}")]
    InvalidBuildId {
        mapping_id: u64,
        #[source]
        source: CacheError,
    },
    #[error("symbolization task failed")]
    TaskFailed(#[from] JoinError),
}

/// Resolves the addresses of native frames to functions, files and lines.
#[derive(Debug, Clone)]
pub struct Symbolizer {
    cache: SymbolCache,
    max_concurrency: usize,
}

impl Symbolizer {
    pub fn new(cache: SymbolCache, config: &SymbolizerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            cache,
            max_concurrency: config.max_debuginfod_concurrency,
        })
    }

    /// Creates the debuginfod client, the stores and the symbolizer described by `config`.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        config.validate()?;

        let client = DebuginfodClient::new(&config.symbolizer.debuginfod_url, &config.debuginfod)
            .context("failed to create debuginfod client")?;
        let store = objstore::from_config(&config.object_store);
        let debuginfo_store = config.debuginfo_store.as_ref().map(objstore::from_config);
        let cache = SymbolCache::new(store, debuginfo_store, Arc::new(client));

        Ok(Self::new(cache, &config.symbolizer)?)
    }

    /// Symbolizes every location of `profile` whose mapping lacks function information.
    ///
    /// Locations that already have lines are left alone. Addresses that cannot be resolved get
    /// a `binary!0xaddress` placeholder frame, so that only a malformed profile or a failed task
    /// make this return an error. On error the profile is unchanged.
    pub async fn symbolize_pprof(&self, profile: &mut Profile) -> Result<(), SymbolizeError> {
        measure(
            "symbolizer.profile.duration",
            m::result,
            self.symbolize_pprof_inner(profile),
        )
        .await
    }

    async fn symbolize_pprof_inner(&self, profile: &mut Profile) -> Result<(), SymbolizeError> {
        let jobs = collect_jobs(profile)?;
        if jobs.is_empty() {
            return Ok(());
        }

        tracing::debug!(mappings = jobs.len(), "symbolizing profile");

        let tasks = jobs.into_iter().map(|job| {
            let cache = self.cache.clone();
            async move { Ok::<_, SymbolizeError>(symbolize_job(&cache, job).await) }
        });
        let results = try_join_bounded(self.max_concurrency, tasks).await?;

        update_profile(profile, results);
        Ok(())
    }
}

/// Groups the unresolved locations by mapping, in mapping order.
fn collect_jobs(profile: &Profile) -> Result<Vec<SymbolizationJob>, SymbolizeError> {
    let selected: Vec<bool> = profile.mapping.iter().map(|m| !m.has_functions).collect();
    if !selected.contains(&true) {
        return Ok(vec![]);
    }

    let mut groups: BTreeMap<u64, (Vec<usize>, Vec<u64>)> = BTreeMap::new();
    for (index, location) in profile.location.iter().enumerate() {
        let mapping_id = location.mapping_id;
        if mapping_id == 0 {
            return Err(SymbolizeError::MissingMapping { index });
        }
        let Some(&is_selected) = selected.get((mapping_id - 1) as usize) else {
            return Err(SymbolizeError::UnknownMapping { index, mapping_id });
        };

        if !is_selected || !location.line.is_empty() {
            continue;
        }

        let (locations, addresses) = groups.entry(mapping_id).or_default();
        locations.push(index);
        addresses.push(location.address);
    }

    groups
        .into_iter()
        .map(|(mapping_id, (locations, addresses))| -> Result<_, SymbolizeError> {
            let mapping = &profile.mapping[(mapping_id - 1) as usize];
            let string = |field: &'static str, index: i64| {
                profile
                    .string(index)
                    .ok_or(SymbolizeError::InvalidStringIndex {
                        mapping_id,
                        field,
                        index,
                        len: profile.string_table.len(),
                    })
            };

            let filename = string("filename", mapping.filename)?;
            let binary_name = filename.rsplit('/').next().unwrap_or(filename);

            let raw_build_id = string("build_id", mapping.build_id)?;
            let build_id = sanitize_build_id(raw_build_id).map_err(|source| {
                tracing::error!(build_id = raw_build_id, "invalid build ID");
                SymbolizeError::InvalidBuildId { mapping_id, source }
            })?;

            Ok(SymbolizationJob {
                mapping_id,
                build_id: build_id.to_owned(),
                binary_name: binary_name.to_owned(),
                locations,
                addresses,
            })
        })
        .collect()
}

/// Resolves the addresses of one job. Never fails, unresolved addresses get fallback frames.
#[tracing::instrument(skip_all, fields(build_id = %job.build_id, mapping_id = job.mapping_id))]
async fn symbolize_job(cache: &SymbolCache, job: SymbolizationJob) -> SymbolizedMapping {
    let frames = if job.build_id.is_empty() {
        metric!(counter("symbolizer.resolution.errors") += 1, "reason" => "empty_build_id");
        fallback_frames(&job)
    } else {
        match cache.get_symbol_table(&job.build_id).await {
            Ok(table) => resolve_frames(&table, &job),
            Err(err) => {
                let reason = match &err {
                    CacheError::Malformed(_) => "symcache_error",
                    _ => "fetch_error",
                };
                metric!(counter("symbolizer.resolution.errors") += 1, "reason" => reason);
                if !err.is_not_found() {
                    tracing::warn!(
                        error = &err as &dyn std::error::Error,
                        "failed to get symbol table"
                    );
                }
                fallback_frames(&job)
            }
        }
    };

    SymbolizedMapping {
        mapping_id: job.mapping_id,
        locations: job.locations,
        frames,
    }
}

fn fallback_frames(job: &SymbolizationJob) -> Vec<Vec<ResolvedFrame>> {
    job.addresses
        .iter()
        .map(|&address| vec![ResolvedFrame::fallback(&job.binary_name, address)])
        .collect()
}

fn resolve_frames(table: &SymbolTable, job: &SymbolizationJob) -> Vec<Vec<ResolvedFrame>> {
    let start = Instant::now();
    let frames = job
        .addresses
        .iter()
        .map(|&address| {
            let frames = table.lookup(address);
            if frames.is_empty() {
                vec![ResolvedFrame::fallback(&job.binary_name, address)]
            } else {
                frames
            }
        })
        .collect();
    metric!(timer("symbolizer.resolution.duration") = start.elapsed());
    frames
}
