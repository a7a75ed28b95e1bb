//! Acquisition of symcaches for individual modules.
//!
//! For a `(debug_filename, debug_id)` pair the acquirer first consults the
//! disk cache, then falls back to downloading the `.sym` file and converting
//! it, writing the conversion back to the cache. Every step feeds the
//! request's [`DebugStats`].

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};

use crate::services::breakpad::{self, SymCacheHandle};
use crate::services::cache::{CacheEntry, DiskCache};
use crate::services::download::Downloader;
use crate::utils::debug_stats::DebugStats;

pub struct SymCacheAcquirer {
    downloader: Arc<Downloader>,
    cache: Arc<DiskCache>,
}

impl SymCacheAcquirer {
    pub fn new(downloader: Arc<Downloader>, cache: Arc<DiskCache>) -> Self {
        Self { downloader, cache }
    }

    /// The cache key for a module: `"{debug_filename}/{DEBUG_ID}.symc"`,
    /// with the debug id upper-cased and path separators stripped from both
    /// parts.
    pub fn cache_key(debug_filename: &str, debug_id: &str) -> String {
        format!(
            "{}/{}.symc",
            debug_filename.replace('/', ""),
            debug_id.to_uppercase().replace('/', "")
        )
    }

    /// The sym filename for a module: `.pdb` debug filenames swap their
    /// suffix for `.sym`, everything else appends it.
    pub fn sym_filename(debug_filename: &str) -> String {
        match debug_filename.strip_suffix(".pdb") {
            Some(stem) => format!("{}.sym", stem),
            None => format!("{}.sym", debug_filename),
        }
    }

    /// Returns the symcache and module filename for a module, or `None` when
    /// the module cannot be resolved.
    ///
    /// Download and parse failures are recoverable: they yield `Ok(None)` so
    /// the batch can report the module as missing. Only unexpected conditions
    /// (cache IO faults, a freshly built symcache failing to re-parse)
    /// propagate as errors.
    pub async fn acquire(
        &self,
        debug_filename: &str,
        debug_id: &str,
        debug_stats: &mut DebugStats,
    ) -> Result<Option<(SymCacheHandle, String)>> {
        if debug_filename.is_empty() || debug_id.is_empty() {
            // nothing to download without a full identity
            return Ok(None);
        }

        let cache_key = Self::cache_key(debug_filename, debug_id);
        let module_tag = format!("{}/{}", debug_filename, debug_id);

        let lookup_start = Instant::now();
        debug_stats.incr("cache_lookups.count", 1);

        let cached = self
            .cache
            .get(&cache_key)
            .context("failed to read symcache cache")?;
        let hit = match cached {
            Some(entry) => {
                let handle = SymCacheHandle::from_bytes(entry.symcache)
                    .context("failed to load cached symcache")?;
                debug_stats.incr("cache_lookups.hits", 1);
                Some((handle, entry.filename))
            }
            None => {
                // incrementing by zero materializes the leaf
                debug_stats.incr("cache_lookups.hits", 0);
                None
            }
        };
        debug_stats.add_time("cache_lookups.time", lookup_start.elapsed().as_secs_f64());

        if hit.is_some() {
            return Ok(hit);
        }

        let sym_filename = Self::sym_filename(debug_filename);

        let download_start = Instant::now();
        let downloaded = self
            .downloader
            .get(debug_filename, debug_id, &sym_filename)
            .await;
        let download_time = download_start.elapsed().as_secs_f64();
        debug_stats.incr("downloads.count", 1);

        let sym_file = match downloaded {
            Ok(data) => data,
            Err(err) => {
                tracing::debug!("no sym file for {}: {}", module_tag, err);
                debug_stats.add_time(
                    &["downloads", "fail_time_per_module", &module_tag],
                    download_time,
                );
                return Ok(None);
            }
        };

        debug_stats.incr(
            &["downloads", "size_per_module", &module_tag],
            sym_file.len() as i64,
        );
        debug_stats.add_time(
            &["downloads", "time_per_module", &module_tag],
            download_time,
        );

        // this is either debug_filename or the PE filename on Windows
        let module_filename = breakpad::get_module_filename(&sym_file, debug_filename);

        let parse_start = Instant::now();
        let parsed = breakpad::parse_sym_file(debug_filename, debug_id, &sym_file);
        let parse_time = parse_start.elapsed();
        metric!(timer("symbolicate.parse_sym_file.parse") = parse_time);

        let symcache_bytes = match parsed {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::error!("sym file parse error for {}: {}", module_tag, err);
                metric!(
                    counter("symbolicate.parse_sym_file.error") += 1,
                    "reason" => err.reason_code()
                );
                debug_stats.add_time(
                    &["parse_sym", "fail_time_per_module", &module_tag],
                    parse_time.as_secs_f64(),
                );
                return Ok(None);
            }
        };
        debug_stats.add_time(
            &["parse_sym", "time_per_module", &module_tag],
            parse_time.as_secs_f64(),
        );

        let handle = SymCacheHandle::from_bytes(symcache_bytes)
            .context("freshly converted symcache failed to parse")?;

        let save_start = Instant::now();
        let entry = CacheEntry {
            symcache: handle.as_bytes().to_vec(),
            filename: module_filename.clone(),
        };
        // cache writes are fire-and-forget; a failed write only costs a
        // re-download on the next request
        if let Err(err) = self.cache.set(&cache_key, entry) {
            tracing::warn!("failed to write symcache for {}: {}", module_tag, err);
        }
        debug_stats.add_time(
            &["save_symcache", "time_per_module", &module_tag],
            save_start.elapsed().as_secs_f64(),
        );

        Ok(Some((handle, module_filename)))
    }
}
