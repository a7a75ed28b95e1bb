//! Construction of the service graph.
//!
//! All collaborators are built once per process and shared behind `Arc`s;
//! per-request state is limited to the `DebugStats` each request carries.

pub mod breakpad;
pub mod cache;
pub mod download;
pub mod symbolication;
pub mod symcaches;

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config::Config;
use cache::DiskCache;
use download::Downloader;
use symbolication::SymbolicationService;

pub fn create_service(config: &Config) -> Result<Arc<SymbolicationService>> {
    let downloader =
        Arc::new(Downloader::new(config).context("failed to create the downloader")?);
    let cache = Arc::new(
        DiskCache::new(&config.cache_dir, config.max_cache_size)
            .context("failed to open the symcache directory")?,
    );
    Ok(Arc::new(SymbolicationService::new(downloader, cache)))
}
