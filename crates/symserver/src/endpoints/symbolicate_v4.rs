//! The deprecated v4 symbolication endpoint.
//!
//! Accepts a single job and projects the v5 result into the legacy shape:
//! flattened `"function (in module)"` strings plus a positional
//! `knownModules` array. No new features land here.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use axum::body::Bytes;
use axum::extract::Extension;
use axum::Json;

use super::{load_payload, validate_and_measure_jobs, ApiError};
use crate::services::symbolication::SymbolicationService;
use crate::types::{SymbolicateV4Response, SymbolicatedFrame};
use crate::utils::debug_stats::DebugStats;

pub async fn handle(
    Extension(service): Extension<Arc<SymbolicationService>>,
    body: Bytes,
) -> Result<Json<SymbolicateV4Response>, ApiError> {
    let start = Instant::now();
    let result = handle_inner(service, body).await;
    metric!(timer("symbolicate.api") = start.elapsed(), "version" => "v4");
    result
}

async fn handle_inner(
    service: Arc<SymbolicationService>,
    body: Bytes,
) -> Result<Json<SymbolicateV4Response>, ApiError> {
    metric!(counter("pageview") += 1, "path" => "/symbolicate/v4", "method" => "post");

    let payload = load_payload(&body)?;

    // gathered but never returned, since this API version has no debug output
    let mut debug_stats = DebugStats::new();

    let raw_jobs = vec![payload];
    let jobs = validate_and_measure_jobs(&raw_jobs, "v4")?;
    let results = service.symbolicate(&jobs, &mut debug_stats).await?;
    let symdata = results
        .into_iter()
        .next()
        .context("symbolication returned no job result")?;

    let symbolicated_stacks = symdata
        .stacks
        .iter()
        .map(|stack| stack.iter().map(frame_to_function).collect())
        .collect();
    let known_modules = jobs[0]
        .memory_map
        .iter()
        .map(|module| symdata.found_modules.get(&module.key()).copied().flatten())
        .collect();

    Ok(Json(SymbolicateV4Response {
        symbolicated_stacks,
        known_modules,
    }))
}

fn frame_to_function(frame: &SymbolicatedFrame) -> String {
    let function = frame.function.as_deref().unwrap_or(&frame.module_offset);
    format!("{} (in {})", function, frame.module)
}
