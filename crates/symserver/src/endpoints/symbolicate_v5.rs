//! The v5 symbolication endpoint.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::Extension;
use axum::http::HeaderMap;
use axum::Json;
use serde_json::Value;

use super::{load_payload, validate_and_measure_jobs, ApiError};
use crate::services::symbolication::SymbolicationService;
use crate::types::{JobResult, SymbolicateV5Response, MAX_JOBS};
use crate::utils::debug_stats::DebugStats;

pub async fn handle(
    Extension(service): Extension<Arc<SymbolicationService>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<SymbolicateV5Response>, ApiError> {
    let start = Instant::now();
    let result = handle_inner(service, headers, body).await;
    metric!(timer("symbolicate.api") = start.elapsed(), "version" => "v5");
    result
}

async fn handle_inner(
    service: Arc<SymbolicationService>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<SymbolicateV5Response>, ApiError> {
    metric!(counter("pageview") += 1, "path" => "/symbolicate/v5", "method" => "post");

    let payload = load_payload(&body)?;

    // any non-empty Debug header value enables the debug stanza
    let is_debug = headers
        .get("Debug")
        .map(|value| !value.as_bytes().is_empty())
        .unwrap_or(false);

    let raw_jobs: Vec<Value> = match payload.get("jobs") {
        Some(jobs) => jobs
            .as_array()
            .cloned()
            .unwrap_or_else(|| vec![jobs.clone()]),
        None => vec![payload.clone()],
    };

    if raw_jobs.len() > MAX_JOBS {
        metric!(counter("symbolicate.request_error") += 1, "reason" => "too_many_jobs");
        return Err(ApiError::BadRequest(format!(
            "please limit number of jobs in a single request to <= {}",
            MAX_JOBS
        )));
    }

    metric!(histogram("symbolicate.jobs_count") = raw_jobs.len() as u64, "version" => "v5");
    tracing::debug!("Number of jobs: {}", raw_jobs.len());

    let mut debug_stats = DebugStats::new();

    let time_start = Instant::now();
    let jobs = validate_and_measure_jobs(&raw_jobs, "v5")?;
    let results = service.symbolicate(&jobs, &mut debug_stats).await?;
    let elapsed = time_start.elapsed().as_secs_f64();
    debug_stats.set("time", elapsed);

    let debug = is_debug.then(|| build_debug_stanza(debug_stats, &results));

    let num_symbols: usize = jobs
        .iter()
        .map(|job| job.stacks.iter().map(Vec::len).sum::<usize>())
        .sum();
    tracing::info!(
        jobs = jobs.len(),
        symbols = num_symbols,
        time = elapsed,
        "symbolicate/v5"
    );

    Ok(Json(SymbolicateV5Response { results, debug }))
}

/// Finalizes the debug stats: per-module aggregates summed into totals plus
/// the module usage counters, with the always-present leaves zero-filled.
fn build_debug_stanza(mut debug_stats: DebugStats, results: &[JobResult]) -> Value {
    let mut all_modules: BTreeMap<&str, i64> = BTreeMap::new();
    for result in results {
        for (key, value) in &result.found_modules {
            if value.is_some() {
                *all_modules.entry(key).or_default() += 1;
            }
        }
    }
    debug_stats.set("modules.count", all_modules.values().sum::<i64>());
    for (key, count) in all_modules {
        debug_stats.set(&["modules", "stacks_per_module", key], count);
    }

    let sum_int = |stats: &DebugStats, path: &[&str]| -> i64 {
        stats
            .get(path)
            .and_then(Value::as_object)
            .map(|leaves| leaves.values().filter_map(Value::as_i64).sum())
            .unwrap_or(0)
    };
    let sum_float = |stats: &DebugStats, path: &[&str]| -> f64 {
        stats
            .get(path)
            .and_then(Value::as_object)
            .map(|leaves| leaves.values().filter_map(Value::as_f64).sum())
            .unwrap_or(0.0)
    };

    let downloads_size = sum_int(&debug_stats, &["downloads", "size_per_module"]);
    let downloads_time = sum_float(&debug_stats, &["downloads", "time_per_module"]);
    let parse_time = sum_float(&debug_stats, &["parse_sym", "time_per_module"]);
    let save_time = sum_float(&debug_stats, &["save_symcache", "time_per_module"]);
    debug_stats.set("downloads.size", downloads_size);
    debug_stats.set("downloads.time", downloads_time);
    debug_stats.set("parse_sym.time", parse_time);
    debug_stats.set("save_symcache.time", save_time);

    // zero-fill the leaves that are always part of the response shape
    debug_stats.incr("cache_lookups.count", 0);
    debug_stats.add_time("cache_lookups.time", 0.0);
    debug_stats.incr("downloads.count", 0);

    debug_stats.into_value()
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use crate::endpoints::tests::{post_json, test_app};
    use crate::test::{self, LINUX_DEBUG_ID, LINUX_SYM};

    #[tokio::test]
    async fn test_v5_single_job() {
        let path = format!("/libxul.so/{}/libxul.so.sym", LINUX_DEBUG_ID);
        let server = test::symbol_server(&[(&path, LINUX_SYM)]).await;
        let (app, _temp) = test_app(&server).await;

        let payload = json!({
            "stacks": [[[0, 4112]]],
            "memoryMap": [["libxul.so", LINUX_DEBUG_ID]],
        });
        let (status, body) = post_json(app, "/symbolicate/v5", payload, false).await;

        assert_eq!(status, 200);
        let key = format!("libxul.so/{}", LINUX_DEBUG_ID);
        assert_eq!(
            body,
            json!({
                "results": [{
                    "stacks": [[{
                        "frame": 0,
                        "module": "libxul.so",
                        "module_offset": "0x1010",
                        "function": "WindowCreate(int, int)",
                        "function_offset": "0x10",
                        "file": "src/window.cpp",
                        "line": 40,
                    }]],
                    "found_modules": { key: true },
                }],
            })
        );
    }

    #[tokio::test]
    async fn test_v5_jobs_wrapper_and_missing_module() {
        let server = test::symbol_server(&[]).await;
        let (app, _temp) = test_app(&server).await;

        let payload = json!({
            "jobs": [{
                "stacks": [[[0, 4660], [-1, 100]]],
                "memoryMap": [["libxul.so", "ABCDEF"]],
            }],
        });
        let (status, body) = post_json(app, "/symbolicate/v5", payload, false).await;

        assert_eq!(status, 200);
        assert_eq!(
            body,
            json!({
                "results": [{
                    "stacks": [[
                        {"frame": 0, "module": "libxul.so", "module_offset": "0x1234"},
                        {"frame": 1, "module": "<unknown>", "module_offset": "0x64"},
                    ]],
                    "found_modules": {"libxul.so/ABCDEF": false},
                }],
            })
        );
    }

    #[tokio::test]
    async fn test_v5_too_many_jobs() {
        let server = test::symbol_server(&[]).await;
        let (app, _temp) = test_app(&server).await;

        let job = json!({"stacks": [[[0, 16]]], "memoryMap": [["libxul.so", "AB"]]});
        let payload = json!({ "jobs": vec![job; 11] });
        let (status, body) = post_json(app, "/symbolicate/v5", payload, false).await;

        assert_eq!(status, 400);
        assert_eq!(
            body["detail"],
            "please limit number of jobs in a single request to <= 10"
        );
    }

    #[tokio::test]
    async fn test_v5_invalid_json() {
        let server = test::symbol_server(&[]).await;
        let (app, _temp) = test_app(&server).await;

        use axum::body::Body;
        use axum::http::Request;
        use tower::ServiceExt;

        let request = Request::builder()
            .method("POST")
            .uri("/symbolicate/v5")
            .body(Body::from("{not json"))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), 400);

        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["detail"], "Payload is not valid JSON");
    }

    #[tokio::test]
    async fn test_v5_validation_error_names_job() {
        let server = test::symbol_server(&[]).await;
        let (app, _temp) = test_app(&server).await;

        let payload = json!({
            "stacks": [[[5, 16]]],
            "memoryMap": [["libxul.so", "ABCDEF"]],
        });
        let (status, body) = post_json(app, "/symbolicate/v5", payload, false).await;

        assert_eq!(status, 400);
        assert_eq!(
            body["detail"],
            "job 0 has invalid stacks: stack 0 frame 0 has a module_index that isn't in modules"
        );
    }

    #[tokio::test]
    async fn test_v5_debug_stanza() {
        let path = format!("/libxul.so/{}/libxul.so.sym", LINUX_DEBUG_ID);
        let server = test::symbol_server(&[(&path, LINUX_SYM)]).await;
        let (app, _temp) = test_app(&server).await;

        let payload = json!({
            "stacks": [[[0, 4112]]],
            "memoryMap": [["libxul.so", LINUX_DEBUG_ID]],
        });
        let (status, body) = post_json(app, "/symbolicate/v5", payload, true).await;
        assert_eq!(status, 200);

        let debug = &body["debug"];
        assert!(debug["time"].as_f64().is_some());
        assert_eq!(debug["cache_lookups"]["count"], json!(1));
        assert_eq!(debug["cache_lookups"]["hits"], json!(0));
        assert_eq!(debug["downloads"]["count"], json!(1));
        assert_eq!(debug["modules"]["count"], json!(1));

        let key = format!("libxul.so/{}", LINUX_DEBUG_ID);
        assert_eq!(debug["modules"]["stacks_per_module"][&key], json!(1));
        assert_eq!(
            debug["downloads"]["size"],
            debug["downloads"]["size_per_module"][&key]
        );
        assert!(debug["parse_sym"]["time"].as_f64().is_some());
        assert!(debug["save_symcache"]["time"].as_f64().is_some());
    }

    #[tokio::test]
    async fn test_v5_no_debug_stanza_without_header() {
        let server = test::symbol_server(&[]).await;
        let (app, _temp) = test_app(&server).await;

        let payload = json!({
            "stacks": [[[-1, 100]]],
            "memoryMap": [],
        });
        let (status, body) = post_json(app, "/symbolicate/v5", payload, false).await;
        assert_eq!(status, 200);
        assert_eq!(body.get("debug"), None);
    }
}
