//! The batch symbolication engine.
//!
//! A request is processed in three passes. Pass 1 flattens all jobs into an
//! arena of output frames plus a list of `(module, offset, position)`
//! references. Pass 2 sorts that list by module so each distinct
//! `(debug_filename, debug_id)` pair is acquired exactly once, then fills in
//! function, file, line and inline data for every frame of the group through
//! the arena. Pass 3 derives the per-job `found_modules` report.

pub mod validation;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use anyhow::Result;

use crate::services::cache::DiskCache;
use crate::services::download::Downloader;
use crate::services::symcaches::SymCacheAcquirer;
use crate::types::{InlineFrame, Job, JobResult, ModuleInfo, SymbolicatedFrame};
use crate::utils::debug_stats::DebugStats;
use crate::utils::hex::format_hex;

pub use validation::{validate_modules, validate_stacks, InvalidModules, InvalidStacks};

/// A reference from the flat frame list into the result arena.
struct FrameRef {
    module: ModuleInfo,
    module_offset: i64,
    job: usize,
    stack: usize,
    frame: usize,
}

pub struct SymbolicationService {
    acquirer: SymCacheAcquirer,
}

impl SymbolicationService {
    pub fn new(downloader: Arc<Downloader>, cache: Arc<DiskCache>) -> Self {
        Self {
            acquirer: SymCacheAcquirer::new(downloader, cache),
        }
    }

    /// Symbolicates a batch of jobs, returning one result per job.
    ///
    /// Modules that cannot be resolved never fail the batch; their frames
    /// keep the bare `module`/`module_offset` fields and the module is
    /// reported as not found.
    pub async fn symbolicate(
        &self,
        jobs: &[Job],
        debug_stats: &mut DebugStats,
    ) -> Result<Vec<JobResult>> {
        // Pass 1: build the output arena and the flat frame list.
        let mut frame_refs = Vec::new();
        let mut job_results = Vec::with_capacity(jobs.len());

        for (job_index, job) in jobs.iter().enumerate() {
            let mut stacks = Vec::with_capacity(job.stacks.len());
            for (stack_index, stack) in job.stacks.iter().enumerate() {
                let mut frames = Vec::with_capacity(stack.len());
                for (frame_index, raw) in stack.iter().enumerate() {
                    let module = usize::try_from(raw.module_index)
                        .ok()
                        .and_then(|index| job.memory_map.get(index))
                        .cloned()
                        .unwrap_or_default();

                    frames.push(SymbolicatedFrame {
                        frame: frame_index,
                        // reported as-is when the module cannot be resolved;
                        // overwritten with the parsed module filename on success
                        module: if module.debug_filename.is_empty() {
                            "<unknown>".to_owned()
                        } else {
                            module.debug_filename.clone()
                        },
                        module_offset: format_hex(raw.module_offset),
                        function: None,
                        function_offset: None,
                        file: None,
                        line: None,
                        inlines: None,
                    });
                    frame_refs.push(FrameRef {
                        module,
                        module_offset: raw.module_offset,
                        job: job_index,
                        stack: stack_index,
                        frame: frame_index,
                    });
                }
                stacks.push(frames);
            }
            job_results.push(JobResult {
                stacks,
                found_modules: BTreeMap::new(),
            });
        }

        // Pass 2: group frames by module and symbolicate one module at a time.
        frame_refs.sort_by(|a, b| a.module.cmp(&b.module));

        let mut module_lookup: HashMap<ModuleInfo, bool> = HashMap::new();

        let mut start = 0;
        while start < frame_refs.len() {
            let mut end = start + 1;
            while end < frame_refs.len() && frame_refs[end].module == frame_refs[start].module {
                end += 1;
            }
            let group = &frame_refs[start..end];
            let module = &group[0].module;
            start = end;

            if !module.is_resolvable() {
                continue;
            }

            let acquired = self
                .acquirer
                .acquire(&module.debug_filename, &module.debug_id, debug_stats)
                .await?;
            let (handle, module_filename) = match acquired {
                Some(found) => found,
                None => {
                    module_lookup.insert(module.clone(), false);
                    continue;
                }
            };
            module_lookup.insert(module.clone(), true);

            let symcache = handle.symcache();
            for frame_ref in group {
                let frame =
                    &mut job_results[frame_ref.job].stacks[frame_ref.stack][frame_ref.frame];
                frame.module = module_filename.clone();

                if frame_ref.module_offset < 0 {
                    continue;
                }

                // ordered innermost inline frame first, outer function last
                let locations: Vec<_> = symcache.lookup(frame_ref.module_offset as u64).collect();
                let (outer, inline_locations) = match locations.split_last() {
                    Some(split) => split,
                    None => continue,
                };

                let function = outer.function();
                frame.function = Some(function.name().to_owned());
                frame.function_offset = Some(format_hex(
                    frame_ref.module_offset - i64::from(function.entry_pc()),
                ));
                frame.file = outer.file().map(|file| file.full_path());
                if outer.line() != 0 && frame.file.is_some() {
                    frame.line = Some(outer.line());
                }

                if !inline_locations.is_empty() {
                    let inlines = inline_locations
                        .iter()
                        .map(|location| {
                            let file = location.file().map(|file| file.full_path());
                            let line = if location.line() != 0 && file.is_some() {
                                Some(location.line())
                            } else {
                                None
                            };
                            InlineFrame {
                                function: location.function().name().to_owned(),
                                file,
                                line,
                            }
                        })
                        .collect();
                    frame.inlines = Some(inlines);
                }
            }
        }

        // Pass 3: report every memoryMap row as found, missing or unattempted.
        for (job_index, job_result) in job_results.iter_mut().enumerate() {
            job_result.found_modules = jobs[job_index]
                .memory_map
                .iter()
                .map(|module| (module.key(), module_lookup.get(module).copied()))
                .collect();
        }

        metric!(histogram("symbolicate.frames_count") = frame_refs.len() as u64);

        Ok(job_results)
    }
}
