//! Wire types for symbolication jobs and their results.

use std::collections::BTreeMap;

use serde::Serialize;

/// Maximum number of symbolication jobs accepted in a single request.
pub const MAX_JOBS: usize = 10;

/// Identity of a module as referenced by a job's `memoryMap`.
///
/// Either field may be empty, in which case the module cannot be resolved and
/// is reported as never looked up.
#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ModuleInfo {
    pub debug_filename: String,
    pub debug_id: String,
}

impl ModuleInfo {
    /// Whether both identifiers are present so a symbol lookup can be attempted.
    pub fn is_resolvable(&self) -> bool {
        !self.debug_filename.is_empty() && !self.debug_id.is_empty()
    }

    /// The `"{debug_filename}/{debug_id}"` key used in responses and stats.
    pub fn key(&self) -> String {
        format!("{}/{}", self.debug_filename, self.debug_id)
    }
}

/// An input stack frame: index into the job's `memoryMap` plus a byte offset
/// into that module.
///
/// A `module_index` of -1 marks an address outside of any module, and a
/// `module_offset` of -1 marks a frame without a usable offset.
#[derive(Clone, Copy, Debug)]
pub struct RawFrame {
    pub module_index: i64,
    pub module_offset: i64,
}

/// A validated symbolication job.
#[derive(Clone, Debug)]
pub struct Job {
    pub stacks: Vec<Vec<RawFrame>>,
    pub memory_map: Vec<ModuleInfo>,
}

/// An inline frame synthesized from the debug data, innermost callee first.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct InlineFrame {
    pub function: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

/// An output stack frame.
///
/// `frame`, `module` and `module_offset` are always present; the remaining
/// fields are filled only when the module's symcache could be acquired and
/// the offset resolved to a source location.
#[derive(Clone, Debug, Serialize)]
pub struct SymbolicatedFrame {
    pub frame: usize,
    pub module: String,
    pub module_offset: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_offset: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inlines: Option<Vec<InlineFrame>>,
}

/// Result for one job: symbolicated stacks plus the tri-state module report.
///
/// `found_modules` has one entry per `memoryMap` row: `true` when symbols
/// were acquired and used, `false` when acquisition was attempted and failed,
/// and `null` when the module was never looked up.
#[derive(Clone, Debug, Serialize)]
pub struct JobResult {
    pub stacks: Vec<Vec<SymbolicatedFrame>>,
    pub found_modules: BTreeMap<String, Option<bool>>,
}

#[derive(Debug, Serialize)]
pub struct SymbolicateV5Response {
    pub results: Vec<JobResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolicateV4Response {
    pub symbolicated_stacks: Vec<Vec<String>>,
    pub known_modules: Vec<Option<bool>>,
}
