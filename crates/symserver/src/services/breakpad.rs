//! Conversion of Breakpad `.sym` text into binary symcaches.
//!
//! The heavy lifting is done by the `symbolic` crates: the sym file is parsed
//! as a [`BreakpadObject`] and run through a [`SymCacheConverter`], producing
//! a compact index that answers address lookups with full inline chains.

use symbolic::common::{ByteView, DebugId, SelfCell};
use symbolic::debuginfo::breakpad::{
    BreakpadError, BreakpadInfoRecord, BreakpadModuleRecord, BreakpadObject,
};
use symbolic::symcache::{SymCache, SymCacheConverter};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseSymError {
    /// The requested debug id is not valid Breakpad id syntax.
    #[error("invalid debug id: {0}")]
    BadDebugId(String),

    /// The sym file describes a different build than the one requested.
    #[error("sym file does not match debug id {expected}")]
    DebugIdMismatch { expected: DebugId },

    /// The sym file text could not be parsed.
    #[error("malformed sym file: {0}")]
    Malformed(#[from] BreakpadError),

    /// The parsed sym file could not be converted into a symcache.
    #[error("failed to convert sym file: {0}")]
    Conversion(#[source] symbolic::symcache::Error),

    #[error("failed to write symcache: {0}")]
    Io(#[from] std::io::Error),
}

impl ParseSymError {
    /// Stable identifier used as the `reason` tag on parse error metrics.
    pub fn reason_code(&self) -> &'static str {
        match self {
            ParseSymError::BadDebugId(_) => "bad_debug_id",
            ParseSymError::DebugIdMismatch { .. } => "debug_id_mismatch",
            ParseSymError::Malformed(_) => "sym_malformed",
            ParseSymError::Conversion(_) => "symcache_convert",
            ParseSymError::Io(_) => "symcache_write",
        }
    }
}

/// An owned, parsed symcache.
///
/// [`SymCache`] borrows from the buffer it was parsed from, so the handle
/// keeps the backing bytes and the parsed view together in a [`SelfCell`].
pub struct SymCacheHandle {
    cell: SelfCell<ByteView<'static>, SymCache<'static>>,
}

impl SymCacheHandle {
    /// Parses a symcache from its serialized bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, symbolic::symcache::Error> {
        let cell = SelfCell::try_new(ByteView::from_vec(bytes), |data| {
            SymCache::parse(unsafe { &*data })
        })?;
        Ok(Self { cell })
    }

    pub fn symcache(&self) -> &SymCache<'_> {
        self.cell.get()
    }

    /// The serialized form, suitable for caching.
    pub fn as_bytes(&self) -> &[u8] {
        self.cell.owner().as_slice()
    }
}

/// Converts a Breakpad sym file into serialized symcache bytes.
///
/// The requested `debug_id` must parse and match the `MODULE` header of the
/// sym file; the distinct error variants become metric reason tags.
pub fn parse_sym_file(
    debug_filename: &str,
    debug_id: &str,
    data: &[u8],
) -> Result<Vec<u8>, ParseSymError> {
    let debug_id = DebugId::from_breakpad(debug_id)
        .map_err(|_| ParseSymError::BadDebugId(debug_id.to_owned()))?;

    let object = BreakpadObject::parse(data)?;
    if object.debug_id() != debug_id {
        tracing::debug!(
            "sym file for {} has debug id {}, expected {}",
            debug_filename,
            object.debug_id(),
            debug_id
        );
        return Err(ParseSymError::DebugIdMismatch { expected: debug_id });
    }

    let mut converter = SymCacheConverter::new();
    converter
        .process_object(&object)
        .map_err(ParseSymError::Conversion)?;

    let mut buffer = Vec::new();
    converter.serialize(&mut buffer)?;
    Ok(buffer)
}

/// Extracts the module filename from a sym file header.
///
/// For most platforms this is the debug filename the caller already has. On
/// Windows the debug filename is the PDB name, while the module people expect
/// to see is the PE name recorded in the `INFO CODE_ID` line.
pub fn get_module_filename(data: &[u8], default: &str) -> String {
    let first_line = data.split(|byte| *byte == b'\n').next().unwrap_or_default();
    let module = match BreakpadModuleRecord::parse(first_line) {
        Ok(module) => module,
        Err(_) => return default.to_owned(),
    };

    if module.os.eq_ignore_ascii_case("windows") {
        if let Ok(object) = BreakpadObject::parse(data) {
            for record in object.info_records().flatten() {
                if let BreakpadInfoRecord::CodeId { code_file, .. } = record {
                    if !code_file.is_empty() {
                        return code_file.to_owned();
                    }
                }
            }
        }
    }

    default.to_owned()
}
