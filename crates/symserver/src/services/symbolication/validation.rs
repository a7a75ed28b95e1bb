//! Validation of the semi-structured request payload.
//!
//! Payloads are adversarial: jobs arrive as raw JSON values and are checked
//! field by field so error messages can name the offending index. Successful
//! validation doubles as the conversion into the typed job structures.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use thiserror::Error;

use crate::types::{ModuleInfo, RawFrame};

lazy_static! {
    // zero or more hex characters
    static ref VALID_DEBUG_ID: Regex = Regex::new(r"^[A-Fa-f0-9]*$").unwrap();
    // zero or more alphanumerics plus some punctuation and spaces
    static ref VALID_DEBUG_FILENAME: Regex = Regex::new(r"^[A-Za-z0-9_.+{}@<> ~\-]*$").unwrap();
}

#[derive(Debug, Error)]
#[error("{0}")]
pub struct InvalidModules(pub String);

#[derive(Debug, Error)]
#[error("{0}")]
pub struct InvalidStacks(pub String);

/// Validates a job's `memoryMap`: a list of `[debug_filename, debug_id]`
/// pairs where the debug id is hex and the filename a library basename.
pub fn validate_modules(modules: &Value) -> Result<Vec<ModuleInfo>, InvalidModules> {
    let modules = modules
        .as_array()
        .ok_or_else(|| InvalidModules("modules must be a list".to_owned()))?;

    let mut validated = Vec::with_capacity(modules.len());
    for (i, item) in modules.iter().enumerate() {
        let pair = match item.as_array() {
            Some(pair) if pair.len() == 2 => pair,
            _ => {
                tracing::debug!("invalid module {:?}", item);
                return Err(InvalidModules(format!(
                    "module index {} does not have a debug_filename and debug_id",
                    i
                )));
            }
        };

        let debug_filename = pair[0]
            .as_str()
            .filter(|value| VALID_DEBUG_FILENAME.is_match(value))
            .ok_or_else(|| {
                tracing::debug!("invalid debug_filename {:?}", item);
                InvalidModules(format!("module index {} has an invalid debug_filename", i))
            })?;

        let debug_id = pair[1]
            .as_str()
            .filter(|value| VALID_DEBUG_ID.is_match(value))
            .ok_or_else(|| {
                tracing::debug!("invalid debug_id {:?}", item);
                InvalidModules(format!("module index {} has an invalid debug_id", i))
            })?;

        validated.push(ModuleInfo {
            debug_filename: debug_filename.to_owned(),
            debug_id: debug_id.to_owned(),
        });
    }

    Ok(validated)
}

/// Validates a job's `stacks`: a non-empty list of stacks, each a list of
/// `[module_index, module_offset]` integer pairs.
pub fn validate_stacks(
    stacks: &Value,
    modules: &[ModuleInfo],
) -> Result<Vec<Vec<RawFrame>>, InvalidStacks> {
    let stacks = stacks
        .as_array()
        .ok_or_else(|| InvalidStacks("stacks must be a list of lists".to_owned()))?;

    if stacks.is_empty() {
        return Err(InvalidStacks("no stacks specified".to_owned()));
    }

    let mut validated = Vec::with_capacity(stacks.len());
    for (i, stack) in stacks.iter().enumerate() {
        let stack = stack.as_array().ok_or_else(|| {
            tracing::debug!("invalid stack {:?}", stack);
            InvalidStacks(format!("stack {} is not a list", i))
        })?;

        let mut validated_stack = Vec::with_capacity(stack.len());
        for (frame_i, frame) in stack.iter().enumerate() {
            let pair = match frame.as_array() {
                Some(pair) if pair.len() == 2 => pair,
                _ => {
                    tracing::debug!("invalid frame {:?}", frame);
                    return Err(InvalidStacks(format!(
                        "stack {} frame {} is not a list of two items",
                        i, frame_i
                    )));
                }
            };

            let module_index = pair[0].as_i64().ok_or_else(|| {
                tracing::debug!("invalid module_index {:?}", frame);
                InvalidStacks(format!(
                    "stack {} frame {} has an invalid module_index",
                    i, frame_i
                ))
            })?;

            // -1 marks an address that is not in any module
            if module_index < -1 || module_index >= modules.len() as i64 {
                tracing::debug!("invalid module_index {:?}", frame);
                return Err(InvalidStacks(format!(
                    "stack {} frame {} has a module_index that isn't in modules",
                    i, frame_i
                )));
            }

            let module_offset = pair[1].as_i64().filter(|offset| *offset >= -1).ok_or_else(
                || {
                    tracing::debug!("invalid module_offset {:?}", frame);
                    InvalidStacks(format!(
                        "stack {} frame {} has an invalid module_offset",
                        i, frame_i
                    ))
                },
            )?;

            validated_stack.push(RawFrame {
                module_index,
                module_offset,
            });
        }
        validated.push(validated_stack);
    }

    Ok(validated)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn modules() -> Vec<ModuleInfo> {
        validate_modules(&json!([["libxul.so", "ABCDEF"]])).unwrap()
    }

    #[test]
    fn test_valid_modules() {
        let validated =
            validate_modules(&json!([["libxul.so", "ABCDEF"], ["", ""]])).unwrap();
        assert_eq!(validated.len(), 2);
        assert_eq!(validated[0].debug_filename, "libxul.so");
        assert_eq!(validated[0].debug_id, "ABCDEF");
        assert!(!validated[1].is_resolvable());
    }

    #[test]
    fn test_modules_not_a_list() {
        let err = validate_modules(&json!({"0": ["a", "b"]})).unwrap_err();
        assert_eq!(err.to_string(), "modules must be a list");
    }

    #[test]
    fn test_module_not_a_pair() {
        for item in [json!(["only_one"]), json!(["a", "b", "c"]), json!("flat")] {
            let err = validate_modules(&json!([["ok", "AB"], item])).unwrap_err();
            assert_eq!(
                err.to_string(),
                "module index 1 does not have a debug_filename and debug_id"
            );
        }
    }

    #[test]
    fn test_module_invalid_debug_filename() {
        for filename in [json!(42), json!("bad/slash"), json!("bad\nnewline")] {
            let err = validate_modules(&json!([[filename, "ABCDEF"]])).unwrap_err();
            assert_eq!(
                err.to_string(),
                "module index 0 has an invalid debug_filename"
            );
        }
    }

    #[test]
    fn test_module_invalid_debug_id() {
        for debug_id in [json!(42), json!("XYZ"), json!("abc-def")] {
            let err = validate_modules(&json!([["libxul.so", debug_id]])).unwrap_err();
            assert_eq!(err.to_string(), "module index 0 has an invalid debug_id");
        }
    }

    #[test]
    fn test_valid_stacks() {
        let stacks =
            validate_stacks(&json!([[[0, 4660], [-1, -1]]]), &modules()).unwrap();
        assert_eq!(stacks.len(), 1);
        assert_eq!(stacks[0][0].module_index, 0);
        assert_eq!(stacks[0][0].module_offset, 4660);
        assert_eq!(stacks[0][1].module_index, -1);
        assert_eq!(stacks[0][1].module_offset, -1);
    }

    #[test]
    fn test_stacks_not_a_list() {
        let err = validate_stacks(&json!("nope"), &modules()).unwrap_err();
        assert_eq!(err.to_string(), "stacks must be a list of lists");
    }

    #[test]
    fn test_stacks_empty() {
        let err = validate_stacks(&json!([]), &modules()).unwrap_err();
        assert_eq!(err.to_string(), "no stacks specified");
    }

    #[test]
    fn test_stack_not_a_list() {
        let err = validate_stacks(&json!([[[0, 1]], "frames"]), &modules()).unwrap_err();
        assert_eq!(err.to_string(), "stack 1 is not a list");
    }

    #[test]
    fn test_frame_not_a_pair() {
        let err = validate_stacks(&json!([[[0, 1, 2]]]), &modules()).unwrap_err();
        assert_eq!(err.to_string(), "stack 0 frame 0 is not a list of two items");
    }

    #[test]
    fn test_frame_module_index_not_an_integer() {
        let err = validate_stacks(&json!([[["0", 1]]]), &modules()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "stack 0 frame 0 has an invalid module_index"
        );
    }

    #[test]
    fn test_frame_module_index_out_of_range() {
        for module_index in [-2, 1] {
            let err =
                validate_stacks(&json!([[[module_index, 1]]]), &modules()).unwrap_err();
            assert_eq!(
                err.to_string(),
                "stack 0 frame 0 has a module_index that isn't in modules"
            );
        }
    }

    #[test]
    fn test_frame_invalid_module_offset() {
        for module_offset in [json!(-2), json!("16"), json!(1.5)] {
            let err =
                validate_stacks(&json!([[[0, module_offset]]]), &modules()).unwrap_err();
            assert_eq!(
                err.to_string(),
                "stack 0 frame 0 has an invalid module_offset"
            );
        }
    }
}
