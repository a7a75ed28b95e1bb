//! A symbolication service for Breakpad crash stacks.
//!
//! Clients post batches of `(module_index, module_offset)` stack frames
//! together with a module table of `(debug_filename, debug_id)` pairs. The
//! service resolves each frame to a function, source file, line and inline
//! call chain by downloading the matching Breakpad `.sym` file, converting it
//! into a binary symcache and caching that conversion on disk.

#[macro_use]
pub mod metrics;

pub mod cli;
pub mod config;
pub mod endpoints;
pub mod logging;
pub mod services;
pub mod types;
pub mod utils;
