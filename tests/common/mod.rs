// tests/common/mod.rs

#![allow(dead_code)]

//! Shared helpers for the integration tests.

use std::path::Path;

pub use projrun_test_utils::init_tracing;

/// Read a file the run under test wrote, without trailing whitespace.
pub fn read_trimmed(path: impl AsRef<Path>) -> String {
    let path = path.as_ref();
    std::fs::read_to_string(path)
        .unwrap_or_else(|e| panic!("reading {}: {e}", path.display()))
        .trim_end()
        .to_string()
}
