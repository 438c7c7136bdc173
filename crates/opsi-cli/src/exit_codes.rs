//! Exit codes of `opsi-mkpkg`

#![allow(dead_code)]

/// Success - package created
pub const SUCCESS: i32 = 0;

/// General error - unspecified failure (template, IO, metadata)
pub const ERROR: i32 = 1;

/// Usage error - invalid arguments or options (also used by clap)
pub const USAGE_ERROR: i32 = 2;

/// Missing input - OPSI directory, data directory or control file not found
pub const MISSING_INPUT: i32 = 3;
