//! OPSI Core - Core types and utilities for building OPSI packages
//!
//! This crate provides the foundational pieces used by `opsi-mkpkg`:
//! - `Metadata`: Flat `section_key` mapping read from a control file
//! - `ControlParser`: Parser for the colon-delimited, sectioned control file
//! - `assemble`: The tar → gzip → tar pipeline producing the `.opsi` package
//! - `inspect_package`: Read back a built package for verification

pub mod archive;
pub mod control;
pub mod error;
pub mod metadata;

pub use archive::{
    ArchiveEntry, AssemblyStep, CLIENT_DATA_ARCHIVE, CONTROL_ENTRY, CompressionStats,
    OPSI_ARCHIVE, PackageInfo, assemble, inspect_package, list_entries, list_gz_entries,
    read_entry, read_gz_entry,
};
pub use control::{ControlParser, ParsedControl, SkipReason, SkippedLine, parse, parse_reader};
pub use error::{CoreError, Result};
pub use metadata::{
    Metadata, PACKAGE_EXTENSION, PACKAGE_VERSION, PRODUCT_ID, PRODUCT_VERSION, parse_overrides,
};
