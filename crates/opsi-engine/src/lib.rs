//! OPSI Engine - Control file template resolution
//!
//! Control files may contain placeholders that are filled from `key=value`
//! overrides before the file is parsed and packaged:
//!
//! ```text
//! [Product]
//! version: {{.product_version}}
//! ```
//!
//! This crate provides a MiniJinja-based resolver with:
//! - Support for the `{{.key}}` dot-field shorthand and plain `{{ key }}`
//! - Lenient (missing key renders empty) and strict modes
//! - Configurable escaping of substituted values
//! - Source-annotated diagnostics for malformed placeholders

pub mod error;
pub mod resolver;
pub mod suggestions;

pub use error::{EngineError, Result, TemplateError, TemplateErrorKind};
pub use resolver::{Escaping, Resolver, ResolverBuilder, resolve};
