//! Sandstone: sandbox policy language compiler and bytecode dissector.
//!
//! This crate compiles SBPL profile source into a compiled profile, releases
//! it, and takes compiled bytecode apart again.
//!
//! # Modules
//!
//! - [`sbpl`] — Lexer, parser and validator for the policy language.
//! - [`operations`] — Operation name tables (slot order per OS release).
//! - [`filters`] — The filter catalogue and argument kinds.
//! - [`compile`] — The [`Compiler`](compile::Compiler) seam, the builtin
//!   compiler and [`CompiledProfile`](compile::CompiledProfile).
//! - [`bytecode`] — Reading, writing and dissecting compiled bytecode.
//! - [`eval`] — Userspace evaluation of compiled profiles.
//! - [`hex`] — Hex dump rendering.
//! - `native` (macOS) — Binding to `libsandbox`.
//!
//! # Example
//!
//! ```
//! use sandstone::compile::compile_string;
//! use sandstone::eval::{Evaluator, Request};
//! use sandstone::operations::OperationTable;
//! use sandstone::sbpl::Parameters;
//!
//! let source = r#"
//!     (version 1)
//!     (deny default)
//!     (allow file-read* (subpath "/usr/lib"))
//! "#;
//! let profile = compile_string(source, &Parameters::new()).unwrap();
//!
//! let evaluator = Evaluator::new(profile.bytecode(), OperationTable::default()).unwrap();
//! let request = Request::new("file-read-data").with_argument("/usr/lib/dyld");
//! assert!(evaluator.evaluate(0, &request).unwrap().is_allowed());
//! ```

pub mod bytecode;
pub mod compile;
pub mod eval;
pub mod filters;
pub mod hex;
#[cfg(target_os = "macos")]
pub mod native;
pub mod operations;
pub mod sbpl;

pub use compile::{
    BuiltinCompiler, CompileError, CompiledProfile, Compiler, PROFILE_TYPE_COLLECTION,
    PROFILE_TYPE_SINGLE, compile_collection, compile_string,
};
pub use sbpl::Parameters;
