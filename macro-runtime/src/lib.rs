//! # macro-runtime
//!
//! Reference executor for the instruction text produced by `macro-core`.
//!
//! ## Flow
//!
//! ```text
//! Macro source (.mac)
//!      ↓
//! Builder + Compiler (macro-core)
//!      ↓
//! Instruction text + string pool
//!      ↓
//! Executor (this crate) ←── call arguments bound per call
//!      ↓
//! Expanded text
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use macro_runtime::{MacroRuntime, RuntimeConfig};
//!
//! let mut runtime = MacroRuntime::new(RuntimeConfig::default())?;
//! runtime.load_file("word.mac")?;
//! let text = runtime.call("word(3, prefix=\"w\")")?;
//! print!("{}", text);
//! ```

pub mod error;
pub mod executor;
pub mod loader;
pub mod runtime;

pub use error::{RuntimeError, RuntimeResult};
pub use executor::{split, Executor, Instruction, Program};
pub use loader::{LoadedMacro, ProgramLoader};
pub use runtime::{MacroRuntime, RuntimeConfig};

// Re-export core types
pub use macro_core::{CallSite, CompiledMacro, MacroConfig, MacroInstance, MacroTemplate, Value};
