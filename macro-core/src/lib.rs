//! # Macro compiler
//!
//! Compiles assembler macro definitions into stack-machine instruction text.
//!
//! A macro is a block of lines between `.macro` and `.mend`. Directive lines
//! declare parameters and locals, assign values and steer control flow;
//! every other line is text to emit, with `&name` substitutions:
//!
//! ```text
//! gen .macro count:int,prefix:str="item"
//! i   .local int
//!     .for i = 1 to count
//! &prefix&i: .word &i
//!     .endfor
//!     .mend
//! ```
//!
//! ## Architecture
//!
//! ```text
//! Macro source
//!     ↓ builder (line state machine + expression parser)
//! MacroDef (command tree, declarations)
//!     ↓ compiler (template parts, labels, string pool)
//! Instruction text + string pool
//!
//! MacroDef ──→ MacroTemplate ──bind(call)──→ MacroInstance (per call)
//! ```
//!
//! The reference executor for the instruction text lives in `macro-runtime`.

pub mod ast;
pub mod binder;
pub mod builder;
pub mod compiler;
pub mod config;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod template;
pub mod types;

pub use ast::{Command, Declarations, Expr, MacroDef, Slot, SlotRef, SlotRole};
pub use binder::{bind, parse_call, CallSite, MacroInstance, MacroTemplate};
pub use builder::{BuildState, MacroBuilder};
pub use compiler::{CompiledMacro, Compiler};
pub use config::MacroConfig;
pub use error::{Error, Result};
pub use lexer::{Lexer, Span, SpannedToken, Token};
pub use parser::Parser;
pub use template::{NameKeeper, TemplateRepo};
pub use types::{Value, ValueKind};

/// Build a macro definition from source text
pub fn build(source: &str) -> Result<MacroDef> {
    builder::build(source)
}

/// Build and compile macro source with the built-in templates
pub fn compile(source: &str) -> Result<CompiledMacro> {
    let def = build(source)?;
    let templates = TemplateRepo::builtin()?;
    Compiler::new(&templates).compile(&def)
}

/// Bind call-site text to a fresh instance of `template`
pub fn bind_text(template: &MacroTemplate, call: &str) -> Result<MacroInstance> {
    binder::bind(template, &binder::parse_call(call)?)
}
