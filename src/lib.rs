//! # Quill bytecode back end
//!
//! Turns a parsed Quill syntax tree into code objects for the stack-based
//! Quill VM, and reads/writes those code objects in a portable binary form.
//!
//! ```text
//!   lang::node (syntax tree)
//!        │
//!        ▼
//!   bytecode::compile::Compiler ──► bytecode::emitter::Emitter ──► Scope tables
//!        │
//!        ▼
//!   bytecode::ir::CodeObject ──► bytecode::serialize / bytecode::disasm
//! ```

pub mod bytecode;
pub mod config;
pub mod lang;

pub use bytecode::{CodeObject, Compiler, Instruction, Opcode};
pub use config::CompilerConfig;
