//! # Quill syntax tree
//!
//! This module defines the syntax tree the bytecode compiler consumes. The
//! tree is produced by the parser (a separate collaborator) and is never
//! mutated by the compiler.
//!
//! ## Conventions
//!
//! - Every `Stmt` and `Expr` carries the 1-based source line it starts on.
//! - Node kinds are a closed sum type; the compiler dispatches with a single
//!   `match` per node family.

pub mod node;
pub mod value;

#[cfg(test)]
pub(crate) mod build;
