use serde::{Deserialize, Serialize};

/// Knobs for a single compilation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// Record local-variable lifetimes in a debug symbol table.
    pub debug_info: bool,
    /// Emit `LINE` markers whenever a statement starts on a new source line.
    pub line_markers: bool,
    /// Turn terminal self-calls into `TAIL_CALL`.
    pub tail_calls: bool,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        CompilerConfig {
            debug_info: false,
            line_markers: true,
            tail_calls: true,
        }
    }
}

impl CompilerConfig {
    /// Configuration used by tooling: everything on.
    pub fn debug() -> Self {
        CompilerConfig {
            debug_info: true,
            ..CompilerConfig::default()
        }
    }
}
