use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    /// A construct that is malformed or appears where it is not allowed.
    #[error("compile error: line {line}: {construct}: {reason}{}", hint_suffix(.hint))]
    InvalidConstruct {
        construct: String,
        line: u32,
        reason: String,
        hint: Option<String>,
    },

    /// An operand does not fit the instruction encoding.
    #[error("compile error: {what} operand {value} exceeds the encodable limit {max}")]
    OperandOverflow { what: String, value: i64, max: i64 },

    /// Internal compiler error (shouldn't happen in normal use)
    #[error("compile error: internal error: {0}")]
    Internal(String),
}

fn hint_suffix(hint: &Option<String>) -> String {
    match hint {
        Some(h) => format!("\n  hint: {}", h),
        None => String::new(),
    }
}

impl CompileError {
    pub fn invalid(construct: &str, line: u32, reason: impl Into<String>) -> Self {
        CompileError::InvalidConstruct {
            construct: construct.to_string(),
            line,
            reason: reason.into(),
            hint: None,
        }
    }

    pub fn invalid_with_hint(
        construct: &str,
        line: u32,
        reason: impl Into<String>,
        hint: impl Into<String>,
    ) -> Self {
        CompileError::InvalidConstruct {
            construct: construct.to_string(),
            line,
            reason: reason.into(),
            hint: Some(hint.into()),
        }
    }

    /// `try` with neither `catch` nor `finally`.
    pub fn try_without_handler(line: u32) -> Self {
        Self::invalid_with_hint(
            "try",
            line,
            "a try block needs a catch clause, a finally clause, or both",
            "add `catch (e) { ... }` or `finally { ... }`",
        )
    }

    /// `break` / `continue` with no enclosing loop.
    pub fn outside_loop(construct: &str, line: u32) -> Self {
        Self::invalid(construct, line, "must appear inside a loop")
    }

    pub fn return_outside_function(line: u32) -> Self {
        Self::invalid_with_hint(
            "return",
            line,
            "return is only allowed inside a function body",
            "top-level code and class or namespace bodies cannot return",
        )
    }

    pub fn yield_outside_generator(line: u32) -> Self {
        Self::invalid_with_hint(
            "yield",
            line,
            "yield is only allowed inside a generator",
            "declare the function as a generator",
        )
    }

    pub fn invalid_assignment_target(construct: &str, line: u32) -> Self {
        Self::invalid_with_hint(
            "assignment",
            line,
            format!("cannot assign to {}", construct),
            "the left side must be a variable, a member or an index",
        )
    }

    pub fn overflow(what: &str, value: i64, max: i64) -> Self {
        CompileError::OperandOverflow {
            what: what.to_string(),
            value,
            max,
        }
    }

    /// Create an internal compiler error
    pub fn internal(msg: impl Into<String>) -> Self {
        CompileError::Internal(msg.into())
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, CompileError::Internal(_))
    }
}
