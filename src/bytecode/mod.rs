pub mod buffer;
pub mod compile;
pub mod compile_error;
pub mod constants;
pub mod disasm;
pub mod emitter;
pub mod ir;
pub mod op;
pub mod scope;
pub mod serialize;
pub mod stack_effect;
pub mod tail_call;

pub use compile::{Compiler, compile};
pub use compile_error::CompileError;
pub use ir::{CodeFlags, CodeObject, DebugSymbol, DebugTable};
pub use op::{Instruction, Opcode};
pub use serialize::SerializeError;
