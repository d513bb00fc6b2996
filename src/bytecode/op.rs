use serde::{Deserialize, Serialize};

use crate::bytecode::compile_error::CompileError;

// =============================================================================
// OPCODE - what an instruction does
// =============================================================================

/// Shape of the 24-bit operand field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    None,
    Unsigned,
    Signed,
    /// Two 12-bit unsigned fields.
    Pair,
}

macro_rules! opcodes {
    ($( $(#[$doc:meta])* $name:ident = $code:literal, $mnemonic:literal, $kind:ident; )*) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum Opcode {
            $( $(#[$doc])* $name = $code, )*
        }

        impl Opcode {
            pub fn from_u8(byte: u8) -> Option<Opcode> {
                match byte {
                    $( $code => Some(Opcode::$name), )*
                    _ => None,
                }
            }

            pub fn mnemonic(self) -> &'static str {
                match self {
                    $( Opcode::$name => $mnemonic, )*
                }
            }

            pub fn operand_kind(self) -> OperandKind {
                match self {
                    $( Opcode::$name => OperandKind::$kind, )*
                }
            }
        }
    };
}

opcodes! {
    Nop = 0, "NOP", None;
    /// Source line marker for the instructions that follow.
    Line = 1, "LINE", Unsigned;

    // stack ops
    Pop = 2, "POP", None;
    Dup = 3, "DUP", None;

    // literals
    PushNil = 4, "PUSH_NIL", None;
    PushTrue = 5, "PUSH_TRUE", None;
    PushFalse = 6, "PUSH_FALSE", None;
    PushThis = 7, "PUSH_THIS", None;
    LoadConst = 8, "LOAD_CONST", Unsigned;

    // variables
    LoadLocal = 9, "LOAD_LOCAL", Unsigned;
    StoreLocal = 10, "STORE_LOCAL", Unsigned;
    LoadOuter = 11, "LOAD_OUTER", Unsigned;
    StoreOuter = 12, "STORE_OUTER", Unsigned;
    /// Operand is the constant index of the global's name.
    LoadGlobal = 13, "LOAD_GLOBAL", Unsigned;
    StoreGlobal = 14, "STORE_GLOBAL", Unsigned;

    // members and indexing
    GetMember = 15, "GET_MEMBER", Unsigned;
    /// ( obj value -- value )
    SetMember = 16, "SET_MEMBER", Unsigned;
    GetIndex = 17, "GET_INDEX", None;
    /// ( obj index value -- value )
    SetIndex = 18, "SET_INDEX", None;
    /// ( obj -- obj method )
    GetMethod = 19, "GET_METHOD", Unsigned;
    /// Defines a member on the class or namespace under construction.
    DefineMember = 20, "DEFINE_MEMBER", Unsigned;

    // constructors
    NewArray = 21, "NEW_ARRAY", Unsigned;
    /// Operand is the number of key/value pairs.
    NewMap = 22, "NEW_MAP", Unsigned;

    // arithmetic
    Add = 23, "ADD", None;
    Sub = 24, "SUB", None;
    Mul = 25, "MUL", None;
    Div = 26, "DIV", None;
    Mod = 27, "MOD", None;
    Pow = 28, "POW", None;
    Concat = 29, "CONCAT", None;
    Neg = 30, "NEG", None;

    // comparison
    Eq = 31, "EQ", None;
    Ne = 32, "NE", None;
    Lt = 33, "LT", None;
    Le = 34, "LE", None;
    Gt = 35, "GT", None;
    Ge = 36, "GE", None;

    // logic and bits
    Not = 37, "NOT", None;
    BitAnd = 38, "BIT_AND", None;
    BitOr = 39, "BIT_OR", None;
    BitXor = 40, "BIT_XOR", None;
    Shl = 41, "SHL", None;
    Shr = 42, "SHR", None;
    BitNot = 43, "BIT_NOT", None;

    // jumps: operand is relative to the next instruction
    Jump = 44, "JUMP", Signed;
    JumpIfFalse = 45, "JUMP_FALSE", Signed;
    JumpIfTrue = 46, "JUMP_TRUE", Signed;
    /// Jumps keeping the value when falsy, pops it otherwise.
    JumpIfFalseOrPop = 47, "JUMP_FALSE_OR_POP", Signed;
    JumpIfTrueOrPop = 48, "JUMP_TRUE_OR_POP", Signed;

    // iteration
    /// ( value -- iterator )
    Iter = 49, "ITER", None;
    /// ( iterator -- item ), jumps when exhausted.
    ForIter = 50, "FOR_ITER", Signed;

    // calls
    Call = 51, "CALL", Unsigned;
    CallMethod = 52, "CALL_METHOD", Unsigned;
    /// Positional count, named count. Named arguments are name/value pairs.
    CallNamed = 53, "CALL_NAMED", Pair;
    /// Self call that reuses the current frame.
    TailCall = 54, "TAIL_CALL", Unsigned;
    /// Marks the value below as an argument list to expand.
    Spread = 55, "SPREAD", None;
    Return = 56, "RETURN", None;
    Yield = 57, "YIELD", None;

    // exceptions
    Throw = 58, "THROW", None;
    TryFinally = 59, "TRY_FINALLY", Signed;
    TryCatch = 60, "TRY_CATCH", Signed;
    EndTry = 61, "END_TRY", None;
    EndFinally = 62, "END_FINALLY", None;

    // nested code objects: operand is the child index
    Closure = 63, "CLOSURE", Unsigned;
    /// ( parent -- class )
    Class = 64, "CLASS", Unsigned;
    Namespace = 65, "NAMESPACE", Unsigned;
    /// Capture pseudo-instructions follow CLOSURE/CLASS/NAMESPACE, one per
    /// outer slot of the child, in slot order.
    CaptureLocal = 66, "CAPTURE_LOCAL", Unsigned;
    CaptureOuter = 67, "CAPTURE_OUTER", Unsigned;

    // parameters
    /// ( -- bool ) whether argument i was supplied by the caller.
    HasArg = 68, "HAS_ARG", Unsigned;
    ParamEnd = 69, "PARAM_END", Unsigned;
}

impl Opcode {
    pub fn is_jump(self) -> bool {
        self.operand_kind() == OperandKind::Signed
    }

    /// Stores that consume the value on top of the stack.
    pub fn is_store(self) -> bool {
        matches!(
            self,
            Opcode::StoreLocal | Opcode::StoreOuter | Opcode::StoreGlobal
        )
    }
}

// =============================================================================
// INSTRUCTION - one encoded word
// =============================================================================

const OPCODE_BITS: u32 = 8;
const OPERAND_BITS: u32 = 24;
const PAIR_BITS: u32 = 12;

pub const MAX_UNSIGNED: u32 = (1 << OPERAND_BITS) - 1;
pub const MAX_SIGNED: i32 = (1 << (OPERAND_BITS - 1)) - 1;
pub const MIN_SIGNED: i32 = -(1 << (OPERAND_BITS - 1));
pub const MAX_PAIR: u32 = (1 << PAIR_BITS) - 1;

/// A single fixed-width instruction: opcode in the low byte, operand in the
/// high 24 bits.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Instruction(u32);

impl Instruction {
    pub const fn from_raw(raw: u32) -> Self {
        Instruction(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub const fn simple(op: Opcode) -> Self {
        Instruction(op as u32)
    }

    pub fn with_unsigned(op: Opcode, operand: u32) -> Result<Self, CompileError> {
        if operand > MAX_UNSIGNED {
            return Err(CompileError::overflow(op.mnemonic(), operand as i64, MAX_UNSIGNED as i64));
        }
        Ok(Instruction(op as u32 | (operand << OPCODE_BITS)))
    }

    pub fn with_signed(op: Opcode, operand: i32) -> Result<Self, CompileError> {
        if !(MIN_SIGNED..=MAX_SIGNED).contains(&operand) {
            return Err(CompileError::overflow(op.mnemonic(), operand as i64, MAX_SIGNED as i64));
        }
        let bits = (operand as u32) & MAX_UNSIGNED;
        Ok(Instruction(op as u32 | (bits << OPCODE_BITS)))
    }

    pub fn with_pair(op: Opcode, a: u32, b: u32) -> Result<Self, CompileError> {
        for v in [a, b] {
            if v > MAX_PAIR {
                return Err(CompileError::overflow(op.mnemonic(), v as i64, MAX_PAIR as i64));
            }
        }
        Ok(Instruction(op as u32 | (a << OPCODE_BITS) | (b << (OPCODE_BITS + PAIR_BITS))))
    }

    pub fn opcode_byte(self) -> u8 {
        (self.0 & 0xff) as u8
    }

    /// Decoded opcode; `None` for a byte no opcode uses.
    pub fn opcode(self) -> Option<Opcode> {
        Opcode::from_u8(self.opcode_byte())
    }

    pub fn unsigned(self) -> u32 {
        self.0 >> OPCODE_BITS
    }

    /// Sign-extended 24-bit operand.
    pub fn signed(self) -> i32 {
        (self.0 as i32) >> OPCODE_BITS
    }

    pub fn pair(self) -> (u32, u32) {
        let operand = self.unsigned();
        (operand & MAX_PAIR, operand >> PAIR_BITS)
    }

    pub fn is(self, op: Opcode) -> bool {
        self.opcode_byte() == op as u8
    }

    /// Absolute target of a jump located at `ip`.
    pub fn jump_target(self, ip: usize) -> Option<usize> {
        match self.opcode() {
            Some(op) if op.is_jump() => {
                let target = ip as i64 + 1 + self.signed() as i64;
                usize::try_from(target).ok()
            }
            _ => None,
        }
    }
}

impl std::fmt::Debug for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.opcode() {
            None => write!(f, "?{:#010x}", self.0),
            Some(op) => match op.operand_kind() {
                OperandKind::None => write!(f, "{}", op.mnemonic()),
                OperandKind::Unsigned => write!(f, "{} {}", op.mnemonic(), self.unsigned()),
                OperandKind::Signed => write!(f, "{} {:+}", op.mnemonic(), self.signed()),
                OperandKind::Pair => {
                    let (a, b) = self.pair();
                    write!(f, "{} {} {}", op.mnemonic(), a, b)
                }
            },
        }
    }
}
