use crate::bytecode::op::{Instruction, Opcode};
use crate::lang::value::Value;
use serde::{Deserialize, Serialize};

/// Flag bits describing a code object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CodeFlags(u32);

impl CodeFlags {
    pub const NONE: CodeFlags = CodeFlags(0);
    pub const HAS_DEBUG_INFO: CodeFlags = CodeFlags(1 << 0);
    pub const HAS_EXCEPTION_BLOCKS: CodeFlags = CodeFlags(1 << 1);
    pub const HAS_VARARGS: CodeFlags = CodeFlags(1 << 2);
    pub const HAS_NAMED_PARAMS: CodeFlags = CodeFlags(1 << 3);
    pub const GENERATOR: CodeFlags = CodeFlags(1 << 4);

    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn from_bits(bits: u32) -> CodeFlags {
        CodeFlags(bits)
    }

    #[inline]
    pub const fn contains(self, other: CodeFlags) -> bool {
        (self.0 & other.0) == other.0
    }

    #[inline]
    pub fn insert(&mut self, other: CodeFlags) {
        self.0 |= other.0;
    }

    #[inline]
    pub fn remove(&mut self, other: CodeFlags) {
        self.0 &= !other.0;
    }
}

/// Lifetime of one named local: valid for instructions `start..end`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugSymbol {
    pub name: String,
    pub start: u32,
    pub end: u32,
}

/// Local-variable lifetimes, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugTable {
    pub symbols: Vec<DebugSymbol>,
}

impl DebugTable {
    /// Name of the local living in `slot` at instruction `ip`.
    ///
    /// Slots are handed out densely and freed in stack order, so the slot of
    /// a symbol is the number of earlier symbols still alive when it starts.
    pub fn name_for_slot(&self, slot: u32, ip: usize) -> Option<&str> {
        let ip = ip as u32;
        self.symbols
            .iter()
            .enumerate()
            .filter(|(_, sym)| sym.start <= ip && ip < sym.end)
            .find(|(i, sym)| self.slot_of(*i, sym) == slot)
            .map(|(_, sym)| sym.name.as_str())
    }

    fn slot_of(&self, index: usize, sym: &DebugSymbol) -> u32 {
        self.symbols[..index]
            .iter()
            .filter(|earlier| earlier.start <= sym.start && earlier.end > sym.start)
            .count() as u32
    }
}

/// Immutable compiled unit: a program, function, generator, class body or
/// namespace body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CodeObject {
    pub code: Vec<Instruction>,
    pub constants: Vec<Value>,
    /// Stack slots the VM must reserve for a frame of this code.
    pub max_stack: u32,
    pub flags: CodeFlags,
    pub arg_count: u32,
    pub outer_count: u32,
    pub local_count: u32,
    /// One entry per argument; `None` when the argument has no name.
    pub arg_names: Vec<Option<String>>,
    pub debug: Option<DebugTable>,
    /// Functions, classes and namespaces defined inside this one.
    pub children: Vec<CodeObject>,
}

impl CodeObject {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has(&self, flag: CodeFlags) -> bool {
        self.flags.contains(flag)
    }

    pub fn child(&self, index: usize) -> Option<&CodeObject> {
        self.children.get(index)
    }

    /// Decoded opcodes, skipping unknown bytes.
    pub fn opcodes(&self) -> impl Iterator<Item = Opcode> + '_ {
        self.code.iter().filter_map(|ins| ins.opcode())
    }

    pub fn count_op(&self, op: Opcode) -> usize {
        self.code.iter().filter(|ins| ins.is(op)).count()
    }

    /// Index of the first instruction with `op`.
    pub fn position_of(&self, op: Opcode) -> Option<usize> {
        self.code.iter().position(|ins| ins.is(op))
    }

    /// Total number of code objects in this tree, including `self`.
    pub fn tree_size(&self) -> usize {
        1 + self.children.iter().map(CodeObject::tree_size).sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags() {
        let mut flags = CodeFlags::NONE;
        flags.insert(CodeFlags::HAS_VARARGS);
        flags.insert(CodeFlags::GENERATOR);
        assert!(flags.contains(CodeFlags::HAS_VARARGS));
        assert!(!flags.contains(CodeFlags::HAS_DEBUG_INFO));
        assert_eq!(flags.bits(), 0b10100);
        assert_eq!(CodeFlags::from_bits(flags.bits()), flags);
    }

    fn sym(name: &str, start: u32, end: u32) -> DebugSymbol {
        DebugSymbol {
            name: name.to_string(),
            start,
            end,
        }
    }

    #[test]
    fn test_name_for_slot_follows_reuse() {
        // arg `n` lives in slot 0 all along; `a` and then `b` reuse slot 1.
        let table = DebugTable {
            symbols: vec![sym("n", 0, 20), sym("a", 2, 8), sym("b", 8, 15)],
        };
        assert_eq!(table.name_for_slot(0, 5), Some("n"));
        assert_eq!(table.name_for_slot(1, 5), Some("a"));
        assert_eq!(table.name_for_slot(1, 9), Some("b"));
        assert_eq!(table.name_for_slot(1, 16), None);
    }

    #[test]
    fn test_name_for_slot_nested() {
        let table = DebugTable {
            symbols: vec![sym("outer", 0, 10), sym("inner", 3, 6)],
        };
        assert_eq!(table.name_for_slot(1, 4), Some("inner"));
        assert_eq!(table.name_for_slot(0, 4), Some("outer"));
    }

    #[test]
    fn test_tree_size() {
        let mut root = CodeObject::new();
        let mut child = CodeObject::new();
        child.children.push(CodeObject::new());
        root.children.push(child);
        root.children.push(CodeObject::new());
        assert_eq!(root.tree_size(), 4);
        assert!(root.child(1).is_some());
        assert!(root.child(2).is_none());
    }
}
