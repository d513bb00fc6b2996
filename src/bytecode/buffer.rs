use crate::bytecode::op::{Instruction, Opcode};

/// Growable instruction sequence for one scope.
#[derive(Debug, Default, Clone)]
pub struct InstructionBuffer {
    code: Vec<Instruction>,
}

impl InstructionBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append and return the index of the new instruction.
    pub fn push(&mut self, ins: Instruction) -> usize {
        self.code.push(ins);
        self.code.len() - 1
    }

    /// Index the next instruction will get.
    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<Instruction> {
        self.code.get(index).copied()
    }

    pub fn last(&self) -> Option<Instruction> {
        self.code.last().copied()
    }

    /// Opcode of the last instruction, for one-instruction lookback.
    pub fn last_opcode(&self) -> Option<Opcode> {
        self.last().and_then(Instruction::opcode)
    }

    /// Overwrite the instruction at `index`. Returns false when out of range.
    pub fn patch(&mut self, index: usize, ins: Instruction) -> bool {
        match self.code.get_mut(index) {
            Some(slot) => {
                *slot = ins;
                true
            }
            None => false,
        }
    }

    /// Remove the instruction at `index`, shifting later ones down.
    pub fn remove(&mut self, index: usize) -> Option<Instruction> {
        (index < self.code.len()).then(|| self.code.remove(index))
    }

    pub fn truncate(&mut self, len: usize) {
        self.code.truncate(len);
    }

    pub fn as_slice(&self) -> &[Instruction] {
        &self.code
    }

    /// Final, exactly-sized instruction array.
    pub fn into_boxed(mut self) -> Vec<Instruction> {
        self.code.shrink_to_fit();
        self.code
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ins(op: Opcode) -> Instruction {
        Instruction::simple(op)
    }

    #[test]
    fn test_push_returns_index() {
        let mut buf = InstructionBuffer::new();
        assert_eq!(buf.push(ins(Opcode::PushNil)), 0);
        assert_eq!(buf.push(ins(Opcode::Pop)), 1);
        assert_eq!(buf.len(), 2);
        assert_eq!(buf.last_opcode(), Some(Opcode::Pop));
    }

    #[test]
    fn test_patch_in_place() {
        let mut buf = InstructionBuffer::new();
        buf.push(ins(Opcode::Nop));
        let jump = Instruction::with_signed(Opcode::Jump, 3).unwrap();
        assert!(buf.patch(0, jump));
        assert_eq!(buf.get(0), Some(jump));
        assert!(!buf.patch(5, jump));
    }

    #[test]
    fn test_remove_and_truncate() {
        let mut buf = InstructionBuffer::new();
        buf.push(ins(Opcode::PushTrue));
        buf.push(ins(Opcode::Dup));
        buf.push(ins(Opcode::Pop));

        assert_eq!(buf.remove(1), Some(ins(Opcode::Dup)));
        assert_eq!(buf.as_slice(), &[ins(Opcode::PushTrue), ins(Opcode::Pop)]);
        assert_eq!(buf.remove(9), None);

        buf.truncate(1);
        assert_eq!(buf.into_boxed().len(), 1);
    }
}
