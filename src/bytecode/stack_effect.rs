use crate::bytecode::op::{Instruction, Opcode};

/// Returns (pops, pushes) for an instruction on its fall-through path, or
/// `None` for an opcode byte no opcode uses.
///
/// Operand-dependent effects (calls, constructors) are computed from the
/// operand.
pub fn effect(ins: Instruction) -> Option<(u32, u32)> {
    use Opcode::*;
    let op = ins.opcode()?;
    let n = ins.unsigned();
    Some(match op {
        Nop | Line => (0, 0),

        Pop => (1, 0),
        Dup => (1, 2),

        PushNil | PushTrue | PushFalse | PushThis | LoadConst => (0, 1),

        LoadLocal | LoadOuter | LoadGlobal => (0, 1),
        StoreLocal | StoreOuter | StoreGlobal => (1, 0),

        GetMember => (1, 1),
        SetMember => (2, 1),
        GetIndex => (2, 1),
        SetIndex => (3, 1),
        GetMethod => (1, 2),
        DefineMember => (1, 0),

        NewArray => (n, 1),
        NewMap => (2 * n, 1),

        Add | Sub | Mul | Div | Mod | Pow | Concat => (2, 1),
        Eq | Ne | Lt | Le | Gt | Ge => (2, 1),
        BitAnd | BitOr | BitXor | Shl | Shr => (2, 1),
        Neg | Not | BitNot => (1, 1),

        // =================================================================
        // Jumps: effect on the fall-through path
        // =================================================================
        Jump => (0, 0),
        JumpIfFalse | JumpIfTrue => (1, 0),
        JumpIfFalseOrPop | JumpIfTrueOrPop => (1, 0),

        Iter => (1, 1),
        ForIter => (1, 1),

        // callee (and receiver) plus arguments -- result
        Call | TailCall => (n + 1, 1),
        CallMethod => (n + 2, 1),
        CallNamed => {
            let (positional, named) = ins.pair();
            (1 + positional + 2 * named, 1)
        }
        Spread => (1, 1),
        Return => (1, 0),
        Yield => (1, 1),

        Throw => (1, 0),
        TryFinally | TryCatch | EndTry | EndFinally => (0, 0),

        Closure | Namespace => (0, 1),
        Class => (1, 1),
        CaptureLocal | CaptureOuter => (0, 0),

        HasArg => (0, 1),
        ParamEnd => (0, 0),
    })
}

/// Net change in stack height.
pub fn net(ins: Instruction) -> i64 {
    match effect(ins) {
        Some((pops, pushes)) => pushes as i64 - pops as i64,
        None => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u(op: Opcode, n: u32) -> Instruction {
        Instruction::with_unsigned(op, n).unwrap()
    }

    #[test]
    fn test_simple_effects() {
        assert_eq!(effect(Instruction::simple(Opcode::Add)), Some((2, 1)));
        assert_eq!(effect(Instruction::simple(Opcode::Dup)), Some((1, 2)));
        assert_eq!(effect(u(Opcode::StoreLocal, 3)), Some((1, 0)));
    }

    #[test]
    fn test_operand_dependent_effects() {
        assert_eq!(effect(u(Opcode::Call, 3)), Some((4, 1)));
        assert_eq!(effect(u(Opcode::CallMethod, 1)), Some((3, 1)));
        assert_eq!(effect(u(Opcode::NewArray, 5)), Some((5, 1)));
        assert_eq!(effect(u(Opcode::NewMap, 2)), Some((4, 1)));

        let named = Instruction::with_pair(Opcode::CallNamed, 2, 1).unwrap();
        assert_eq!(effect(named), Some((5, 1)));
    }

    #[test]
    fn test_net() {
        assert_eq!(net(u(Opcode::LoadConst, 0)), 1);
        assert_eq!(net(u(Opcode::Call, 2)), -2);
        assert_eq!(net(Instruction::with_signed(Opcode::Jump, 4).unwrap()), 0);
    }

    #[test]
    fn test_unknown_opcode_has_no_effect() {
        assert_eq!(effect(Instruction::from_raw(0xff)), None);
        assert_eq!(net(Instruction::from_raw(0xff)), 0);
    }
}
