use std::collections::{BTreeSet, HashMap};
use std::fmt::Write;

use crate::bytecode::ir::CodeObject;
use crate::bytecode::op::{Instruction, OperandKind, Opcode};
use crate::lang::value::Value;

/// Print disassembly of a code object tree
pub fn print_code(code: &CodeObject) {
    print!("{}", disassemble_to_string(code));
}

/// Return disassembly of `code` and all nested code objects as a String
pub fn disassemble_to_string(code: &CodeObject) -> String {
    let mut output = String::new();
    write_code_object(&mut output, "main", code, 0);
    output
}

fn write_code_object(out: &mut String, name: &str, code: &CodeObject, indent: usize) {
    let prefix = "  ".repeat(indent);

    let _ = writeln!(out, "{}════════════════════════════════════════", prefix);
    let _ = writeln!(out, "{} {}", prefix, name);
    let _ = writeln!(
        out,
        "{} {} instructions, {} constants, args {}, locals {}, outers {}, max stack {}",
        prefix,
        code.code.len(),
        code.constants.len(),
        code.arg_count,
        code.local_count,
        code.outer_count,
        code.max_stack
    );
    let _ = writeln!(out, "{}════════════════════════════════════════", prefix);

    let jump_targets = collect_jump_targets(&code.code);
    for (ip, ins) in code.code.iter().enumerate() {
        let is_target = jump_targets.contains(&ip);
        if is_target {
            let _ = writeln!(out, "{}      ┌──────────────────────────────────", prefix);
        }
        let marker = if is_target { "► " } else { "  " };
        let _ = writeln!(
            out,
            "{}{:04} {}{}",
            prefix,
            ip,
            marker,
            format_instruction(code, *ins, ip)
        );
    }
    out.push('\n');

    for (i, child) in code.children.iter().enumerate() {
        write_code_object(out, &format!("{}/{}", name, i), child, indent + 1);
    }
}

fn collect_jump_targets(code: &[Instruction]) -> BTreeSet<usize> {
    code.iter()
        .enumerate()
        .filter_map(|(ip, ins)| ins.jump_target(ip))
        .collect()
}

/// One instruction with its operand decoded against `code`'s tables.
pub fn format_instruction(code: &CodeObject, ins: Instruction, ip: usize) -> String {
    let Some(op) = ins.opcode() else {
        return format!("???         {:#010x}", ins.raw());
    };
    let name = op.mnemonic();

    match op.operand_kind() {
        OperandKind::None => name.to_string(),

        OperandKind::Signed => {
            let offset = ins.signed();
            let direction = if offset < 0 { "↑" } else { "↓" };
            match ins.jump_target(ip) {
                Some(target) => format!("{:<12}{:+} {} (→ {:04})", name, offset, direction, target),
                None => format!("{:<12}{:+} {} (→ ????)", name, offset, direction),
            }
        }

        OperandKind::Pair => {
            let (a, b) = ins.pair();
            match op {
                Opcode::CallNamed => format!("{:<12}{} {}    ; {} positional, {} named", name, a, b, a, b),
                _ => format!("{:<12}{} {}", name, a, b),
            }
        }

        OperandKind::Unsigned => {
            let n = ins.unsigned();
            let comment = operand_comment(code, op, n, ip);
            match comment {
                Some(comment) => format!("{:<12}{:<6}; {}", name, n, comment),
                None => format!("{:<12}{}", name, n),
            }
        }
    }
}

fn operand_comment(code: &CodeObject, op: Opcode, n: u32, ip: usize) -> Option<String> {
    match op {
        Opcode::LoadConst
        | Opcode::LoadGlobal
        | Opcode::StoreGlobal
        | Opcode::GetMember
        | Opcode::SetMember
        | Opcode::GetMethod
        | Opcode::DefineMember => code
            .constants
            .get(n as usize)
            .map(format_value)
            .or_else(|| Some("<bad constant>".to_string())),

        Opcode::LoadLocal | Opcode::StoreLocal | Opcode::HasArg | Opcode::ParamEnd => {
            local_name(code, n, ip).map(str::to_string)
        }

        Opcode::CaptureLocal => Some("from local".to_string()),
        Opcode::CaptureOuter => Some("from outer".to_string()),

        Opcode::Closure | Opcode::Class | Opcode::Namespace => code
            .children
            .get(n as usize)
            .map(|child| {
                format!(
                    "{} instructions, {} outers",
                    child.code.len(),
                    child.outer_count
                )
            }),

        _ => None,
    }
}

/// Name of a local slot: argument names first, then the debug table.
fn local_name(code: &CodeObject, slot: u32, ip: usize) -> Option<&str> {
    if let Some(Some(name)) = code.arg_names.get(slot as usize) {
        return Some(name);
    }
    code.debug.as_ref()?.name_for_slot(slot, ip)
}

fn format_value(value: &Value) -> String {
    match value {
        Value::String(s) => format!("{:?}", s),
        Value::Real(r) => format!("{:?}", r),
        Value::Array(items) if items.is_empty() => "[ ]".to_string(),
        Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(format_value).collect();
            format!("[ {} ]", inner.join(", "))
        }
        Value::Map(entries) if entries.is_empty() => "{ }".to_string(),
        Value::Map(entries) => {
            let inner: Vec<String> = entries
                .iter()
                .map(|(k, v)| format!("{}: {}", format_value(k), format_value(v)))
                .collect();
            format!("{{ {} }}", inner.join(", "))
        }
        other => other.to_string(),
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Print bytecode statistics
pub fn print_stats(code: &CodeObject) {
    print!("{}", stats_to_string(code));
}

pub fn stats_to_string(code: &CodeObject) -> String {
    let mut op_counts: HashMap<&'static str, usize> = HashMap::new();
    let total_ops = count_ops(code, &mut op_counts);

    let mut out = String::new();
    let _ = writeln!(out, "=== BYTECODE STATISTICS ===\n");
    let _ = writeln!(out, "Code objects:     {}", code.tree_size());
    let _ = writeln!(out, "Instructions:     {}", total_ops);
    let _ = writeln!(out);

    let _ = writeln!(out, "Op frequency:");
    let mut counts: Vec<_> = op_counts.into_iter().collect();
    counts.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));

    for (op, count) in counts.iter().take(10) {
        let pct = (*count as f64 / total_ops.max(1) as f64) * 100.0;
        let _ = writeln!(out, "  {:<18} {:>4} ({:>5.1}%)", op, count, pct);
    }
    out
}

/// Count opcodes across the tree; returns the total instruction count.
fn count_ops(code: &CodeObject, counts: &mut HashMap<&'static str, usize>) -> usize {
    for ins in &code.code {
        let name = ins.opcode().map(Opcode::mnemonic).unwrap_or("???");
        *counts.entry(name).or_insert(0) += 1;
    }
    code.code.len()
        + code
            .children
            .iter()
            .map(|child| count_ops(child, counts))
            .sum::<usize>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::compile::Compiler;
    use crate::bytecode::ir::{DebugSymbol, DebugTable};
    use crate::config::CompilerConfig;
    use crate::lang::build::*;

    fn u(op: Opcode, n: u32) -> Instruction {
        Instruction::with_unsigned(op, n).unwrap()
    }

    #[test]
    fn test_jump_targets_are_marked() {
        let code = CodeObject {
            code: vec![
                Instruction::with_signed(Opcode::Jump, 1).unwrap(),
                Instruction::simple(Opcode::Nop),
                Instruction::simple(Opcode::Return),
            ],
            ..CodeObject::new()
        };
        let output = disassemble_to_string(&code);
        assert!(output.contains("0002 ► RETURN"));
        assert!(output.contains("JUMP        +1 ↓ (→ 0002)"));
    }

    #[test]
    fn test_backward_jump_arrow() {
        let code = CodeObject {
            code: vec![
                Instruction::simple(Opcode::Nop),
                Instruction::with_signed(Opcode::Jump, -2).unwrap(),
            ],
            ..CodeObject::new()
        };
        let text = format_instruction(&code, code.code[1], 1);
        assert_eq!(text, "JUMP        -2 ↑ (→ 0000)");
    }

    #[test]
    fn test_constants_are_shown() {
        let code = CodeObject {
            code: vec![u(Opcode::LoadConst, 0), u(Opcode::LoadGlobal, 1)],
            constants: vec![Value::Real(1.5), Value::String("print".into())],
            ..CodeObject::new()
        };
        assert!(format_instruction(&code, code.code[0], 0).ends_with("; 1.5"));
        assert!(format_instruction(&code, code.code[1], 1).ends_with("; \"print\""));
    }

    #[test]
    fn test_local_names_from_debug_table() {
        let code = CodeObject {
            code: vec![u(Opcode::LoadLocal, 1), u(Opcode::LoadLocal, 0)],
            arg_count: 1,
            arg_names: vec![Some("n".into())],
            debug: Some(DebugTable {
                symbols: vec![
                    DebugSymbol {
                        name: "n".into(),
                        start: 0,
                        end: 2,
                    },
                    DebugSymbol {
                        name: "total".into(),
                        start: 0,
                        end: 2,
                    },
                ],
            }),
            ..CodeObject::new()
        };
        assert!(format_instruction(&code, code.code[0], 0).ends_with("; total"));
        assert!(format_instruction(&code, code.code[1], 1).ends_with("; n"));
    }

    #[test]
    fn test_unknown_opcode() {
        let code = CodeObject::new();
        let text = format_instruction(&code, Instruction::from_raw(0xff), 0);
        assert!(text.starts_with("???"));
    }

    #[test]
    fn test_children_are_listed() {
        let program = vec![fn_decl("f", &["x"], vec![ret(ident("x"))])];
        let code = Compiler::new(CompilerConfig::debug())
            .compile_program(&program)
            .unwrap();

        let output = disassemble_to_string(&code);
        assert!(output.contains(" main\n"));
        assert!(output.contains(" main/0\n"));
        assert!(output.contains("CLOSURE"));
        assert!(output.contains("LOAD_LOCAL  0     ; x"));
    }

    #[test]
    fn test_format_nested_values() {
        let v = Value::Array(vec![Value::Integer(1), Value::String("a".into())]);
        assert_eq!(format_value(&v), "[ 1, \"a\" ]");
        assert_eq!(format_value(&Value::Map(vec![])), "{ }");
    }

    #[test]
    fn test_stats_count_whole_tree() {
        let program = vec![fn_decl("f", &[], vec![]), fn_decl("g", &[], vec![])];
        let code = Compiler::new(CompilerConfig {
            line_markers: false,
            ..CompilerConfig::default()
        })
        .compile_program(&program)
        .unwrap();

        let mut counts = HashMap::new();
        let total = count_ops(&code, &mut counts);
        // main: CLOSURE STORE_GLOBAL x2, PUSH_NIL RETURN; each child: PUSH_NIL RETURN
        assert_eq!(total, 10);
        assert_eq!(counts.get("RETURN"), Some(&3));
        assert!(stats_to_string(&code).contains("Code objects:     3"));
    }
}
