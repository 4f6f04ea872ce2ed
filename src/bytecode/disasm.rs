use crate::bytecode::instr::{Argument, BytecodeBody, BytecodeLine, InstructionKind};
use std::collections::HashMap;

/// Print disassembly of a bytecode program
pub fn print_bc(bytecode: &BytecodeBody) {
    println!("=== BYTECODE PROGRAM ===\n");
    print!("{}", disassemble_to_string(bytecode));
}

/// Return disassembly as a String
///
/// Each line shows the program counter, a marker when the line is a jump
/// target, and the text form of the line. Function and struct regions are
/// indented.
pub fn disassemble_to_string(bytecode: &BytecodeBody) -> String {
    let targets = collect_jump_targets(bytecode);
    let mut output = String::new();
    let mut indent = 0usize;

    for (pc, line) in bytecode.iter().enumerate() {
        if matches!(line, BytecodeLine::End | BytecodeLine::PrivateEnd) {
            indent = indent.saturating_sub(1);
        }

        output.push_str(&format!("{:04} ", pc));

        if targets.contains(&pc) {
            output.push_str("► ");
        } else {
            output.push_str("  ");
        }

        output.push_str(&"  ".repeat(indent));
        output.push_str(&line.to_string());
        output.push('\n');

        if matches!(
            line,
            BytecodeLine::FunctionHeader { .. }
                | BytecodeLine::StructHeader { .. }
                | BytecodeLine::PrivateFunctionHeader { .. }
        ) {
            indent += 1;
        }
    }

    output
}

/// Program counters targeted by a jump, resolved through the label map.
fn collect_jump_targets(bytecode: &BytecodeBody) -> Vec<usize> {
    let mut label_map = HashMap::new();
    for (pc, line) in bytecode.iter().enumerate() {
        if let BytecodeLine::Instruction(instruction) = line {
            label_map.insert(instruction.label, pc);
        }
    }

    let mut targets = Vec::new();

    for line in bytecode {
        let BytecodeLine::Instruction(instruction) = line else {
            continue;
        };

        let jumps = matches!(
            instruction.kind,
            InstructionKind::Goto
                | InstructionKind::IfTrue
                | InstructionKind::IfFalse
                | InstructionKind::SkipPast
        );
        if !jumps {
            continue;
        }

        if let Some(Argument::Index(label)) = instruction.arguments.first() {
            if let Some(&pc) = label_map.get(label) {
                if !targets.contains(&pc) {
                    targets.push(pc);
                }
            }
        }
    }

    targets
}

/// Print bytecode statistics
pub fn print_bc_stats(bytecode: &BytecodeBody) {
    println!("=== BYTECODE STATISTICS ===\n");

    let instructions = bytecode
        .iter()
        .filter(|l| matches!(l, BytecodeLine::Instruction(_)))
        .count();
    let functions = bytecode
        .iter()
        .filter(|l| {
            matches!(
                l,
                BytecodeLine::FunctionHeader { .. } | BytecodeLine::StructHeader { .. }
            )
        })
        .count();

    println!("Lines:        {}", bytecode.len());
    println!("Instructions: {}", instructions);
    println!("Functions:    {}", functions);
    println!();

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for line in bytecode {
        if let BytecodeLine::Instruction(instruction) = line {
            *counts.entry(instruction.kind.command()).or_insert(0) += 1;
        }
    }

    let mut counts: Vec<_> = counts.into_iter().collect();
    counts.sort_by(|a, b| b.1.cmp(&a.1));

    println!("Op frequency:");
    for (command, count) in counts.iter().take(10) {
        let pct = (*count as f64 / instructions as f64) * 100.0;
        println!("  {:<16} {:>4} ({:>5.1}%)", command, count, pct);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::instr::Instruction;

    #[test]
    fn test_jump_targets_are_marked() {
        let bytecode = vec![
            BytecodeLine::Instruction(Instruction::new(
                1,
                InstructionKind::Goto,
                vec![Argument::Index(3)],
            )),
            BytecodeLine::Instruction(Instruction::new(
                2,
                InstructionKind::PushConst,
                vec![Argument::Value(1.0)],
            )),
            BytecodeLine::Instruction(Instruction::new(3, InstructionKind::Pop, vec![])),
        ];

        let output = disassemble_to_string(&bytecode);
        let lines: Vec<&str> = output.lines().collect();

        assert!(lines[2].contains("►"));
        assert!(!lines[1].contains("►"));
    }

    #[test]
    fn test_function_regions_are_indented() {
        let bytecode = vec![
            BytecodeLine::FunctionHeader {
                id: 1,
                name: "f".to_string(),
                arguments: vec![],
            },
            BytecodeLine::Instruction(Instruction::new(1, InstructionKind::ExitFunc, vec![])),
            BytecodeLine::End,
        ];

        let output = disassemble_to_string(&bytecode);
        let lines: Vec<&str> = output.lines().collect();

        assert!(lines[1].contains("  1: exit_func"));
        assert!(lines[2].ends_with("end"));
    }
}
