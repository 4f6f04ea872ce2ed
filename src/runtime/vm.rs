use std::collections::{BTreeMap, HashMap};

use crate::bytecode::instr::{Argument, BytecodeBody, BytecodeLine, InstructionKind, Label};
use crate::lang::value::Value;
use crate::runtime::runtime_error::InterpreterError;
use crate::runtime::stack::Stack;

/// Execution limits.
#[derive(Debug, Clone, Copy)]
pub struct VmConfig {
    pub stack_limit: usize,
    pub max_call_depth: usize,
    pub max_steps: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            stack_limit: 65_536,
            max_call_depth: 1_024,
            max_steps: 10_000_000,
        }
    }
}

/// Stack machine executing a compiled bytecode body.
///
/// Registers are not plain cells: each register id holds a stack of
/// `(call depth, value)` entries, so a recursive function gets a fresh
/// slot per public invocation and `register_clear` unwinds one entry.
pub struct BytecodeInterpreter {
    bytecode: BytecodeBody,
    config: VmConfig,

    stack: Stack<Value>,
    registers: HashMap<usize, Vec<(usize, Value)>>,
    invoke_stack: Stack<usize>,
    call_depth: usize,

    /// Label to program counter.
    label_map: HashMap<Label, usize>,
    /// Function id to (entry pc, public). Private cleanup routines do not
    /// count towards the call depth.
    entry_map: HashMap<usize, (usize, bool)>,
    /// Function id to the pc of its end marker.
    end_map: HashMap<usize, usize>,

    pc_trace: Vec<usize>,
}

impl BytecodeInterpreter {
    pub fn new(bytecode: BytecodeBody) -> Result<Self, InterpreterError> {
        Self::with_config(bytecode, VmConfig::default())
    }

    pub fn with_config(bytecode: BytecodeBody, config: VmConfig) -> Result<Self, InterpreterError> {
        let mut label_map = HashMap::new();
        let mut entry_map = HashMap::new();
        let mut end_map = HashMap::new();

        let mut open_headers: Vec<usize> = Vec::new();

        for (pc, line) in bytecode.iter().enumerate() {
            match line {
                BytecodeLine::Instruction(instruction) => {
                    label_map.insert(instruction.label, pc);
                }
                BytecodeLine::FunctionHeader { id, .. } | BytecodeLine::StructHeader { id, .. } => {
                    entry_map.insert(*id, (pc + 1, true));
                    open_headers.push(*id);
                }
                BytecodeLine::PrivateFunctionHeader { id, .. } => {
                    entry_map.insert(*id, (pc + 1, false));
                    open_headers.push(*id);
                }
                BytecodeLine::End | BytecodeLine::PrivateEnd => {
                    let id = open_headers.pop().ok_or_else(|| {
                        InterpreterError::unexpected_argument("end marker without a header")
                    })?;
                    end_map.insert(id, pc);
                }
            }
        }

        Ok(BytecodeInterpreter {
            bytecode,
            stack: Stack::new(config.stack_limit),
            registers: HashMap::new(),
            invoke_stack: Stack::new(config.stack_limit),
            call_depth: 0,
            label_map,
            entry_map,
            end_map,
            pc_trace: Vec::new(),
            config,
        })
    }

    /// Run the program to completion.
    pub fn interpret(&mut self) -> Result<(), InterpreterError> {
        let mut pc = 0;
        let mut steps = 0usize;

        while pc < self.bytecode.len() {
            steps += 1;
            if steps > self.config.max_steps {
                return Err(InterpreterError::StepLimitReached {
                    limit: self.config.max_steps,
                });
            }

            self.pc_trace.push(pc);
            pc = self.execute_line(pc)?;
        }

        Ok(())
    }

    /// Current value of a register, if any.
    pub fn register_value(&self, register: usize) -> Option<&Value> {
        self.registers
            .get(&register)
            .and_then(|entries| entries.last())
            .map(|(_, value)| value)
    }

    pub fn stack(&self) -> &[Value] {
        self.stack.as_slice()
    }

    pub fn pc_trace(&self) -> &[usize] {
        &self.pc_trace
    }

    // ============================================================
    // Dispatch
    // ============================================================

    fn execute_line(&mut self, pc: usize) -> Result<usize, InterpreterError> {
        match &self.bytecode[pc] {
            // A header reached in straight-line execution skips its region.
            BytecodeLine::FunctionHeader { id, .. }
            | BytecodeLine::StructHeader { id, .. }
            | BytecodeLine::PrivateFunctionHeader { id, .. } => {
                let end = self.end_map.get(id).copied().ok_or_else(|| {
                    InterpreterError::unexpected_argument("header without an end marker")
                })?;
                Ok(end + 1)
            }

            BytecodeLine::End | BytecodeLine::PrivateEnd => self.invoke_stack.pop(),

            BytecodeLine::Instruction(instruction) => {
                let kind = instruction.kind;
                let arguments = instruction.arguments.clone();
                self.execute_instruction(pc, kind, &arguments)
            }
        }
    }

    fn execute_instruction(
        &mut self,
        pc: usize,
        kind: InstructionKind,
        arguments: &[Argument],
    ) -> Result<usize, InterpreterError> {
        match kind {
            InstructionKind::PushConst => {
                let value = match arguments.first() {
                    Some(Argument::Value(value)) => *value,
                    _ => {
                        return Err(InterpreterError::unexpected_argument(
                            "push_const expects a literal",
                        ));
                    }
                };
                self.stack.push(Value::Number(value))?;
                Ok(pc + 1)
            }

            InstructionKind::Add => self.binary_number_op(pc, |lhs, rhs| lhs + rhs),
            InstructionKind::Sub => self.binary_number_op(pc, |lhs, rhs| lhs - rhs),
            InstructionKind::Mul => self.binary_number_op(pc, |lhs, rhs| lhs * rhs),
            InstructionKind::Div => self.binary_number_op(pc, |lhs, rhs| lhs / rhs),
            InstructionKind::Pow => self.binary_number_op(pc, f64::powf),

            InstructionKind::CmpLt => {
                self.binary_number_op(pc, |lhs, rhs| if lhs < rhs { 1.0 } else { 0.0 })
            }
            InstructionKind::CmpLe => {
                self.binary_number_op(pc, |lhs, rhs| if lhs <= rhs { 1.0 } else { 0.0 })
            }

            InstructionKind::And => self.binary_number_op(pc, |lhs, rhs| {
                if lhs == 1.0 && rhs == 1.0 { 1.0 } else { 0.0 }
            }),
            InstructionKind::Or => self.binary_number_op(pc, |lhs, rhs| {
                if lhs == 1.0 || rhs == 1.0 { 1.0 } else { 0.0 }
            }),

            InstructionKind::Not => {
                let value = self.pop_number()?;
                self.stack
                    .push(Value::Number(if value == 1.0 { 0.0 } else { 1.0 }))?;
                Ok(pc + 1)
            }

            // Equality compares whole values, structs included.
            InstructionKind::Eq => {
                let rhs = self.stack.pop()?;
                let lhs = self.stack.pop()?;
                self.stack
                    .push(Value::Number(if lhs == rhs { 1.0 } else { 0.0 }))?;
                Ok(pc + 1)
            }
            InstructionKind::Neq => {
                let rhs = self.stack.pop()?;
                let lhs = self.stack.pop()?;
                self.stack
                    .push(Value::Number(if lhs != rhs { 1.0 } else { 0.0 }))?;
                Ok(pc + 1)
            }

            InstructionKind::Goto => {
                let label = Self::index_argument(arguments)?;
                self.pc_for_label(label)
            }

            InstructionKind::IfTrue => {
                let label = Self::index_argument(arguments)?;
                if self.pop_number()? == 1.0 {
                    self.pc_for_label(label)
                } else {
                    Ok(pc + 1)
                }
            }

            InstructionKind::IfFalse => {
                let label = Self::index_argument(arguments)?;
                if self.pop_number()? == 0.0 {
                    self.pc_for_label(label)
                } else {
                    Ok(pc + 1)
                }
            }

            InstructionKind::SkipPast => {
                let label = Self::index_argument(arguments)?;
                Ok(self.pc_for_label(label)? + 1)
            }

            // A store that re-executes in the same activation (a loop body
            // declaring a local each iteration) overwrites its entry; only
            // a deeper call pushes a new one.
            InstructionKind::RegisterStore => {
                let register = Self::index_argument(arguments)?;
                let value = self.stack.pop()?;
                let entries = self.registers.entry(register).or_default();
                match entries.last_mut() {
                    Some(entry) if entry.0 == self.call_depth => entry.1 = value,
                    _ => entries.push((self.call_depth, value)),
                }
                Ok(pc + 1)
            }

            InstructionKind::RegisterUpdate => {
                let register = Self::index_argument(arguments)?;
                let value = self.stack.pop()?;
                let entry = self
                    .registers
                    .get_mut(&register)
                    .and_then(|entries| entries.last_mut())
                    .ok_or(InterpreterError::InvalidRegister { register })?;
                entry.1 = value;
                Ok(pc + 1)
            }

            // Clearing an empty register is a no-op; cleanup routines may
            // run for branches that never stored.
            InstructionKind::RegisterClear => {
                let register = Self::index_argument(arguments)?;
                if let Some(entries) = self.registers.get_mut(&register) {
                    entries.pop();
                }
                Ok(pc + 1)
            }

            InstructionKind::RegisterLoad => {
                let register = Self::index_argument(arguments)?;
                let value = self
                    .register_value(register)
                    .cloned()
                    .ok_or(InterpreterError::InvalidRegister { register })?;
                self.stack.push(value)?;
                Ok(pc + 1)
            }

            InstructionKind::InvokeFunc => {
                let id = Self::index_argument(arguments)?;
                let (entry, public) = self.entry_map.get(&id).copied().ok_or_else(|| {
                    InterpreterError::unexpected_argument("invoke of an unknown function id")
                })?;

                self.invoke_stack.push(pc + 1)?;

                if public {
                    self.call_depth += 1;
                    if self.call_depth > self.config.max_call_depth {
                        return Err(InterpreterError::CallDepthExceeded {
                            limit: self.config.max_call_depth,
                        });
                    }
                }

                Ok(entry)
            }

            InstructionKind::ExitFunc => {
                let target = self.invoke_stack.pop()?;
                self.call_depth = self.call_depth.saturating_sub(1);
                Ok(target)
            }

            InstructionKind::Pop => {
                self.stack.pop()?;
                Ok(pc + 1)
            }

            InstructionKind::StructInit => {
                self.stack.push(Value::Struct(BTreeMap::new()))?;
                Ok(pc + 1)
            }

            InstructionKind::StructSet => {
                let member = Self::index_argument(arguments)?;
                let Value::Struct(mut members) = self.stack.pop()? else {
                    return Err(InterpreterError::unexpected_argument(
                        "struct_set on a non-struct value",
                    ));
                };
                let value = self.stack.pop()?;
                members.insert(member, value);
                self.stack.push(Value::Struct(members))?;
                Ok(pc + 1)
            }

            InstructionKind::StructGet => {
                let member = Self::index_argument(arguments)?;
                let Value::Struct(members) = self.stack.pop()? else {
                    return Err(InterpreterError::unexpected_argument(
                        "struct_get on a non-struct value",
                    ));
                };
                let value = members.get(&member).cloned().ok_or_else(|| {
                    InterpreterError::unexpected_argument("struct_get of a missing member")
                })?;
                self.stack.push(value)?;
                Ok(pc + 1)
            }

            InstructionKind::StructUpdate => {
                let mut key_path = Vec::with_capacity(arguments.len());
                for argument in arguments {
                    match argument {
                        Argument::Index(index) => key_path.push(*index),
                        Argument::Value(_) => {
                            return Err(InterpreterError::unexpected_argument(
                                "struct_update expects member ids",
                            ));
                        }
                    }
                }

                let aggregate = self.stack.pop()?;
                let value = self.stack.pop()?;
                let updated = Self::updated_struct(aggregate, &key_path, value)?;
                self.stack.push(updated)?;
                Ok(pc + 1)
            }
        }
    }

    // ============================================================
    // Helpers
    // ============================================================

    fn binary_number_op<F>(&mut self, pc: usize, op: F) -> Result<usize, InterpreterError>
    where
        F: FnOnce(f64, f64) -> f64,
    {
        let rhs = self.pop_number()?;
        let lhs = self.pop_number()?;
        self.stack.push(Value::Number(op(lhs, rhs)))?;
        Ok(pc + 1)
    }

    fn pop_number(&mut self) -> Result<f64, InterpreterError> {
        match self.stack.pop()? {
            Value::Number(number) => Ok(number),
            Value::Struct(_) => Err(InterpreterError::unexpected_argument(
                "expected a number on the stack",
            )),
        }
    }

    fn index_argument(arguments: &[Argument]) -> Result<usize, InterpreterError> {
        match arguments.first() {
            Some(Argument::Index(index)) => Ok(*index),
            _ => Err(InterpreterError::unexpected_argument(
                "expected an index argument",
            )),
        }
    }

    /// Resolve a jump label.
    ///
    /// The compiler may emit a jump to a label that was never attached to
    /// an instruction, such as a loop exit at the very end of a region.
    /// The jump then falls back to the caller, or halts at the top level.
    fn pc_for_label(&mut self, label: Label) -> Result<usize, InterpreterError> {
        if let Some(&pc) = self.label_map.get(&label) {
            return Ok(pc);
        }

        match self.invoke_stack.pop() {
            Ok(pc) => {
                self.call_depth = self.call_depth.saturating_sub(1);
                Ok(pc)
            }
            Err(_) => Ok(self.bytecode.len()),
        }
    }

    /// Copy-on-write update of a nested member. The key path is consumed
    /// from the back; sibling members are preserved.
    fn updated_struct(
        current: Value,
        key_path: &[usize],
        value: Value,
    ) -> Result<Value, InterpreterError> {
        let Some((&key, rest)) = key_path.split_last() else {
            return Ok(value);
        };

        let Value::Struct(mut members) = current else {
            return Err(InterpreterError::unexpected_argument(
                "struct_update on a non-struct value",
            ));
        };

        let inner = members.remove(&key).ok_or_else(|| {
            InterpreterError::unexpected_argument("struct_update of a missing member")
        })?;
        let updated = Self::updated_struct(inner, rest, value)?;
        members.insert(key, updated);

        Ok(Value::Struct(members))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::instr::Instruction;

    fn instr(label: usize, kind: InstructionKind, arguments: Vec<Argument>) -> BytecodeLine {
        BytecodeLine::Instruction(Instruction::new(label, kind, arguments))
    }

    fn push(label: usize, value: f64) -> BytecodeLine {
        instr(label, InstructionKind::PushConst, vec![Argument::Value(value)])
    }

    fn run(bytecode: BytecodeBody) -> BytecodeInterpreter {
        let mut interpreter = BytecodeInterpreter::new(bytecode).unwrap();
        interpreter.interpret().unwrap();
        interpreter
    }

    #[test]
    fn test_arithmetic() {
        let interpreter = run(vec![
            push(1, 2.0),
            push(2, 3.0),
            instr(3, InstructionKind::Add, vec![]),
            push(4, 4.0),
            instr(5, InstructionKind::Sub, vec![]),
        ]);

        assert_eq!(interpreter.stack(), &[Value::Number(1.0)]);
    }

    #[test]
    fn test_pow_and_div() {
        let interpreter = run(vec![
            push(1, 2.0),
            push(2, 10.0),
            instr(3, InstructionKind::Pow, vec![]),
            push(4, 4.0),
            instr(5, InstructionKind::Div, vec![]),
        ]);

        assert_eq!(interpreter.stack(), &[Value::Number(256.0)]);
    }

    #[test]
    fn test_pop_empty_stack_fails() {
        let mut interpreter =
            BytecodeInterpreter::new(vec![instr(1, InstructionKind::Add, vec![])]).unwrap();

        assert_eq!(
            interpreter.interpret(),
            Err(InterpreterError::IllegalStackOperation)
        );
    }

    #[test]
    fn test_registers() {
        let interpreter = run(vec![
            push(1, 5.0),
            instr(2, InstructionKind::RegisterStore, vec![Argument::Index(1)]),
            push(3, 7.0),
            instr(4, InstructionKind::RegisterUpdate, vec![Argument::Index(1)]),
            instr(5, InstructionKind::RegisterLoad, vec![Argument::Index(1)]),
        ]);

        assert_eq!(interpreter.stack(), &[Value::Number(7.0)]);
        assert_eq!(interpreter.register_value(1), Some(&Value::Number(7.0)));
    }

    #[test]
    fn test_update_of_unset_register_fails() {
        let mut interpreter = BytecodeInterpreter::new(vec![
            push(1, 5.0),
            instr(2, InstructionKind::RegisterUpdate, vec![Argument::Index(9)]),
        ])
        .unwrap();

        assert_eq!(
            interpreter.interpret(),
            Err(InterpreterError::InvalidRegister { register: 9 })
        );
    }

    #[test]
    fn test_clear_of_unset_register_is_noop() {
        let interpreter = run(vec![instr(
            1,
            InstructionKind::RegisterClear,
            vec![Argument::Index(9)],
        )]);

        assert_eq!(interpreter.register_value(9), None);
    }

    #[test]
    fn test_goto_unknown_label_halts_at_top_level() {
        let interpreter = run(vec![
            push(1, 1.0),
            instr(2, InstructionKind::Goto, vec![Argument::Index(99)]),
            push(3, 2.0),
        ]);

        assert_eq!(interpreter.stack(), &[Value::Number(1.0)]);
        // the jump never revisits the skipped instruction
        assert_eq!(interpreter.pc_trace(), &[0, 1]);
    }

    #[test]
    fn test_if_false_branches() {
        let interpreter = run(vec![
            push(1, 0.0),
            instr(2, InstructionKind::IfFalse, vec![Argument::Index(4)]),
            push(3, 10.0),
            push(4, 20.0),
        ]);

        assert_eq!(interpreter.stack(), &[Value::Number(20.0)]);
    }

    // only exactly 0.0 counts as false; any other number falls through
    #[test]
    fn test_if_false_non_boolean_number_falls_through() {
        let interpreter = run(vec![
            push(1, 0.5),
            instr(2, InstructionKind::IfFalse, vec![Argument::Index(4)]),
            push(3, 10.0),
            push(4, 20.0),
        ]);

        assert_eq!(
            interpreter.stack(),
            &[Value::Number(10.0), Value::Number(20.0)]
        );
    }

    #[test]
    fn test_store_at_same_depth_overwrites() {
        let interpreter = run(vec![
            push(1, 5.0),
            instr(2, InstructionKind::RegisterStore, vec![Argument::Index(1)]),
            push(3, 7.0),
            instr(4, InstructionKind::RegisterStore, vec![Argument::Index(1)]),
            instr(5, InstructionKind::RegisterClear, vec![Argument::Index(1)]),
        ]);

        // one clear empties the register even after repeated stores
        assert_eq!(interpreter.register_value(1), None);
    }

    #[test]
    fn test_invoke_and_exit() {
        let interpreter = run(vec![
            BytecodeLine::FunctionHeader {
                id: 1,
                name: "f".to_string(),
                arguments: vec![],
            },
            push(10, 42.0),
            instr(11, InstructionKind::ExitFunc, vec![]),
            BytecodeLine::End,
            instr(20, InstructionKind::InvokeFunc, vec![Argument::Index(1)]),
        ]);

        assert_eq!(interpreter.stack(), &[Value::Number(42.0)]);
    }

    #[test]
    fn test_header_skipped_in_straight_line_execution() {
        let interpreter = run(vec![
            BytecodeLine::FunctionHeader {
                id: 1,
                name: "f".to_string(),
                arguments: vec![],
            },
            push(10, 42.0),
            BytecodeLine::End,
            push(20, 1.0),
        ]);

        assert_eq!(interpreter.stack(), &[Value::Number(1.0)]);
    }

    #[test]
    fn test_runaway_recursion_hits_call_depth_limit() {
        let bytecode = vec![
            BytecodeLine::FunctionHeader {
                id: 1,
                name: "f".to_string(),
                arguments: vec![],
            },
            instr(10, InstructionKind::InvokeFunc, vec![Argument::Index(1)]),
            BytecodeLine::End,
            instr(20, InstructionKind::InvokeFunc, vec![Argument::Index(1)]),
        ];

        let config = VmConfig {
            max_call_depth: 16,
            ..VmConfig::default()
        };
        let mut interpreter = BytecodeInterpreter::with_config(bytecode, config).unwrap();

        assert_eq!(
            interpreter.interpret(),
            Err(InterpreterError::CallDepthExceeded { limit: 16 })
        );
    }

    #[test]
    fn test_infinite_loop_hits_step_limit() {
        let bytecode = vec![instr(1, InstructionKind::Goto, vec![Argument::Index(1)])];

        let config = VmConfig {
            max_steps: 100,
            ..VmConfig::default()
        };
        let mut interpreter = BytecodeInterpreter::with_config(bytecode, config).unwrap();

        assert_eq!(
            interpreter.interpret(),
            Err(InterpreterError::StepLimitReached { limit: 100 })
        );
    }

    #[test]
    fn test_struct_set_and_get() {
        let interpreter = run(vec![
            push(1, 7.0),
            instr(2, InstructionKind::StructInit, vec![]),
            instr(3, InstructionKind::StructSet, vec![Argument::Index(1)]),
            instr(4, InstructionKind::StructGet, vec![Argument::Index(1)]),
        ]);

        assert_eq!(interpreter.stack(), &[Value::Number(7.0)]);
    }

    #[test]
    fn test_struct_update_preserves_siblings() {
        // build { 1: 1.0, 2: 2.0 } in register 1, then set member 2 to 9.0
        let interpreter = run(vec![
            push(1, 1.0),
            push(2, 2.0),
            instr(3, InstructionKind::StructInit, vec![]),
            instr(4, InstructionKind::StructSet, vec![Argument::Index(2)]),
            instr(5, InstructionKind::StructSet, vec![Argument::Index(1)]),
            instr(6, InstructionKind::RegisterStore, vec![Argument::Index(1)]),
            push(7, 9.0),
            instr(8, InstructionKind::RegisterLoad, vec![Argument::Index(1)]),
            instr(9, InstructionKind::StructUpdate, vec![Argument::Index(2)]),
            instr(10, InstructionKind::RegisterUpdate, vec![Argument::Index(1)]),
        ]);

        let mut expected = BTreeMap::new();
        expected.insert(1, Value::Number(1.0));
        expected.insert(2, Value::Number(9.0));
        assert_eq!(
            interpreter.register_value(1),
            Some(&Value::Struct(expected))
        );
    }

    #[test]
    fn test_struct_update_nested_path() {
        // inner = { 2: 5.0 }, outer = { 1: inner }; outer.1.2 = 8.0
        let interpreter = run(vec![
            push(1, 5.0),
            instr(2, InstructionKind::StructInit, vec![]),
            instr(3, InstructionKind::StructSet, vec![Argument::Index(2)]),
            instr(4, InstructionKind::StructInit, vec![]),
            instr(5, InstructionKind::StructSet, vec![Argument::Index(1)]),
            instr(6, InstructionKind::RegisterStore, vec![Argument::Index(1)]),
            push(7, 8.0),
            instr(8, InstructionKind::RegisterLoad, vec![Argument::Index(1)]),
            // key path is leaf first, the walk descends from the back
            instr(
                9,
                InstructionKind::StructUpdate,
                vec![Argument::Index(2), Argument::Index(1)],
            ),
            instr(10, InstructionKind::RegisterUpdate, vec![Argument::Index(1)]),
        ]);

        let mut inner = BTreeMap::new();
        inner.insert(2, Value::Number(8.0));
        let mut outer = BTreeMap::new();
        outer.insert(1, Value::Struct(inner));
        assert_eq!(interpreter.register_value(1), Some(&Value::Struct(outer)));
    }

    #[test]
    fn test_boolean_ops() {
        let interpreter = run(vec![
            push(1, 1.0),
            push(2, 0.0),
            instr(3, InstructionKind::Or, vec![]),
            instr(4, InstructionKind::Not, vec![]),
        ]);

        assert_eq!(interpreter.stack(), &[Value::Number(0.0)]);
    }

    #[test]
    fn test_struct_set_order() {
        // struct_set wants the aggregate on top and the value beneath it
        let mut interpreter = BytecodeInterpreter::new(vec![
            instr(1, InstructionKind::StructInit, vec![]),
            push(2, 7.0),
            instr(3, InstructionKind::StructSet, vec![Argument::Index(1)]),
        ])
        .unwrap();

        assert!(matches!(
            interpreter.interpret(),
            Err(InterpreterError::UnexpectedArgument { .. })
        ));
    }
}
