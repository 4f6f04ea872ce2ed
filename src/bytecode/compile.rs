use std::collections::HashMap;

use crate::bytecode::compile_error::CompileError;
use crate::bytecode::instr::{
    Argument, BytecodeBody, BytecodeLine, Instruction, InstructionKind, Label,
};
use crate::bytecode::scope::{FunctionMapped, ScopeTree};
use crate::lang::node::{FunctionPrototype, Node, StructPrototype};

/// Lowers an AST to a flat bytecode line stream.
///
/// The compiler owns three monotonic counters (labels, registers, function
/// ids) and the scope tree. None of them ever reuse a value, so a single
/// compiler instance can compile several sources into one continuous
/// id space; the runner relies on this to prepend the standard library.
pub struct BytecodeCompiler {
    label_index: usize,
    register_count: usize,
    function_count: usize,

    struct_member_index: usize,
    struct_member_map: HashMap<String, usize>,

    loop_header_stack: Vec<Label>,
    loop_continue_stack: Vec<Label>,
    function_exit_stack: Vec<Label>,

    scopes: ScopeTree,
}

fn line(instruction: Instruction) -> BytecodeLine {
    BytecodeLine::Instruction(instruction)
}

impl BytecodeCompiler {
    pub fn new() -> Self {
        BytecodeCompiler {
            label_index: 0,
            register_count: 0,
            function_count: 0,
            struct_member_index: 0,
            struct_member_map: HashMap::new(),
            loop_header_stack: Vec::new(),
            loop_continue_stack: Vec::new(),
            function_exit_stack: Vec::new(),
            scopes: ScopeTree::new(),
        }
    }

    pub fn compile(&mut self, ast: &[Node]) -> Result<BytecodeBody, CompileError> {
        // Pre-register ids so calls can precede declarations.
        for node in ast {
            self.map_function_ids(node);
            self.map_struct_members(node);
        }

        let mut bytecode = BytecodeBody::new();

        for node in ast {
            bytecode.extend(self.compile_statement(node)?);
        }

        if !self.scopes.is_at_root() {
            return Err(CompileError::UnbalancedScope);
        }

        Ok(bytecode)
    }

    /// Register backing a top-level variable, for inspection after a run.
    pub fn compiled_register(&self, name: &str) -> Option<usize> {
        self.scopes.deep_register(name)
    }

    pub fn struct_member_id(&self, name: &str) -> Option<usize> {
        self.struct_member_map.get(name).copied()
    }

    pub fn struct_member_name(&self, id: usize) -> Option<&str> {
        self.struct_member_map
            .iter()
            .find(|&(_, &v)| v == id)
            .map(|(k, _)| k.as_str())
    }

    // ============================================================
    // Labels
    // ============================================================

    fn next_label(&mut self) -> Label {
        self.label_index += 1;
        self.label_index
    }

    fn peek_next_label(&self) -> Label {
        self.label_index + 1
    }

    // ============================================================
    // Registers and ids
    // ============================================================

    /// Register for a variable name; allocates a fresh one in the current
    /// scope when the name is unbound. The flag is true for a new register.
    fn get_register(&mut self, name: &str) -> (usize, bool) {
        if let Some(register) = self.scopes.deep_register(name) {
            return (register, false);
        }

        let register = self.new_register();
        self.scopes.bind_register(name, register);

        (register, true)
    }

    fn new_internal_register(&mut self) -> usize {
        let register = self.new_register();
        self.scopes.add_internal_register(register);
        register
    }

    fn new_register(&mut self) -> usize {
        self.register_count += 1;
        self.register_count
    }

    fn new_function_id(&mut self) -> usize {
        self.function_count += 1;
        self.function_count
    }

    fn get_function_id(&mut self, prototype: &FunctionPrototype) -> usize {
        if let Some(mapped) = self.scopes.deep_function(&prototype.name) {
            return mapped.id;
        }

        let id = self.new_function_id();
        let exit_id = self.new_function_id();
        self.scopes.bind_function(
            &prototype.name,
            FunctionMapped {
                id,
                exit_id,
                returns: prototype.returns,
            },
        );

        id
    }

    fn get_struct_id(&mut self, prototype: &StructPrototype) -> usize {
        if let Some(mapped) = self.scopes.deep_function(&prototype.name) {
            return mapped.id;
        }

        let id = self.new_function_id();
        let exit_id = self.new_function_id();
        // A struct constructor always returns the aggregate it builds.
        self.scopes.bind_function(
            &prototype.name,
            FunctionMapped {
                id,
                exit_id,
                returns: true,
            },
        );

        id
    }

    // ============================================================
    // Prepasses
    // ============================================================

    fn map_function_ids(&mut self, node: &Node) {
        match node {
            Node::Function { prototype, .. } => {
                self.get_function_id(prototype);
            }
            Node::Struct(prototype) => {
                self.get_struct_id(prototype);
            }
            _ => {}
        }

        for child in node.children() {
            self.map_function_ids(child);
        }
    }

    fn map_struct_members(&mut self, node: &Node) {
        if let Node::Struct(prototype) = node {
            for member in &prototype.members {
                if !self.struct_member_map.contains_key(member) {
                    self.struct_member_index += 1;
                    self.struct_member_map
                        .insert(member.clone(), self.struct_member_index);
                }
            }
        }

        for child in node.children() {
            self.map_struct_members(child);
        }
    }

    fn member_id(&self, name: &str) -> Result<usize, CompileError> {
        self.struct_member_id(name)
            .ok_or_else(|| CompileError::unexpected_command(format!("unknown struct member: {}", name)))
    }

    // ============================================================
    // Statements
    // ============================================================

    fn compile_statement(&mut self, node: &Node) -> Result<BytecodeBody, CompileError> {
        let mut bytecode = self.compile_node(node)?;

        // A call in statement position leaves its result unused.
        if let Node::Call { callee, .. } = node {
            let returns = self
                .scopes
                .deep_function(callee)
                .map(|mapped| mapped.returns)
                .unwrap_or(false);

            if returns {
                let label = self.next_label();
                bytecode.push(line(Instruction::with_comment(
                    label,
                    InstructionKind::Pop,
                    vec![],
                    "unused result",
                )));
            }
        }

        Ok(bytecode)
    }

    fn compile_node(&mut self, node: &Node) -> Result<BytecodeBody, CompileError> {
        match node {
            Node::Number(value) => Ok(vec![line(Instruction::new(
                self.next_label(),
                InstructionKind::PushConst,
                vec![Argument::Value(*value)],
            ))]),

            Node::Boolean(value) => Ok(vec![line(Instruction::new(
                self.next_label(),
                InstructionKind::PushConst,
                vec![Argument::Value(if *value { 1.0 } else { 0.0 })],
            ))]),

            Node::Variable(name) => {
                let (register, _) = self.get_register(name);
                let label = self.next_label();
                Ok(vec![line(Instruction::with_comment(
                    label,
                    InstructionKind::RegisterLoad,
                    vec![Argument::Index(register)],
                    name,
                ))])
            }

            Node::InternalVariable(register) => Ok(vec![line(Instruction::new(
                self.next_label(),
                InstructionKind::RegisterLoad,
                vec![Argument::Index(*register)],
            ))]),

            Node::StructMember { base, member } => {
                let mut bytecode = self.compile_node(base)?;
                let id = self.member_id(member)?;
                let label = self.next_label();
                bytecode.push(line(Instruction::with_comment(
                    label,
                    InstructionKind::StructGet,
                    vec![Argument::Index(id)],
                    member,
                )));
                Ok(bytecode)
            }

            Node::BinaryOp { op, lhs, rhs } => self.compile_binary_op(op, lhs, rhs.as_deref()),

            Node::BooleanOp { op, lhs, rhs } => self.compile_boolean_op(op, lhs, rhs.as_deref()),

            Node::Assignment { target, value } => self.compile_assignment(target, value),

            Node::Body(nodes) => {
                let mut bytecode = BytecodeBody::new();
                for node in nodes {
                    bytecode.extend(self.compile_statement(node)?);
                }
                Ok(bytecode)
            }

            Node::Conditional {
                condition,
                body,
                else_body,
            } => self.compile_conditional(condition, body, else_body.as_deref()),

            Node::While { condition, body } => {
                self.compile_loop(|c| c.compile_while_inner(condition, body))
            }

            Node::RepeatWhile { condition, body } => {
                self.compile_loop(|c| c.compile_repeat_while_inner(condition, body))
            }

            Node::For {
                assignment,
                condition,
                interval,
                body,
            } => self.compile_loop(|c| c.compile_for_inner(assignment, condition, interval, body)),

            Node::DoTimes { amount, body } => {
                self.compile_loop(|c| c.compile_do_times_inner(amount, body))
            }

            Node::Break => {
                let label = self.next_label();
                let break_label = self
                    .loop_header_stack
                    .last()
                    .copied()
                    .ok_or_else(|| CompileError::unexpected_command("break outside loop"))?;
                Ok(vec![line(Instruction::with_comment(
                    label,
                    InstructionKind::Goto,
                    vec![Argument::Index(break_label)],
                    "break",
                ))])
            }

            Node::Continue => {
                let label = self.next_label();
                let continue_label = self
                    .loop_continue_stack
                    .last()
                    .copied()
                    .ok_or_else(|| CompileError::unexpected_command("continue outside loop"))?;
                Ok(vec![line(Instruction::with_comment(
                    label,
                    InstructionKind::Goto,
                    vec![Argument::Index(continue_label)],
                    "continue",
                ))])
            }

            Node::Return(value) => {
                let mut bytecode = match value {
                    Some(value) => self.compile_node(value)?,
                    None => BytecodeBody::new(),
                };

                let label = self.next_label();
                let cleanup_label = self
                    .function_exit_stack
                    .last()
                    .copied()
                    .ok_or_else(|| CompileError::unexpected_command("return outside function"))?;

                bytecode.push(line(Instruction::with_comment(
                    label,
                    InstructionKind::Goto,
                    vec![Argument::Index(cleanup_label)],
                    "return",
                )));
                Ok(bytecode)
            }

            Node::Call { callee, arguments } => self.compile_call(callee, arguments),

            Node::Function { prototype, body } => self.compile_function(prototype, body),

            Node::Struct(prototype) => self.compile_struct(prototype),
        }
    }

    // ============================================================
    // Expressions
    // ============================================================

    fn compile_binary_op(
        &mut self,
        op: &str,
        lhs: &Node,
        rhs: Option<&Node>,
    ) -> Result<BytecodeBody, CompileError> {
        let kind = match op {
            "+" => InstructionKind::Add,
            "-" => InstructionKind::Sub,
            "*" => InstructionKind::Mul,
            "/" => InstructionKind::Div,
            "^" => InstructionKind::Pow,
            "==" => InstructionKind::Eq,
            "!=" => InstructionKind::Neq,
            ">" => InstructionKind::CmpLt,
            "<" => InstructionKind::CmpLt,
            ">=" => InstructionKind::CmpLe,
            "<=" => InstructionKind::CmpLe,
            "&&" => InstructionKind::And,
            "||" => InstructionKind::Or,
            "!" => InstructionKind::Not,
            _ => return Err(CompileError::unexpected_binary_operator(op)),
        };

        let mut bytecode = BytecodeBody::new();

        // `>` and `>=` reuse cmplt/cmple with the operands swapped, so the
        // right-hand side is lowered first.
        if op == ">" || op == ">=" {
            if let Some(rhs) = rhs {
                bytecode.extend(self.compile_node(rhs)?);
            }
            bytecode.extend(self.compile_node(lhs)?);
        } else {
            bytecode.extend(self.compile_node(lhs)?);
            if let Some(rhs) = rhs {
                bytecode.extend(self.compile_node(rhs)?);
            }
        }

        let label = self.next_label();
        bytecode.push(line(Instruction::with_comment(label, kind, vec![], op)));

        Ok(bytecode)
    }

    fn compile_boolean_op(
        &mut self,
        op: &str,
        lhs: &Node,
        rhs: Option<&Node>,
    ) -> Result<BytecodeBody, CompileError> {
        let kind = match op {
            "&&" => InstructionKind::And,
            "||" => InstructionKind::Or,
            "==" => InstructionKind::Eq,
            "!=" => InstructionKind::Neq,
            "!" => InstructionKind::Not,
            _ => return Err(CompileError::unexpected_command(format!("boolean operator: {}", op))),
        };

        let mut bytecode = self.compile_node(lhs)?;
        if let Some(rhs) = rhs {
            bytecode.extend(self.compile_node(rhs)?);
        }

        let label = self.next_label();
        bytecode.push(line(Instruction::with_comment(label, kind, vec![], op)));

        Ok(bytecode)
    }

    fn compile_call(&mut self, callee: &str, arguments: &[Node]) -> Result<BytecodeBody, CompileError> {
        let mapped = self
            .scopes
            .deep_function(callee)
            .ok_or_else(|| CompileError::function_not_found(callee))?;

        let mut bytecode = BytecodeBody::new();
        for argument in arguments {
            bytecode.extend(self.compile_node(argument)?);
        }

        let label = self.next_label();
        bytecode.push(line(Instruction::with_comment(
            label,
            InstructionKind::InvokeFunc,
            vec![Argument::Index(mapped.id)],
            format!("{}()", callee),
        )));

        Ok(bytecode)
    }

    // ============================================================
    // Assignment
    // ============================================================

    fn compile_assignment(&mut self, target: &Node, value: &Node) -> Result<BytecodeBody, CompileError> {
        match target {
            Node::Variable(name) => {
                let mut bytecode = self.compile_node(value)?;

                let label = self.next_label();
                let (register, is_new) = self.get_register(name);
                let kind = if is_new {
                    InstructionKind::RegisterStore
                } else {
                    InstructionKind::RegisterUpdate
                };

                bytecode.push(line(Instruction::with_comment(
                    label,
                    kind,
                    vec![Argument::Index(register)],
                    name,
                )));
                Ok(bytecode)
            }

            Node::StructMember { .. } => self.compile_member_assignment(target, value),

            _ => Err(CompileError::unexpected_command("invalid assignment target")),
        }
    }

    /// `p.a.b = value` loads `p`, rebuilds the nested aggregate with
    /// `struct_update`, and writes the result back to `p`'s register.
    fn compile_member_assignment(&mut self, target: &Node, value: &Node) -> Result<BytecodeBody, CompileError> {
        let (root, path) = Self::member_path(target)?;

        let mut bytecode = self.compile_node(value)?;

        let label = self.next_label();
        let (register, is_new) = self.get_register(&root);
        bytecode.push(line(Instruction::with_comment(
            label,
            InstructionKind::RegisterLoad,
            vec![Argument::Index(register)],
            &root,
        )));

        // The update walks the key path from the last argument backwards.
        let mut arguments = Vec::new();
        for member in path.iter().rev() {
            arguments.push(Argument::Index(self.member_id(member)?));
        }

        let comment = format!("{}.{}", root, path.join("."));
        let label = self.next_label();
        bytecode.push(line(Instruction::with_comment(
            label,
            InstructionKind::StructUpdate,
            arguments,
            comment,
        )));

        let label = self.next_label();
        let kind = if is_new {
            InstructionKind::RegisterStore
        } else {
            InstructionKind::RegisterUpdate
        };
        bytecode.push(line(Instruction::with_comment(
            label,
            kind,
            vec![Argument::Index(register)],
            &root,
        )));

        Ok(bytecode)
    }

    /// Flatten a member chain into its root variable and member names in
    /// source order.
    fn member_path(node: &Node) -> Result<(String, Vec<String>), CompileError> {
        match node {
            Node::Variable(name) => Ok((name.clone(), Vec::new())),
            Node::StructMember { base, member } => {
                let (root, mut path) = Self::member_path(base)?;
                path.push(member.clone());
                Ok((root, path))
            }
            _ => Err(CompileError::unexpected_command(
                "struct member path must start at a variable",
            )),
        }
    }

    // ============================================================
    // Control flow
    // ============================================================

    fn compile_conditional(
        &mut self,
        condition: &Node,
        body: &Node,
        else_body: Option<&Node>,
    ) -> Result<BytecodeBody, CompileError> {
        let mut bytecode = self.compile_node(condition)?;

        let if_false_label = self.next_label();
        let body_bytecode = self.compile_node(body)?;
        let goto_end_label = self.next_label();

        let else_start = self.peek_next_label();
        bytecode.push(line(Instruction::new(
            if_false_label,
            InstructionKind::IfFalse,
            vec![Argument::Index(else_start)],
        )));

        match else_body {
            Some(else_body) => {
                let else_bytecode = self.compile_node(else_body)?;

                bytecode.extend(body_bytecode);

                if !else_bytecode.is_empty() {
                    let after_else = self.peek_next_label();
                    bytecode.push(line(Instruction::new(
                        goto_end_label,
                        InstructionKind::Goto,
                        vec![Argument::Index(after_else)],
                    )));
                }

                bytecode.extend(else_bytecode);
            }
            None => {
                bytecode.extend(body_bytecode);
            }
        }

        Ok(bytecode)
    }

    /// Shared loop shell.
    ///
    /// Every loop gets its own scope and a one-instruction exit trampoline
    /// that `break` can target before the label after the loop is known:
    ///
    /// ```text
    /// goto start      ; skip exit instruction
    /// goto end        ; exit loop (break target)
    /// start: ...loop-specific bytecode...
    /// end: ...register cleanup, rest of program...
    /// ```
    fn compile_loop<F>(&mut self, inner: F) -> Result<BytecodeBody, CompileError>
    where
        F: FnOnce(&mut Self) -> Result<BytecodeBody, CompileError>,
    {
        self.scopes.enter_scope();

        let skip_exit_label = self.next_label();
        let exit_loop_label = self.next_label();
        self.loop_header_stack.push(exit_loop_label);

        let loop_start = self.peek_next_label();
        let compiled = inner(self)?;
        let loop_end = self.peek_next_label();

        let mut bytecode = vec![
            line(Instruction::with_comment(
                skip_exit_label,
                InstructionKind::Goto,
                vec![Argument::Index(loop_start)],
                "skip exit instruction",
            )),
            line(Instruction::with_comment(
                exit_loop_label,
                InstructionKind::Goto,
                vec![Argument::Index(loop_end)],
                "exit loop",
            )),
        ];
        bytecode.extend(compiled);

        self.loop_header_stack.pop();
        bytecode.extend(self.leave_scope_cleanup());

        Ok(bytecode)
    }

    fn compile_while_inner(&mut self, condition: &Node, body: &Node) -> Result<BytecodeBody, CompileError> {
        let condition_start = self.peek_next_label();
        self.loop_continue_stack.push(condition_start);

        let mut bytecode = self.compile_node(condition)?;
        let if_false_label = self.next_label();

        let body_bytecode = self.compile_node(body)?;
        let goto_label = self.next_label();

        let loop_end = self.peek_next_label();
        bytecode.push(line(Instruction::new(
            if_false_label,
            InstructionKind::IfFalse,
            vec![Argument::Index(loop_end)],
        )));
        bytecode.extend(body_bytecode);
        bytecode.push(line(Instruction::new(
            goto_label,
            InstructionKind::Goto,
            vec![Argument::Index(condition_start)],
        )));

        self.loop_continue_stack.pop();
        Ok(bytecode)
    }

    /// `repeat { } while cond` runs the body before the first check.
    /// `continue` re-enters at the body, since the condition's label is not
    /// known while the body compiles.
    fn compile_repeat_while_inner(&mut self, condition: &Node, body: &Node) -> Result<BytecodeBody, CompileError> {
        let body_start = self.peek_next_label();
        self.loop_continue_stack.push(body_start);

        let mut bytecode = self.compile_node(body)?;
        bytecode.extend(self.compile_node(condition)?);

        let if_true_label = self.next_label();
        bytecode.push(line(Instruction::new(
            if_true_label,
            InstructionKind::IfTrue,
            vec![Argument::Index(body_start)],
        )));

        self.loop_continue_stack.pop();
        Ok(bytecode)
    }

    fn compile_for_inner(
        &mut self,
        assignment: &Node,
        condition: &Node,
        interval: &Node,
        body: &Node,
    ) -> Result<BytecodeBody, CompileError> {
        // The iterator variable lives in the loop scope.
        let mut bytecode = self.compile_node(assignment)?;

        let condition_start = self.peek_next_label();
        self.loop_continue_stack.push(condition_start);

        bytecode.extend(self.compile_node(condition)?);
        let if_false_label = self.next_label();

        let body_bytecode = self.compile_node(body)?;
        let interval_bytecode = self.compile_node(interval)?;
        let goto_label = self.next_label();

        let loop_end = self.peek_next_label();
        bytecode.push(line(Instruction::new(
            if_false_label,
            InstructionKind::IfFalse,
            vec![Argument::Index(loop_end)],
        )));
        bytecode.extend(body_bytecode);
        bytecode.extend(interval_bytecode);
        bytecode.push(line(Instruction::new(
            goto_label,
            InstructionKind::Goto,
            vec![Argument::Index(condition_start)],
        )));

        self.loop_continue_stack.pop();
        Ok(bytecode)
    }

    /// `do n times { }` counts a synthetic register down to zero. The
    /// decrement runs before the body so `continue` cannot skip it.
    fn compile_do_times_inner(&mut self, amount: &Node, body: &Node) -> Result<BytecodeBody, CompileError> {
        let counter = self.new_internal_register();

        let mut bytecode = self.compile_node(amount)?;
        let label = self.next_label();
        bytecode.push(line(Instruction::with_comment(
            label,
            InstructionKind::RegisterStore,
            vec![Argument::Index(counter)],
            "do-times counter",
        )));

        let condition_start = self.peek_next_label();
        self.loop_continue_stack.push(condition_start);

        let condition = Node::binary_op(">", Node::InternalVariable(counter), Some(Node::Number(0.0)))?;
        bytecode.extend(self.compile_node(&condition)?);
        let if_false_label = self.next_label();

        let decrement = Node::binary_op("-", Node::InternalVariable(counter), Some(Node::Number(1.0)))?;
        let mut inner = self.compile_node(&decrement)?;
        let label = self.next_label();
        inner.push(line(Instruction::with_comment(
            label,
            InstructionKind::RegisterUpdate,
            vec![Argument::Index(counter)],
            "do-times counter",
        )));
        inner.extend(self.compile_node(body)?);

        let goto_label = self.next_label();
        let loop_end = self.peek_next_label();

        bytecode.push(line(Instruction::new(
            if_false_label,
            InstructionKind::IfFalse,
            vec![Argument::Index(loop_end)],
        )));
        bytecode.extend(inner);
        bytecode.push(line(Instruction::new(
            goto_label,
            InstructionKind::Goto,
            vec![Argument::Index(condition_start)],
        )));

        self.loop_continue_stack.pop();
        Ok(bytecode)
    }

    fn leave_scope_cleanup(&mut self) -> BytecodeBody {
        let registers = self.scopes.leave_scope();
        let mut bytecode = BytecodeBody::new();

        for (register, name) in registers {
            let label = self.next_label();
            let comment = match name {
                Some(name) => format!("cleanup {}", name),
                None => "cleanup".to_string(),
            };
            bytecode.push(line(Instruction::with_comment(
                label,
                InstructionKind::RegisterClear,
                vec![Argument::Index(register)],
                comment,
            )));
        }

        bytecode
    }

    // ============================================================
    // Functions and structs
    // ============================================================

    /// Compiled function layout:
    ///
    /// ```text
    /// f(a):                ; virtual #1
    ///   skip_past exit     ; jump into the body on invocation
    ///   invoke_func #2     ; cleanup call, target of `return`
    ///   exit_func          ; back to the caller
    ///   ...argument stores (reversed), body, implicit return...
    /// cleanup_f:           ; private #2
    ///   ...register clears...
    /// private_end
    /// end
    /// ```
    fn compile_function(&mut self, prototype: &FunctionPrototype, body: &Node) -> Result<BytecodeBody, CompileError> {
        self.scopes.enter_scope();

        let _ = self.next_label();
        let mapped = self
            .scopes
            .deep_function(&prototype.name)
            .ok_or_else(|| CompileError::function_not_found(&prototype.name))?;

        let skip_exit_label = self.next_label();
        let cleanup_call_label = self.next_label();
        let exit_label = self.next_label();

        self.function_exit_stack.push(cleanup_call_label);

        let mut inner = BytecodeBody::new();

        // Arguments arrive on the stack in call order, so they bind in
        // reverse.
        for argument in prototype.arguments.iter().rev() {
            let label = self.next_label();
            let (register, _) = self.get_register(argument);
            inner.push(line(Instruction::with_comment(
                label,
                InstructionKind::RegisterStore,
                vec![Argument::Index(register)],
                argument,
            )));
        }

        inner.extend(self.compile_node(body)?);

        if !prototype.returns {
            inner.extend(self.compile_node(&Node::Return(None))?);
        }

        let _ = self.next_label();
        self.function_exit_stack.pop();
        let cleanup = self.leave_scope_cleanup();
        let _ = self.next_label();

        let cleanup_name = format!("cleanup_{}", prototype.name);

        let mut bytecode = vec![
            BytecodeLine::FunctionHeader {
                id: mapped.id,
                name: prototype.name.clone(),
                arguments: prototype.arguments.clone(),
            },
            line(Instruction::with_comment(
                skip_exit_label,
                InstructionKind::SkipPast,
                vec![Argument::Index(exit_label)],
                "skip exit instruction",
            )),
            line(Instruction::with_comment(
                cleanup_call_label,
                InstructionKind::InvokeFunc,
                vec![Argument::Index(mapped.exit_id)],
                format!("{}()", cleanup_name),
            )),
            line(Instruction::with_comment(
                exit_label,
                InstructionKind::ExitFunc,
                vec![],
                "exit function",
            )),
        ];
        bytecode.extend(inner);
        bytecode.push(BytecodeLine::PrivateFunctionHeader {
            id: mapped.exit_id,
            name: cleanup_name,
        });
        bytecode.extend(cleanup);
        bytecode.push(BytecodeLine::PrivateEnd);
        bytecode.push(BytecodeLine::End);

        Ok(bytecode)
    }

    /// A struct declaration compiles to a constructor with the same layout
    /// as a function: it pops one argument per member (in reverse
    /// declaration order) into a fresh aggregate and returns it.
    fn compile_struct(&mut self, prototype: &StructPrototype) -> Result<BytecodeBody, CompileError> {
        self.scopes.enter_scope();

        let _ = self.next_label();
        let mapped = self
            .scopes
            .deep_function(&prototype.name)
            .ok_or_else(|| CompileError::function_not_found(&prototype.name))?;

        let skip_exit_label = self.next_label();
        let cleanup_call_label = self.next_label();
        let exit_label = self.next_label();

        self.function_exit_stack.push(cleanup_call_label);

        let mut inner = BytecodeBody::new();

        let label = self.next_label();
        inner.push(line(Instruction::with_comment(
            label,
            InstructionKind::StructInit,
            vec![],
            &prototype.name,
        )));

        for member in prototype.members.iter().rev() {
            let id = self.member_id(member)?;
            let label = self.next_label();
            inner.push(line(Instruction::with_comment(
                label,
                InstructionKind::StructSet,
                vec![Argument::Index(id)],
                member,
            )));
        }

        // The aggregate is the return value.
        inner.extend(self.compile_node(&Node::Return(None))?);

        let _ = self.next_label();
        self.function_exit_stack.pop();
        let cleanup = self.leave_scope_cleanup();
        let _ = self.next_label();

        let cleanup_name = format!("cleanup_{}", prototype.name);

        let mut bytecode = vec![
            BytecodeLine::StructHeader {
                id: mapped.id,
                name: prototype.name.clone(),
                members: prototype.members.clone(),
            },
            line(Instruction::with_comment(
                skip_exit_label,
                InstructionKind::SkipPast,
                vec![Argument::Index(exit_label)],
                "skip exit instruction",
            )),
            line(Instruction::with_comment(
                cleanup_call_label,
                InstructionKind::InvokeFunc,
                vec![Argument::Index(mapped.exit_id)],
                format!("{}()", cleanup_name),
            )),
            line(Instruction::with_comment(
                exit_label,
                InstructionKind::ExitFunc,
                vec![],
                "exit function",
            )),
        ];
        bytecode.extend(inner);
        bytecode.push(BytecodeLine::PrivateFunctionHeader {
            id: mapped.exit_id,
            name: cleanup_name,
        });
        bytecode.extend(cleanup);
        bytecode.push(BytecodeLine::PrivateEnd);
        bytecode.push(BytecodeLine::End);

        Ok(bytecode)
    }
}

impl Default for BytecodeCompiler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assign(name: &str, value: Node) -> Node {
        Node::assignment(Node::Variable(name.to_string()), value).unwrap()
    }

    fn instructions(body: &BytecodeBody) -> Vec<&Instruction> {
        body.iter()
            .filter_map(|l| match l {
                BytecodeLine::Instruction(i) => Some(i),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_assignment_store_then_update() {
        let ast = vec![
            assign("a", Node::Number(1.0)),
            assign("a", Node::Number(2.0)),
        ];

        let bytecode = BytecodeCompiler::new().compile(&ast).unwrap();
        let instrs = instructions(&bytecode);

        assert_eq!(instrs[1].kind, InstructionKind::RegisterStore);
        assert_eq!(instrs[3].kind, InstructionKind::RegisterUpdate);
        assert_eq!(instrs[1].arguments, instrs[3].arguments);
    }

    #[test]
    fn test_labels_are_unique() {
        let cond = Node::binary_op("<", Node::Variable("a".to_string()), Some(Node::Number(10.0))).unwrap();
        let body = Node::body(vec![assign("a", Node::Number(1.0))]);
        let ast = vec![
            assign("a", Node::Number(0.0)),
            Node::while_loop(cond, body).unwrap(),
        ];

        let bytecode = BytecodeCompiler::new().compile(&ast).unwrap();
        let labels: Vec<usize> = instructions(&bytecode).iter().map(|i| i.label).collect();

        let mut sorted = labels.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), labels.len());
    }

    #[test]
    fn test_greater_than_swaps_operands() {
        let cmp = Node::binary_op(
            ">",
            Node::Variable("a".to_string()),
            Some(Node::Variable("b".to_string())),
        )
        .unwrap();
        let ast = vec![
            assign("a", Node::Number(1.0)),
            assign("b", Node::Number(2.0)),
            assign("c", cmp),
        ];

        let bytecode = BytecodeCompiler::new().compile(&ast).unwrap();
        let instrs = instructions(&bytecode);

        // c = a > b lowers as: load b, load a, cmplt
        assert_eq!(instrs[4].kind, InstructionKind::RegisterLoad);
        assert_eq!(instrs[4].comment.as_deref(), Some("b"));
        assert_eq!(instrs[5].kind, InstructionKind::RegisterLoad);
        assert_eq!(instrs[5].comment.as_deref(), Some("a"));
        assert_eq!(instrs[6].kind, InstructionKind::CmpLt);
    }

    #[test]
    fn test_sibling_scopes_get_distinct_registers() {
        let loop_a = Node::while_loop(
            Node::Boolean(true),
            Node::body(vec![assign("x", Node::Number(1.0)), Node::Break]),
        )
        .unwrap();
        let loop_b = Node::while_loop(
            Node::Boolean(true),
            Node::body(vec![assign("x", Node::Number(2.0)), Node::Break]),
        )
        .unwrap();

        let bytecode = BytecodeCompiler::new().compile(&[loop_a, loop_b]).unwrap();

        let stores: Vec<usize> = instructions(&bytecode)
            .iter()
            .filter(|i| i.kind == InstructionKind::RegisterStore)
            .filter_map(|i| match i.arguments.first() {
                Some(Argument::Index(r)) => Some(*r),
                _ => None,
            })
            .collect();

        assert_eq!(stores.len(), 2);
        assert_ne!(stores[0], stores[1]);
    }

    #[test]
    fn test_break_outside_loop_fails() {
        let result = BytecodeCompiler::new().compile(&[Node::Break]);
        assert!(matches!(result, Err(CompileError::UnexpectedCommand { .. })));

        let result = BytecodeCompiler::new().compile(&[Node::Continue]);
        assert!(matches!(result, Err(CompileError::UnexpectedCommand { .. })));
    }

    #[test]
    fn test_return_outside_function_fails() {
        let result = BytecodeCompiler::new().compile(&[Node::Return(None)]);
        assert!(matches!(result, Err(CompileError::UnexpectedCommand { .. })));
    }

    #[test]
    fn test_call_to_unknown_function_fails() {
        let call = Node::Call {
            callee: "nope".to_string(),
            arguments: vec![],
        };

        let result = BytecodeCompiler::new().compile(&[call]);
        assert_eq!(result, Err(CompileError::function_not_found("nope")));
    }

    #[test]
    fn test_function_layout() {
        let func = Node::Function {
            prototype: FunctionPrototype {
                name: "f".to_string(),
                arguments: vec!["x".to_string()],
                returns: false,
            },
            body: Box::new(Node::body(vec![])),
        };

        let bytecode = BytecodeCompiler::new().compile(&[func]).unwrap();

        assert!(matches!(
            bytecode[0],
            BytecodeLine::FunctionHeader { id: 1, .. }
        ));

        let instrs = instructions(&bytecode);
        assert_eq!(instrs[0].kind, InstructionKind::SkipPast);
        assert_eq!(instrs[1].kind, InstructionKind::InvokeFunc);
        assert_eq!(instrs[1].arguments, vec![Argument::Index(2)]);
        assert_eq!(instrs[2].kind, InstructionKind::ExitFunc);
        assert_eq!(instrs[3].kind, InstructionKind::RegisterStore);
        // implicit return jumps to the cleanup call
        assert_eq!(instrs[4].kind, InstructionKind::Goto);
        assert_eq!(instrs[4].arguments, vec![Argument::Index(instrs[1].label)]);

        // cleanup routine clears the one argument register
        assert!(matches!(
            bytecode[bytecode.len() - 4],
            BytecodeLine::PrivateFunctionHeader { id: 2, .. }
        ));
        assert!(matches!(
            &bytecode[bytecode.len() - 3],
            BytecodeLine::Instruction(i) if i.kind == InstructionKind::RegisterClear
        ));
        assert_eq!(bytecode[bytecode.len() - 2], BytecodeLine::PrivateEnd);
        assert_eq!(bytecode[bytecode.len() - 1], BytecodeLine::End);
    }

    #[test]
    fn test_function_ids_allocated_in_pairs() {
        let func = |name: &str| Node::Function {
            prototype: FunctionPrototype {
                name: name.to_string(),
                arguments: vec![],
                returns: false,
            },
            body: Box::new(Node::body(vec![])),
        };

        let bytecode = BytecodeCompiler::new()
            .compile(&[func("f"), func("g")])
            .unwrap();

        let header_ids: Vec<usize> = bytecode
            .iter()
            .filter_map(|l| match l {
                BytecodeLine::FunctionHeader { id, .. } => Some(*id),
                _ => None,
            })
            .collect();

        assert_eq!(header_ids, vec![1, 3]);
    }

    #[test]
    fn test_unused_call_result_is_popped() {
        let func = Node::Function {
            prototype: FunctionPrototype {
                name: "f".to_string(),
                arguments: vec![],
                returns: true,
            },
            body: Box::new(Node::body(vec![Node::Return(Some(Box::new(Node::Number(1.0))))])),
        };
        let call = Node::Call {
            callee: "f".to_string(),
            arguments: vec![],
        };

        let bytecode = BytecodeCompiler::new().compile(&[func, call]).unwrap();
        let instrs = instructions(&bytecode);

        assert_eq!(instrs.last().unwrap().kind, InstructionKind::Pop);
    }

    #[test]
    fn test_struct_lowering_sets_members_in_reverse() {
        let prototype = StructPrototype {
            name: "Point".to_string(),
            members: vec!["x".to_string(), "y".to_string()],
        };

        let mut compiler = BytecodeCompiler::new();
        let bytecode = compiler.compile(&[Node::Struct(prototype)]).unwrap();

        assert!(matches!(bytecode[0], BytecodeLine::StructHeader { id: 1, .. }));

        let instrs = instructions(&bytecode);
        let sets: Vec<&&Instruction> = instrs
            .iter()
            .filter(|i| i.kind == InstructionKind::StructSet)
            .collect();

        let x = compiler.struct_member_id("x").unwrap();
        let y = compiler.struct_member_id("y").unwrap();
        assert_eq!(sets[0].arguments, vec![Argument::Index(y)]);
        assert_eq!(sets[1].arguments, vec![Argument::Index(x)]);
    }

    #[test]
    fn test_member_update_key_path_is_reversed() {
        let prototype = StructPrototype {
            name: "Line".to_string(),
            members: vec!["a".to_string(), "b".to_string()],
        };

        // p.a.b = 1
        let target = Node::StructMember {
            base: Box::new(Node::StructMember {
                base: Box::new(Node::Variable("p".to_string())),
                member: "a".to_string(),
            }),
            member: "b".to_string(),
        };
        let update = Node::assignment(target, Node::Number(1.0)).unwrap();

        let mut compiler = BytecodeCompiler::new();
        let bytecode = compiler.compile(&[Node::Struct(prototype), update]).unwrap();

        let a = compiler.struct_member_id("a").unwrap();
        let b = compiler.struct_member_id("b").unwrap();

        let instrs = instructions(&bytecode);
        let update = instrs
            .iter()
            .find(|i| i.kind == InstructionKind::StructUpdate)
            .unwrap();
        assert_eq!(update.arguments, vec![Argument::Index(b), Argument::Index(a)]);
    }

    #[test]
    fn test_struct_member_name_reverse_lookup() {
        let prototype = StructPrototype {
            name: "Point".to_string(),
            members: vec!["x".to_string(), "y".to_string()],
        };

        let mut compiler = BytecodeCompiler::new();
        compiler.compile(&[Node::Struct(prototype)]).unwrap();

        let x = compiler.struct_member_id("x").unwrap();
        assert_eq!(compiler.struct_member_name(x), Some("x"));
        assert_eq!(compiler.struct_member_name(99), None);
    }

    #[test]
    fn test_compiled_register_visible_at_root() {
        let mut compiler = BytecodeCompiler::new();
        compiler.compile(&[assign("a", Node::Number(0.3))]).unwrap();

        assert_eq!(compiler.compiled_register("a"), Some(1));
        assert_eq!(compiler.compiled_register("missing"), None);
    }
}
