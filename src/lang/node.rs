use crate::bytecode::compile_error::CompileError;

/// Signature of a function declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionPrototype {
    pub name: String,
    pub arguments: Vec<String>,
    /// True when the function is declared with `returns`.
    pub returns: bool,
}

/// Signature of a struct declaration: an ordered list of member names.
#[derive(Debug, Clone, PartialEq)]
pub struct StructPrototype {
    pub name: String,
    pub members: Vec<String>,
}

/// Abstract Syntax Tree node for the Cinder language.
///
/// Construction goes through the checked factory functions below wherever a
/// construct restricts the shape of its children; invalid shapes surface as
/// `CompileError` at build time rather than during lowering.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Numeric literal.
    Number(f64),

    /// Boolean literal, lowered as 1.0 / 0.0.
    Boolean(bool),

    /// Named variable reference.
    Variable(String),

    /// Compiler-synthesized variable addressed directly by register id,
    /// used for desugared constructs such as `do n times`.
    InternalVariable(usize),

    /// Struct member access, `base.member`. Chains nest through `base`.
    StructMember { base: Box<Node>, member: String },

    /// Binary operation; `rhs` is `None` for the unary operators.
    BinaryOp {
        op: String,
        lhs: Box<Node>,
        rhs: Option<Box<Node>>,
    },

    /// Boolean operation (`&&`, `||`, `==`, `!=`, `!`); same shape as
    /// `BinaryOp`, with `rhs` absent for `!`.
    BooleanOp {
        op: String,
        lhs: Box<Node>,
        rhs: Option<Box<Node>>,
    },

    /// Assignment to a variable or a struct member path.
    Assignment { target: Box<Node>, value: Box<Node> },

    /// Statement sequence. A body does not open a scope; the owning
    /// construct does.
    Body(Vec<Node>),

    /// `if` / `else`.
    Conditional {
        condition: Box<Node>,
        body: Box<Node>,
        else_body: Option<Box<Node>>,
    },

    /// `while cond { }`
    While { condition: Box<Node>, body: Box<Node> },

    /// `repeat { } while cond`
    RepeatWhile { condition: Box<Node>, body: Box<Node> },

    /// `for i = 0, i < n, i += 1 { }`
    For {
        assignment: Box<Node>,
        condition: Box<Node>,
        interval: Box<Node>,
        body: Box<Node>,
    },

    /// `do n times { }`
    DoTimes { amount: Box<Node>, body: Box<Node> },

    Break,

    Continue,

    /// `return` with an optional value.
    Return(Option<Box<Node>>),

    /// Function or struct-constructor call.
    Call { callee: String, arguments: Vec<Node> },

    /// `func name(args) [returns] { }`
    Function {
        prototype: FunctionPrototype,
        body: Box<Node>,
    },

    /// `struct Name { members }`
    Struct(StructPrototype),
}

impl Node {
    pub fn body(nodes: Vec<Node>) -> Node {
        Node::Body(nodes)
    }

    pub fn binary_op(op: impl Into<String>, lhs: Node, rhs: Option<Node>) -> Result<Node, CompileError> {
        Self::check_operand(&lhs)?;
        if let Some(rhs) = &rhs {
            Self::check_operand(rhs)?;
        }

        Ok(Node::BinaryOp {
            op: op.into(),
            lhs: Box::new(lhs),
            rhs: rhs.map(Box::new),
        })
    }

    pub fn boolean_op(op: impl Into<String>, lhs: Node, rhs: Option<Node>) -> Result<Node, CompileError> {
        Self::check_operand(&lhs)?;
        if let Some(rhs) = &rhs {
            Self::check_operand(rhs)?;
        }

        Ok(Node::BooleanOp {
            op: op.into(),
            lhs: Box::new(lhs),
            rhs: rhs.map(Box::new),
        })
    }

    pub fn assignment(target: Node, value: Node) -> Result<Node, CompileError> {
        if !matches!(target, Node::Variable(_) | Node::StructMember { .. }) {
            return Err(CompileError::unexpected_command(
                "assignment target must be a variable or struct member",
            ));
        }

        Ok(Node::Assignment {
            target: Box::new(target),
            value: Box::new(value),
        })
    }

    pub fn conditional(condition: Node, body: Node, else_body: Option<Node>) -> Result<Node, CompileError> {
        Self::check_condition(&condition)?;

        Ok(Node::Conditional {
            condition: Box::new(condition),
            body: Box::new(body),
            else_body: else_body.map(Box::new),
        })
    }

    pub fn while_loop(condition: Node, body: Node) -> Result<Node, CompileError> {
        Self::check_condition(&condition)?;

        Ok(Node::While {
            condition: Box::new(condition),
            body: Box::new(body),
        })
    }

    pub fn repeat_while(condition: Node, body: Node) -> Result<Node, CompileError> {
        Self::check_condition(&condition)?;

        Ok(Node::RepeatWhile {
            condition: Box::new(condition),
            body: Box::new(body),
        })
    }

    pub fn for_loop(assignment: Node, condition: Node, interval: Node, body: Node) -> Result<Node, CompileError> {
        Self::check_condition(&condition)?;

        if !matches!(assignment, Node::Assignment { .. }) {
            return Err(CompileError::unexpected_command("for loop expects an init assignment"));
        }

        if !matches!(interval, Node::Assignment { .. }) {
            return Err(CompileError::unexpected_command("for loop interval must be an assignment"));
        }

        Ok(Node::For {
            assignment: Box::new(assignment),
            condition: Box::new(condition),
            interval: Box::new(interval),
            body: Box::new(body),
        })
    }

    /// The amount must be a variable, an expression, or a positive number
    /// literal; a constant count of zero or less can never run.
    pub fn do_times(amount: Node, body: Node) -> Result<Node, CompileError> {
        match &amount {
            Node::Number(n) => {
                if *n <= 0.0 {
                    return Err(CompileError::unexpected_command(
                        "do-times amount must be greater than zero",
                    ));
                }
            }
            Node::Variable(_) | Node::BinaryOp { .. } => {}
            _ => {
                return Err(CompileError::unexpected_command(
                    "do-times amount must be a number, variable or expression",
                ));
            }
        }

        Ok(Node::DoTimes {
            amount: Box::new(amount),
            body: Box::new(body),
        })
    }

    /// Operand restriction shared by binary operations and conditions.
    fn check_operand(node: &Node) -> Result<(), CompileError> {
        match node {
            Node::BinaryOp { .. }
            | Node::BooleanOp { .. }
            | Node::Number(_)
            | Node::Boolean(_)
            | Node::Variable(_)
            | Node::InternalVariable(_)
            | Node::Call { .. }
            | Node::StructMember { .. } => Ok(()),
            _ => Err(CompileError::unexpected_command("invalid operand")),
        }
    }

    fn check_condition(node: &Node) -> Result<(), CompileError> {
        Self::check_operand(node)
            .map_err(|_| CompileError::unexpected_command("invalid condition"))
    }

    /// Direct children, used by the compiler prepasses to find function and
    /// struct declarations at any nesting depth.
    pub fn children(&self) -> Vec<&Node> {
        match self {
            Node::StructMember { base, .. } => vec![base],
            Node::BinaryOp { lhs, rhs, .. } | Node::BooleanOp { lhs, rhs, .. } => {
                let mut children = vec![lhs.as_ref()];
                if let Some(rhs) = rhs {
                    children.push(rhs);
                }
                children
            }
            Node::Assignment { target, value } => vec![target, value],
            Node::Body(nodes) => nodes.iter().collect(),
            Node::Conditional {
                condition,
                body,
                else_body,
            } => {
                let mut children = vec![condition.as_ref(), body.as_ref()];
                if let Some(else_body) = else_body {
                    children.push(else_body);
                }
                children
            }
            Node::While { condition, body } | Node::RepeatWhile { condition, body } => {
                vec![condition, body]
            }
            Node::For {
                assignment,
                condition,
                interval,
                body,
            } => vec![assignment, condition, interval, body],
            Node::DoTimes { amount, body } => vec![amount, body],
            Node::Return(Some(value)) => vec![value],
            Node::Call { arguments, .. } => arguments.iter().collect(),
            Node::Function { body, .. } => vec![body],
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_do_times_rejects_non_positive_literal() {
        let result = Node::do_times(Node::Number(0.0), Node::body(vec![]));
        assert!(matches!(result, Err(CompileError::UnexpectedCommand { .. })));

        let result = Node::do_times(Node::Number(-3.0), Node::body(vec![]));
        assert!(matches!(result, Err(CompileError::UnexpectedCommand { .. })));
    }

    #[test]
    fn test_do_times_accepts_variable_amount() {
        let result = Node::do_times(Node::Variable("n".to_string()), Node::body(vec![]));
        assert!(result.is_ok());
    }

    #[test]
    fn test_binary_op_rejects_statement_operand() {
        let result = Node::binary_op("+", Node::Break, Some(Node::Number(1.0)));
        assert!(matches!(result, Err(CompileError::UnexpectedCommand { .. })));
    }

    #[test]
    fn test_condition_rejects_assignment() {
        let assign = Node::assignment(Node::Variable("a".to_string()), Node::Number(1.0)).unwrap();
        let result = Node::while_loop(assign, Node::body(vec![]));
        assert!(matches!(result, Err(CompileError::UnexpectedCommand { .. })));
    }

    #[test]
    fn test_for_loop_interval_must_assign() {
        let init = Node::assignment(Node::Variable("i".to_string()), Node::Number(0.0)).unwrap();
        let cond = Node::binary_op("<", Node::Variable("i".to_string()), Some(Node::Number(10.0))).unwrap();

        let result = Node::for_loop(init, cond, Node::Number(1.0), Node::body(vec![]));
        assert!(matches!(result, Err(CompileError::UnexpectedCommand { .. })));
    }

    #[test]
    fn test_assignment_target_checked() {
        let result = Node::assignment(Node::Number(1.0), Node::Number(2.0));
        assert!(matches!(result, Err(CompileError::UnexpectedCommand { .. })));

        let member = Node::StructMember {
            base: Box::new(Node::Variable("p".to_string())),
            member: "x".to_string(),
        };
        assert!(Node::assignment(member, Node::Number(2.0)).is_ok());
    }
}
