use std::fmt;

/// Errors reported while building or lowering the AST.
#[derive(Debug, Clone, PartialEq)]
pub enum CompileError {
    /// A construct was used somewhere it is not allowed, e.g. `break`
    /// outside a loop or an invalid operand in a binary operation.
    UnexpectedCommand { hint: String },

    /// A binary operator with no opcode mapping.
    UnexpectedBinaryOperator { op: String },

    /// A call to a name that is not in scope.
    FunctionNotFound { name: String },

    /// The scope tree was left in an inconsistent state.
    UnbalancedScope,
}

impl CompileError {
    pub fn unexpected_command(hint: impl Into<String>) -> Self {
        CompileError::UnexpectedCommand { hint: hint.into() }
    }

    pub fn unexpected_binary_operator(op: impl Into<String>) -> Self {
        CompileError::UnexpectedBinaryOperator { op: op.into() }
    }

    pub fn function_not_found(name: impl Into<String>) -> Self {
        CompileError::FunctionNotFound { name: name.into() }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::UnexpectedCommand { hint } => {
                write!(f, "unexpected command: {}", hint)
            }
            CompileError::UnexpectedBinaryOperator { op } => {
                write!(f, "unexpected binary operator: {}", op)
            }
            CompileError::FunctionNotFound { name } => {
                write!(f, "function not found: {}", name)
            }
            CompileError::UnbalancedScope => {
                write!(f, "unbalanced scope")
            }
        }
    }
}

impl std::error::Error for CompileError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = CompileError::function_not_found("fib");
        assert_eq!(err.to_string(), "function not found: fib");

        let err = CompileError::unexpected_binary_operator("%");
        assert_eq!(err.to_string(), "unexpected binary operator: %");

        assert_eq!(CompileError::UnbalancedScope.to_string(), "unbalanced scope");
    }

    #[test]
    fn test_constructors() {
        assert!(matches!(
            CompileError::unexpected_command("break outside loop"),
            CompileError::UnexpectedCommand { .. }
        ));
    }
}
