use std::fmt;

/// Errors raised while interpreting bytecode.
#[derive(Debug, Clone, PartialEq)]
pub enum InterpreterError {
    /// An instruction carried a missing or ill-typed argument, or was
    /// executed against an operand of the wrong shape.
    UnexpectedArgument { hint: String },

    /// A register was read or updated before anything was stored in it.
    InvalidRegister { register: usize },

    /// Pop from an empty stack.
    IllegalStackOperation,

    /// Push past the configured stack limit.
    StackOverflow,

    /// Public call nesting exceeded the configured limit.
    CallDepthExceeded { limit: usize },

    /// The program ran longer than the configured step budget allows.
    StepLimitReached { limit: usize },
}

impl InterpreterError {
    pub fn unexpected_argument(hint: impl Into<String>) -> InterpreterError {
        InterpreterError::UnexpectedArgument { hint: hint.into() }
    }
}

impl fmt::Display for InterpreterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterpreterError::UnexpectedArgument { hint } => {
                write!(f, "unexpected argument: {}", hint)
            }
            InterpreterError::InvalidRegister { register } => {
                write!(f, "invalid register: {}", register)
            }
            InterpreterError::IllegalStackOperation => {
                write!(f, "illegal stack operation")
            }
            InterpreterError::StackOverflow => write!(f, "stack overflow"),
            InterpreterError::CallDepthExceeded { limit } => {
                write!(f, "call depth exceeded the limit of {}", limit)
            }
            InterpreterError::StepLimitReached { limit } => {
                write!(f, "execution exceeded the step limit of {}", limit)
            }
        }
    }
}

impl std::error::Error for InterpreterError {}
