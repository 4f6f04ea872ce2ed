pub mod runtime_error;
pub mod stack;
pub mod vm;

pub use runtime_error::InterpreterError;
pub use vm::{BytecodeInterpreter, VmConfig};
