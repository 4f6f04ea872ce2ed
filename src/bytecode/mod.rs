pub mod compile;
pub mod compile_error;
pub mod disasm;
pub mod instr;
pub mod scope;

pub use compile::BytecodeCompiler;
pub use instr::BytecodeBody;
