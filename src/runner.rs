use std::fmt;

use crate::bytecode::compile_error::CompileError;
use crate::bytecode::{BytecodeBody, BytecodeCompiler};
use crate::frontend::lexer::{Lexer, LexerError};
use crate::frontend::parser::{ParseError, Parser};
use crate::lang::Value;
use crate::runtime::{BytecodeInterpreter, InterpreterError, VmConfig};
use crate::stdlib;

#[derive(Debug)]
pub enum RunnerError {
    Lexer(LexerError),
    Parse(ParseError),
    Compile(CompileError),
    Interpreter(InterpreterError),
    /// A top-level variable requested after a run does not exist.
    RegisterNotFound { name: String },
}

impl From<LexerError> for RunnerError {
    fn from(error: LexerError) -> Self {
        RunnerError::Lexer(error)
    }
}

impl From<ParseError> for RunnerError {
    fn from(error: ParseError) -> Self {
        RunnerError::Parse(error)
    }
}

impl From<CompileError> for RunnerError {
    fn from(error: CompileError) -> Self {
        RunnerError::Compile(error)
    }
}

impl From<InterpreterError> for RunnerError {
    fn from(error: InterpreterError) -> Self {
        RunnerError::Interpreter(error)
    }
}

impl fmt::Display for RunnerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunnerError::Lexer(error) => write!(f, "lexer error: {}", error),
            RunnerError::Parse(error) => write!(f, "parse error: {}", error),
            RunnerError::Compile(error) => write!(f, "compile error: {}", error),
            RunnerError::Interpreter(error) => write!(f, "runtime error: {}", error),
            RunnerError::RegisterNotFound { name } => {
                write!(f, "no top-level variable named '{}'", name)
            }
        }
    }
}

impl std::error::Error for RunnerError {}

/// Front door of the toolchain: compiles the bundled standard library and a
/// user program into one bytecode body and runs it.
///
/// A runner is single-use per program; the compiler keeps its label,
/// register and function id counters across both compilations so the two
/// sources share one id space.
pub struct Runner {
    compiler: BytecodeCompiler,
    config: VmConfig,
}

impl Runner {
    pub fn new() -> Self {
        Self::with_config(VmConfig::default())
    }

    pub fn with_config(config: VmConfig) -> Self {
        Runner {
            compiler: BytecodeCompiler::new(),
            config,
        }
    }

    /// Compile the standard library followed by the user program.
    pub fn compile(&mut self, source: &str) -> Result<BytecodeBody, RunnerError> {
        let mut bytecode = self.compile_source(&stdlib::full_source())?;
        bytecode.extend(self.compile_source(source)?);
        Ok(bytecode)
    }

    fn compile_source(&mut self, source: &str) -> Result<BytecodeBody, RunnerError> {
        let tokens = Lexer::new(source).tokenize()?;
        let ast = Parser::new(tokens).parse()?;
        Ok(self.compiler.compile(&ast)?)
    }

    /// Compile and run, returning the finished interpreter so callers can
    /// inspect registers and the stack.
    pub fn run(&mut self, source: &str) -> Result<BytecodeInterpreter, RunnerError> {
        let bytecode = self.compile(source)?;

        let mut interpreter = BytecodeInterpreter::with_config(bytecode, self.config)?;
        interpreter.interpret()?;

        Ok(interpreter)
    }

    /// Run and read back the final value of a top-level variable.
    pub fn run_and_get(&mut self, source: &str, name: &str) -> Result<Value, RunnerError> {
        let interpreter = self.run(source)?;

        let register =
            self.compiler
                .compiled_register(name)
                .ok_or_else(|| RunnerError::RegisterNotFound {
                    name: name.to_string(),
                })?;

        interpreter
            .register_value(register)
            .cloned()
            .ok_or_else(|| RunnerError::RegisterNotFound {
                name: name.to_string(),
            })
    }

    pub fn compiler(&self) -> &BytecodeCompiler {
        &self.compiler
    }
}

impl Default for Runner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::instr::{decode, encode};

    fn run_number(source: &str, name: &str) -> f64 {
        Runner::new()
            .run_and_get(source, name)
            .unwrap()
            .as_number()
            .unwrap()
    }

    #[test]
    fn test_assignment() {
        assert_eq!(run_number("a = 0.3", "a"), 0.3);
    }

    #[test]
    fn test_arithmetic_expression() {
        assert_eq!(run_number("a = 1 + 3 * (8^4 - 2) / 6 / 4", "a"), 512.75);
    }

    #[test]
    fn test_fibonacci() {
        let source = "
            func fib(n) returns {
                if n <= 1 {
                    return n
                }
                return fib(n - 1) + fib(n - 2)
            }
            a = fib(10)
        ";

        assert_eq!(run_number(source, "a"), 55.0);
    }

    #[test]
    fn test_gcd_by_subtraction() {
        let source = "
            func gcd(a, b) returns {
                while a != b {
                    if a > b {
                        a = a - b
                    } else {
                        b = b - a
                    }
                }
                return a
            }
            x = gcd(12, 8)
        ";

        assert_eq!(run_number(source, "x"), 4.0);
    }

    #[test]
    fn test_nested_do_times() {
        let source = "
            a = 0
            do 100 times {
                do 100 times {
                    a += 1
                }
            }
        ";

        assert_eq!(run_number(source, "a"), 10_000.0);
    }

    #[test]
    fn test_do_times_with_variable_amount() {
        let source = "
            n = 5
            a = 0
            do n times {
                a += 2
            }
        ";

        assert_eq!(run_number(source, "a"), 10.0);
    }

    #[test]
    fn test_break_and_continue() {
        let source = "
            a = 0
            i = 0
            while i < 10 {
                i += 1
                if i == 3 {
                    continue
                }
                if i == 6 {
                    break
                }
                a += i
            }
        ";

        // 1 + 2 + 4 + 5
        assert_eq!(run_number(source, "a"), 12.0);
    }

    // `continue` in a for loop re-enters at the condition, not the
    // interval, so a loop whose progress lives in the interval never
    // advances past it.
    #[test]
    fn test_continue_in_for_loop_skips_interval() {
        let source = "
            a = 0
            for i = 1, i <= 3, i += 1 {
                continue
            }
        ";

        let config = VmConfig {
            max_steps: 1_000,
            ..VmConfig::default()
        };
        let result = Runner::with_config(config).run(source);

        assert!(matches!(
            result,
            Err(RunnerError::Interpreter(
                InterpreterError::StepLimitReached { .. }
            ))
        ));
    }

    #[test]
    fn test_continue_in_do_times_still_counts_down() {
        let source = "
            a = 0
            do 10 times {
                continue
            }
        ";

        assert_eq!(run_number(source, "a"), 0.0);
    }

    #[test]
    fn test_repeat_while_runs_body_first() {
        let source = "
            a = 100
            repeat {
                a += 1
            } while a < 10
        ";

        assert_eq!(run_number(source, "a"), 101.0);
    }

    #[test]
    fn test_function_mutates_global() {
        let source = "
            a = 2
            func double() {
                a *= 2
            }
            double()
            double()
            a += 4
        ";

        assert_eq!(run_number(source, "a"), 12.0);
    }

    #[test]
    fn test_function_in_function() {
        let source = "
            func outer() returns {
                func inner() returns {
                    return 10
                }
                return inner() * 10
            }
            a = outer()
        ";

        assert_eq!(run_number(source, "a"), 100.0);
    }

    #[test]
    fn test_locals_do_not_leak_out_of_functions() {
        let source = "
            func f() {
                local = 42
            }
            f()
        ";

        let mut runner = Runner::new();
        runner.run(source).unwrap();
        assert_eq!(runner.compiler().compiled_register("local"), None);
    }

    #[test]
    fn test_unused_call_result_leaves_the_stack_empty() {
        let source = "
            func f() returns {
                return 1
            }
            f()
        ";

        let mut runner = Runner::new();
        let interpreter = runner.run(source).unwrap();
        assert!(interpreter.stack().is_empty());
    }

    #[test]
    fn test_struct_construction_and_member_update() {
        let source = "
            struct Point {
                x, y
            }
            p = Point(1, 2)
            p.x = 9
            a = p.x + p.y
        ";

        assert_eq!(run_number(source, "a"), 11.0);
    }

    #[test]
    fn test_nested_struct_update_preserves_siblings() {
        let source = "
            struct Point {
                x, y
            }
            struct Line {
                from, to
            }
            l = Line(Point(1, 2), Point(3, 4))
            l.to.y = 9
            a = l.from.x + l.to.x + l.to.y
        ";

        assert_eq!(run_number(source, "a"), 13.0);
    }

    #[test]
    fn test_stdlib_functions() {
        assert_eq!(run_number("a = max(3, 7)", "a"), 7.0);
        assert_eq!(run_number("a = min(3, 7)", "a"), 3.0);
        assert_eq!(run_number("a = abs(-5)", "a"), 5.0);
        assert_eq!(run_number("a = clamp(15, 0, 10)", "a"), 10.0);
        assert_eq!(run_number("a = sign(-3)", "a"), -1.0);
        assert_eq!(run_number("a = rectangleArea(3, 4)", "a"), 12.0);
        assert_eq!(run_number("a = cubeVolume(3)", "a"), 27.0);
    }

    #[test]
    fn test_user_code_shadows_nothing_it_should_not() {
        // a stdlib call in the middle of an expression
        assert_eq!(run_number("a = 1 + max(2, 3) * 2", "a"), 7.0);
    }

    #[test]
    fn test_missing_variable_reports_register_not_found() {
        let result = Runner::new().run_and_get("a = 1", "b");
        assert!(matches!(result, Err(RunnerError::RegisterNotFound { .. })));
    }

    #[test]
    fn test_compiled_program_round_trips_through_text() {
        let source = "
            func f(x) returns {
                return x * 2
            }
            a = f(21)
        ";

        let bytecode = Runner::new().compile(source).unwrap();
        let decoded = decode(&encode(&bytecode)).unwrap();
        assert_eq!(decoded, bytecode);
    }

    #[test]
    fn test_errors_propagate_through_the_runner() {
        assert!(matches!(
            Runner::new().run("a = 1 +"),
            Err(RunnerError::Parse(_))
        ));
        assert!(matches!(
            Runner::new().run("nope()"),
            Err(RunnerError::Compile(CompileError::FunctionNotFound { .. }))
        ));
        assert!(matches!(
            Runner::new().run("a = /* unterminated"),
            Err(RunnerError::Lexer(_))
        ));
    }
}
