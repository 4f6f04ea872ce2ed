use serde::{Deserialize, Serialize};
use std::fmt;

/// Jump label. Labels are unique, monotonically increasing, and form a
/// compiler-wide namespace; they are not program counters.
pub type Label = usize;

/// Instruction argument: a literal number for `push_const`, an index
/// (label, register, function id or struct member id) for everything else.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Argument {
    Value(f64),
    Index(usize),
}

impl fmt::Display for Argument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Argument::Value(v) => write!(f, "{}", v),
            Argument::Index(i) => write!(f, "{}", i),
        }
    }
}

/// Opcodes of the Cinder virtual machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstructionKind {
    PushConst,
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    And,
    Or,
    Not,
    Eq,
    Neq,
    CmpLe,
    CmpLt,
    Goto,
    IfTrue,
    IfFalse,
    /// Jump to the instruction after the one carrying the target label.
    SkipPast,
    RegisterStore,
    RegisterUpdate,
    RegisterClear,
    RegisterLoad,
    InvokeFunc,
    ExitFunc,
    Pop,
    StructInit,
    StructSet,
    StructUpdate,
    StructGet,
}

impl InstructionKind {
    /// Snake-case command name used by the text encoding.
    pub fn command(&self) -> &'static str {
        match self {
            InstructionKind::PushConst => "push_const",
            InstructionKind::Add => "add",
            InstructionKind::Sub => "sub",
            InstructionKind::Mul => "mul",
            InstructionKind::Div => "div",
            InstructionKind::Pow => "pow",
            InstructionKind::And => "and",
            InstructionKind::Or => "or",
            InstructionKind::Not => "not",
            InstructionKind::Eq => "eq",
            InstructionKind::Neq => "neq",
            InstructionKind::CmpLe => "cmple",
            InstructionKind::CmpLt => "cmplt",
            InstructionKind::Goto => "goto",
            InstructionKind::IfTrue => "if_true",
            InstructionKind::IfFalse => "if_false",
            InstructionKind::SkipPast => "skip_past",
            InstructionKind::RegisterStore => "register_store",
            InstructionKind::RegisterUpdate => "register_update",
            InstructionKind::RegisterClear => "register_clear",
            InstructionKind::RegisterLoad => "register_load",
            InstructionKind::InvokeFunc => "invoke_func",
            InstructionKind::ExitFunc => "exit_func",
            InstructionKind::Pop => "pop",
            InstructionKind::StructInit => "struct_init",
            InstructionKind::StructSet => "struct_set",
            InstructionKind::StructUpdate => "struct_update",
            InstructionKind::StructGet => "struct_get",
        }
    }

    pub fn from_command(command: &str) -> Option<InstructionKind> {
        let kind = match command {
            "push_const" => InstructionKind::PushConst,
            "add" => InstructionKind::Add,
            "sub" => InstructionKind::Sub,
            "mul" => InstructionKind::Mul,
            "div" => InstructionKind::Div,
            "pow" => InstructionKind::Pow,
            "and" => InstructionKind::And,
            "or" => InstructionKind::Or,
            "not" => InstructionKind::Not,
            "eq" => InstructionKind::Eq,
            "neq" => InstructionKind::Neq,
            "cmple" => InstructionKind::CmpLe,
            "cmplt" => InstructionKind::CmpLt,
            "goto" => InstructionKind::Goto,
            "if_true" => InstructionKind::IfTrue,
            "if_false" => InstructionKind::IfFalse,
            "skip_past" => InstructionKind::SkipPast,
            "register_store" => InstructionKind::RegisterStore,
            "register_update" => InstructionKind::RegisterUpdate,
            "register_clear" => InstructionKind::RegisterClear,
            "register_load" => InstructionKind::RegisterLoad,
            "invoke_func" => InstructionKind::InvokeFunc,
            "exit_func" => InstructionKind::ExitFunc,
            "pop" => InstructionKind::Pop,
            "struct_init" => InstructionKind::StructInit,
            "struct_set" => InstructionKind::StructSet,
            "struct_update" => InstructionKind::StructUpdate,
            "struct_get" => InstructionKind::StructGet,
            _ => return None,
        };

        Some(kind)
    }

    /// `push_const` is the only opcode taking a literal value argument.
    fn takes_value_argument(&self) -> bool {
        matches!(self, InstructionKind::PushConst)
    }
}

/// A single labeled instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub label: Label,
    pub kind: InstructionKind,
    pub arguments: Vec<Argument>,
    /// Cosmetic only; carried through the text encoding.
    pub comment: Option<String>,
}

impl Instruction {
    pub fn new(label: Label, kind: InstructionKind, arguments: Vec<Argument>) -> Self {
        Instruction {
            label,
            kind,
            arguments,
            comment: None,
        }
    }

    pub fn with_comment(
        label: Label,
        kind: InstructionKind,
        arguments: Vec<Argument>,
        comment: impl Into<String>,
    ) -> Self {
        Instruction {
            label,
            kind,
            arguments,
            comment: Some(comment.into()),
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.label, self.kind.command())?;

        for (i, arg) in self.arguments.iter().enumerate() {
            if i == 0 {
                write!(f, " {}", arg)?;
            } else {
                write!(f, ",{}", arg)?;
            }
        }

        if let Some(comment) = &self.comment {
            write!(f, " ; {}", comment)?;
        }

        Ok(())
    }
}

/// One line of a compiled program: an instruction, a header marking a
/// callable region, or an end marker closing one.
///
/// A compiled function has the shape:
///
/// ```text
/// fib(n):            ; virtual #1
///     ...body...
/// cleanup_fib:       ; private #2
///     ...register clears...
/// private_end
/// end
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BytecodeLine {
    Instruction(Instruction),

    /// Entry marker of a function. Invoking its id starts right after the
    /// header; reaching the header in straight-line execution skips the
    /// whole region.
    FunctionHeader {
        id: usize,
        name: String,
        arguments: Vec<String>,
    },

    /// Entry marker of the register-cleanup routine paired with a function.
    /// Invoking it does not count as a call for register scoping.
    PrivateFunctionHeader { id: usize, name: String },

    /// Entry marker of a struct constructor.
    StructHeader {
        id: usize,
        name: String,
        members: Vec<String>,
    },

    End,
    PrivateEnd,
}

pub type BytecodeBody = Vec<BytecodeLine>;

impl fmt::Display for BytecodeLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BytecodeLine::Instruction(instruction) => write!(f, "{}", instruction),
            BytecodeLine::FunctionHeader { id, name, arguments } => {
                write!(f, "{}({}): ; virtual #{}", name, arguments.join(","), id)
            }
            BytecodeLine::PrivateFunctionHeader { id, name } => {
                write!(f, "{}: ; private #{}", name, id)
            }
            BytecodeLine::StructHeader { id, name, members } => {
                write!(f, "{}({}): ; struct #{}", name, members.join(","), id)
            }
            BytecodeLine::End => write!(f, "end"),
            BytecodeLine::PrivateEnd => write!(f, "private_end"),
        }
    }
}

// ============================================================
// Text encoding
// ============================================================

#[derive(Debug, Clone, PartialEq)]
pub enum DecodeError {
    InvalidDecoding { line: String },
}

impl DecodeError {
    fn invalid(line: &str) -> DecodeError {
        DecodeError::InvalidDecoding {
            line: line.to_string(),
        }
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::InvalidDecoding { line } => {
                write!(f, "invalid bytecode line: {}", line)
            }
        }
    }
}

impl std::error::Error for DecodeError {}

/// Render a program in the line-oriented text encoding.
pub fn encode(body: &BytecodeBody) -> String {
    let mut out = String::new();

    for line in body {
        out.push_str(&line.to_string());
        out.push('\n');
    }

    out
}

/// Parse a program from the text encoding. Blank lines are skipped.
pub fn decode(text: &str) -> Result<BytecodeBody, DecodeError> {
    let mut body = BytecodeBody::new();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        body.push(decode_line(line)?);
    }

    Ok(body)
}

fn decode_line(line: &str) -> Result<BytecodeLine, DecodeError> {
    match line {
        "end" => return Ok(BytecodeLine::End),
        "private_end" => return Ok(BytecodeLine::PrivateEnd),
        _ => {}
    }

    if let Some(id_text) = header_id(line, "; virtual #") {
        let (name, arguments) = decode_header_front(line)?;
        let arguments = arguments.ok_or_else(|| DecodeError::invalid(line))?;
        return Ok(BytecodeLine::FunctionHeader {
            id: parse_index(id_text, line)?,
            name,
            arguments,
        });
    }

    if let Some(id_text) = header_id(line, "; struct #") {
        let (name, members) = decode_header_front(line)?;
        let members = members.ok_or_else(|| DecodeError::invalid(line))?;
        return Ok(BytecodeLine::StructHeader {
            id: parse_index(id_text, line)?,
            name,
            members,
        });
    }

    if let Some(id_text) = header_id(line, "; private #") {
        let (name, arguments) = decode_header_front(line)?;
        if arguments.is_some() {
            return Err(DecodeError::invalid(line));
        }
        return Ok(BytecodeLine::PrivateFunctionHeader {
            id: parse_index(id_text, line)?,
            name,
        });
    }

    decode_instruction(line).map(BytecodeLine::Instruction)
}

fn header_id<'a>(line: &'a str, marker: &str) -> Option<&'a str> {
    line.split_once(marker).map(|(_, id)| id.trim())
}

/// Parse the `name(args):` or `name:` part of a header line.
fn decode_header_front(line: &str) -> Result<(String, Option<Vec<String>>), DecodeError> {
    let front = line
        .split_once(':')
        .map(|(front, _)| front.trim())
        .ok_or_else(|| DecodeError::invalid(line))?;

    match front.split_once('(') {
        Some((name, rest)) => {
            let args = rest
                .strip_suffix(')')
                .ok_or_else(|| DecodeError::invalid(line))?;

            let arguments = if args.is_empty() {
                Vec::new()
            } else {
                args.split(',').map(|a| a.trim().to_string()).collect()
            };

            Ok((name.to_string(), Some(arguments)))
        }
        None => Ok((front.to_string(), None)),
    }
}

fn decode_instruction(line: &str) -> Result<Instruction, DecodeError> {
    let (body, comment) = match line.split_once(" ; ") {
        Some((body, comment)) => (body.trim(), Some(comment.trim().to_string())),
        None => (line, None),
    };

    let mut parts = body.split_whitespace();

    let label_part = parts.next().ok_or_else(|| DecodeError::invalid(line))?;
    let label_text = label_part
        .strip_suffix(':')
        .ok_or_else(|| DecodeError::invalid(line))?;
    let label = parse_index(label_text, line)?;

    let command = parts.next().ok_or_else(|| DecodeError::invalid(line))?;
    let kind = InstructionKind::from_command(command).ok_or_else(|| DecodeError::invalid(line))?;

    let arguments = match parts.next() {
        Some(args) => {
            let mut arguments = Vec::new();
            for arg in args.split(',') {
                if kind.takes_value_argument() {
                    let value = arg
                        .parse::<f64>()
                        .map_err(|_| DecodeError::invalid(line))?;
                    arguments.push(Argument::Value(value));
                } else {
                    arguments.push(Argument::Index(parse_index(arg, line)?));
                }
            }
            arguments
        }
        None => Vec::new(),
    };

    if parts.next().is_some() {
        return Err(DecodeError::invalid(line));
    }

    Ok(Instruction {
        label,
        kind,
        arguments,
        comment,
    })
}

fn parse_index(text: &str, line: &str) -> Result<usize, DecodeError> {
    text.parse::<usize>().map_err(|_| DecodeError::invalid(line))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instruction_display() {
        let instr = Instruction::new(3, InstructionKind::PushConst, vec![Argument::Value(0.3)]);
        assert_eq!(instr.to_string(), "3: push_const 0.3");

        let instr = Instruction::with_comment(
            7,
            InstructionKind::RegisterStore,
            vec![Argument::Index(1)],
            "a",
        );
        assert_eq!(instr.to_string(), "7: register_store 1 ; a");
    }

    #[test]
    fn test_decode_instruction() {
        let line = decode_line("3: push_const 0.3").unwrap();
        assert_eq!(
            line,
            BytecodeLine::Instruction(Instruction::new(
                3,
                InstructionKind::PushConst,
                vec![Argument::Value(0.3)]
            ))
        );

        let line = decode_line("9: struct_update 4,2 ; p.a.b").unwrap();
        let BytecodeLine::Instruction(instr) = line else {
            panic!("expected instruction");
        };
        assert_eq!(instr.arguments, vec![Argument::Index(4), Argument::Index(2)]);
        assert_eq!(instr.comment.as_deref(), Some("p.a.b"));
    }

    #[test]
    fn test_decode_headers_and_ends() {
        let line = decode_line("fib(n): ; virtual #1").unwrap();
        assert_eq!(
            line,
            BytecodeLine::FunctionHeader {
                id: 1,
                name: "fib".to_string(),
                arguments: vec!["n".to_string()],
            }
        );

        let line = decode_line("cleanup_fib: ; private #2").unwrap();
        assert_eq!(
            line,
            BytecodeLine::PrivateFunctionHeader {
                id: 2,
                name: "cleanup_fib".to_string(),
            }
        );

        let line = decode_line("Point(x,y): ; struct #3").unwrap();
        assert!(matches!(line, BytecodeLine::StructHeader { id: 3, .. }));

        assert_eq!(decode_line("end").unwrap(), BytecodeLine::End);
        assert_eq!(decode_line("private_end").unwrap(), BytecodeLine::PrivateEnd);
    }

    #[test]
    fn test_decode_rejects_malformed_lines() {
        assert!(matches!(
            decode_line("not a line"),
            Err(DecodeError::InvalidDecoding { .. })
        ));
        assert!(decode_line("3 push_const 0.3").is_err());
        assert!(decode_line("3: frobnicate").is_err());
        assert!(decode_line("3: goto x").is_err());
    }

    #[test]
    fn test_round_trip() {
        let body: BytecodeBody = vec![
            BytecodeLine::FunctionHeader {
                id: 1,
                name: "double".to_string(),
                arguments: vec!["x".to_string()],
            },
            BytecodeLine::Instruction(Instruction::with_comment(
                2,
                InstructionKind::SkipPast,
                vec![Argument::Index(4)],
                "skip exit instruction",
            )),
            BytecodeLine::Instruction(Instruction::new(
                5,
                InstructionKind::PushConst,
                vec![Argument::Value(2.0)],
            )),
            BytecodeLine::Instruction(Instruction::new(6, InstructionKind::Mul, vec![])),
            BytecodeLine::PrivateFunctionHeader {
                id: 2,
                name: "cleanup_double".to_string(),
            },
            BytecodeLine::PrivateEnd,
            BytecodeLine::End,
        ];

        let decoded = decode(&encode(&body)).unwrap();
        assert_eq!(decoded, body);
    }
}
