mod bytecode;
mod frontend;
mod lang;
mod runner;
mod runtime;
mod stdlib;

use std::{env, fs, path::Path};

use crate::bytecode::disasm::print_bc;
use crate::bytecode::BytecodeBody;
use crate::frontend::token_dumper::TokenDumper;
use crate::frontend::{Lexer, Parser};
use crate::runner::Runner;
use crate::runtime::BytecodeInterpreter;

fn main() {
    let args: Vec<String> = env::args().collect();

    let tokens_only = args.contains(&"--tokens".to_string());
    let no_color = args.contains(&"--no-color".to_string());
    let pretty = args.contains(&"--pretty".to_string());
    let ast = args.contains(&"--ast".to_string());
    let bytecode = args.contains(&"--bc".to_string()) || args.contains(&"--bytecode".to_string());
    let emit_bc = args.contains(&"--emit-bc".to_string());

    // first non-flag argument is the filename
    let filename = args.iter().skip(1).find(|a| !a.starts_with('-'));

    let Some(filename) = filename else {
        print_usage();
        return;
    };

    match Path::new(filename).extension().and_then(|e| e.to_str()) {
        Some("cn") => {}
        Some("cnb") => {
            run_compiled(filename);
            return;
        }
        _ => {
            eprintln!("Error: expected a .cn or .cnb file, got {}", filename);
            std::process::exit(1);
        }
    }

    let source = match fs::read_to_string(filename) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("Failed to read '{}': {}", filename, e);
            std::process::exit(1);
        }
    };

    if tokens_only {
        dump_tokens(&source, no_color, pretty);
    } else if ast {
        print_ast(&source);
    } else if bytecode {
        print_bytecode(&source);
    } else if emit_bc {
        emit_bytecode(&source, filename);
    } else {
        run_program(&source);
    }
}

fn print_usage() {
    println!("CINDER - Imperative Scripting Language");
    println!();
    println!("Usage:");
    println!("  cinder <file.cn>            Run a program");
    println!("  cinder <file.cnb>           Run precompiled bytecode");
    println!("  cinder --tokens <file.cn>   Show tokens only (--no-color, --pretty)");
    println!("  cinder --ast <file.cn>      Show the parsed AST");
    println!("  cinder --bc <file.cn>       Show the compiled bytecode");
    println!("  cinder --emit-bc <file.cn>  Write bytecode next to the source as .cnb");
}

fn dump_tokens(source: &str, no_color: bool, pretty: bool) {
    let mut lexer = Lexer::new(source);

    match lexer.tokenize() {
        Ok(tokens) => {
            let mut dumper = TokenDumper::new();

            if no_color {
                dumper = dumper.no_color();
            }
            if pretty {
                dumper = dumper.pretty();
            }

            dumper.dump(&tokens);
        }
        Err(e) => {
            eprintln!("Lexer error: {}", e);
            std::process::exit(1);
        }
    }
}

fn print_ast(source: &str) {
    let tokens = match Lexer::new(source).tokenize() {
        Ok(tokens) => tokens,
        Err(e) => {
            eprintln!("Lexer error: {}", e);
            std::process::exit(1);
        }
    };

    match Parser::new(tokens).parse() {
        Ok(nodes) => println!("{:#?}", nodes),
        Err(e) => {
            eprintln!("Parse error: {}", e);
            std::process::exit(1);
        }
    }
}

fn print_bytecode(source: &str) {
    match Runner::new().compile(source) {
        Ok(bytecode) => print_bc(&bytecode),
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    }
}

fn emit_bytecode(source: &str, filename: &str) {
    let bytecode = match Runner::new().compile(source) {
        Ok(bytecode) => bytecode,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    let bytes = match postcard::to_allocvec(&bytecode) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("Failed to serialize bytecode: {}", e);
            std::process::exit(1);
        }
    };

    let out = Path::new(filename).with_extension("cnb");
    if let Err(e) = fs::write(&out, bytes) {
        eprintln!("Failed to write '{}': {}", out.display(), e);
        std::process::exit(1);
    }

    println!("Wrote {}", out.display());
}

fn run_compiled(filename: &str) {
    let bytes = match fs::read(filename) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("Failed to read '{}': {}", filename, e);
            std::process::exit(1);
        }
    };

    let bytecode: BytecodeBody = match postcard::from_bytes(&bytes) {
        Ok(bytecode) => bytecode,
        Err(e) => {
            eprintln!("Failed to decode '{}': {}", filename, e);
            std::process::exit(1);
        }
    };

    let mut interpreter = match BytecodeInterpreter::new(bytecode) {
        Ok(interpreter) => interpreter,
        Err(e) => {
            eprintln!("Runtime error: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = interpreter.interpret() {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}

fn run_program(source: &str) {
    if let Err(e) = Runner::new().run(source) {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}
