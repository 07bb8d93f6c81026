use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;

use tolo::backend::{InterpretResult, LogLevel, Vm};

#[derive(Parser)]
#[command(name = "tolo")]
#[command(version)]
#[command(about = "A bytecode compiler and stack VM for a small Lox-family scripting language", long_about = None)]
struct Cli {
    /// Script to execute. Omit to start the REPL.
    path: Option<PathBuf>,

    /// Diagnostic verbosity.
    #[arg(short, long, value_enum, default_value_t = LogLevel::Release)]
    mode: LogLevel,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let mut vm = Vm::new(cli.mode);

    match cli.path {
        Some(path) => run_file(&mut vm, &path),
        None => run_repl(&mut vm),
    }
}

fn run_file(vm: &mut Vm, path: &Path) -> ExitCode {
    let source = match fs::read_to_string(path) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("Could not read file '{}': {err}", path.display());
            return ExitCode::from(74);
        }
    };

    match vm.interpret(&source) {
        InterpretResult::Ok => ExitCode::SUCCESS,
        InterpretResult::CompileError => ExitCode::from(65),
        InterpretResult::RuntimeError => ExitCode::from(70),
    }
}

fn run_repl(vm: &mut Vm) -> ExitCode {
    let stdin = io::stdin();
    let mut buffer = String::new();

    loop {
        buffer.clear();
        print!("> ");
        if io::stdout().flush().is_err() {
            return ExitCode::from(74);
        }

        if !read_balanced_input(&stdin, &mut buffer) {
            println!();
            return ExitCode::SUCCESS;
        }
        if buffer.trim().is_empty() {
            continue;
        }

        vm.interpret(&buffer);
        vm.reset_stacks();
    }
}

/// Reads one line, then keeps reading `.. `-prefixed continuation lines
/// while brace balance is nonzero (spec.md 6). Returns `false` on EOF
/// before anything was read.
fn read_balanced_input(stdin: &io::Stdin, buffer: &mut String) -> bool {
    let mut line = String::new();
    if stdin.read_line(&mut line).unwrap_or(0) == 0 {
        return false;
    }
    buffer.push_str(&line);

    while brace_balance(buffer) > 0 {
        print!(".. ");
        if io::stdout().flush().is_err() {
            break;
        }
        line.clear();
        if stdin.read_line(&mut line).unwrap_or(0) == 0 {
            break;
        }
        buffer.push_str(&line);
    }
    true
}

fn brace_balance(source: &str) -> i32 {
    let mut balance = 0;
    for c in source.chars() {
        match c {
            '{' => balance += 1,
            '}' => balance -= 1,
            _ => {}
        }
    }
    balance
}
