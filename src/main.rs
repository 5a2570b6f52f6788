// Myulax CLI entry point
// Created by: Yuyang Feng <mu_yunaaaa@mail.nwpu.edu.cn>
// Changelog:
// 2026-06-15: Initial version; sysexits-style exit codes, REPL when no script
//            is given (rustyline), env_logger wired to -v / --log-gc

use clap::Parser;
use std::fs;
use std::path::{Path, PathBuf};

use myulax::{InterpretError, VirtualMachine};

#[derive(Parser)]
#[command(name = "myulax")]
#[command(version = "0.1.0")]
#[command(author = "Yuyang Feng && Zimeng Li")]
#[command(about = "Myulax: a class-extended Lua dialect compiler and VM", long_about = None)]
struct Cli {
    /// Script to run (.mlx); omit to start the REPL
    script: Option<PathBuf>,

    /// Verbose compiler/VM phase logging
    #[arg(short, long)]
    verbose: bool,

    /// Disassemble the compiled script before running it
    #[arg(long)]
    dump_bytecode: bool,

    /// Print each instruction and the stack while executing
    #[arg(long)]
    trace: bool,

    /// Log garbage collector cycles
    #[arg(long)]
    log_gc: bool,
}

const EXIT_OK: i32 = 0;
const EXIT_USAGE: i32 = 64;
const EXIT_COMPILE: i32 = 65;
const EXIT_RUNTIME: i32 = 70;
const EXIT_IO: i32 = 74;

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            use clap::error::ErrorKind;
            let code = match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => EXIT_OK,
                _ => EXIT_USAGE,
            };
            let _ = err.print();
            std::process::exit(code);
        }
    };

    init_logging(&cli);

    let mut vm = VirtualMachine::new();
    vm.trace = cli.trace;
    vm.dump_bytecode = cli.dump_bytecode;

    let code = match &cli.script {
        Some(path) => run_script(&mut vm, path),
        None => repl(&mut vm),
    };
    std::process::exit(code);
}

fn init_logging(cli: &Cli) {
    let mut builder = env_logger::Builder::from_default_env();
    if cli.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    if cli.log_gc {
        builder.filter(Some("gc"), log::LevelFilter::Debug);
    }
    let _ = builder.try_init();
}

fn run_script(vm: &mut VirtualMachine, path: &Path) -> i32 {
    let source = match fs::read_to_string(path) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("[Error] cannot read {}: {}", path.display(), err);
            return EXIT_IO;
        }
    };

    // require() resolves modules relative to the script
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            vm.module_root = parent.to_path_buf();
        }
    }

    let origin = path.display().to_string();
    match vm.interpret(&source, &origin) {
        Ok(()) => EXIT_OK,
        Err(InterpretError::Compile(_)) => EXIT_COMPILE,
        Err(InterpretError::Runtime(_)) => EXIT_RUNTIME,
    }
}

fn repl(vm: &mut VirtualMachine) -> i32 {
    let mut editor = match rustyline::DefaultEditor::new() {
        Ok(editor) => editor,
        Err(err) => {
            eprintln!("[Error] cannot initialize the line editor: {}", err);
            return EXIT_IO;
        }
    };

    println!("Myulax 0.1.0 -- type 'exit' to leave");
    loop {
        match editor.readline("> ") {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed == "exit" {
                    return EXIT_OK;
                }
                if trimmed.is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(&line);
                // diagnostics and runtime traces already went to stderr
                let _ = vm.interpret(&line, "repl");
            }
            Err(rustyline::error::ReadlineError::Interrupted) => continue,
            Err(rustyline::error::ReadlineError::Eof) => return EXIT_OK,
            Err(err) => {
                eprintln!("[Error] REPL input failed: {}", err);
                return EXIT_IO;
            }
        }
    }
}
