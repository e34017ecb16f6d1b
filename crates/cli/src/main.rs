//! Brio CLI
//!
//! Runs a script file, or an interactive line-at-a-time REPL when no file
//! is given. Exit codes follow sysexits conventions: 65 for compile
//! errors, 70 for runtime errors, 74 for unreadable input.

use std::path::{Path, PathBuf};
use std::process;

use clap::Parser;

use brio_runtime::{InterpretResult, Vm, VmOptions};

#[derive(Parser)]
#[command(name = "brio")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Brio interpreter - run scripts or an interactive REPL", long_about = None)]
struct Cli {
    /// Script to run; starts a REPL when omitted
    script: Option<PathBuf>,

    /// Trace each instruction as it executes (to stderr)
    #[arg(long)]
    trace: bool,

    /// Disassemble compiled code before running it
    #[arg(long)]
    print_code: bool,

    /// Collect garbage at every allocation (slow; for debugging)
    #[arg(long)]
    stress_gc: bool,

    /// Log garbage collection activity to stderr
    #[arg(long)]
    log_gc: bool,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.log_gc);

    let options = VmOptions {
        trace_execution: cli.trace,
        print_code: cli.print_code,
        stress_gc: cli.stress_gc,
    };
    let mut vm = Vm::new(options);

    match &cli.script {
        Some(path) => run_file(&mut vm, path),
        None => repl(&mut vm),
    }
}

fn init_tracing(log_gc: bool) {
    use tracing_subscriber::EnvFilter;

    // --log-gc forces the collector's debug events on; otherwise RUST_LOG
    // decides.
    let filter = if log_gc {
        EnvFilter::new("warn,brio_core=debug,brio_runtime=debug")
    } else {
        EnvFilter::from_default_env()
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run_file(vm: &mut Vm, path: &Path) {
    let source = match std::fs::read_to_string(path) {
        Ok(source) => source,
        Err(error) => {
            eprintln!("Could not read \"{}\": {error}.", path.display());
            process::exit(74);
        }
    };
    match vm.interpret(&source) {
        InterpretResult::Ok => {}
        InterpretResult::CompileError => process::exit(65),
        InterpretResult::RuntimeError => process::exit(70),
    }
}

fn repl(vm: &mut Vm) {
    let mut editor = match rustyline::DefaultEditor::new() {
        Ok(editor) => editor,
        Err(error) => {
            eprintln!("Could not start the REPL: {error}.");
            process::exit(74);
        }
    };

    loop {
        match editor.readline("> ") {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(line.as_str());
                // Errors were already reported; the REPL keeps going.
                vm.interpret(&line);
            }
            Err(rustyline::error::ReadlineError::Interrupted)
            | Err(rustyline::error::ReadlineError::Eof) => break,
            Err(error) => {
                eprintln!("REPL input error: {error}.");
                break;
            }
        }
    }
}
