use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use colored::Colorize;
use structopt::StructOpt;
use tracing_subscriber::EnvFilter;

use corvid::{InterpretError, Syntax, Trace, Vm};

/// A bytecode interpreter for the corvid scripting language.
///
/// Run with no arguments to start a REPL, or pass a single source file to
/// execute it.
#[derive(StructOpt, Debug)]
#[structopt(name = "corvid")]
struct Opt {
    /// Source file to run. Omit to start a REPL.
    path: Option<PathBuf>,

    /// Raise tracing verbosity to `trace`, overriding `CORVID_LOG`.
    #[structopt(long)]
    trace: bool,
}

fn init_tracing(force_trace: bool) {
    let filter = if force_trace {
        EnvFilter::new("trace")
    } else {
        EnvFilter::try_from_env("CORVID_LOG").unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(io::stderr).init();
}

fn report_compile_errors(errors: &[Syntax]) {
    for error in errors {
        eprintln!("{}", error.to_string().red());
    }
}

fn report_runtime_error(trace: &Trace) {
    eprintln!("{}", trace.to_string().red());
}

/// Reads and runs a single file, returning the process exit code.
fn run_file(vm: &mut Vm, path: &Path) -> i32 {
    let source = match std::fs::read_to_string(path) {
        Ok(source) => source,
        Err(error) => {
            eprintln!("{}", format!("Error: could not read '{}': {}", path.display(), error).red());
            return 74;
        }
    };
    match vm.interpret(&source) {
        Ok(()) => 0,
        Err(InterpretError::Compile(errors)) => {
            report_compile_errors(&errors);
            65
        }
        Err(InterpretError::Runtime(trace)) => {
            report_runtime_error(&trace);
            70
        }
    }
}

/// Reads lines from stdin, interpreting each on the same persistent `Vm`,
/// until EOF. Errors are reported but never stop the loop.
fn run_repl(vm: &mut Vm) -> i32 {
    let stdin = io::stdin();
    loop {
        print!("> ");
        if io::stdout().flush().is_err() {
            break;
        }
        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => (),
            Err(_) => break,
        }
        match vm.interpret(&line) {
            Ok(()) => (),
            Err(InterpretError::Compile(errors)) => report_compile_errors(&errors),
            Err(InterpretError::Runtime(trace)) => report_runtime_error(&trace),
        }
    }
    0
}

fn main() {
    let opt = Opt::from_args();
    init_tracing(opt.trace);

    let mut vm = Vm::new();
    if std::env::var("CORVID_GC_STRESS").as_deref() == Ok("1") {
        vm.set_gc_stress(true);
    }

    let code = match &opt.path {
        Some(path) => run_file(&mut vm, path),
        None => run_repl(&mut vm),
    };
    std::process::exit(code);
}
