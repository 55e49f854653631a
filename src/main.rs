use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use caboose::backend::vm::error::InterpretError;
use caboose::backend::vm::{RunConfig, VirtualMachine};

mod repl;

#[derive(Parser)]
#[command(name = "caboose")]
#[command(version = "0.1.0")]
#[command(about = "Caboose: a stack-based bytecode VM", long_about = None)]
struct Cli {
    /// Script file to run. Omit to start the REPL.
    args: Vec<PathBuf>,

    /// Force a GC cycle on every allocation (only meaningful when built
    /// with the `stress_gc` feature; otherwise a no-op warning).
    #[arg(long)]
    stress_gc: bool,

    /// Raise the tracing verbosity (equivalent to `RUST_LOG=debug`).
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    install_logging(cli.verbose);

    if cli.stress_gc && !cfg!(feature = "stress_gc") {
        eprintln!("warning: --stress-gc has no effect; build with --features stress_gc to enable it");
    }

    let config = RunConfig {
        stress_gc: cli.stress_gc || cfg!(feature = "stress_gc"),
    };

    match cli.args.as_slice() {
        [] => {
            repl::run(config);
            ExitCode::from(0)
        }
        [path] => run_file(path, config),
        _ => {
            eprintln!("Usage: caboose [path]");
            ExitCode::from(64)
        }
    }
}

fn install_logging(verbose: bool) {
    use tracing_subscriber::EnvFilter;
    let default_filter = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn run_file(path: &PathBuf, config: RunConfig) -> ExitCode {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("Could not read file \"{}\": {e}", path.display());
            return ExitCode::from(74);
        }
    };
    let source = String::from_utf8_lossy(&bytes);

    let mut vm = VirtualMachine::new(config);
    match vm.interpret(&source) {
        Ok(()) => ExitCode::from(0),
        Err(InterpretError::Compile(_)) => ExitCode::from(65),
        Err(InterpretError::Runtime(e)) => {
            e.report();
            ExitCode::from(70)
        }
    }
}
