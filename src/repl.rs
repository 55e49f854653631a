//! Interactive read-eval-print loop. Shares one `VirtualMachine` across
//! submitted lines so top-level `var` declarations and `fun` definitions
//! accumulate the way a real REPL session expects; each line still goes
//! through the same `interpret()` façade script mode uses.

use std::path::PathBuf;

use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use caboose::backend::vm::error::InterpretError;
use caboose::backend::vm::{RunConfig, VirtualMachine};

const HISTORY_FILE: &str = ".caboose_history";

fn history_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(HISTORY_FILE))
}

pub fn run(config: RunConfig) {
    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(e) => {
            eprintln!("Could not start the REPL: {e}");
            return;
        }
    };

    let history_path = history_path();
    if let Some(path) = &history_path {
        let _ = editor.load_history(path);
    }

    let mut vm = VirtualMachine::new(config);

    loop {
        match editor.readline("> ") {
            Ok(line) => {
                if !line.trim().is_empty() {
                    let _ = editor.add_history_entry(line.as_str());
                }
                match vm.interpret(&line) {
                    Ok(()) => {}
                    Err(InterpretError::Compile(_)) => {}
                    Err(InterpretError::Runtime(e)) => e.report(),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("Goodbye.");
                break;
            }
            Err(ReadlineError::Eof) => {
                break;
            }
            Err(e) => {
                eprintln!("Readline error: {e}");
                break;
            }
        }
    }

    if let Some(path) = &history_path {
        let _ = editor.save_history(path);
    }
}
