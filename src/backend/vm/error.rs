//! The two error kinds that cross the interpreter façade. Both carry
//! enough structure for the CLI to pick an exit code and print a
//! `clox`-style diagnostic.

use thiserror::Error;

#[derive(Debug, Error)]
#[error("{0} compile error(s) reported")]
pub struct CompileError(pub usize);

#[derive(Debug, Error)]
#[error("{message}")]
pub struct RuntimeError {
    pub message: String,
    /// Innermost-frame-first, already formatted as `[line L] in name()`.
    pub stack_trace: Vec<String>,
}

impl RuntimeError {
    pub fn new(message: impl Into<String>, stack_trace: Vec<String>) -> RuntimeError {
        RuntimeError {
            message: message.into(),
            stack_trace,
        }
    }

    /// Prints the message followed by the captured stack trace,
    /// innermost frame first, matching `runtimeError`'s unwind order.
    pub fn report(&self) {
        eprintln!("{}", self.message);
        for line in &self.stack_trace {
            eprintln!("{line}");
        }
    }
}

#[derive(Debug, Error)]
pub enum InterpretError {
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}
