//! Shared test harness: a cloneable in-memory `Write` sink so a test can
//! hand the VM ownership of one half and read back the other, plus a
//! helper that runs a source string to completion and returns captured
//! stdout as a `String`.

use std::io;
use std::sync::{Arc, Mutex};

use caboose::backend::vm::{RunConfig, VirtualMachine};

#[derive(Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn new() -> SharedBuffer {
        SharedBuffer::default()
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Runs `source` against a fresh VM and returns `(stdout, result)`.
pub fn run(source: &str) -> (String, Result<(), caboose::backend::vm::error::InterpretError>) {
    let mut vm = VirtualMachine::new(RunConfig::default());
    let sink = SharedBuffer::new();
    vm.set_output(Box::new(sink.clone()));
    let result = vm.interpret(source);
    (sink.contents(), result)
}
