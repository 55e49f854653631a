//! Caboose: a stack-based bytecode VM for a small dynamically typed,
//! class-based scripting language. See `backend::vm::VirtualMachine` for
//! the execution engine and `frontend::compiler` for the single-pass
//! Pratt compiler that feeds it.

pub mod backend;
pub mod common;
pub mod frontend;
