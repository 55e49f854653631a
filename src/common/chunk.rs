//! Linear bytecode buffer: a byte stream, a parallel per-byte line-number
//! array, and a constant pool. All three grow independently via `Vec`'s
//! amortized doubling.

use crate::common::value::Value;

#[derive(Default)]
pub struct Chunk {
    pub code: Vec<u8>,
    pub lines: Vec<i32>,
    pub constants: Vec<Value>,
}

impl Chunk {
    pub fn new() -> Chunk {
        Chunk::default()
    }

    pub fn write(&mut self, byte: u8, line: i32) {
        self.code.push(byte);
        self.lines.push(line);
    }

    /// Appends a constant unconditionally (no deduplication) and returns
    /// its index. Callers must verify the index still fits in one byte
    /// before emitting a `CONSTANT` operand.
    pub fn add_constant(&mut self, value: Value) -> usize {
        self.constants.push(value);
        self.constants.len() - 1
    }
}
