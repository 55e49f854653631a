//! Numeric and string-concatenation opcodes, plus value comparison.

use crate::common::object::ObjKind;
use crate::common::value::{values_equal, Value};

use super::super::error::RuntimeError;
use super::super::VirtualMachine;

impl VirtualMachine {
    pub(crate) fn op_equal(&mut self) {
        let b = self.pop();
        let a = self.pop();
        self.push(Value::bool(values_equal(a, b)));
    }

    pub(crate) fn op_greater(&mut self) -> Result<(), RuntimeError> {
        self.numeric_compare(|a, b| a > b)
    }

    pub(crate) fn op_less(&mut self) -> Result<(), RuntimeError> {
        self.numeric_compare(|a, b| a < b)
    }

    fn numeric_compare(&mut self, op: fn(f64, f64) -> bool) -> Result<(), RuntimeError> {
        if !self.peek(0).is_number() || !self.peek(1).is_number() {
            return Err(self.runtime_error("Operands must be numbers."));
        }
        let b = self.pop().as_number();
        let a = self.pop().as_number();
        self.push(Value::bool(op(a, b)));
        Ok(())
    }

    pub(crate) fn op_add(&mut self) -> Result<(), RuntimeError> {
        let (b, a) = (self.peek(0), self.peek(1));
        if a.is_number() && b.is_number() {
            let b = self.pop().as_number();
            let a = self.pop().as_number();
            self.push(Value::number(a + b));
            Ok(())
        } else if is_string(a) && is_string(b) {
            // a and b stay on the stack (peeked, not popped) while the
            // concatenated string is allocated, so both operands and the
            // new string are rooted for any collection that allocation
            // triggers; only then do the operands come off and the
            // result goes on.
            let concatenated = format!("{a}{b}");
            let obj = self.heap.take_string(concatenated);
            self.pop();
            self.pop();
            self.push(Value::obj(obj));
            self.collect_garbage_if_needed();
            Ok(())
        } else {
            Err(self.runtime_error("Operands must be two numbers or two strings."))
        }
    }

    fn numeric_binary(&mut self, op: fn(f64, f64) -> f64) -> Result<(), RuntimeError> {
        if !self.peek(0).is_number() || !self.peek(1).is_number() {
            return Err(self.runtime_error("Operands must be numbers."));
        }
        let b = self.pop().as_number();
        let a = self.pop().as_number();
        self.push(Value::number(op(a, b)));
        Ok(())
    }

    pub(crate) fn op_subtract(&mut self) -> Result<(), RuntimeError> {
        self.numeric_binary(|a, b| a - b)
    }

    pub(crate) fn op_multiply(&mut self) -> Result<(), RuntimeError> {
        self.numeric_binary(|a, b| a * b)
    }

    pub(crate) fn op_divide(&mut self) -> Result<(), RuntimeError> {
        self.numeric_binary(|a, b| a / b)
    }

    pub(crate) fn op_not(&mut self) {
        let v = self.pop();
        self.push(Value::bool(crate::common::value::is_falsey(v)));
    }

    pub(crate) fn op_negate(&mut self) -> Result<(), RuntimeError> {
        if !self.peek(0).is_number() {
            return Err(self.runtime_error("Operand must be a number."));
        }
        let n = self.pop().as_number();
        self.push(Value::number(-n));
        Ok(())
    }
}

fn is_string(v: Value) -> bool {
    v.is_obj() && matches!(unsafe { &(*v.as_obj()).kind }, ObjKind::String(_))
}
