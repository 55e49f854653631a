//! Central dispatch loop: fetch-decode-execute over a `Chunk`'s byte
//! stream. Opcode handling is split across sibling modules by category;
//! this file owns the loop itself plus the handful of opcodes
//! (constants, locals, globals, jumps' direct table entries) too small
//! to warrant their own file.

mod arithmetic;
mod calls;
mod classes;
mod control;
mod stack_ops;

use std::io::Write;

use crate::common::object::{Obj, ObjClosure, ObjKind, UpvalueLocation};
use crate::common::opcode::OpCode;
use crate::common::value::Value;

use super::error::RuntimeError;
use super::VirtualMachine;

impl VirtualMachine {
    fn read_byte(&mut self) -> u8 {
        let closure = self.current_frame().closure;
        let function = self.closure_function(closure);
        let frame = self.current_frame_mut();
        let byte = function.chunk.code[frame.ip];
        frame.ip += 1;
        byte
    }

    fn read_constant(&mut self) -> Value {
        let idx = self.read_byte() as usize;
        let closure = self.current_frame().closure;
        let function = self.closure_function(closure);
        function.chunk.constants[idx]
    }

    fn read_string(&mut self) -> *mut Obj {
        self.read_constant().as_obj()
    }

    fn closure_upvalue(&self, closure: *mut Obj, index: usize) -> *mut Obj {
        // SAFETY: closure is the currently executing frame's closure,
        // rooted by that frame for the duration of this call.
        match unsafe { &(*closure).kind } {
            ObjKind::Closure(c) => c.upvalues[index],
            _ => unreachable!("closure_upvalue is only called with a Closure"),
        }
    }
}

/// Drives the VM from whatever frame `interpret` just pushed until every
/// frame returns (program end) or a runtime error unwinds the stack.
pub(crate) fn run(vm: &mut VirtualMachine) -> Result<(), RuntimeError> {
    loop {
        let op = OpCode::from_byte(vm.read_byte());
        match op {
            OpCode::Constant => {
                let v = vm.read_constant();
                vm.push(v);
            }
            OpCode::Nil => vm.push(Value::nil()),
            OpCode::True => vm.push(Value::bool(true)),
            OpCode::False => vm.push(Value::bool(false)),
            OpCode::Pop => {
                vm.pop();
            }
            OpCode::GetLocal => {
                let slot = vm.read_byte() as usize;
                let base = vm.current_frame().slot_base;
                vm.push(vm.stack[base + slot]);
            }
            OpCode::SetLocal => {
                let slot = vm.read_byte() as usize;
                let base = vm.current_frame().slot_base;
                vm.stack[base + slot] = vm.peek(0);
            }
            OpCode::GetGlobal => {
                let name = vm.read_string();
                match vm.globals.get(name) {
                    Some(v) => vm.push(v),
                    None => {
                        let n = unsafe { format!("{}", &*name) };
                        return Err(vm.runtime_error(format!("Undefined variable '{n}'.")));
                    }
                }
            }
            OpCode::DefineGlobal => {
                let name = vm.read_string();
                let v = vm.pop();
                vm.globals.set(name, v);
            }
            OpCode::SetGlobal => {
                let name = vm.read_string();
                let v = vm.peek(0);
                if vm.globals.set(name, v) {
                    vm.globals.delete(name);
                    let n = unsafe { format!("{}", &*name) };
                    return Err(vm.runtime_error(format!("Undefined variable '{n}'.")));
                }
            }
            OpCode::GetUpvalue => {
                let slot = vm.read_byte() as usize;
                let closure = vm.current_frame().closure;
                let upvalue = vm.closure_upvalue(closure, slot);
                let value = match unsafe { &(*upvalue).kind } {
                    ObjKind::Upvalue(u) => match u.location.get() {
                        UpvalueLocation::Open(p) => unsafe { *p },
                        UpvalueLocation::Closed(v) => v,
                    },
                    _ => unreachable!(),
                };
                vm.push(value);
            }
            OpCode::SetUpvalue => {
                let slot = vm.read_byte() as usize;
                let closure = vm.current_frame().closure;
                let upvalue = vm.closure_upvalue(closure, slot);
                let value = vm.peek(0);
                match unsafe { &(*upvalue).kind } {
                    ObjKind::Upvalue(u) => match u.location.get() {
                        UpvalueLocation::Open(p) => unsafe { *p = value },
                        UpvalueLocation::Closed(_) => {
                            u.location.set(UpvalueLocation::Closed(value));
                        }
                    },
                    _ => unreachable!(),
                }
            }
            OpCode::GetProperty => {
                let name = vm.read_string();
                vm.get_property(name)?;
            }
            OpCode::SetProperty => {
                let name = vm.read_string();
                vm.set_property(name)?;
            }
            OpCode::GetSuper => {
                let name = vm.read_string();
                vm.get_super(name)?;
            }
            OpCode::Equal => vm.op_equal(),
            OpCode::Greater => vm.op_greater()?,
            OpCode::Less => vm.op_less()?,
            OpCode::Add => vm.op_add()?,
            OpCode::Subtract => vm.op_subtract()?,
            OpCode::Multiply => vm.op_multiply()?,
            OpCode::Divide => vm.op_divide()?,
            OpCode::Not => vm.op_not(),
            OpCode::Negate => vm.op_negate()?,
            OpCode::Print => {
                let v = vm.pop();
                let _ = writeln!(vm.heap.output, "{v}");
            }
            OpCode::Jump => {
                let offset = vm.read_u16();
                vm.jump(offset);
            }
            OpCode::JumpIfFalse => {
                let offset = vm.read_u16();
                if crate::common::value::is_falsey(vm.peek(0)) {
                    vm.jump(offset);
                }
            }
            OpCode::Loop => {
                let offset = vm.read_u16();
                vm.loop_back(offset);
            }
            OpCode::Call => {
                let argc = vm.read_byte() as usize;
                vm.call_value(argc)?;
            }
            OpCode::Invoke => {
                let name = vm.read_string();
                let argc = vm.read_byte() as usize;
                vm.invoke(name, argc)?;
            }
            OpCode::Super => {
                let name = vm.read_string();
                let argc = vm.read_byte() as usize;
                let superclass = vm.pop().as_obj();
                vm.invoke_from_class(superclass, name, argc)?;
            }
            OpCode::Closure => {
                let function_val = vm.read_constant();
                let function_obj = function_val.as_obj();
                let upvalue_count = match unsafe { &(*function_obj).kind } {
                    ObjKind::Function(f) => f.upvalue_count,
                    _ => unreachable!("CLOSURE operand always names a Function constant"),
                };
                let mut upvalues = Vec::with_capacity(upvalue_count);
                for _ in 0..upvalue_count {
                    let is_local = vm.read_byte() != 0;
                    let index = vm.read_byte() as usize;
                    if is_local {
                        let base = vm.current_frame().slot_base;
                        upvalues.push(vm.capture_upvalue(base + index));
                    } else {
                        let closure = vm.current_frame().closure;
                        upvalues.push(vm.closure_upvalue(closure, index));
                    }
                }
                let closure = vm.heap.alloc_closure(ObjClosure {
                    function: function_obj,
                    upvalues,
                });
                vm.push(Value::obj(closure));
                vm.collect_garbage_if_needed();
            }
            OpCode::CloseUpvalue => {
                vm.close_upvalues(vm.stack_top - 1);
                vm.pop();
            }
            OpCode::Return => {
                let result = vm.pop();
                let base = vm.current_frame().slot_base;
                vm.close_upvalues(base);
                vm.frames.pop();
                if vm.frames.is_empty() {
                    vm.pop();
                    return Ok(());
                }
                vm.stack_top = base;
                vm.push(result);
            }
            OpCode::Class => {
                let name = vm.read_string();
                let class = vm.heap.alloc_class(name, None);
                vm.push(Value::obj(class));
                vm.collect_garbage_if_needed();
            }
            OpCode::Inherit => vm.op_inherit()?,
            OpCode::Method => {
                let name = vm.read_string();
                vm.define_method(name);
            }
            OpCode::Import => {
                return Err(vm.runtime_error("Imports are not supported."));
            }
        }
    }
}
