//! Calling convention: dispatch by callee type, arity checks, frame
//! push/pop, and the fused `INVOKE`/`SUPER` property-plus-call path.

use crate::common::object::ObjKind;
use crate::common::value::Value;

use super::super::error::RuntimeError;
use super::super::{CallFrame, VirtualMachine, FRAMES_MAX};

impl VirtualMachine {
    /// `argc` arguments sit on top of the stack with the callee just
    /// below them, at `stack_top - argc - 1`.
    pub(crate) fn call_value(&mut self, argc: usize) -> Result<(), RuntimeError> {
        let callee = self.peek(argc);
        if !callee.is_obj() {
            return Err(self.runtime_error("Can only call functions and classes."));
        }
        let ptr = callee.as_obj();
        // SAFETY: callee is a live value taken straight off the stack.
        match unsafe { &(*ptr).kind } {
            ObjKind::Closure(_) => self.call(ptr, argc),
            ObjKind::Native(n) => {
                let function = n.function;
                self.call_native(function, argc)
            }
            ObjKind::NativeVoid(n) => {
                let function = n.function;
                self.call_native_void(function, argc)
            }
            ObjKind::Class(_) => self.call_class(ptr, argc),
            ObjKind::BoundMethod(b) => {
                let method = b.method;
                let receiver = b.receiver;
                let slot = self.stack_top - argc - 1;
                self.stack[slot] = receiver;
                self.call(method, argc)
            }
            _ => Err(self.runtime_error("Can only call functions and classes.")),
        }
    }

    pub(crate) fn call(&mut self, closure: *mut crate::common::object::Obj, argc: usize) -> Result<(), RuntimeError> {
        let function = self.closure_function(closure);
        let arity = function.arity as usize;
        if argc != arity {
            return Err(self.runtime_error(format!(
                "Expected {arity} arguments but got {argc}."
            )));
        }
        if self.frames.len() >= FRAMES_MAX {
            return Err(self.runtime_error("Stack overflow."));
        }
        self.frames.push(CallFrame {
            closure,
            ip: 0,
            slot_base: self.stack_top - argc - 1,
        });
        Ok(())
    }

    fn call_native(&mut self, function: crate::common::object::NativeFn, argc: usize) -> Result<(), RuntimeError> {
        let args_start = self.stack_top - argc;
        let result = function(&mut self.heap, &self.stack[args_start..self.stack_top]);
        self.stack_top -= argc + 1;
        match result {
            Ok(v) => {
                self.push(v);
                self.collect_garbage_if_needed();
                Ok(())
            }
            Err(message) => Err(self.runtime_error(message)),
        }
    }

    fn call_native_void(&mut self, function: crate::common::object::NativeVoidFn, argc: usize) -> Result<(), RuntimeError> {
        let args_start = self.stack_top - argc;
        let result = function(&mut self.heap, &self.stack[args_start..self.stack_top]);
        self.stack_top -= argc + 1;
        match result {
            Ok(true) => {
                self.push(Value::nil());
                Ok(())
            }
            Ok(false) => Err(self.runtime_error("Native function reported failure.")),
            Err(message) => Err(self.runtime_error(message)),
        }
    }

    fn call_class(&mut self, class: *mut crate::common::object::Obj, argc: usize) -> Result<(), RuntimeError> {
        let instance = self.heap.alloc_instance(class);
        let slot = self.stack_top - argc - 1;
        self.stack[slot] = Value::obj(instance);
        self.collect_garbage_if_needed();

        let init_string = self.init_string;
        // SAFETY: class is a live value taken straight off the stack.
        let initializer = match unsafe { &(*class).kind } {
            ObjKind::Class(c) => c.borrow().methods.get(init_string),
            _ => unreachable!("call_class is only invoked for Class values"),
        };
        match initializer {
            Some(init) => self.call(init.as_obj(), argc),
            None => {
                if argc != 0 {
                    Err(self.runtime_error(format!("Expected 0 arguments but got {argc}.")))
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Fused `GET_PROPERTY` + `CALL`: looks up a field first (a stored
    /// closure can still be invoked), then falls back to a method call
    /// that skips materializing an intermediate `BoundMethod`.
    pub(crate) fn invoke(&mut self, name: *mut crate::common::object::Obj, argc: usize) -> Result<(), RuntimeError> {
        let receiver = self.peek(argc);
        if !receiver.is_obj() {
            return Err(self.runtime_error("Only instances have methods."));
        }
        let receiver_ptr = receiver.as_obj();
        let (class, field) = match unsafe { &(*receiver_ptr).kind } {
            ObjKind::Instance(i) => {
                let i = i.borrow();
                (i.class, i.fields.get(name))
            }
            _ => return Err(self.runtime_error("Only instances have methods.")),
        };
        if let Some(value) = field {
            let slot = self.stack_top - argc - 1;
            self.stack[slot] = value;
            return self.call_value(argc);
        }
        self.invoke_from_class(class, name, argc)
    }

    pub(crate) fn invoke_from_class(
        &mut self,
        class: *mut crate::common::object::Obj,
        name: *mut crate::common::object::Obj,
        argc: usize,
    ) -> Result<(), RuntimeError> {
        let method = match unsafe { &(*class).kind } {
            ObjKind::Class(c) => c.borrow().methods.get(name),
            _ => unreachable!("invoke_from_class is only called with Class values"),
        };
        match method {
            Some(m) => self.call(m.as_obj(), argc),
            None => {
                let prop_name = unsafe { format!("{}", &*name) };
                Err(self.runtime_error(format!("Undefined property '{prop_name}'.")))
            }
        }
    }

    pub(crate) fn bind_method(
        &mut self,
        class: *mut crate::common::object::Obj,
        name: *mut crate::common::object::Obj,
    ) -> Result<(), RuntimeError> {
        let method = match unsafe { &(*class).kind } {
            ObjKind::Class(c) => c.borrow().methods.get(name),
            _ => unreachable!("bind_method is only called with Class values"),
        };
        let method = match method {
            Some(m) => m.as_obj(),
            None => {
                let prop_name = unsafe { format!("{}", &*name) };
                return Err(self.runtime_error(format!("Undefined property '{prop_name}'.")));
            }
        };
        let receiver = self.pop();
        let bound = self.heap.alloc_bound_method(receiver, method);
        self.push(Value::obj(bound));
        self.collect_garbage_if_needed();
        Ok(())
    }

}
