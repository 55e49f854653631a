//! Class/instance opcodes: construction, inheritance, method binding,
//! and field access.

use crate::common::object::{Obj, ObjKind};

use super::super::error::RuntimeError;
use super::super::VirtualMachine;

impl VirtualMachine {
    pub(crate) fn define_method(&mut self, name: *mut Obj) {
        let method = self.pop();
        let class = self.peek(0).as_obj();
        match unsafe { &(*class).kind } {
            ObjKind::Class(c) => {
                c.borrow_mut().methods.set(name, method);
            }
            _ => unreachable!("define_method only runs with a class on top of the stack"),
        }
    }

    /// `OP_INHERIT`: flattens the superclass's method table into the
    /// subclass's own, shallow and non-indirect. The compiler rejects a
    /// class inheriting from itself before this ever runs.
    pub(crate) fn op_inherit(&mut self) -> Result<(), RuntimeError> {
        let superclass = self.peek(1);
        if !superclass.is_obj() || !matches!(unsafe { &(*superclass.as_obj()).kind }, ObjKind::Class(_)) {
            return Err(self.runtime_error("Superclass must be a class."));
        }
        let subclass = self.peek(0).as_obj();
        let super_ptr = superclass.as_obj();
        let super_methods = match unsafe { &(*super_ptr).kind } {
            ObjKind::Class(c) => {
                let c = c.borrow();
                let mut copy = crate::common::table::Table::new();
                copy.add_all(&c.methods);
                copy
            }
            _ => unreachable!(),
        };
        match unsafe { &(*subclass).kind } {
            ObjKind::Class(c) => c.borrow_mut().methods.add_all(&super_methods),
            _ => unreachable!("op_inherit only runs with a class on top of the stack"),
        }
        self.pop(); // subclass; superclass stays bound to the enclosing `super` local
        Ok(())
    }

    pub(crate) fn get_property(&mut self, name: *mut Obj) -> Result<(), RuntimeError> {
        let receiver = self.peek(0);
        if !receiver.is_obj() {
            return Err(self.runtime_error("Only instances have properties."));
        }
        let ptr = receiver.as_obj();
        let (class, field) = match unsafe { &(*ptr).kind } {
            ObjKind::Instance(i) => {
                let i = i.borrow();
                (i.class, i.fields.get(name))
            }
            _ => return Err(self.runtime_error("Only instances have properties.")),
        };
        if let Some(value) = field {
            self.pop();
            self.push(value);
            return Ok(());
        }
        self.pop();
        self.push(receiver);
        self.bind_method(class, name)
    }

    pub(crate) fn set_property(&mut self, name: *mut Obj) -> Result<(), RuntimeError> {
        let receiver = self.peek(1);
        if !receiver.is_obj() || !matches!(unsafe { &(*receiver.as_obj()).kind }, ObjKind::Instance(_)) {
            return Err(self.runtime_error("Only instances have fields."));
        }
        let value = self.pop();
        let instance = self.pop().as_obj();
        match unsafe { &(*instance).kind } {
            ObjKind::Instance(i) => {
                i.borrow_mut().fields.set(name, value);
            }
            _ => unreachable!(),
        }
        self.push(value);
        Ok(())
    }

    pub(crate) fn get_super(&mut self, name: *mut Obj) -> Result<(), RuntimeError> {
        let superclass = self.pop().as_obj();
        self.bind_method(superclass, name)
    }
}
