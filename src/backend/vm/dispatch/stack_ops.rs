//! Upvalue capture/close and the handful of opcodes that touch the
//! value stack directly rather than through the calling convention.

use crate::common::object::{Obj, ObjKind, ObjUpvalue, UpvalueLocation};
use crate::common::value::Value;

use super::super::VirtualMachine;

impl VirtualMachine {
    /// Finds or creates the open upvalue for `slot`, maintaining the
    /// list's descending-by-address order so later searches and
    /// `close_upvalues` can both terminate early.
    pub(crate) fn capture_upvalue(&mut self, slot: usize) -> *mut Obj {
        let target: *mut Value = unsafe { self.stack.as_mut_ptr().add(slot) };

        let mut previous: *mut Obj = std::ptr::null_mut();
        let mut current = self.open_upvalues;
        while !current.is_null() {
            let upvalue = upvalue_of(current);
            let current_ptr = match upvalue.location.get() {
                UpvalueLocation::Open(p) => p,
                UpvalueLocation::Closed(_) => {
                    unreachable!("open_upvalues list only holds open upvalues")
                }
            };
            if current_ptr == target {
                return current;
            }
            if current_ptr < target {
                break;
            }
            previous = current;
            current = upvalue.open_next.get();
        }

        let created = self.heap.alloc_upvalue(UpvalueLocation::Open(target));
        upvalue_of(created).open_next.set(current);
        if previous.is_null() {
            self.open_upvalues = created;
        } else {
            upvalue_of(previous).open_next.set(created);
        }
        self.collect_garbage_if_needed();
        created
    }

    /// Closes every open upvalue at or above `from` (descending-address
    /// order means they form a contiguous prefix of the list).
    pub(crate) fn close_upvalues(&mut self, from: usize) {
        let from_ptr: *mut Value = unsafe { self.stack.as_mut_ptr().add(from) };
        while !self.open_upvalues.is_null() {
            let upvalue = upvalue_of(self.open_upvalues);
            let location = match upvalue.location.get() {
                UpvalueLocation::Open(p) => p,
                UpvalueLocation::Closed(_) => break,
            };
            if location < from_ptr {
                break;
            }
            let value = unsafe { *location };
            upvalue.location.set(UpvalueLocation::Closed(value));
            self.open_upvalues = upvalue.open_next.get();
        }
    }
}

fn upvalue_of<'a>(obj: *mut Obj) -> &'a ObjUpvalue {
    // SAFETY: every pointer threaded through open_upvalues is an
    // ObjUpvalue for as long as it stays linked.
    match unsafe { &(*obj).kind } {
        ObjKind::Upvalue(u) => u,
        _ => unreachable!("open_upvalues only links Upvalue objects"),
    }
}
