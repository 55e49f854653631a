//! Value representation, selected at compile time between a plain tagged
//! union (default) and a 64-bit NaN-boxed encoding (`nan_boxing` feature).
//! Both modules expose the identical API below; nothing outside this
//! module is allowed to depend on which one is active.

#[cfg(not(feature = "nan_boxing"))]
mod tagged;
#[cfg(not(feature = "nan_boxing"))]
pub use tagged::Value;

#[cfg(feature = "nan_boxing")]
mod nanbox;
#[cfg(feature = "nan_boxing")]
pub use nanbox::Value;

use crate::common::object::ObjKind;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Nil,
    Bool,
    Number,
    Obj,
}

/// Falsey per spec: only `nil` and `false` are falsey, everything else
/// (including `0` and `""`) is truthy.
pub fn is_falsey(v: Value) -> bool {
    v.is_nil() || (v.is_bool() && !v.as_bool())
}

/// Equality rule: non-object values compare by value; object equality is
/// reference identity (strings fall out of interning) except lists and
/// dicts, which compare structurally.
pub fn values_equal(a: Value, b: Value) -> bool {
    match (a.kind(), b.kind()) {
        (ValueKind::Nil, ValueKind::Nil) => true,
        (ValueKind::Bool, ValueKind::Bool) => a.as_bool() == b.as_bool(),
        (ValueKind::Number, ValueKind::Number) => a.as_number() == b.as_number(),
        (ValueKind::Obj, ValueKind::Obj) => {
            let (pa, pb) = (a.as_obj(), b.as_obj());
            if pa == pb {
                return true;
            }
            // SAFETY: both pointers are live heap objects reachable from
            // a root, guaranteed by the caller (the VM never compares
            // dangling values).
            unsafe {
                match (&(*pa).kind, &(*pb).kind) {
                    (ObjKind::List(la), ObjKind::List(lb)) => {
                        let la = la.borrow();
                        let lb = lb.borrow();
                        la.items.len() == lb.items.len()
                            && la
                                .items
                                .iter()
                                .zip(lb.items.iter())
                                .all(|(x, y)| values_equal(*x, *y))
                    }
                    (ObjKind::Dict(da), ObjKind::Dict(db)) => {
                        let da = da.borrow();
                        let db = db.borrow();
                        da.table.structurally_equal(&db.table)
                    }
                    _ => false,
                }
            }
        }
        _ => false,
    }
}

pub fn format_value(v: Value, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match v.kind() {
        ValueKind::Nil => write!(f, "nil"),
        ValueKind::Bool => write!(f, "{}", v.as_bool()),
        ValueKind::Number => write!(f, "{}", v.as_number()),
        ValueKind::Obj => {
            let ptr = v.as_obj();
            // SAFETY: live heap object, see values_equal.
            unsafe { fmt::Display::fmt(&*ptr, f) }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        format_value(*self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::vm::heap::Heap;

    #[test]
    fn falsey_rule_matches_only_nil_and_false() {
        assert!(is_falsey(Value::nil()));
        assert!(is_falsey(Value::bool(false)));
        assert!(!is_falsey(Value::bool(true)));
        assert!(!is_falsey(Value::number(0.0)));
    }

    #[test]
    fn numbers_and_bools_compare_by_value() {
        assert!(values_equal(Value::number(1.0), Value::number(1.0)));
        assert!(!values_equal(Value::number(1.0), Value::number(2.0)));
        assert!(values_equal(Value::bool(true), Value::bool(true)));
        assert!(values_equal(Value::nil(), Value::nil()));
    }

    #[test]
    fn interned_strings_compare_by_identity_and_content() {
        let mut heap = Heap::new(false);
        let a = heap.copy_string("hello");
        let b = heap.copy_string("hello");
        assert_eq!(a, b, "equal strings intern to the same object");
        assert!(values_equal(Value::obj(a), Value::obj(b)));
    }

    #[test]
    fn lists_compare_structurally_not_by_identity() {
        let mut heap = Heap::new(false);
        let a = heap.alloc_list(vec![Value::number(1.0), Value::number(2.0)]);
        let b = heap.alloc_list(vec![Value::number(1.0), Value::number(2.0)]);
        let c = heap.alloc_list(vec![Value::number(1.0), Value::number(3.0)]);
        assert_ne!(a, b, "distinct allocations");
        assert!(values_equal(Value::obj(a), Value::obj(b)));
        assert!(!values_equal(Value::obj(a), Value::obj(c)));
    }

    #[test]
    fn dicts_compare_structurally() {
        let mut heap = Heap::new(false);
        let key = heap.copy_string("k");
        let a = heap.alloc_dict();
        let b = heap.alloc_dict();
        match unsafe { &(*a).kind } {
            crate::common::object::ObjKind::Dict(d) => d.borrow_mut().table.set(key, Value::number(1.0)),
            _ => unreachable!(),
        };
        match unsafe { &(*b).kind } {
            crate::common::object::ObjKind::Dict(d) => d.borrow_mut().table.set(key, Value::number(1.0)),
            _ => unreachable!(),
        };
        assert!(values_equal(Value::obj(a), Value::obj(b)));
    }
}
