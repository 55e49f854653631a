//! Polymorphic heap record. Every object shares a common header (GC mark
//! bit, intrusive next-pointer into the VM's object list) and carries a
//! type-tagged payload. No virtual dispatch: GC tracing and printing
//! both match on `ObjKind` directly.

use std::cell::{Cell, RefCell};
use std::fmt;

use crate::backend::vm::heap::Heap;
use crate::common::chunk::Chunk;
use crate::common::table::Table;
use crate::common::value::Value;

pub type NativeFn = fn(&mut Heap, &[Value]) -> Result<Value, String>;
pub type NativeVoidFn = fn(&mut Heap, &[Value]) -> Result<bool, String>;

pub struct Obj {
    pub kind: ObjKind,
    pub is_marked: Cell<bool>,
    pub next: Cell<*mut Obj>,
}

pub enum ObjKind {
    String(ObjString),
    Function(ObjFunction),
    Closure(ObjClosure),
    Upvalue(ObjUpvalue),
    Native(ObjNative),
    NativeVoid(ObjNativeVoid),
    Class(RefCell<ObjClass>),
    Instance(RefCell<ObjInstance>),
    BoundMethod(ObjBoundMethod),
    List(RefCell<ObjList>),
    Dict(RefCell<ObjDict>),
}

pub struct ObjString {
    pub chars: String,
    pub hash: u32,
}

pub struct ObjFunction {
    pub arity: u8,
    pub upvalue_count: usize,
    pub chunk: Chunk,
    /// `None` for the implicit top-level script function.
    pub name: Option<*mut Obj>,
}

pub struct ObjClosure {
    pub function: *mut Obj,
    pub upvalues: Vec<*mut Obj>,
}

#[derive(Clone, Copy)]
pub enum UpvalueLocation {
    /// Points at a live slot in the VM's value stack.
    Open(*mut Value),
    /// The variable has left scope; the value now lives here.
    Closed(Value),
}

pub struct ObjUpvalue {
    pub location: Cell<UpvalueLocation>,
    /// Intrusive next-pointer for the VM's open-upvalue list, kept
    /// sorted by descending stack-slot address. Distinct from the
    /// object header's `next`, which threads the main GC list.
    pub open_next: Cell<*mut Obj>,
}

pub struct ObjNative {
    pub name: *mut Obj,
    pub function: NativeFn,
}

pub struct ObjNativeVoid {
    pub name: *mut Obj,
    pub function: NativeVoidFn,
}

pub struct ObjClass {
    pub name: *mut Obj,
    pub methods: Table,
    pub superclass: Option<*mut Obj>,
}

pub struct ObjInstance {
    pub class: *mut Obj,
    pub fields: Table,
}

pub struct ObjBoundMethod {
    pub receiver: Value,
    pub method: *mut Obj,
}

pub struct ObjList {
    pub items: Vec<Value>,
}

pub struct ObjDict {
    pub table: Table,
}

/// Human-readable opcode-adjacent name for diagnostics (`"function"`,
/// `"class"`, ...), matching the vocabulary runtime error messages use.
pub fn kind_name(kind: &ObjKind) -> &'static str {
    match kind {
        ObjKind::String(_) => "string",
        ObjKind::Function(_) => "function",
        ObjKind::Closure(_) => "function",
        ObjKind::Upvalue(_) => "upvalue",
        ObjKind::Native(_) => "native function",
        ObjKind::NativeVoid(_) => "native function",
        ObjKind::Class(_) => "class",
        ObjKind::Instance(_) => "instance",
        ObjKind::BoundMethod(_) => "function",
        ObjKind::List(_) => "list",
        ObjKind::Dict(_) => "dict",
    }
}

impl fmt::Display for Obj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ObjKind::String(s) => write!(f, "{}", s.chars),
            ObjKind::Function(fun) => match fun.name {
                Some(name_obj) => {
                    // SAFETY: function names are interned strings kept
                    // alive for at least as long as the function itself.
                    let name = unsafe { &*name_obj };
                    write!(f, "<fn {}>", name)
                }
                None => write!(f, "<script>"),
            },
            ObjKind::Closure(c) => {
                // SAFETY: a closure's function pointer is a GC root
                // while the closure itself is reachable.
                let fun = unsafe { &*c.function };
                write!(f, "{fun}")
            }
            ObjKind::Upvalue(_) => write!(f, "upvalue"),
            ObjKind::Native(n) => {
                let name = unsafe { &*n.name };
                write!(f, "<native fn {name}>")
            }
            ObjKind::NativeVoid(n) => {
                let name = unsafe { &*n.name };
                write!(f, "<native fn {name}>")
            }
            ObjKind::Class(c) => {
                let c = c.borrow();
                let name = unsafe { &*c.name };
                write!(f, "{name}")
            }
            ObjKind::Instance(i) => {
                let i = i.borrow();
                let class = unsafe { &*i.class };
                match &class.kind {
                    ObjKind::Class(c) => {
                        let c = c.borrow();
                        let name = unsafe { &*c.name };
                        write!(f, "{name} instance")
                    }
                    _ => unreachable!("instance.class always points at a Class object"),
                }
            }
            ObjKind::BoundMethod(b) => {
                let method = unsafe { &*b.method };
                write!(f, "{method}")
            }
            ObjKind::List(l) => {
                let l = l.borrow();
                write!(f, "[")?;
                for (i, v) in l.items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "]")
            }
            ObjKind::Dict(d) => {
                let d = d.borrow();
                write!(f, "{{")?;
                let mut first = true;
                for (key, value) in d.table.iter() {
                    if !first {
                        write!(f, ", ")?;
                    }
                    first = false;
                    let key_obj = unsafe { &*key };
                    write!(f, "{key_obj}: {value}")?;
                }
                write!(f, "}}")
            }
        }
    }
}
