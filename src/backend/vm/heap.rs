//! The single allocation chokepoint. Every heap object is created here,
//! linked into an intrusive list so the GC can walk every allocation
//! regardless of whether anything still roots it, and counted against a
//! threshold that decides when a collection is due.
//!
//! `Heap` never reaches back into VM state: it can't call into
//! `VirtualMachine::collect_garbage` because that would need a `&mut
//! VirtualMachine` it doesn't hold. Instead every allocating call site in
//! the VM/compiler polls [`Heap::needs_collect`] right after allocating
//! and triggers a collection itself.

use std::cell::{Cell, RefCell};
use std::io::Write;

use crate::common::object::*;
use crate::common::table::Table;
use crate::common::value::Value;

const INITIAL_NEXT_GC: usize = 1024 * 1024;

pub struct Heap {
    objects: *mut Obj,
    pub strings: Table,
    /// Function objects currently under construction by a live
    /// `Compiler` chain. The GC must mark these even though they are not
    /// yet reachable from any VM root.
    pub compiler_roots: Vec<*mut Obj>,
    bytes_allocated: usize,
    next_gc: usize,
    stress_gc: bool,
    /// Sink for `print`/`println`/`OP_PRINT` output. Defaults to real
    /// stdout; swapped for an in-memory buffer by tests that need to
    /// assert on program output without touching the process's stdout.
    pub output: Box<dyn Write>,
}

impl Heap {
    pub fn new(stress_gc: bool) -> Heap {
        Heap {
            objects: std::ptr::null_mut(),
            strings: Table::new(),
            compiler_roots: Vec::new(),
            bytes_allocated: 0,
            next_gc: INITIAL_NEXT_GC,
            stress_gc,
            output: Box::new(std::io::stdout()),
        }
    }

    pub fn set_output(&mut self, output: Box<dyn Write>) {
        self.output = output;
    }

    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated
    }

    pub fn needs_collect(&self) -> bool {
        self.stress_gc || self.bytes_allocated > self.next_gc
    }

    pub fn grow_threshold(&mut self) {
        self.next_gc = self.bytes_allocated * 2;
    }

    pub fn objects_head(&self) -> *mut Obj {
        self.objects
    }

    pub fn set_objects_head(&mut self, head: *mut Obj) {
        self.objects = head;
    }

    fn allocate(&mut self, kind: ObjKind) -> *mut Obj {
        let size = approx_size(&kind);
        let obj = Box::into_raw(Box::new(Obj {
            kind,
            is_marked: Cell::new(false),
            next: Cell::new(self.objects),
        }));
        self.objects = obj;
        self.bytes_allocated += size;
        tracing::trace!(bytes = size, total = self.bytes_allocated, "heap alloc");
        obj
    }

    /// Frees a single object that the GC determined is unreachable.
    /// # Safety
    /// `obj` must not be referenced by anything still live.
    pub unsafe fn free_object(&mut self, obj: *mut Obj) {
        let size = approx_size(&(*obj).kind);
        self.bytes_allocated = self.bytes_allocated.saturating_sub(size);
        drop(Box::from_raw(obj));
    }

    fn fnv1a(bytes: &[u8]) -> u32 {
        let mut hash: u32 = 2166136261;
        for &b in bytes {
            hash ^= b as u32;
            hash = hash.wrapping_mul(16777619);
        }
        hash
    }

    /// Copies `chars` into a freshly owned `String`, interning it if an
    /// equal string already exists.
    pub fn copy_string(&mut self, chars: &str) -> *mut Obj {
        let hash = Self::fnv1a(chars.as_bytes());
        if let Some(existing) = self.strings.find_string(chars, hash) {
            return existing;
        }
        self.intern_new(chars.to_owned(), hash)
    }

    /// Adopts an owned `String` without copying, interning it if an
    /// equal string already exists (in which case the passed-in buffer
    /// is dropped).
    pub fn take_string(&mut self, chars: String) -> *mut Obj {
        let hash = Self::fnv1a(chars.as_bytes());
        if let Some(existing) = self.strings.find_string(&chars, hash) {
            return existing;
        }
        self.intern_new(chars, hash)
    }

    fn intern_new(&mut self, chars: String, hash: u32) -> *mut Obj {
        let obj = self.allocate(ObjKind::String(ObjString { chars, hash }));
        self.strings.set(obj, Value::bool(true));
        obj
    }

    pub fn alloc_function(&mut self, function: ObjFunction) -> *mut Obj {
        self.allocate(ObjKind::Function(function))
    }

    pub fn alloc_closure(&mut self, closure: ObjClosure) -> *mut Obj {
        self.allocate(ObjKind::Closure(closure))
    }

    pub fn alloc_upvalue(&mut self, location: UpvalueLocation) -> *mut Obj {
        self.allocate(ObjKind::Upvalue(ObjUpvalue {
            location: Cell::new(location),
            open_next: Cell::new(std::ptr::null_mut()),
        }))
    }

    pub fn alloc_native(&mut self, name: *mut Obj, function: NativeFn) -> *mut Obj {
        self.allocate(ObjKind::Native(ObjNative { name, function }))
    }

    pub fn alloc_native_void(&mut self, name: *mut Obj, function: NativeVoidFn) -> *mut Obj {
        self.allocate(ObjKind::NativeVoid(ObjNativeVoid { name, function }))
    }

    pub fn alloc_class(&mut self, name: *mut Obj, superclass: Option<*mut Obj>) -> *mut Obj {
        self.allocate(ObjKind::Class(RefCell::new(ObjClass {
            name,
            methods: Table::new(),
            superclass,
        })))
    }

    pub fn alloc_instance(&mut self, class: *mut Obj) -> *mut Obj {
        self.allocate(ObjKind::Instance(RefCell::new(ObjInstance {
            class,
            fields: Table::new(),
        })))
    }

    pub fn alloc_bound_method(&mut self, receiver: Value, method: *mut Obj) -> *mut Obj {
        self.allocate(ObjKind::BoundMethod(ObjBoundMethod { receiver, method }))
    }

    pub fn alloc_list(&mut self, items: Vec<Value>) -> *mut Obj {
        self.allocate(ObjKind::List(RefCell::new(ObjList { items })))
    }

    pub fn alloc_dict(&mut self) -> *mut Obj {
        self.allocate(ObjKind::Dict(RefCell::new(ObjDict {
            table: Table::new(),
        })))
    }
}

fn approx_size(kind: &ObjKind) -> usize {
    use std::mem::size_of_val;
    match kind {
        ObjKind::String(s) => size_of_val(s) + s.chars.len(),
        ObjKind::Function(f) => size_of_val(f) + f.chunk.code.len() + f.chunk.constants.len() * 16,
        ObjKind::Closure(c) => size_of_val(c) + c.upvalues.len() * 8,
        ObjKind::List(l) => size_of_val(l) + l.borrow().items.len() * 16,
        other => std::mem::size_of_val(other),
    }
}
