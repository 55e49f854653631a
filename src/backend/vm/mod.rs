pub mod dispatch;
pub mod error;
pub mod heap;
pub mod natives;

use crate::common::object::{Obj, ObjClosure, ObjFunction, ObjKind, UpvalueLocation};
use crate::common::table::Table;
use crate::common::value::Value;
use error::{CompileError, InterpretError, RuntimeError};
use heap::Heap;

pub const FRAMES_MAX: usize = 64;
pub const STACK_MAX: usize = FRAMES_MAX * 256;

pub struct CallFrame {
    pub closure: *mut Obj,
    pub ip: usize,
    pub slot_base: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct RunConfig {
    pub stress_gc: bool,
}

impl Default for RunConfig {
    fn default() -> RunConfig {
        RunConfig { stress_gc: cfg!(feature = "stress_gc") }
    }
}

pub struct VirtualMachine {
    pub(crate) heap: Heap,
    pub(crate) globals: Table,
    /// Fixed-capacity, never-reallocating value stack: open upvalues hold
    /// raw pointers into its slots, and those pointers must stay valid
    /// for as long as the VM lives.
    pub(crate) stack: Vec<Value>,
    pub(crate) stack_top: usize,
    pub(crate) frames: Vec<CallFrame>,
    pub(crate) open_upvalues: *mut Obj,
    pub(crate) init_string: *mut Obj,
    config: RunConfig,
}

impl VirtualMachine {
    pub fn new(config: RunConfig) -> VirtualMachine {
        let mut heap = Heap::new(config.stress_gc);
        let init_string = heap.copy_string("init");
        let mut vm = VirtualMachine {
            heap,
            globals: Table::new(),
            stack: vec![Value::nil(); STACK_MAX],
            stack_top: 0,
            frames: Vec::with_capacity(FRAMES_MAX),
            open_upvalues: std::ptr::null_mut(),
            init_string,
            config,
        };
        vm.define_natives();
        vm
    }

    fn define_natives(&mut self) {
        for &(name, function) in natives::VALUE_NATIVES {
            let name_obj = self.heap.copy_string(name);
            let native_obj = self.heap.alloc_native(name_obj, function);
            self.globals.set(name_obj, Value::obj(native_obj));
        }
        for &(name, function) in natives::VOID_NATIVES {
            let name_obj = self.heap.copy_string(name);
            let native_obj = self.heap.alloc_native_void(name_obj, function);
            self.globals.set(name_obj, Value::obj(native_obj));
        }
    }

    /// Redirects `print`/`println`/`OP_PRINT` output, used by tests that
    /// need to assert on program output without touching process stdout.
    pub fn set_output(&mut self, output: Box<dyn std::io::Write>) {
        self.heap.set_output(output);
    }

    pub fn interpret(&mut self, source: &str) -> Result<(), InterpretError> {
        let function = crate::frontend::compiler::compile(source, &mut self.heap)
            .map_err(|count| InterpretError::Compile(CompileError(count)))?;

        self.push(Value::obj(function));
        let closure_obj = self.heap.alloc_closure(ObjClosure {
            function,
            upvalues: Vec::new(),
        });
        self.pop();
        self.push(Value::obj(closure_obj));
        self.call(closure_obj, 0)
            .map_err(InterpretError::Runtime)?;

        dispatch::run(self).map_err(InterpretError::Runtime)?;
        Ok(())
    }

    // --- stack primitives -------------------------------------------------

    pub(crate) fn push(&mut self, value: Value) {
        debug_assert!(self.stack_top < STACK_MAX, "value stack overflow");
        self.stack[self.stack_top] = value;
        self.stack_top += 1;
    }

    pub(crate) fn pop(&mut self) -> Value {
        self.stack_top -= 1;
        self.stack[self.stack_top]
    }

    pub(crate) fn peek(&self, distance: usize) -> Value {
        self.stack[self.stack_top - 1 - distance]
    }

    pub(crate) fn current_frame(&self) -> &CallFrame {
        self.frames.last().expect("frame stack must be non-empty while running")
    }

    pub(crate) fn current_frame_mut(&mut self) -> &mut CallFrame {
        self.frames.last_mut().expect("frame stack must be non-empty while running")
    }

    pub(crate) fn closure_function<'a>(&self, closure: *mut Obj) -> &'a ObjFunction {
        // SAFETY: closures and their functions are GC roots while a
        // frame referencing them is on the frame stack.
        unsafe {
            match &(*closure).kind {
                ObjKind::Closure(c) => match &(*c.function).kind {
                    ObjKind::Function(f) => f,
                    _ => unreachable!("ObjClosure::function always points at a Function"),
                },
                _ => unreachable!("current_frame().closure always points at a Closure"),
            }
        }
    }

    /// Builds the `[line L] in name()` traceback used by both runtime
    /// errors and the REPL's uncaught-exception report, then resets the
    /// stack so the host (REPL) can keep running after an error.
    pub(crate) fn runtime_error(&mut self, message: impl Into<String>) -> RuntimeError {
        let mut trace = Vec::with_capacity(self.frames.len());
        for frame in self.frames.iter().rev() {
            let function = self.closure_function(frame.closure);
            let line = function.chunk.lines[frame.ip.saturating_sub(1)];
            let name = match function.name {
                Some(name_obj) => format!("{}", unsafe { &*name_obj }),
                None => "script".to_string(),
            };
            trace.push(format!("[line {line}] in {name}()"));
        }
        self.stack_top = 0;
        self.frames.clear();
        self.open_upvalues = std::ptr::null_mut();
        RuntimeError::new(message, trace)
    }

    pub(crate) fn collect_garbage_if_needed(&mut self) {
        if self.heap.needs_collect() {
            self.collect_garbage();
        }
    }

    fn collect_garbage(&mut self) {
        tracing::trace!(bytes_before = self.heap.bytes_allocated(), "gc cycle start");
        let mut gray = Vec::new();
        self.mark_roots(&mut gray);
        self.trace_references(&mut gray);
        self.remove_white_strings();
        let freed = self.sweep();
        self.heap.grow_threshold();
        tracing::trace!(
            bytes_after = self.heap.bytes_allocated(),
            objects_freed = freed,
            "gc cycle end"
        );
    }

    fn mark_value(gray: &mut Vec<*mut Obj>, value: Value) {
        if value.is_obj() {
            Self::mark_object(gray, value.as_obj());
        }
    }

    fn mark_object(gray: &mut Vec<*mut Obj>, obj: *mut Obj) {
        if obj.is_null() {
            return;
        }
        // SAFETY: obj is reachable from a root or from an already-grayed
        // object, both guaranteed live by the caller.
        let marked = unsafe { &(*obj).is_marked };
        if marked.get() {
            return;
        }
        marked.set(true);
        gray.push(obj);
    }

    fn mark_table(gray: &mut Vec<*mut Obj>, table: &Table) {
        for (key, value) in table.iter() {
            Self::mark_object(gray, key);
            Self::mark_value(gray, value);
        }
    }

    fn mark_roots(&mut self, gray: &mut Vec<*mut Obj>) {
        for slot in &self.stack[..self.stack_top] {
            Self::mark_value(gray, *slot);
        }
        for frame in &self.frames {
            Self::mark_object(gray, frame.closure);
        }
        let mut upvalue = self.open_upvalues;
        while !upvalue.is_null() {
            Self::mark_object(gray, upvalue);
            // SAFETY: open_upvalues only ever links live ObjUpvalue nodes.
            upvalue = unsafe {
                match &(*upvalue).kind {
                    ObjKind::Upvalue(u) => u.open_next.get(),
                    _ => unreachable!("open_upvalues only links Upvalue objects"),
                }
            };
        }
        Self::mark_table(gray, &self.globals);
        Self::mark_object(gray, self.init_string);
        for &root in &self.heap.compiler_roots {
            Self::mark_object(gray, root);
        }
    }

    fn trace_references(&mut self, gray: &mut Vec<*mut Obj>) {
        while let Some(obj) = gray.pop() {
            // SAFETY: every object pushed onto `gray` was marked live by
            // mark_object and has not yet been freed (sweep runs after
            // the gray stack drains).
            unsafe {
                match &(*obj).kind {
                    ObjKind::String(_) => {}
                    ObjKind::Function(f) => {
                        if let Some(name) = f.name {
                            Self::mark_object(gray, name);
                        }
                        for c in &f.chunk.constants {
                            Self::mark_value(gray, *c);
                        }
                    }
                    ObjKind::Closure(c) => {
                        Self::mark_object(gray, c.function);
                        for &uv in &c.upvalues {
                            Self::mark_object(gray, uv);
                        }
                    }
                    ObjKind::Upvalue(u) => {
                        if let UpvalueLocation::Closed(v) = u.location.get() {
                            Self::mark_value(gray, v);
                        }
                    }
                    ObjKind::Native(n) => Self::mark_object(gray, n.name),
                    ObjKind::NativeVoid(n) => Self::mark_object(gray, n.name),
                    ObjKind::Class(c) => {
                        let c = c.borrow();
                        Self::mark_object(gray, c.name);
                        Self::mark_table(gray, &c.methods);
                        if let Some(sup) = c.superclass {
                            Self::mark_object(gray, sup);
                        }
                    }
                    ObjKind::Instance(i) => {
                        let i = i.borrow();
                        Self::mark_object(gray, i.class);
                        Self::mark_table(gray, &i.fields);
                    }
                    ObjKind::BoundMethod(b) => {
                        Self::mark_value(gray, b.receiver);
                        Self::mark_object(gray, b.method);
                    }
                    ObjKind::List(l) => {
                        for v in &l.borrow().items {
                            Self::mark_value(gray, *v);
                        }
                    }
                    ObjKind::Dict(d) => Self::mark_table(gray, &d.borrow().table),
                }
            }
        }
    }

    fn remove_white_strings(&mut self) {
        self.heap.strings.retain(|obj| {
            // SAFETY: every key in the intern table is a live ObjString
            // at the time retain's predicate runs (sweep hasn't happened yet).
            unsafe { (*obj).is_marked.get() }
        });
    }

    fn sweep(&mut self) -> usize {
        let mut freed = 0;
        let mut previous: *mut Obj = std::ptr::null_mut();
        let mut current = self.heap.objects_head();
        while !current.is_null() {
            // SAFETY: current is a live node in the intrusive object list.
            let marked = unsafe { &(*current).is_marked };
            let next = unsafe { (*current).next.get() };
            if marked.get() {
                marked.set(false);
                previous = current;
                current = next;
            } else {
                if previous.is_null() {
                    self.heap.set_objects_head(next);
                } else {
                    unsafe { (*previous).next.set(next) };
                }
                // SAFETY: current is white: unreachable from every root
                // just traced, so nothing still references it.
                unsafe { self.heap.free_object(current) };
                freed += 1;
                current = next;
            }
        }
        freed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_with_captured_output(vm: &mut VirtualMachine, source: &str) -> String {
        use std::io::Write;
        #[derive(Clone, Default)]
        struct Buf(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);
        impl Write for Buf {
            fn write(&mut self, b: &[u8]) -> std::io::Result<usize> {
                self.0.lock().unwrap().write(b)
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }
        let buf = Buf::default();
        vm.set_output(Box::new(buf.clone()));
        vm.interpret(source).expect("program should run without error");
        let bytes = buf.0.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn a_closure_survives_forced_gc_cycles_and_keeps_the_latest_assignment() {
        let mut vm = VirtualMachine::new(RunConfig { stress_gc: true });
        let source = r#"
            fun mk() {
                var i = 0;
                fun inc() { i = i + 1; return i; }
                return inc;
            }
            var c = mk();
            print c();
            print c();
            print c();
        "#;
        let out = run_with_captured_output(&mut vm, source);
        assert_eq!(out, "1\n2\n3\n");
    }

    #[test]
    fn stack_depth_is_restored_after_a_scope_exits() {
        let mut vm = VirtualMachine::new(RunConfig::default());
        let source = r#"
            { var a = 1; var b = 2; var c = 3; }
            print "ok";
        "#;
        let out = run_with_captured_output(&mut vm, source);
        assert_eq!(out, "ok\n");
        assert_eq!(vm.stack_top, 0);
    }
}
