//! Standard native functions. Value-returning natives use the `NativeFn`
//! signature; effectful ones (`print`, `println`, `exit`) use
//! `NativeVoidFn` and report success with a boolean instead of a value.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::common::object::{NativeFn, NativeVoidFn, ObjKind};
use crate::common::value::{Value, ValueKind};

pub const VALUE_NATIVES: &[(&str, NativeFn)] = &[
    ("clock", clock_native),
    ("time", time_native),
    ("random", random_native),
    ("ceil", ceil_native),
    ("floor", floor_native),
    ("bool", bool_native),
    ("num", num_native),
    ("str", str_native),
    ("pow", pow_native),
    ("len", len_native),
    ("input", input_native),
];

pub const VOID_NATIVES: &[(&str, NativeVoidFn)] = &[
    ("print", print_native),
    ("println", println_native),
    ("exit", exit_native),
];

fn clock_native(_heap: &mut super::heap::Heap, _args: &[Value]) -> Result<Value, String> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|_| "clock: system time before epoch".to_string())?;
    Ok(Value::number(now.as_secs_f64()))
}

fn time_native(_heap: &mut super::heap::Heap, _args: &[Value]) -> Result<Value, String> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|_| "time: system time before epoch".to_string())?;
    Ok(Value::number(now.as_secs() as f64))
}

/// Deterministic pseudo-random source (xorshift seeded from the clock),
/// avoiding a dependency the rest of the stack has no other use for.
fn random_native(_heap: &mut super::heap::Heap, _args: &[Value]) -> Result<Value, String> {
    use std::cell::Cell;
    thread_local! {
        static STATE: Cell<u64> = Cell::new(0x2545F4914F6CDD1D);
    }
    let bits = STATE.with(|s| {
        let mut x = s.get();
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        s.set(x);
        x
    });
    Ok(Value::number((bits >> 11) as f64 / (1u64 << 53) as f64))
}

fn ceil_native(_heap: &mut super::heap::Heap, args: &[Value]) -> Result<Value, String> {
    let n = expect_number(args, 0, "ceil")?;
    Ok(Value::number(n.ceil()))
}

fn floor_native(_heap: &mut super::heap::Heap, args: &[Value]) -> Result<Value, String> {
    let n = expect_number(args, 0, "floor")?;
    Ok(Value::number(n.floor()))
}

fn pow_native(_heap: &mut super::heap::Heap, args: &[Value]) -> Result<Value, String> {
    let base = expect_number(args, 0, "pow")?;
    let exp = expect_number(args, 1, "pow")?;
    Ok(Value::number(base.powf(exp)))
}

fn bool_native(_heap: &mut super::heap::Heap, args: &[Value]) -> Result<Value, String> {
    let v = args.first().copied().unwrap_or_else(Value::nil);
    Ok(Value::bool(!crate::common::value::is_falsey(v)))
}

fn num_native(heap: &mut super::heap::Heap, args: &[Value]) -> Result<Value, String> {
    let v = args.first().copied().unwrap_or_else(Value::nil);
    match v.kind() {
        ValueKind::Number => Ok(v),
        ValueKind::Obj => {
            let ptr = v.as_obj();
            // SAFETY: v is a live value handed in by the VM.
            match unsafe { &(*ptr).kind } {
                ObjKind::String(s) => s
                    .chars
                    .trim()
                    .parse::<f64>()
                    .map(Value::number)
                    .map_err(|_| format!("num: cannot parse \"{}\" as a number", s.chars)),
                _ => Err("num: argument cannot be converted to a number".to_string()),
            }
        }
        _ => {
            let _ = heap;
            Err("num: argument cannot be converted to a number".to_string())
        }
    }
}

fn str_native(heap: &mut super::heap::Heap, args: &[Value]) -> Result<Value, String> {
    let v = args.first().copied().unwrap_or_else(Value::nil);
    let rendered = format!("{v}");
    Ok(Value::obj(heap.take_string(rendered)))
}

fn len_native(_heap: &mut super::heap::Heap, args: &[Value]) -> Result<Value, String> {
    let v = args.first().copied().unwrap_or_else(Value::nil);
    if !v.is_obj() {
        return Err("len: argument has no length".to_string());
    }
    let ptr = v.as_obj();
    // SAFETY: v is a live value handed in by the VM.
    let n = match unsafe { &(*ptr).kind } {
        ObjKind::String(s) => s.chars.len(),
        ObjKind::List(l) => l.borrow().items.len(),
        ObjKind::Dict(d) => d.borrow().table.len(),
        _ => return Err("len: argument has no length".to_string()),
    };
    Ok(Value::number(n as f64))
}

fn input_native(heap: &mut super::heap::Heap, args: &[Value]) -> Result<Value, String> {
    use std::io::Write;
    if let Some(prompt) = args.first() {
        if prompt.is_obj() {
            let _ = write!(heap.output, "{prompt}");
            let _ = heap.output.flush();
        }
    }
    let mut line = String::new();
    std::io::stdin()
        .read_line(&mut line)
        .map_err(|e| format!("input: {e}"))?;
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    Ok(Value::obj(heap.take_string(line)))
}

fn print_native(heap: &mut super::heap::Heap, args: &[Value]) -> Result<bool, String> {
    use std::io::Write;
    if let Some(v) = args.first() {
        let _ = write!(heap.output, "{v}");
        let _ = heap.output.flush();
    }
    Ok(true)
}

fn println_native(heap: &mut super::heap::Heap, args: &[Value]) -> Result<bool, String> {
    use std::io::Write;
    if let Some(v) = args.first() {
        let _ = writeln!(heap.output, "{v}");
    } else {
        let _ = writeln!(heap.output);
    }
    Ok(true)
}

fn exit_native(_heap: &mut super::heap::Heap, args: &[Value]) -> Result<bool, String> {
    let code = args
        .first()
        .filter(|v| v.is_number())
        .map(|v| v.as_number() as i32)
        .unwrap_or(0);
    std::process::exit(code);
}

fn expect_number(args: &[Value], index: usize, who: &str) -> Result<f64, String> {
    match args.get(index) {
        Some(v) if v.is_number() => Ok(v.as_number()),
        _ => Err(format!("{who}: expected a number argument")),
    }
}
