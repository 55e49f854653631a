mod support;

use caboose::backend::vm::error::InterpretError;
use pretty_assertions::assert_eq;

#[test]
fn arithmetic_precedence() {
    let (out, result) = support::run("print 1 + 2 * 3;");
    assert!(result.is_ok());
    assert_eq!(out, "7\n");
}

#[test]
fn plain_function_call_with_arguments() {
    let source = r#"
        fun add(a, b) { return a + b; }
        print add(2, 3);
    "#;
    let (out, result) = support::run(source);
    assert!(result.is_ok());
    assert_eq!(out, "5\n");
}

#[test]
fn string_concatenation() {
    let (out, result) = support::run(r#"var a = "foo"; var b = "bar"; print a + b;"#);
    assert!(result.is_ok());
    assert_eq!(out, "foobar\n");
}

#[test]
fn closures_capture_a_mutable_upvalue() {
    let source = r#"
        fun mk() {
            var i = 0;
            fun inc() {
                i = i + 1;
                return i;
            }
            return inc;
        }
        var c = mk();
        print c();
        print c();
        print c();
    "#;
    let (out, result) = support::run(source);
    assert!(result.is_ok());
    assert_eq!(out, "1\n2\n3\n");
}

#[test]
fn super_calls_resolve_to_the_parent_method() {
    let source = r#"
        class A { greet() { return "hi"; } }
        class B < A { greet() { return super.greet() + "!"; } }
        print B().greet();
    "#;
    let (out, result) = support::run(source);
    assert!(result.is_ok());
    assert_eq!(out, "hi!\n");
}

#[test]
fn for_loop_accumulates_via_str_native() {
    let source = r#"
        var s = "";
        for (var i = 0; i < 3; i = i + 1) s = s + str(i);
        print s;
    "#;
    let (out, result) = support::run(source);
    assert!(result.is_ok());
    assert_eq!(out, "012\n");
}

#[test]
fn arity_mismatch_is_a_runtime_error() {
    let (out, result) = support::run("fun bad() {} bad(1);");
    assert_eq!(out, "");
    match result {
        Err(InterpretError::Runtime(e)) => {
            assert_eq!(e.message, "Expected 0 arguments but got 1.");
        }
        other => panic!("expected a runtime error, got {other:?}"),
    }
}

#[test]
fn falsey_values_are_only_nil_and_false() {
    let source = r#"
        if (0) { print "zero is truthy"; } else { print "zero is falsey"; }
        if ("") { print "empty string is truthy"; } else { print "empty string is falsey"; }
    "#;
    let (out, result) = support::run(source);
    assert!(result.is_ok());
    assert_eq!(out, "zero is truthy\nempty string is truthy\n");
}

#[test]
fn field_assignment_and_method_binding() {
    let source = r#"
        class Counter {
            init() { this.n = 0; }
            bump() { this.n = this.n + 1; return this.n; }
        }
        var c = Counter();
        print c.bump();
        print c.bump();
        var bumper = c.bump;
        print bumper();
    "#;
    let (out, result) = support::run(source);
    assert!(result.is_ok());
    assert_eq!(out, "1\n2\n3\n");
}

#[test]
fn undefined_global_is_a_runtime_error() {
    let (out, result) = support::run("print nope;");
    assert_eq!(out, "");
    match result {
        Err(InterpretError::Runtime(e)) => {
            assert_eq!(e.message, "Undefined variable 'nope'.");
            assert!(!e.stack_trace.is_empty());
        }
        other => panic!("expected a runtime error, got {other:?}"),
    }
}

#[test]
fn calling_a_non_callable_is_a_runtime_error() {
    let (_, result) = support::run("var x = 1; x();");
    match result {
        Err(InterpretError::Runtime(e)) => {
            assert_eq!(e.message, "Can only call functions and classes.");
        }
        other => panic!("expected a runtime error, got {other:?}"),
    }
}

#[test]
fn too_many_locals_is_a_compile_error() {
    let mut source = String::from("{\n");
    for i in 0..257 {
        source.push_str(&format!("var v{i} = {i};\n"));
    }
    source.push('}');
    let (_, result) = support::run(&source);
    assert!(matches!(result, Err(InterpretError::Compile(_))));
}

#[test]
fn deeply_nested_calls_overflow_the_frame_stack() {
    let source = r#"
        fun recurse(n) { return recurse(n + 1); }
        recurse(0);
    "#;
    let (_, result) = support::run(source);
    match result {
        Err(InterpretError::Runtime(e)) => assert_eq!(e.message, "Stack overflow."),
        other => panic!("expected a runtime error, got {other:?}"),
    }
}

#[test]
fn round_trip_num_str() {
    let (out, result) = support::run(r#"print num(str(42.5)) == 42.5;"#);
    assert!(result.is_ok());
    assert_eq!(out, "true\n");
}
