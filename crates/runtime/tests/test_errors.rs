//! Runtime error reporting, tracebacks, and boundary behaviors.

mod common;

use common::{expect_output, expect_runtime_error, run};
use brio_runtime::InterpretResult;

#[test]
fn test_type_errors() {
    expect_runtime_error("print 1 + nil;", "Operands must be two numbers or two strings.");
    expect_runtime_error("print 1 + \"x\";", "Operands must be two numbers or two strings.");
    expect_runtime_error("print \"a\" < \"b\";", "Operands must be numbers.");
    expect_runtime_error("print -\"a\";", "Operand must be a number.");
    expect_runtime_error("print nil * 2;", "Operands must be numbers.");
}

#[test]
fn test_calling_non_callables() {
    expect_runtime_error("var x = 1; x();", "Can only call functions and classes.");
    expect_runtime_error("\"str\"();", "Can only call functions and classes.");
    expect_runtime_error("nil();", "Can only call functions and classes.");
}

#[test]
fn test_function_arity_errors() {
    expect_runtime_error(
        "fun f(a, b) {} f(1);",
        "Expected 2 arguments but got 1.",
    );
    expect_runtime_error(
        "fun f() {} f(1, 2, 3);",
        "Expected 0 arguments but got 3.",
    );
}

#[test]
fn test_undefined_globals() {
    expect_runtime_error("print missing;", "Undefined variable 'missing'.");
    expect_runtime_error("missing = 1;", "Undefined variable 'missing'.");
    // Mentioning a global reserves its slot, but reading it before the
    // defining statement runs is still an error.
    expect_runtime_error("fun f() { print later; } f(); var later = 1;", "Undefined variable 'later'.");
}

#[test]
fn test_global_defined_before_use_in_function() {
    expect_output(
        "fun f() { print later; } var later = \"ready\"; f();",
        "ready\n",
    );
}

#[test]
fn test_traceback_scenario() {
    // The seed scenario: message plus one traceback line per frame.
    let source = "fun a() { b(); }\nfun b() { 1 + \"x\"; }\na();";
    let (result, _out, err) = run(source);
    assert_eq!(result, InterpretResult::RuntimeError);
    assert!(err.contains("Operands must be two numbers or two strings."));
    assert!(err.contains("[line 2] in b()"));
    assert!(err.contains("[line 1] in a()"));
    assert!(err.contains("[line 3] in script"));
    // Most recent call first.
    let b_at = err.find("in b()").unwrap();
    let a_at = err.find("in a()").unwrap();
    let script_at = err.find("in script").unwrap();
    assert!(b_at < a_at && a_at < script_at);
}

#[test]
fn test_frame_overflow_at_65_calls() {
    expect_runtime_error("fun f() { f(); } f();", "Stack overflow.");

    // Exactly 63 nested calls under the script frame still fit.
    let source = "var depth = 0;\n\
                  fun sink(n) { depth = n; if (n < 63) sink(n + 1); }\n\
                  sink(1);\n\
                  print depth;";
    expect_output(source, "63\n");
}

#[test]
fn test_deep_value_stack_growth() {
    // Force the value stack past its initial capacity with wide
    // expressions and many locals.
    let mut source = String::from("fun wide() { return 0");
    for i in 1..=400 {
        source.push_str(&format!(" + {i}"));
    }
    source.push_str("; } print wide();");
    expect_output(&source, "80200\n");
}

#[test]
fn test_error_line_numbers_span_comments() {
    let source = "// one\n/* two\nthree */\nprint nil + 1;";
    let (result, _out, err) = run(source);
    assert_eq!(result, InterpretResult::RuntimeError);
    assert!(err.contains("[line 4] in script"), "stderr: {err}");
}

#[test]
fn test_compile_error_reports_no_output() {
    let (result, out, err) = run("print 1; print ;");
    assert_eq!(result, InterpretResult::CompileError);
    assert_eq!(out, "");
    assert!(err.contains("Expect expression."));
}

#[test]
fn test_division_produces_infinity_not_error() {
    expect_output("print 1 / 0;", "inf\n");
}

#[test]
fn test_nan_compares_unequal_to_itself() {
    expect_output("var nan = 0 / 0; print nan == nan;", "false\n");
}
