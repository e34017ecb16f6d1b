//! Allocation-heavy scripts under GC stress mode (collect at every
//! allocation safe point). Results must match the unstressed runs exactly.

mod common;

use common::{run, run_with};
use brio_runtime::{InterpretResult, VmOptions};

fn stress() -> VmOptions {
    VmOptions {
        stress_gc: true,
        ..VmOptions::default()
    }
}

#[track_caller]
fn expect_same_output_under_stress(source: &str) {
    let (plain_result, plain_out, plain_err) = run(source);
    assert_eq!(plain_result, InterpretResult::Ok, "stderr: {plain_err}");
    let (stress_result, stress_out, stress_err) = run_with(stress(), source);
    assert_eq!(stress_result, InterpretResult::Ok, "stderr: {stress_err}");
    assert_eq!(plain_out, stress_out);
}

#[test]
fn test_string_churn() {
    expect_same_output_under_stress(
        "var s = \"\";\n\
         for (var i = 0; i < 60; i = i + 1) {\n\
           s = s + \"ab\";\n\
         }\n\
         print s == \"\" + s;\n\
         print s + \"!\" == s + \"!\";",
    );
}

#[test]
fn test_concatenation_result_is_exact() {
    let (result, out, err) = run_with(
        stress(),
        "var s = \"\"; for (var i = 0; i < 10; i = i + 1) { s = s + \"x\"; } print s;",
    );
    assert_eq!(result, InterpretResult::Ok, "stderr: {err}");
    assert_eq!(out, "xxxxxxxxxx\n");
}

#[test]
fn test_closure_churn() {
    expect_same_output_under_stress(
        "fun make(n) { fun get() { return n; } return get; }\n\
         var total = 0;\n\
         for (var i = 0; i < 40; i = i + 1) {\n\
           var f = make(i);\n\
           total = total + f();\n\
         }\n\
         print total;",
    );
}

#[test]
fn test_instance_churn() {
    expect_same_output_under_stress(
        "class Node { init(v) { this.v = v; } }\n\
         var keep = nil;\n\
         for (var i = 0; i < 50; i = i + 1) {\n\
           var n = Node(i);\n\
           if (i == 25) keep = n;\n\
         }\n\
         print keep.v;",
    );
}

#[test]
fn test_method_calls_under_stress() {
    expect_same_output_under_stress(
        "class A { hi() { return \"A\"; } }\n\
         class B < A { hi() { return super.hi() + \"B\"; } }\n\
         var s = \"\";\n\
         for (var i = 0; i < 20; i = i + 1) { s = s + B().hi(); }\n\
         print s;",
    );
}

#[test]
fn test_open_upvalues_survive_collection() {
    expect_same_output_under_stress(
        "fun run() {\n\
           var a = \"alpha\";\n\
           var b = \"beta\";\n\
           fun both() { return a + \"-\" + b; }\n\
           var waste = \"\";\n\
           for (var i = 0; i < 30; i = i + 1) { waste = waste + \"w\"; }\n\
           return both();\n\
         }\n\
         print run();",
    );
}

#[test]
fn test_fields_survive_collection() {
    expect_same_output_under_stress(
        "class Bag {}\n\
         var bag = Bag();\n\
         for (var i = 0; i < 40; i = i + 1) {\n\
           setattr(bag, \"k\" + chr(65 + i), i);\n\
         }\n\
         print getattr(bag, \"kB\") + getattr(bag, \"kZ\");",
    );
}

#[test]
fn test_interning_invariant_under_stress() {
    // Dead strings leave the intern table; rebuilding the same bytes must
    // still compare equal to a surviving copy.
    expect_same_output_under_stress(
        "var kept = \"a\" + \"bc\";\n\
         for (var i = 0; i < 20; i = i + 1) {\n\
           var dead = \"tmp\" + chr(65 + i);\n\
         }\n\
         print kept == \"ab\" + \"c\";",
    );
}
