//! End-to-end coverage of expressions, statements, and control flow.

mod common;

use common::{expect_output, expect_runtime_error, run};
use brio_runtime::InterpretResult;

#[test]
fn test_arithmetic_precedence() {
    expect_output("print 1 + 2 * 3;", "7\n");
    expect_output("print (1 + 2) * 3;", "9\n");
    expect_output("print 10 / 4;", "2.5\n");
    expect_output("print -(3 - 5);", "2\n");
}

#[test]
fn test_value_printing() {
    expect_output("print nil;", "nil\n");
    expect_output("print true;", "true\n");
    expect_output("print false;", "false\n");
    expect_output("print 2.5;", "2.5\n");
    expect_output("print \"text\";", "text\n");
    expect_output("fun f() {} print f;", "<fn f>\n");
    expect_output("class C {} print C;", "C\n");
    expect_output("class C {} print C();", "C instance\n");
}

#[test]
fn test_equality_and_comparison() {
    expect_output("print 1 == 1;", "true\n");
    expect_output("print 1 != 2;", "true\n");
    expect_output("print nil == nil;", "true\n");
    expect_output("print nil == false;", "false\n");
    expect_output("print 2 < 3;", "true\n");
    expect_output("print 2 >= 3;", "false\n");
    expect_output("print \"a\" == \"b\";", "false\n");
}

#[test]
fn test_string_interning_makes_concatenation_equal() {
    expect_output("print \"ab\" + \"c\" == \"abc\";", "true\n");
}

#[test]
fn test_string_concatenation() {
    expect_output("print \"foo\" + \"bar\" + \"baz\";", "foobarbaz\n");
}

#[test]
fn test_truthiness() {
    expect_output("print !nil;", "true\n");
    expect_output("print !false;", "true\n");
    expect_output("print !0;", "false\n");
    expect_output("print !\"\";", "false\n");
}

#[test]
fn test_and_or_short_circuit() {
    expect_output("print nil and 1;", "nil\n");
    expect_output("print 1 and 2;", "2\n");
    expect_output("print nil or \"x\";", "x\n");
    expect_output("print 2 or 1;", "2\n");
    // The right operand must not run when short-circuited.
    expect_output(
        "fun boom() { print \"boom\"; return true; } print false and boom();",
        "false\n",
    );
    expect_output(
        "fun boom() { print \"boom\"; return true; } print 7 or boom();",
        "7\n",
    );
}

#[test]
fn test_ternary() {
    expect_output("print true ? 1 : 2;", "1\n");
    expect_output("print false ? 1 : 2;", "2\n");
    // Right-associative nesting.
    expect_output("print false ? 1 : true ? 2 : 3;", "2\n");
    expect_output("print false ? 1 : false ? 2 : 3;", "3\n");
    expect_output("print true ? false ? 1 : 2 : 3;", "2\n");
}

#[test]
fn test_uninitialized_var_reads_nil() {
    expect_output("var x; print x;", "nil\n");
}

#[test]
fn test_block_scoping_and_shadowing() {
    expect_output(
        "var a = \"outer\"; { var a = \"inner\"; print a; } print a;",
        "inner\nouter\n",
    );
}

#[test]
fn test_if_else() {
    expect_output("if (1 < 2) print \"then\"; else print \"else\";", "then\n");
    expect_output("if (1 > 2) print \"then\"; else print \"else\";", "else\n");
    expect_output("if (nil) print \"then\";", "");
}

#[test]
fn test_while_loop() {
    expect_output(
        "var i = 0; while (i < 3) { print i; i = i + 1; }",
        "0\n1\n2\n",
    );
}

#[test]
fn test_for_loop_variants() {
    expect_output("for (var i = 0; i < 3; i = i + 1) print i;", "0\n1\n2\n");
    expect_output(
        "var i = 0; for (; i < 3; i = i + 1) print i;",
        "0\n1\n2\n",
    );
    expect_output(
        "var i = 0; for (;;) { if (i == 2) break; print i; i = i + 1; }",
        "0\n1\n",
    );
}

#[test]
fn test_break_and_continue() {
    expect_output(
        "for (var i = 0; i < 10; i = i + 1) { if (i == 3) break; print i; }",
        "0\n1\n2\n",
    );
    expect_output(
        "for (var i = 0; i < 5; i = i + 1) { if (i == 1) continue; if (i == 3) continue; print i; }",
        "0\n2\n4\n",
    );
    expect_output(
        "var i = 0; while (true) { i = i + 1; if (i > 4) break; if (i == 2) continue; print i; }",
        "1\n3\n4\n",
    );
}

#[test]
fn test_break_out_of_nested_scopes() {
    expect_output(
        "for (var i = 0; i < 5; i = i + 1) { var doubled = i * 2; { var again = doubled; if (again == 4) break; } print doubled; }",
        "0\n2\n",
    );
}

#[test]
fn test_switch_fallthrough_and_break() {
    expect_output(
        "var x = 2; switch (x) { case 1: print \"one\"; case 2: print \"two\"; case 3: print \"three\"; break; case 4: print \"four\"; }",
        "two\nthree\n",
    );
}

#[test]
fn test_switch_default() {
    expect_output(
        "switch (9) { case 1: print \"one\"; default: print \"other\"; }",
        "other\n",
    );
    // Fallthrough reaches default when no break intervenes.
    expect_output(
        "switch (1) { case 1: print \"one\"; default: print \"other\"; }",
        "one\nother\n",
    );
}

#[test]
fn test_switch_no_match() {
    expect_output("switch (42) { case 1: print \"one\"; }", "");
    expect_output("switch (42) {}", "");
}

#[test]
fn test_switch_on_strings() {
    expect_output(
        "switch (\"b\") { case \"a\": print 1; case \"b\": print 2; break; case \"c\": print 3; }",
        "2\n",
    );
}

#[test]
fn test_functions_and_returns() {
    expect_output("fun add(a, b) { return a + b; } print add(1, 2);", "3\n");
    expect_output("fun nothing() {} print nothing();", "nil\n");
    expect_output(
        "fun early(n) { if (n > 0) return \"pos\"; return \"neg\"; } print early(1); print early(-1);",
        "pos\nneg\n",
    );
}

#[test]
fn test_recursion() {
    expect_output(
        "fun fib(n) { if (n < 2) return n; return fib(n - 1) + fib(n - 2); } print fib(10);",
        "55\n",
    );
}

#[test]
fn test_immutable_local_reads_fine() {
    expect_output("{ immut x = 40; print x + 2; }", "42\n");
    expect_output("immut g = 1; print g;", "1\n");
}

#[test]
fn test_pure_script_is_deterministic() {
    let source = "var total = 0; for (var i = 1; i <= 10; i = i + 1) { total = total + i; } print total;";
    let (r1, out1, _) = run(source);
    let (r2, out2, _) = run(source);
    assert_eq!(r1, InterpretResult::Ok);
    assert_eq!(r2, InterpretResult::Ok);
    assert_eq!(out1, out2);
    assert_eq!(out1, "55\n");
}

#[test]
fn test_comments_are_ignored() {
    expect_output(
        "// leading comment\nprint 1; /* inline */ print 2;\n/* multi\nline */ print 3;",
        "1\n2\n3\n",
    );
}

#[test]
fn test_assignment_is_an_expression() {
    expect_output("var a; var b; a = b = 7; print a; print b;", "7\n7\n");
}

#[test]
fn test_weird_but_legal_property_chains() {
    expect_runtime_error("var x = 1; x.y;", "Only instances have properties.");
}
