//! Classes, instances, methods, inheritance, and `this`/`super`.

mod common;

use common::{expect_output, expect_runtime_error};

#[test]
fn test_fields() {
    expect_output(
        "class Box {} var b = Box(); b.value = 3; print b.value;",
        "3\n",
    );
    expect_output(
        "class Box {} var b = Box(); b.value = 1; b.value = b.value + 1; print b.value;",
        "2\n",
    );
}

#[test]
fn test_set_property_evaluates_to_the_value() {
    expect_output("class Box {} var b = Box(); print b.x = 9;", "9\n");
}

#[test]
fn test_methods_and_this() {
    expect_output(
        "class Greeter { greet() { print \"hi \" + this.name; } }\n\
         var g = Greeter();\n\
         g.name = \"brio\";\n\
         g.greet();",
        "hi brio\n",
    );
}

#[test]
fn test_initializer() {
    expect_output(
        "class Point { init(x, y) { this.x = x; this.y = y; } }\n\
         var p = Point(3, 4);\n\
         print p.x + p.y;",
        "7\n",
    );
}

#[test]
fn test_initializer_returns_the_instance() {
    expect_output(
        "class P { init() { this.v = 1; return; } } print P().v;",
        "1\n",
    );
}

#[test]
fn test_constructor_arity_checks() {
    expect_runtime_error(
        "class P { init(x) {} } P();",
        "Expected 1 arguments but got 0.",
    );
    expect_runtime_error("class Bare {} Bare(1, 2);", "Expected 0 arguments but got 2.");
}

#[test]
fn test_bound_method_remembers_receiver() {
    expect_output(
        "class C { m() { print this.v; } }\n\
         var c = C();\n\
         c.v = 42;\n\
         var m = c.m;\n\
         m();",
        "42\n",
    );
}

#[test]
fn test_field_shadows_method_on_invoke() {
    expect_output(
        "class C { m() { print \"method\"; } }\n\
         fun replacement() { print \"field\"; }\n\
         var c = C();\n\
         c.m();\n\
         c.m = replacement;\n\
         c.m();",
        "method\nfield\n",
    );
}

#[test]
fn test_inheritance_and_super() {
    // The seed scenario.
    expect_output(
        "class A { speak() { print \"A\"; } }\n\
         class B < A { speak() { super.speak(); print \"B\"; } }\n\
         B().speak();",
        "A\nB\n",
    );
}

#[test]
fn test_inherited_method_without_override() {
    expect_output(
        "class A { hello() { print \"hello\"; } } class B < A {} B().hello();",
        "hello\n",
    );
}

#[test]
fn test_override_replaces_inherited_method() {
    expect_output(
        "class A { who() { print \"A\"; } } class B < A { who() { print \"B\"; } } B().who();",
        "B\n",
    );
}

#[test]
fn test_inherited_initializer() {
    expect_output(
        "class A { init(v) { this.v = v; } } class B < A {} print B(5).v;",
        "5\n",
    );
}

#[test]
fn test_super_bound_in_closure() {
    expect_output(
        "class A { m() { print \"A.m\"; } }\n\
         class B < A {\n\
           m() {\n\
             fun call_super() { super.m(); }\n\
             call_super();\n\
           }\n\
         }\n\
         B().m();",
        "A.m\n",
    );
}

#[test]
fn test_method_chaining_through_this() {
    expect_output(
        "class Builder {\n\
           init() { this.n = 0; }\n\
           add(k) { this.n = this.n + k; return this; }\n\
           total() { return this.n; }\n\
         }\n\
         print Builder().add(1).add(2).add(3).total();",
        "6\n",
    );
}

#[test]
fn test_superclass_must_be_a_class() {
    expect_runtime_error("var NotAClass = 1; class B < NotAClass {}", "Superclass must be a class.");
}

#[test]
fn test_undefined_property_and_method() {
    expect_runtime_error("class C {} C().missing;", "Undefined property 'missing'.");
    expect_runtime_error("class C {} C().missing();", "Undefined property 'missing'.");
    expect_runtime_error(
        "class A { m() {} } class B < A { m() { super.absent(); } } B().m();",
        "Undefined property 'absent'.",
    );
}

#[test]
fn test_methods_on_non_instances_error() {
    expect_runtime_error("var s = \"str\"; s.length();", "Only instances have methods.");
    expect_runtime_error("var n = 1; n.f = 2;", "Only instances have fields.");
}

#[test]
fn test_instances_carry_class_identity() {
    expect_output(
        "class A {} class B {} var a = A(); var b = B(); print a == a; print a == b;",
        "true\nfalse\n",
    );
}
