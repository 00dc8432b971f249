mod common;

use common::SharedOut;
use lox_vm::VM;

fn run(src: &str) -> String {
    let out = SharedOut::default();
    let mut vm = VM::with_output(Box::new(out.clone()));
    let function = lox_compiler::compile(src).expect("compile");
    vm.run(function).expect("run");
    assert_eq!(vm.stack_depth(), 0, "stack not empty after successful run");
    out.contents()
}

fn run_err(src: &str) -> String {
    let out = SharedOut::default();
    let mut vm = VM::with_output(Box::new(out.clone()));
    let function = lox_compiler::compile(src).expect("compile");
    vm.run(function).expect_err("expected runtime error").0
}

// --- end-to-end scenarios ---

#[test]
fn arithmetic() {
    assert_eq!(run("print 1 + 2 * 3;"), "7\n");
}

#[test]
fn string_concatenation() {
    assert_eq!(run("var a = \"foo\"; var b = \"bar\"; print a + b;"), "foobar\n");
}

#[test]
fn function_call() {
    assert_eq!(run("fun add(a,b){return a+b;} print add(3,4);"), "7\n");
}

#[test]
fn closure_counter() {
    let src = "fun outer(){var x=1; fun inner(){x = x+1; print x;} return inner;}
               var c = outer(); c(); c();";
    assert_eq!(run(src), "2\n3\n");
}

#[test]
fn class_init_method_this() {
    let src = "class Greeter { init(n){ this.n = n; } hi(){ print \"hi \" + this.n; } }
               Greeter(\"ada\").hi();";
    assert_eq!(run(src), "hi ada\n");
}

#[test]
fn inheritance_and_super() {
    let src = "class A{ say(){ print \"A\"; } }
               class B < A { say(){ super.say(); print \"B\"; } }
               B().say();";
    assert_eq!(run(src), "A\nB\n");
}

// --- laws ---

#[test]
fn assignment_is_an_expression() {
    assert_eq!(run("var x; print (x = 1);"), "1\n");
    assert_eq!(run("var x; var y; print x = y = 2; print x;"), "2\n2\n");
}

#[test]
fn short_circuit_skips_side_effects() {
    let src = "var called = false;
               fun sideEffect() { called = true; return true; }
               false and sideEffect();
               print called;
               true or sideEffect();
               print called;";
    assert_eq!(run(src), "false\nfalse\n");
}

#[test]
fn and_or_leave_the_deciding_value() {
    assert_eq!(run("print false and 1;"), "false\n");
    assert_eq!(run("print 1 and 2;"), "2\n");
    assert_eq!(run("print nil or \"x\";"), "x\n");
    assert_eq!(run("print 1 or 2;"), "1\n");
}

// --- control flow ---

#[test]
fn while_and_for_loops() {
    assert_eq!(run("var i = 0; while (i < 3) { i = i + 1; } print i;"), "3\n");
    assert_eq!(
        run("var s = 0; for (var i = 0; i < 5; i = i + 1) { s = s + i; } print s;"),
        "10\n"
    );
    assert_eq!(run("for (var i = 0; i < 2; i = i + 1) print i;"), "0\n1\n");
}

#[test]
fn if_else_branches() {
    assert_eq!(run("if (1 < 2) print \"t\"; else print \"f\";"), "t\n");
    assert_eq!(run("if (nil) print \"t\"; else print \"f\";"), "f\n");
    // 0 and "" are truthy.
    assert_eq!(run("if (0) print \"t\";"), "t\n");
    assert_eq!(run("if (\"\") print \"t\";"), "t\n");
}

// --- closures and upvalues ---

#[test]
fn sibling_closures_share_one_cell() {
    let src = "var setter; var getter;
               fun make() {
                 var x = 0;
                 fun set(v) { x = v; }
                 fun get() { return x; }
                 setter = set; getter = get;
               }
               make();
               setter(41);
               print getter();";
    assert_eq!(run(src), "41\n");
}

#[test]
fn upvalue_closed_at_scope_exit() {
    let src = "var f;
               {
                 var i = 10;
                 fun g() { print i; }
                 f = g;
               }
               f();";
    assert_eq!(run(src), "10\n");
}

#[test]
fn independent_counters_from_separate_calls() {
    let src = "fun counter() { var n = 0; fun bump() { n = n + 1; return n; } return bump; }
               var a = counter(); var b = counter();
               a(); a();
               print a(); print b();";
    assert_eq!(run(src), "3\n1\n");
}

// --- classes ---

#[test]
fn bound_method_remembers_receiver() {
    let src = "class C { m() { return this; } }
               var c = C();
               var m = c.m;
               print m() == c;";
    assert_eq!(run(src), "true\n");
}

#[test]
fn fields_shadow_methods() {
    let src = "class C { m() { return 1; } }
               var c = C();
               c.m = 7;
               print c.m;";
    assert_eq!(run(src), "7\n");
}

#[test]
fn callable_field_is_invoked_like_a_method_expression() {
    let src = "class C {}
               var c = C();
               fun nine() { return 9; }
               c.m = nine;
               print c.m();";
    assert_eq!(run(src), "9\n");
}

#[test]
fn methods_are_copied_down_at_declaration() {
    let src = "class A { m() { return \"a\"; } }
               class B < A {}
               print B().m();";
    assert_eq!(run(src), "a\n");
}

#[test]
fn initializer_always_yields_the_instance() {
    assert_eq!(run("class P { init() { this.x = 5; } } print P().x;"), "5\n");
    // Early bare return still produces the receiver.
    assert_eq!(
        run("class P { init() { if (true) return; this.x = 1; } } print P() == nil;"),
        "false\n"
    );
}

#[test]
fn init_arity_is_enforced() {
    assert_eq!(run("class P { init(x) { this.x = x; } } print P(1).x;"), "1\n");
    assert_eq!(
        run_err("class P { init(x) { this.x = x; } } P();"),
        "Expected 1 arguments but got 0."
    );
    assert_eq!(run_err("class A {} A(1);"), "Expected 0 arguments but got 1.");
}

#[test]
fn super_calls_bind_the_subclass_receiver() {
    let src = "class A { name() { return \"A\"; } tag() { return this.name(); } }
               class B < A { name() { return \"B\"; } label() { return super.tag(); } }
               print B().label();";
    // super.tag() runs A's tag with a B receiver, so this.name() is B's.
    assert_eq!(run(src), "B\n");
}

#[test]
fn get_super_produces_a_bound_method_value() {
    let src = "class A { m() { return \"from A\"; } }
               class B < A { grab() { var f = super.m; return f(); } }
               print B().grab();";
    assert_eq!(run(src), "from A\n");
}

// --- value semantics & printing ---

#[test]
fn equality_rules() {
    let src = "print 1 == 1;
               print \"a\" == \"a\";
               print nil == false;
               print 0 == false;
               print nil == nil;";
    assert_eq!(run(src), "true\ntrue\nfalse\nfalse\ntrue\n");
}

#[test]
fn print_formats() {
    assert_eq!(run("print 2.5;"), "2.5\n");
    assert_eq!(run("print 7;"), "7\n");
    assert_eq!(run("fun f() {} print f;"), "<fn f>\n");
    assert_eq!(run("class K {} print K;"), "K\n");
    assert_eq!(run("class K {} print K();"), "K instance\n");
    assert_eq!(run("class C { m() {} } print C().m;"), "<fn m>\n");
    assert_eq!(run("print clock;"), "<native fn>\n");
}

#[test]
fn clock_native_returns_a_number() {
    assert_eq!(run("print clock() >= 0;"), "true\n");
}

// --- runtime errors ---

#[test]
fn undefined_variable_errors() {
    assert_eq!(run_err("print x;"), "Undefined variable 'x'.");
    assert_eq!(run_err("x = 1;"), "Undefined variable 'x'.");
}

#[test]
fn type_errors() {
    assert_eq!(run_err("1 + \"a\";"), "Operands must be two numbers or two strings.");
    assert_eq!(run_err("1 < \"a\";"), "Operands must be numbers.");
    assert_eq!(run_err("-\"a\";"), "Operand must be a number.");
}

#[test]
fn call_and_property_errors() {
    assert_eq!(run_err("var x = 1; x();"), "Can only call functions and classes.");
    assert_eq!(run_err("fun f(a, b) {} f(1);"), "Expected 2 arguments but got 1.");
    assert_eq!(run_err("var a = 1; a.b;"), "Only instances have properties.");
    assert_eq!(run_err("var a = 1; a.b = 2;"), "Only instances have fields.");
    assert_eq!(run_err("var a = 1; a.b();"), "Only instances have methods.");
    assert_eq!(run_err("class A {} A().missing;"), "Undefined property 'missing'.");
    assert_eq!(run_err("class A {} A().missing();"), "Undefined property 'missing'.");
    assert_eq!(run_err("var N = 1; class B < N {}"), "Superclass must be a class.");
}

#[test]
fn frame_limit() {
    let src = "fun f(n) { if (n == 0) return 0; return f(n - 1); } print f(62);";
    assert_eq!(run(src), "0\n");
    let src = "fun f(n) { if (n == 0) return 0; return f(n - 1); } print f(63);";
    assert_eq!(run_err(src), "Stack overflow.");
}

// --- VM lifetime across runs ---

#[test]
fn globals_persist_between_runs() {
    let out = SharedOut::default();
    let mut vm = VM::with_output(Box::new(out.clone()));
    vm.run(lox_compiler::compile("var a = 5;").unwrap()).unwrap();
    vm.run(lox_compiler::compile("print a;").unwrap()).unwrap();
    assert_eq!(out.contents(), "5\n");
}

#[test]
fn vm_recovers_after_runtime_error() {
    let out = SharedOut::default();
    let mut vm = VM::with_output(Box::new(out.clone()));
    assert!(vm.run(lox_compiler::compile("print missing;").unwrap()).is_err());
    assert_eq!(vm.stack_depth(), 0);
    vm.run(lox_compiler::compile("print 1;").unwrap()).unwrap();
    assert_eq!(out.contents(), "1\n");
}
