// End-to-end scenarios and quantified invariants from spec.md 8, run the
// way the teacher's integration tests build the pipeline by hand rather
// than shelling out to the built binary.

use std::cell::RefCell;
use std::io::{self, Write};
use std::rc::Rc;

use tolo::backend::{InterpretResult, LogLevel, Vm};

#[derive(Clone, Default)]
struct SharedBuf(Rc<RefCell<Vec<u8>>>);

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn run(source: &str) -> (String, InterpretResult) {
    let buf = SharedBuf::default();
    let mut vm = Vm::with_output(LogLevel::Release, Box::new(buf.clone()));
    let result = vm.interpret(source);
    let printed = String::from_utf8(buf.0.borrow().clone()).expect("VM only prints UTF-8 text");
    (printed, result)
}

#[test]
fn arithmetic_precedence() {
    let (out, result) = run("print 1 + 2 * 3;");
    assert_eq!(out, "7\n");
    assert_eq!(result, InterpretResult::Ok);
}

#[test]
fn string_concatenation() {
    let (out, _) = run(r#"var a = "foo"; var b = "bar"; print a + b;"#);
    assert_eq!(out, "foobar\n");
}

#[test]
fn closures_share_a_captured_upvalue_across_calls() {
    let (out, result) = run(
        "fun mk() { var i = 0; fun inc() { i = i + 1; return i; } return inc; } \
         var c = mk(); print c(); print c(); print c();",
    );
    assert_eq!(out, "1\n2\n3\n");
    assert_eq!(result, InterpretResult::Ok);
}

#[test]
fn block_scoped_locals_shadow_then_restore() {
    let (out, _) = run("var x = 1; { var x = 2; print x; } print x;");
    assert_eq!(out, "2\n1\n");
}

#[test]
fn for_loop_desugars_correctly() {
    let (out, _) = run("for (var i = 0; i < 3; i = i + 1) print i;");
    assert_eq!(out, "0\n1\n2\n");
}

#[test]
fn undefined_global_is_a_runtime_error() {
    let (_, result) = run("print undefined;");
    assert_eq!(result, InterpretResult::RuntimeError);
}

#[test]
fn adding_a_string_and_a_number_is_a_runtime_error() {
    let (_, result) = run(r#"print "a" + 1;"#);
    assert_eq!(result, InterpretResult::RuntimeError);
}

#[test]
fn uninitialized_var_declaration_is_nil() {
    let (out, _) = run("var a; print a;");
    assert_eq!(out, "nil\n");
}

#[test]
fn and_short_circuits_without_evaluating_the_right_operand() {
    let (out, _) = run(r#"fun boom() { print "evaluated"; return true; } print false and boom();"#);
    assert_eq!(out, "false\n");
}

#[test]
fn or_short_circuits_without_evaluating_the_right_operand() {
    let (out, _) = run(r#"fun boom() { print "evaluated"; return true; } print true or boom();"#);
    assert_eq!(out, "true\n");
}

#[test]
fn equality_never_raises_across_mismatched_types() {
    let (out, result) = run(r#"print 1 == "1"; print nil == false; print 3 != "3";"#);
    assert_eq!(out, "false\nfalse\ntrue\n");
    assert_eq!(result, InterpretResult::Ok);
}

#[test]
fn minus_is_left_associative() {
    let (out, _) = run("print 10 - 3 - 2;");
    assert_eq!(out, "5\n");
}

#[test]
fn calling_with_wrong_arity_is_a_runtime_error_before_the_body_runs() {
    let (out, result) = run(r#"fun f(a, b) { print "ran"; } f(1);"#);
    assert_eq!(result, InterpretResult::RuntimeError);
    assert_eq!(out, "");
}

#[test]
fn unbounded_recursion_hits_the_frame_limit() {
    let (_, result) = run("fun rec(n) { return rec(n + 1); } print rec(0);");
    assert_eq!(result, InterpretResult::RuntimeError);
}

#[test]
fn truthiness_matches_nil_and_false_only() {
    let (out, _) = run(r#"print !nil; print !false; print !0; print !"";"#);
    assert_eq!(out, "true\ntrue\nfalse\nfalse\n");
}

#[test]
fn int_divide_and_modulus_truncate_toward_zero() {
    let (out, _) = run("print 7 // 2; print 7 % 2;");
    assert_eq!(out, "3\n1\n");
}

#[test]
fn repl_style_entries_share_globals_across_interpret_calls() {
    let buf = SharedBuf::default();
    let mut vm = Vm::with_output(LogLevel::Release, Box::new(buf.clone()));
    vm.interpret("var counter = 0;");
    vm.reset_stacks();
    vm.interpret("counter = counter + 1; print counter;");
    vm.reset_stacks();
    vm.interpret("counter = counter + 1; print counter;");
    let printed = String::from_utf8(buf.0.borrow().clone()).unwrap();
    assert_eq!(printed, "1\n2\n");
}

#[test]
fn compile_error_does_not_run_anything() {
    let (out, result) = run("print 1 +;");
    assert_eq!(result, InterpretResult::CompileError);
    assert_eq!(out, "");
}
