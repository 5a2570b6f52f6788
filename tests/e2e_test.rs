// end-to-end scenarios: compile + run + exact print output

mod support;

use support::{capture_vm, run, run_expect};

#[test]
fn folded_arithmetic_prints_result() {
    assert_eq!(run_expect("print(1+2*3)"), "7\n");
}

#[test]
fn function_call_with_argument() {
    assert_eq!(
        run_expect("function f(x) return x+1 end print(f(41))"),
        "42\n"
    );
}

#[test]
fn closure_keeps_captured_state_across_calls() {
    let source = "function mk(n) local c = 0 function inc() c = c + n return c end \
                  return inc end local a = mk(10) print(a()) print(a()) print(a())";
    assert_eq!(run_expect(source), "10\n20\n30\n");
}

#[test]
fn super_dispatch_through_inheritance() {
    let source = "class A function greet() return \"hi A\" end end \
                  class B extends A function greet() return super.greet() .. \"/B\" end end \
                  print((new B()):greet())";
    assert_eq!(run_expect(source), "hi A/B\n");
}

#[test]
fn table_literal_array_and_hash_parts() {
    let source = "local t = {10, 20, key = \"v\"} \
                  print(t[1]) print(t[2]) print(t[\"key\"]) print(#t)";
    assert_eq!(run_expect(source), "10\n20\nv\n2\n");
}

#[test]
fn numeric_for_with_continue_and_break() {
    let source = "for i=1,5 do if i==3 then continue end if i==5 then break end print(i) end";
    assert_eq!(run_expect(source), "1\n2\n4\n");
}

// ---------------------------------------------------------------- extensions

#[test]
fn colon_and_dot_invocation_agree() {
    let source = "class C function v() return 11 end end \
                  local c = new C() print(c:v()) print(c.v())";
    assert_eq!(run_expect(source), "11\n11\n");
}

#[test]
fn init_runs_on_new_and_returns_the_instance() {
    let source = "class P function init(x) self.x = x end function get() return self.x end end \
                  local p = new P(5) print(p:get())";
    assert_eq!(run_expect(source), "5\n");
}

#[test]
fn instantiating_without_init_rejects_arguments() {
    let (result, _) = run("class E end local e = new E(1)");
    assert!(result.is_err());
}

#[test]
fn traits_copy_methods_into_classes() {
    let source = "trait Walks function walk() return \"step\" end end \
                  class Cat implements Walks end \
                  print((new Cat()):walk())";
    assert_eq!(run_expect(source), "step\n");
}

#[test]
fn fields_shadow_methods_on_invoke() {
    let source = "class D function f() return \"method\" end end \
                  local d = new D() \
                  d.f = function() return \"field\" end \
                  print(d:f())";
    assert_eq!(run_expect(source), "field\n");
}

#[test]
fn two_closures_share_one_upvalue() {
    let source = "function mk() local v = 0 \
                    local function set(x) v = x end \
                    local function get() return v end \
                    return {set, get} end \
                  local fns = mk() \
                  fns[1](42) print(fns[2]())";
    assert_eq!(run_expect(source), "42\n");
}

#[test]
fn upvalue_mutation_visible_while_still_on_stack() {
    let source = "local function outer() \
                    local v = 1 \
                    local function bump() v = v + 1 end \
                    bump() bump() \
                    return v \
                  end print(outer())";
    assert_eq!(run_expect(source), "3\n");
}

#[test]
fn while_and_repeat_loops() {
    let source = "local i = 0 while i < 3 do i = i + 1 print(i) end \
                  repeat i = i - 1 print(i) until i == 0";
    assert_eq!(run_expect(source), "1\n2\n3\n2\n1\n0\n");
}

#[test]
fn continue_in_while_returns_to_the_condition() {
    let source = "local i = 0 \
                  while i < 5 do i = i + 1 if i == 2 then continue end print(i) end";
    assert_eq!(run_expect(source), "1\n3\n4\n5\n");
}

#[test]
fn and_or_yield_their_operands() {
    let source = "print(nil and 1) print(nil or 2) print(false or \"x\") print(3 and 4)";
    assert_eq!(run_expect(source), "nil\n2\nx\n4\n");
}

#[test]
fn string_equality_is_identity_after_interning() {
    let source = "local a = \"he\" .. \"llo\" local b = \"hello\" print(a == b)";
    assert_eq!(run_expect(source), "true\n");
}

#[test]
fn elseif_chain_takes_one_arm() {
    let source = "local x = 2 \
                  if x == 1 then print(\"one\") \
                  elseif x == 2 then print(\"two\") \
                  elseif x == 3 then print(\"three\") \
                  else print(\"other\") end";
    assert_eq!(run_expect(source), "two\n");
}

#[test]
fn stdlib_type_and_conversions() {
    let source = "print(type(1)) print(type(\"s\")) print(type(nil)) print(type(print)) \
                  print(tonumber(\"42\")) print(tonumber(\"oops\")) print(tostring(7))";
    assert_eq!(
        run_expect(source),
        "number\nstring\nnil\nfunction\n42\nnil\n7\n"
    );
}

#[test]
fn next_iterates_array_then_hash() {
    let source = "local t = {10, 20} \
                  local p = next(t, nil) print(p[1], p[2]) \
                  p = next(t, p[1]) print(p[1], p[2]) \
                  print(next(t, p[1]))";
    assert_eq!(run_expect(source), "1\t10\n2\t20\nnil\n");
}

#[test]
fn rawget_rawset_match_table_ops() {
    let source = "local t = {} \
                  rawset(t, 1, \"a\") rawset(t, \"k\", \"b\") \
                  print(rawget(t, 1)) print(rawget(t, \"k\")) print(rawget(t, 2))";
    assert_eq!(run_expect(source), "a\nb\nnil\n");
}

#[test]
fn assert_passes_through_truthy_values() {
    assert_eq!(run_expect("print(assert(41 + 1))"), "42\n");
    let (result, _) = run("assert(false, \"boom\")");
    assert!(result.is_err());
}

#[test]
fn error_native_aborts_with_runtime_error() {
    let (result, output) = run("print(\"before\") error(\"stop\") print(\"after\")");
    assert!(result.is_err());
    assert_eq!(output, "before\n");
}

#[test]
fn stack_is_empty_after_a_clean_run() {
    let (mut vm, _) = capture_vm();
    vm.interpret("local a = 1 for i=1,3 do local b = i end", "test.mlx")
        .expect("script runs");
    assert!(vm.stack.is_empty());
    assert!(vm.frames.is_empty());
}

// ------------------------------------------------------------ runtime errors

#[test]
fn undefined_global_read_is_a_runtime_error() {
    let (result, _) = run("print(missing)");
    assert!(result.is_err());
}

#[test]
fn assignment_to_undefined_global_is_a_runtime_error() {
    let (result, _) = run("missing = 1");
    assert!(result.is_err());
}

#[test]
fn calling_a_number_is_a_runtime_error() {
    let (result, _) = run("local x = 3 x()");
    assert!(result.is_err());
}

#[test]
fn arity_mismatch_is_a_runtime_error() {
    let (result, _) = run("function f(a, b) return a end f(1)");
    assert!(result.is_err());
}

#[test]
fn indexing_a_number_is_a_runtime_error() {
    let (result, _) = run("local x = 3 print(x[1])");
    assert!(result.is_err());
}

#[test]
fn boolean_table_key_is_a_runtime_error() {
    let (result, _) = run("local t = {} t[true] = 1");
    assert!(result.is_err());
}

#[test]
fn deep_recursion_overflows_the_frame_stack() {
    let (result, _) = run("function f() return f() end f()");
    assert!(result.is_err());
}

#[test]
fn division_by_zero_is_a_runtime_error() {
    let (result, _) = run("local zero = 0 print(1 / zero)");
    assert!(result.is_err());
}

// --------------------------------------------------------- foreign-call entry

#[test]
fn call_closure_reenters_the_vm() {
    use myulax::common::object::Value;

    let (mut vm, buf) = capture_vm();
    vm.interpret("function add(a, b) return a + b end", "test.mlx")
        .expect("definition runs");

    let callee = *vm.globals.get("add").expect("global function defined");
    let result = vm
        .call_closure(callee, &[Value::Number(2.0), Value::Number(40.0)])
        .expect("foreign call succeeds");
    assert_eq!(result, Value::Number(42.0));
    assert!(vm.stack.is_empty());
    assert_eq!(buf.contents(), "");
}

#[test]
fn call_closure_failure_restores_the_stack_window() {
    use myulax::common::object::Value;

    let (mut vm, _) = capture_vm();
    vm.interpret("function boom() error(\"no\") end", "test.mlx")
        .expect("definition runs");

    let callee = *vm.globals.get("boom").expect("global function defined");
    let depth_before = vm.stack.len();
    assert!(vm.call_closure(callee, &[]).is_err());
    assert_eq!(vm.stack.len(), depth_before);
    assert!(vm.frames.is_empty());
}
