// compiler diagnostics: codes, caps, warnings

mod support;

use support::SharedBuf;

use myulax::backend::vm::heap::Heap;
use myulax::frontend::compiler::{compile_with_reporter, CompileFailure};
use myulax::frontend::diagnostics::DiagnosticReporter;

/// Compile with diagnostics captured; returns (ok, captured stderr text).
fn compile_capturing(source: &str) -> (Result<(), CompileFailure>, String) {
    let buf = SharedBuf::default();
    let reporter = DiagnosticReporter::with_sink("diag_test.mlx", source, Box::new(buf.clone()));
    let mut heap = Heap::new();
    let result = compile_with_reporter(source, reporter, &mut heap).map(|_| ());
    (result, buf.contents())
}

fn error_count(text: &str) -> usize {
    text.matches("error[").count()
}

#[test]
fn diagnostics_cap_at_eight_plus_summary() {
    // ten bad declarations; recovery resynchronizes on each 'local'
    let source = "local = 1\n".repeat(10);
    let (result, text) = compile_capturing(&source);
    assert!(result.is_err());
    assert_eq!(error_count(&text), 8);
    assert!(text.contains("compilation failed"));
    assert!(text.contains("suppressed"));
}

#[test]
fn four_block_diagnostic_shape() {
    let (result, text) = compile_capturing("local x = ");
    assert!(result.is_err());
    assert!(text.contains("error[E003]"));
    assert!(text.contains("--> diag_test.mlx:1:"));
    assert!(text.contains(" 1 | local x = "));
}

#[test]
fn unterminated_string_uses_its_code() {
    let (result, text) = compile_capturing("local s = \"oops");
    assert!(result.is_err());
    assert!(text.contains("error[E002]"));
    assert!(text.contains("Unterminated string."));
}

#[test]
fn invalid_assignment_target() {
    let (result, text) = compile_capturing("1 = 2");
    assert!(result.is_err());
    assert!(text.contains("error[E006]"));
    assert!(text.contains("Invalid assignment target"));
}

#[test]
fn break_and_continue_outside_loops() {
    let (result, text) = compile_capturing("break");
    assert!(result.is_err());
    assert!(text.contains("error[E007]"));

    let (result, text) = compile_capturing("continue");
    assert!(result.is_err());
    assert!(text.contains("error[E007]"));
}

#[test]
fn self_outside_class() {
    let (result, text) = compile_capturing("print(self)");
    assert!(result.is_err());
    assert!(text.contains("error[E008]"));
}

#[test]
fn super_misuse() {
    let (result, text) = compile_capturing("function f() return super.x() end");
    assert!(result.is_err());
    assert!(text.contains("error[E009]"));

    let (result, text) =
        compile_capturing("class A function m() return super.m() end end");
    assert!(result.is_err());
    assert!(text.contains("no superclass"));
}

#[test]
fn return_at_top_level() {
    let (result, text) = compile_capturing("return 1");
    assert!(result.is_err());
    assert!(text.contains("error[E010]"));
}

#[test]
fn init_cannot_return_a_value() {
    let (result, text) =
        compile_capturing("class A function init() return 1 end end");
    assert!(result.is_err());
    assert!(text.contains("error[E010]"));
}

#[test]
fn class_cannot_inherit_from_itself() {
    let (result, text) = compile_capturing("class A extends A end");
    assert!(result.is_err());
    assert!(text.contains("error[E015]"));
}

#[test]
fn local_in_its_own_initializer() {
    let (result, text) = compile_capturing("function f() local a = a return a end");
    assert!(result.is_err());
    assert!(text.contains("error[E005]"));
    assert!(text.contains("its own initializer"));
}

#[test]
fn redeclaration_in_same_scope() {
    let (result, text) =
        compile_capturing("function f() local a = 1 local a = 2 return a end");
    assert!(result.is_err());
    assert!(text.contains("error[E005]"));
    assert!(text.contains("already declared"));
}

#[test]
fn recovery_reports_errors_from_separate_statements() {
    let source = "local = 1\nlocal x = 2\nlocal = 3\n";
    let (result, text) = compile_capturing(source);
    assert!(result.is_err());
    assert_eq!(error_count(&text), 2);
}

// ---------------------------------------------------------------- warnings

#[test]
fn unused_local_with_pure_initializer_warns() {
    let (result, text) =
        compile_capturing("function f() local unused = 1 + 2 return 0 end");
    assert!(result.is_ok());
    assert!(text.contains("warning[W001]"));
    assert!(text.contains("'unused'"));
}

#[test]
fn unused_local_with_side_effecting_initializer_is_silent() {
    let source = "function g() return 1 end \
                  function h() local unused = g() return 0 end";
    let (result, text) = compile_capturing(source);
    assert!(result.is_ok());
    assert!(!text.contains("W001"));
}

#[test]
fn empty_table_initializer_is_removable_but_populated_one_is_not() {
    let (result, text) = compile_capturing("function f() local t = {} return 0 end");
    assert!(result.is_ok());
    assert!(text.contains("warning[W001]"));

    let (result, text) = compile_capturing("function f() local t = {1} return 0 end");
    assert!(result.is_ok());
    assert!(!text.contains("W001"));
}

#[test]
fn unused_parameter_warns() {
    let (result, text) = compile_capturing("function f(a) return 1 end");
    assert!(result.is_ok());
    assert!(text.contains("warning[W002]"));
    assert!(text.contains("'a'"));
}

#[test]
fn shadowing_warns() {
    let source = "function f() local x = 1 do local x = 2 print(x) end return x end";
    let (result, text) = compile_capturing(source);
    assert!(result.is_ok());
    assert!(text.contains("warning[W003]"));
    assert!(text.contains("shadows"));
}

#[test]
fn captured_locals_never_warn() {
    let source = "function f() local v = 1 return function() return v end end";
    let (result, text) = compile_capturing(source);
    assert!(result.is_ok());
    assert!(!text.contains("W001"));
}
