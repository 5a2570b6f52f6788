// require(): search path, module cache, cycle sentinel

mod support;

use std::fs;

use support::capture_vm;

#[test]
fn require_runs_a_module_and_its_globals_become_visible() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(
        dir.path().join("greeter.mlx"),
        "function greet() return \"from module\" end",
    )
    .expect("write module");

    let (mut vm, buf) = capture_vm();
    vm.module_root = dir.path().to_path_buf();
    vm.interpret(
        "local m = require(\"greeter\") print(type(m)) print(greet())",
        "main.mlx",
    )
    .expect("script runs");
    assert_eq!(buf.contents(), "table\nfrom module\n");
}

#[test]
fn require_caches_by_name() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(
        dir.path().join("counted.mlx"),
        "function bump() return 1 end print(\"loaded\")",
    )
    .expect("write module");

    let (mut vm, buf) = capture_vm();
    vm.module_root = dir.path().to_path_buf();
    vm.interpret(
        "local a = require(\"counted\") \
         local b = require(\"counted\") \
         print(a == b)",
        "main.mlx",
    )
    .expect("script runs");
    // the body ran once; both requires yield the identical module table
    assert_eq!(buf.contents(), "loaded\ntrue\n");
}

#[test]
fn require_searches_lib_then_stdlib() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::create_dir(dir.path().join("lib")).expect("mkdir lib");
    fs::create_dir(dir.path().join("stdlib")).expect("mkdir stdlib");
    fs::write(
        dir.path().join("lib/inner.mlx"),
        "function from_lib() return \"lib\" end",
    )
    .expect("write lib module");
    fs::write(
        dir.path().join("stdlib/deep.mlx"),
        "function from_stdlib() return \"stdlib\" end",
    )
    .expect("write stdlib module");

    let (mut vm, buf) = capture_vm();
    vm.module_root = dir.path().to_path_buf();
    vm.interpret(
        "require(\"inner\") require(\"deep\") print(from_lib()) print(from_stdlib())",
        "main.mlx",
    )
    .expect("script runs");
    assert_eq!(buf.contents(), "lib\nstdlib\n");
}

#[test]
fn missing_module_yields_nil_and_is_not_cached() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (mut vm, buf) = capture_vm();
    vm.module_root = dir.path().to_path_buf();
    vm.interpret("print(require(\"absent\"))", "main.mlx")
        .expect("script runs");
    assert_eq!(buf.contents(), "nil\n");
    assert!(vm.modules.is_empty());
}

#[test]
fn module_with_a_compile_error_yields_nil_and_uncaches() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join("broken.mlx"), "local = nonsense =").expect("write module");

    let (mut vm, buf) = capture_vm();
    vm.module_root = dir.path().to_path_buf();
    vm.interpret("print(require(\"broken\"))", "main.mlx")
        .expect("outer script still runs");
    assert_eq!(buf.contents(), "nil\n");
    assert!(vm.modules.is_empty());
}

#[test]
fn cyclic_requires_see_the_sentinel_table() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(
        dir.path().join("ping.mlx"),
        "print(\"ping\") local back = require(\"pong\") print(type(back))",
    )
    .expect("write ping");
    fs::write(
        dir.path().join("pong.mlx"),
        // re-entrant require("ping") must get the cached sentinel, not recurse
        "print(\"pong\") local sentinel = require(\"ping\") print(type(sentinel))",
    )
    .expect("write pong");

    let (mut vm, buf) = capture_vm();
    vm.module_root = dir.path().to_path_buf();
    vm.interpret("require(\"ping\")", "main.mlx")
        .expect("script runs");
    assert_eq!(buf.contents(), "ping\npong\ntable\ntable\n");
}
