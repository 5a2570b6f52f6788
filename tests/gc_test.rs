// GC behavior under stress mode (collect at every safe point)

mod support;

use support::capture_vm;

fn run_stressed(source: &str) -> String {
    let (mut vm, buf) = capture_vm();
    vm.heap.stress = true;
    vm.interpret(source, "gc_test.mlx")
        .expect("script must survive stress-mode collection");
    buf.contents()
}

#[test]
fn scenarios_survive_stress_collection() {
    assert_eq!(run_stressed("print(1+2*3)"), "7\n");
    assert_eq!(
        run_stressed("function f(x) return x+1 end print(f(41))"),
        "42\n"
    );
    assert_eq!(
        run_stressed(
            "function mk(n) local c = 0 function inc() c = c + n return c end \
             return inc end local a = mk(10) print(a()) print(a()) print(a())"
        ),
        "10\n20\n30\n"
    );
    assert_eq!(
        run_stressed(
            "class A function greet() return \"hi A\" end end \
             class B extends A function greet() return super.greet() .. \"/B\" end end \
             print((new B()):greet())"
        ),
        "hi A/B\n"
    );
    assert_eq!(
        run_stressed(
            "local t = {10, 20, key = \"v\"} \
             print(t[1]) print(t[2]) print(t[\"key\"]) print(#t)"
        ),
        "10\n20\nv\n2\n"
    );
    assert_eq!(
        run_stressed("for i=1,5 do if i==3 then continue end if i==5 then break end print(i) end"),
        "1\n2\n4\n"
    );
}

#[test]
fn garbage_strings_are_reclaimed() {
    let (mut vm, _) = capture_vm();
    vm.interpret(
        "local keep = \"kept\" \
         for i=1,50 do local s = \"garbage\" .. i end \
         print(keep)",
        "gc_test.mlx",
    )
    .expect("script runs");

    let before = vm.heap.object_count();
    vm.collect_garbage();
    let after = vm.heap.object_count();
    assert!(
        after < before,
        "expected the concat temporaries to be swept ({} -> {})",
        before,
        after
    );
}

#[test]
fn sweep_rewhitens_every_survivor() {
    let (mut vm, _) = capture_vm();
    vm.interpret("local t = {1, 2, 3} print(t[1])", "gc_test.mlx")
        .expect("script runs");
    vm.collect_garbage();

    // immediately after a sweep every object on the all-objects list is white
    unsafe {
        let mut cursor = vm.heap.all_objects;
        while !cursor.is_null() {
            assert!(!(*cursor).mark, "sweep left a marked object behind");
            cursor = (*cursor).next;
        }
    }
}

#[test]
fn globals_survive_collection() {
    let (mut vm, buf) = capture_vm();
    vm.heap.stress = true;
    vm.interpret("function keep() return \"alive\" end", "gc_test.mlx")
        .expect("definition runs");
    vm.collect_garbage();
    vm.interpret("print(keep())", "gc_test.mlx").expect("call runs");
    assert_eq!(buf.contents(), "alive\n");
}

#[test]
fn closed_upvalues_survive_collection() {
    let (mut vm, buf) = capture_vm();
    vm.heap.stress = true;
    vm.interpret(
        "function mk() local secret = \"payload\" \
           return function() return secret end end \
         local f = mk() \
         print(f())",
        "gc_test.mlx",
    )
    .expect("script runs");
    assert_eq!(buf.contents(), "payload\n");
}

#[test]
fn interning_identity_holds_across_collections() {
    let (mut vm, _) = capture_vm();
    vm.interpret("local keep = \"anchor\"", "gc_test.mlx")
        .expect("script runs");
    let first = vm.heap.intern("stable").expect("intern");
    // "stable" is unreachable from any root, a collection frees it
    vm.collect_garbage();
    let second = vm.heap.intern("stable").expect("intern");
    let third = vm.heap.intern("stable").expect("intern");
    // identity holds between live interns; the swept copy left the pool
    assert_eq!(second, third);
    let _ = first;
}

#[test]
fn allocation_counter_matches_after_sweep() {
    let (mut vm, _) = capture_vm();
    vm.interpret(
        "for i=1,20 do local t = {i} end",
        "gc_test.mlx",
    )
    .expect("script runs");
    vm.collect_garbage();
    let live_after_first = vm.heap.total_allocated;
    // nothing new was allocated, a second cycle must not free anything more
    vm.collect_garbage();
    assert_eq!(vm.heap.total_allocated, live_after_first);
}
