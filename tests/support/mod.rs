// shared helpers for the integration suites
#![allow(dead_code)]

use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

use myulax::{InterpretError, VirtualMachine};

/// A Write sink the test keeps a handle to after the VM takes ownership.
#[derive(Clone, Default)]
pub struct SharedBuf(Rc<RefCell<Vec<u8>>>);

impl SharedBuf {
    pub fn contents(&self) -> String {
        String::from_utf8(self.0.borrow().clone()).expect("print output is UTF-8")
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

pub fn capture_vm() -> (VirtualMachine, SharedBuf) {
    let buf = SharedBuf::default();
    let vm = VirtualMachine::with_output(Box::new(buf.clone()));
    (vm, buf)
}

/// Run a source snippet, returning the interpreter result and print output.
pub fn run(source: &str) -> (Result<(), InterpretError>, String) {
    let (mut vm, buf) = capture_vm();
    let result = vm.interpret(source, "test.mlx");
    (result, buf.contents())
}

/// Run a snippet that must succeed; returns what print() wrote.
pub fn run_expect(source: &str) -> String {
    let (result, output) = run(source);
    assert!(result.is_ok(), "script failed: {:?}\noutput so far: {}", result.err(), output);
    output
}
