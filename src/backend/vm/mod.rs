// Myulax VM
// Created by: Yuyang Feng <mu_yunaaaa@mail.nwpu.edu.cn>
// Changelog:
// 2026-05-06: Initial version. Stack machine this time: one value stack shared by
//            every frame, CallFrame carries (closure, ip, base) instead of the
//            register windows Myula 1.x used.
// 2026-05-23: Closures and the open-upvalue list (sorted by descending slot);
//            OP_RETURN closes the whole frame window, OP_CLOSE_UPVALUE one slot.
// 2026-06-05: Mark phase rebuilt around an explicit gray worklist instead of the
//            old recursive marker; sweep re-whitens survivors and prunes the
//            string pool exactly like 1.x did.
// 2026-06-12: Garbage collection moved to dispatch-loop safe points so nothing
//            can be reclaimed while a half-built object only lives in a Rust
//            local. call_closure reuses the one dispatch loop with a saved
//            frame-count exit predicate.
// 2026-06-18: require() module cache + module root; GC events now go through
//            log::debug! instead of the old [DEBUG] printlns.

pub mod dispatch;
pub mod error;
pub mod heap;
pub mod stack;
pub mod std_lib;

use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;

use crate::backend::vm::error::{ErrorKind, InterpretError, VMError};
use crate::backend::vm::heap::Heap;
use crate::backend::vm::stack::CallFrame;
use crate::common::object::{
    Class, Closure, Function, GCObject, HeaderOnly, Instance, ObjectKind, Table, Trait, Upvalue,
    UpvalueState, Value,
};
use crate::frontend::compiler;

pub const FRAMES_MAX: usize = 64;
pub const STACK_MAX: usize = FRAMES_MAX * 256;

pub struct VirtualMachine {
    pub stack: Vec<Value>,
    pub frames: Vec<CallFrame>,
    pub globals: HashMap<String, Value>,
    pub heap: Heap,
    /// head of the open-upvalue list, ordered by descending stack slot
    pub open_upvalues: *mut GCObject<Upvalue>,
    /// require() cache keyed by module name; holds the placeholder table
    pub modules: HashMap<String, Value>,
    pub module_root: PathBuf,
    gray_stack: Vec<*mut GCObject<HeaderOnly>>,
    pub trace: bool,
    pub dump_bytecode: bool,
    /// where print() writes; tests capture this
    pub out: Box<dyn Write>,
}

impl VirtualMachine {
    pub fn new() -> Self {
        let mut vm = Self {
            stack: Vec::with_capacity(STACK_MAX),
            frames: Vec::with_capacity(FRAMES_MAX),
            globals: HashMap::new(),
            heap: Heap::new(),
            open_upvalues: std::ptr::null_mut(),
            modules: HashMap::new(),
            module_root: PathBuf::from("."),
            gray_stack: Vec::new(),
            trace: false,
            dump_bytecode: false,
            out: Box::new(std::io::stdout()),
        };
        std_lib::install(&mut vm);
        vm
    }

    pub fn with_output(out: Box<dyn Write>) -> Self {
        let mut vm = Self::new();
        vm.out = out;
        vm
    }

    // ------------------------------------------------------------ entry points

    /// Compile and run a whole script.
    pub fn interpret(&mut self, source: &str, origin: &str) -> Result<(), InterpretError> {
        let function = compiler::compile(source, origin, &mut self.heap)
            .map_err(|failure| InterpretError::Compile(failure.errors))?;

        if self.dump_bytecode {
            crate::backend::disassembler::disassemble_function(function);
        }

        log::debug!("interpreting {} ({} bytes of source)", origin, source.len());

        let closure = match self.heap.alloc_closure(Closure {
            function,
            upvalues: Vec::new(),
        }) {
            Some(ptr) => ptr,
            None => {
                let err = self.error(ErrorKind::OutOfMemory);
                self.report_runtime_error(&err);
                return Err(InterpretError::Runtime(err));
            }
        };

        let result = (|| -> Result<(), VMError> {
            self.push(Value::Closure(closure))?;
            self.call_closure_obj(closure, 0)?;
            self.run_dispatch(0)?;
            Ok(())
        })();

        match result {
            Ok(()) => Ok(()),
            Err(err) => {
                self.report_runtime_error(&err);
                self.reset_stack();
                Err(InterpretError::Runtime(err))
            }
        }
    }

    /// Foreign-call entry point: invoke an already-compiled callable from host
    /// code. Runs the same dispatch loop with "frame count back to the saved
    /// value" as the exit predicate, so the two entry points cannot diverge.
    pub fn call_closure(&mut self, callee: Value, args: &[Value]) -> Result<Value, VMError> {
        let saved_frames = self.frames.len();
        let saved_stack = self.stack.len();

        let attempt = (|| -> Result<Value, VMError> {
            self.push(callee)?;
            for arg in args {
                self.push(*arg)?;
            }
            let frame_pushed = self.call_value(args.len())?;
            if frame_pushed {
                self.run_dispatch(saved_frames)
            } else {
                // a native ran to completion inline; its result is on top
                Ok(self.pop())
            }
        })();

        match attempt {
            Ok(value) => Ok(value),
            Err(err) => {
                // close before truncating, the slots are still readable here
                self.close_upvalues(saved_stack);
                self.frames.truncate(saved_frames);
                self.stack.truncate(saved_stack);
                Err(err)
            }
        }
    }

    // ------------------------------------------------------------- stack ops

    pub fn push(&mut self, value: Value) -> Result<(), VMError> {
        if self.stack.len() >= STACK_MAX {
            return Err(self.error(ErrorKind::StackOverflow));
        }
        self.stack.push(value);
        Ok(())
    }

    pub fn pop(&mut self) -> Value {
        self.stack
            .pop()
            .expect("IllegalStateException: value stack underflow")
    }

    pub fn peek(&self, distance: usize) -> Value {
        self.stack[self.stack.len() - 1 - distance]
    }

    fn reset_stack(&mut self) {
        self.stack.clear();
        self.frames.clear();
        self.open_upvalues = std::ptr::null_mut();
    }

    // ------------------------------------------------------- bytecode reading

    pub(crate) fn read_byte(&mut self) -> u8 {
        let frame = self.frames.last_mut().unwrap();
        let byte = unsafe { frame.chunk().code[frame.ip] };
        frame.ip += 1;
        byte
    }

    /// 16-bit operands are big-endian.
    pub(crate) fn read_u16(&mut self) -> u16 {
        let hi = self.read_byte() as u16;
        let lo = self.read_byte() as u16;
        (hi << 8) | lo
    }

    pub(crate) fn read_constant(&mut self) -> Value {
        let index = self.read_byte() as usize;
        let frame = self.frames.last().unwrap();
        unsafe { frame.chunk().constants[index] }
    }

    /// Read a constant that the compiler guarantees is an interned string.
    pub(crate) fn read_string_constant(&mut self) -> Result<String, VMError> {
        match self.read_constant() {
            Value::String(ptr) => unsafe { Ok((*ptr).data.clone()) },
            other => Err(self.error(ErrorKind::InternalError(format!(
                "LinkageError: expected a string constant, found {}",
                other.type_name()
            )))),
        }
    }

    // ---------------------------------------------------------------- errors

    pub fn error(&self, kind: ErrorKind) -> VMError {
        let line = self.frames.last().map(|f| f.current_line()).unwrap_or(0);
        let stack_trace = self
            .frames
            .iter()
            .map(|f| (f.function_name(), f.current_line()))
            .collect();
        VMError {
            kind,
            line,
            stack_trace,
        }
    }

    pub fn report_runtime_error(&self, err: &VMError) {
        let sep = "=".repeat(70);
        eprintln!("\n{}", sep);
        eprintln!("  {}", err.message());
        eprintln!("  Location: line {}", err.line);
        eprintln!("{}", sep);

        eprintln!("  Stack traceback (most recent call first):");
        if err.stack_trace.is_empty() {
            eprintln!("    <empty_stack>");
        } else {
            for (i, (name, line)) in err.stack_trace.iter().enumerate().rev() {
                eprintln!("    #{:<2} at {}() [line {}]", i, name, line);
            }
        }
        eprintln!("{}\n", sep);
    }

    // -------------------------------------------------------------- upvalues

    /// Find or insert the open upvalue for `slot`. The list is kept sorted by
    /// descending slot so closeUpvalues can peel a whole suffix.
    pub(crate) fn capture_upvalue(
        &mut self,
        slot: usize,
    ) -> Result<*mut GCObject<Upvalue>, VMError> {
        let mut prev: *mut GCObject<Upvalue> = std::ptr::null_mut();
        let mut cursor = self.open_upvalues;
        unsafe {
            while !cursor.is_null() {
                match (*cursor).data.state {
                    UpvalueState::Open(s) if s > slot => {
                        prev = cursor;
                        cursor = (*cursor).data.next;
                    }
                    UpvalueState::Open(s) if s == slot => return Ok(cursor),
                    _ => break,
                }
            }
        }

        let node = self
            .heap
            .alloc_upvalue(Upvalue {
                state: UpvalueState::Open(slot),
                next: cursor,
            })
            .ok_or_else(|| self.error(ErrorKind::OutOfMemory))?;

        if prev.is_null() {
            self.open_upvalues = node;
        } else {
            unsafe {
                (*prev).data.next = node;
            }
        }
        Ok(node)
    }

    /// Close every open upvalue at or above `from_slot`: the stack value moves
    /// into the node and the node leaves the list.
    pub(crate) fn close_upvalues(&mut self, from_slot: usize) {
        unsafe {
            while !self.open_upvalues.is_null() {
                let node = self.open_upvalues;
                let Some(slot) = (*node).data.open_slot() else {
                    break;
                };
                if slot < from_slot {
                    break;
                }
                let value = self.stack[slot];
                (*node).data.state = UpvalueState::Closed(value);
                self.open_upvalues = (*node).data.next;
                (*node).data.next = std::ptr::null_mut();
            }
        }
    }

    // ------------------------------------------------------ garbage collector

    /// Called at dispatch-loop safe points only; between instructions every
    /// live object is reachable from the root set.
    pub fn maybe_collect(&mut self) {
        if self.heap.should_collect() {
            self.collect_garbage();
        }
    }

    pub fn collect_garbage(&mut self) {
        let before = self.heap.total_allocated;
        log::debug!(target: "gc", "VM GC: begin cycle, {} bytes live", before);

        self.mark_roots();
        self.trace_references();
        let (swept_count, swept_bytes) = self.sweep();
        self.heap.rebalance_threshold();

        log::debug!(
            target: "gc",
            "VM GC: reclaimed {} objects, freed {} bytes, {} bytes live, next cycle at {} bytes",
            swept_count,
            swept_bytes,
            self.heap.total_allocated,
            self.heap.threshold
        );
    }

    fn mark_roots(&mut self) {
        for i in 0..self.stack.len() {
            let value = self.stack[i];
            self.mark_value(value);
        }

        for i in 0..self.frames.len() {
            let closure = self.frames[i].closure;
            self.mark_object(closure as *mut GCObject<HeaderOnly>);
        }

        let mut cursor = self.open_upvalues;
        unsafe {
            while !cursor.is_null() {
                self.mark_object(cursor as *mut GCObject<HeaderOnly>);
                cursor = (*cursor).data.next;
            }
        }

        let globals: Vec<Value> = self.globals.values().copied().collect();
        for value in globals {
            self.mark_value(value);
        }

        let modules: Vec<Value> = self.modules.values().copied().collect();
        for value in modules {
            self.mark_value(value);
        }
    }

    fn mark_value(&mut self, value: Value) {
        match value {
            Value::Nil | Value::Boolean(_) | Value::Number(_) => {}
            Value::String(p) => self.mark_object(p as *mut GCObject<HeaderOnly>),
            Value::Function(p) => self.mark_object(p as *mut GCObject<HeaderOnly>),
            Value::Native(p) => self.mark_object(p as *mut GCObject<HeaderOnly>),
            Value::Closure(p) => self.mark_object(p as *mut GCObject<HeaderOnly>),
            Value::Class(p) => self.mark_object(p as *mut GCObject<HeaderOnly>),
            Value::Instance(p) => self.mark_object(p as *mut GCObject<HeaderOnly>),
            Value::BoundMethod(p) => self.mark_object(p as *mut GCObject<HeaderOnly>),
            Value::Table(p) => self.mark_object(p as *mut GCObject<HeaderOnly>),
            Value::Trait(p) => self.mark_object(p as *mut GCObject<HeaderOnly>),
        }
    }

    /// White -> gray: set the bit, queue for tracing.
    fn mark_object(&mut self, ptr: *mut GCObject<HeaderOnly>) {
        unsafe {
            if ptr.is_null() || (*ptr).mark {
                return;
            }
            (*ptr).mark = true;
            self.gray_stack.push(ptr);
        }
    }

    fn trace_references(&mut self) {
        while let Some(obj) = self.gray_stack.pop() {
            self.blacken(obj);
        }
    }

    /// Gray -> black: mark everything the object references.
    fn blacken(&mut self, ptr: *mut GCObject<HeaderOnly>) {
        unsafe {
            match (*ptr).kind {
                // no outgoing references
                ObjectKind::String | ObjectKind::Native => {}

                ObjectKind::Function => {
                    let typed = ptr as *mut GCObject<Function>;
                    let constants: Vec<Value> = (*typed).data.chunk.constants.clone();
                    for value in constants {
                        self.mark_value(value);
                    }
                }

                ObjectKind::Closure => {
                    let typed = ptr as *mut GCObject<Closure>;
                    let function = (*typed).data.function;
                    let upvalues = (*typed).data.upvalues.clone();
                    self.mark_object(function as *mut GCObject<HeaderOnly>);
                    for upvalue in upvalues {
                        self.mark_object(upvalue as *mut GCObject<HeaderOnly>);
                    }
                }

                ObjectKind::Upvalue => {
                    let typed = ptr as *mut GCObject<Upvalue>;
                    if let UpvalueState::Closed(value) = (*typed).data.state {
                        self.mark_value(value);
                    }
                }

                ObjectKind::Class => {
                    let typed = ptr as *mut GCObject<Class>;
                    let superclass = (*typed).data.superclass;
                    let methods: Vec<Value> = (*typed).data.methods.values().copied().collect();
                    self.mark_object(superclass as *mut GCObject<HeaderOnly>);
                    for method in methods {
                        self.mark_value(method);
                    }
                }

                ObjectKind::Instance => {
                    let typed = ptr as *mut GCObject<Instance>;
                    let class = (*typed).data.class;
                    let fields: Vec<Value> = (*typed).data.fields.values().copied().collect();
                    self.mark_object(class as *mut GCObject<HeaderOnly>);
                    for field in fields {
                        self.mark_value(field);
                    }
                }

                ObjectKind::BoundMethod => {
                    let typed = ptr as *mut GCObject<crate::common::object::BoundMethod>;
                    let receiver = (*typed).data.receiver;
                    let method = (*typed).data.method;
                    self.mark_value(receiver);
                    self.mark_object(method as *mut GCObject<HeaderOnly>);
                }

                ObjectKind::Table => {
                    let typed = ptr as *mut GCObject<Table>;
                    let array: Vec<Value> = (*typed).data.array.clone();
                    let hash: Vec<Value> = (*typed).data.hash.values().copied().collect();
                    for value in array {
                        self.mark_value(value);
                    }
                    for value in hash {
                        self.mark_value(value);
                    }
                }

                ObjectKind::Trait => {
                    let typed = ptr as *mut GCObject<Trait>;
                    let methods: Vec<Value> = (*typed).data.methods.values().copied().collect();
                    for method in methods {
                        self.mark_value(method);
                    }
                }
            }
        }
    }

    /// Walk the all-objects list: re-whiten survivors, unlink and free the
    /// rest. Dead interned strings leave the string pool inside free_object.
    fn sweep(&mut self) -> (usize, usize) {
        let mut swept_count = 0;
        let mut swept_bytes = 0;

        unsafe {
            let mut prev: *mut GCObject<HeaderOnly> = std::ptr::null_mut();
            let mut cursor = self.heap.all_objects;

            while !cursor.is_null() {
                if (*cursor).mark {
                    (*cursor).mark = false;
                    prev = cursor;
                    cursor = (*cursor).next;
                } else {
                    let dead = cursor;
                    cursor = (*cursor).next;
                    if prev.is_null() {
                        self.heap.all_objects = cursor;
                    } else {
                        (*prev).next = cursor;
                    }
                    swept_count += 1;
                    swept_bytes += (*dead).size;
                    self.heap.free_object(dead);
                }
            }
        }

        (swept_count, swept_bytes)
    }
}

impl Default for VirtualMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_upvalue_shares_nodes_per_slot() {
        let mut vm = VirtualMachine::new();
        vm.push(Value::Number(1.0)).unwrap();
        vm.push(Value::Number(2.0)).unwrap();

        let a = vm.capture_upvalue(1).unwrap();
        let b = vm.capture_upvalue(1).unwrap();
        assert_eq!(a, b);

        let c = vm.capture_upvalue(0).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn open_upvalue_list_is_sorted_by_descending_slot() {
        let mut vm = VirtualMachine::new();
        for i in 0..4 {
            vm.push(Value::Number(i as f64)).unwrap();
        }
        // insert out of order on purpose
        vm.capture_upvalue(1).unwrap();
        vm.capture_upvalue(3).unwrap();
        vm.capture_upvalue(0).unwrap();
        vm.capture_upvalue(2).unwrap();

        let mut slots = Vec::new();
        let mut cursor = vm.open_upvalues;
        unsafe {
            while !cursor.is_null() {
                slots.push((*cursor).data.open_slot().expect("open while listed"));
                cursor = (*cursor).data.next;
            }
        }
        assert_eq!(slots, vec![3, 2, 1, 0]);
    }

    #[test]
    fn close_upvalues_folds_a_suffix_into_the_nodes() {
        let mut vm = VirtualMachine::new();
        vm.push(Value::Number(10.0)).unwrap();
        vm.push(Value::Number(20.0)).unwrap();
        vm.push(Value::Number(30.0)).unwrap();

        let low = vm.capture_upvalue(0).unwrap();
        let mid = vm.capture_upvalue(1).unwrap();
        let high = vm.capture_upvalue(2).unwrap();

        vm.close_upvalues(1);
        unsafe {
            assert!(matches!(
                (*high).data.state,
                UpvalueState::Closed(Value::Number(n)) if n == 30.0
            ));
            assert!(matches!(
                (*mid).data.state,
                UpvalueState::Closed(Value::Number(n)) if n == 20.0
            ));
            assert!(matches!((*low).data.state, UpvalueState::Open(0)));
        }
        assert_eq!(vm.open_upvalues, low);
    }

    #[test]
    fn interned_string_values_compare_equal_by_identity() {
        let mut vm = VirtualMachine::new();
        let a = Value::String(vm.heap.intern("same").unwrap());
        let b = Value::String(vm.heap.intern("same").unwrap());
        let c = Value::String(vm.heap.intern("other").unwrap());
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
