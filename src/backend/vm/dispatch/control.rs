use crate::backend::vm::error::{ErrorKind, VMError};
use crate::backend::vm::stack::CallFrame;
use crate::backend::vm::{VirtualMachine, FRAMES_MAX};
use crate::common::object::{Closure, GCObject, Value};

impl VirtualMachine {
    /// Dispatch a call to whatever sits `argc` slots below the top. Returns
    /// whether a frame was pushed (natives complete inline and push nothing).
    pub(crate) fn call_value(&mut self, argc: usize) -> Result<bool, VMError> {
        let callee = self.peek(argc);
        match callee {
            Value::Closure(ptr) => {
                self.call_closure_obj(ptr, argc)?;
                Ok(true)
            }

            Value::BoundMethod(ptr) => {
                // the receiver is injected into slot 0 of the callee's window
                let (receiver, method) = unsafe { ((*ptr).data.receiver, (*ptr).data.method) };
                let receiver_slot = self.stack.len() - argc - 1;
                self.stack[receiver_slot] = receiver;
                self.call_closure_obj(method, argc)?;
                Ok(true)
            }

            Value::Native(ptr) => {
                let args_start = self.stack.len() - argc;
                let native = unsafe { (*ptr).data.func };
                let result = native(self, args_start, argc)?;
                // drop the callee and arguments together
                self.stack.truncate(args_start - 1);
                self.push(result)?;
                Ok(false)
            }

            Value::Nil => Err(self.error(ErrorKind::InvalidCall(
                "NullPointerException: attempt to invoke a nil value".into(),
            ))),
            other => Err(self.error(ErrorKind::InvalidCall(format!(
                "object of type '{}' is not callable",
                other.type_name()
            )))),
        }
    }

    pub(crate) fn call_closure_obj(
        &mut self,
        closure: *mut GCObject<Closure>,
        argc: usize,
    ) -> Result<(), VMError> {
        let arity = unsafe { (*(*closure).data.function).data.arity } as usize;
        if argc != arity {
            return Err(self.error(ErrorKind::InvalidCall(format!(
                "Expected {} arguments but got {}",
                arity, argc
            ))));
        }
        if self.frames.len() >= FRAMES_MAX {
            return Err(self.error(ErrorKind::StackOverflow));
        }

        let base = self.stack.len() - argc - 1;
        self.frames.push(CallFrame::new(closure, base));
        Ok(())
    }

    /// CLOSURE k: materialize a closure, capturing enclosing stack slots or
    /// re-using the current closure's upvalues per the trailing operand pairs.
    pub(super) fn handle_closure(&mut self) -> Result<(), VMError> {
        let function = match self.read_constant() {
            Value::Function(ptr) => ptr,
            other => {
                return Err(self.error(ErrorKind::InternalError(format!(
                    "LinkageError: CLOSURE expected a function constant, found {}",
                    other.type_name()
                ))));
            }
        };

        let upvalue_count = unsafe { (*function).data.upvalue_count };
        let mut upvalues = Vec::with_capacity(upvalue_count);
        let base = self.frames.last().unwrap().base;

        for _ in 0..upvalue_count {
            let is_local = self.read_byte() == 1;
            let index = self.read_byte() as usize;
            if is_local {
                upvalues.push(self.capture_upvalue(base + index)?);
            } else {
                let current = self.frames.last().unwrap().closure;
                let upvalue = unsafe { (&(*current).data.upvalues)[index] };
                upvalues.push(upvalue);
            }
        }

        let closure = self
            .heap
            .alloc_closure(Closure { function, upvalues })
            .ok_or_else(|| self.error(ErrorKind::OutOfMemory))?;
        self.push(Value::Closure(closure))
    }

    /// RETURN: close the frame's upvalue window, pop the frame, and either
    /// hand the result to the dispatch loop's caller (frame count back at the
    /// exit threshold) or push it for the resuming caller frame.
    pub(super) fn handle_return(&mut self, exit_frames: usize) -> Result<Option<Value>, VMError> {
        let result = self.pop();
        let frame = self
            .frames
            .pop()
            .expect("IllegalStateException: RETURN with no active frame");
        self.close_upvalues(frame.base);
        self.stack.truncate(frame.base);

        if self.frames.len() == exit_frames {
            return Ok(Some(result));
        }
        self.push(result)?;
        Ok(None)
    }
}
