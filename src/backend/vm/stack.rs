/*
   函数栈帧实现
*/
use crate::common::chunk::Chunk;
use crate::common::object::{Closure, Function, GCObject};

/// One activation record. Slot 0 of the window at `base` holds the callee
/// (or `self` for methods); arguments sit in slots 1..=arity.
pub struct CallFrame {
    pub closure: *mut GCObject<Closure>,
    pub ip: usize,
    pub base: usize,
}

impl CallFrame {
    pub fn new(closure: *mut GCObject<Closure>, base: usize) -> Self {
        Self {
            closure,
            ip: 0,
            base,
        }
    }

    /// Safety: the closure (and its function) must be live, which holds for
    /// every frame on the call stack because frames are GC roots.
    pub unsafe fn function(&self) -> &Function {
        unsafe { &(*(*self.closure).data.function).data }
    }

    pub unsafe fn chunk(&self) -> &Chunk {
        unsafe { &self.function().chunk }
    }

    /// Source line of the most recently fetched byte.
    pub fn current_line(&self) -> u32 {
        unsafe {
            let chunk = self.chunk();
            let at = self.ip.saturating_sub(1).min(chunk.lines.len().saturating_sub(1));
            chunk.lines.get(at).copied().unwrap_or(0)
        }
    }

    pub fn function_name(&self) -> String {
        unsafe { self.function().display_name().to_string() }
    }
}
