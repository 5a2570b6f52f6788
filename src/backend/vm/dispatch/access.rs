use crate::backend::vm::error::{ErrorKind, VMError};
use crate::backend::vm::VirtualMachine;
use crate::common::object::UpvalueState;

impl VirtualMachine {
    pub(super) fn handle_get_local(&mut self) -> Result<(), VMError> {
        let slot = self.read_byte() as usize;
        let base = self.frames.last().unwrap().base;
        let value = self.stack[base + slot];
        self.push(value)
    }

    /// SET_LOCAL peeks: the assigned value stays for the enclosing expression.
    pub(super) fn handle_set_local(&mut self) -> Result<(), VMError> {
        let slot = self.read_byte() as usize;
        let base = self.frames.last().unwrap().base;
        self.stack[base + slot] = self.peek(0);
        Ok(())
    }

    pub(super) fn handle_get_global(&mut self) -> Result<(), VMError> {
        let name = self.read_string_constant()?;
        match self.globals.get(&name).copied() {
            Some(value) => self.push(value),
            None => Err(self.error(ErrorKind::UndefinedVariable(name))),
        }
    }

    pub(super) fn handle_define_global(&mut self) -> Result<(), VMError> {
        let name = self.read_string_constant()?;
        let value = self.pop();
        self.globals.insert(name, value);
        Ok(())
    }

    /// Assignment to a global that was never defined is a runtime error.
    pub(super) fn handle_set_global(&mut self) -> Result<(), VMError> {
        let name = self.read_string_constant()?;
        if !self.globals.contains_key(&name) {
            return Err(self.error(ErrorKind::UndefinedVariable(name)));
        }
        let value = self.peek(0);
        self.globals.insert(name, value);
        Ok(())
    }

    pub(super) fn handle_get_upvalue(&mut self) -> Result<(), VMError> {
        let index = self.read_byte() as usize;
        let closure = self.frames.last().unwrap().closure;
        let value = unsafe {
            let upvalue = (&(*closure).data.upvalues)[index];
            match (*upvalue).data.state {
                UpvalueState::Open(slot) => self.stack[slot],
                UpvalueState::Closed(value) => value,
            }
        };
        self.push(value)
    }

    pub(super) fn handle_set_upvalue(&mut self) -> Result<(), VMError> {
        let index = self.read_byte() as usize;
        let value = self.peek(0);
        let closure = self.frames.last().unwrap().closure;
        unsafe {
            let upvalue = (&(*closure).data.upvalues)[index];
            match (*upvalue).data.state {
                UpvalueState::Open(slot) => self.stack[slot] = value,
                UpvalueState::Closed(_) => (*upvalue).data.state = UpvalueState::Closed(value),
            }
        }
        Ok(())
    }
}
