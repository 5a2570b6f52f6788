// Myulax VM dispatch
// Created by: Yuyang Feng <mu_yunaaaa@mail.nwpu.edu.cn>
// Changelog:
// 2026-05-08: Initial version, decoupled handler modules like Myula 1.x but the
//            loop now decodes a packed byte stream instead of enum slices.
// 2026-06-12: ONE loop for both entry points: run_dispatch takes the frame count
//            at which it must hand the result back (0 for scripts, the saved
//            depth for foreign calls).

mod access;
mod arithmetic;
mod class;
mod control;
mod table;

use crate::backend::vm::error::{ErrorKind, VMError};
use crate::backend::vm::VirtualMachine;
use crate::common::object::Value;
use crate::common::opcode::OpCode;

impl VirtualMachine {
    /// Fetch-decode-execute until the frame count drops back to `exit_frames`;
    /// the value returned by the frame that crossed that boundary is the
    /// result. GC runs only here, between instructions, where the root set is
    /// complete.
    pub(crate) fn run_dispatch(&mut self, exit_frames: usize) -> Result<Value, VMError> {
        loop {
            self.maybe_collect();

            if self.trace {
                self.trace_instruction();
            }

            let byte = self.read_byte();
            let op = match OpCode::try_from(byte) {
                Ok(op) => op,
                Err(_) => {
                    return Err(self.error(ErrorKind::InternalError(format!(
                        "corrupted instruction stream: unknown opcode 0x{:02X}",
                        byte
                    ))));
                }
            };

            match op {
                OpCode::Constant => {
                    let value = self.read_constant();
                    self.push(value)?;
                }
                OpCode::Nil => self.push(Value::Nil)?,
                OpCode::True => self.push(Value::Boolean(true))?,
                OpCode::False => self.push(Value::Boolean(false))?,
                OpCode::Pop => {
                    self.pop();
                }
                OpCode::PopN => {
                    let n = self.read_byte() as usize;
                    let new_len = self.stack.len().saturating_sub(n);
                    self.stack.truncate(new_len);
                }

                OpCode::GetLocal => self.handle_get_local()?,
                OpCode::SetLocal => self.handle_set_local()?,
                OpCode::GetGlobal => self.handle_get_global()?,
                OpCode::DefineGlobal => self.handle_define_global()?,
                OpCode::SetGlobal => self.handle_set_global()?,
                OpCode::GetUpvalue => self.handle_get_upvalue()?,
                OpCode::SetUpvalue => self.handle_set_upvalue()?,
                OpCode::CloseUpvalue => {
                    self.close_upvalues(self.stack.len() - 1);
                    self.pop();
                }

                OpCode::Add => self.handle_add()?,
                OpCode::Subtract => self.handle_subtract()?,
                OpCode::Multiply => self.handle_multiply()?,
                OpCode::Divide => self.handle_divide()?,
                OpCode::Modulo => self.handle_modulo()?,
                OpCode::Negate => self.handle_negate()?,
                OpCode::Not => self.handle_not()?,
                OpCode::Equal => self.handle_equal()?,
                OpCode::Greater => self.handle_compare(OpCode::Greater)?,
                OpCode::Less => self.handle_compare(OpCode::Less)?,
                OpCode::Concat => self.handle_concat()?,
                OpCode::Length => self.handle_length()?,

                OpCode::Jump => {
                    let offset = self.read_u16() as usize;
                    self.frames.last_mut().unwrap().ip += offset;
                }
                OpCode::JumpIfFalse => {
                    let offset = self.read_u16() as usize;
                    // peeks so and/or can keep the operand
                    let falsey = !self.peek(0).is_truthy();
                    if falsey {
                        self.frames.last_mut().unwrap().ip += offset;
                    }
                }
                OpCode::Loop => {
                    let offset = self.read_u16() as usize;
                    self.frames.last_mut().unwrap().ip -= offset;
                }

                OpCode::Call => {
                    let argc = self.read_byte() as usize;
                    self.call_value(argc)?;
                }
                OpCode::Invoke => self.handle_invoke()?,
                OpCode::SuperInvoke => self.handle_super_invoke()?,
                OpCode::Closure => self.handle_closure()?,
                OpCode::Return => {
                    if let Some(result) = self.handle_return(exit_frames)? {
                        return Ok(result);
                    }
                }
                OpCode::New => self.handle_new()?,

                OpCode::Class => self.handle_class()?,
                OpCode::Inherit => self.handle_inherit()?,
                OpCode::Method => self.handle_method()?,
                OpCode::GetProperty => self.handle_get_property()?,
                OpCode::SetProperty => self.handle_set_property()?,
                OpCode::GetSuper => self.handle_get_super()?,
                OpCode::Trait => self.handle_trait()?,
                OpCode::Implement => self.handle_implement()?,

                OpCode::Table => self.handle_new_table()?,
                OpCode::TableGet => self.handle_table_get()?,
                OpCode::TableSet => self.handle_table_set()?,
                OpCode::TableAdd => self.handle_table_add()?,
                OpCode::TableSetField => self.handle_table_set_field()?,
            }
        }
    }

    fn trace_instruction(&self) {
        let Some(frame) = self.frames.last() else {
            return;
        };
        print!("          ");
        for value in &self.stack {
            print!("[ {} ]", value);
        }
        println!();
        unsafe {
            crate::backend::disassembler::disassemble_instruction(frame.chunk(), frame.ip);
        }
    }
}
