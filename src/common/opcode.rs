// Myulax bytecode opcode set
// Created by: Yuyang Feng <mu_yunaaaa@mail.nwpu.edu.cn>
// Changelog:
// 2026-05-02: Initial version, switched from the register ISA of Myula 1.x to a
//            stack ISA so the emitter can stay single-pass (no register scanner).
// 2026-05-19: Added the OOP group (CLASS/INHERIT/METHOD/...) and TRAIT/IMPLEMENT.
// 2026-05-28: Added NEW and the table literal fast paths (TABLE_ADD/TABLE_SET_FIELD).

use num_enum::TryFromPrimitive;

/// One byte per opcode; operands follow inline in the code stream.
/// 16-bit jump operands are big-endian, unsigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum OpCode {
    /* --- 基础加载 / stack and constants --- */
    /// push constants[k8]
    Constant,
    Nil,
    True,
    False,
    Pop,
    /// pop n8 slots at once
    PopN,

    /* --- 变量访问 / variables --- */
    /// push stack[base + s8]
    GetLocal,
    /// stack[base + s8] = peek(0), does NOT pop
    SetLocal,
    /// push globals[constants[k8]]
    GetGlobal,
    /// globals[constants[k8]] = pop()
    DefineGlobal,
    /// assign an existing global; runtime error when undefined
    SetGlobal,
    GetUpvalue,
    SetUpvalue,
    /// close the single top-of-stack slot, then pop it
    CloseUpvalue,

    /* --- 算术与逻辑 / arithmetic and logic --- */
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Negate,
    Not,
    Equal,
    Greater,
    Less,
    /// Lua `..`; numbers coerce to strings, everything else is an error
    Concat,
    /// Lua `#`; string byte length or table array-part length
    Length,

    /* --- 控制流 / control flow --- */
    /// ip += o16
    Jump,
    /// ip += o16 when peek(0) is falsey; PEEKS, never pops
    JumpIfFalse,
    /// ip -= o16 (backward)
    Loop,

    /* --- 函数调用 / calls --- */
    /// call peek(n8) with n8 args
    Call,
    /// obj.name(args) fused lookup+call: k8 = method name, n8 = argc
    Invoke,
    /// like Invoke but resolves on the superclass popped from the stack
    SuperInvoke,
    /// push closure over constants[k8]; followed by upvalue_count pairs of
    /// (is_local u8, index u8)
    Closure,
    Return,
    /// new Class(args): n8 = argc, class sits below the args
    New,

    /* --- 面向对象 / OOP --- */
    Class,
    /// copy superclass methods into the subclass (shallow), pop the subclass
    Inherit,
    /// attach pop()'d closure to the class/trait below; k8 = name, p8 = private
    Method,
    GetProperty,
    SetProperty,
    GetSuper,
    Trait,
    /// copy trait methods into the class; stack is [trait, class]
    Implement,

    /* --- 表操作 / tables --- */
    Table,
    TableGet,
    TableSet,
    /// append pop() to the array part (positional literal entries)
    TableAdd,
    /// set string field constants[k8] = pop() on the table below
    TableSetField,
}

impl OpCode {
    /// Fixed operand byte count trailing the opcode. `Closure` additionally
    /// carries `upvalue_count` (is_local, index) pairs that only the function
    /// constant knows about.
    pub fn operand_len(self) -> usize {
        match self {
            OpCode::Constant
            | OpCode::PopN
            | OpCode::GetLocal
            | OpCode::SetLocal
            | OpCode::GetGlobal
            | OpCode::DefineGlobal
            | OpCode::SetGlobal
            | OpCode::GetUpvalue
            | OpCode::SetUpvalue
            | OpCode::Call
            | OpCode::Closure
            | OpCode::New
            | OpCode::Class
            | OpCode::GetProperty
            | OpCode::SetProperty
            | OpCode::GetSuper
            | OpCode::Trait
            | OpCode::TableSetField => 1,

            OpCode::Jump | OpCode::JumpIfFalse | OpCode::Loop | OpCode::Invoke
            | OpCode::SuperInvoke | OpCode::Method => 2,

            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_roundtrip_through_byte() {
        let ops = [OpCode::Constant, OpCode::Closure, OpCode::TableSetField];
        for op in ops {
            assert_eq!(OpCode::try_from(op as u8), Ok(op));
        }
    }

    #[test]
    fn unknown_byte_is_rejected() {
        assert!(OpCode::try_from(0xEEu8).is_err());
    }
}
