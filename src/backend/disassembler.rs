// Myulax bytecode disassembler
// Created by: Yuyang Feng <mu_yunaaaa@mail.nwpu.edu.cn>
// Changelog:
// 2026-06-02: Initial version; only wired up behind --dump-bytecode and --trace

use crate::common::chunk::Chunk;
use crate::common::object::{Function, GCObject, Value};
use crate::common::opcode::OpCode;

/// Dump one function and, recursively, every function in its constant pool.
pub fn disassemble_function(function: *mut GCObject<Function>) {
    unsafe {
        let f = &(*function).data;
        disassemble_chunk(&f.chunk, f.display_name());
        for constant in &f.chunk.constants {
            if let Value::Function(nested) = constant {
                disassemble_function(*nested);
            }
        }
    }
}

pub fn disassemble_chunk(chunk: &Chunk, name: &str) {
    println!("== {} ==", name);
    let mut offset = 0;
    while offset < chunk.code.len() {
        offset = disassemble_instruction(chunk, offset);
    }
}

/// Print one instruction, return the offset of the next.
pub fn disassemble_instruction(chunk: &Chunk, offset: usize) -> usize {
    print!("{:04} ", offset);
    if offset > 0 && chunk.lines[offset] == chunk.lines[offset - 1] {
        print!("   | ");
    } else {
        print!("{:4} ", chunk.lines[offset]);
    }

    let Ok(op) = OpCode::try_from(chunk.code[offset]) else {
        println!("UNKNOWN {:#04x}", chunk.code[offset]);
        return offset + 1;
    };

    match op {
        OpCode::Constant
        | OpCode::GetGlobal
        | OpCode::DefineGlobal
        | OpCode::SetGlobal
        | OpCode::Class
        | OpCode::Trait
        | OpCode::GetProperty
        | OpCode::SetProperty
        | OpCode::GetSuper
        | OpCode::TableSetField => constant_instruction(op, chunk, offset),

        OpCode::PopN
        | OpCode::GetLocal
        | OpCode::SetLocal
        | OpCode::GetUpvalue
        | OpCode::SetUpvalue
        | OpCode::Call
        | OpCode::New => byte_instruction(op, chunk, offset),

        OpCode::Jump | OpCode::JumpIfFalse => jump_instruction(op, 1, chunk, offset),
        OpCode::Loop => jump_instruction(op, -1, chunk, offset),

        OpCode::Invoke | OpCode::SuperInvoke => invoke_instruction(op, chunk, offset),
        OpCode::Method => method_instruction(chunk, offset),
        OpCode::Closure => closure_instruction(chunk, offset),

        _ => {
            println!("{:?}", op);
            offset + 1
        }
    }
}

fn constant_instruction(op: OpCode, chunk: &Chunk, offset: usize) -> usize {
    let index = chunk.code[offset + 1] as usize;
    print!("{:<16} {:4} ", format!("{:?}", op), index);
    match chunk.constants.get(index) {
        Some(value) => println!("'{}'", value),
        None => println!("<bad constant>"),
    }
    offset + 2
}

fn byte_instruction(op: OpCode, chunk: &Chunk, offset: usize) -> usize {
    println!("{:<16} {:4}", format!("{:?}", op), chunk.code[offset + 1]);
    offset + 2
}

fn jump_instruction(op: OpCode, sign: i64, chunk: &Chunk, offset: usize) -> usize {
    let jump = ((chunk.code[offset + 1] as u16) << 8 | chunk.code[offset + 2] as u16) as i64;
    let target = offset as i64 + 3 + sign * jump;
    println!("{:<16} {:4} -> {}", format!("{:?}", op), offset, target);
    offset + 3
}

fn invoke_instruction(op: OpCode, chunk: &Chunk, offset: usize) -> usize {
    let index = chunk.code[offset + 1] as usize;
    let argc = chunk.code[offset + 2];
    print!("{:<16} ({} args) {:4} ", format!("{:?}", op), argc, index);
    match chunk.constants.get(index) {
        Some(value) => println!("'{}'", value),
        None => println!("<bad constant>"),
    }
    offset + 3
}

fn method_instruction(chunk: &Chunk, offset: usize) -> usize {
    let index = chunk.code[offset + 1] as usize;
    let private = chunk.code[offset + 2] == 1;
    print!("{:<16} {:4} ", "Method", index);
    match chunk.constants.get(index) {
        Some(value) => print!("'{}'", value),
        None => print!("<bad constant>"),
    }
    println!("{}", if private { " (private)" } else { "" });
    offset + 3
}

fn closure_instruction(chunk: &Chunk, offset: usize) -> usize {
    let index = chunk.code[offset + 1] as usize;
    print!("{:<16} {:4} ", "Closure", index);
    let mut next = offset + 2;
    match chunk.constants.get(index) {
        Some(Value::Function(function)) => {
            println!("'{}'", chunk.constants[index]);
            let upvalue_count = unsafe { (*(*function)).data.upvalue_count };
            for _ in 0..upvalue_count {
                let is_local = chunk.code[next] == 1;
                let capture_index = chunk.code[next + 1];
                println!(
                    "{:04}    |                     {} {}",
                    next,
                    if is_local { "local" } else { "upvalue" },
                    capture_index
                );
                next += 2;
            }
        }
        _ => println!("<bad constant>"),
    }
    next
}
