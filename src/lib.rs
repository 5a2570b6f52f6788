// Myulax: a class-extended Lua dialect compiler and VM
// Created by: Yuyang Feng <mu_yunaaaa@mail.nwpu.edu.cn>
//             Zimeng Li <zimengli@mail.nwpu.edu.cn>

pub mod backend;
pub mod common;
pub mod frontend;

pub use backend::vm::error::InterpretError;
pub use backend::vm::VirtualMachine;
