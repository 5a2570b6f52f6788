// Myulax VM runtime errors
// Created by: Yuyang Feng <mu_yunaaaa@mail.nwpu.edu.cn>
// Changelog:
// 2026-05-06: Initial version, carried the ErrorKind hierarchy over from Myula 1.x
// 2026-05-22: Stack trace entries are now (function, line) pairs instead of bare
//            names; the line comes from the chunk's per-byte line array.
// 2026-06-12: Added the public InterpretError boundary type (thiserror).

use thiserror::Error;

#[derive(Debug, Clone)]
pub enum ErrorKind {
    // 类型错误：例如 1 + "a"
    TypeError(String),
    // 访问未定义的全局变量
    UndefinedVariable(String),
    // 实例/类上不存在的属性或方法
    UndefinedProperty(String),
    // 尝试调用一个非函数类型，或实参个数不符
    InvalidCall(String),
    // 除以 0 等
    ArithmeticError(String),
    // 表下标不是整数也不是字符串
    IllegalIndex(String),
    // error()/assert() 抛出的用户级错误
    UserError(String),
    // 递归太深
    StackOverflow,
    // GC 后仍无法分配
    OutOfMemory,
    // OpCode 损坏或 VM 实现 Bug
    InternalError(String),
}

/// A runtime failure plus the call-stack snapshot taken where it happened.
#[derive(Debug, Clone)]
pub struct VMError {
    pub kind: ErrorKind,
    pub line: u32,
    /// innermost frame last: (function name, current source line)
    pub stack_trace: Vec<(String, u32)>,
}

impl std::fmt::Display for VMError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [line {}]", self.message(), self.line)
    }
}

impl VMError {
    pub fn message(&self) -> String {
        match &self.kind {
            ErrorKind::TypeError(m) => self.with_exception_name("TypeMismatchException", m),
            ErrorKind::InvalidCall(m) => self.with_exception_name("IllegalInvocationException", m),
            ErrorKind::ArithmeticError(m) => self.with_exception_name("ArithmeticException", m),
            ErrorKind::IllegalIndex(m) => self.with_exception_name("IllegalIndexException", m),
            ErrorKind::InternalError(m) => {
                self.with_exception_name("InternalExecutionException", m)
            }

            ErrorKind::UndefinedVariable(v) => format!(
                "UnresolvedSymbolException: reference to undefined variable '{}'",
                v
            ),
            ErrorKind::UndefinedProperty(p) => {
                format!("UnresolvedSymbolException: undefined property '{}'", p)
            }

            ErrorKind::UserError(m) => format!("RuntimeException: {}", m),

            ErrorKind::StackOverflow => {
                "StackOverflowError: call stack depth limit exceeded".into()
            }
            ErrorKind::OutOfMemory => "OutOfMemoryError: heap exhaustion during allocation".into(),
        }
    }

    fn with_exception_name(&self, exception_name: &str, message: &str) -> String {
        if message.starts_with(exception_name) {
            message.to_string()
        } else {
            format!("{}: {}", exception_name, message)
        }
    }
}

/// What the host sees from `interpret`. Exit-code mapping lives in the CLI.
#[derive(Debug, Error)]
pub enum InterpretError {
    #[error("compilation failed with {0} error(s)")]
    Compile(usize),
    #[error("{0}")]
    Runtime(VMError),
}
