use crate::backend::vm::error::{ErrorKind, VMError};
use crate::backend::vm::VirtualMachine;
use crate::common::object::Value;
use crate::common::opcode::OpCode;

impl VirtualMachine {
    /// ADD: push(pop() + pop()), numbers only ('..' handles strings)
    pub(super) fn handle_add(&mut self) -> Result<(), VMError> {
        self.binary_number_op(|a, b| a + b, "+")
    }

    pub(super) fn handle_subtract(&mut self) -> Result<(), VMError> {
        self.binary_number_op(|a, b| a - b, "-")
    }

    pub(super) fn handle_multiply(&mut self) -> Result<(), VMError> {
        self.binary_number_op(|a, b| a * b, "*")
    }

    pub(super) fn handle_divide(&mut self) -> Result<(), VMError> {
        if let Value::Number(divisor) = self.peek(0) {
            if divisor == 0.0 {
                return Err(self.error(ErrorKind::ArithmeticError(
                    "ArithmeticException: division by zero".into(),
                )));
            }
        }
        self.binary_number_op(|a, b| a / b, "/")
    }

    pub(super) fn handle_modulo(&mut self) -> Result<(), VMError> {
        if let Value::Number(divisor) = self.peek(0) {
            if divisor == 0.0 {
                return Err(self.error(ErrorKind::ArithmeticError(
                    "ArithmeticException: modulo by zero".into(),
                )));
            }
        }
        self.binary_number_op(|a, b| a % b, "%")
    }

    fn binary_number_op<F>(&mut self, op: F, op_name: &str) -> Result<(), VMError>
    where
        F: Fn(f64, f64) -> f64,
    {
        let rhs = self.peek(0);
        let lhs = self.peek(1);
        match (lhs, rhs) {
            (Value::Number(a), Value::Number(b)) => {
                self.pop();
                self.pop();
                self.push(Value::Number(op(a, b)))
            }
            _ => Err(self.error(ErrorKind::TypeError(format!(
                "binary operator '{}' is not defined for types '{}' and '{}'",
                op_name,
                lhs.type_name(),
                rhs.type_name()
            )))),
        }
    }

    pub(super) fn handle_negate(&mut self) -> Result<(), VMError> {
        match self.peek(0) {
            Value::Number(n) => {
                self.pop();
                self.push(Value::Number(-n))
            }
            other => Err(self.error(ErrorKind::TypeError(format!(
                "operator '-' is not defined for type '{}'",
                other.type_name()
            )))),
        }
    }

    pub(super) fn handle_not(&mut self) -> Result<(), VMError> {
        let value = self.pop();
        self.push(Value::Boolean(!value.is_truthy()))
    }

    pub(super) fn handle_equal(&mut self) -> Result<(), VMError> {
        let rhs = self.pop();
        let lhs = self.pop();
        self.push(Value::Boolean(lhs == rhs))
    }

    /// GREATER / LESS on numbers, plus lexicographic string comparison.
    pub(super) fn handle_compare(&mut self, op: OpCode) -> Result<(), VMError> {
        let rhs = self.peek(0);
        let lhs = self.peek(1);
        let result = match (lhs, rhs) {
            (Value::Number(a), Value::Number(b)) => {
                if op == OpCode::Greater {
                    a > b
                } else {
                    a < b
                }
            }
            (Value::String(a), Value::String(b)) => unsafe {
                if op == OpCode::Greater {
                    (*a).data > (*b).data
                } else {
                    (*a).data < (*b).data
                }
            },
            _ => {
                let symbol = if op == OpCode::Greater { ">" } else { "<" };
                return Err(self.error(ErrorKind::TypeError(format!(
                    "comparison '{}' is not defined for types '{}' and '{}'",
                    symbol,
                    lhs.type_name(),
                    rhs.type_name()
                ))));
            }
        };
        self.pop();
        self.pop();
        self.push(Value::Boolean(result))
    }

    pub(super) fn handle_concat(&mut self) -> Result<(), VMError> {
        let rhs = self.peek(0);
        let lhs = self.peek(1);
        let left = self.concat_operand(&lhs)?;
        let right = self.concat_operand(&rhs)?;
        let combined = left + &right;

        let ptr = self
            .heap
            .intern(&combined)
            .ok_or_else(|| self.error(ErrorKind::OutOfMemory))?;
        self.pop();
        self.pop();
        self.push(Value::String(ptr))
    }

    fn concat_operand(&self, value: &Value) -> Result<String, VMError> {
        match value {
            Value::String(ptr) => unsafe { Ok((*(*ptr)).data.clone()) },
            Value::Number(n) => Ok(n.to_string()),
            Value::Nil => Err(self.error(ErrorKind::TypeError(
                "NullPointerException: illegal concatenation of a nil value".into(),
            ))),
            other => Err(self.error(ErrorKind::TypeError(format!(
                "cannot concatenate a value of type '{}'",
                other.type_name()
            )))),
        }
    }

    /// '#': string byte length or table array-part length.
    pub(super) fn handle_length(&mut self) -> Result<(), VMError> {
        let value = self.peek(0);
        let length = match value {
            Value::String(ptr) => unsafe { (&(*ptr).data).len() as f64 },
            Value::Table(ptr) => unsafe { (*ptr).data.array.len() as f64 },
            other => {
                return Err(self.error(ErrorKind::TypeError(format!(
                    "operator '#' is not defined for type '{}'",
                    other.type_name()
                ))));
            }
        };
        self.pop();
        self.push(Value::Number(length))
    }
}
