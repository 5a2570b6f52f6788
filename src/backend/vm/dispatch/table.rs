use crate::backend::vm::error::{ErrorKind, VMError};
use crate::backend::vm::VirtualMachine;
use crate::common::object::{GCObject, Table, Value};

/// Integer table index usable for the array part: whole numbers >= 1.
fn array_index(n: f64) -> Option<usize> {
    if n.fract() == 0.0 && n >= 1.0 && n <= u32::MAX as f64 {
        Some(n as usize)
    } else {
        None
    }
}

impl VirtualMachine {
    pub(super) fn handle_new_table(&mut self) -> Result<(), VMError> {
        let table = self
            .heap
            .alloc_table(Table::new())
            .ok_or_else(|| self.error(ErrorKind::OutOfMemory))?;
        self.push(Value::Table(table))
    }

    pub(super) fn handle_table_get(&mut self) -> Result<(), VMError> {
        let key = self.pop();
        let table_value = self.pop();
        let Value::Table(table) = table_value else {
            return Err(self.error(ErrorKind::TypeError(format!(
                "attempt to index a non-table value of type '{}'",
                table_value.type_name()
            ))));
        };
        let value = self.table_get_value(table, key);
        self.push(value)
    }

    pub(super) fn handle_table_set(&mut self) -> Result<(), VMError> {
        let value = self.pop();
        let key = self.pop();
        let table_value = self.pop();
        let Value::Table(table) = table_value else {
            return Err(self.error(ErrorKind::TypeError(format!(
                "attempt to index a non-table value of type '{}'",
                table_value.type_name()
            ))));
        };
        self.table_set_value(table, key, value)?;
        // assignment expressions yield their value
        self.push(value)
    }

    /// TABLE_ADD: positional literal entry, appends to the array part.
    pub(super) fn handle_table_add(&mut self) -> Result<(), VMError> {
        let value = self.pop();
        let table_value = self.peek(0);
        let Value::Table(table) = table_value else {
            return Err(self.error(ErrorKind::InternalError(
                "LinkageError: TABLE_ADD expected a table below the value".into(),
            )));
        };
        unsafe {
            (*table).data.array.push(value);
        }
        Ok(())
    }

    /// TABLE_SET_FIELD k: `name = value` literal entry on the hash part.
    pub(super) fn handle_table_set_field(&mut self) -> Result<(), VMError> {
        let name = self.read_string_constant()?;
        let value = self.pop();
        let table_value = self.peek(0);
        let Value::Table(table) = table_value else {
            return Err(self.error(ErrorKind::InternalError(
                "LinkageError: TABLE_SET_FIELD expected a table below the value".into(),
            )));
        };
        unsafe {
            if value == Value::Nil {
                (*table).data.hash.remove(&name);
            } else {
                (*table).data.hash.insert(name, value);
            }
        }
        Ok(())
    }

    /// Fused lookup: integer keys 1..=len hit the array part, strings the hash
    /// part, anything else reads as nil. rawget exposes exactly this.
    pub(crate) fn table_get_value(&self, table: *mut GCObject<Table>, key: Value) -> Value {
        unsafe {
            match key {
                Value::Number(n) => match array_index(n) {
                    Some(index) => (&(*table)
                        .data
                        .array)
                        .get(index - 1)
                        .copied()
                        .unwrap_or(Value::Nil),
                    None => Value::Nil,
                },
                Value::String(ptr) => (*table)
                    .data
                    .hash
                    .get((*ptr).data.as_str())
                    .copied()
                    .unwrap_or(Value::Nil),
                _ => Value::Nil,
            }
        }
    }

    /// Fused store: integer keys grow the array with nil padding, string keys
    /// update the hash part (nil deletes), anything else is an error. rawset
    /// exposes exactly this.
    pub(crate) fn table_set_value(
        &mut self,
        table: *mut GCObject<Table>,
        key: Value,
        value: Value,
    ) -> Result<(), VMError> {
        unsafe {
            match key {
                Value::Number(n) => {
                    let Some(index) = array_index(n) else {
                        return Err(self.error(ErrorKind::IllegalIndex(format!(
                            "array index must be a whole number >= 1, got {}",
                            n
                        ))));
                    };
                    let array = &mut (*table).data.array;
                    if index > array.len() {
                        array.resize(index, Value::Nil);
                    }
                    array[index - 1] = value;
                    Ok(())
                }
                Value::String(ptr) => {
                    let name = (*ptr).data.clone();
                    if value == Value::Nil {
                        (*table).data.hash.remove(&name);
                    } else {
                        (*table).data.hash.insert(name, value);
                    }
                    Ok(())
                }
                Value::Nil => Err(self.error(ErrorKind::IllegalIndex(
                    "NullPointerException: table index is nil".into(),
                ))),
                other => Err(self.error(ErrorKind::IllegalIndex(format!(
                    "illegal table key of type '{}'",
                    other.type_name()
                )))),
            }
        }
    }
}
