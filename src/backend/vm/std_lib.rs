// Myulax standard library natives
// Created by: Yuyang Feng <mu_yunaaaa@mail.nwpu.edu.cn>
// Changelog:
// 2026-05-26: print/read/type/tonumber/tostring
// 2026-06-10: pairs/ipairs/next/inext; next() hands back a {key, value} pair
//            table because there is no multi-return in the calling convention
// 2026-06-18: require() with the three-step search path and the cycle sentinel;
//            error/assert go through the regular runtime error path

use std::collections::HashMap;
use std::io::Write;

use crate::backend::vm::error::{ErrorKind, VMError};
use crate::backend::vm::VirtualMachine;
use crate::common::object::{Closure, Native, NativeFn, Table, Value};
use crate::frontend::compiler;

pub fn install(vm: &mut VirtualMachine) {
    define_native(vm, "print", builtin_print);
    define_native(vm, "read", builtin_read);
    define_native(vm, "type", builtin_type);
    define_native(vm, "tonumber", builtin_tonumber);
    define_native(vm, "tostring", builtin_tostring);
    define_native(vm, "next", builtin_next);
    define_native(vm, "inext", builtin_inext);
    define_native(vm, "pairs", builtin_pairs);
    define_native(vm, "ipairs", builtin_ipairs);
    define_native(vm, "error", builtin_error);
    define_native(vm, "assert", builtin_assert);
    define_native(vm, "rawget", builtin_rawget);
    define_native(vm, "rawset", builtin_rawset);
    define_native(vm, "require", builtin_require);
}

fn define_native(vm: &mut VirtualMachine, name: &'static str, func: NativeFn) {
    let ptr = vm
        .heap
        .alloc_native(Native { name, func })
        .expect("BootstrapError: OutOfMemory while registering the standard library");
    vm.globals.insert(name.to_string(), Value::Native(ptr));
}

fn arg(vm: &VirtualMachine, args_start: usize, argc: usize, index: usize) -> Value {
    if index < argc {
        vm.stack[args_start + index]
    } else {
        Value::Nil
    }
}

fn builtin_print(vm: &mut VirtualMachine, args_start: usize, argc: usize) -> Result<Value, VMError> {
    let mut line = String::new();
    for i in 0..argc {
        let value = vm.stack[args_start + i];
        line.push_str(&value.to_string());
        if i + 1 < argc {
            line.push('\t');
        }
    }
    line.push('\n');
    if let Err(e) = vm.out.write_all(line.as_bytes()) {
        return Err(vm.error(ErrorKind::InternalError(format!("I/O error in print: {}", e))));
    }
    Ok(Value::Nil)
}

/// Reads one line from stdin; nil at EOF.
fn builtin_read(vm: &mut VirtualMachine, _args_start: usize, _argc: usize) -> Result<Value, VMError> {
    let mut line = String::new();
    match std::io::stdin().read_line(&mut line) {
        Ok(0) => Ok(Value::Nil),
        Ok(_) => {
            while line.ends_with('\n') || line.ends_with('\r') {
                line.pop();
            }
            let ptr = vm
                .heap
                .intern(&line)
                .ok_or_else(|| vm.error(ErrorKind::OutOfMemory))?;
            Ok(Value::String(ptr))
        }
        Err(e) => Err(vm.error(ErrorKind::InternalError(format!("I/O error in read: {}", e)))),
    }
}

fn builtin_type(vm: &mut VirtualMachine, args_start: usize, argc: usize) -> Result<Value, VMError> {
    let value = arg(vm, args_start, argc, 0);
    let ptr = vm
        .heap
        .intern(value.type_name())
        .ok_or_else(|| vm.error(ErrorKind::OutOfMemory))?;
    Ok(Value::String(ptr))
}

fn builtin_tonumber(
    vm: &mut VirtualMachine,
    args_start: usize,
    argc: usize,
) -> Result<Value, VMError> {
    match arg(vm, args_start, argc, 0) {
        n @ Value::Number(_) => Ok(n),
        Value::String(ptr) => {
            let text = unsafe { (*ptr).data.trim().to_string() };
            match text.parse::<f64>() {
                Ok(n) => Ok(Value::Number(n)),
                Err(_) => Ok(Value::Nil),
            }
        }
        _ => Ok(Value::Nil),
    }
}

fn builtin_tostring(
    vm: &mut VirtualMachine,
    args_start: usize,
    argc: usize,
) -> Result<Value, VMError> {
    let rendered = arg(vm, args_start, argc, 0).to_string();
    let ptr = vm
        .heap
        .intern(&rendered)
        .ok_or_else(|| vm.error(ErrorKind::OutOfMemory))?;
    Ok(Value::String(ptr))
}

/// Iteration order shared by pairs/ipairs/next: array entries in index order
/// first, then hash entries in the map's traversal order (stable for an
/// unmodified table within one run).
fn iteration_sequence(
    vm: &mut VirtualMachine,
    table: Value,
) -> Result<Option<Vec<(Value, Value)>>, VMError> {
    let Value::Table(ptr) = table else {
        return Ok(None);
    };
    let mut sequence = Vec::new();
    unsafe {
        for (i, value) in (*ptr).data.array.iter().enumerate() {
            if *value != Value::Nil {
                sequence.push((Value::Number((i + 1) as f64), *value));
            }
        }
        for (key, value) in (*ptr).data.hash.iter() {
            let interned = vm
                .heap
                .intern(key)
                .ok_or_else(|| vm.error(ErrorKind::OutOfMemory))?;
            sequence.push((Value::String(interned), *value));
        }
    }
    Ok(Some(sequence))
}

fn pair_table(vm: &mut VirtualMachine, key: Value, value: Value) -> Result<Value, VMError> {
    let pair = vm
        .heap
        .alloc_table(Table {
            array: vec![key, value],
            hash: HashMap::new(),
        })
        .ok_or_else(|| vm.error(ErrorKind::OutOfMemory))?;
    Ok(Value::Table(pair))
}

/// next(t, k) -> {key, value} table, or nil when iteration is done.
fn builtin_next(vm: &mut VirtualMachine, args_start: usize, argc: usize) -> Result<Value, VMError> {
    let table = arg(vm, args_start, argc, 0);
    let control = arg(vm, args_start, argc, 1);
    let Some(sequence) = iteration_sequence(vm, table)? else {
        return Ok(Value::Nil);
    };

    let next_index = if control == Value::Nil {
        0
    } else {
        match sequence.iter().position(|(key, _)| *key == control) {
            Some(i) => i + 1,
            None => return Ok(Value::Nil),
        }
    };
    match sequence.get(next_index).copied() {
        Some((key, value)) => pair_table(vm, key, value),
        None => Ok(Value::Nil),
    }
}

/// inext(t, i) -> {i+1, value} over the array part only.
fn builtin_inext(vm: &mut VirtualMachine, args_start: usize, argc: usize) -> Result<Value, VMError> {
    let table = arg(vm, args_start, argc, 0);
    let control = arg(vm, args_start, argc, 1);
    let Value::Table(ptr) = table else {
        return Ok(Value::Nil);
    };

    let next_index = match control {
        Value::Nil => 1usize,
        Value::Number(n) if n >= 0.0 && n.fract() == 0.0 => n as usize + 1,
        _ => return Ok(Value::Nil),
    };
    let value = unsafe { (&(*ptr).data.array).get(next_index - 1).copied() };
    match value {
        Some(v) if v != Value::Nil => pair_table(vm, Value::Number(next_index as f64), v),
        _ => Ok(Value::Nil),
    }
}

/// pairs(t) hands back the `next` iterator callable.
fn builtin_pairs(vm: &mut VirtualMachine, _args_start: usize, _argc: usize) -> Result<Value, VMError> {
    Ok(vm.globals.get("next").copied().unwrap_or(Value::Nil))
}

/// ipairs(t) hands back the array-part iterator `inext`.
fn builtin_ipairs(
    vm: &mut VirtualMachine,
    _args_start: usize,
    _argc: usize,
) -> Result<Value, VMError> {
    Ok(vm.globals.get("inext").copied().unwrap_or(Value::Nil))
}

fn builtin_error(vm: &mut VirtualMachine, args_start: usize, argc: usize) -> Result<Value, VMError> {
    let message = match arg(vm, args_start, argc, 0) {
        Value::String(ptr) => unsafe { (*ptr).data.clone() },
        Value::Nil => "error".to_string(),
        other => other.to_string(),
    };
    Err(vm.error(ErrorKind::UserError(message)))
}

fn builtin_assert(vm: &mut VirtualMachine, args_start: usize, argc: usize) -> Result<Value, VMError> {
    let value = arg(vm, args_start, argc, 0);
    if value.is_truthy() {
        return Ok(value);
    }
    let message = match arg(vm, args_start, argc, 1) {
        Value::String(ptr) => unsafe { (*ptr).data.clone() },
        Value::Nil => "assertion failed!".to_string(),
        other => other.to_string(),
    };
    Err(vm.error(ErrorKind::UserError(message)))
}

fn builtin_rawget(vm: &mut VirtualMachine, args_start: usize, argc: usize) -> Result<Value, VMError> {
    let table = arg(vm, args_start, argc, 0);
    let key = arg(vm, args_start, argc, 1);
    let Value::Table(ptr) = table else {
        return Err(vm.error(ErrorKind::TypeError(format!(
            "rawget expects a table, got '{}'",
            table.type_name()
        ))));
    };
    Ok(vm.table_get_value(ptr, key))
}

fn builtin_rawset(vm: &mut VirtualMachine, args_start: usize, argc: usize) -> Result<Value, VMError> {
    let table = arg(vm, args_start, argc, 0);
    let key = arg(vm, args_start, argc, 1);
    let value = arg(vm, args_start, argc, 2);
    let Value::Table(ptr) = table else {
        return Err(vm.error(ErrorKind::TypeError(format!(
            "rawset expects a table, got '{}'",
            table.type_name()
        ))));
    };
    vm.table_set_value(ptr, key, value)?;
    Ok(table)
}

/// require(name): probe name.mlx, lib/name.mlx, stdlib/name.mlx under the
/// module root; cache the module table BEFORE running the body so cyclic
/// imports see a sentinel; drop the cache entry again on failure.
fn builtin_require(
    vm: &mut VirtualMachine,
    args_start: usize,
    argc: usize,
) -> Result<Value, VMError> {
    let name = match arg(vm, args_start, argc, 0) {
        Value::String(ptr) => unsafe { (*ptr).data.clone() },
        _ => return Ok(Value::Nil),
    };

    if let Some(cached) = vm.modules.get(&name).copied() {
        return Ok(cached);
    }

    let candidates = [
        format!("{}.mlx", name),
        format!("lib/{}.mlx", name),
        format!("stdlib/{}.mlx", name),
    ];
    let mut found = None;
    for candidate in &candidates {
        let path = vm.module_root.join(candidate);
        if path.is_file() {
            found = Some(path);
            break;
        }
    }
    let Some(path) = found else {
        log::debug!("require('{}'): no module file found", name);
        return Ok(Value::Nil);
    };
    let Ok(source) = std::fs::read_to_string(&path) else {
        return Ok(Value::Nil);
    };

    let module_table = vm
        .heap
        .alloc_table(Table::new())
        .ok_or_else(|| vm.error(ErrorKind::OutOfMemory))?;
    let module_value = Value::Table(module_table);
    vm.modules.insert(name.clone(), module_value);

    let origin = path.display().to_string();
    let function = match compiler::compile(&source, &origin, &mut vm.heap) {
        Ok(function) => function,
        Err(_) => {
            vm.modules.remove(&name);
            return Ok(Value::Nil);
        }
    };
    let closure = match vm.heap.alloc_closure(Closure {
        function,
        upvalues: Vec::new(),
    }) {
        Some(ptr) => ptr,
        None => {
            vm.modules.remove(&name);
            return Err(vm.error(ErrorKind::OutOfMemory));
        }
    };

    log::debug!("require('{}'): running {}", name, origin);
    match vm.call_closure(Value::Closure(closure), &[]) {
        Ok(_) => Ok(module_value),
        Err(err) => {
            vm.modules.remove(&name);
            Err(err)
        }
    }
}
