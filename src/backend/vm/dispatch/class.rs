use std::collections::{HashMap, HashSet};

use crate::backend::vm::error::{ErrorKind, VMError};
use crate::backend::vm::VirtualMachine;
use crate::common::object::{BoundMethod, Class, GCObject, Instance, Trait, Value};

impl VirtualMachine {
    pub(super) fn handle_class(&mut self) -> Result<(), VMError> {
        let name = self.read_string_constant()?;
        let class = self
            .heap
            .alloc_class(Class {
                name,
                superclass: std::ptr::null_mut(),
                methods: HashMap::new(),
                privates: HashSet::new(),
            })
            .ok_or_else(|| self.error(ErrorKind::OutOfMemory))?;
        self.push(Value::Class(class))
    }

    /// INHERIT: [superclass, subclass] -> [superclass]. Methods are copied
    /// shallowly; later subclass METHODs simply overwrite entries. The
    /// superclass stays on the stack because it doubles as the synthetic
    /// `super` local.
    pub(super) fn handle_inherit(&mut self) -> Result<(), VMError> {
        let superclass_value = self.peek(1);
        let Value::Class(superclass) = superclass_value else {
            return Err(self.error(ErrorKind::TypeError(format!(
                "superclass must be a class, got '{}'",
                superclass_value.type_name()
            ))));
        };
        let subclass_value = self.pop();
        let Value::Class(subclass) = subclass_value else {
            return Err(self.error(ErrorKind::InternalError(
                "LinkageError: INHERIT expected a class on top of the stack".into(),
            )));
        };

        unsafe {
            let methods: Vec<(String, Value)> = (*superclass)
                .data
                .methods
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect();
            (*subclass).data.methods.extend(methods);
            let privates: Vec<String> = (*superclass).data.privates.iter().cloned().collect();
            (*subclass).data.privates.extend(privates);
            (*subclass).data.superclass = superclass;
        }
        Ok(())
    }

    /// IMPLEMENT: [trait, class] -> []. Trait methods copy into the class.
    pub(super) fn handle_implement(&mut self) -> Result<(), VMError> {
        let class_value = self.pop();
        let trait_value = self.pop();
        let Value::Class(class) = class_value else {
            return Err(self.error(ErrorKind::TypeError(format!(
                "'implements' target must be a class, got '{}'",
                class_value.type_name()
            ))));
        };
        let Value::Trait(implemented) = trait_value else {
            return Err(self.error(ErrorKind::TypeError(format!(
                "a class can only implement traits, got '{}'",
                trait_value.type_name()
            ))));
        };

        unsafe {
            let methods: Vec<(String, Value)> = (*implemented)
                .data
                .methods
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect();
            (*class).data.methods.extend(methods);
        }
        Ok(())
    }

    /// METHOD name priv: [class|trait, closure] -> [class|trait]
    pub(super) fn handle_method(&mut self) -> Result<(), VMError> {
        let name = self.read_string_constant()?;
        let is_private = self.read_byte() == 1;
        let method = self.peek(0);
        let target = self.peek(1);

        match target {
            Value::Class(ptr) => unsafe {
                (*ptr).data.methods.insert(name.clone(), method);
                if is_private {
                    (*ptr).data.privates.insert(name);
                }
            },
            Value::Trait(ptr) => unsafe {
                (*ptr).data.methods.insert(name, method);
            },
            other => {
                return Err(self.error(ErrorKind::InternalError(format!(
                    "LinkageError: METHOD expected a class or trait below the closure, found {}",
                    other.type_name()
                ))));
            }
        }
        self.pop();
        Ok(())
    }

    pub(super) fn handle_trait(&mut self) -> Result<(), VMError> {
        let name = self.read_string_constant()?;
        let new_trait = self
            .heap
            .alloc_trait(Trait {
                name,
                methods: HashMap::new(),
            })
            .ok_or_else(|| self.error(ErrorKind::OutOfMemory))?;
        self.push(Value::Trait(new_trait))
    }

    /// GET_PROPERTY: fields shadow methods; a method access yields a bound
    /// method thunk that injects the receiver when called. Tables resolve
    /// through their hash part so module tables read naturally with '.'.
    pub(super) fn handle_get_property(&mut self) -> Result<(), VMError> {
        let name = self.read_string_constant()?;
        let object = self.peek(0);

        match object {
            Value::Instance(ptr) => {
                let field = unsafe { (*ptr).data.fields.get(&name).copied() };
                if let Some(value) = field {
                    self.pop();
                    return self.push(value);
                }
                let class = unsafe { (*ptr).data.class };
                self.bind_method(class, &name, object)
            }
            Value::Table(ptr) => {
                let value = unsafe { (*ptr).data.hash.get(&name).copied().unwrap_or(Value::Nil) };
                self.pop();
                self.push(value)
            }
            other => Err(self.error(ErrorKind::TypeError(format!(
                "only instances and tables have properties, got '{}'",
                other.type_name()
            )))),
        }
    }

    fn bind_method(
        &mut self,
        class: *mut GCObject<Class>,
        name: &str,
        receiver: Value,
    ) -> Result<(), VMError> {
        let method = unsafe { (*class).data.methods.get(name).copied() };
        match method {
            Some(Value::Closure(closure)) => {
                let bound = self
                    .heap
                    .alloc_bound_method(BoundMethod {
                        receiver,
                        method: closure,
                    })
                    .ok_or_else(|| self.error(ErrorKind::OutOfMemory))?;
                self.pop();
                self.push(Value::BoundMethod(bound))
            }
            _ => Err(self.error(ErrorKind::UndefinedProperty(name.to_string()))),
        }
    }

    pub(super) fn handle_set_property(&mut self) -> Result<(), VMError> {
        let name = self.read_string_constant()?;
        let value = self.pop();
        let object = self.pop();

        match object {
            Value::Instance(ptr) => unsafe {
                (*ptr).data.fields.insert(name, value);
            },
            Value::Table(ptr) => unsafe {
                if value == Value::Nil {
                    (*ptr).data.hash.remove(&name);
                } else {
                    (*ptr).data.hash.insert(name, value);
                }
            },
            other => {
                return Err(self.error(ErrorKind::TypeError(format!(
                    "only instances and tables have settable properties, got '{}'",
                    other.type_name()
                ))));
            }
        }
        self.push(value)
    }

    /// GET_SUPER: [receiver, superclass] -> [bound method]
    pub(super) fn handle_get_super(&mut self) -> Result<(), VMError> {
        let name = self.read_string_constant()?;
        let superclass_value = self.pop();
        let Value::Class(superclass) = superclass_value else {
            return Err(self.error(ErrorKind::InternalError(
                "LinkageError: GET_SUPER expected a class on top of the stack".into(),
            )));
        };
        let receiver = self.peek(0);
        self.bind_method(superclass, &name, receiver)
    }

    /// INVOKE name argc: fused property lookup + call. Instance fields shadow
    /// class methods; the field value replaces the receiver slot and is called
    /// like any other callee.
    pub(super) fn handle_invoke(&mut self) -> Result<(), VMError> {
        let name = self.read_string_constant()?;
        let argc = self.read_byte() as usize;
        let receiver = self.peek(argc);

        match receiver {
            Value::Instance(ptr) => {
                let field = unsafe { (*ptr).data.fields.get(&name).copied() };
                if let Some(value) = field {
                    let slot = self.stack.len() - argc - 1;
                    self.stack[slot] = value;
                    self.call_value(argc)?;
                    return Ok(());
                }
                let class = unsafe { (*ptr).data.class };
                self.invoke_from_class(class, &name, argc)
            }
            Value::Table(ptr) => {
                let entry = unsafe { (*ptr).data.hash.get(&name).copied() };
                match entry {
                    Some(value) => {
                        let slot = self.stack.len() - argc - 1;
                        self.stack[slot] = value;
                        self.call_value(argc)?;
                        Ok(())
                    }
                    None => Err(self.error(ErrorKind::UndefinedProperty(name))),
                }
            }
            other => Err(self.error(ErrorKind::TypeError(format!(
                "only instances and tables have methods, got '{}'",
                other.type_name()
            )))),
        }
    }

    pub(super) fn handle_super_invoke(&mut self) -> Result<(), VMError> {
        let name = self.read_string_constant()?;
        let argc = self.read_byte() as usize;
        let superclass_value = self.pop();
        let Value::Class(superclass) = superclass_value else {
            return Err(self.error(ErrorKind::InternalError(
                "LinkageError: SUPER_INVOKE expected a class on top of the stack".into(),
            )));
        };
        self.invoke_from_class(superclass, &name, argc)
    }

    fn invoke_from_class(
        &mut self,
        class: *mut GCObject<Class>,
        name: &str,
        argc: usize,
    ) -> Result<(), VMError> {
        let method = unsafe { (*class).data.methods.get(name).copied() };
        match method {
            Some(Value::Closure(closure)) => self.call_closure_obj(closure, argc),
            Some(_) => Err(self.error(ErrorKind::InternalError(format!(
                "LinkageError: method table entry '{}' is not a closure",
                name
            )))),
            None => Err(self.error(ErrorKind::UndefinedProperty(name.to_string()))),
        }
    }

    /// NEW argc: [class, args...] -> instance replaces the class slot, then
    /// `init` runs over it if the class has one.
    pub(super) fn handle_new(&mut self) -> Result<(), VMError> {
        let argc = self.read_byte() as usize;
        let class_value = self.peek(argc);
        let Value::Class(class) = class_value else {
            return Err(self.error(ErrorKind::TypeError(format!(
                "can only instantiate classes, got '{}'",
                class_value.type_name()
            ))));
        };

        let instance = self
            .heap
            .alloc_instance(Instance {
                class,
                fields: HashMap::new(),
            })
            .ok_or_else(|| self.error(ErrorKind::OutOfMemory))?;
        let slot = self.stack.len() - argc - 1;
        self.stack[slot] = Value::Instance(instance);

        let init = unsafe { (*class).data.methods.get("init").copied() };
        match init {
            Some(Value::Closure(closure)) => self.call_closure_obj(closure, argc),
            Some(_) => Err(self.error(ErrorKind::InternalError(
                "LinkageError: 'init' method table entry is not a closure".into(),
            ))),
            None if argc != 0 => Err(self.error(ErrorKind::InvalidCall(format!(
                "Expected 0 arguments but got {}",
                argc
            )))),
            None => Ok(()),
        }
    }
}
