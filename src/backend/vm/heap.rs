// Myulax VM heap
// Created by: Yuyang Feng <mu_yunaaaa@mail.nwpu.edu.cn>
// Changelog:
// 2026-05-06: Initial version, kept the Myula 1.x design: one intrusive all-objects
//            list, a string pool for interning, byte-precise size accounting and a
//            hard memory ceiling inside the single raw allocation routine.
// 2026-05-23: One typed allocator per object kind now that the OOP extension brings
//            closures/upvalues/classes/instances/bound methods/traits.
// 2026-06-12: GC trigger is threshold-based with stress-mode override; threshold
//            rebalances to 2x live bytes after every sweep. Teardown walks the
//            all-objects list once in Drop.

use std::collections::HashMap;

use crate::common::object::{
    BoundMethod, Class, Closure, Function, GCObject, HeaderOnly, Instance, Native, ObjectKind,
    Table, Trait, Upvalue, Value,
};

/// Initial GC threshold: 1 MiB.
pub const GC_INITIAL_THRESHOLD: usize = 1024 * 1024;
/// Ultimate safeguard against runaway allocation. 512 MiB.
pub const HARD_MEMORY_LIMIT: usize = 1024 * 1024 * 512;
const GC_GROW_FACTOR: usize = 2;

pub struct Heap {
    pub all_objects: *mut GCObject<HeaderOnly>,
    pub string_pool: HashMap<String, *mut GCObject<String>>,
    pub total_allocated: usize,
    pub threshold: usize,
    // debug/tuning only, not consulted by GC logic
    pub max_allocated: usize,
    /// collect at every safe point; used by the GC test suite
    pub stress: bool,
}

impl Heap {
    pub fn new() -> Self {
        Self {
            all_objects: std::ptr::null_mut(),
            string_pool: HashMap::new(),
            total_allocated: 0,
            threshold: GC_INITIAL_THRESHOLD,
            max_allocated: 0,
            stress: false,
        }
    }

    /// Interning entry point: equal contents always return the same object.
    pub fn intern(&mut self, s: &str) -> Option<*mut GCObject<String>> {
        if let Some(&ptr) = self.string_pool.get(s) {
            return Some(ptr);
        }
        self.alloc_string(s.to_string())
    }

    fn alloc_string(&mut self, s: String) -> Option<*mut GCObject<String>> {
        if let Some(&ptr) = self.string_pool.get(&s) {
            return Some(ptr);
        }

        let size = std::mem::size_of::<GCObject<String>>() + s.capacity();
        let ptr = self.alloc_raw_object(s.clone(), ObjectKind::String, size)?;
        self.string_pool.insert(s, ptr);
        Some(ptr)
    }

    pub fn alloc_function(&mut self, data: Function) -> Option<*mut GCObject<Function>> {
        let size = std::mem::size_of::<GCObject<Function>>()
            + data.chunk.code.capacity()
            + data.chunk.lines.capacity() * std::mem::size_of::<u32>()
            + data.chunk.constants.capacity() * std::mem::size_of::<Value>();
        self.alloc_raw_object(data, ObjectKind::Function, size)
    }

    pub fn alloc_native(&mut self, data: Native) -> Option<*mut GCObject<Native>> {
        let size = std::mem::size_of::<GCObject<Native>>();
        self.alloc_raw_object(data, ObjectKind::Native, size)
    }

    pub fn alloc_closure(&mut self, data: Closure) -> Option<*mut GCObject<Closure>> {
        let size = std::mem::size_of::<GCObject<Closure>>()
            + data.upvalues.capacity() * std::mem::size_of::<*mut GCObject<Upvalue>>();
        self.alloc_raw_object(data, ObjectKind::Closure, size)
    }

    pub fn alloc_upvalue(&mut self, data: Upvalue) -> Option<*mut GCObject<Upvalue>> {
        let size = std::mem::size_of::<GCObject<Upvalue>>();
        self.alloc_raw_object(data, ObjectKind::Upvalue, size)
    }

    pub fn alloc_class(&mut self, data: Class) -> Option<*mut GCObject<Class>> {
        let size = std::mem::size_of::<GCObject<Class>>() + data.name.capacity();
        self.alloc_raw_object(data, ObjectKind::Class, size)
    }

    pub fn alloc_instance(&mut self, data: Instance) -> Option<*mut GCObject<Instance>> {
        let size = std::mem::size_of::<GCObject<Instance>>()
            + data.fields.capacity() * std::mem::size_of::<(String, Value)>();
        self.alloc_raw_object(data, ObjectKind::Instance, size)
    }

    pub fn alloc_bound_method(&mut self, data: BoundMethod) -> Option<*mut GCObject<BoundMethod>> {
        let size = std::mem::size_of::<GCObject<BoundMethod>>();
        self.alloc_raw_object(data, ObjectKind::BoundMethod, size)
    }

    pub fn alloc_table(&mut self, data: Table) -> Option<*mut GCObject<Table>> {
        let size = std::mem::size_of::<GCObject<Table>>()
            + data.array.capacity() * std::mem::size_of::<Value>()
            + data.hash.capacity() * std::mem::size_of::<(String, Value)>();
        self.alloc_raw_object(data, ObjectKind::Table, size)
    }

    pub fn alloc_trait(&mut self, data: Trait) -> Option<*mut GCObject<Trait>> {
        let size = std::mem::size_of::<GCObject<Trait>>() + data.name.capacity();
        self.alloc_raw_object(data, ObjectKind::Trait, size)
    }

    /// The single allocation routine: links the object into the all-objects
    /// list and charges it to the allocation counter. None means the hard
    /// memory ceiling would be exceeded.
    fn alloc_raw_object<T>(
        &mut self,
        data: T,
        kind: ObjectKind,
        size: usize,
    ) -> Option<*mut GCObject<T>> {
        if self.total_allocated + size > HARD_MEMORY_LIMIT {
            return None;
        }

        let obj = GCObject {
            mark: false,
            kind,
            size,
            next: self.all_objects,
            data,
        };
        let ptr = Box::into_raw(Box::new(obj));
        self.all_objects = ptr as *mut GCObject<HeaderOnly>;

        self.total_allocated += size;
        if self.total_allocated > self.max_allocated {
            self.max_allocated = self.total_allocated;
        }

        Some(ptr)
    }

    pub fn should_collect(&self) -> bool {
        self.stress || self.total_allocated > self.threshold
    }

    /// nextGC = live bytes * grow factor, never below the initial threshold.
    pub fn rebalance_threshold(&mut self) {
        self.threshold = (self.total_allocated * GC_GROW_FACTOR).max(GC_INITIAL_THRESHOLD);
    }

    /// Uncharge and free one object. The caller must already have unlinked it
    /// from the all-objects list.
    ///
    /// Safety: `ptr` must be a live allocation produced by `alloc_raw_object`
    /// and must not be referenced again afterwards.
    pub unsafe fn free_object(&mut self, ptr: *mut GCObject<HeaderOnly>) {
        unsafe {
            let kind = (*ptr).kind;
            let size = (*ptr).size;
            self.total_allocated = self.total_allocated.saturating_sub(size);

            match kind {
                ObjectKind::String => {
                    let typed = ptr as *mut GCObject<String>;
                    // keep the pool honest: dead strings must not resurrect
                    self.string_pool.remove(&(*typed).data);
                    drop(Box::from_raw(typed));
                }
                ObjectKind::Function => drop(Box::from_raw(ptr as *mut GCObject<Function>)),
                ObjectKind::Native => drop(Box::from_raw(ptr as *mut GCObject<Native>)),
                ObjectKind::Closure => drop(Box::from_raw(ptr as *mut GCObject<Closure>)),
                ObjectKind::Upvalue => drop(Box::from_raw(ptr as *mut GCObject<Upvalue>)),
                ObjectKind::Class => drop(Box::from_raw(ptr as *mut GCObject<Class>)),
                ObjectKind::Instance => drop(Box::from_raw(ptr as *mut GCObject<Instance>)),
                ObjectKind::BoundMethod => {
                    drop(Box::from_raw(ptr as *mut GCObject<BoundMethod>))
                }
                ObjectKind::Table => drop(Box::from_raw(ptr as *mut GCObject<Table>)),
                ObjectKind::Trait => drop(Box::from_raw(ptr as *mut GCObject<Trait>)),
            }
        }
    }

    /// Number of objects currently on the all-objects list. Debug/test helper.
    pub fn object_count(&self) -> usize {
        let mut count = 0;
        let mut cursor = self.all_objects;
        unsafe {
            while !cursor.is_null() {
                count += 1;
                cursor = (*cursor).next;
            }
        }
        count
    }
}

impl Drop for Heap {
    // teardown: one walk over the all-objects list, no marking involved
    fn drop(&mut self) {
        let mut cursor = self.all_objects;
        unsafe {
            while !cursor.is_null() {
                let next = (*cursor).next;
                self.free_object(cursor);
                cursor = next;
            }
        }
        self.all_objects = std::ptr::null_mut();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_returns_identical_pointers() {
        let mut heap = Heap::new();
        let a = heap.intern("hello").unwrap();
        let assembled = format!("{}{}", "hel", "lo");
        let b = heap.intern(&assembled).unwrap();
        assert_eq!(a, b);
        assert_eq!(heap.object_count(), 1);
    }

    #[test]
    fn allocation_is_charged_and_linked() {
        let mut heap = Heap::new();
        assert_eq!(heap.object_count(), 0);
        heap.intern("x").unwrap();
        heap.intern("y").unwrap();
        assert_eq!(heap.object_count(), 2);
        assert!(heap.total_allocated > 0);
    }

    #[test]
    fn stress_mode_forces_collection_checks() {
        let mut heap = Heap::new();
        assert!(!heap.should_collect());
        heap.stress = true;
        assert!(heap.should_collect());
    }
}
