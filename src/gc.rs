//! Precise mark-and-sweep garbage collection over the intrusive object
//! heap.
//!
//! `Gc` owns every heap allocation reachable through an [`ObjRef`] and the
//! weak string-intern table. It does not know about the VM's stack, call
//! frames, or the compiler's in-progress function chain — those are
//! supplied as roots by the caller (`vm::Vm::collect_garbage`) at collection
//! time, per the design note that root discovery should be explicit rather
//! than a global singleton walk.

use std::mem;
use std::ptr::NonNull;

use tracing::trace;

use crate::object::{Obj, ObjData, ObjHeader, ObjRef, ObjectKind, UpvalueLocation};
use crate::table::{fnv1a, Table};
use crate::value::Value;

/// Collection runs once `bytes_allocated` exceeds this many bytes; doubled
/// after every collection. A smaller starting threshold just means the
/// first collection runs sooner — harmless, since mark-sweep is correct at
/// any trigger point.
const INITIAL_NEXT_GC: usize = 1024 * 1024;

pub struct Gc {
    head: Option<NonNull<Obj>>,
    bytes_allocated: usize,
    next_gc: usize,
    gray_stack: Vec<ObjRef>,
    /// Weak map from string content to its single interned `ObjRef`. Values
    /// stored here are meaningless placeholders; only key presence matters.
    strings: Table,
    /// When set (`CORVID_GC_STRESS`), every allocation triggers a full
    /// collection instead of only once `next_gc` is exceeded. Used to prove
    /// the interpreter's output doesn't depend on collection timing.
    pub stress_mode: bool,
}

impl Gc {
    pub fn new() -> Gc {
        Gc {
            head: None,
            bytes_allocated: 0,
            next_gc: INITIAL_NEXT_GC,
            gray_stack: Vec::new(),
            strings: Table::new(),
            stress_mode: false,
        }
    }

    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated
    }

    pub fn should_collect(&self) -> bool {
        self.stress_mode || self.bytes_allocated > self.next_gc
    }

    fn approx_size(data: &ObjData) -> usize {
        let base = mem::size_of::<Obj>();
        base + match data {
            ObjData::String(s) => s.bytes.len(),
            ObjData::Closure(c) => c.upvalues.len() * mem::size_of::<ObjRef>(),
            ObjData::Function(f) => f.chunk.code.len() + f.chunk.constants.len() * mem::size_of::<Value>(),
            _ => 0,
        }
    }

    fn alloc(&mut self, data: ObjData) -> ObjRef {
        let kind = match &data {
            ObjData::String(_) => ObjectKind::String,
            ObjData::Function(_) => ObjectKind::Function,
            ObjData::Native(_) => ObjectKind::Native,
            ObjData::Closure(_) => ObjectKind::Closure,
            ObjData::Upvalue(_) => ObjectKind::Upvalue,
            ObjData::Class(_) => ObjectKind::Class,
            ObjData::Instance(_) => ObjectKind::Instance,
            ObjData::BoundMethod(_) => ObjectKind::BoundMethod,
        };
        self.bytes_allocated += Self::approx_size(&data);
        let obj = Box::new(Obj {
            header: ObjHeader {
                kind,
                is_marked: std::cell::Cell::new(false),
                next_in_heap: std::cell::Cell::new(self.head),
            },
            data,
        });
        let ptr = NonNull::from(Box::leak(obj));
        self.head = Some(ptr);
        trace!(kind = ?kind, "allocated object");
        // SAFETY: `ptr` was just leaked from a live `Box<Obj>` and linked
        // into the heap list above.
        unsafe { ObjRef::from_raw(ptr) }
    }

    pub fn alloc_function(&mut self, func: crate::object::FunctionObj) -> ObjRef {
        self.alloc(ObjData::Function(func))
    }

    pub fn alloc_native(&mut self, native: crate::object::NativeObj) -> ObjRef {
        self.alloc(ObjData::Native(native))
    }

    pub fn alloc_closure(&mut self, closure: crate::object::ClosureObj) -> ObjRef {
        self.alloc(ObjData::Closure(closure))
    }

    pub fn alloc_upvalue(&mut self, location: UpvalueLocation) -> ObjRef {
        self.alloc(ObjData::Upvalue(crate::object::UpvalueObj {
            location: std::cell::Cell::new(location),
            next_open: std::cell::Cell::new(None),
        }))
    }

    pub fn alloc_class(&mut self, name: ObjRef) -> ObjRef {
        self.alloc(ObjData::Class(crate::object::ClassObj { name, methods: Table::new() }))
    }

    pub fn alloc_instance(&mut self, class: ObjRef) -> ObjRef {
        self.alloc(ObjData::Instance(crate::object::InstanceObj { class, fields: Table::new() }))
    }

    pub fn alloc_bound_method(&mut self, receiver: Value, method: ObjRef) -> ObjRef {
        self.alloc(ObjData::BoundMethod(crate::object::BoundMethodObj { receiver, method }))
    }

    /// Interns `bytes`, returning the canonical `ObjRef` for that content.
    /// If an equal string is already interned, its existing `ObjRef` is
    /// returned and no allocation happens.
    pub fn intern(&mut self, bytes: &str) -> ObjRef {
        let hash = fnv1a(bytes.as_bytes());
        if let Some(existing) = self.strings.find_string(bytes, hash) {
            return existing;
        }
        let obj = self.alloc(ObjData::String(crate::object::StringObj {
            bytes: bytes.into(),
            hash,
        }));
        self.strings.set(obj, Value::Nil);
        obj
    }

    /// Marks `value`'s object (if it has one) gray, pushing it onto the
    /// worklist for `trace_references`. A no-op for non-object values and
    /// for objects already marked.
    pub fn mark_value(&mut self, value: Value) {
        if let Value::Object(obj) = value {
            self.mark_object(obj);
        }
    }

    pub fn mark_object(&mut self, obj: ObjRef) {
        if obj.is_marked() {
            return;
        }
        obj.set_marked(true);
        self.gray_stack.push(obj);
    }

    /// Drains the gray worklist, pushing every object each gray object
    /// references, per the per-kind tracing rules in the data model.
    pub fn trace_references(&mut self) {
        while let Some(obj) = self.gray_stack.pop() {
            self.blacken(obj);
        }
    }

    fn blacken(&mut self, obj: ObjRef) {
        // SAFETY: `obj` was marked reachable and no sweep has run since, so
        // the pointer is still live.
        let data = unsafe { &(*obj.as_ptr().as_ptr()).data };
        match data {
            ObjData::String(_) | ObjData::Native(_) => {}
            ObjData::Upvalue(u) => {
                if let UpvalueLocation::Closed(value) = u.location.get() {
                    self.mark_value(value);
                }
            }
            ObjData::Function(f) => {
                if let Some(name) = f.name {
                    self.mark_object(name);
                }
                for constant in &f.chunk.constants {
                    self.mark_value(*constant);
                }
            }
            ObjData::Closure(c) => {
                self.mark_object(c.function);
                for upvalue in &c.upvalues {
                    self.mark_object(*upvalue);
                }
            }
            ObjData::Class(c) => {
                self.mark_object(c.name);
                let entries: Vec<(ObjRef, Value)> = c.methods.iter().collect();
                for (key, value) in entries {
                    self.mark_object(key);
                    self.mark_value(value);
                }
            }
            ObjData::Instance(i) => {
                self.mark_object(i.class);
                let entries: Vec<(ObjRef, Value)> = i.fields.iter().collect();
                for (key, value) in entries {
                    self.mark_object(key);
                    self.mark_value(value);
                }
            }
            ObjData::BoundMethod(b) => {
                self.mark_value(b.receiver);
                self.mark_object(b.method);
            }
        }
    }

    /// Removes every unmarked entry from the string-intern table. Must run
    /// after `trace_references` (so live strings are already marked) and
    /// before `sweep` (so a string that is about to be freed is also
    /// forgotten by the table, rather than left as a dangling key).
    pub fn prune_interned_strings(&mut self) {
        self.strings.retain_marked_keys();
    }

    /// Walks the intrusive heap list, freeing every unmarked object and
    /// clearing the mark bit on survivors for the next cycle.
    pub fn sweep(&mut self) {
        let mut previous: Option<NonNull<Obj>> = None;
        let mut current = self.head;
        while let Some(ptr) = current {
            // SAFETY: every pointer in the heap list was linked in by
            // `alloc` and not yet freed.
            let is_marked = unsafe { ptr.as_ref().header.is_marked.get() };
            let next = unsafe { ptr.as_ref().header.next_in_heap.get() };
            if is_marked {
                unsafe { ptr.as_ref().header.is_marked.set(false) };
                previous = Some(ptr);
            } else {
                match previous {
                    Some(prev) => unsafe { prev.as_ref().header.next_in_heap.set(next) },
                    None => self.head = next,
                }
                // SAFETY: this object is unreachable (unmarked after a full
                // trace) and we just unlinked it from the only list that
                // referenced it, so it is safe to reclaim.
                let boxed = unsafe { Box::from_raw(ptr.as_ptr()) };
                self.bytes_allocated = self.bytes_allocated.saturating_sub(Self::approx_size(&boxed.data));
                drop(boxed);
            }
            current = next;
        }
        self.next_gc = self.bytes_allocated * 2;
    }
}

impl Drop for Gc {
    fn drop(&mut self) {
        let mut current = self.head;
        while let Some(ptr) = current {
            // SAFETY: dropping the whole heap at process/VM teardown; no
            // live references can observe this.
            let boxed = unsafe { Box::from_raw(ptr.as_ptr()) };
            current = boxed.header.next_in_heap.get();
            drop(boxed);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn interning_returns_same_ref_for_equal_bytes() {
        let mut gc = Gc::new();
        let a = gc.intern("hello");
        let b = gc.intern("hello");
        assert!(a.same_as(&b));
    }

    #[test]
    fn interning_distinguishes_different_bytes() {
        let mut gc = Gc::new();
        let a = gc.intern("hello");
        let b = gc.intern("world");
        assert!(!a.same_as(&b));
    }

    #[test]
    fn unreachable_object_is_collected() {
        let mut gc = Gc::new();
        let garbage = gc.intern("garbage");
        assert!(!garbage.is_marked());
        // No roots marked: everything is unreachable.
        gc.trace_references();
        gc.prune_interned_strings();
        gc.sweep();
        assert!(gc.head.is_none());
    }

    #[test]
    fn reachable_object_survives() {
        let mut gc = Gc::new();
        let kept = gc.intern("kept");
        gc.mark_object(kept);
        gc.trace_references();
        gc.prune_interned_strings();
        gc.sweep();
        assert!(gc.head.is_some());
    }
}
