//! Heap object representation.
//!
//! Every object lives behind an [`ObjRef`], a thin `Copy` handle around a raw
//! pointer into memory owned by the [`crate::gc::Gc`]. Objects are never
//! owned by Rust's borrow checker directly — ownership is tracked by the
//! collector's intrusive heap list and reclaimed during sweep — which is
//! what the tagged-union runtime value model in `§3 Heap objects` calls for.
//! This is the one place in the crate where raw pointers and `unsafe` are
//! unavoidable: a tracing collector is fundamentally a graph of nodes that
//! outlives any single stack frame's lifetime.

use std::cell::Cell;
use std::fmt::{self, Debug, Display, Formatter};
use std::ptr::NonNull;

use crate::chunk::Chunk;
use crate::table::Table;
use crate::value::Value;

/// Discriminant for an object's payload, used for quick `is_string()`-style
/// checks without matching the full payload.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum ObjectKind {
    String,
    Function,
    Native,
    Closure,
    Upvalue,
    Class,
    Instance,
    BoundMethod,
}

/// The header every heap object shares: its kind (for fast dispatch), its
/// mark bit, and the link to the next object in the VM's intrusive
/// allocation list (distinct from any domain-specific linking, like the
/// open-upvalue list).
pub struct ObjHeader {
    pub kind: ObjectKind,
    pub is_marked: Cell<bool>,
    pub next_in_heap: Cell<Option<NonNull<Obj>>>,
}

/// A native function's signature: takes the GC (natives that allocate,
/// like `readln`, need to intern their result) and the arguments (not
/// including the callee slot), returning a value or an error message.
pub type NativeFn = fn(&mut crate::gc::Gc, &[Value]) -> Result<Value, String>;

pub struct StringObj {
    pub bytes: Box<str>,
    pub hash: u32,
}

pub struct FunctionObj {
    pub name: Option<ObjRef>,
    pub arity: u8,
    pub upvalue_count: usize,
    pub chunk: Chunk,
}

pub struct NativeObj {
    pub name: &'static str,
    pub arity: u8,
    pub function: NativeFn,
}

pub struct ClosureObj {
    pub function: ObjRef,
    pub upvalues: Vec<ObjRef>,
}

/// Either an open pointer into a live VM stack slot, or a closed, owned
/// value that has been hoisted onto the heap.
#[derive(Clone, Copy)]
pub enum UpvalueLocation {
    Open(usize),
    Closed(Value),
}

pub struct UpvalueObj {
    pub location: Cell<UpvalueLocation>,
    /// Link in the VM's intrusive list of *open* upvalues, kept sorted by
    /// descending stack index. `None` once closed.
    pub next_open: Cell<Option<ObjRef>>,
}

pub struct ClassObj {
    pub name: ObjRef,
    pub methods: Table,
}

pub struct InstanceObj {
    pub class: ObjRef,
    pub fields: Table,
}

pub struct BoundMethodObj {
    pub receiver: Value,
    pub method: ObjRef,
}

/// The tagged payload of a heap object. Matching on this exhaustively (never
/// by downcasting) is the intended dispatch style throughout the VM and
/// collector, per the data model's "tagged sum with an exhaustive match"
/// design.
pub enum ObjData {
    String(StringObj),
    Function(FunctionObj),
    Native(NativeObj),
    Closure(ClosureObj),
    Upvalue(UpvalueObj),
    Class(ClassObj),
    Instance(InstanceObj),
    BoundMethod(BoundMethodObj),
}

pub struct Obj {
    pub header: ObjHeader,
    pub data: ObjData,
}

/// A `Copy` handle to a heap-allocated [`Obj`]. Equality is pointer
/// identity, which is sound for strings because they are always interned
/// before being stored anywhere (see `table::Table::intern` / `vm::Vm`).
#[derive(Clone, Copy)]
pub struct ObjRef(pub(crate) NonNull<Obj>);

impl ObjRef {
    /// # Safety
    /// `ptr` must point to a live `Obj` for as long as this `ObjRef` (or any
    /// copy of it) is used. The collector upholds this by never freeing a
    /// marked object and by every root-reachable `ObjRef` being re-marked
    /// before a sweep can run.
    pub unsafe fn from_raw(ptr: NonNull<Obj>) -> ObjRef {
        ObjRef(ptr)
    }

    pub fn as_ptr(&self) -> NonNull<Obj> {
        self.0
    }

    fn obj(&self) -> &Obj {
        // SAFETY: see the invariant documented on `from_raw`.
        unsafe { self.0.as_ref() }
    }

    pub fn kind(&self) -> ObjectKind {
        self.obj().header.kind
    }

    pub fn same_as(&self, other: &ObjRef) -> bool {
        self.0 == other.0
    }

    pub fn is_marked(&self) -> bool {
        self.obj().header.is_marked.get()
    }

    pub fn set_marked(&self, marked: bool) {
        self.obj().header.is_marked.set(marked)
    }

    pub fn next_in_heap(&self) -> Option<NonNull<Obj>> {
        self.obj().header.next_in_heap.get()
    }

    pub fn set_next_in_heap(&self, next: Option<NonNull<Obj>>) {
        self.obj().header.next_in_heap.set(next)
    }

    pub fn as_string(&self) -> Option<&StringObj> {
        match &self.obj().data {
            ObjData::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_string().map(|s| &*s.bytes)
    }

    pub fn as_function(&self) -> Option<&FunctionObj> {
        match &self.obj().data {
            ObjData::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_native(&self) -> Option<&NativeObj> {
        match &self.obj().data {
            ObjData::Native(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_closure(&self) -> Option<&ClosureObj> {
        match &self.obj().data {
            ObjData::Closure(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_upvalue(&self) -> Option<&UpvalueObj> {
        match &self.obj().data {
            ObjData::Upvalue(u) => Some(u),
            _ => None,
        }
    }

    pub fn as_class(&self) -> Option<&ClassObj> {
        match &self.obj().data {
            ObjData::Class(c) => Some(c),
            _ => None,
        }
    }

    /// Mutable access to a class's method table. Safe to hand out `&mut`
    /// here because classes are never aliased across two live `ObjRef`s
    /// while being mutated — method definition happens strictly inside
    /// `OP_METHOD` handling, single-threaded.
    #[allow(clippy::mut_from_ref)]
    pub fn as_class_mut(&self) -> Option<&mut ClassObj> {
        // SAFETY: see the invariant documented on `from_raw`; classes are
        // mutated only while handling a single opcode, never aliased.
        match unsafe { &mut (*self.0.as_ptr()).data } {
            ObjData::Class(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_instance(&self) -> Option<&InstanceObj> {
        match &self.obj().data {
            ObjData::Instance(i) => Some(i),
            _ => None,
        }
    }

    #[allow(clippy::mut_from_ref)]
    pub fn as_instance_mut(&self) -> Option<&mut InstanceObj> {
        // SAFETY: see the invariant documented on `from_raw`; instances are
        // mutated only while handling a single opcode, never aliased.
        match unsafe { &mut (*self.0.as_ptr()).data } {
            ObjData::Instance(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_bound_method(&self) -> Option<&BoundMethodObj> {
        match &self.obj().data {
            ObjData::BoundMethod(b) => Some(b),
            _ => None,
        }
    }

    /// A human-readable name for stack traces: a function/closure's name,
    /// or `"script"` for the implicit top-level function.
    pub fn function_name(&self) -> &str {
        match self.as_function().and_then(|f| f.name) {
            Some(name) => name.as_str().unwrap_or("?"),
            None => "script",
        }
    }
}

impl Debug for ObjRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "ObjRef({:?} @ {:p})", self.kind(), self.0.as_ptr())
    }
}

impl Eq for ObjRef {}
impl PartialEq for ObjRef {
    fn eq(&self, other: &ObjRef) -> bool {
        self.same_as(other)
    }
}

impl Display for ObjRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match &self.obj().data {
            ObjData::String(s) => write!(f, "{}", s.bytes),
            ObjData::Function(func) => match func.name {
                Some(name) => write!(f, "<fn {}>", name),
                None => write!(f, "<script>"),
            },
            ObjData::Native(n) => write!(f, "<native fn {}>", n.name),
            ObjData::Closure(c) => Display::fmt(&c.function, f),
            ObjData::Upvalue(_) => write!(f, "upvalue"),
            ObjData::Class(c) => write!(f, "{}", c.name),
            ObjData::Instance(i) => write!(f, "{} instance", i.class),
            ObjData::BoundMethod(b) => Display::fmt(&b.method, f),
        }
    }
}
