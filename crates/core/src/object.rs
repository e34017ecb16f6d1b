//! Heap object variants
//!
//! Every heap-allocated Brio value is an [`Obj`]: a small header (mark bit,
//! size estimate) plus an [`ObjKind`] payload. Objects never own each other;
//! they refer to one another through [`ObjRef`] arena indices and the heap
//! owns everything. That makes cyclic graphs (closures capturing frames,
//! instances pointing at classes pointing at method closures) safe to
//! collect with mark/sweep.

use crate::chunk::Chunk;
use crate::heap::Heap;
use crate::table::Table;
use crate::value::Value;

/// Index of an object slot in the heap arena.
///
/// Stands in for the object pointer of a pointer-based heap; the arena
/// guarantees the slot stays put for the lifetime of the object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjRef(u32);

impl ObjRef {
    #[inline]
    pub fn new(index: u32) -> ObjRef {
        ObjRef(index)
    }

    #[inline]
    pub fn index(self) -> u32 {
        self.0
    }
}

/// A native function: receives the heap (for allocating results and reading
/// operand objects) and the argument slice, and either produces a result
/// value or an error message that the VM reports as a runtime error.
pub type NativeFn = fn(&mut Heap, &[Value]) -> Result<Value, String>;

/// Object header plus payload, stored in one heap arena slot.
pub struct Obj {
    /// Mark bit for the tri-color collector.
    pub(crate) marked: bool,
    /// Size estimate charged against the allocation counter; subtracted
    /// back exactly on free.
    pub(crate) size: usize,
    pub kind: ObjKind,
}

pub enum ObjKind {
    Str(BrioString),
    Function(Function),
    Closure(Closure),
    Upvalue(Upvalue),
    Native(Native),
    Class(Class),
    Instance(Instance),
    BoundMethod(BoundMethod),
}

/// An immutable, interned string.
///
/// The FNV-1a hash is computed once at interning time; the hash table and
/// the interning lookup both reuse it.
pub struct BrioString {
    pub chars: Box<str>,
    pub hash: u32,
}

/// A compiled function: its bytecode chunk plus the call metadata the VM
/// needs to build frames and closures around it.
pub struct Function {
    pub arity: usize,
    pub upvalue_count: usize,
    /// Interned name, `None` for the top-level script.
    pub name: Option<ObjRef>,
    pub chunk: Chunk,
}

impl Function {
    pub fn new(name: Option<ObjRef>) -> Function {
        Function {
            arity: 0,
            upvalue_count: 0,
            name,
            chunk: Chunk::new(),
        }
    }
}

/// A runtime function object: a [`Function`] plus captured upvalues.
pub struct Closure {
    pub function: ObjRef,
    pub upvalues: Vec<ObjRef>,
}

/// A closure's view of an enclosing variable.
///
/// While the variable's stack slot is live the upvalue is `Open` and reads
/// and writes go through the slot; when the slot's scope exits the VM moves
/// the value inline and the upvalue becomes `Closed`.
pub enum Upvalue {
    Open(usize),
    Closed(Value),
}

/// A built-in function implemented in Rust.
#[derive(Clone, Copy)]
pub struct Native {
    pub name: ObjRef,
    pub arity: usize,
    pub function: NativeFn,
}

pub struct Class {
    pub name: ObjRef,
    /// Method name (string value) to closure value.
    pub methods: Table,
}

pub struct Instance {
    pub class: ObjRef,
    /// Field name (string value) to arbitrary value.
    pub fields: Table,
}

/// A method closure bound to its receiver, produced by property access.
pub struct BoundMethod {
    pub receiver: Value,
    pub method: ObjRef,
}
