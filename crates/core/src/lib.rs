//! Brio core: runtime foundation for the Brio language
//!
//! This crate owns the data model the compiler and VM share:
//!
//! - `value`: 8-byte NaN-boxed values (numbers, singletons, heap refs)
//! - `object`: heap object variants (strings, functions, closures, classes)
//! - `heap`: object arena, string interning, tri-color mark/sweep GC
//! - `table`: open-addressed hash table keyed by values
//! - `chunk`: bytecode chunks, opcodes, run-length line table
//! - `globals`: dense-index global variable registry
//! - `debug`: chunk disassembler

pub mod chunk;
pub mod debug;
pub mod globals;
pub mod heap;
pub mod object;
pub mod table;
pub mod value;

pub use chunk::{Chunk, OpCode};
pub use globals::Globals;
pub use heap::Heap;
pub use object::{
    BoundMethod, BrioString, Class, Closure, Function, Instance, Native, NativeFn, Obj, ObjKind,
    ObjRef, Upvalue,
};
pub use table::{Table, hash_bytes};
pub use value::{Value, values_equal};
