//! Global variable registry
//!
//! Bytecode never carries global names at run time: the compiler resolves
//! every global to a dense index in this registry and the VM indexes the
//! value vector directly. A slot holds the `undefined` sentinel from the
//! moment its index is reserved until the first `DEFINE_GLOBAL` targets it;
//! reading or assigning an undefined slot is a runtime error.
//!
//! `immut` globals are recorded by name in a side set that the compiler
//! consults; the VM never needs to check it.

use crate::heap::Heap;
use crate::table::Table;
use crate::value::Value;

pub struct Globals {
    /// Name (string value) to dense index (number value).
    pub names: Table,
    /// Indexed by the dense index; `Value::UNDEFINED` until defined.
    pub values: Vec<Value>,
    /// Names declared with `immut` (name value -> true).
    pub immutables: Table,
}

impl Default for Globals {
    fn default() -> Globals {
        Globals::new()
    }
}

impl Globals {
    pub fn new() -> Globals {
        Globals {
            names: Table::new(),
            values: Vec::new(),
            immutables: Table::new(),
        }
    }

    /// Dense index for `name`, reserving a fresh undefined slot on first
    /// mention.
    pub fn resolve(&mut self, heap: &Heap, name: Value) -> usize {
        if let Some(index) = self.names.get(heap, name) {
            return index.as_number() as usize;
        }
        let index = self.values.len();
        self.values.push(Value::UNDEFINED);
        self.names.set(heap, name, Value::number(index as f64));
        index
    }

    pub fn is_immutable(&self, heap: &Heap, name: Value) -> bool {
        self.immutables.get(heap, name).is_some()
    }

    pub fn mark_immutable(&mut self, heap: &Heap, name: Value) {
        self.immutables.set(heap, name, Value::TRUE);
    }

    /// Reverse lookup for error messages; linear, only used on error paths.
    pub fn name_of(&self, heap: &Heap, index: usize) -> String {
        for (key, value) in self.names.iter() {
            if value.as_number() as usize == index {
                return heap.format_value(key);
            }
        }
        "?".to_string()
    }
}
