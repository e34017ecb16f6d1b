//! Object heap and garbage collector
//!
//! The heap is an arena of object slots plus the string intern table and
//! the allocation accounting that drives collection. Collection is
//! tri-color mark/sweep:
//!
//! 1. The caller (VM or compiler) marks its roots between
//!    [`Heap::begin_collection`] and [`Heap::finish_collection`].
//! 2. `finish_collection` marks pinned objects, drains the gray worklist
//!    (blackening each object by marking everything it references),
//!    weak-sweeps the intern table, sweeps the arena, and sets the next
//!    collection threshold.
//!
//! The arena plays the role of an intrusive all-objects list: every live
//! object occupies exactly one slot and the sweep walks all slots. Slot
//! indices are stable for an object's lifetime, so an [`ObjRef`] never
//! dangles while its object is reachable.

use crate::object::{
    BoundMethod, BrioString, Class, Closure, Function, Instance, Native, Obj, ObjKind, ObjRef,
    Upvalue,
};
use crate::table::{Table, hash_bytes};
use crate::value::Value;

/// Collect again once live bytes double.
const HEAP_GROW_FACTOR: usize = 2;

/// First collection threshold.
const FIRST_GC_AT: usize = 1024 * 1024;

pub struct Heap {
    slots: Vec<Option<Obj>>,
    free: Vec<u32>,
    /// Weak set of every interned string (key: string value, value: nil).
    strings: Table,
    /// Gray worklist: marked but not yet traced.
    gray: Vec<ObjRef>,
    /// Objects that survive every collection (e.g. the canonical "init"
    /// name), marked at the start of tracing.
    pinned: Vec<ObjRef>,
    bytes_allocated: usize,
    next_gc: usize,
    collecting_from: usize,
    /// When set, `should_collect` fires at every allocation safe point.
    pub stress: bool,
}

impl Default for Heap {
    fn default() -> Heap {
        Heap::new()
    }
}

impl Heap {
    pub fn new() -> Heap {
        Heap {
            slots: Vec::new(),
            free: Vec::new(),
            strings: Table::new(),
            gray: Vec::new(),
            pinned: Vec::new(),
            bytes_allocated: 0,
            next_gc: FIRST_GC_AT,
            collecting_from: 0,
            stress: false,
        }
    }

    // =========================================================================
    // Allocation
    // =========================================================================

    /// Allocate a new object slot. Never collects; callers collect at their
    /// own safe points via `should_collect` + the marking API so that every
    /// in-flight value is rooted first.
    pub fn alloc(&mut self, kind: ObjKind) -> ObjRef {
        let size = object_size(&kind);
        self.bytes_allocated += size;
        let obj = Obj {
            marked: false,
            size,
            kind,
        };
        let r = match self.free.pop() {
            Some(index) => {
                self.slots[index as usize] = Some(obj);
                ObjRef::new(index)
            }
            None => {
                self.slots.push(Some(obj));
                ObjRef::new((self.slots.len() - 1) as u32)
            }
        };
        tracing::trace!(slot = r.index(), size, "allocate");
        r
    }

    /// Intern a string: return the existing object for these bytes, or
    /// allocate one and register it in the intern table.
    pub fn intern(&mut self, chars: &str) -> ObjRef {
        let hash = hash_bytes(chars.as_bytes());
        if let Some(existing) = self.strings.find_string(self, chars, hash) {
            return existing;
        }
        let r = self.alloc(ObjKind::Str(BrioString {
            chars: chars.into(),
            hash,
        }));
        // The intern table borrows the heap for hashing, so detach it while
        // inserting.
        let mut strings = std::mem::take(&mut self.strings);
        strings.set(self, Value::object(r), Value::NIL);
        self.strings = strings;
        r
    }

    /// Keep an object alive across every future collection.
    pub fn pin(&mut self, r: ObjRef) {
        self.pinned.push(r);
    }

    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated
    }

    /// Number of live objects, for tests and diagnostics.
    pub fn object_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    fn slot(&self, r: ObjRef) -> &Obj {
        self.slots[r.index() as usize]
            .as_ref()
            .expect("access to freed object slot")
    }

    fn slot_mut(&mut self, r: ObjRef) -> &mut Obj {
        self.slots[r.index() as usize]
            .as_mut()
            .expect("access to freed object slot")
    }

    pub fn kind(&self, r: ObjRef) -> &ObjKind {
        &self.slot(r).kind
    }

    pub fn string_if(&self, r: ObjRef) -> Option<&BrioString> {
        match &self.slot(r).kind {
            ObjKind::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_string(&self, r: ObjRef) -> &BrioString {
        match &self.slot(r).kind {
            ObjKind::Str(s) => s,
            _ => unreachable!("expected string object"),
        }
    }

    pub fn function(&self, r: ObjRef) -> &Function {
        match &self.slot(r).kind {
            ObjKind::Function(f) => f,
            _ => unreachable!("expected function object"),
        }
    }

    pub fn closure(&self, r: ObjRef) -> &Closure {
        match &self.slot(r).kind {
            ObjKind::Closure(c) => c,
            _ => unreachable!("expected closure object"),
        }
    }

    pub fn closure_mut(&mut self, r: ObjRef) -> &mut Closure {
        match &mut self.slot_mut(r).kind {
            ObjKind::Closure(c) => c,
            _ => unreachable!("expected closure object"),
        }
    }

    pub fn upvalue(&self, r: ObjRef) -> &Upvalue {
        match &self.slot(r).kind {
            ObjKind::Upvalue(u) => u,
            _ => unreachable!("expected upvalue object"),
        }
    }

    pub fn upvalue_mut(&mut self, r: ObjRef) -> &mut Upvalue {
        match &mut self.slot_mut(r).kind {
            ObjKind::Upvalue(u) => u,
            _ => unreachable!("expected upvalue object"),
        }
    }

    pub fn native(&self, r: ObjRef) -> &Native {
        match &self.slot(r).kind {
            ObjKind::Native(n) => n,
            _ => unreachable!("expected native object"),
        }
    }

    pub fn class(&self, r: ObjRef) -> &Class {
        match &self.slot(r).kind {
            ObjKind::Class(c) => c,
            _ => unreachable!("expected class object"),
        }
    }

    pub fn class_mut(&mut self, r: ObjRef) -> &mut Class {
        match &mut self.slot_mut(r).kind {
            ObjKind::Class(c) => c,
            _ => unreachable!("expected class object"),
        }
    }

    pub fn instance(&self, r: ObjRef) -> &Instance {
        match &self.slot(r).kind {
            ObjKind::Instance(i) => i,
            _ => unreachable!("expected instance object"),
        }
    }

    pub fn instance_mut(&mut self, r: ObjRef) -> &mut Instance {
        match &mut self.slot_mut(r).kind {
            ObjKind::Instance(i) => i,
            _ => unreachable!("expected instance object"),
        }
    }

    pub fn bound_method(&self, r: ObjRef) -> &BoundMethod {
        match &self.slot(r).kind {
            ObjKind::BoundMethod(b) => b,
            _ => unreachable!("expected bound method object"),
        }
    }

    pub fn is_string(&self, v: Value) -> bool {
        v.is_obj() && matches!(self.slot(v.as_obj()).kind, ObjKind::Str(_))
    }

    pub fn is_instance(&self, v: Value) -> bool {
        v.is_obj() && matches!(self.slot(v.as_obj()).kind, ObjKind::Instance(_))
    }

    pub fn is_class(&self, v: Value) -> bool {
        v.is_obj() && matches!(self.slot(v.as_obj()).kind, ObjKind::Class(_))
    }

    // =========================================================================
    // Printing
    // =========================================================================

    /// Render a value the way `print` does.
    pub fn format_value(&self, v: Value) -> String {
        if v.is_number() {
            format!("{}", v.as_number())
        } else if v.is_nil() {
            "nil".to_string()
        } else if v.is_undefined() {
            "undefined".to_string()
        } else if v.is_bool() {
            format!("{}", v.as_bool())
        } else {
            self.format_object(v.as_obj())
        }
    }

    fn format_object(&self, r: ObjRef) -> String {
        match &self.slot(r).kind {
            ObjKind::Str(s) => s.chars.to_string(),
            ObjKind::Function(f) => self.format_function_name(f),
            ObjKind::Closure(c) => self.format_function_name(self.function(c.function)),
            ObjKind::Upvalue(_) => "upvalue".to_string(),
            ObjKind::Native(_) => "<native fn>".to_string(),
            ObjKind::Class(c) => self.as_string(c.name).chars.to_string(),
            ObjKind::Instance(i) => {
                let class = self.class(i.class);
                format!("{} instance", self.as_string(class.name).chars)
            }
            ObjKind::BoundMethod(b) => {
                let closure = self.closure(b.method);
                self.format_function_name(self.function(closure.function))
            }
        }
    }

    fn format_function_name(&self, f: &Function) -> String {
        match f.name {
            Some(name) => format!("<fn {}>", self.as_string(name).chars),
            None => "<script>".to_string(),
        }
    }

    // =========================================================================
    // Garbage collection
    // =========================================================================

    pub fn should_collect(&self) -> bool {
        self.stress || self.bytes_allocated > self.next_gc
    }

    pub(crate) fn is_marked(&self, r: ObjRef) -> bool {
        self.slot(r).marked
    }

    /// Start a collection cycle. The caller marks its roots next, then
    /// calls [`Heap::finish_collection`].
    pub fn begin_collection(&mut self) {
        tracing::debug!(bytes = self.bytes_allocated, "gc begin");
        self.collecting_from = self.bytes_allocated;
    }

    pub fn mark_value(&mut self, v: Value) {
        if v.is_obj() {
            self.mark_object(v.as_obj());
        }
    }

    pub fn mark_object(&mut self, r: ObjRef) {
        let obj = self.slot_mut(r);
        if obj.marked {
            return;
        }
        obj.marked = true;
        self.gray.push(r);
    }

    /// Mark every key and value of an externally owned table (globals,
    /// method tables held by roots).
    pub fn mark_table(&mut self, table: &Table) {
        for i in 0..table.slots() {
            if let Some((key, value)) = table.entry_at(i) {
                self.mark_value(key);
                self.mark_value(value);
            }
        }
    }

    /// Trace, weak-sweep interned strings, sweep, and set the next
    /// collection threshold.
    pub fn finish_collection(&mut self) {
        for i in 0..self.pinned.len() {
            let r = self.pinned[i];
            self.mark_object(r);
        }
        self.trace_references();

        // Interned strings are weak: drop entries whose string died.
        let mut strings = std::mem::take(&mut self.strings);
        strings.remove_unmarked_keys(self);
        self.strings = strings;

        self.sweep();
        self.next_gc = self.bytes_allocated * HEAP_GROW_FACTOR;
        tracing::debug!(
            collected = self.collecting_from.saturating_sub(self.bytes_allocated),
            bytes = self.bytes_allocated,
            next_gc = self.next_gc,
            "gc end"
        );
    }

    fn trace_references(&mut self) {
        while let Some(r) = self.gray.pop() {
            self.blacken(r);
        }
    }

    /// Mark everything `r` references. Children are copied out one at a
    /// time so no borrow of the object outlives the recursive mark.
    fn blacken(&mut self, r: ObjRef) {
        match &self.slot(r).kind {
            ObjKind::Str(_) => {}
            ObjKind::Native(n) => {
                let name = n.name;
                self.mark_object(name);
            }
            ObjKind::Upvalue(u) => {
                if let Upvalue::Closed(v) = *u {
                    self.mark_value(v);
                }
            }
            ObjKind::Function(f) => {
                let name = f.name;
                let constants = f.chunk.constants().len();
                if let Some(name) = name {
                    self.mark_object(name);
                }
                for i in 0..constants {
                    let c = self.function(r).chunk.constant(i);
                    self.mark_value(c);
                }
            }
            ObjKind::Closure(c) => {
                let function = c.function;
                let upvalues = c.upvalues.len();
                self.mark_object(function);
                for i in 0..upvalues {
                    let uv = self.closure(r).upvalues[i];
                    self.mark_object(uv);
                }
            }
            ObjKind::Class(c) => {
                let name = c.name;
                let slots = c.methods.slots();
                self.mark_object(name);
                for i in 0..slots {
                    let entry = self.class(r).methods.entry_at(i);
                    if let Some((key, value)) = entry {
                        self.mark_value(key);
                        self.mark_value(value);
                    }
                }
            }
            ObjKind::Instance(i) => {
                let class = i.class;
                let slots = i.fields.slots();
                self.mark_object(class);
                for j in 0..slots {
                    let entry = self.instance(r).fields.entry_at(j);
                    if let Some((key, value)) = entry {
                        self.mark_value(key);
                        self.mark_value(value);
                    }
                }
            }
            ObjKind::BoundMethod(b) => {
                let receiver = b.receiver;
                let method = b.method;
                self.mark_value(receiver);
                self.mark_object(method);
            }
        }
    }

    fn sweep(&mut self) {
        let mut freed = 0usize;
        for index in 0..self.slots.len() {
            match &mut self.slots[index] {
                Some(obj) if obj.marked => obj.marked = false,
                Some(obj) => {
                    let size = obj.size;
                    self.bytes_allocated = self.bytes_allocated.saturating_sub(size);
                    self.slots[index] = None;
                    self.free.push(index as u32);
                    freed += 1;
                }
                None => {}
            }
        }
        tracing::debug!(objects = freed, "gc sweep");
    }
}

/// Size estimate for one object: header plus owned buffers. Dynamic growth
/// after allocation (tables, chunks) is not re-charged; the estimate is
/// subtracted back exactly when the object is freed.
fn object_size(kind: &ObjKind) -> usize {
    let base = std::mem::size_of::<Obj>();
    base + match kind {
        ObjKind::Str(s) => s.chars.len(),
        ObjKind::Function(f) => f.chunk.byte_size(),
        ObjKind::Closure(c) => c.upvalues.capacity() * std::mem::size_of::<ObjRef>(),
        ObjKind::Upvalue(_) => 0,
        ObjKind::Native(_) => 0,
        ObjKind::Class(c) => c.methods.byte_size(),
        ObjKind::Instance(i) => i.fields.byte_size(),
        ObjKind::BoundMethod(_) => 0,
    }
}
