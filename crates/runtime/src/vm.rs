//! Bytecode virtual machine
//!
//! A stack machine driving one chunk at a time through a bounded stack of
//! call frames. The value stack grows by doubling; the frame stack is
//! capped at [`FRAMES_MAX`] and overflowing it is a runtime error. All
//! object allocation funnels through [`Vm::alloc`]/[`Vm::intern`], which
//! are the collection safe points: operands of the instruction in flight
//! are still on the value stack there, so the collector's root set covers
//! every partially built structure.
//!
//! Runtime errors print a message and a stack traceback to the error sink,
//! reset the machine, and surface as `InterpretResult::RuntimeError` from
//! [`Vm::interpret`]. The VM itself never panics on user input.

use std::io::{self, Write};

use brio_core::chunk::OpCode;
use brio_core::debug;
use brio_core::object::{
    BoundMethod, Class, Closure, Instance, Native, NativeFn, ObjKind, ObjRef, Upvalue,
};
use brio_core::{Globals, Heap, Table, Value, values_equal};
use brio_compiler::compile;

use crate::natives;

/// Maximum call depth; the 65th nested call overflows.
pub const FRAMES_MAX: usize = 64;

const STACK_INITIAL: usize = 256;

/// Three-valued status of one `interpret` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpretResult {
    Ok,
    CompileError,
    RuntimeError,
}

/// Diagnostic switches, normally wired to CLI flags.
#[derive(Debug, Clone, Copy, Default)]
pub struct VmOptions {
    /// Dump the stack and disassemble each instruction before executing it.
    pub trace_execution: bool,
    /// Disassemble every compiled function after a successful compile.
    pub print_code: bool,
    /// Collect at every allocation safe point.
    pub stress_gc: bool,
}

/// One active function invocation.
struct CallFrame {
    closure: ObjRef,
    /// Offset of the next byte to execute in the closure's chunk.
    ip: usize,
    /// Stack index of slot zero (the callee or receiver).
    base: usize,
}

/// Execution aborted; the message and traceback were already emitted.
struct RuntimeAbort;

pub struct Vm {
    heap: Heap,
    globals: Globals,
    frames: Vec<CallFrame>,
    stack: Vec<Value>,
    /// Upvalues still pointing into the stack, sorted by slot descending,
    /// at most one per slot.
    open_upvalues: Vec<ObjRef>,
    /// Canonical "init" string, pinned in the heap.
    init_string: ObjRef,
    options: VmOptions,
    out: Box<dyn Write>,
    err: Box<dyn Write>,
}

impl Vm {
    /// A VM speaking to stdout/stderr.
    pub fn new(options: VmOptions) -> Vm {
        Vm::with_streams(options, Box::new(io::stdout()), Box::new(io::stderr()))
    }

    /// A VM with injected output and error sinks (tests, embedding).
    pub fn with_streams(options: VmOptions, out: Box<dyn Write>, err: Box<dyn Write>) -> Vm {
        let mut heap = Heap::new();
        heap.stress = options.stress_gc;
        let init_string = heap.intern("init");
        heap.pin(init_string);

        let mut vm = Vm {
            heap,
            globals: Globals::new(),
            frames: Vec::with_capacity(FRAMES_MAX),
            stack: Vec::with_capacity(STACK_INITIAL),
            open_upvalues: Vec::new(),
            init_string,
            options,
            out,
            err,
        };
        natives::register_all(&mut vm);
        vm
    }

    /// Compile and run one source string. Globals and interned strings
    /// persist across calls, so a REPL can feed lines one at a time.
    pub fn interpret(&mut self, source: &str) -> InterpretResult {
        let function = match compile(source, &mut self.heap, &mut self.globals, &mut *self.err) {
            Ok(function) => function,
            Err(_) => return InterpretResult::CompileError,
        };
        if self.options.print_code {
            let _ = self.print_compiled(function);
        }

        self.stack.push(Value::object(function));
        let closure = self.alloc(ObjKind::Closure(Closure {
            function,
            upvalues: Vec::new(),
        }));
        self.stack.pop();
        self.stack.push(Value::object(closure));
        if self.call(closure, 0).is_err() {
            return InterpretResult::RuntimeError;
        }

        match self.run() {
            Ok(()) => InterpretResult::Ok,
            Err(RuntimeAbort) => InterpretResult::RuntimeError,
        }
    }

    /// Disassemble the script and every function reachable from it.
    fn print_compiled(&mut self, function: ObjRef) -> io::Result<()> {
        let mut worklist = vec![function];
        while let Some(f) = worklist.pop() {
            let name = self.heap.format_value(Value::object(f));
            debug::disassemble_chunk(
                &self.heap,
                &self.heap.function(f).chunk,
                &name,
                &mut *self.err,
            )?;
            for constant in self.heap.function(f).chunk.constants() {
                if constant.is_obj()
                    && matches!(self.heap.kind(constant.as_obj()), ObjKind::Function(_))
                {
                    worklist.push(constant.as_obj());
                }
            }
        }
        Ok(())
    }

    // =========================================================================
    // Dispatch loop
    // =========================================================================

    fn run(&mut self) -> Result<(), RuntimeAbort> {
        loop {
            if self.options.trace_execution {
                self.trace_instruction();
            }
            let byte = self.read_byte();
            let Some(op) = OpCode::from_byte(byte) else {
                return Err(self.runtime_error(&format!("Unknown opcode {byte}.")));
            };

            match op {
                OpCode::Constant | OpCode::ConstantLong => {
                    let value = self.read_constant(op == OpCode::ConstantLong);
                    self.push(value);
                }
                OpCode::Nil => self.push(Value::NIL),
                OpCode::True => self.push(Value::TRUE),
                OpCode::False => self.push(Value::FALSE),
                OpCode::Pop => {
                    self.pop();
                }

                OpCode::GetLocal | OpCode::GetLocalLong => {
                    let slot = self.read_index(op == OpCode::GetLocalLong);
                    let base = self.frame().base;
                    let value = self.stack[base + slot];
                    self.push(value);
                }
                OpCode::SetLocal | OpCode::SetLocalLong => {
                    let slot = self.read_index(op == OpCode::SetLocalLong);
                    let base = self.frame().base;
                    self.stack[base + slot] = self.peek(0);
                }

                OpCode::GetGlobal | OpCode::GetGlobalLong => {
                    let index = self.read_index(op == OpCode::GetGlobalLong);
                    let value = self.globals.values[index];
                    if value.is_undefined() {
                        let name = self.globals.name_of(&self.heap, index);
                        return Err(
                            self.runtime_error(&format!("Undefined variable '{name}'."))
                        );
                    }
                    self.push(value);
                }
                OpCode::DefineGlobal | OpCode::DefineGlobalLong => {
                    let index = self.read_index(op == OpCode::DefineGlobalLong);
                    self.globals.values[index] = self.peek(0);
                    self.pop();
                }
                OpCode::SetGlobal | OpCode::SetGlobalLong => {
                    let index = self.read_index(op == OpCode::SetGlobalLong);
                    if self.globals.values[index].is_undefined() {
                        let name = self.globals.name_of(&self.heap, index);
                        return Err(
                            self.runtime_error(&format!("Undefined variable '{name}'."))
                        );
                    }
                    self.globals.values[index] = self.peek(0);
                }

                OpCode::GetUpvalue => {
                    let slot = usize::from(self.read_byte());
                    let upvalue = self.heap.closure(self.frame().closure).upvalues[slot];
                    let value = match *self.heap.upvalue(upvalue) {
                        Upvalue::Open(stack_slot) => self.stack[stack_slot],
                        Upvalue::Closed(value) => value,
                    };
                    self.push(value);
                }
                OpCode::SetUpvalue => {
                    let slot = usize::from(self.read_byte());
                    let value = self.peek(0);
                    let upvalue = self.heap.closure(self.frame().closure).upvalues[slot];
                    match self.heap.upvalue_mut(upvalue) {
                        Upvalue::Open(stack_slot) => {
                            let stack_slot = *stack_slot;
                            self.stack[stack_slot] = value;
                        }
                        closed => *closed = Upvalue::Closed(value),
                    }
                }

                OpCode::GetProperty | OpCode::GetPropertyLong => {
                    let target = self.peek(0);
                    if !self.heap.is_instance(target) {
                        return Err(self.runtime_error("Only instances have properties."));
                    }
                    let name = self.read_constant(op == OpCode::GetPropertyLong);
                    let instance = target.as_obj();
                    let field = self.heap.instance(instance).fields.get(&self.heap, name);
                    match field {
                        Some(value) => {
                            self.pop();
                            self.push(value);
                        }
                        None => {
                            let class = self.heap.instance(instance).class;
                            self.bind_method(class, name)?;
                        }
                    }
                }
                OpCode::SetProperty | OpCode::SetPropertyLong => {
                    let target = self.peek(1);
                    if !self.heap.is_instance(target) {
                        return Err(self.runtime_error("Only instances have fields."));
                    }
                    let name = self.read_constant(op == OpCode::SetPropertyLong);
                    let value = self.peek(0);
                    let instance = target.as_obj();
                    let mut fields = std::mem::take(&mut self.heap.instance_mut(instance).fields);
                    fields.set(&self.heap, name, value);
                    self.heap.instance_mut(instance).fields = fields;
                    let value = self.pop();
                    self.pop();
                    self.push(value);
                }
                OpCode::GetSuper | OpCode::GetSuperLong => {
                    let name = self.read_constant(op == OpCode::GetSuperLong);
                    let superclass = self.pop();
                    self.bind_method(superclass.as_obj(), name)?;
                }

                OpCode::Equal => {
                    let b = self.pop();
                    let a = self.pop();
                    self.push(Value::boolean(values_equal(a, b)));
                }
                OpCode::CaseEqual => {
                    // Consume the case value but keep the discriminant for
                    // the next case's test.
                    let b = self.pop();
                    let a = self.peek(0);
                    self.push(Value::boolean(values_equal(a, b)));
                }
                OpCode::Greater => {
                    self.binary_numeric("Operands must be numbers.", |a, b| {
                        Value::boolean(a > b)
                    })?;
                }
                OpCode::Less => {
                    self.binary_numeric("Operands must be numbers.", |a, b| {
                        Value::boolean(a < b)
                    })?;
                }

                OpCode::Add => {
                    let b = self.peek(0);
                    let a = self.peek(1);
                    if self.heap.is_string(a) && self.heap.is_string(b) {
                        let combined = format!(
                            "{}{}",
                            self.heap.as_string(a.as_obj()).chars,
                            self.heap.as_string(b.as_obj()).chars
                        );
                        let result = self.intern(&combined);
                        self.pop();
                        self.pop();
                        self.push(Value::object(result));
                    } else if a.is_number() && b.is_number() {
                        self.pop();
                        self.pop();
                        self.push(Value::number(a.as_number() + b.as_number()));
                    } else {
                        return Err(
                            self.runtime_error("Operands must be two numbers or two strings.")
                        );
                    }
                }
                OpCode::Subtract => {
                    self.binary_numeric("Operands must be numbers.", |a, b| {
                        Value::number(a - b)
                    })?;
                }
                OpCode::Multiply => {
                    self.binary_numeric("Operands must be numbers.", |a, b| {
                        Value::number(a * b)
                    })?;
                }
                OpCode::Divide => {
                    self.binary_numeric("Operands must be numbers.", |a, b| {
                        Value::number(a / b)
                    })?;
                }

                OpCode::Not => {
                    let value = self.pop();
                    self.push(Value::boolean(value.is_falsey()));
                }
                OpCode::Negate => {
                    if !self.peek(0).is_number() {
                        return Err(self.runtime_error("Operand must be a number."));
                    }
                    let value = self.pop();
                    self.push(Value::number(-value.as_number()));
                }

                OpCode::Print => {
                    let value = self.pop();
                    let text = self.heap.format_value(value);
                    let _ = writeln!(self.out, "{text}");
                }

                OpCode::Jump => {
                    let offset = self.read_u16();
                    self.frame_mut().ip += usize::from(offset);
                }
                OpCode::JumpIfFalse => {
                    let offset = self.read_u16();
                    if self.peek(0).is_falsey() {
                        self.frame_mut().ip += usize::from(offset);
                    }
                }
                OpCode::Loop => {
                    let offset = self.read_u16();
                    self.frame_mut().ip -= usize::from(offset);
                }

                OpCode::Call => {
                    let argc = usize::from(self.read_byte());
                    let callee = self.peek(argc);
                    self.call_value(callee, argc)?;
                }
                OpCode::Invoke | OpCode::InvokeLong => {
                    let name = self.read_constant(op == OpCode::InvokeLong);
                    let argc = usize::from(self.read_byte());
                    self.invoke(name, argc)?;
                }
                OpCode::SuperInvoke | OpCode::SuperInvokeLong => {
                    let name = self.read_constant(op == OpCode::SuperInvokeLong);
                    let argc = usize::from(self.read_byte());
                    let superclass = self.pop();
                    self.invoke_from_class(superclass.as_obj(), name, argc)?;
                }

                OpCode::Closure | OpCode::ClosureLong => {
                    let function_value = self.read_constant(op == OpCode::ClosureLong);
                    let function = function_value.as_obj();
                    let upvalue_count = self.heap.function(function).upvalue_count;
                    let closure = self.alloc(ObjKind::Closure(Closure {
                        function,
                        upvalues: Vec::with_capacity(upvalue_count),
                    }));
                    self.push(Value::object(closure));
                    for _ in 0..upvalue_count {
                        let is_local = self.read_byte() != 0;
                        let index = usize::from(self.read_byte());
                        let upvalue = if is_local {
                            let base = self.frame().base;
                            self.capture_upvalue(base + index)
                        } else {
                            self.heap.closure(self.frame().closure).upvalues[index]
                        };
                        self.heap.closure_mut(closure).upvalues.push(upvalue);
                    }
                }
                OpCode::CloseUpvalue => {
                    let top = self.stack.len() - 1;
                    self.close_upvalues(top);
                    self.pop();
                }

                OpCode::Return => {
                    let result = self.pop();
                    let frame = self.frames.pop().expect("return without a frame");
                    self.close_upvalues(frame.base);
                    if self.frames.is_empty() {
                        // The top-level script closure.
                        self.pop();
                        return Ok(());
                    }
                    self.stack.truncate(frame.base);
                    self.push(result);
                }

                OpCode::Class | OpCode::ClassLong => {
                    let name = self.read_constant(op == OpCode::ClassLong);
                    let class = self.alloc(ObjKind::Class(Class {
                        name: name.as_obj(),
                        methods: Table::new(),
                    }));
                    self.push(Value::object(class));
                }
                OpCode::Inherit => {
                    let superclass = self.peek(1);
                    if !self.heap.is_class(superclass) {
                        return Err(self.runtime_error("Superclass must be a class."));
                    }
                    let subclass = self.peek(0).as_obj();
                    let inherited: Vec<(Value, Value)> =
                        self.heap.class(superclass.as_obj()).methods.iter().collect();
                    let mut methods = std::mem::take(&mut self.heap.class_mut(subclass).methods);
                    for (name, method) in inherited {
                        methods.set(&self.heap, name, method);
                    }
                    self.heap.class_mut(subclass).methods = methods;
                    // Leave the superclass in place; it becomes the
                    // `super` local for the methods that follow.
                    self.pop();
                }
                OpCode::Method | OpCode::MethodLong => {
                    let name = self.read_constant(op == OpCode::MethodLong);
                    let method = self.peek(0);
                    let class = self.peek(1).as_obj();
                    let mut methods = std::mem::take(&mut self.heap.class_mut(class).methods);
                    methods.set(&self.heap, name, method);
                    self.heap.class_mut(class).methods = methods;
                    self.pop();
                }
            }
        }
    }

    // =========================================================================
    // Calls
    // =========================================================================

    fn call_value(&mut self, callee: Value, argc: usize) -> Result<(), RuntimeAbort> {
        if callee.is_obj() {
            let r = callee.as_obj();
            match self.heap.kind(r) {
                ObjKind::Closure(_) => return self.call(r, argc),
                ObjKind::Native(_) => {
                    let native = *self.heap.native(r);
                    if argc != native.arity {
                        return Err(self.runtime_error(&format!(
                            "Expected {} arguments but got {}.",
                            native.arity, argc
                        )));
                    }
                    let from = self.stack.len() - argc;
                    let result = (native.function)(&mut self.heap, &self.stack[from..]);
                    return match result {
                        Ok(value) => {
                            self.stack.truncate(self.stack.len() - argc - 1);
                            self.push(value);
                            Ok(())
                        }
                        Err(message) => Err(self.runtime_error(&message)),
                    };
                }
                ObjKind::Class(_) => {
                    let instance = self.alloc(ObjKind::Instance(Instance {
                        class: r,
                        fields: Table::new(),
                    }));
                    let slot = self.stack.len() - argc - 1;
                    self.stack[slot] = Value::object(instance);
                    let init = self
                        .heap
                        .class(r)
                        .methods
                        .get(&self.heap, Value::object(self.init_string));
                    if let Some(init) = init {
                        return self.call(init.as_obj(), argc);
                    }
                    if argc != 0 {
                        return Err(self
                            .runtime_error(&format!("Expected 0 arguments but got {argc}.")));
                    }
                    return Ok(());
                }
                ObjKind::BoundMethod(_) => {
                    let bound = self.heap.bound_method(r);
                    let receiver = bound.receiver;
                    let method = bound.method;
                    let slot = self.stack.len() - argc - 1;
                    self.stack[slot] = receiver;
                    return self.call(method, argc);
                }
                _ => {}
            }
        }
        Err(self.runtime_error("Can only call functions and classes."))
    }

    fn call(&mut self, closure: ObjRef, argc: usize) -> Result<(), RuntimeAbort> {
        let function = self.heap.closure(closure).function;
        let arity = self.heap.function(function).arity;
        if argc != arity {
            return Err(
                self.runtime_error(&format!("Expected {arity} arguments but got {argc}."))
            );
        }
        if self.frames.len() == FRAMES_MAX {
            return Err(self.runtime_error("Stack overflow."));
        }
        self.frames.push(CallFrame {
            closure,
            ip: 0,
            base: self.stack.len() - argc - 1,
        });
        Ok(())
    }

    fn invoke(&mut self, name: Value, argc: usize) -> Result<(), RuntimeAbort> {
        let receiver = self.peek(argc);
        if !self.heap.is_instance(receiver) {
            return Err(self.runtime_error("Only instances have methods."));
        }
        let instance = receiver.as_obj();
        // A field shadows a method of the same name; it is called as an
        // ordinary value.
        let field = self.heap.instance(instance).fields.get(&self.heap, name);
        if let Some(value) = field {
            let slot = self.stack.len() - argc - 1;
            self.stack[slot] = value;
            return self.call_value(value, argc);
        }
        let class = self.heap.instance(instance).class;
        self.invoke_from_class(class, name, argc)
    }

    fn invoke_from_class(
        &mut self,
        class: ObjRef,
        name: Value,
        argc: usize,
    ) -> Result<(), RuntimeAbort> {
        let method = self.heap.class(class).methods.get(&self.heap, name);
        let Some(method) = method else {
            let name = self.heap.format_value(name);
            return Err(self.runtime_error(&format!("Undefined property '{name}'.")));
        };
        self.call(method.as_obj(), argc)
    }

    fn bind_method(&mut self, class: ObjRef, name: Value) -> Result<(), RuntimeAbort> {
        let method = self.heap.class(class).methods.get(&self.heap, name);
        let Some(method) = method else {
            let name = self.heap.format_value(name);
            return Err(self.runtime_error(&format!("Undefined property '{name}'.")));
        };
        let receiver = self.peek(0);
        let bound = self.alloc(ObjKind::BoundMethod(BoundMethod {
            receiver,
            method: method.as_obj(),
        }));
        self.pop();
        self.push(Value::object(bound));
        Ok(())
    }

    // =========================================================================
    // Upvalues
    // =========================================================================

    fn capture_upvalue(&mut self, slot: usize) -> ObjRef {
        let mut index = 0;
        while index < self.open_upvalues.len() {
            let upvalue = self.open_upvalues[index];
            match *self.heap.upvalue(upvalue) {
                Upvalue::Open(s) if s == slot => return upvalue,
                Upvalue::Open(s) if s < slot => break,
                _ => index += 1,
            }
        }
        let created = self.alloc(ObjKind::Upvalue(Upvalue::Open(slot)));
        self.open_upvalues.insert(index, created);
        created
    }

    /// Close every open upvalue at or above `from`: move the stack value
    /// inline and drop the upvalue from the open list.
    fn close_upvalues(&mut self, from: usize) {
        while let Some(&head) = self.open_upvalues.first() {
            let slot = match *self.heap.upvalue(head) {
                Upvalue::Open(slot) => slot,
                Upvalue::Closed(_) => unreachable!("closed upvalue on the open list"),
            };
            if slot < from {
                break;
            }
            let value = self.stack[slot];
            *self.heap.upvalue_mut(head) = Upvalue::Closed(value);
            self.open_upvalues.remove(0);
        }
    }

    // =========================================================================
    // Allocation and garbage collection
    // =========================================================================

    /// Allocation safe point: collect first if due, then allocate.
    fn alloc(&mut self, kind: ObjKind) -> ObjRef {
        if self.heap.should_collect() {
            self.collect_garbage();
        }
        self.heap.alloc(kind)
    }

    fn intern(&mut self, chars: &str) -> ObjRef {
        if self.heap.should_collect() {
            self.collect_garbage();
        }
        self.heap.intern(chars)
    }

    fn collect_garbage(&mut self) {
        self.heap.begin_collection();
        for i in 0..self.stack.len() {
            let value = self.stack[i];
            self.heap.mark_value(value);
        }
        for frame in &self.frames {
            self.heap.mark_object(frame.closure);
        }
        for i in 0..self.open_upvalues.len() {
            let upvalue = self.open_upvalues[i];
            self.heap.mark_object(upvalue);
        }
        self.heap.mark_table(&self.globals.names);
        for i in 0..self.globals.values.len() {
            let value = self.globals.values[i];
            self.heap.mark_value(value);
        }
        self.heap.mark_table(&self.globals.immutables);
        self.heap.finish_collection();
    }

    // =========================================================================
    // Frame and stack plumbing
    // =========================================================================

    fn frame(&self) -> &CallFrame {
        self.frames.last().expect("no active call frame")
    }

    fn frame_mut(&mut self) -> &mut CallFrame {
        self.frames.last_mut().expect("no active call frame")
    }

    fn read_byte(&mut self) -> u8 {
        let frame = self.frames.last_mut().expect("no active call frame");
        let closure = self.heap.closure(frame.closure);
        let byte = self.heap.function(closure.function).chunk.code[frame.ip];
        frame.ip += 1;
        byte
    }

    fn read_u16(&mut self) -> u16 {
        let hi = self.read_byte();
        let lo = self.read_byte();
        u16::from(hi) << 8 | u16::from(lo)
    }

    fn read_index(&mut self, long: bool) -> usize {
        if long {
            let b1 = usize::from(self.read_byte());
            let b2 = usize::from(self.read_byte());
            let b3 = usize::from(self.read_byte());
            b1 << 16 | b2 << 8 | b3
        } else {
            usize::from(self.read_byte())
        }
    }

    fn read_constant(&mut self, long: bool) -> Value {
        let index = self.read_index(long);
        let frame = self.frames.last().expect("no active call frame");
        let closure = self.heap.closure(frame.closure);
        self.heap.function(closure.function).chunk.constant(index)
    }

    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Value {
        self.stack.pop().expect("value stack underflow")
    }

    fn peek(&self, distance: usize) -> Value {
        self.stack[self.stack.len() - 1 - distance]
    }

    fn binary_numeric(
        &mut self,
        message: &str,
        apply: fn(f64, f64) -> Value,
    ) -> Result<(), RuntimeAbort> {
        if !self.peek(0).is_number() || !self.peek(1).is_number() {
            return Err(self.runtime_error(message));
        }
        let b = self.pop().as_number();
        let a = self.pop().as_number();
        self.push(apply(a, b));
        Ok(())
    }

    // =========================================================================
    // Diagnostics
    // =========================================================================

    /// Report a runtime error: message, then the traceback, most recent
    /// call first, then reset the machine.
    fn runtime_error(&mut self, message: &str) -> RuntimeAbort {
        tracing::debug!(frames = self.frames.len(), %message, "runtime error");
        let _ = writeln!(self.err, "{message}");
        for frame in self.frames.iter().rev() {
            let closure = self.heap.closure(frame.closure);
            let function = self.heap.function(closure.function);
            let line = function.chunk.line_at(frame.ip.saturating_sub(1));
            match function.name {
                Some(name) => {
                    let _ = writeln!(
                        self.err,
                        "[line {line}] in {}()",
                        self.heap.as_string(name).chars
                    );
                }
                None => {
                    let _ = writeln!(self.err, "[line {line}] in script");
                }
            }
        }
        self.reset_stack();
        RuntimeAbort
    }

    fn reset_stack(&mut self) {
        self.stack.clear();
        self.frames.clear();
        self.open_upvalues.clear();
    }

    fn trace_instruction(&mut self) {
        let mut dump = String::from("          ");
        for value in &self.stack {
            dump.push_str("[ ");
            dump.push_str(&self.heap.format_value(*value));
            dump.push_str(" ]");
        }
        let _ = writeln!(self.err, "{dump}");
        let frame = self.frames.last().expect("no active call frame");
        let closure = self.heap.closure(frame.closure);
        let function = self.heap.function(closure.function);
        let _ = debug::disassemble_instruction(&self.heap, &function.chunk, frame.ip, &mut *self.err);
    }

    // =========================================================================
    // Native registry support
    // =========================================================================

    /// Install a native under a global name. Both the name string and the
    /// native object ride the stack during insertion so a collection
    /// triggered mid-registration cannot reclaim them.
    pub(crate) fn define_native(&mut self, name: &str, arity: usize, function: NativeFn) {
        let name_ref = self.heap.intern(name);
        self.stack.push(Value::object(name_ref));
        let native = self.heap.alloc(ObjKind::Native(Native {
            name: name_ref,
            arity,
            function,
        }));
        self.stack.push(Value::object(native));
        let index = self.globals.resolve(&self.heap, Value::object(name_ref));
        self.globals.values[index] = Value::object(native);
        self.stack.pop();
        self.stack.pop();
    }
}
