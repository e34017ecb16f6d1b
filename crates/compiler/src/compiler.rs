//! Single-pass Pratt compiler
//!
//! Parses Brio source and emits bytecode directly into the chunk of the
//! function being compiled; there is no AST. Expression parsing is
//! precedence climbing over a fixed rule table; statements are ordinary
//! recursive descent. Nested function declarations push a fresh
//! per-function compiler record onto a chain so identifier resolution can
//! walk outward: locals first, then upvalues captured through enclosing
//! compilers, then globals resolved to dense indices.
//!
//! Errors print immediately to the diagnostics sink and flip the compiler
//! into panic mode, which suppresses further reports until the parse
//! re-synchronizes at a statement boundary. One pass can therefore report
//! several independent errors.

use std::io::Write;

use brio_core::chunk::OpCode;
use brio_core::object::{Function, ObjKind, ObjRef};
use brio_core::{Globals, Heap, Table, Value};

use crate::scanner::{Scanner, Token, TokenKind};

/// Compilation failed; the diagnostics were already written to the sink.
#[derive(Debug)]
pub struct CompileError;

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "compile error")
    }
}

impl std::error::Error for CompileError {}

const MAX_LOCALS: usize = 256;
const MAX_UPVALUES: usize = 256;
const MAX_BREAKS: usize = 256;
/// Constant-pool and global indices are at most 24 bits.
const MAX_INDEX: usize = 0xff_ffff;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    None,
    Assignment, // =
    Ternary,    // ?:
    Or,         // or
    And,        // and
    Equality,   // == !=
    Comparison, // < > <= >=
    Term,       // + -
    Factor,     // * /
    Unary,      // ! -
    Call,       // . ()
    Primary,
}

impl Precedence {
    fn next(self) -> Precedence {
        use Precedence::*;
        match self {
            None => Assignment,
            Assignment => Ternary,
            Ternary => Or,
            Or => And,
            And => Equality,
            Equality => Comparison,
            Comparison => Term,
            Term => Factor,
            Factor => Unary,
            Unary => Call,
            Call | Primary => Primary,
        }
    }
}

type ParseFn<'src, 'ctx> = fn(&mut Parser<'src, 'ctx>, bool);

struct ParseRule<'src, 'ctx> {
    prefix: Option<ParseFn<'src, 'ctx>>,
    infix: Option<ParseFn<'src, 'ctx>>,
    precedence: Precedence,
}

fn get_rule<'src, 'ctx>(kind: TokenKind) -> ParseRule<'src, 'ctx> {
    use TokenKind::*;
    let (prefix, infix, precedence): (
        Option<ParseFn<'src, 'ctx>>,
        Option<ParseFn<'src, 'ctx>>,
        Precedence,
    ) = match kind {
        LeftParen => (Some(Parser::grouping), Some(Parser::call), Precedence::Call),
        Dot => (None, Some(Parser::dot), Precedence::Call),
        Minus => (Some(Parser::unary), Some(Parser::binary), Precedence::Term),
        Plus => (None, Some(Parser::binary), Precedence::Term),
        Slash | Star => (None, Some(Parser::binary), Precedence::Factor),
        Question => (None, Some(Parser::ternary), Precedence::Ternary),
        Bang => (Some(Parser::unary), None, Precedence::None),
        BangEqual | EqualEqual => (None, Some(Parser::binary), Precedence::Equality),
        Greater | GreaterEqual | Less | LessEqual => {
            (None, Some(Parser::binary), Precedence::Comparison)
        }
        Identifier => (Some(Parser::variable), None, Precedence::None),
        String => (Some(Parser::string_literal), None, Precedence::None),
        Number => (Some(Parser::number_literal), None, Precedence::None),
        And => (None, Some(Parser::and_operator), Precedence::And),
        Or => (None, Some(Parser::or_operator), Precedence::Or),
        False | Nil | True => (Some(Parser::literal), None, Precedence::None),
        This => (Some(Parser::this_expression), None, Precedence::None),
        Super => (Some(Parser::super_expression), None, Precedence::None),
        _ => (None, None, Precedence::None),
    };
    ParseRule {
        prefix,
        infix,
        precedence,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FunctionKind {
    Script,
    Function,
    Method,
    Initializer,
}

struct Local<'src> {
    name: Token<'src>,
    /// -1 while the initializer is being compiled; the scope depth once
    /// `mark_initialized` runs.
    depth: i32,
    immutable: bool,
    /// Some closure captured this slot, so scope exit must close it
    /// instead of plainly popping.
    captured: bool,
}

struct CompilerUpvalue {
    index: u8,
    is_local: bool,
    /// Immutability of the binding this upvalue ultimately refers to.
    immutable: bool,
}

/// Bookkeeping for the innermost enclosing loop or switch.
struct LoopState {
    /// Backward-jump target for `continue` (the increment clause for
    /// `for`). Unused for switches.
    start: usize,
    /// Locals deeper than this are popped by `break`/`continue`.
    scope_depth: i32,
    /// Switches accept `break` but not `continue`.
    is_switch: bool,
    /// Forward jumps to patch past the end of the construct.
    breaks: Vec<usize>,
}

/// Per-function compiler record; nested function declarations form a chain
/// through `enclosing`.
struct FnCompiler<'src> {
    enclosing: Option<Box<FnCompiler<'src>>>,
    function: Function,
    kind: FunctionKind,
    /// Constant value -> pool index, so repeated constants share a slot.
    constants: Table,
    locals: Vec<Local<'src>>,
    upvalues: Vec<CompilerUpvalue>,
    scope_depth: i32,
    loop_state: Option<LoopState>,
}

impl<'src> FnCompiler<'src> {
    fn new(kind: FunctionKind, function: Function) -> FnCompiler<'src> {
        // Slot zero belongs to the callee; in methods it is addressable as
        // `this`, elsewhere the empty name keeps it unreachable.
        let slot_zero = Local {
            name: Token {
                kind: TokenKind::Identifier,
                lexeme: if matches!(kind, FunctionKind::Method | FunctionKind::Initializer) {
                    "this"
                } else {
                    ""
                },
                line: 0,
            },
            depth: 0,
            immutable: false,
            captured: false,
        };
        FnCompiler {
            enclosing: None,
            function,
            kind,
            constants: Table::new(),
            locals: vec![slot_zero],
            upvalues: Vec::new(),
            scope_depth: 0,
            loop_state: None,
        }
    }

    fn resolve_local(&self, name: &str) -> Result<Option<(u8, bool)>, &'static str> {
        for (i, local) in self.locals.iter().enumerate().rev() {
            if local.name.lexeme == name {
                if local.depth == -1 {
                    return Err("Can't read local variable in its own initializer.");
                }
                return Ok(Some((i as u8, local.immutable)));
            }
        }
        Ok(None)
    }

    /// Resolve a name through enclosing compilers, creating upvalues along
    /// the chain as needed.
    fn resolve_upvalue(&mut self, name: &str) -> Result<Option<(u8, bool)>, &'static str> {
        let Some(enclosing) = self.enclosing.as_mut() else {
            return Ok(None);
        };
        if let Some((index, immutable)) = enclosing.resolve_local(name)? {
            enclosing.locals[index as usize].captured = true;
            let slot = self.add_upvalue(index, true, immutable)?;
            return Ok(Some((slot, immutable)));
        }
        if let Some((index, immutable)) = enclosing.resolve_upvalue(name)? {
            let slot = self.add_upvalue(index, false, immutable)?;
            return Ok(Some((slot, immutable)));
        }
        Ok(None)
    }

    fn add_upvalue(
        &mut self,
        index: u8,
        is_local: bool,
        immutable: bool,
    ) -> Result<u8, &'static str> {
        for (i, upvalue) in self.upvalues.iter().enumerate() {
            if upvalue.index == index && upvalue.is_local == is_local {
                return Ok(i as u8);
            }
        }
        if self.upvalues.len() == MAX_UPVALUES {
            return Err("Too many closure variables in function.");
        }
        self.upvalues.push(CompilerUpvalue {
            index,
            is_local,
            immutable,
        });
        self.function.upvalue_count = self.upvalues.len();
        Ok((self.upvalues.len() - 1) as u8)
    }
}

/// Tracks the class declaration being compiled, for `this`/`super` checks.
struct ClassCompiler {
    enclosing: Option<Box<ClassCompiler>>,
    has_superclass: bool,
}

pub struct Parser<'src, 'ctx> {
    scanner: Scanner<'src>,
    current: Token<'src>,
    previous: Token<'src>,
    had_error: bool,
    panic_mode: bool,
    compiler: Box<FnCompiler<'src>>,
    class_compiler: Option<Box<ClassCompiler>>,
    heap: &'ctx mut Heap,
    globals: &'ctx mut Globals,
    err: &'ctx mut dyn Write,
}

/// Compile a source string into a top-level script function.
///
/// Diagnostics go to `err`; on any error the result is `Err(CompileError)`
/// after the whole source has been parsed (panic-mode recovery keeps going
/// so several errors can be reported in one pass).
pub fn compile(
    source: &str,
    heap: &mut Heap,
    globals: &mut Globals,
    err: &mut dyn Write,
) -> Result<ObjRef, CompileError> {
    let placeholder = Token {
        kind: TokenKind::Eof,
        lexeme: "",
        line: 0,
    };
    let mut parser = Parser {
        scanner: Scanner::new(source),
        current: placeholder,
        previous: placeholder,
        had_error: false,
        panic_mode: false,
        compiler: Box::new(FnCompiler::new(FunctionKind::Script, Function::new(None))),
        class_compiler: None,
        heap: &mut *heap,
        globals: &mut *globals,
        err: &mut *err,
    };

    parser.advance();
    while !parser.match_token(TokenKind::Eof) {
        parser.declaration();
    }
    parser.emit_return();

    let had_error = parser.had_error;
    let finished = std::mem::replace(
        &mut parser.compiler,
        Box::new(FnCompiler::new(FunctionKind::Script, Function::new(None))),
    );
    drop(parser);

    if had_error {
        Err(CompileError)
    } else {
        Ok(heap.alloc(ObjKind::Function(finished.function)))
    }
}

impl<'src, 'ctx> Parser<'src, 'ctx> {
    // =========================================================================
    // Token plumbing and errors
    // =========================================================================

    fn advance(&mut self) {
        self.previous = self.current;
        loop {
            self.current = self.scanner.next_token();
            if self.current.kind != TokenKind::Error {
                break;
            }
            let token = self.current;
            self.error_at(token, token.lexeme);
        }
    }

    fn consume(&mut self, kind: TokenKind, message: &str) {
        if self.current.kind == kind {
            self.advance();
            return;
        }
        let token = self.current;
        self.error_at(token, message);
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn match_token(&mut self, kind: TokenKind) -> bool {
        if !self.check(kind) {
            return false;
        }
        self.advance();
        true
    }

    fn error(&mut self, message: &str) {
        let token = self.previous;
        self.error_at(token, message);
    }

    fn error_at_current(&mut self, message: &str) {
        let token = self.current;
        self.error_at(token, message);
    }

    fn error_at(&mut self, token: Token<'src>, message: &str) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        let _ = write!(self.err, "[line {}] Error", token.line);
        match token.kind {
            TokenKind::Eof => {
                let _ = write!(self.err, " at end");
            }
            TokenKind::Error => {}
            _ => {
                let _ = write!(self.err, " at '{}'", token.lexeme);
            }
        }
        let _ = writeln!(self.err, ": {message}");
        self.had_error = true;
    }

    fn synchronize(&mut self) {
        self.panic_mode = false;
        while self.current.kind != TokenKind::Eof {
            if self.previous.kind == TokenKind::Semicolon {
                return;
            }
            match self.current.kind {
                TokenKind::Class
                | TokenKind::Fun
                | TokenKind::Var
                | TokenKind::Immut
                | TokenKind::For
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Switch
                | TokenKind::Print
                | TokenKind::Return => return,
                _ => {}
            }
            self.advance();
        }
    }

    // =========================================================================
    // Emission
    // =========================================================================

    fn emit_byte(&mut self, byte: u8) {
        let line = self.previous.line;
        self.compiler.function.chunk.write(byte, line);
    }

    fn emit_op(&mut self, op: OpCode) {
        self.emit_byte(op as u8);
    }

    fn chunk_len(&self) -> usize {
        self.compiler.function.chunk.len()
    }

    fn emit_return(&mut self) {
        if self.compiler.kind == FunctionKind::Initializer {
            // An initializer implicitly returns its receiver.
            self.emit_index_op(OpCode::GetLocal, OpCode::GetLocalLong, 0);
        } else {
            self.emit_op(OpCode::Nil);
        }
        self.emit_op(OpCode::Return);
    }

    /// Constant-pool index for `value`, reusing an existing slot when this
    /// function already holds an equal constant.
    fn make_constant(&mut self, value: Value) -> usize {
        if let Some(existing) = self.compiler.constants.get(&*self.heap, value) {
            return existing.as_number() as usize;
        }
        let index = self.compiler.function.chunk.add_constant(value);
        self.compiler
            .constants
            .set(&*self.heap, value, Value::number(index as f64));
        if index > MAX_INDEX {
            self.error("Too many constants in one chunk.");
            return 0;
        }
        index
    }

    fn emit_index_op(&mut self, op: OpCode, op_long: OpCode, index: usize) {
        let line = self.previous.line;
        self.compiler
            .function
            .chunk
            .write_index_op(op, op_long, index, line);
    }

    fn emit_constant(&mut self, value: Value) {
        let index = self.make_constant(value);
        self.emit_index_op(OpCode::Constant, OpCode::ConstantLong, index);
    }

    /// Dense global index for `name`, reserving a slot on first mention.
    fn global_index(&mut self, name: Value) -> usize {
        let index = self.globals.resolve(&*self.heap, name);
        if index > MAX_INDEX {
            self.error("Too many global variables.");
        }
        index
    }

    fn emit_jump(&mut self, op: OpCode) -> usize {
        self.emit_op(op);
        self.emit_byte(0xff);
        self.emit_byte(0xff);
        self.chunk_len() - 2
    }

    fn patch_jump(&mut self, offset: usize) {
        // Account for the two operand bytes of the jump itself.
        let jump = self.chunk_len() - offset - 2;
        if jump > usize::from(u16::MAX) {
            self.error("Too much code to jump over.");
        }
        let chunk = &mut self.compiler.function.chunk;
        chunk.patch(offset, ((jump >> 8) & 0xff) as u8);
        chunk.patch(offset + 1, (jump & 0xff) as u8);
    }

    fn emit_loop(&mut self, loop_start: usize) {
        self.emit_op(OpCode::Loop);
        let offset = self.chunk_len() - loop_start + 2;
        if offset > usize::from(u16::MAX) {
            self.error("Loop body too large.");
        }
        self.emit_byte(((offset >> 8) & 0xff) as u8);
        self.emit_byte((offset & 0xff) as u8);
    }

    /// Allocation safe point: everything the compiler has produced so far
    /// is rooted through the compiler chain, so collecting here is safe.
    fn maybe_collect(&mut self) {
        if !self.heap.should_collect() {
            return;
        }
        self.heap.begin_collection();
        self.heap.mark_table(&self.globals.names);
        for i in 0..self.globals.values.len() {
            let value = self.globals.values[i];
            self.heap.mark_value(value);
        }
        self.heap.mark_table(&self.globals.immutables);
        let mut compiler: Option<&FnCompiler<'src>> = Some(&self.compiler);
        while let Some(c) = compiler {
            if let Some(name) = c.function.name {
                self.heap.mark_object(name);
            }
            for i in 0..c.function.chunk.constants().len() {
                let value = c.function.chunk.constant(i);
                self.heap.mark_value(value);
            }
            compiler = c.enclosing.as_deref();
        }
        self.heap.finish_collection();
    }

    // =========================================================================
    // Scope and variable management
    // =========================================================================

    fn begin_scope(&mut self) {
        self.compiler.scope_depth += 1;
    }

    fn end_scope(&mut self) {
        self.compiler.scope_depth -= 1;
        loop {
            let Some(local) = self.compiler.locals.last() else {
                break;
            };
            if local.depth <= self.compiler.scope_depth {
                break;
            }
            let captured = local.captured;
            self.compiler.locals.pop();
            if captured {
                self.emit_op(OpCode::CloseUpvalue);
            } else {
                self.emit_op(OpCode::Pop);
            }
        }
    }

    /// Emit pops for every local strictly deeper than `depth` without
    /// forgetting them, for `break`/`continue` jumps out of scopes.
    fn discard_locals(&mut self, depth: i32) {
        let mut captured_flags = Vec::new();
        for local in self.compiler.locals.iter().rev() {
            if local.depth <= depth {
                break;
            }
            captured_flags.push(local.captured);
        }
        for captured in captured_flags {
            if captured {
                self.emit_op(OpCode::CloseUpvalue);
            } else {
                self.emit_op(OpCode::Pop);
            }
        }
    }

    fn add_local(&mut self, name: Token<'src>, immutable: bool) {
        if self.compiler.locals.len() == MAX_LOCALS {
            self.error("Too many local variables in function.");
            return;
        }
        self.compiler.locals.push(Local {
            name,
            depth: -1,
            immutable,
            captured: false,
        });
    }

    fn declare_variable(&mut self, immutable: bool) {
        if self.compiler.scope_depth == 0 {
            return;
        }
        let name = self.previous;
        let mut duplicate = false;
        for local in self.compiler.locals.iter().rev() {
            if local.depth != -1 && local.depth < self.compiler.scope_depth {
                break;
            }
            if local.name.lexeme == name.lexeme {
                duplicate = true;
                break;
            }
        }
        if duplicate {
            self.error("Already a variable with this name in this scope.");
        }
        self.add_local(name, immutable);
    }

    fn mark_initialized(&mut self) {
        if self.compiler.scope_depth == 0 {
            return;
        }
        let depth = self.compiler.scope_depth;
        if let Some(local) = self.compiler.locals.last_mut() {
            local.depth = depth;
        }
    }

    /// Consume an identifier and declare it. Returns the interned name for
    /// global declarations, nil for locals.
    fn parse_variable(&mut self, message: &str, immutable: bool) -> Value {
        self.consume(TokenKind::Identifier, message);
        self.declare_variable(immutable);
        if self.compiler.scope_depth > 0 {
            return Value::NIL;
        }
        Value::object(self.heap.intern(self.previous.lexeme))
    }

    fn define_variable(&mut self, name: Value, immutable: bool) {
        if self.compiler.scope_depth > 0 {
            self.mark_initialized();
            return;
        }
        if self.globals.is_immutable(&*self.heap, name) {
            self.error("Cannot redefine immutable variable.");
        } else if immutable {
            self.globals.mark_immutable(&*self.heap, name);
        }
        let index = self.global_index(name);
        self.emit_index_op(OpCode::DefineGlobal, OpCode::DefineGlobalLong, index);
    }

    fn synthetic_token(&self, lexeme: &'static str) -> Token<'src> {
        Token {
            kind: TokenKind::Identifier,
            lexeme,
            line: self.previous.line,
        }
    }

    fn named_variable(&mut self, name: Token<'src>, can_assign: bool) {
        let local = match self.compiler.resolve_local(name.lexeme) {
            Ok(resolved) => resolved,
            Err(message) => {
                self.error(message);
                return;
            }
        };
        if let Some((slot, immutable)) = local {
            if can_assign && self.match_token(TokenKind::Equal) {
                if immutable {
                    self.error("Cannot assign to immutable variable.");
                }
                self.expression();
                self.emit_index_op(OpCode::SetLocal, OpCode::SetLocalLong, usize::from(slot));
            } else {
                self.emit_index_op(OpCode::GetLocal, OpCode::GetLocalLong, usize::from(slot));
            }
            return;
        }

        let upvalue = match self.compiler.resolve_upvalue(name.lexeme) {
            Ok(resolved) => resolved,
            Err(message) => {
                self.error(message);
                return;
            }
        };
        if let Some((slot, immutable)) = upvalue {
            if can_assign && self.match_token(TokenKind::Equal) {
                if immutable {
                    self.error("Cannot assign to immutable variable.");
                }
                self.expression();
                self.emit_op(OpCode::SetUpvalue);
                self.emit_byte(slot);
            } else {
                self.emit_op(OpCode::GetUpvalue);
                self.emit_byte(slot);
            }
            return;
        }

        let name_value = Value::object(self.heap.intern(name.lexeme));
        if can_assign && self.match_token(TokenKind::Equal) {
            if self.globals.is_immutable(&*self.heap, name_value) {
                self.error("Cannot assign to immutable variable.");
            }
            self.expression();
            let index = self.global_index(name_value);
            self.emit_index_op(OpCode::SetGlobal, OpCode::SetGlobalLong, index);
        } else {
            let index = self.global_index(name_value);
            self.emit_index_op(OpCode::GetGlobal, OpCode::GetGlobalLong, index);
        }
    }

    // =========================================================================
    // Function compiler chain
    // =========================================================================

    fn push_compiler(&mut self, kind: FunctionKind) {
        let name = match kind {
            FunctionKind::Script => None,
            _ => Some(self.heap.intern(self.previous.lexeme)),
        };
        let compiler = Box::new(FnCompiler::new(kind, Function::new(name)));
        let enclosing = std::mem::replace(&mut self.compiler, compiler);
        self.compiler.enclosing = Some(enclosing);
    }

    fn pop_compiler(&mut self) -> (Function, Vec<CompilerUpvalue>) {
        self.emit_return();
        let enclosing = self
            .compiler
            .enclosing
            .take()
            .expect("pop of the script compiler");
        let finished = std::mem::replace(&mut self.compiler, enclosing);
        (finished.function, finished.upvalues)
    }

    // =========================================================================
    // Declarations and statements
    // =========================================================================

    fn declaration(&mut self) {
        self.maybe_collect();
        if self.match_token(TokenKind::Class) {
            self.class_declaration();
        } else if self.match_token(TokenKind::Fun) {
            self.fun_declaration();
        } else if self.match_token(TokenKind::Var) {
            self.var_declaration(false);
        } else if self.match_token(TokenKind::Immut) {
            self.var_declaration(true);
        } else {
            self.statement();
        }
        if self.panic_mode {
            self.synchronize();
        }
    }

    fn class_declaration(&mut self) {
        self.consume(TokenKind::Identifier, "Expect class name.");
        let class_name = self.previous;
        let name_value = Value::object(self.heap.intern(class_name.lexeme));
        let name_constant = self.make_constant(name_value);
        self.declare_variable(false);
        self.emit_index_op(OpCode::Class, OpCode::ClassLong, name_constant);
        self.define_variable(name_value, false);

        self.class_compiler = Some(Box::new(ClassCompiler {
            enclosing: self.class_compiler.take(),
            has_superclass: false,
        }));

        if self.match_token(TokenKind::Less) {
            self.consume(TokenKind::Identifier, "Expect superclass name.");
            self.variable(false);
            if class_name.lexeme == self.previous.lexeme {
                self.error("A class can't inherit from itself.");
            }
            // `super` lives in a scope of its own so each nested class
            // declaration sees its own superclass slot.
            self.begin_scope();
            let super_token = self.synthetic_token("super");
            self.add_local(super_token, false);
            self.mark_initialized();
            self.named_variable(class_name, false);
            self.emit_op(OpCode::Inherit);
            if let Some(cc) = self.class_compiler.as_mut() {
                cc.has_superclass = true;
            }
        }

        self.named_variable(class_name, false);
        self.consume(TokenKind::LeftBrace, "Expect '{' before class body.");
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.method();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after class body.");
        self.emit_op(OpCode::Pop);

        let has_superclass = self
            .class_compiler
            .as_ref()
            .is_some_and(|cc| cc.has_superclass);
        if has_superclass {
            self.end_scope();
        }
        self.class_compiler = self
            .class_compiler
            .take()
            .and_then(|cc| cc.enclosing);
    }

    fn method(&mut self) {
        self.consume(TokenKind::Identifier, "Expect method name.");
        let name_value = Value::object(self.heap.intern(self.previous.lexeme));
        let constant = self.make_constant(name_value);
        let kind = if self.previous.lexeme == "init" {
            FunctionKind::Initializer
        } else {
            FunctionKind::Method
        };
        self.function(kind);
        self.emit_index_op(OpCode::Method, OpCode::MethodLong, constant);
    }

    fn fun_declaration(&mut self) {
        let name = self.parse_variable("Expect function name.", false);
        // A function may refer to itself recursively, so the binding is
        // usable before the body finishes compiling.
        self.mark_initialized();
        self.function(FunctionKind::Function);
        self.define_variable(name, false);
    }

    fn function(&mut self, kind: FunctionKind) {
        self.push_compiler(kind);
        self.begin_scope();

        self.consume(TokenKind::LeftParen, "Expect '(' after function name.");
        if !self.check(TokenKind::RightParen) {
            loop {
                self.compiler.function.arity += 1;
                if self.compiler.function.arity > 255 {
                    self.error_at_current("Can't have more than 255 parameters.");
                }
                let name = self.parse_variable("Expect parameter name.", false);
                self.define_variable(name, false);
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after parameters.");
        self.consume(TokenKind::LeftBrace, "Expect '{' before function body.");
        self.block();

        let (function, upvalues) = self.pop_compiler();
        let function_ref = self.heap.alloc(ObjKind::Function(function));
        let index = self.make_constant(Value::object(function_ref));
        self.emit_index_op(OpCode::Closure, OpCode::ClosureLong, index);
        for upvalue in &upvalues {
            self.emit_byte(u8::from(upvalue.is_local));
            self.emit_byte(upvalue.index);
        }
    }

    fn var_declaration(&mut self, immutable: bool) {
        let name = self.parse_variable("Expect variable name.", immutable);
        if self.match_token(TokenKind::Equal) {
            self.expression();
        } else {
            if immutable {
                self.error("Immutable variable must be initialized.");
            }
            self.emit_op(OpCode::Nil);
        }
        self.consume(
            TokenKind::Semicolon,
            "Expect ';' after variable declaration.",
        );
        self.define_variable(name, immutable);
    }

    fn statement(&mut self) {
        if self.match_token(TokenKind::Print) {
            self.print_statement();
        } else if self.match_token(TokenKind::If) {
            self.if_statement();
        } else if self.match_token(TokenKind::While) {
            self.while_statement();
        } else if self.match_token(TokenKind::For) {
            self.for_statement();
        } else if self.match_token(TokenKind::Switch) {
            self.switch_statement();
        } else if self.match_token(TokenKind::Return) {
            self.return_statement();
        } else if self.match_token(TokenKind::Break) {
            self.break_statement();
        } else if self.match_token(TokenKind::Continue) {
            self.continue_statement();
        } else if self.match_token(TokenKind::LeftBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else {
            self.expression_statement();
        }
    }

    fn block(&mut self) {
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.declaration();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after block.");
    }

    fn print_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after value.");
        self.emit_op(OpCode::Print);
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after expression.");
        self.emit_op(OpCode::Pop);
    }

    fn if_statement(&mut self) {
        self.consume(TokenKind::LeftParen, "Expect '(' after 'if'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let then_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();
        let else_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(then_jump);
        self.emit_op(OpCode::Pop);
        if self.match_token(TokenKind::Else) {
            self.statement();
        }
        self.patch_jump(else_jump);
    }

    fn while_statement(&mut self) {
        let loop_start = self.chunk_len();
        let enclosing = self.compiler.loop_state.take();
        self.compiler.loop_state = Some(LoopState {
            start: loop_start,
            scope_depth: self.compiler.scope_depth,
            is_switch: false,
            breaks: Vec::new(),
        });

        self.consume(TokenKind::LeftParen, "Expect '(' after 'while'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let exit_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();
        self.emit_loop(loop_start);

        self.patch_jump(exit_jump);
        self.emit_op(OpCode::Pop);
        self.finish_loop(enclosing);
    }

    fn for_statement(&mut self) {
        self.begin_scope();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'for'.");

        let mut loop_var: Option<(u8, Token<'src>)> = None;
        if self.match_token(TokenKind::Semicolon) {
            // No initializer.
        } else if self.match_token(TokenKind::Var) {
            self.var_declaration(false);
            let slot = (self.compiler.locals.len() - 1) as u8;
            let name = self.compiler.locals[usize::from(slot)].name;
            loop_var = Some((slot, name));
        } else {
            self.expression_statement();
        }

        let mut loop_start = self.chunk_len();
        let enclosing = self.compiler.loop_state.take();
        self.compiler.loop_state = Some(LoopState {
            start: loop_start,
            scope_depth: self.compiler.scope_depth,
            is_switch: false,
            breaks: Vec::new(),
        });

        let mut exit_jump = None;
        if !self.match_token(TokenKind::Semicolon) {
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after loop condition.");
            exit_jump = Some(self.emit_jump(OpCode::JumpIfFalse));
            self.emit_op(OpCode::Pop);
        }

        if !self.match_token(TokenKind::RightParen) {
            let body_jump = self.emit_jump(OpCode::Jump);
            let increment_start = self.chunk_len();
            self.expression();
            self.emit_op(OpCode::Pop);
            self.consume(TokenKind::RightParen, "Expect ')' after for clauses.");
            self.emit_loop(loop_start);
            loop_start = increment_start;
            // `continue` re-runs the increment, not the condition.
            if let Some(state) = self.compiler.loop_state.as_mut() {
                state.start = increment_start;
            }
            self.patch_jump(body_jump);
        }

        match loop_var {
            Some((outer_slot, name)) => {
                // Give the body its own copy of the loop variable so each
                // iteration's closures capture a distinct cell, then write
                // the copy back before the increment runs.
                self.emit_index_op(OpCode::GetLocal, OpCode::GetLocalLong, usize::from(outer_slot));
                self.begin_scope();
                self.add_local(name, false);
                self.mark_initialized();
                let shadow_slot = (self.compiler.locals.len() - 1) as u8;
                self.statement();
                self.emit_index_op(OpCode::GetLocal, OpCode::GetLocalLong, usize::from(shadow_slot));
                self.emit_index_op(OpCode::SetLocal, OpCode::SetLocalLong, usize::from(outer_slot));
                self.emit_op(OpCode::Pop);
                self.end_scope();
            }
            None => self.statement(),
        }

        self.emit_loop(loop_start);
        if let Some(exit) = exit_jump {
            self.patch_jump(exit);
            self.emit_op(OpCode::Pop);
        }
        self.finish_loop(enclosing);
        self.end_scope();
    }

    fn switch_statement(&mut self) {
        self.consume(TokenKind::LeftParen, "Expect '(' after 'switch'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after switch value.");

        let enclosing = self.compiler.loop_state.take();
        self.compiler.loop_state = Some(LoopState {
            start: 0,
            scope_depth: self.compiler.scope_depth,
            is_switch: true,
            breaks: Vec::new(),
        });

        // The discriminant stays on the stack across every test; claiming
        // it as a hidden local lets break and scope exit pop it exactly
        // once.
        self.begin_scope();
        let hidden = self.synthetic_token("");
        self.add_local(hidden, false);
        self.mark_initialized();

        self.consume(TokenKind::LeftBrace, "Expect '{' before switch cases.");
        let mut fallthrough: Option<usize> = None;
        while self.match_token(TokenKind::Case) {
            self.expression();
            self.consume(TokenKind::Colon, "Expect ':' after case value.");
            self.emit_op(OpCode::CaseEqual);
            let next_case = self.emit_jump(OpCode::JumpIfFalse);
            self.emit_op(OpCode::Pop);
            // An unbroken previous case falls through to this body,
            // skipping the test above.
            if let Some(jump) = fallthrough.take() {
                self.patch_jump(jump);
            }
            while !self.check(TokenKind::Case)
                && !self.check(TokenKind::Default)
                && !self.check(TokenKind::RightBrace)
                && !self.check(TokenKind::Eof)
            {
                self.statement();
            }
            fallthrough = Some(self.emit_jump(OpCode::Jump));
            self.patch_jump(next_case);
            self.emit_op(OpCode::Pop);
        }

        if self.match_token(TokenKind::Default) {
            self.consume(TokenKind::Colon, "Expect ':' after 'default'.");
            if let Some(jump) = fallthrough.take() {
                self.patch_jump(jump);
            }
            while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
                self.statement();
            }
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after switch cases.");
        if let Some(jump) = fallthrough.take() {
            self.patch_jump(jump);
        }

        self.end_scope();
        self.finish_loop(enclosing);
    }

    fn finish_loop(&mut self, enclosing: Option<LoopState>) {
        let state = self
            .compiler
            .loop_state
            .take()
            .expect("loop state missing at loop end");
        for offset in state.breaks {
            self.patch_jump(offset);
        }
        self.compiler.loop_state = enclosing;
    }

    fn break_statement(&mut self) {
        self.consume(TokenKind::Semicolon, "Expect ';' after 'break'.");
        let Some(depth) = self.compiler.loop_state.as_ref().map(|s| s.scope_depth) else {
            self.error("Can't use 'break' outside of a loop or switch.");
            return;
        };
        self.discard_locals(depth);
        let jump = self.emit_jump(OpCode::Jump);
        let state = self
            .compiler
            .loop_state
            .as_mut()
            .expect("loop state vanished");
        if state.breaks.len() == MAX_BREAKS {
            self.error("Too many 'break' statements in one loop.");
        } else {
            state.breaks.push(jump);
        }
    }

    fn continue_statement(&mut self) {
        self.consume(TokenKind::Semicolon, "Expect ';' after 'continue'.");
        let info = self
            .compiler
            .loop_state
            .as_ref()
            .map(|s| (s.start, s.scope_depth, s.is_switch));
        match info {
            None => self.error("Can't use 'continue' outside of a loop."),
            Some((_, _, true)) => self.error("Can't use 'continue' inside a switch."),
            Some((start, depth, false)) => {
                self.discard_locals(depth);
                self.emit_loop(start);
            }
        }
    }

    fn return_statement(&mut self) {
        if self.compiler.kind == FunctionKind::Script {
            self.error("Can't return from top-level code.");
        }
        if self.match_token(TokenKind::Semicolon) {
            self.emit_return();
        } else {
            if self.compiler.kind == FunctionKind::Initializer {
                self.error("Can't return a value from an initializer.");
            }
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after return value.");
            self.emit_op(OpCode::Return);
        }
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();
        let Some(prefix) = get_rule(self.previous.kind).prefix else {
            self.error("Expect expression.");
            return;
        };
        let can_assign = precedence <= Precedence::Assignment;
        prefix(self, can_assign);

        while precedence <= get_rule(self.current.kind).precedence {
            self.advance();
            if let Some(infix) = get_rule(self.previous.kind).infix {
                infix(self, can_assign);
            }
        }

        if can_assign && self.match_token(TokenKind::Equal) {
            self.error("Invalid assignment target.");
        }
    }

    fn grouping(&mut self, _can_assign: bool) {
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after expression.");
    }

    fn number_literal(&mut self, _can_assign: bool) {
        match self.previous.lexeme.parse::<f64>() {
            Ok(n) => self.emit_constant(Value::number(n)),
            Err(_) => self.error("Invalid number literal."),
        }
    }

    fn string_literal(&mut self, _can_assign: bool) {
        let lexeme = self.previous.lexeme;
        let contents = &lexeme[1..lexeme.len() - 1];
        let string = self.heap.intern(contents);
        self.emit_constant(Value::object(string));
    }

    fn literal(&mut self, _can_assign: bool) {
        match self.previous.kind {
            TokenKind::False => self.emit_op(OpCode::False),
            TokenKind::Nil => self.emit_op(OpCode::Nil),
            TokenKind::True => self.emit_op(OpCode::True),
            _ => unreachable!("literal rule on non-literal token"),
        }
    }

    fn variable(&mut self, can_assign: bool) {
        let name = self.previous;
        self.named_variable(name, can_assign);
    }

    fn unary(&mut self, _can_assign: bool) {
        let operator = self.previous.kind;
        self.parse_precedence(Precedence::Unary);
        match operator {
            TokenKind::Bang => self.emit_op(OpCode::Not),
            TokenKind::Minus => self.emit_op(OpCode::Negate),
            _ => unreachable!("unary rule on non-unary token"),
        }
    }

    fn binary(&mut self, _can_assign: bool) {
        let operator = self.previous.kind;
        let rule = get_rule(operator);
        self.parse_precedence(rule.precedence.next());

        match operator {
            TokenKind::BangEqual => {
                self.emit_op(OpCode::Equal);
                self.emit_op(OpCode::Not);
            }
            TokenKind::EqualEqual => self.emit_op(OpCode::Equal),
            TokenKind::Greater => self.emit_op(OpCode::Greater),
            TokenKind::GreaterEqual => {
                self.emit_op(OpCode::Less);
                self.emit_op(OpCode::Not);
            }
            TokenKind::Less => self.emit_op(OpCode::Less),
            TokenKind::LessEqual => {
                self.emit_op(OpCode::Greater);
                self.emit_op(OpCode::Not);
            }
            TokenKind::Plus => self.emit_op(OpCode::Add),
            TokenKind::Minus => self.emit_op(OpCode::Subtract),
            TokenKind::Star => self.emit_op(OpCode::Multiply),
            TokenKind::Slash => self.emit_op(OpCode::Divide),
            _ => unreachable!("binary rule on non-binary token"),
        }
    }

    fn and_operator(&mut self, _can_assign: bool) {
        let end_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::And);
        self.patch_jump(end_jump);
    }

    fn or_operator(&mut self, _can_assign: bool) {
        let else_jump = self.emit_jump(OpCode::JumpIfFalse);
        let end_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(else_jump);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::Or);
        self.patch_jump(end_jump);
    }

    /// `c ? t : e`. Both branches parse at the ternary level, so the
    /// operator nests right-associatively.
    fn ternary(&mut self, _can_assign: bool) {
        let else_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::Ternary);
        let end_jump = self.emit_jump(OpCode::Jump);
        self.consume(TokenKind::Colon, "Expect ':' after then branch of '?:'.");
        self.patch_jump(else_jump);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::Ternary);
        self.patch_jump(end_jump);
    }

    fn call(&mut self, _can_assign: bool) {
        let argc = self.argument_list();
        self.emit_op(OpCode::Call);
        self.emit_byte(argc);
    }

    fn dot(&mut self, can_assign: bool) {
        self.consume(TokenKind::Identifier, "Expect property name after '.'.");
        let name_value = Value::object(self.heap.intern(self.previous.lexeme));
        let index = self.make_constant(name_value);

        if can_assign && self.match_token(TokenKind::Equal) {
            self.expression();
            self.emit_index_op(OpCode::SetProperty, OpCode::SetPropertyLong, index);
        } else if self.match_token(TokenKind::LeftParen) {
            let argc = self.argument_list();
            self.emit_index_op(OpCode::Invoke, OpCode::InvokeLong, index);
            self.emit_byte(argc);
        } else {
            self.emit_index_op(OpCode::GetProperty, OpCode::GetPropertyLong, index);
        }
    }

    fn this_expression(&mut self, _can_assign: bool) {
        if self.class_compiler.is_none() {
            self.error("Can't use 'this' outside of a class.");
            return;
        }
        self.variable(false);
    }

    fn super_expression(&mut self, _can_assign: bool) {
        let in_class = self.class_compiler.as_ref().map(|cc| cc.has_superclass);
        match in_class {
            None => self.error("Can't use 'super' outside of a class."),
            Some(false) => self.error("Can't use 'super' in a class with no superclass."),
            Some(true) => {}
        }

        self.consume(TokenKind::Dot, "Expect '.' after 'super'.");
        self.consume(TokenKind::Identifier, "Expect superclass method name.");
        let name_value = Value::object(self.heap.intern(self.previous.lexeme));
        let index = self.make_constant(name_value);

        let this_token = self.synthetic_token("this");
        self.named_variable(this_token, false);
        let super_token = self.synthetic_token("super");
        if self.match_token(TokenKind::LeftParen) {
            let argc = self.argument_list();
            self.named_variable(super_token, false);
            self.emit_index_op(OpCode::SuperInvoke, OpCode::SuperInvokeLong, index);
            self.emit_byte(argc);
        } else {
            self.named_variable(super_token, false);
            self.emit_index_op(OpCode::GetSuper, OpCode::GetSuperLong, index);
        }
    }

    fn argument_list(&mut self) -> u8 {
        let mut count: usize = 0;
        if !self.check(TokenKind::RightParen) {
            loop {
                self.expression();
                count += 1;
                if count > 255 {
                    self.error("Can't have more than 255 arguments.");
                }
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after arguments.");
        count.min(255) as u8
    }
}
