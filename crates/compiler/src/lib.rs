//! Brio compiler: scanner and single-pass bytecode compiler
//!
//! Source text goes in, a heap-allocated script [`Function`] comes out;
//! there is no intermediate AST. The compiler shares the caller's heap
//! (string and function objects are allocated during compilation) and the
//! caller's global registry (globals compile to dense indices).
//!
//! [`Function`]: brio_core::Function

pub mod compiler;
pub mod scanner;

pub use compiler::{CompileError, compile};
pub use scanner::{Scanner, Token, TokenKind};
