//! Brio runtime: the bytecode virtual machine
//!
//! The public surface is [`Vm`]: construct one with [`VmOptions`] (and
//! optionally injected output/error sinks), feed it source through
//! [`Vm::interpret`], and read the three-valued [`InterpretResult`].
//! Globals, interned strings, and immutability records persist across
//! `interpret` calls, which is what makes a line-at-a-time REPL work.

pub mod natives;
pub mod vm;

pub use vm::{FRAMES_MAX, InterpretResult, Vm, VmOptions};
