//! Shared fixture for end-to-end interpreter tests: a VM wired to
//! capturable output and error sinks.
#![allow(dead_code)]

use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use brio_runtime::{InterpretResult, Vm, VmOptions};

#[derive(Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Run one script with default options. Returns (status, stdout, stderr).
pub fn run(source: &str) -> (InterpretResult, String, String) {
    run_with(VmOptions::default(), source)
}

pub fn run_with(options: VmOptions, source: &str) -> (InterpretResult, String, String) {
    let out = SharedBuffer::default();
    let err = SharedBuffer::default();
    let mut vm = Vm::with_streams(options, Box::new(out.clone()), Box::new(err.clone()));
    let result = vm.interpret(source);
    (result, out.contents(), err.contents())
}

/// Assert a script runs cleanly and produces exactly `expected` on stdout.
#[track_caller]
pub fn expect_output(source: &str, expected: &str) {
    let (result, out, err) = run(source);
    assert_eq!(result, InterpretResult::Ok, "stderr: {err}");
    assert_eq!(out, expected);
}

/// Assert a script aborts with a runtime error mentioning `message`.
#[track_caller]
pub fn expect_runtime_error(source: &str, message: &str) {
    let (result, _out, err) = run(source);
    assert_eq!(result, InterpretResult::RuntimeError, "stderr: {err}");
    assert!(err.contains(message), "missing {message:?} in {err:?}");
}
