//! Built-in native functions
//!
//! Natives receive the heap and their argument slice and return either a
//! result value or an error message; the VM has already checked the
//! argument count, so each native only validates types. Errors become
//! runtime errors with the native's message verbatim.

use std::time::{SystemTime, UNIX_EPOCH};

use brio_core::object::ObjRef;
use brio_core::{Heap, Value};

use crate::vm::Vm;

pub(crate) fn register_all(vm: &mut Vm) {
    vm.define_native("clock", 0, clock);
    vm.define_native("chr", 1, chr);
    vm.define_native("int", 1, int);
    vm.define_native("hasattr", 2, hasattr);
    vm.define_native("getattr", 2, getattr);
    vm.define_native("setattr", 3, setattr);
    vm.define_native("delattr", 2, delattr);
    vm.define_native("readfile", 1, readfile);
    vm.define_native("writefile", 2, writefile);
}

/// Seconds since the Unix epoch, as a number.
fn clock(_heap: &mut Heap, _args: &[Value]) -> Result<Value, String> {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(elapsed) => Ok(Value::number(elapsed.as_secs_f64())),
        Err(error) => Err(format!("clock() failed: {error}.")),
    }
}

/// Code point (0..=255) to one-character string.
fn chr(heap: &mut Heap, args: &[Value]) -> Result<Value, String> {
    if !args[0].is_number() {
        return Err("Argument to chr() must be a number.".to_string());
    }
    let n = args[0].as_number();
    if n.fract() != 0.0 || !(0.0..=255.0).contains(&n) {
        return Err("Argument to chr() must be a whole number between 0 and 255.".to_string());
    }
    let text = char::from(n as u8).to_string();
    Ok(Value::object(heap.intern(&text)))
}

/// Truncate a number, or give the code point of a one-character string.
fn int(heap: &mut Heap, args: &[Value]) -> Result<Value, String> {
    let value = args[0];
    if value.is_number() {
        return Ok(Value::number(value.as_number().trunc()));
    }
    if heap.is_string(value) {
        let chars = &heap.as_string(value.as_obj()).chars;
        let mut iter = chars.chars();
        if let (Some(c), None) = (iter.next(), iter.next()) {
            return Ok(Value::number(f64::from(u32::from(c))));
        }
        return Err("String argument to int() must be a single character.".to_string());
    }
    Err("Argument to int() must be a number or a string.".to_string())
}

fn instance_and_name(
    heap: &Heap,
    args: &[Value],
    native: &str,
) -> Result<(ObjRef, Value), String> {
    if !heap.is_instance(args[0]) {
        return Err(format!("First argument to {native}() must be an instance."));
    }
    if !heap.is_string(args[1]) {
        return Err(format!("Second argument to {native}() must be a string."));
    }
    Ok((args[0].as_obj(), args[1]))
}

fn hasattr(heap: &mut Heap, args: &[Value]) -> Result<Value, String> {
    let (instance, name) = instance_and_name(heap, args, "hasattr")?;
    let present = heap.instance(instance).fields.get(heap, name).is_some();
    Ok(Value::boolean(present))
}

fn getattr(heap: &mut Heap, args: &[Value]) -> Result<Value, String> {
    let (instance, name) = instance_and_name(heap, args, "getattr")?;
    match heap.instance(instance).fields.get(heap, name) {
        Some(value) => Ok(value),
        None => Err(format!(
            "Undefined property '{}'.",
            heap.as_string(name.as_obj()).chars
        )),
    }
}

fn setattr(heap: &mut Heap, args: &[Value]) -> Result<Value, String> {
    let (instance, name) = instance_and_name(heap, args, "setattr")?;
    let value = args[2];
    let mut fields = std::mem::take(&mut heap.instance_mut(instance).fields);
    fields.set(heap, name, value);
    heap.instance_mut(instance).fields = fields;
    Ok(value)
}

fn delattr(heap: &mut Heap, args: &[Value]) -> Result<Value, String> {
    let (instance, name) = instance_and_name(heap, args, "delattr")?;
    let mut fields = std::mem::take(&mut heap.instance_mut(instance).fields);
    let deleted = fields.delete(heap, name);
    heap.instance_mut(instance).fields = fields;
    if deleted {
        Ok(Value::NIL)
    } else {
        Err(format!(
            "Undefined property '{}'.",
            heap.as_string(name.as_obj()).chars
        ))
    }
}

fn readfile(heap: &mut Heap, args: &[Value]) -> Result<Value, String> {
    if !heap.is_string(args[0]) {
        return Err("Argument to readfile() must be a string path.".to_string());
    }
    let path = heap.as_string(args[0].as_obj()).chars.to_string();
    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(Value::object(heap.intern(&contents))),
        Err(error) => Err(format!("Could not read file '{path}': {error}.")),
    }
}

fn writefile(heap: &mut Heap, args: &[Value]) -> Result<Value, String> {
    if !heap.is_string(args[0]) {
        return Err("First argument to writefile() must be a string path.".to_string());
    }
    if !heap.is_string(args[1]) {
        return Err("Second argument to writefile() must be a string.".to_string());
    }
    let path = heap.as_string(args[0].as_obj()).chars.to_string();
    let contents = heap.as_string(args[1].as_obj()).chars.to_string();
    match std::fs::write(&path, contents) {
        Ok(()) => Ok(Value::NIL),
        Err(error) => Err(format!("Could not write file '{path}': {error}.")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brio_core::object::{Class, Instance, ObjKind};
    use brio_core::Table;

    fn instance_fixture(heap: &mut Heap) -> Value {
        let name = heap.intern("Thing");
        let class = heap.alloc(ObjKind::Class(Class {
            name,
            methods: Table::new(),
        }));
        let instance = heap.alloc(ObjKind::Instance(Instance {
            class,
            fields: Table::new(),
        }));
        Value::object(instance)
    }

    #[test]
    fn test_chr_int_round_trip() {
        let mut heap = Heap::new();
        for code in [0.0, 65.0, 127.0, 255.0] {
            let s = chr(&mut heap, &[Value::number(code)]).unwrap();
            let back = int(&mut heap, &[s]).unwrap();
            assert_eq!(back.as_number(), code);
        }
    }

    #[test]
    fn test_chr_rejects_out_of_range() {
        let mut heap = Heap::new();
        assert!(chr(&mut heap, &[Value::number(-1.0)]).is_err());
        assert!(chr(&mut heap, &[Value::number(256.0)]).is_err());
        assert!(chr(&mut heap, &[Value::number(1.5)]).is_err());
        assert!(chr(&mut heap, &[Value::NIL]).is_err());
    }

    #[test]
    fn test_int_truncates_numbers() {
        let mut heap = Heap::new();
        assert_eq!(
            int(&mut heap, &[Value::number(3.9)]).unwrap().as_number(),
            3.0
        );
        assert_eq!(
            int(&mut heap, &[Value::number(-3.9)]).unwrap().as_number(),
            -3.0
        );
        assert!(int(&mut heap, &[Value::TRUE]).is_err());
    }

    #[test]
    fn test_attribute_natives() {
        let mut heap = Heap::new();
        let instance = instance_fixture(&mut heap);
        let name = Value::object(heap.intern("x"));

        let absent = hasattr(&mut heap, &[instance, name]).unwrap();
        assert_eq!(absent, Value::FALSE);
        assert!(getattr(&mut heap, &[instance, name]).is_err());

        let set = setattr(&mut heap, &[instance, name, Value::number(9.0)]).unwrap();
        assert_eq!(set.as_number(), 9.0);
        assert_eq!(
            hasattr(&mut heap, &[instance, name]).unwrap(),
            Value::TRUE
        );
        assert_eq!(
            getattr(&mut heap, &[instance, name]).unwrap().as_number(),
            9.0
        );

        assert_eq!(delattr(&mut heap, &[instance, name]).unwrap(), Value::NIL);
        assert!(delattr(&mut heap, &[instance, name]).is_err());
        assert_eq!(hasattr(&mut heap, &[instance, name]).unwrap(), Value::FALSE);
    }

    #[test]
    fn test_attribute_natives_reject_non_instances() {
        let mut heap = Heap::new();
        let name = Value::object(heap.intern("x"));
        let class_name = heap.intern("C");
        let class = heap.alloc(ObjKind::Class(Class {
            name: class_name,
            methods: Table::new(),
        }));
        // A class object is not an instance.
        assert!(hasattr(&mut heap, &[Value::object(class), name]).is_err());
        assert!(hasattr(&mut heap, &[Value::number(1.0), name]).is_err());
        let instance = instance_fixture(&mut heap);
        assert!(hasattr(&mut heap, &[instance, Value::number(1.0)]).is_err());
    }

    #[test]
    fn test_read_write_file() {
        let mut heap = Heap::new();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("note.txt");
        let path_value = Value::object(heap.intern(path.to_str().unwrap()));
        let contents = Value::object(heap.intern("line one\nline two\n"));

        assert_eq!(
            writefile(&mut heap, &[path_value, contents]).unwrap(),
            Value::NIL
        );
        let read_back = readfile(&mut heap, &[path_value]).unwrap();
        // Interning makes the round trip reference-equal.
        assert_eq!(read_back, contents);
    }

    #[test]
    fn test_readfile_missing_file() {
        let mut heap = Heap::new();
        let path = Value::object(heap.intern("/no/such/brio/file"));
        let error = readfile(&mut heap, &[path]).unwrap_err();
        assert!(error.contains("Could not read file"));
    }

    #[test]
    fn test_clock_advances() {
        let mut heap = Heap::new();
        let a = clock(&mut heap, &[]).unwrap().as_number();
        assert!(a > 0.0);
    }
}
