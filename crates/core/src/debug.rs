//! Chunk disassembler
//!
//! Human-readable listings of compiled chunks, used by the `--print-code`
//! diagnostic and the per-instruction execution trace. Output goes to any
//! `io::Write` so the VM can aim it at its error sink and tests can capture
//! it.

use std::io::{self, Write};

use crate::chunk::{Chunk, OpCode};
use crate::heap::Heap;

pub fn disassemble_chunk(
    heap: &Heap,
    chunk: &Chunk,
    name: &str,
    out: &mut dyn Write,
) -> io::Result<()> {
    writeln!(out, "== {name} ==")?;
    let mut offset = 0;
    while offset < chunk.len() {
        offset = disassemble_instruction(heap, chunk, offset, out)?;
    }
    Ok(())
}

/// Print one instruction and return the offset of the next one.
pub fn disassemble_instruction(
    heap: &Heap,
    chunk: &Chunk,
    offset: usize,
    out: &mut dyn Write,
) -> io::Result<usize> {
    write!(out, "{offset:04} ")?;
    if offset > 0 && chunk.line_at(offset) == chunk.line_at(offset - 1) {
        write!(out, "   | ")?;
    } else {
        write!(out, "{:4} ", chunk.line_at(offset))?;
    }

    let byte = chunk.code[offset];
    let Some(op) = OpCode::from_byte(byte) else {
        writeln!(out, "Unknown opcode {byte}")?;
        return Ok(offset + 1);
    };

    use OpCode::*;
    match op {
        Nil | True | False | Pop | Equal | CaseEqual | Greater | Less | Add | Subtract
        | Multiply | Divide | Not | Negate | Print | Return | CloseUpvalue | Inherit => {
            writeln!(out, "{}", op.mnemonic())?;
            Ok(offset + 1)
        }

        Constant | Class | Method | GetProperty | SetProperty | GetSuper => {
            constant_instruction(heap, chunk, op, offset, false, out)
        }
        ConstantLong | ClassLong | MethodLong | GetPropertyLong | SetPropertyLong
        | GetSuperLong => constant_instruction(heap, chunk, op, offset, true, out),

        DefineGlobal | GetGlobal | SetGlobal => index_instruction(chunk, op, offset, false, out),
        DefineGlobalLong | GetGlobalLong | SetGlobalLong => {
            index_instruction(chunk, op, offset, true, out)
        }

        GetLocal | SetLocal | GetUpvalue | SetUpvalue | Call => {
            byte_instruction(chunk, op, offset, out)
        }
        GetLocalLong | SetLocalLong => index_instruction(chunk, op, offset, true, out),

        Jump | JumpIfFalse => jump_instruction(chunk, op, offset, 1, out),
        Loop => jump_instruction(chunk, op, offset, -1, out),

        Invoke | SuperInvoke => invoke_instruction(heap, chunk, op, offset, false, out),
        InvokeLong | SuperInvokeLong => invoke_instruction(heap, chunk, op, offset, true, out),

        Closure | ClosureLong => closure_instruction(heap, chunk, op, offset, out),
    }
}

fn read_index(chunk: &Chunk, offset: usize, long: bool) -> (usize, usize) {
    if long {
        let index = (usize::from(chunk.code[offset]) << 16)
            | (usize::from(chunk.code[offset + 1]) << 8)
            | usize::from(chunk.code[offset + 2]);
        (index, offset + 3)
    } else {
        (usize::from(chunk.code[offset]), offset + 1)
    }
}

fn constant_instruction(
    heap: &Heap,
    chunk: &Chunk,
    op: OpCode,
    offset: usize,
    long: bool,
    out: &mut dyn Write,
) -> io::Result<usize> {
    let (index, next) = read_index(chunk, offset + 1, long);
    let value = heap.format_value(chunk.constant(index));
    writeln!(out, "{:<20} {index:4} '{value}'", op.mnemonic())?;
    Ok(next)
}

fn index_instruction(
    chunk: &Chunk,
    op: OpCode,
    offset: usize,
    long: bool,
    out: &mut dyn Write,
) -> io::Result<usize> {
    let (index, next) = read_index(chunk, offset + 1, long);
    writeln!(out, "{:<20} {index:4}", op.mnemonic())?;
    Ok(next)
}

fn byte_instruction(
    chunk: &Chunk,
    op: OpCode,
    offset: usize,
    out: &mut dyn Write,
) -> io::Result<usize> {
    let slot = chunk.code[offset + 1];
    writeln!(out, "{:<20} {slot:4}", op.mnemonic())?;
    Ok(offset + 2)
}

fn jump_instruction(
    chunk: &Chunk,
    op: OpCode,
    offset: usize,
    sign: i64,
    out: &mut dyn Write,
) -> io::Result<usize> {
    let jump =
        i64::from(u16::from(chunk.code[offset + 1]) << 8 | u16::from(chunk.code[offset + 2]));
    let target = offset as i64 + 3 + sign * jump;
    writeln!(out, "{:<20} {offset:4} -> {target}", op.mnemonic())?;
    Ok(offset + 3)
}

fn invoke_instruction(
    heap: &Heap,
    chunk: &Chunk,
    op: OpCode,
    offset: usize,
    long: bool,
    out: &mut dyn Write,
) -> io::Result<usize> {
    let (index, next) = read_index(chunk, offset + 1, long);
    let argc = chunk.code[next];
    let name = heap.format_value(chunk.constant(index));
    writeln!(out, "{:<20} ({argc} args) {index:4} '{name}'", op.mnemonic())?;
    Ok(next + 1)
}

fn closure_instruction(
    heap: &Heap,
    chunk: &Chunk,
    op: OpCode,
    offset: usize,
    out: &mut dyn Write,
) -> io::Result<usize> {
    let (index, mut next) = read_index(chunk, offset + 1, op == OpCode::ClosureLong);
    let value = chunk.constant(index);
    writeln!(out, "{:<20} {index:4} {}", op.mnemonic(), heap.format_value(value))?;

    let upvalue_count = heap.function(value.as_obj()).upvalue_count;
    for _ in 0..upvalue_count {
        let is_local = chunk.code[next] != 0;
        let slot = chunk.code[next + 1];
        writeln!(
            out,
            "{:04}      |                     {} {}",
            next,
            if is_local { "local" } else { "upvalue" },
            slot
        )?;
        next += 2;
    }
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn test_disassemble_simple_chunk() {
        let mut heap = Heap::new();
        let s = heap.intern("hi");
        let mut chunk = Chunk::new();
        let index = chunk.add_constant(Value::object(s));
        chunk.write_index_op(OpCode::Constant, OpCode::ConstantLong, index, 1);
        chunk.write_op(OpCode::Print, 1);
        chunk.write_op(OpCode::Nil, 2);
        chunk.write_op(OpCode::Return, 2);

        let mut out = Vec::new();
        disassemble_chunk(&heap, &chunk, "test", &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("== test =="));
        assert!(text.contains("OP_CONSTANT"));
        assert!(text.contains("'hi'"));
        assert!(text.contains("OP_PRINT"));
        assert!(text.contains("OP_RETURN"));
        // Second line of the same source line collapses to '|'.
        assert!(text.contains("   | OP_PRINT"));
    }

    #[test]
    fn test_disassemble_jump_targets() {
        let heap = Heap::new();
        let mut chunk = Chunk::new();
        chunk.write_op(OpCode::JumpIfFalse, 1);
        chunk.write(0x00, 1);
        chunk.write(0x04, 1);
        let mut out = Vec::new();
        let next = disassemble_instruction(&heap, &chunk, 0, &mut out).unwrap();
        assert_eq!(next, 3);
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("OP_JUMP_IF_FALSE"));
        assert!(text.contains("0 -> 7"));
    }
}
