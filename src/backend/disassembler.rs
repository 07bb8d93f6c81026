// Chunk disassembler, in the canonical clox convention: one line per
// instruction, offset, source line (blank when it repeats the previous
// instruction's line), mnemonic, operands. The teacher's equivalent is
// `dump_internal_state`/`print_ir_report`; this turns that debug-dump
// texture into a real `--mode trace` feature instead of commented-out code.

use crate::common::chunk::{Chunk, OpCode};
use crate::common::value::{Obj, ObjFunction, Value};

pub fn disassemble_chunk(chunk: &Chunk, name: &str) {
    println!("== {name} ==");
    let mut offset = 0;
    while offset < chunk.code.len() {
        offset = disassemble_instruction(chunk, offset);
    }
}

/// Disassembles `function`'s own chunk, then recurses into every nested
/// Function found in its constant pool, so `--mode trace` dumps the whole
/// compiled program up front rather than just the top level.
pub fn disassemble_program(function: &ObjFunction) {
    disassemble_chunk(&function.chunk, function.display_name());
    for constant in &function.chunk.constants {
        if let Value::Obj(Obj::Function(nested)) = constant {
            disassemble_program(nested);
        }
    }
}

pub fn disassemble_instruction(chunk: &Chunk, offset: usize) -> usize {
    print!("{offset:04} ");
    if offset > 0 && chunk.lines[offset] == chunk.lines[offset - 1] {
        print!("   | ");
    } else {
        print!("{:4} ", chunk.lines[offset]);
    }

    let byte = chunk.code[offset];
    let op = match OpCode::from_byte(byte) {
        Some(op) => op,
        None => {
            println!("Unknown opcode {byte}");
            return offset + 1;
        }
    };

    match op {
        OpCode::Constant => constant_instruction("OP_CONSTANT", chunk, offset),
        OpCode::Nil => simple_instruction("OP_NIL", offset),
        OpCode::True => simple_instruction("OP_TRUE", offset),
        OpCode::False => simple_instruction("OP_FALSE", offset),
        OpCode::Pop => simple_instruction("OP_POP", offset),
        OpCode::GetLocal => byte_instruction("OP_GET_LOCAL", chunk, offset),
        OpCode::SetLocal => byte_instruction("OP_SET_LOCAL", chunk, offset),
        OpCode::GetGlobal => constant_instruction("OP_GET_GLOBAL", chunk, offset),
        OpCode::DefineGlobal => constant_instruction("OP_DEFINE_GLOBAL", chunk, offset),
        OpCode::SetGlobal => constant_instruction("OP_SET_GLOBAL", chunk, offset),
        OpCode::GetUpvalue => byte_instruction("OP_GET_UPVALUE", chunk, offset),
        OpCode::SetUpvalue => byte_instruction("OP_SET_UPVALUE", chunk, offset),
        OpCode::Equal => simple_instruction("OP_EQUAL", offset),
        OpCode::Greater => simple_instruction("OP_GREATER", offset),
        OpCode::Less => simple_instruction("OP_LESS", offset),
        OpCode::Add => simple_instruction("OP_ADD", offset),
        OpCode::Subtract => simple_instruction("OP_SUBTRACT", offset),
        OpCode::Multiply => simple_instruction("OP_MULTIPLY", offset),
        OpCode::Divide => simple_instruction("OP_DIVIDE", offset),
        OpCode::IntDivide => simple_instruction("OP_INT_DIVIDE", offset),
        OpCode::Modulus => simple_instruction("OP_MODULUS", offset),
        OpCode::Not => simple_instruction("OP_NOT", offset),
        OpCode::Negate => simple_instruction("OP_NEGATE", offset),
        OpCode::Print => simple_instruction("OP_PRINT", offset),
        OpCode::Jump => jump_instruction("OP_JUMP", 1, chunk, offset),
        OpCode::JumpIfFalse => jump_instruction("OP_JUMP_IF_FALSE", 1, chunk, offset),
        OpCode::Loop => jump_instruction("OP_LOOP", -1, chunk, offset),
        OpCode::Call => byte_instruction("OP_CALL", chunk, offset),
        OpCode::Closure => closure_instruction(chunk, offset),
        OpCode::CloseUpvalue => simple_instruction("OP_CLOSE_UPVALUE", offset),
        OpCode::Return => simple_instruction("OP_RETURN", offset),
    }
}

fn simple_instruction(name: &str, offset: usize) -> usize {
    println!("{name}");
    offset + 1
}

fn byte_instruction(name: &str, chunk: &Chunk, offset: usize) -> usize {
    let slot = chunk.code[offset + 1];
    println!("{name:-16} {slot:4}");
    offset + 2
}

fn constant_instruction(name: &str, chunk: &Chunk, offset: usize) -> usize {
    let idx = chunk.code[offset + 1] as usize;
    println!("{name:-16} {idx:4} '{}'", chunk.constants[idx]);
    offset + 2
}

fn jump_instruction(name: &str, sign: i64, chunk: &Chunk, offset: usize) -> usize {
    let hi = chunk.code[offset + 1] as u16;
    let lo = chunk.code[offset + 2] as u16;
    let jump = ((hi << 8) | lo) as i64;
    let target = offset as i64 + 3 + sign * jump;
    println!("{name:-16} {offset:4} -> {target}");
    offset + 3
}

fn closure_instruction(chunk: &Chunk, offset: usize) -> usize {
    let mut offset = offset + 1;
    let const_idx = chunk.code[offset] as usize;
    offset += 1;
    println!("{:-16} {:4} '{}'", "OP_CLOSURE", const_idx, chunk.constants[const_idx]);

    if let Value::Obj(Obj::Function(function)) = &chunk.constants[const_idx] {
        for _ in 0..function.upvalue_count {
            let is_local = chunk.code[offset];
            let index = chunk.code[offset + 1];
            let kind = if is_local != 0 { "local" } else { "upvalue" };
            println!("{offset:04}      |                     {kind} {index}");
            offset += 2;
        }
    }
    offset
}
