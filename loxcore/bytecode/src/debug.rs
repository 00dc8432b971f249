//! Debug disassembler: offset, line, mnemonic, operand rendering
use std::fmt::Write;

use crate::{Chunk, Op, Value};

fn mnemonic(op: Op) -> &'static str {
    match op {
        Op::Const => "CONST",
        Op::Nil => "NIL",
        Op::True => "TRUE",
        Op::False => "FALSE",
        Op::Pop => "POP",
        Op::LoadLocal => "LOAD_LOCAL",
        Op::StoreLocal => "STORE_LOCAL",
        Op::LoadGlobal => "LOAD_GLOBAL",
        Op::DefineGlobal => "DEFINE_GLOBAL",
        Op::StoreGlobal => "STORE_GLOBAL",
        Op::LoadUpvalue => "LOAD_UPVALUE",
        Op::StoreUpvalue => "STORE_UPVALUE",
        Op::Eq => "EQ",
        Op::Gt => "GT",
        Op::Lt => "LT",
        Op::Add => "ADD",
        Op::Sub => "SUB",
        Op::Mul => "MUL",
        Op::Div => "DIV",
        Op::Not => "NOT",
        Op::Neg => "NEG",
        Op::Print => "PRINT",
        Op::Jump => "JUMP",
        Op::JumpIfFalse => "JUMP_IF_FALSE",
        Op::JumpBack => "JUMP_BACK",
        Op::Call => "CALL",
        Op::CallMethod => "CALL_METHOD",
        Op::CallSuper => "CALL_SUPER",
        Op::Closure => "CLOSURE",
        Op::CloseUpvalue => "CLOSE_UPVALUE",
        Op::Ret => "RET",
        Op::Class => "CLASS",
        Op::Inherit => "INHERIT",
        Op::Method => "METHOD",
        Op::GetProp => "GET_PROP",
        Op::SetProp => "SET_PROP",
        Op::GetSuper => "GET_SUPER",
    }
}

pub fn disassemble(chunk: &Chunk, name: &str) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "== {} ==", name);
    let mut offset = 0;
    while offset < chunk.code.len() {
        offset = disassemble_instruction(chunk, offset, &mut out);
    }
    out
}

fn byte_at(chunk: &Chunk, offset: usize) -> u8 {
    chunk.code.get(offset).copied().unwrap_or(0)
}

fn const_at(chunk: &Chunk, idx: u8) -> String {
    match chunk.consts.get(idx as usize) {
        Some(v) => format!("{}", v),
        None => "<bad const>".to_string(),
    }
}

pub fn disassemble_instruction(chunk: &Chunk, offset: usize, out: &mut String) -> usize {
    let _ = write!(out, "{:04} ", offset);
    if offset > 0 && chunk.lines[offset] == chunk.lines[offset - 1] {
        let _ = write!(out, "   | ");
    } else {
        let _ = write!(out, "{:4} ", chunk.lines[offset]);
    }

    let op = match Op::from_byte(byte_at(chunk, offset)) {
        Some(op) => op,
        None => {
            let _ = writeln!(out, "Unknown opcode {}", byte_at(chunk, offset));
            return offset + 1;
        }
    };

    match op {
        // No operands
        Op::Nil | Op::True | Op::False | Op::Pop
        | Op::Eq | Op::Gt | Op::Lt
        | Op::Add | Op::Sub | Op::Mul | Op::Div | Op::Not | Op::Neg
        | Op::Print | Op::CloseUpvalue | Op::Ret | Op::Inherit => {
            let _ = writeln!(out, "{}", mnemonic(op));
            offset + 1
        }

        // One byte: stack slot or argument count
        Op::LoadLocal | Op::StoreLocal | Op::LoadUpvalue | Op::StoreUpvalue | Op::Call => {
            let _ = writeln!(out, "{:<16} {:4}", mnemonic(op), byte_at(chunk, offset + 1));
            offset + 2
        }

        // One byte: constant index
        Op::Const | Op::LoadGlobal | Op::DefineGlobal | Op::StoreGlobal
        | Op::Class | Op::Method | Op::GetProp | Op::SetProp | Op::GetSuper => {
            let idx = byte_at(chunk, offset + 1);
            let _ = writeln!(out, "{:<16} {:4} '{}'", mnemonic(op), idx, const_at(chunk, idx));
            offset + 2
        }

        // Two bytes: big-endian jump delta (JumpBack goes backwards)
        Op::Jump | Op::JumpIfFalse | Op::JumpBack => {
            let delta = ((byte_at(chunk, offset + 1) as i32) << 8) | byte_at(chunk, offset + 2) as i32;
            let sign = if op == Op::JumpBack { -1 } else { 1 };
            let target = offset as i32 + 3 + sign * delta;
            let _ = writeln!(out, "{:<16} {:4} -> {}", mnemonic(op), offset, target);
            offset + 3
        }

        // Name constant + argument count
        Op::CallMethod | Op::CallSuper => {
            let idx = byte_at(chunk, offset + 1);
            let argc = byte_at(chunk, offset + 2);
            let _ = writeln!(out, "{:<16} ({} args) {:4} '{}'", mnemonic(op), argc, idx, const_at(chunk, idx));
            offset + 3
        }

        // Constant index, then (is_local, index) pairs for each upvalue
        Op::Closure => {
            let mut at = offset + 1;
            let idx = byte_at(chunk, at);
            at += 1;
            let _ = writeln!(out, "{:<16} {:4} {}", mnemonic(op), idx, const_at(chunk, idx));
            if let Some(Value::Func(func)) = chunk.consts.get(idx as usize) {
                for _ in 0..func.upvalue_count {
                    let is_local = byte_at(chunk, at);
                    let index = byte_at(chunk, at + 1);
                    let _ = writeln!(
                        out,
                        "{:04}      |                     {} {}",
                        at,
                        if is_local != 0 { "local" } else { "upvalue" },
                        index
                    );
                    at += 2;
                }
            }
            at
        }
    }
}
