mod common;

use std::rc::Rc;

use common::SharedOut;
use lox_bytecode::{Chunk, Function, Op, Value};
use lox_vm::VM;

// Runs a hand-assembled chunk, the way the compiler would have emitted it.
#[test]
fn hand_built_chunk_prints_and_returns() {
    let mut chunk = Chunk::default();
    let hello = chunk.add_const(Value::Str(Rc::from("Hello"))) as u8;
    chunk.push_op(Op::Const, 1);
    chunk.push_u8(hello, 1);
    chunk.push_op(Op::Print, 1);
    chunk.push_op(Op::Nil, 1);
    chunk.push_op(Op::Ret, 1);

    let script = Rc::new(Function { arity: 0, upvalue_count: 0, name: None, chunk });

    let out = SharedOut::default();
    let mut vm = VM::with_output(Box::new(out.clone()));
    vm.run(script).expect("vm run");
    assert_eq!(out.contents(), "Hello\n");
    assert_eq!(vm.stack_depth(), 0);
}

#[test]
fn arithmetic_over_constants() {
    let mut chunk = Chunk::default();
    let a = chunk.add_const(Value::Num(1.5)) as u8;
    let b = chunk.add_const(Value::Num(3.25)) as u8;
    chunk.push_op(Op::Const, 1);
    chunk.push_u8(a, 1);
    chunk.push_op(Op::Const, 1);
    chunk.push_u8(b, 1);
    chunk.push_op(Op::Add, 1);
    chunk.push_op(Op::Neg, 1);
    chunk.push_op(Op::Print, 1);
    chunk.push_op(Op::Nil, 1);
    chunk.push_op(Op::Ret, 1);

    let script = Rc::new(Function { arity: 0, upvalue_count: 0, name: None, chunk });

    let out = SharedOut::default();
    let mut vm = VM::with_output(Box::new(out.clone()));
    vm.run(script).expect("vm run");
    assert_eq!(out.contents(), "-4.75\n");
}

#[test]
fn malformed_chunk_is_an_error_not_a_panic() {
    // Truncated: Const with no operand byte.
    let mut chunk = Chunk::default();
    chunk.push_op(Op::Const, 1);
    let script = Rc::new(Function { arity: 0, upvalue_count: 0, name: None, chunk });
    let mut vm = VM::with_output(Box::new(SharedOut::default()));
    assert!(vm.run(script).is_err());

    // Unknown opcode byte.
    let mut chunk = Chunk::default();
    chunk.push_u8(0xfe, 1);
    let script = Rc::new(Function { arity: 0, upvalue_count: 0, name: None, chunk });
    let mut vm = VM::with_output(Box::new(SharedOut::default()));
    assert!(vm.run(script).is_err());
}
