/*

 ▄▄▄▄    ██▓    ▄▄▄       ▄████▄   ██ ▄█▀ ██▀███   █    ██   ██████  ██░ ██
▓█████▄ ▓██▒   ▒████▄    ▒██▀ ▀█   ██▄█▒ ▓██ ▒ ██▒ ██  ▓██▒▒██    ▒ ▓██░ ██▒
▒██▒ ▄██▒██░   ▒██  ▀█▄  ▒▓█    ▄ ▓███▄░ ▓██ ░▄█ ▒▓██  ▒██░░ ▓██▄   ▒██▀▀██░
▒██░█▀  ▒██░   ░██▄▄▄▄██ ▒▓▓▄ ▄██▒▓██ █▄ ▒██▀▀█▄  ▓▓█  ░██░  ▒   ██▒░▓█ ░██
░▓█  ▀█▓░██████▒▓█   ▓██▒▒ ▓███▀ ░▒██▒ █▄░██▓ ▒██▒▒▒█████▓ ▒██████▒▒░▓█▒░██▓
░▒▓███▀▒░ ▒░▓  ░▒▒   ▓▒█░░ ░▒ ▒  ░▒ ▒▒ ▓▒░ ▒▓ ░▒▓░░▒▓▒ ▒ ▒ ▒ ▒▓▒ ▒ ░ ▒ ░░▒░▒
▒░▒   ░ ░ ░ ▒  ░ ▒   ▒▒ ░  ░  ▒   ░ ░▒ ▒░  ░▒ ░ ▒░░░▒░ ░ ░ ░ ░▒  ░ ░ ▒ ░▒░ ░
 ░    ░   ░ ░    ░   ▒   ░        ░ ░░ ░   ░░   ░  ░░░ ░ ░ ░  ░  ░   ░  ░░ ░
 ░          ░  ░     ░  ░░ ░      ░  ░      ░        ░           ░   ░  ░  ░
      ░                  ░
Copyright (C) 2026, Blackrush LLC, All Rights Reserved
Created by Erik Olson, Tarpon Springs, Florida
For more information, visit BlackrushDrive.com

MIT License

Copyright (c) 2026 Erik Lee Olson for Blackrush, LLC

Permission is hereby granted, free of charge, to any person obtaining a copy
of this software and associated documentation files (the "Software"), to deal
in the Software without restriction, including without limitation the rights
to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
copies of the Software, and to permit persons to whom the Software is
furnished to do so, subject to the following conditions:

The above copyright notice and this permission notice shall be included in all
copies or substantial portions of the Software.

THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
SOFTWARE.

*/

//! Frame-based VM with calls, closures, upvalue capture, classes, globals
use std::cell::RefCell;
use std::collections::HashMap;
use std::io::{self, Write};
use std::rc::Rc;
use std::time::Instant;

use once_cell::sync::Lazy;

use lox_common::{LoxError, Result};
use lox_bytecode::{
    BoundMethod, Class, Closure, Function, Instance, NativeFunction, Op, Upvalue, Value,
};

pub const FRAMES_MAX: usize = 64;
pub const STACK_MAX: usize = FRAMES_MAX * 256;

static START: Lazy<Instant> = Lazy::new(Instant::now);

fn clock_native(_args: &[Value]) -> Value {
    Value::Num(START.elapsed().as_secs_f64())
}

struct Frame {
    closure: Rc<Closure>,
    ip: usize,
    base: usize,
}

pub struct VM {
    frames: Vec<Frame>,
    stack: Vec<Value>,
    globals: HashMap<String, Value>,
    open_upvalues: Vec<Rc<RefCell<Upvalue>>>, // sorted by descending stack slot
    out: Box<dyn Write>,
}

impl Default for VM {
    fn default() -> Self {
        Self::new()
    }
}

impl VM {
    pub fn new() -> Self {
        Self::with_output(Box::new(io::stdout()))
    }

    /// `out` receives `print` output; diagnostics always go to stderr.
    pub fn with_output(out: Box<dyn Write>) -> Self {
        let mut vm = Self {
            frames: Vec::with_capacity(FRAMES_MAX),
            // Reserved up front so stack slots stay put for the whole run.
            stack: Vec::with_capacity(STACK_MAX),
            globals: HashMap::new(),
            open_upvalues: Vec::new(),
            out,
        };
        Lazy::force(&START); // anchor clock's epoch now, not at first call
        vm.define_native("clock", clock_native);
        vm
    }

    fn define_native(&mut self, name: &str, function: fn(&[Value]) -> Value) {
        let native = NativeFunction { name: name.to_string(), function };
        self.globals.insert(name.to_string(), Value::Native(Rc::new(native)));
    }

    pub fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    /// Runs a compiled script to completion or to the first runtime error.
    /// On error the message and a stack trace have been written to stderr
    /// and the VM is reset; globals survive for the next run.
    pub fn run(&mut self, function: Rc<Function>) -> Result<()> {
        let closure = Rc::new(Closure { function, upvalues: Vec::new() });
        self.push(Value::Closure(Rc::clone(&closure)));
        let result = self.call(closure, 0).and_then(|_| self.execute());
        if let Err(e) = &result {
            self.report_runtime_error(&e.0);
        }
        let _ = self.out.flush();
        result
    }

    fn report_runtime_error(&mut self, msg: &str) {
        eprintln!("{}", msg);
        // Most-recent frame first; ip already points past the failing
        // instruction, so ip - 1 lands inside it.
        for frame in self.frames.iter().rev() {
            let function = &frame.closure.function;
            let line = function.chunk.line_of(frame.ip.saturating_sub(1));
            match &function.name {
                Some(n) => eprintln!("[line {}] in {}()", line, n),
                None => eprintln!("[line {}] in script", line),
            }
        }
        self.reset();
    }

    fn reset(&mut self) {
        self.stack.clear();
        self.frames.clear();
        self.open_upvalues.clear();
    }

    // --- decode ---

    fn cur(&mut self) -> &mut Frame {
        self.frames.last_mut().expect("no frame")
    }

    fn read_u8(&mut self) -> Result<u8> {
        let f = self.cur();
        let b = *f.closure.function.chunk.code.get(f.ip)
            .ok_or_else(|| LoxError("ip out of range".into()))?;
        f.ip += 1;
        Ok(b)
    }

    fn read_op(&mut self) -> Result<Op> {
        let b = self.read_u8()?;
        Op::from_byte(b).ok_or_else(|| LoxError(format!("bad opcode {}", b)))
    }

    fn read_u16(&mut self) -> Result<u16> {
        let hi = self.read_u8()? as u16;
        let lo = self.read_u8()? as u16;
        Ok((hi << 8) | lo)
    }

    fn read_constant(&mut self) -> Result<Value> {
        let idx = self.read_u8()? as usize;
        let f = self.frames.last().expect("no frame");
        f.closure.function.chunk.consts.get(idx).cloned()
            .ok_or_else(|| LoxError("bad constant index".into()))
    }

    fn read_string(&mut self) -> Result<Rc<str>> {
        match self.read_constant()? {
            Value::Str(s) => Ok(s),
            _ => Err(LoxError("constant is not a string".into())),
        }
    }

    // --- stack ---

    fn push(&mut self, v: Value) {
        self.stack.push(v);
    }

    fn pop(&mut self) -> Result<Value> {
        self.stack.pop().ok_or_else(|| LoxError("stack underflow".into()))
    }

    fn peek(&self, distance: usize) -> Result<Value> {
        self.stack.len().checked_sub(1 + distance)
            .and_then(|i| self.stack.get(i))
            .cloned()
            .ok_or_else(|| LoxError("stack underflow".into()))
    }

    fn bin_num<F: Fn(f64, f64) -> f64>(&mut self, f: F) -> Result<()> {
        let b = self.pop()?;
        let a = self.pop()?;
        match (a, b) {
            (Value::Num(a), Value::Num(b)) => { self.push(Value::Num(f(a, b))); Ok(()) }
            _ => Err(LoxError("Operands must be numbers.".into())),
        }
    }

    fn bin_num_cmp<F: Fn(f64, f64) -> bool>(&mut self, f: F) -> Result<()> {
        let b = self.pop()?;
        let a = self.pop()?;
        match (a, b) {
            (Value::Num(a), Value::Num(b)) => { self.push(Value::Bool(f(a, b))); Ok(()) }
            _ => Err(LoxError("Operands must be numbers.".into())),
        }
    }

    // --- execution ---

    fn execute(&mut self) -> Result<()> {
        loop {
            let op = self.read_op()?;
            match op {
                Op::Const => {
                    let v = self.read_constant()?;
                    self.push(v);
                }
                Op::Nil => self.push(Value::Nil),
                Op::True => self.push(Value::Bool(true)),
                Op::False => self.push(Value::Bool(false)),
                Op::Pop => { self.pop()?; }

                Op::LoadLocal => {
                    let slot = self.read_u8()? as usize;
                    let base = self.cur().base;
                    let v = self.stack.get(base + slot).cloned()
                        .ok_or_else(|| LoxError("bad local slot".into()))?;
                    self.push(v);
                }
                Op::StoreLocal => {
                    // No pop: assignment is an expression.
                    let slot = self.read_u8()? as usize;
                    let base = self.cur().base;
                    let v = self.peek(0)?;
                    match self.stack.get_mut(base + slot) {
                        Some(s) => *s = v,
                        None => return Err(LoxError("bad local slot".into())),
                    }
                }
                Op::LoadGlobal => {
                    let name = self.read_string()?;
                    match self.globals.get(name.as_ref()).cloned() {
                        Some(v) => self.push(v),
                        None => return Err(LoxError(format!("Undefined variable '{}'.", name))),
                    }
                }
                Op::DefineGlobal => {
                    let name = self.read_string()?;
                    let v = self.peek(0)?;
                    self.globals.insert(name.to_string(), v);
                    self.pop()?;
                }
                Op::StoreGlobal => {
                    let name = self.read_string()?;
                    if !self.globals.contains_key(name.as_ref()) {
                        return Err(LoxError(format!("Undefined variable '{}'.", name)));
                    }
                    let v = self.peek(0)?;
                    self.globals.insert(name.to_string(), v);
                }
                Op::LoadUpvalue => {
                    let slot = self.read_u8()? as usize;
                    let cell = {
                        let f = self.frames.last().expect("no frame");
                        Rc::clone(f.closure.upvalues.get(slot)
                            .ok_or_else(|| LoxError("bad upvalue slot".into()))?)
                    };
                    let v = match &*cell.borrow() {
                        Upvalue::Open(i) => self.stack.get(*i).cloned()
                            .ok_or_else(|| LoxError("bad upvalue target".into()))?,
                        Upvalue::Closed(v) => v.clone(),
                    };
                    self.push(v);
                }
                Op::StoreUpvalue => {
                    let slot = self.read_u8()? as usize;
                    let v = self.peek(0)?;
                    let cell = {
                        let f = self.frames.last().expect("no frame");
                        Rc::clone(f.closure.upvalues.get(slot)
                            .ok_or_else(|| LoxError("bad upvalue slot".into()))?)
                    };
                    let open_slot = match &*cell.borrow() {
                        Upvalue::Open(i) => Some(*i),
                        Upvalue::Closed(_) => None,
                    };
                    match open_slot {
                        Some(i) => match self.stack.get_mut(i) {
                            Some(s) => *s = v,
                            None => return Err(LoxError("bad upvalue target".into())),
                        },
                        None => *cell.borrow_mut() = Upvalue::Closed(v),
                    }
                }

                Op::GetProp => {
                    let name = self.read_string()?;
                    let instance = match self.peek(0)? {
                        Value::Instance(i) => i,
                        _ => return Err(LoxError("Only instances have properties.".into())),
                    };
                    let field = instance.fields.borrow().get(name.as_ref()).cloned();
                    match field {
                        Some(v) => {
                            self.pop()?; // instance
                            self.push(v);
                        }
                        None => {
                            let class = Rc::clone(&instance.class);
                            self.bind_method(&class, &name)?;
                        }
                    }
                }
                Op::SetProp => {
                    let name = self.read_string()?;
                    let instance = match self.peek(1)? {
                        Value::Instance(i) => i,
                        _ => return Err(LoxError("Only instances have fields.".into())),
                    };
                    let v = self.peek(0)?;
                    instance.fields.borrow_mut().insert(name.to_string(), v.clone());
                    self.pop()?; // value
                    self.pop()?; // instance
                    self.push(v);
                }
                Op::GetSuper => {
                    let name = self.read_string()?;
                    let superclass = match self.pop()? {
                        Value::Class(c) => c,
                        _ => return Err(LoxError("superclass expected".into())),
                    };
                    self.bind_method(&superclass, &name)?;
                }

                Op::Eq => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.push(Value::Bool(a == b));
                }
                Op::Gt => self.bin_num_cmp(|a, b| a > b)?,
                Op::Lt => self.bin_num_cmp(|a, b| a < b)?,

                Op::Add => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    match (&a, &b) {
                        (Value::Num(a), Value::Num(b)) => self.push(Value::Num(a + b)),
                        (Value::Str(a), Value::Str(b)) => {
                            let mut s = String::with_capacity(a.len() + b.len());
                            s.push_str(a);
                            s.push_str(b);
                            self.push(Value::Str(Rc::from(s)));
                        }
                        _ => return Err(LoxError("Operands must be two numbers or two strings.".into())),
                    }
                }
                Op::Sub => self.bin_num(|a, b| a - b)?,
                Op::Mul => self.bin_num(|a, b| a * b)?,
                Op::Div => self.bin_num(|a, b| a / b)?,
                Op::Not => {
                    let v = self.pop()?;
                    self.push(Value::Bool(v.is_falsy()));
                }
                Op::Neg => {
                    match self.pop()? {
                        Value::Num(n) => self.push(Value::Num(-n)),
                        _ => return Err(LoxError("Operand must be a number.".into())),
                    }
                }

                Op::Print => {
                    let v = self.pop()?;
                    let _ = writeln!(self.out, "{}", v);
                }

                Op::Jump => {
                    let off = self.read_u16()? as usize;
                    self.cur().ip += off;
                }
                Op::JumpIfFalse => {
                    // Leaves the condition; the compiler pops both branches.
                    let off = self.read_u16()? as usize;
                    if self.peek(0)?.is_falsy() {
                        self.cur().ip += off;
                    }
                }
                Op::JumpBack => {
                    let off = self.read_u16()? as usize;
                    let f = self.cur();
                    f.ip = f.ip.checked_sub(off)
                        .ok_or_else(|| LoxError("bad loop target".into()))?;
                }

                Op::Call => {
                    let argc = self.read_u8()? as usize;
                    let callee = self.peek(argc)?;
                    self.call_value(callee, argc)?;
                }
                Op::CallMethod => {
                    let name = self.read_string()?;
                    let argc = self.read_u8()? as usize;
                    let instance = match self.peek(argc)? {
                        Value::Instance(i) => i,
                        _ => return Err(LoxError("Only instances have methods.".into())),
                    };
                    // A field shadows a method of the same name.
                    let field = instance.fields.borrow().get(name.as_ref()).cloned();
                    match field {
                        Some(v) => {
                            let slot = self.stack.len() - argc - 1;
                            self.stack[slot] = v.clone();
                            self.call_value(v, argc)?;
                        }
                        None => {
                            let class = Rc::clone(&instance.class);
                            self.invoke_from_class(&class, &name, argc)?;
                        }
                    }
                }
                Op::CallSuper => {
                    let name = self.read_string()?;
                    let argc = self.read_u8()? as usize;
                    let superclass = match self.pop()? {
                        Value::Class(c) => c,
                        _ => return Err(LoxError("superclass expected".into())),
                    };
                    self.invoke_from_class(&superclass, &name, argc)?;
                }

                Op::Closure => {
                    let function = match self.read_constant()? {
                        Value::Func(f) => f,
                        _ => return Err(LoxError("closure operand is not a function".into())),
                    };
                    let mut upvalues = Vec::with_capacity(function.upvalue_count);
                    for _ in 0..function.upvalue_count {
                        let is_local = self.read_u8()? != 0;
                        let index = self.read_u8()? as usize;
                        let cell = if is_local {
                            let base = self.cur().base;
                            self.capture_upvalue(base + index)
                        } else {
                            let f = self.frames.last().expect("no frame");
                            Rc::clone(f.closure.upvalues.get(index)
                                .ok_or_else(|| LoxError("bad upvalue index".into()))?)
                        };
                        upvalues.push(cell);
                    }
                    self.push(Value::Closure(Rc::new(Closure { function, upvalues })));
                }
                Op::CloseUpvalue => {
                    let top = self.stack.len().checked_sub(1)
                        .ok_or_else(|| LoxError("stack underflow".into()))?;
                    self.close_upvalues(top);
                    self.pop()?;
                }

                Op::Ret => {
                    let result = self.pop()?;
                    let frame = self.frames.pop()
                        .ok_or_else(|| LoxError("return with no frame".into()))?;
                    self.close_upvalues(frame.base);
                    if self.frames.is_empty() {
                        self.pop()?; // the script closure
                        return Ok(());
                    }
                    self.stack.truncate(frame.base);
                    self.push(result);
                }

                Op::Class => {
                    let name = self.read_string()?;
                    self.push(Value::Class(Rc::new(Class {
                        name: name.to_string(),
                        methods: RefCell::new(HashMap::new()),
                    })));
                }
                Op::Inherit => {
                    // Snapshot copy: later changes to the superclass's table
                    // are not observed by the subclass.
                    let superclass = match self.peek(1)? {
                        Value::Class(c) => c,
                        _ => return Err(LoxError("Superclass must be a class.".into())),
                    };
                    let subclass = match self.peek(0)? {
                        Value::Class(c) => c,
                        _ => return Err(LoxError("subclass expected".into())),
                    };
                    {
                        let from = superclass.methods.borrow();
                        let mut to = subclass.methods.borrow_mut();
                        for (k, v) in from.iter() {
                            to.insert(k.clone(), Rc::clone(v));
                        }
                    }
                    self.pop()?; // subclass
                }
                Op::Method => {
                    let name = self.read_string()?;
                    let method = match self.peek(0)? {
                        Value::Closure(c) => c,
                        _ => return Err(LoxError("method is not a closure".into())),
                    };
                    let class = match self.peek(1)? {
                        Value::Class(c) => c,
                        _ => return Err(LoxError("method outside class".into())),
                    };
                    class.methods.borrow_mut().insert(name.to_string(), method);
                    self.pop()?; // closure
                }
            }
        }
    }

    // --- calls ---

    fn call_value(&mut self, callee: Value, argc: usize) -> Result<()> {
        match callee {
            Value::Closure(c) => self.call(c, argc),
            Value::Native(n) => {
                let from = self.stack.len().checked_sub(argc)
                    .ok_or_else(|| LoxError("stack underflow".into()))?;
                let result = (n.function)(&self.stack[from..]);
                self.stack.truncate(from - 1); // args and callee
                self.push(result);
                Ok(())
            }
            Value::Class(class) => {
                // The fresh instance takes the callee slot: it is `this`.
                let slot = self.stack.len() - argc - 1;
                self.stack[slot] = Value::Instance(Rc::new(Instance {
                    class: Rc::clone(&class),
                    fields: RefCell::new(HashMap::new()),
                }));
                let init = class.methods.borrow().get("init").cloned();
                match init {
                    Some(init) => self.call(init, argc),
                    None if argc != 0 => {
                        Err(LoxError(format!("Expected 0 arguments but got {}.", argc)))
                    }
                    None => Ok(()),
                }
            }
            Value::Bound(b) => {
                let slot = self.stack.len() - argc - 1;
                self.stack[slot] = b.receiver.clone();
                self.call(Rc::clone(&b.method), argc)
            }
            _ => Err(LoxError("Can only call functions and classes.".into())),
        }
    }

    fn call(&mut self, closure: Rc<Closure>, argc: usize) -> Result<()> {
        if argc != closure.function.arity as usize {
            return Err(LoxError(format!(
                "Expected {} arguments but got {}.",
                closure.function.arity, argc
            )));
        }
        if self.frames.len() == FRAMES_MAX {
            return Err(LoxError("Stack overflow.".into()));
        }
        let base = self.stack.len() - argc - 1;
        self.frames.push(Frame { closure, ip: 0, base });
        Ok(())
    }

    fn invoke_from_class(&mut self, class: &Rc<Class>, name: &str, argc: usize) -> Result<()> {
        let method = class.methods.borrow().get(name).cloned()
            .ok_or_else(|| LoxError(format!("Undefined property '{}'.", name)))?;
        self.call(method, argc)
    }

    fn bind_method(&mut self, class: &Rc<Class>, name: &str) -> Result<()> {
        let method = class.methods.borrow().get(name).cloned()
            .ok_or_else(|| LoxError(format!("Undefined property '{}'.", name)))?;
        let receiver = self.pop()?;
        self.push(Value::Bound(Rc::new(BoundMethod { receiver, method })));
        Ok(())
    }

    // --- upvalues ---

    // Reuses an existing open cell for the slot so sibling closures share
    // one variable; otherwise inserts keeping descending slot order.
    fn capture_upvalue(&mut self, slot: usize) -> Rc<RefCell<Upvalue>> {
        let mut i = 0;
        while i < self.open_upvalues.len() {
            let s = match &*self.open_upvalues[i].borrow() {
                Upvalue::Open(s) => *s,
                Upvalue::Closed(_) => break,
            };
            if s == slot {
                return Rc::clone(&self.open_upvalues[i]);
            }
            if s < slot {
                break;
            }
            i += 1;
        }
        let cell = Rc::new(RefCell::new(Upvalue::Open(slot)));
        self.open_upvalues.insert(i, Rc::clone(&cell));
        cell
    }

    // Closes every open upvalue at slot >= from, walking from the head of
    // the descending-ordered list.
    fn close_upvalues(&mut self, from: usize) {
        loop {
            let slot = match self.open_upvalues.first() {
                Some(cell) => match &*cell.borrow() {
                    Upvalue::Open(s) if *s >= from => *s,
                    _ => break,
                },
                None => break,
            };
            let v = self.stack.get(slot).cloned().unwrap_or(Value::Nil);
            let cell = self.open_upvalues.remove(0);
            *cell.borrow_mut() = Upvalue::Closed(v);
        }
    }
}
