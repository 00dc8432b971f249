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

//! Single-pass Pratt compiler: drives the scanner and emits bytecode
//! directly, resolving locals, upvalues and globals during parsing.
use std::env;
use std::rc::Rc;

use lox_common::{LoxError, Result};
use lox_lexer::{Scanner, Token, TokenType};
use lox_bytecode::{debug, Chunk, Function, Op, Value};

/// Compiles a source string to the top-level script function. Diagnostics go
/// to stderr as they are raised; the result is Err if any were.
pub fn compile(source: &str) -> Result<Rc<Function>> {
    let mut p = Parser::new(source);
    p.advance();
    while !p.match_k(TokenType::Eof) {
        p.declaration();
    }
    let (function, _) = p.end_compiler();
    if p.had_error {
        Err(LoxError("compile error".into()))
    } else {
        Ok(Rc::new(function))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Prec {
    None,
    Assignment,
    Or,
    And,
    Equality,
    Comparison,
    Term,
    Factor,
    Unary,
    Call,
    Primary,
}

impl Prec {
    fn next(self) -> Prec {
        match self {
            Prec::None => Prec::Assignment,
            Prec::Assignment => Prec::Or,
            Prec::Or => Prec::And,
            Prec::And => Prec::Equality,
            Prec::Equality => Prec::Comparison,
            Prec::Comparison => Prec::Term,
            Prec::Term => Prec::Factor,
            Prec::Factor => Prec::Unary,
            Prec::Unary => Prec::Call,
            Prec::Call | Prec::Primary => Prec::Primary,
        }
    }
}

fn infix_precedence(kind: TokenType) -> Prec {
    match kind {
        TokenType::LParen | TokenType::Dot => Prec::Call,
        TokenType::Star | TokenType::Slash => Prec::Factor,
        TokenType::Plus | TokenType::Minus => Prec::Term,
        TokenType::Lt | TokenType::LtEq | TokenType::Gt | TokenType::GtEq => Prec::Comparison,
        TokenType::EqEq | TokenType::BangEq => Prec::Equality,
        TokenType::And => Prec::And,
        TokenType::Or => Prec::Or,
        _ => Prec::None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FunctionKind {
    Script,
    Function,
    Method,
    Initializer,
}

struct Local {
    name: String,
    depth: i32, // -1 until the initializer has run
    is_captured: bool,
}

#[derive(Clone, Copy)]
struct UpvalueRef {
    index: u8,
    is_local: bool,
}

/// One compile context per enclosing function; slot 0 is reserved for the
/// callee (or `this` in methods).
struct Compiler {
    kind: FunctionKind,
    function: Function,
    locals: Vec<Local>,
    upvalues: Vec<UpvalueRef>,
    scope_depth: i32,
}

const LOCALS_MAX: usize = 256;
const UPVALUES_MAX: usize = 256;

impl Compiler {
    fn new(kind: FunctionKind, name: Option<String>) -> Self {
        let slot0 = match kind {
            FunctionKind::Method | FunctionKind::Initializer => "this",
            _ => "",
        };
        Self {
            kind,
            function: Function { arity: 0, upvalue_count: 0, name, chunk: Chunk::default() },
            locals: vec![Local { name: slot0.to_string(), depth: 0, is_captured: false }],
            upvalues: Vec::new(),
            scope_depth: 0,
        }
    }
}

struct ClassCompiler {
    has_superclass: bool,
}

struct Parser<'a> {
    scanner: Scanner<'a>,
    previous: Token<'a>,
    current: Token<'a>,
    compilers: Vec<Compiler>,
    classes: Vec<ClassCompiler>,
    had_error: bool,
    panic_mode: bool,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str) -> Self {
        let eof = Token { kind: TokenType::Eof, lexeme: "", line: 1 };
        Self {
            scanner: Scanner::new(source),
            previous: eof,
            current: eof,
            compilers: vec![Compiler::new(FunctionKind::Script, None)],
            classes: Vec::new(),
            had_error: false,
            panic_mode: false,
        }
    }

    // --- token plumbing ---

    fn advance(&mut self) {
        self.previous = self.current;
        loop {
            self.current = self.scanner.scan_token();
            if self.current.kind != TokenType::Error { break; }
            let msg = self.current.lexeme;
            self.error_at_current(msg);
        }
    }

    fn consume(&mut self, kind: TokenType, msg: &str) {
        if self.current.kind == kind {
            self.advance();
        } else {
            self.error_at_current(msg);
        }
    }

    fn check(&self, kind: TokenType) -> bool {
        self.current.kind == kind
    }

    fn match_k(&mut self, kind: TokenType) -> bool {
        if !self.check(kind) { return false; }
        self.advance();
        true
    }

    // --- diagnostics ---

    fn error_at_current(&mut self, msg: &str) {
        let t = self.current;
        self.error_at(t, msg);
    }

    fn error(&mut self, msg: &str) {
        let t = self.previous;
        self.error_at(t, msg);
    }

    fn error_at(&mut self, token: Token<'a>, msg: &str) {
        // First error per statement wins; panic mode silences the rest.
        if self.panic_mode { return; }
        self.panic_mode = true;
        self.had_error = true;
        match token.kind {
            TokenType::Eof => eprintln!("[line {}] Error at end: {}", token.line, msg),
            TokenType::Error => eprintln!("[line {}] Error: {}", token.line, msg),
            _ => eprintln!("[line {}] Error at '{}': {}", token.line, token.lexeme, msg),
        }
    }

    fn synchronize(&mut self) {
        self.panic_mode = false;
        while self.current.kind != TokenType::Eof {
            if self.previous.kind == TokenType::Semicolon { return; }
            match self.current.kind {
                TokenType::Class | TokenType::Fun | TokenType::Var | TokenType::For
                | TokenType::If | TokenType::While | TokenType::Print | TokenType::Return => return,
                _ => {}
            }
            self.advance();
        }
    }

    // --- emission ---

    fn ctx(&mut self) -> &mut Compiler {
        self.compilers.last_mut().expect("no compiler")
    }

    fn ctx_ref(&self) -> &Compiler {
        self.compilers.last().expect("no compiler")
    }

    fn chunk(&mut self) -> &mut Chunk {
        &mut self.ctx().function.chunk
    }

    fn emit_op(&mut self, op: Op) {
        let line = self.previous.line;
        self.chunk().push_op(op, line);
    }

    fn emit_u8(&mut self, b: u8) {
        let line = self.previous.line;
        self.chunk().push_u8(b, line);
    }

    fn emit_pair(&mut self, op: Op, b: u8) {
        self.emit_op(op);
        self.emit_u8(b);
    }

    fn emit_return(&mut self) {
        // An initializer implicitly returns its receiver from slot 0.
        if self.ctx_ref().kind == FunctionKind::Initializer {
            self.emit_pair(Op::LoadLocal, 0);
        } else {
            self.emit_op(Op::Nil);
        }
        self.emit_op(Op::Ret);
    }

    fn emit_jump(&mut self, op: Op) -> usize {
        self.emit_op(op);
        self.emit_u8(0xff);
        self.emit_u8(0xff);
        self.chunk().here() - 2
    }

    fn patch_jump(&mut self, at: usize) {
        // -2 accounts for the operand bytes themselves.
        let jump = self.chunk().here() - at - 2;
        if jump > u16::MAX as usize {
            self.error("Too much code to jump over.");
        }
        self.chunk().patch_u16_at(at, jump as u16);
    }

    fn emit_loop(&mut self, start: usize) {
        self.emit_op(Op::JumpBack);
        let offset = self.chunk().here() - start + 2;
        if offset > u16::MAX as usize {
            self.error("Loop body too large.");
        }
        self.emit_u8(((offset >> 8) & 0xff) as u8);
        self.emit_u8((offset & 0xff) as u8);
    }

    fn make_constant(&mut self, v: Value) -> u8 {
        let idx = self.chunk().add_const(v);
        if idx > u8::MAX as usize {
            self.error("Too many constants in one chunk.");
            return 0;
        }
        idx as u8
    }

    fn emit_constant(&mut self, v: Value) {
        let c = self.make_constant(v);
        self.emit_pair(Op::Const, c);
    }

    fn identifier_constant(&mut self, name: &str) -> u8 {
        self.make_constant(Value::Str(Rc::from(name)))
    }

    fn end_compiler(&mut self) -> (Function, Vec<UpvalueRef>) {
        self.emit_return();
        let ctx = self.compilers.pop().expect("no compiler");
        if !self.had_error && env::var("LOX_DEBUG").ok().as_deref() == Some("1") {
            let name = ctx.function.name.clone().unwrap_or_else(|| "<script>".to_string());
            eprint!("{}", debug::disassemble(&ctx.function.chunk, &name));
        }
        (ctx.function, ctx.upvalues)
    }

    // --- scopes, locals, upvalues ---

    fn begin_scope(&mut self) {
        self.ctx().scope_depth += 1;
    }

    fn end_scope(&mut self) {
        self.ctx().scope_depth -= 1;
        loop {
            let (pop_one, captured) = {
                let ctx = self.ctx_ref();
                match ctx.locals.last() {
                    Some(l) if l.depth > ctx.scope_depth => (true, l.is_captured),
                    _ => (false, false),
                }
            };
            if !pop_one { break; }
            if captured {
                self.emit_op(Op::CloseUpvalue);
            } else {
                self.emit_op(Op::Pop);
            }
            self.ctx().locals.pop();
        }
    }

    fn add_local(&mut self, name: &str) {
        if self.ctx_ref().locals.len() == LOCALS_MAX {
            self.error("Too many local variables in function.");
            return;
        }
        self.ctx().locals.push(Local { name: name.to_string(), depth: -1, is_captured: false });
    }

    fn declare_variable(&mut self) {
        if self.ctx_ref().scope_depth == 0 { return; }
        let name = self.previous.lexeme;
        let mut clash = false;
        {
            let ctx = self.ctx_ref();
            for l in ctx.locals.iter().rev() {
                if l.depth != -1 && l.depth < ctx.scope_depth { break; }
                if l.name == name { clash = true; break; }
            }
        }
        if clash {
            self.error("Already a variable with this name in this scope.");
        }
        self.add_local(name);
    }

    fn mark_initialized(&mut self) {
        let ctx = self.ctx();
        if ctx.scope_depth == 0 { return; }
        let depth = ctx.scope_depth;
        if let Some(l) = ctx.locals.last_mut() { l.depth = depth; }
    }

    fn parse_variable(&mut self, msg: &str) -> u8 {
        self.consume(TokenType::Ident, msg);
        self.declare_variable();
        if self.ctx_ref().scope_depth > 0 { return 0; }
        let name = self.previous.lexeme;
        self.identifier_constant(name)
    }

    fn define_variable(&mut self, global: u8) {
        if self.ctx_ref().scope_depth > 0 {
            self.mark_initialized();
            return;
        }
        self.emit_pair(Op::DefineGlobal, global);
    }

    // Newest local wins; depth -1 means the name is visible but not yet
    // initialized.
    fn resolve_local(&mut self, ci: usize, name: &str) -> Option<u8> {
        let mut found = None;
        let mut uninit = false;
        for (i, l) in self.compilers[ci].locals.iter().enumerate().rev() {
            if l.name == name {
                if l.depth == -1 { uninit = true; }
                found = Some(i as u8);
                break;
            }
        }
        if uninit {
            self.error("Can't read local variable in its own initializer.");
        }
        found
    }

    fn add_upvalue(&mut self, ci: usize, index: u8, is_local: bool) -> u8 {
        for (i, uv) in self.compilers[ci].upvalues.iter().enumerate() {
            if uv.index == index && uv.is_local == is_local {
                return i as u8;
            }
        }
        if self.compilers[ci].upvalues.len() == UPVALUES_MAX {
            self.error("Too many closure variables in function.");
            return 0;
        }
        let ctx = &mut self.compilers[ci];
        ctx.upvalues.push(UpvalueRef { index, is_local });
        ctx.function.upvalue_count = ctx.upvalues.len();
        (ctx.upvalues.len() - 1) as u8
    }

    fn resolve_upvalue(&mut self, ci: usize, name: &str) -> Option<u8> {
        if ci == 0 { return None; }
        let enclosing = ci - 1;
        if let Some(local) = self.resolve_local(enclosing, name) {
            self.compilers[enclosing].locals[local as usize].is_captured = true;
            return Some(self.add_upvalue(ci, local, true));
        }
        if let Some(up) = self.resolve_upvalue(enclosing, name) {
            return Some(self.add_upvalue(ci, up, false));
        }
        None
    }

    fn named_variable(&mut self, name: &str, can_assign: bool) {
        let top = self.compilers.len() - 1;
        let (get, set, arg) = if let Some(slot) = self.resolve_local(top, name) {
            (Op::LoadLocal, Op::StoreLocal, slot)
        } else if let Some(slot) = self.resolve_upvalue(top, name) {
            (Op::LoadUpvalue, Op::StoreUpvalue, slot)
        } else {
            let c = self.identifier_constant(name);
            (Op::LoadGlobal, Op::StoreGlobal, c)
        };
        if can_assign && self.match_k(TokenType::Assign) {
            self.expression();
            self.emit_pair(set, arg);
        } else {
            self.emit_pair(get, arg);
        }
    }

    // --- Pratt core ---

    fn parse_precedence(&mut self, prec: Prec) {
        self.advance();
        let can_assign = prec <= Prec::Assignment;
        let kind = self.previous.kind;
        if !self.prefix_rule(kind, can_assign) {
            self.error("Expect expression.");
            return;
        }
        while prec <= infix_precedence(self.current.kind) {
            self.advance();
            let kind = self.previous.kind;
            self.infix_rule(kind, can_assign);
        }
        if can_assign && self.match_k(TokenType::Assign) {
            self.error("Invalid assignment target.");
            self.expression();
        }
    }

    fn prefix_rule(&mut self, kind: TokenType, can_assign: bool) -> bool {
        match kind {
            TokenType::LParen => self.grouping(),
            TokenType::Minus | TokenType::Bang => self.unary(),
            TokenType::Number => self.number(),
            TokenType::Str => self.string(),
            TokenType::Ident => self.variable(can_assign),
            TokenType::True | TokenType::False | TokenType::Nil => self.literal(),
            TokenType::This => self.this_(),
            TokenType::Super => self.super_(),
            _ => return false,
        }
        true
    }

    fn infix_rule(&mut self, kind: TokenType, can_assign: bool) {
        match kind {
            TokenType::LParen => self.call(),
            TokenType::Dot => self.dot(can_assign),
            TokenType::And => self.and_(),
            TokenType::Or => self.or_(),
            _ => self.binary(),
        }
    }

    fn expression(&mut self) {
        self.parse_precedence(Prec::Assignment);
    }

    // --- expression rules ---

    fn number(&mut self) {
        let v: f64 = self.previous.lexeme.parse().unwrap_or_default();
        self.emit_constant(Value::Num(v));
    }

    fn string(&mut self) {
        let lex = self.previous.lexeme;
        self.emit_constant(Value::Str(Rc::from(&lex[1..lex.len() - 1])));
    }

    fn literal(&mut self) {
        match self.previous.kind {
            TokenType::True => self.emit_op(Op::True),
            TokenType::False => self.emit_op(Op::False),
            TokenType::Nil => self.emit_op(Op::Nil),
            _ => {}
        }
    }

    fn grouping(&mut self) {
        self.expression();
        self.consume(TokenType::RParen, "Expect ')' after expression.");
    }

    fn unary(&mut self) {
        let op = self.previous.kind;
        self.parse_precedence(Prec::Unary);
        match op {
            TokenType::Bang => self.emit_op(Op::Not),
            TokenType::Minus => self.emit_op(Op::Neg),
            _ => {}
        }
    }

    fn binary(&mut self) {
        let op = self.previous.kind;
        // One level higher for the right operand keeps binaries left-assoc.
        self.parse_precedence(infix_precedence(op).next());
        match op {
            TokenType::BangEq => { self.emit_op(Op::Eq); self.emit_op(Op::Not); }
            TokenType::EqEq => self.emit_op(Op::Eq),
            TokenType::Gt => self.emit_op(Op::Gt),
            TokenType::GtEq => { self.emit_op(Op::Lt); self.emit_op(Op::Not); }
            TokenType::Lt => self.emit_op(Op::Lt),
            TokenType::LtEq => { self.emit_op(Op::Gt); self.emit_op(Op::Not); }
            TokenType::Plus => self.emit_op(Op::Add),
            TokenType::Minus => self.emit_op(Op::Sub),
            TokenType::Star => self.emit_op(Op::Mul),
            TokenType::Slash => self.emit_op(Op::Div),
            _ => {}
        }
    }

    fn and_(&mut self) {
        let end = self.emit_jump(Op::JumpIfFalse);
        self.emit_op(Op::Pop);
        self.parse_precedence(Prec::And);
        self.patch_jump(end);
    }

    fn or_(&mut self) {
        let else_jump = self.emit_jump(Op::JumpIfFalse);
        let end_jump = self.emit_jump(Op::Jump);
        self.patch_jump(else_jump);
        self.emit_op(Op::Pop);
        self.parse_precedence(Prec::Or);
        self.patch_jump(end_jump);
    }

    fn variable(&mut self, can_assign: bool) {
        let name = self.previous.lexeme;
        self.named_variable(name, can_assign);
    }

    fn this_(&mut self) {
        if self.classes.is_empty() {
            self.error("Can't use 'this' outside of a class.");
            return;
        }
        self.named_variable("this", false);
    }

    fn super_(&mut self) {
        if self.classes.is_empty() {
            self.error("Can't use 'super' outside of a class.");
        } else if !self.classes.last().map_or(false, |c| c.has_superclass) {
            self.error("Can't use 'super' in a class with no superclass.");
        }
        self.consume(TokenType::Dot, "Expect '.' after 'super'.");
        self.consume(TokenType::Ident, "Expect superclass method name.");
        let name = self.previous.lexeme;
        let name_const = self.identifier_constant(name);
        self.named_variable("this", false);
        if self.match_k(TokenType::LParen) {
            let argc = self.argument_list();
            self.named_variable("super", false);
            self.emit_pair(Op::CallSuper, name_const);
            self.emit_u8(argc);
        } else {
            self.named_variable("super", false);
            self.emit_pair(Op::GetSuper, name_const);
        }
    }

    fn call(&mut self) {
        let argc = self.argument_list();
        self.emit_pair(Op::Call, argc);
    }

    fn dot(&mut self, can_assign: bool) {
        self.consume(TokenType::Ident, "Expect property name after '.'.");
        let name = self.previous.lexeme;
        let name_const = self.identifier_constant(name);
        if can_assign && self.match_k(TokenType::Assign) {
            self.expression();
            self.emit_pair(Op::SetProp, name_const);
        } else if self.match_k(TokenType::LParen) {
            // Fused property-lookup + call; also the VM's method dispatch path.
            let argc = self.argument_list();
            self.emit_pair(Op::CallMethod, name_const);
            self.emit_u8(argc);
        } else {
            self.emit_pair(Op::GetProp, name_const);
        }
    }

    fn argument_list(&mut self) -> u8 {
        let mut argc: u32 = 0;
        if !self.check(TokenType::RParen) {
            loop {
                self.expression();
                if argc == 255 {
                    self.error("Can't have more than 255 arguments.");
                }
                argc += 1;
                if !self.match_k(TokenType::Comma) { break; }
            }
        }
        self.consume(TokenType::RParen, "Expect ')' after arguments.");
        argc.min(255) as u8
    }

    // --- declarations ---

    fn declaration(&mut self) {
        if self.match_k(TokenType::Class) {
            self.class_declaration();
        } else if self.match_k(TokenType::Fun) {
            self.fun_declaration();
        } else if self.match_k(TokenType::Var) {
            self.var_declaration();
        } else {
            self.statement();
        }
        if self.panic_mode { self.synchronize(); }
    }

    fn var_declaration(&mut self) {
        let global = self.parse_variable("Expect variable name.");
        if self.match_k(TokenType::Assign) {
            self.expression();
        } else {
            self.emit_op(Op::Nil);
        }
        self.consume(TokenType::Semicolon, "Expect ';' after variable declaration.");
        self.define_variable(global);
    }

    fn fun_declaration(&mut self) {
        let global = self.parse_variable("Expect function name.");
        self.mark_initialized();
        self.function(FunctionKind::Function);
        self.define_variable(global);
    }

    fn function(&mut self, kind: FunctionKind) {
        let name = self.previous.lexeme.to_string();
        self.compilers.push(Compiler::new(kind, Some(name)));
        self.begin_scope();

        self.consume(TokenType::LParen, "Expect '(' after function name.");
        if !self.check(TokenType::RParen) {
            loop {
                let arity = self.ctx_ref().function.arity;
                if arity == 255 {
                    self.error_at_current("Can't have more than 255 parameters.");
                } else {
                    self.ctx().function.arity = arity + 1;
                }
                let constant = self.parse_variable("Expect parameter name.");
                self.define_variable(constant);
                if !self.match_k(TokenType::Comma) { break; }
            }
        }
        self.consume(TokenType::RParen, "Expect ')' after parameters.");
        self.consume(TokenType::LBrace, "Expect '{' before function body.");
        self.block();

        // No end_scope: the frame teardown discards the whole window.
        let (function, upvalues) = self.end_compiler();
        let c = self.make_constant(Value::Func(Rc::new(function)));
        self.emit_pair(Op::Closure, c);
        for uv in upvalues {
            self.emit_u8(if uv.is_local { 1 } else { 0 });
            self.emit_u8(uv.index);
        }
    }

    fn class_declaration(&mut self) {
        self.consume(TokenType::Ident, "Expect class name.");
        let class_name = self.previous.lexeme;
        let name_const = self.identifier_constant(class_name);
        self.declare_variable();
        self.emit_pair(Op::Class, name_const);
        self.define_variable(name_const);

        self.classes.push(ClassCompiler { has_superclass: false });

        if self.match_k(TokenType::Lt) {
            self.consume(TokenType::Ident, "Expect superclass name.");
            let superclass_name = self.previous.lexeme;
            self.variable(false);
            if class_name == superclass_name {
                self.error("A class can't inherit from itself.");
            }
            // Hidden scope so `super` resolves like any other local.
            self.begin_scope();
            self.add_local("super");
            self.define_variable(0);
            self.named_variable(class_name, false);
            self.emit_op(Op::Inherit);
            if let Some(c) = self.classes.last_mut() { c.has_superclass = true; }
        }

        self.named_variable(class_name, false);
        self.consume(TokenType::LBrace, "Expect '{' before class body.");
        while !self.check(TokenType::RBrace) && !self.check(TokenType::Eof) {
            self.method();
        }
        self.consume(TokenType::RBrace, "Expect '}' after class body.");
        self.emit_op(Op::Pop);

        if self.classes.last().map_or(false, |c| c.has_superclass) {
            self.end_scope();
        }
        self.classes.pop();
    }

    fn method(&mut self) {
        self.consume(TokenType::Ident, "Expect method name.");
        let name = self.previous.lexeme;
        let name_const = self.identifier_constant(name);
        let kind = if name == "init" { FunctionKind::Initializer } else { FunctionKind::Method };
        self.function(kind);
        self.emit_pair(Op::Method, name_const);
    }

    // --- statements ---

    fn statement(&mut self) {
        if self.match_k(TokenType::Print) {
            self.print_statement();
        } else if self.match_k(TokenType::For) {
            self.for_statement();
        } else if self.match_k(TokenType::If) {
            self.if_statement();
        } else if self.match_k(TokenType::Return) {
            self.return_statement();
        } else if self.match_k(TokenType::While) {
            self.while_statement();
        } else if self.match_k(TokenType::LBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else {
            self.expression_statement();
        }
    }

    fn block(&mut self) {
        while !self.check(TokenType::RBrace) && !self.check(TokenType::Eof) {
            self.declaration();
        }
        self.consume(TokenType::RBrace, "Expect '}' after block.");
    }

    fn print_statement(&mut self) {
        self.expression();
        self.consume(TokenType::Semicolon, "Expect ';' after value.");
        self.emit_op(Op::Print);
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.consume(TokenType::Semicolon, "Expect ';' after expression.");
        self.emit_op(Op::Pop);
    }

    fn if_statement(&mut self) {
        self.consume(TokenType::LParen, "Expect '(' after 'if'.");
        self.expression();
        self.consume(TokenType::RParen, "Expect ')' after condition.");

        let then_jump = self.emit_jump(Op::JumpIfFalse);
        self.emit_op(Op::Pop);
        self.statement();
        let else_jump = self.emit_jump(Op::Jump);

        self.patch_jump(then_jump);
        self.emit_op(Op::Pop);
        if self.match_k(TokenType::Else) { self.statement(); }
        self.patch_jump(else_jump);
    }

    fn while_statement(&mut self) {
        let loop_start = self.chunk().here();
        self.consume(TokenType::LParen, "Expect '(' after 'while'.");
        self.expression();
        self.consume(TokenType::RParen, "Expect ')' after condition.");

        let exit_jump = self.emit_jump(Op::JumpIfFalse);
        self.emit_op(Op::Pop);
        self.statement();
        self.emit_loop(loop_start);

        self.patch_jump(exit_jump);
        self.emit_op(Op::Pop);
    }

    // Desugars to { init; while (cond) { body; incr; } } with the increment
    // compiled before the body behind a forward jump.
    fn for_statement(&mut self) {
        self.begin_scope();
        self.consume(TokenType::LParen, "Expect '(' after 'for'.");
        if self.match_k(TokenType::Semicolon) {
            // no initializer
        } else if self.match_k(TokenType::Var) {
            self.var_declaration();
        } else {
            self.expression_statement();
        }

        let mut loop_start = self.chunk().here();

        let mut exit_jump = None;
        if !self.match_k(TokenType::Semicolon) {
            self.expression();
            self.consume(TokenType::Semicolon, "Expect ';' after loop condition.");
            exit_jump = Some(self.emit_jump(Op::JumpIfFalse));
            self.emit_op(Op::Pop);
        }

        if !self.match_k(TokenType::RParen) {
            let body_jump = self.emit_jump(Op::Jump);
            let increment_start = self.chunk().here();
            self.expression();
            self.emit_op(Op::Pop);
            self.consume(TokenType::RParen, "Expect ')' after for clauses.");
            self.emit_loop(loop_start);
            loop_start = increment_start;
            self.patch_jump(body_jump);
        }

        self.statement();
        self.emit_loop(loop_start);

        if let Some(exit) = exit_jump {
            self.patch_jump(exit);
            self.emit_op(Op::Pop);
        }
        self.end_scope();
    }

    fn return_statement(&mut self) {
        if self.ctx_ref().kind == FunctionKind::Script {
            self.error("Can't return from top-level code.");
        }
        if self.match_k(TokenType::Semicolon) {
            self.emit_return();
        } else {
            if self.ctx_ref().kind == FunctionKind::Initializer {
                self.error("Can't return a value from an initializer.");
            }
            self.expression();
            self.consume(TokenType::Semicolon, "Expect ';' after return value.");
            self.emit_op(Op::Ret);
        }
    }
}
