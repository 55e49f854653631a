//! Single-pass Pratt compiler: parses tokens and emits bytecode directly
//! into a `Chunk`, with no separate AST stage. A `Compiler` record exists
//! per function currently being compiled; nested function definitions
//! push a fresh one and restore the enclosing one when the body ends.

use crate::backend::vm::heap::Heap;
use crate::common::chunk::Chunk;
use crate::common::object::{Obj, ObjFunction};
use crate::common::opcode::OpCode;
use crate::common::token::{Token, TokenKind};
use crate::common::value::Value;
use crate::frontend::lexer::Lexer;

const MAX_LOCALS: usize = 256;
const MAX_UPVALUES: usize = 256;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
#[repr(u8)]
enum Precedence {
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

impl Precedence {
    fn next(self) -> Precedence {
        match self {
            Precedence::None => Precedence::Assignment,
            Precedence::Assignment => Precedence::Or,
            Precedence::Or => Precedence::And,
            Precedence::And => Precedence::Equality,
            Precedence::Equality => Precedence::Comparison,
            Precedence::Comparison => Precedence::Term,
            Precedence::Term => Precedence::Factor,
            Precedence::Factor => Precedence::Unary,
            Precedence::Unary => Precedence::Call,
            Precedence::Call => Precedence::Primary,
            Precedence::Primary => Precedence::Primary,
        }
    }
}

type ParseFn = fn(&mut State, bool);

struct Rule {
    prefix: Option<ParseFn>,
    infix: Option<ParseFn>,
    precedence: Precedence,
}

fn rule(kind: TokenKind) -> Rule {
    use TokenKind as T;
    let (prefix, infix, precedence): (Option<ParseFn>, Option<ParseFn>, Precedence) = match kind {
        T::LeftParen => (Some(State::grouping), Some(State::call), Precedence::Call),
        T::Dot => (None, Some(State::dot), Precedence::Call),
        T::Minus => (Some(State::unary), Some(State::binary), Precedence::Term),
        T::Plus => (None, Some(State::binary), Precedence::Term),
        T::Slash | T::Star => (None, Some(State::binary), Precedence::Factor),
        T::Bang => (Some(State::unary), None, Precedence::None),
        T::BangEqual => (None, Some(State::binary), Precedence::Equality),
        T::EqualEqual => (None, Some(State::binary), Precedence::Equality),
        T::Greater | T::GreaterEqual | T::Less | T::LessEqual => (None, Some(State::binary), Precedence::Comparison),
        T::Identifier => (Some(State::variable), None, Precedence::None),
        T::String => (Some(State::string), None, Precedence::None),
        T::Number => (Some(State::number), None, Precedence::None),
        T::And => (None, Some(State::and), Precedence::And),
        T::Or => (None, Some(State::or), Precedence::Or),
        T::False | T::True | T::Nil => (Some(State::literal), None, Precedence::None),
        T::This => (Some(State::this), None, Precedence::None),
        T::Super => (Some(State::super_), None, Precedence::None),
        _ => (None, None, Precedence::None),
    };
    Rule { prefix, infix, precedence }
}

#[derive(Clone)]
struct Local<'src> {
    name: Token<'src>,
    depth: i32,
    is_captured: bool,
}

#[derive(Clone, Copy)]
struct UpvalueInfo {
    index: u8,
    is_local: bool,
}

/// Why `resolve_upvalue`/`add_upvalue` failed, kept distinct so the two
/// failure modes report their own diagnostic instead of sharing one.
#[derive(Clone, Copy)]
enum UpvalueError {
    UninitializedLocal,
    TooMany,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum FunctionType {
    Script,
    Function,
    Method,
    Initializer,
}

struct FnCompiler<'src> {
    enclosing: Option<Box<FnCompiler<'src>>>,
    function: *mut Obj,
    fn_type: FunctionType,
    locals: Vec<Local<'src>>,
    upvalues: Vec<UpvalueInfo>,
    scope_depth: i32,
}

impl<'src> FnCompiler<'src> {
    fn new(fn_type: FunctionType, function: *mut Obj) -> FnCompiler<'src> {
        // Slot 0 is reserved for the receiver (methods) or the callee
        // itself (plain functions); it is never addressable by name
        // except as `this` inside a method.
        let receiver_name = if fn_type == FunctionType::Method || fn_type == FunctionType::Initializer {
            "this"
        } else {
            ""
        };
        FnCompiler {
            enclosing: None,
            function,
            fn_type,
            locals: vec![Local {
                name: Token::synthetic(receiver_name),
                depth: 0,
                is_captured: false,
            }],
            upvalues: Vec::new(),
            scope_depth: 0,
        }
    }
}

struct ClassCompiler {
    enclosing: Option<Box<ClassCompiler>>,
    has_superclass: bool,
}

/// Everything the parsing methods need: the token stream, the current
/// function-compiler chain, the heap (for interning constants), and the
/// error/panic-mode bookkeeping required for synchronized recovery.
struct State<'src> {
    lexer: Lexer<'src>,
    current: Token<'src>,
    previous: Token<'src>,
    had_error: bool,
    panic_mode: bool,
    error_count: usize,
    compiler: FnCompiler<'src>,
    class_compiler: Option<Box<ClassCompiler>>,
    heap: &'src mut Heap,
}

pub fn compile(source: &str, heap: &mut Heap) -> Result<*mut Obj, usize> {
    let function = heap.alloc_function(ObjFunction {
        arity: 0,
        upvalue_count: 0,
        chunk: Chunk::new(),
        name: None,
    });
    heap.compiler_roots.push(function);

    let mut state = State {
        lexer: Lexer::new(source),
        current: Token::synthetic(""),
        previous: Token::synthetic(""),
        had_error: false,
        panic_mode: false,
        error_count: 0,
        compiler: FnCompiler::new(FunctionType::Script, function),
        class_compiler: None,
        heap,
    };

    state.advance();
    while !state.check(TokenKind::Eof) {
        state.declaration();
    }
    state.consume(TokenKind::Eof, "Expect end of expression.");
    state.emit_return();

    state.heap.compiler_roots.pop();
    let had_error = state.had_error;
    let error_count = state.error_count;

    if had_error {
        Err(error_count)
    } else {
        Ok(function)
    }
}

impl<'src> State<'src> {
    // --- token stream -------------------------------------------------

    fn advance(&mut self) {
        self.previous = self.current;
        loop {
            self.current = self.lexer.scan_token();
            if self.current.kind != TokenKind::Error {
                break;
            }
            self.error_at_current(self.current.lexeme);
        }
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn matches(&mut self, kind: TokenKind) -> bool {
        if !self.check(kind) {
            return false;
        }
        self.advance();
        true
    }

    fn consume(&mut self, kind: TokenKind, message: &str) {
        if self.current.kind == kind {
            self.advance();
            return;
        }
        self.error_at_current(message);
    }

    fn error_at_current(&mut self, message: &str) {
        let tok = self.current;
        self.error_at(tok, message);
    }

    fn error(&mut self, message: &str) {
        let tok = self.previous;
        self.error_at(tok, message);
    }

    fn error_at(&mut self, token: Token<'src>, message: &str) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        self.had_error = true;
        self.error_count += 1;
        let location = match token.kind {
            TokenKind::Eof => " at end".to_string(),
            TokenKind::Error => String::new(),
            _ => format!(" at '{}'", token.lexeme),
        };
        tracing::debug!(line = token.line, %message, "compile error");
        eprintln!("[line {}] Error{}: {}", token.line, location, message);
    }

    fn synchronize(&mut self) {
        self.panic_mode = false;
        while self.current.kind != TokenKind::Eof {
            if self.previous.kind == TokenKind::Semicolon {
                return;
            }
            match self.current.kind {
                TokenKind::Class
                | TokenKind::Fun
                | TokenKind::Var
                | TokenKind::For
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Print
                | TokenKind::Return => return,
                _ => {}
            }
            self.advance();
        }
    }

    // --- bytecode emission ---------------------------------------------

    fn current_chunk(&mut self) -> &mut Chunk {
        // SAFETY: `self.compiler.function` was allocated by `compile`
        // and is kept alive via `heap.compiler_roots` for the whole
        // compilation; nothing else mutably aliases it while compiling.
        match unsafe { &mut (*self.compiler.function).kind } {
            crate::common::object::ObjKind::Function(f) => &mut f.chunk,
            _ => unreachable!("FnCompiler::function always names a Function object"),
        }
    }

    fn emit_byte(&mut self, byte: u8) {
        let line = self.previous.line as i32;
        self.current_chunk().write(byte, line);
    }

    fn emit_op(&mut self, op: OpCode) {
        self.emit_byte(op as u8);
    }

    fn emit_bytes(&mut self, op: OpCode, byte: u8) {
        self.emit_op(op);
        self.emit_byte(byte);
    }

    fn emit_return(&mut self) {
        if self.compiler.fn_type == FunctionType::Initializer {
            self.emit_bytes(OpCode::GetLocal, 0);
        } else {
            self.emit_op(OpCode::Nil);
        }
        self.emit_op(OpCode::Return);
    }

    fn make_constant(&mut self, value: Value) -> u8 {
        let idx = self.current_chunk().add_constant(value);
        if idx > u8::MAX as usize {
            self.error("Too many constants in one chunk.");
            return 0;
        }
        idx as u8
    }

    fn emit_constant(&mut self, value: Value) {
        let idx = self.make_constant(value);
        self.emit_bytes(OpCode::Constant, idx);
    }

    fn emit_jump(&mut self, op: OpCode) -> usize {
        self.emit_op(op);
        self.emit_byte(0xff);
        self.emit_byte(0xff);
        self.current_chunk().code.len() - 2
    }

    fn patch_jump(&mut self, offset: usize) {
        let jump = self.current_chunk().code.len() - offset - 2;
        if jump > u16::MAX as usize {
            self.error("Too much code to jump over.");
        }
        let chunk = self.current_chunk();
        chunk.code[offset] = ((jump >> 8) & 0xff) as u8;
        chunk.code[offset + 1] = (jump & 0xff) as u8;
    }

    fn emit_loop(&mut self, loop_start: usize) {
        self.emit_op(OpCode::Loop);
        let offset = self.current_chunk().code.len() - loop_start + 2;
        if offset > u16::MAX as usize {
            self.error("Too much code to jump over.");
        }
        self.emit_byte(((offset >> 8) & 0xff) as u8);
        self.emit_byte((offset & 0xff) as u8);
    }

    // --- identifiers, locals, upvalues -----------------------------------

    fn identifier_constant(&mut self, name: &str) -> u8 {
        let obj = self.heap.copy_string(name);
        self.make_constant(Value::obj(obj))
    }

    fn add_local(&mut self, name: Token<'src>) {
        if self.compiler.locals.len() >= MAX_LOCALS {
            self.error("Too many local variables in function.");
            return;
        }
        self.compiler.locals.push(Local {
            name,
            depth: -1,
            is_captured: false,
        });
    }

    fn declare_variable(&mut self) {
        if self.compiler.scope_depth == 0 {
            return;
        }
        let name = self.previous;
        for local in self.compiler.locals.iter().rev() {
            if local.depth != -1 && local.depth < self.compiler.scope_depth {
                break;
            }
            if local.name.lexeme == name.lexeme {
                self.error("Already a variable with this name in this scope.");
                return;
            }
        }
        self.add_local(name);
    }

    fn parse_variable(&mut self, message: &str) -> u8 {
        self.consume(TokenKind::Identifier, message);
        self.declare_variable();
        if self.compiler.scope_depth > 0 {
            return 0;
        }
        let lexeme = self.previous.lexeme.to_string();
        self.identifier_constant(&lexeme)
    }

    fn mark_initialized(&mut self) {
        if self.compiler.scope_depth == 0 {
            return;
        }
        let depth = self.compiler.scope_depth;
        if let Some(last) = self.compiler.locals.last_mut() {
            last.depth = depth;
        }
    }

    fn define_variable(&mut self, global: u8) {
        if self.compiler.scope_depth > 0 {
            self.mark_initialized();
            return;
        }
        self.emit_bytes(OpCode::DefineGlobal, global);
    }

    fn resolve_local(compiler: &FnCompiler<'src>, name: &str) -> Option<(usize, bool)> {
        for (i, local) in compiler.locals.iter().enumerate().rev() {
            if local.name.lexeme == name {
                return Some((i, local.depth == -1));
            }
        }
        None
    }

    fn add_upvalue(compiler: &mut FnCompiler<'src>, index: u8, is_local: bool) -> Result<u8, UpvalueError> {
        for (i, uv) in compiler.upvalues.iter().enumerate() {
            if uv.index == index && uv.is_local == is_local {
                return Ok(i as u8);
            }
        }
        if compiler.upvalues.len() >= MAX_UPVALUES {
            return Err(UpvalueError::TooMany);
        }
        compiler.upvalues.push(UpvalueInfo { index, is_local });
        Ok((compiler.upvalues.len() - 1) as u8)
    }

    fn resolve_upvalue(compiler: &mut FnCompiler<'src>, name: &str) -> Result<Option<u8>, UpvalueError> {
        let enclosing = match compiler.enclosing.as_mut() {
            Some(e) => e,
            None => return Ok(None),
        };
        if let Some((slot, uninitialized)) = Self::resolve_local(enclosing, name) {
            if uninitialized {
                return Err(UpvalueError::UninitializedLocal);
            }
            enclosing.locals[slot].is_captured = true;
            return Self::add_upvalue(compiler, slot as u8, true).map(Some);
        }
        if let Some(slot) = Self::resolve_upvalue(enclosing, name)? {
            return Self::add_upvalue(compiler, slot, false).map(Some);
        }
        Ok(None)
    }

    // --- scope -----------------------------------------------------------

    fn begin_scope(&mut self) {
        self.compiler.scope_depth += 1;
    }

    fn end_scope(&mut self) {
        self.compiler.scope_depth -= 1;
        while let Some(local) = self.compiler.locals.last() {
            if local.depth <= self.compiler.scope_depth {
                break;
            }
            if local.is_captured {
                self.emit_op(OpCode::CloseUpvalue);
            } else {
                self.emit_op(OpCode::Pop);
            }
            self.compiler.locals.pop();
        }
    }

    // --- expressions (Pratt parser) --------------------------------------

    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();
        let prefix = rule(self.previous.kind).prefix;
        let prefix = match prefix {
            Some(f) => f,
            None => {
                self.error("Expect expression.");
                return;
            }
        };
        let can_assign = precedence <= Precedence::Assignment;
        prefix(self, can_assign);

        while precedence <= rule(self.current.kind).precedence {
            self.advance();
            let infix = rule(self.previous.kind).infix.expect("infix rule must exist for a loop-selected token");
            infix(self, can_assign);
        }

        if can_assign && self.matches(TokenKind::Equal) {
            self.error("Invalid assignment target.");
        }
    }

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    fn number(state: &mut State, _can_assign: bool) {
        let lexeme = state.previous.lexeme;
        let value: f64 = lexeme.parse().unwrap_or_else(|_| {
            panic!("scanner produced an unparseable number literal: {lexeme}")
        });
        state.emit_constant(Value::number(value));
    }

    fn string(state: &mut State, _can_assign: bool) {
        let raw = state.previous.lexeme;
        let inner = &raw[1..raw.len() - 1];
        let unescaped = unescape(inner);
        let obj = state.heap.copy_string(&unescaped);
        state.emit_constant(Value::obj(obj));
    }

    fn literal(state: &mut State, _can_assign: bool) {
        match state.previous.kind {
            TokenKind::False => state.emit_op(OpCode::False),
            TokenKind::True => state.emit_op(OpCode::True),
            TokenKind::Nil => state.emit_op(OpCode::Nil),
            _ => unreachable!("literal() only runs for false/true/nil tokens"),
        }
    }

    fn grouping(state: &mut State, _can_assign: bool) {
        state.expression();
        state.consume(TokenKind::RightParen, "Expect ')' after expression.");
    }

    fn unary(state: &mut State, _can_assign: bool) {
        let op_kind = state.previous.kind;
        state.parse_precedence(Precedence::Unary);
        match op_kind {
            TokenKind::Minus => state.emit_op(OpCode::Negate),
            TokenKind::Bang => state.emit_op(OpCode::Not),
            _ => unreachable!("unary() only runs for -/! tokens"),
        }
    }

    fn binary(state: &mut State, _can_assign: bool) {
        let op_kind = state.previous.kind;
        let next_precedence = rule(op_kind).precedence.next();
        state.parse_precedence(next_precedence);
        match op_kind {
            TokenKind::Plus => state.emit_op(OpCode::Add),
            TokenKind::Minus => state.emit_op(OpCode::Subtract),
            TokenKind::Star => state.emit_op(OpCode::Multiply),
            TokenKind::Slash => state.emit_op(OpCode::Divide),
            TokenKind::BangEqual => {
                state.emit_op(OpCode::Equal);
                state.emit_op(OpCode::Not);
            }
            TokenKind::EqualEqual => state.emit_op(OpCode::Equal),
            TokenKind::Greater => state.emit_op(OpCode::Greater),
            TokenKind::GreaterEqual => {
                state.emit_op(OpCode::Less);
                state.emit_op(OpCode::Not);
            }
            TokenKind::Less => state.emit_op(OpCode::Less),
            TokenKind::LessEqual => {
                state.emit_op(OpCode::Greater);
                state.emit_op(OpCode::Not);
            }
            _ => unreachable!("binary() only runs for known binary operator tokens"),
        }
    }

    fn and(state: &mut State, _can_assign: bool) {
        let end_jump = state.emit_jump(OpCode::JumpIfFalse);
        state.emit_op(OpCode::Pop);
        state.parse_precedence(Precedence::And);
        state.patch_jump(end_jump);
    }

    fn or(state: &mut State, _can_assign: bool) {
        let else_jump = state.emit_jump(OpCode::JumpIfFalse);
        let end_jump = state.emit_jump(OpCode::Jump);
        state.patch_jump(else_jump);
        state.emit_op(OpCode::Pop);
        state.parse_precedence(Precedence::Or);
        state.patch_jump(end_jump);
    }

    fn argument_list(&mut self) -> u8 {
        let mut argc: u32 = 0;
        if !self.check(TokenKind::RightParen) {
            loop {
                self.expression();
                if argc == 255 {
                    self.error("Can't have more than 255 arguments.");
                }
                argc += 1;
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after arguments.");
        argc as u8
    }

    fn call(state: &mut State, _can_assign: bool) {
        let argc = state.argument_list();
        state.emit_bytes(OpCode::Call, argc);
    }

    fn dot(state: &mut State, can_assign: bool) {
        state.consume(TokenKind::Identifier, "Expect property name after '.'.");
        let lexeme = state.previous.lexeme.to_string();
        let name = state.identifier_constant(&lexeme);

        if can_assign && state.matches(TokenKind::Equal) {
            state.expression();
            state.emit_bytes(OpCode::SetProperty, name);
        } else if state.matches(TokenKind::LeftParen) {
            let argc = state.argument_list();
            state.emit_bytes(OpCode::Invoke, name);
            state.emit_byte(argc);
        } else {
            state.emit_bytes(OpCode::GetProperty, name);
        }
    }

    fn variable(state: &mut State, can_assign: bool) {
        let lexeme = state.previous.lexeme.to_string();
        state.named_variable(&lexeme, can_assign);
    }

    fn named_variable(&mut self, name: &str, can_assign: bool) {
        let (get_op, set_op, arg) = if let Some((slot, uninitialized)) = Self::resolve_local(&self.compiler, name) {
            if uninitialized {
                self.error("Can't read local variable in its own initializer.");
            }
            (OpCode::GetLocal, OpCode::SetLocal, slot as u8)
        } else {
            match Self::resolve_upvalue(&mut self.compiler, name) {
                Ok(Some(slot)) => (OpCode::GetUpvalue, OpCode::SetUpvalue, slot),
                Ok(None) => {
                    let idx = self.identifier_constant(name);
                    (OpCode::GetGlobal, OpCode::SetGlobal, idx)
                }
                Err(UpvalueError::UninitializedLocal) => {
                    self.error("Can't read local variable in its own initializer.");
                    (OpCode::GetGlobal, OpCode::SetGlobal, 0)
                }
                Err(UpvalueError::TooMany) => {
                    self.error("Too many closure variables in function.");
                    (OpCode::GetGlobal, OpCode::SetGlobal, 0)
                }
            }
        };

        if can_assign && self.matches(TokenKind::Equal) {
            self.expression();
            self.emit_bytes(set_op, arg);
        } else {
            self.emit_bytes(get_op, arg);
        }
    }

    fn this(state: &mut State, _can_assign: bool) {
        if state.class_compiler.is_none() {
            state.error("Can't use 'this' outside of a class.");
            return;
        }
        State::variable(state, false);
    }

    fn super_(state: &mut State, _can_assign: bool) {
        match &state.class_compiler {
            None => state.error("Can't use 'super' outside of a class."),
            Some(cc) if !cc.has_superclass => state.error("Can't use 'super' in a class with no superclass."),
            _ => {}
        }
        state.consume(TokenKind::Dot, "Expect '.' after 'super'.");
        state.consume(TokenKind::Identifier, "Expect superclass method name.");
        let lexeme = state.previous.lexeme.to_string();
        let name = state.identifier_constant(&lexeme);

        state.named_variable("this", false);
        if state.matches(TokenKind::LeftParen) {
            let argc = state.argument_list();
            state.named_variable("super", false);
            state.emit_bytes(OpCode::Super, name);
            state.emit_byte(argc);
        } else {
            state.named_variable("super", false);
            state.emit_bytes(OpCode::GetSuper, name);
        }
    }

    // --- statements --------------------------------------------------------

    fn declaration(&mut self) {
        if self.matches(TokenKind::Class) {
            self.class_declaration();
        } else if self.matches(TokenKind::Fun) {
            self.fun_declaration();
        } else if self.matches(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.statement();
        }
        if self.panic_mode {
            self.synchronize();
        }
    }

    fn statement(&mut self) {
        if self.matches(TokenKind::Print) {
            self.print_statement();
        } else if self.matches(TokenKind::If) {
            self.if_statement();
        } else if self.matches(TokenKind::While) {
            self.while_statement();
        } else if self.matches(TokenKind::For) {
            self.for_statement();
        } else if self.matches(TokenKind::Return) {
            self.return_statement();
        } else if self.matches(TokenKind::Import) {
            self.import_statement();
        } else if self.matches(TokenKind::LeftBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else {
            self.expression_statement();
        }
    }

    fn print_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after value.");
        self.emit_op(OpCode::Print);
    }

    fn import_statement(&mut self) {
        self.consume(TokenKind::String, "Expect module path string after 'import'.");
        let raw = self.previous.lexeme;
        let inner = &raw[1..raw.len() - 1];
        let unescaped = unescape(inner);
        let obj = self.heap.copy_string(&unescaped);
        self.emit_constant(Value::obj(obj));
        self.consume(TokenKind::Semicolon, "Expect ';' after import path.");
        self.emit_op(OpCode::Import);
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after expression.");
        self.emit_op(OpCode::Pop);
    }

    fn if_statement(&mut self) {
        self.consume(TokenKind::LeftParen, "Expect '(' after 'if'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let then_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();

        let else_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(then_jump);
        self.emit_op(OpCode::Pop);

        if self.matches(TokenKind::Else) {
            self.statement();
        }
        self.patch_jump(else_jump);
    }

    fn while_statement(&mut self) {
        let loop_start = self.current_chunk().code.len();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'while'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let exit_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();
        self.emit_loop(loop_start);

        self.patch_jump(exit_jump);
        self.emit_op(OpCode::Pop);
    }

    fn for_statement(&mut self) {
        self.begin_scope();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'for'.");

        if self.matches(TokenKind::Semicolon) {
            // no initializer
        } else if self.matches(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.expression_statement();
        }

        let mut loop_start = self.current_chunk().code.len();
        let mut exit_jump: Option<usize> = None;
        if !self.matches(TokenKind::Semicolon) {
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after loop condition.");
            exit_jump = Some(self.emit_jump(OpCode::JumpIfFalse));
            self.emit_op(OpCode::Pop);
        }

        if !self.matches(TokenKind::RightParen) {
            let body_jump = self.emit_jump(OpCode::Jump);
            let increment_start = self.current_chunk().code.len();
            self.expression();
            self.emit_op(OpCode::Pop);
            self.consume(TokenKind::RightParen, "Expect ')' after for clauses.");

            self.emit_loop(loop_start);
            loop_start = increment_start;
            self.patch_jump(body_jump);
        }

        self.statement();
        self.emit_loop(loop_start);

        if let Some(exit_jump) = exit_jump {
            self.patch_jump(exit_jump);
            self.emit_op(OpCode::Pop);
        }

        self.end_scope();
    }

    fn return_statement(&mut self) {
        if self.compiler.fn_type == FunctionType::Script {
            self.error("Can't return from top-level code.");
        }
        if self.matches(TokenKind::Semicolon) {
            self.emit_return();
        } else {
            if self.compiler.fn_type == FunctionType::Initializer {
                self.error("Can't return a value from an initializer.");
            }
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after return value.");
            self.emit_op(OpCode::Return);
        }
    }

    fn block(&mut self) {
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.declaration();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after block.");
    }

    fn var_declaration(&mut self) {
        let global = self.parse_variable("Expect variable name.");
        if self.matches(TokenKind::Equal) {
            self.expression();
        } else {
            self.emit_op(OpCode::Nil);
        }
        self.consume(TokenKind::Semicolon, "Expect ';' after variable declaration.");
        self.define_variable(global);
    }

    fn fun_declaration(&mut self) {
        let global = self.parse_variable("Expect function name.");
        self.mark_initialized();
        self.function(FunctionType::Function);
        self.define_variable(global);
    }

    fn function(&mut self, fn_type: FunctionType) {
        let name_lexeme = self.previous.lexeme.to_string();
        let name_obj = self.heap.copy_string(&name_lexeme);
        let function_obj = self.heap.alloc_function(ObjFunction {
            arity: 0,
            upvalue_count: 0,
            chunk: Chunk::new(),
            name: Some(name_obj),
        });
        self.heap.compiler_roots.push(function_obj);

        let enclosing = std::mem::replace(&mut self.compiler, FnCompiler::new(fn_type, function_obj));
        self.compiler.enclosing = Some(Box::new(enclosing));

        self.begin_scope();
        self.consume(TokenKind::LeftParen, "Expect '(' after function name.");
        let mut arity: u32 = 0;
        if !self.check(TokenKind::RightParen) {
            loop {
                arity += 1;
                if arity > 255 {
                    self.error_at_current("Can't have more than 255 parameters.");
                }
                let constant = self.parse_variable("Expect parameter name.");
                self.define_variable(constant);
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        match unsafe { &mut (*self.compiler.function).kind } {
            crate::common::object::ObjKind::Function(f) => f.arity = arity.min(255) as u8,
            _ => unreachable!(),
        }
        self.consume(TokenKind::RightParen, "Expect ')' after parameters.");
        self.consume(TokenKind::LeftBrace, "Expect '{' before function body.");
        self.block();

        self.emit_return();
        let upvalues = self.compiler.upvalues.clone();
        let upvalue_count = upvalues.len();
        match unsafe { &mut (*self.compiler.function).kind } {
            crate::common::object::ObjKind::Function(f) => f.upvalue_count = upvalue_count,
            _ => unreachable!(),
        }

        let finished = self.compiler.function;
        let enclosing = *self.compiler.enclosing.take().expect("function() always runs inside an enclosing compiler");
        self.compiler = enclosing;
        self.heap.compiler_roots.pop();

        let idx = self.make_constant(Value::obj(finished));
        self.emit_bytes(OpCode::Closure, idx);
        for uv in upvalues {
            self.emit_byte(if uv.is_local { 1 } else { 0 });
            self.emit_byte(uv.index);
        }
    }

    fn method(&mut self) {
        self.consume(TokenKind::Identifier, "Expect method name.");
        let lexeme = self.previous.lexeme.to_string();
        let name = self.identifier_constant(&lexeme);
        let fn_type = if lexeme == "init" {
            FunctionType::Initializer
        } else {
            FunctionType::Method
        };
        self.function(fn_type);
        self.emit_bytes(OpCode::Method, name);
    }

    fn class_declaration(&mut self) {
        self.consume(TokenKind::Identifier, "Expect class name.");
        let class_name = self.previous;
        let name_lexeme = class_name.lexeme.to_string();
        let name_constant = self.identifier_constant(&name_lexeme);
        self.declare_variable();

        self.emit_bytes(OpCode::Class, name_constant);
        self.define_variable(name_constant);

        let enclosing_class = self.class_compiler.take();
        self.class_compiler = Some(Box::new(ClassCompiler {
            enclosing: enclosing_class,
            has_superclass: false,
        }));

        if self.matches(TokenKind::Less) {
            self.consume(TokenKind::Identifier, "Expect superclass name.");
            let superclass_lexeme = self.previous.lexeme.to_string();
            State::variable(self, false);
            if superclass_lexeme == name_lexeme {
                self.error("A class can't inherit from itself.");
            }

            self.begin_scope();
            self.add_local(Token::synthetic("super"));
            self.define_variable(0);

            self.named_variable(&name_lexeme, false);
            self.emit_op(OpCode::Inherit);
            if let Some(cc) = self.class_compiler.as_mut() {
                cc.has_superclass = true;
            }
        }

        self.named_variable(&name_lexeme, false);
        self.consume(TokenKind::LeftBrace, "Expect '{' before class body.");
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.method();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after class body.");
        self.emit_op(OpCode::Pop);

        let has_superclass = self.class_compiler.as_ref().map(|c| c.has_superclass).unwrap_or(false);
        if has_superclass {
            self.end_scope();
        }

        self.class_compiler = self.class_compiler.take().and_then(|c| c.enclosing);
    }
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}
