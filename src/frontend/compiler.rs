// Single-pass Pratt compiler: tokens in, a Chunk-bearing Function out.
//
// The teacher's parser (`frontend::parser::Parser`) builds a full AST that
// a separate IR/emitter pass later lowers to bytecode; this compiler
// collapses that into the one-pass design spec 4.4 requires — parsing and
// code generation happen in the same walk, there is no intermediate tree.
// What's kept from the teacher is the shape of the error-recovery state
// (`ParserError`-style sticky error flag, synchronization at statement
// boundaries) and the advance/peek/expect token-stream idiom.
//
// Instead of a literal table of function pointers (the classic clox
// `ParseRule[]`), prefix/infix dispatch is a `match` over `TokenKind` —
// idiomatic for Rust, where a table of method pointers generic over two
// lifetimes doesn't fit cleanly, and a match arm is just as direct a
// expression of "this token starts/continues this kind of expression".

use std::rc::Rc;

use crate::common::chunk::{Chunk, OpCode};
use crate::common::intern::Interner;
use crate::common::value::{Obj, ObjFunction, ObjString, Value};
use crate::frontend::lexer::Lexer;
use crate::frontend::token::{Token, TokenKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
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
            Precedence::Call | Precedence::Primary => Precedence::Primary,
        }
    }
}

fn rule_precedence(kind: TokenKind) -> Precedence {
    match kind {
        TokenKind::Or => Precedence::Or,
        TokenKind::And => Precedence::And,
        TokenKind::EqualEqual | TokenKind::BangEqual => Precedence::Equality,
        TokenKind::Less | TokenKind::LessEqual | TokenKind::Greater | TokenKind::GreaterEqual => {
            Precedence::Comparison
        }
        TokenKind::Plus | TokenKind::Minus => Precedence::Term,
        TokenKind::Star | TokenKind::Slash | TokenKind::SlashSlash | TokenKind::Percent => {
            Precedence::Factor
        }
        TokenKind::LeftParen => Precedence::Call,
        _ => Precedence::None,
    }
}

struct Parser<'src> {
    lexer: Lexer<'src>,
    current: Token<'src>,
    previous: Token<'src>,
    had_error: bool,
    panic_mode: bool,
}

impl<'src> Parser<'src> {
    fn new(source: &'src str) -> Parser<'src> {
        let mut lexer = Lexer::new(source);
        let first = lexer.scan_token();
        Parser { lexer, current: first, previous: first, had_error: false, panic_mode: false }
    }

    fn advance(&mut self) {
        self.previous = self.current;
        loop {
            self.current = self.lexer.scan_token();
            if self.current.kind != TokenKind::Error {
                break;
            }
            let message = self.current.lexeme;
            self.error_at_current(message);
        }
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn match_token(&mut self, kind: TokenKind) -> bool {
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
        let token = self.current;
        self.error_at(token, message);
    }

    fn error(&mut self, message: &str) {
        let token = self.previous;
        self.error_at(token, message);
    }

    fn error_at(&mut self, token: Token<'src>, message: &str) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        self.had_error = true;
        eprint!("[line {}] Error", token.line);
        match token.kind {
            TokenKind::Eof => eprint!(" at end"),
            TokenKind::Error => {}
            _ => eprint!(" at '{}'", token.lexeme),
        }
        eprintln!(": {message}");
    }

    fn synchronize(&mut self) {
        self.panic_mode = false;
        while self.current.kind != TokenKind::Eof {
            if self.previous.kind == TokenKind::Semicolon {
                return;
            }
            match self.current.kind {
                TokenKind::Fun
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
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FunctionKind {
    Script,
    Function,
}

struct Local<'src> {
    name: &'src str,
    depth: i32,
    is_captured: bool,
}

#[derive(Clone, Copy)]
struct UpvalueDesc {
    index: u8,
    is_local: bool,
}

struct FunctionState<'src> {
    function: ObjFunction,
    kind: FunctionKind,
    locals: Vec<Local<'src>>,
    upvalues: Vec<UpvalueDesc>,
    scope_depth: i32,
}

impl<'src> FunctionState<'src> {
    fn new(kind: FunctionKind, name: Option<Rc<ObjString>>) -> FunctionState<'src> {
        // Slot 0 is reserved for the closure being executed; giving it an
        // empty name keeps user code from ever resolving it as a local.
        let locals = vec![Local { name: "", depth: 0, is_captured: false }];
        FunctionState { function: ObjFunction::new(name), kind, locals, upvalues: Vec::new(), scope_depth: 0 }
    }
}

enum LocalLookup {
    Found(u8),
    Uninitialized,
    NotFound,
}

struct Compiler<'src, 'i> {
    parser: Parser<'src>,
    states: Vec<FunctionState<'src>>,
    interner: &'i mut Interner,
}

impl<'src, 'i> Compiler<'src, 'i> {
    fn current_state(&self) -> &FunctionState<'src> {
        self.states.last().unwrap()
    }

    fn current_state_mut(&mut self) -> &mut FunctionState<'src> {
        self.states.last_mut().unwrap()
    }

    fn current_chunk_mut(&mut self) -> &mut Chunk {
        &mut self.states.last_mut().unwrap().function.chunk
    }

    // ---- emission ----

    fn emit_byte(&mut self, byte: u8) {
        let line = self.parser.previous.line;
        self.current_chunk_mut().write(byte, line);
    }

    fn emit_op(&mut self, op: OpCode) {
        self.emit_byte(op as u8);
    }

    fn emit_op_byte(&mut self, op: OpCode, operand: u8) {
        self.emit_byte(op as u8);
        self.emit_byte(operand);
    }

    fn emit_return(&mut self) {
        self.emit_op(OpCode::Nil);
        self.emit_op(OpCode::Return);
    }

    fn make_constant(&mut self, value: Value) -> u8 {
        match self.current_chunk_mut().add_constant(value) {
            Some(idx) => idx,
            None => {
                self.parser.error("Too many constants in one chunk.");
                0
            }
        }
    }

    fn emit_constant(&mut self, value: Value) {
        let idx = self.make_constant(value);
        self.emit_op_byte(OpCode::Constant, idx);
    }

    fn emit_jump(&mut self, op: OpCode) -> usize {
        self.emit_op(op);
        self.emit_byte(0xff);
        self.emit_byte(0xff);
        self.current_chunk_mut().code.len() - 2
    }

    fn patch_jump(&mut self, offset: usize) {
        let jump = self.current_chunk_mut().code.len() - offset - 2;
        if jump > u16::MAX as usize {
            self.parser.error("Too much code to jump over.");
        }
        let bytes = (jump as u16).to_be_bytes();
        let chunk = self.current_chunk_mut();
        chunk.code[offset] = bytes[0];
        chunk.code[offset + 1] = bytes[1];
    }

    fn emit_loop(&mut self, loop_start: usize) {
        self.emit_op(OpCode::Loop);
        let offset = self.current_chunk_mut().code.len() - loop_start + 2;
        if offset > u16::MAX as usize {
            self.parser.error("Loop body too large.");
        }
        let bytes = (offset as u16).to_be_bytes();
        self.emit_byte(bytes[0]);
        self.emit_byte(bytes[1]);
    }

    // ---- scopes & locals ----

    fn begin_scope(&mut self) {
        self.current_state_mut().scope_depth += 1;
    }

    fn end_scope(&mut self) {
        self.current_state_mut().scope_depth -= 1;
        let depth = self.current_state().scope_depth;
        loop {
            let should_pop = matches!(self.current_state().locals.last(), Some(local) if local.depth > depth);
            if !should_pop {
                break;
            }
            let captured = self.current_state().locals.last().unwrap().is_captured;
            if captured {
                self.emit_op(OpCode::CloseUpvalue);
            } else {
                self.emit_op(OpCode::Pop);
            }
            self.current_state_mut().locals.pop();
        }
    }

    fn add_local(&mut self, name: &'src str) {
        if self.current_state().locals.len() >= 256 {
            self.parser.error("Too many local variables in function.");
            return;
        }
        self.current_state_mut().locals.push(Local { name, depth: -1, is_captured: false });
    }

    fn declare_variable(&mut self) {
        if self.current_state().scope_depth == 0 {
            return;
        }
        let name = self.parser.previous.lexeme;
        let current_depth = self.current_state().scope_depth;
        let mut duplicate = false;
        for local in self.current_state().locals.iter().rev() {
            if local.depth != -1 && local.depth < current_depth {
                break;
            }
            if local.name == name {
                duplicate = true;
                break;
            }
        }
        if duplicate {
            self.parser.error("Already a variable with this name in this scope.");
        }
        self.add_local(name);
    }

    fn mark_initialized(&mut self) {
        if self.current_state().scope_depth == 0 {
            return;
        }
        let depth = self.current_state().scope_depth;
        self.current_state_mut().locals.last_mut().unwrap().depth = depth;
    }

    fn resolve_local(&self, state_idx: usize, name: &str) -> LocalLookup {
        let locals = &self.states[state_idx].locals;
        for (i, local) in locals.iter().enumerate().rev() {
            if local.name == name {
                if local.depth == -1 {
                    return LocalLookup::Uninitialized;
                }
                return LocalLookup::Found(i as u8);
            }
        }
        LocalLookup::NotFound
    }

    fn add_upvalue(&mut self, state_idx: usize, index: u8, is_local: bool) -> u8 {
        {
            let state = &self.states[state_idx];
            for (i, uv) in state.upvalues.iter().enumerate() {
                if uv.index == index && uv.is_local == is_local {
                    return i as u8;
                }
            }
            if state.upvalues.len() >= 256 {
                self.parser.error("Too many closure variables in function.");
                return 0;
            }
        }
        let state = &mut self.states[state_idx];
        state.upvalues.push(UpvalueDesc { index, is_local });
        state.function.upvalue_count = state.upvalues.len();
        (state.upvalues.len() - 1) as u8
    }

    fn resolve_upvalue(&mut self, state_idx: usize, name: &str) -> Option<u8> {
        if state_idx == 0 {
            return None;
        }
        let enclosing_idx = state_idx - 1;
        match self.resolve_local(enclosing_idx, name) {
            LocalLookup::Found(local_idx) => {
                self.states[enclosing_idx].locals[local_idx as usize].is_captured = true;
                Some(self.add_upvalue(state_idx, local_idx, true))
            }
            LocalLookup::Uninitialized => {
                self.parser.error("Can't read local variable in its own initializer.");
                None
            }
            LocalLookup::NotFound => {
                let upvalue_idx = self.resolve_upvalue(enclosing_idx, name)?;
                Some(self.add_upvalue(state_idx, upvalue_idx, false))
            }
        }
    }

    fn identifier_constant(&mut self, name: &str) -> u8 {
        let interned = self.interner.intern(name.to_string());
        self.make_constant(Value::Obj(Obj::Str(interned)))
    }

    fn parse_variable(&mut self, error_msg: &str) -> u8 {
        self.parser.consume(TokenKind::Identifier, error_msg);
        self.declare_variable();
        if self.current_state().scope_depth > 0 {
            return 0;
        }
        let name = self.parser.previous.lexeme;
        self.identifier_constant(name)
    }

    fn define_variable(&mut self, global: u8) {
        if self.current_state().scope_depth > 0 {
            self.mark_initialized();
            return;
        }
        self.emit_op_byte(OpCode::DefineGlobal, global);
    }

    fn named_variable(&mut self, name: &'src str, can_assign: bool) {
        let state_idx = self.states.len() - 1;
        let (get_op, set_op, arg) = match self.resolve_local(state_idx, name) {
            LocalLookup::Found(slot) => (OpCode::GetLocal, OpCode::SetLocal, slot),
            LocalLookup::Uninitialized => {
                self.parser.error("Can't read local variable in its own initializer.");
                (OpCode::GetLocal, OpCode::SetLocal, 0)
            }
            LocalLookup::NotFound => {
                if let Some(upvalue_idx) = self.resolve_upvalue(state_idx, name) {
                    (OpCode::GetUpvalue, OpCode::SetUpvalue, upvalue_idx)
                } else {
                    let const_idx = self.identifier_constant(name);
                    (OpCode::GetGlobal, OpCode::SetGlobal, const_idx)
                }
            }
        };

        if can_assign && self.parser.match_token(TokenKind::Equal) {
            self.expression();
            self.emit_op_byte(set_op, arg);
        } else {
            self.emit_op_byte(get_op, arg);
        }
    }

    // ---- Pratt parsing ----

    fn parse_precedence(&mut self, precedence: Precedence) {
        self.parser.advance();
        let can_assign = precedence <= Precedence::Assignment;
        if !self.prefix(self.parser.previous.kind, can_assign) {
            self.parser.error("Expect expression.");
            return;
        }
        while precedence <= rule_precedence(self.parser.current.kind) {
            self.parser.advance();
            self.infix(self.parser.previous.kind);
        }
        if can_assign && self.parser.match_token(TokenKind::Equal) {
            self.parser.error("Invalid assignment target.");
        }
    }

    fn prefix(&mut self, kind: TokenKind, can_assign: bool) -> bool {
        match kind {
            TokenKind::LeftParen => self.grouping(),
            TokenKind::Minus | TokenKind::Bang => self.unary(),
            TokenKind::Number => self.number(),
            TokenKind::String => self.string(),
            TokenKind::True | TokenKind::False | TokenKind::Nil => self.literal(),
            TokenKind::Identifier => self.variable(can_assign),
            _ => return false,
        }
        true
    }

    fn infix(&mut self, kind: TokenKind) {
        match kind {
            TokenKind::Plus
            | TokenKind::Minus
            | TokenKind::Star
            | TokenKind::Slash
            | TokenKind::SlashSlash
            | TokenKind::Percent
            | TokenKind::EqualEqual
            | TokenKind::BangEqual
            | TokenKind::Less
            | TokenKind::LessEqual
            | TokenKind::Greater
            | TokenKind::GreaterEqual => self.binary(),
            TokenKind::And => self.and_(),
            TokenKind::Or => self.or_(),
            TokenKind::LeftParen => self.call(),
            _ => {}
        }
    }

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    fn grouping(&mut self) {
        self.expression();
        self.parser.consume(TokenKind::RightParen, "Expect ')' after expression.");
    }

    fn number(&mut self) {
        let value: f64 = self.parser.previous.lexeme.parse().expect("scanner guarantees a valid number literal");
        self.emit_constant(Value::Number(value));
    }

    fn string(&mut self) {
        let lexeme = self.parser.previous.lexeme;
        let inner = &lexeme[1..lexeme.len() - 1];
        let interned = self.interner.intern(inner.to_string());
        self.emit_constant(Value::Obj(Obj::Str(interned)));
    }

    fn literal(&mut self) {
        match self.parser.previous.kind {
            TokenKind::True => self.emit_op(OpCode::True),
            TokenKind::False => self.emit_op(OpCode::False),
            TokenKind::Nil => self.emit_op(OpCode::Nil),
            _ => unreachable!(),
        }
    }

    fn unary(&mut self) {
        let op_kind = self.parser.previous.kind;
        self.parse_precedence(Precedence::Unary);
        match op_kind {
            TokenKind::Minus => self.emit_op(OpCode::Negate),
            TokenKind::Bang => self.emit_op(OpCode::Not),
            _ => unreachable!(),
        }
    }

    fn binary(&mut self) {
        let op_kind = self.parser.previous.kind;
        self.parse_precedence(rule_precedence(op_kind).next());
        match op_kind {
            TokenKind::Plus => self.emit_op(OpCode::Add),
            TokenKind::Minus => self.emit_op(OpCode::Subtract),
            TokenKind::Star => self.emit_op(OpCode::Multiply),
            TokenKind::Slash => self.emit_op(OpCode::Divide),
            TokenKind::SlashSlash => self.emit_op(OpCode::IntDivide),
            TokenKind::Percent => self.emit_op(OpCode::Modulus),
            TokenKind::EqualEqual => self.emit_op(OpCode::Equal),
            TokenKind::BangEqual => {
                self.emit_op(OpCode::Equal);
                self.emit_op(OpCode::Not);
            }
            TokenKind::Less => self.emit_op(OpCode::Less),
            TokenKind::LessEqual => {
                self.emit_op(OpCode::Greater);
                self.emit_op(OpCode::Not);
            }
            TokenKind::Greater => self.emit_op(OpCode::Greater),
            TokenKind::GreaterEqual => {
                self.emit_op(OpCode::Less);
                self.emit_op(OpCode::Not);
            }
            _ => unreachable!(),
        }
    }

    fn and_(&mut self) {
        let end_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::And);
        self.patch_jump(end_jump);
    }

    fn or_(&mut self) {
        let else_jump = self.emit_jump(OpCode::JumpIfFalse);
        let end_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(else_jump);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::Or);
        self.patch_jump(end_jump);
    }

    fn variable(&mut self, can_assign: bool) {
        let name = self.parser.previous.lexeme;
        self.named_variable(name, can_assign);
    }

    fn call(&mut self) {
        let argc = self.argument_list();
        self.emit_op_byte(OpCode::Call, argc);
    }

    fn argument_list(&mut self) -> u8 {
        let mut count: u32 = 0;
        if !self.parser.check(TokenKind::RightParen) {
            loop {
                self.expression();
                if count == 255 {
                    self.parser.error("Can't have more than 255 arguments.");
                }
                count += 1;
                if !self.parser.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.parser.consume(TokenKind::RightParen, "Expect ')' after arguments.");
        count as u8
    }

    // ---- declarations & statements ----

    fn declaration(&mut self) {
        if self.parser.match_token(TokenKind::Fun) {
            self.fun_declaration();
        } else if self.parser.match_token(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.statement();
        }
        if self.parser.panic_mode {
            self.parser.synchronize();
        }
    }

    fn fun_declaration(&mut self) {
        let global = self.parse_variable("Expect function name.");
        self.mark_initialized();
        self.function(FunctionKind::Function);
        self.define_variable(global);
    }

    fn function(&mut self, kind: FunctionKind) {
        let name = self.interner.intern(self.parser.previous.lexeme.to_string());
        self.states.push(FunctionState::new(kind, Some(name)));
        self.begin_scope();

        self.parser.consume(TokenKind::LeftParen, "Expect '(' after function name.");
        if !self.parser.check(TokenKind::RightParen) {
            loop {
                self.current_state_mut().function.arity += 1;
                if self.current_state().function.arity > 255 {
                    self.parser.error_at_current("Can't have more than 255 parameters.");
                }
                let param = self.parse_variable("Expect parameter name.");
                self.define_variable(param);
                if !self.parser.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.parser.consume(TokenKind::RightParen, "Expect ')' after parameters.");
        self.parser.consume(TokenKind::LeftBrace, "Expect '{' before function body.");
        self.block();

        self.emit_return();
        let state = self.states.pop().unwrap();
        let upvalues = state.upvalues;
        let mut function = state.function;
        function.upvalue_count = upvalues.len();

        let const_idx = self.make_constant(Value::Obj(Obj::Function(Rc::new(function))));
        self.emit_op_byte(OpCode::Closure, const_idx);
        for uv in &upvalues {
            self.emit_byte(if uv.is_local { 1 } else { 0 });
            self.emit_byte(uv.index);
        }
    }

    fn var_declaration(&mut self) {
        let global = self.parse_variable("Expect variable name.");
        if self.parser.match_token(TokenKind::Equal) {
            self.expression();
        } else {
            self.emit_op(OpCode::Nil);
        }
        self.parser.consume(TokenKind::Semicolon, "Expect ';' after variable declaration.");
        self.define_variable(global);
    }

    fn block(&mut self) {
        while !self.parser.check(TokenKind::RightBrace) && !self.parser.check(TokenKind::Eof) {
            self.declaration();
        }
        self.parser.consume(TokenKind::RightBrace, "Expect '}' after block.");
    }

    fn statement(&mut self) {
        if self.parser.match_token(TokenKind::Print) {
            self.print_statement();
        } else if self.parser.match_token(TokenKind::If) {
            self.if_statement();
        } else if self.parser.match_token(TokenKind::While) {
            self.while_statement();
        } else if self.parser.match_token(TokenKind::For) {
            self.for_statement();
        } else if self.parser.match_token(TokenKind::Return) {
            self.return_statement();
        } else if self.parser.match_token(TokenKind::LeftBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else {
            self.expression_statement();
        }
    }

    fn print_statement(&mut self) {
        self.expression();
        self.parser.consume(TokenKind::Semicolon, "Expect ';' after value.");
        self.emit_op(OpCode::Print);
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.parser.consume(TokenKind::Semicolon, "Expect ';' after expression.");
        self.emit_op(OpCode::Pop);
    }

    fn if_statement(&mut self) {
        self.parser.consume(TokenKind::LeftParen, "Expect '(' after 'if'.");
        self.expression();
        self.parser.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let then_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();

        let else_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(then_jump);
        self.emit_op(OpCode::Pop);

        if self.parser.match_token(TokenKind::Else) {
            self.statement();
        }
        self.patch_jump(else_jump);
    }

    fn while_statement(&mut self) {
        let loop_start = self.current_chunk_mut().code.len();
        self.parser.consume(TokenKind::LeftParen, "Expect '(' after 'while'.");
        self.expression();
        self.parser.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let exit_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();
        self.emit_loop(loop_start);

        self.patch_jump(exit_jump);
        self.emit_op(OpCode::Pop);
    }

    fn for_statement(&mut self) {
        self.begin_scope();
        self.parser.consume(TokenKind::LeftParen, "Expect '(' after 'for'.");

        if self.parser.match_token(TokenKind::Semicolon) {
            // no initializer
        } else if self.parser.match_token(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.expression_statement();
        }

        let mut loop_start = self.current_chunk_mut().code.len();
        let mut exit_jump: Option<usize> = None;
        if !self.parser.match_token(TokenKind::Semicolon) {
            self.expression();
            self.parser.consume(TokenKind::Semicolon, "Expect ';' after loop condition.");
            exit_jump = Some(self.emit_jump(OpCode::JumpIfFalse));
            self.emit_op(OpCode::Pop);
        }

        if !self.parser.check(TokenKind::RightParen) {
            let body_jump = self.emit_jump(OpCode::Jump);
            let increment_start = self.current_chunk_mut().code.len();
            self.expression();
            self.emit_op(OpCode::Pop);
            self.parser.consume(TokenKind::RightParen, "Expect ')' after for clauses.");

            self.emit_loop(loop_start);
            loop_start = increment_start;
            self.patch_jump(body_jump);
        }

        self.statement();
        self.emit_loop(loop_start);

        if let Some(exit) = exit_jump {
            self.patch_jump(exit);
            self.emit_op(OpCode::Pop);
        }

        self.end_scope();
    }

    fn return_statement(&mut self) {
        if self.current_state().kind == FunctionKind::Script {
            self.parser.error("Can't return from top-level code.");
        }
        if self.parser.match_token(TokenKind::Semicolon) {
            self.emit_return();
        } else {
            self.expression();
            self.parser.consume(TokenKind::Semicolon, "Expect ';' after return value.");
            self.emit_op(OpCode::Return);
        }
    }
}

/// Compiles `source` into a top-level script Function, or `Err(())` if any
/// compile error was reported. Errors are printed to stderr as they're
/// found; `compile` itself carries no diagnostic payload beyond pass/fail,
/// matching spec 7 ("string messages are the contract").
pub fn compile(source: &str, interner: &mut Interner) -> Result<Rc<ObjFunction>, ()> {
    let parser = Parser::new(source);
    let mut compiler =
        Compiler { parser, states: vec![FunctionState::new(FunctionKind::Script, None)], interner };

    while !compiler.parser.check(TokenKind::Eof) {
        compiler.declaration();
    }
    compiler.parser.consume(TokenKind::Eof, "Expect end of expression.");

    compiler.emit_return();
    let had_error = compiler.parser.had_error;
    let state = compiler.states.pop().unwrap();
    let mut function = state.function;
    function.upvalue_count = state.upvalues.len();

    if had_error {
        Err(())
    } else {
        Ok(Rc::new(function))
    }
}
