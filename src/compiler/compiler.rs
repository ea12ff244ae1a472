//! The single-pass Pratt-parser compiler: turns a token stream directly
//! into bytecode, with no intermediate AST. One [`FunctionState`] exists
//! per function currently being compiled; `Compiler::states` is that stack,
//! generalising the specification's "stack of these, linked via enclosing
//! pointer" as a `Vec` indexed from outermost (index 0, the script) to
//! innermost (the function currently being emitted into).

use crate::chunk::Chunk;
use crate::gc::Gc;
use crate::object::{FunctionObj, ObjRef};
use crate::table::Table;
use crate::value::Value;

use super::rules::{get_rule, Precedence};
use super::scanner::{Scanner, Token, TokenKind};
use super::syntax::{ErrorAt, Syntax};
use crate::common::opcode::Opcode;

const MAX_LOCALS: usize = 256;
const MAX_UPVALUES: usize = 256;
const MAX_ARGS: usize = 255;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum FunctionKind {
    Script,
    Function,
    Method,
    Initializer,
}

struct LocalVar<'src> {
    name: &'src str,
    /// `-1` is the "uninitialized" sentinel: the local has been declared
    /// but its initializer hasn't finished compiling yet, so referencing it
    /// in that initializer is a compile error.
    depth: i32,
    is_captured: bool,
}

#[derive(Clone, Copy)]
struct UpvalueRef {
    index: u8,
    is_local: bool,
}

struct FunctionState<'src> {
    name: Option<String>,
    arity: u8,
    kind: FunctionKind,
    chunk: Chunk,
    locals: Vec<LocalVar<'src>>,
    scope_depth: usize,
    upvalues: Vec<UpvalueRef>,
}

impl<'src> FunctionState<'src> {
    fn new(kind: FunctionKind, name: Option<String>) -> FunctionState<'src> {
        let slot_zero_name = match kind {
            FunctionKind::Method | FunctionKind::Initializer => "this",
            _ => "",
        };
        FunctionState {
            name,
            arity: 0,
            kind,
            chunk: Chunk::new(),
            locals: vec![LocalVar { name: slot_zero_name, depth: 0, is_captured: false }],
            scope_depth: 0,
            upvalues: Vec::new(),
        }
    }
}

struct ClassState {
    has_superclass: bool,
}

struct Parser<'src> {
    scanner: Scanner<'src>,
    previous: Token<'src>,
    current: Token<'src>,
    had_error: bool,
    panic_mode: bool,
    errors: Vec<Syntax>,
}

impl<'src> Parser<'src> {
    fn new(source: &'src str) -> Parser<'src> {
        let dummy = Token { kind: TokenKind::Eof, lexeme: "", line: 0 };
        Parser {
            scanner: Scanner::new(source),
            previous: dummy,
            current: dummy,
            had_error: false,
            panic_mode: false,
            errors: Vec::new(),
        }
    }

    fn advance(&mut self) {
        self.previous = self.current;
        loop {
            self.current = self.scanner.scan_token();
            if self.current.kind != TokenKind::Error {
                break;
            }
            let message = self.current.lexeme.to_string();
            self.error_at_current(&message);
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
        let at = if token.kind == TokenKind::Eof { ErrorAt::End } else { ErrorAt::Token(token.lexeme.to_string()) };
        self.errors.push(Syntax::new(token.line, at, message));
    }

    /// Advances past tokens until just after a semicolon or at a
    /// statement-starting keyword, suppressing cascading errors from the
    /// same malformed statement.
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
}

/// The compiler proper. `'src` ties every token's borrowed lexeme to the
/// source text passed to [`compile`].
pub struct Compiler<'src> {
    parser: Parser<'src>,
    states: Vec<FunctionState<'src>>,
    classes: Vec<ClassState>,
}

/// Compiles `source` into a top-level script function, or the list of
/// compile errors encountered. Mirrors the specification's contract: a
/// well-formed program always yields a function with no errors; a
/// malformed one yields at least one error and no function.
///
/// `globals` and `init_string` are the VM's own roots: a collection
/// triggered mid-compile (most reliably under `CORVID_GC_STRESS`) has to
/// keep them alive too, since they're reachable from the running VM even
/// though the compiler never touches them itself.
pub fn compile(source: &str, gc: &mut Gc, globals: &Table, init_string: ObjRef) -> Result<ObjRef, Vec<Syntax>> {
    let mut compiler = Compiler {
        parser: Parser::new(source),
        states: vec![FunctionState::new(FunctionKind::Script, None)],
        classes: Vec::new(),
    };

    compiler.parser.advance();
    while !compiler.parser.match_token(TokenKind::Eof) {
        compiler.declaration(gc);
        compiler.maybe_collect(gc, globals, init_string);
    }

    let had_error = compiler.parser.had_error;
    let function = compiler.end_function(gc);

    if had_error {
        Err(compiler.parser.errors)
    } else {
        Ok(function)
    }
}

impl<'src> Compiler<'src> {
    /// Runs a collection if the heap has grown enough to warrant one. The
    /// compiler's own roots are the constants pools of every function
    /// currently being compiled (the `states` stack, outermost to
    /// innermost), since a constant is the only way a compile-time
    /// allocation (an interned string or a nested function) becomes
    /// reachable from Rust-visible state. But the VM this function will
    /// hand its result to is still alive and reachable through `globals`
    /// and `init_string`, so those have to be marked too or a collection
    /// during compilation can free state the VM depends on.
    fn maybe_collect(&self, gc: &mut Gc, globals: &Table, init_string: ObjRef) {
        if !gc.should_collect() {
            return;
        }
        for state in &self.states {
            for constant in &state.chunk.constants {
                gc.mark_value(*constant);
            }
        }
        for (key, value) in globals.iter() {
            gc.mark_object(key);
            gc.mark_value(value);
        }
        gc.mark_object(init_string);
        gc.trace_references();
        gc.prune_interned_strings();
        gc.sweep();
    }

    fn current(&mut self) -> &mut FunctionState<'src> {
        self.states.last_mut().expect("at least the script function state is always present")
    }

    fn chunk(&mut self) -> &mut Chunk {
        &mut self.current().chunk
    }

    fn line(&self) -> usize {
        self.parser.previous.line
    }

    // ---- emission helpers -------------------------------------------------

    fn emit_byte(&mut self, byte: u8) {
        let line = self.line();
        self.chunk().write(byte, line);
    }

    fn emit_opcode(&mut self, op: Opcode) {
        let line = self.line();
        self.chunk().write_opcode(op, line);
    }

    fn emit_two(&mut self, op: Opcode, byte: u8) {
        self.emit_opcode(op);
        self.emit_byte(byte);
    }

    fn emit_constant(&mut self, value: Value) {
        let line = self.line();
        self.chunk().write_constant(value, line);
    }

    fn emit_return(&mut self) {
        match self.current().kind {
            FunctionKind::Initializer => {
                // `init` always returns the receiver, which lives in slot 0.
                self.emit_two(Opcode::GetLocal, 0);
            }
            _ => self.emit_opcode(Opcode::Nil),
        }
        self.emit_opcode(Opcode::Return);
    }

    fn emit_jump(&mut self, op: Opcode) -> usize {
        let line = self.line();
        self.chunk().emit_jump_placeholder(op, line)
    }

    fn patch_jump(&mut self, placeholder: usize) {
        if let Err(message) = self.chunk().patch_jump(placeholder) {
            self.parser.error(&message);
        }
    }

    fn emit_loop(&mut self, loop_start: usize) {
        let line = self.line();
        if let Err(message) = self.chunk().emit_loop(loop_start, line) {
            self.parser.error(&message);
        }
    }

    fn identifier_constant(&mut self, gc: &mut Gc, name: &str) -> usize {
        let interned = gc.intern(name);
        self.chunk().add_constant(Value::Object(interned))
    }

    fn emit_indexed(&mut self, short: Opcode, long: Opcode, index: usize) {
        let line = self.line();
        self.chunk().write_indexed(short, long, index, line);
    }

    // ---- scope & locals -----------------------------------------------------

    fn begin_scope(&mut self) {
        self.current().scope_depth += 1;
    }

    /// Pops every local declared in the scope just ended. Locals that were
    /// captured by a nested closure are hoisted with `CloseUpvalue` instead
    /// of a plain `Pop`, since their value must outlive this stack frame.
    fn end_scope(&mut self) {
        self.current().scope_depth -= 1;
        let depth = self.current().scope_depth as i32;
        while let Some(local) = self.current().locals.last() {
            if local.depth <= depth {
                break;
            }
            if local.is_captured {
                self.emit_opcode(Opcode::CloseUpvalue);
            } else {
                self.emit_opcode(Opcode::Pop);
            }
            self.current().locals.pop();
        }
    }

    fn add_local(&mut self, name: &'src str) {
        if self.current().locals.len() >= MAX_LOCALS {
            self.parser.error("Too many local variables in function.");
            return;
        }
        self.current().locals.push(LocalVar { name, depth: -1, is_captured: false });
    }

    fn mark_initialized(&mut self) {
        if self.current().scope_depth == 0 {
            return;
        }
        let depth = self.current().scope_depth as i32;
        if let Some(local) = self.current().locals.last_mut() {
            local.depth = depth;
        }
    }

    fn declare_variable(&mut self, name: &'src str) {
        if self.current().scope_depth == 0 {
            return;
        }
        let depth = self.current().scope_depth as i32;
        for local in self.current().locals.iter().rev() {
            if local.depth != -1 && local.depth < depth {
                break;
            }
            if local.name == name {
                self.parser.error("Already a variable with this name in this scope.");
                return;
            }
        }
        self.add_local(name);
    }

    fn resolve_local(&self, state_index: usize, name: &str) -> Result<Option<u8>, &'static str> {
        let locals = &self.states[state_index].locals;
        for (i, local) in locals.iter().enumerate().rev() {
            if local.name == name {
                if local.depth == -1 {
                    return Err("Can't read local variable in its own initializer.");
                }
                return Ok(Some(i as u8));
            }
        }
        Ok(None)
    }

    fn add_upvalue(&mut self, state_index: usize, index: u8, is_local: bool) -> Option<u8> {
        let upvalues = &mut self.states[state_index].upvalues;
        for (i, existing) in upvalues.iter().enumerate() {
            if existing.index == index && existing.is_local == is_local {
                return Some(i as u8);
            }
        }
        if upvalues.len() >= MAX_UPVALUES {
            self.parser.error("Too many closure variables in function.");
            return None;
        }
        upvalues.push(UpvalueRef { index, is_local });
        Some((upvalues.len() - 1) as u8)
    }

    fn resolve_upvalue(&mut self, state_index: usize, name: &str) -> Option<u8> {
        if state_index == 0 {
            return None;
        }
        match self.resolve_local(state_index - 1, name) {
            Ok(Some(local_index)) => {
                self.states[state_index - 1].locals[local_index as usize].is_captured = true;
                self.add_upvalue(state_index, local_index, true)
            }
            Ok(None) => {
                let upvalue = self.resolve_upvalue(state_index - 1, name)?;
                self.add_upvalue(state_index, upvalue, false)
            }
            Err(message) => {
                self.parser.error(message);
                None
            }
        }
    }

    // ---- function compilation ------------------------------------------

    fn begin_function(&mut self, kind: FunctionKind, name: Option<String>) {
        self.states.push(FunctionState::new(kind, name));
    }

    fn end_function(&mut self, gc: &mut Gc) -> ObjRef {
        self.emit_return();
        let state = self.states.pop().expect("begin_function pushed a matching state");
        let name = match &state.name {
            Some(name) => Some(gc.intern(name)),
            None => None,
        };
        gc.alloc_function(FunctionObj {
            name,
            arity: state.arity,
            upvalue_count: state.upvalues.len(),
            chunk: state.chunk,
        })
    }

    fn function(&mut self, gc: &mut Gc, kind: FunctionKind, name: &str) {
        self.begin_function(kind, Some(name.to_string()));
        self.begin_scope();

        self.parser.consume(TokenKind::LeftParen, "Expect '(' after function name.");
        if !self.parser.check(TokenKind::RightParen) {
            loop {
                if self.current().arity as usize >= MAX_ARGS {
                    self.parser.error_at_current("Can't have more than 255 parameters.");
                }
                self.current().arity += 1;
                let constant = self.parse_variable(gc, "Expect parameter name.");
                self.define_variable(constant);
                if !self.parser.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.parser.consume(TokenKind::RightParen, "Expect ')' after parameters.");
        self.parser.consume(TokenKind::LeftBrace, "Expect '{' before function body.");
        self.block(gc);

        let state_index = self.states.len() - 1;
        let upvalues = std::mem::take(&mut self.states[state_index].upvalues);
        let function = self.end_function(gc);

        // `Closure` has only a 1-byte operand (see the opcode catalogue); a
        // program that defines more than 255 functions is out of scope, the
        // same limit the reference implementation accepts.
        let index = self.chunk().add_constant(Value::Object(function));
        if index > u8::MAX as usize {
            self.parser.error("Too many functions in one compilation unit.");
        }
        self.emit_two(Opcode::Closure, index as u8);
        for upvalue in upvalues {
            self.emit_byte(if upvalue.is_local { 1 } else { 0 });
            self.emit_byte(upvalue.index);
        }
    }

    // ---- declarations -----------------------------------------------------

    fn declaration(&mut self, gc: &mut Gc) {
        if self.parser.match_token(TokenKind::Class) {
            self.class_declaration(gc);
        } else if self.parser.match_token(TokenKind::Fun) {
            self.fun_declaration(gc);
        } else if self.parser.match_token(TokenKind::Var) {
            self.var_declaration(gc);
        } else {
            self.statement(gc);
        }

        if self.parser.panic_mode {
            self.parser.synchronize();
        }
    }

    fn parse_variable(&mut self, gc: &mut Gc, message: &str) -> usize {
        self.parser.consume(TokenKind::Identifier, message);
        let name = self.parser.previous.lexeme;
        self.declare_variable(name);
        if self.current().scope_depth > 0 {
            return 0;
        }
        self.identifier_constant(gc, name)
    }

    fn define_variable(&mut self, global: usize) {
        if self.current().scope_depth > 0 {
            self.mark_initialized();
            return;
        }
        self.emit_indexed(Opcode::DefineGlobal, Opcode::DefineGlobalLong, global);
    }

    fn var_declaration(&mut self, gc: &mut Gc) {
        let global = self.parse_variable(gc, "Expect variable name.");
        if self.parser.match_token(TokenKind::Equal) {
            self.expression(gc);
        } else {
            self.emit_opcode(Opcode::Nil);
        }
        self.parser.consume(TokenKind::Semicolon, "Expect ';' after variable declaration.");
        self.define_variable(global);
    }

    fn fun_declaration(&mut self, gc: &mut Gc) {
        let global = self.parse_variable(gc, "Expect function name.");
        self.mark_initialized();
        let name = self.parser.previous.lexeme.to_string();
        self.function(gc, FunctionKind::Function, &name);
        self.define_variable(global);
    }

    fn class_declaration(&mut self, gc: &mut Gc) {
        self.parser.consume(TokenKind::Identifier, "Expect class name.");
        let class_name = self.parser.previous.lexeme;
        let name_constant = self.identifier_constant(gc, class_name);
        self.declare_variable(class_name);

        self.emit_indexed(Opcode::Class, Opcode::ClassLong, name_constant);
        self.define_variable(name_constant);

        self.classes.push(ClassState { has_superclass: false });

        if self.parser.match_token(TokenKind::Less) {
            self.parser.consume(TokenKind::Identifier, "Expect superclass name.");
            let superclass_name = self.parser.previous.lexeme;
            if superclass_name == class_name {
                self.parser.error("A class can't inherit from itself.");
            }
            self.variable_named(gc, superclass_name, false);

            self.begin_scope();
            self.add_local("super");
            self.mark_initialized();

            self.variable_named(gc, class_name, false);
            self.emit_opcode(Opcode::Inherit);
            self.classes.last_mut().unwrap().has_superclass = true;
        }

        self.variable_named(gc, class_name, false);
        self.parser.consume(TokenKind::LeftBrace, "Expect '{' before class body.");
        while !self.parser.check(TokenKind::RightBrace) && !self.parser.check(TokenKind::Eof) {
            self.method(gc);
        }
        self.parser.consume(TokenKind::RightBrace, "Expect '}' after class body.");
        self.emit_opcode(Opcode::Pop); // the class itself, pushed by `variable_named` above

        let class_state = self.classes.pop().unwrap();
        if class_state.has_superclass {
            self.end_scope();
        }
    }

    fn method(&mut self, gc: &mut Gc) {
        self.parser.consume(TokenKind::Identifier, "Expect method name.");
        let name = self.parser.previous.lexeme;
        let constant = self.identifier_constant(gc, name);
        let kind = if name == "init" { FunctionKind::Initializer } else { FunctionKind::Method };
        let owned_name = name.to_string();
        self.function(gc, kind, &owned_name);
        self.emit_indexed(Opcode::Method, Opcode::MethodLong, constant);
    }

    // ---- statements -------------------------------------------------------

    fn statement(&mut self, gc: &mut Gc) {
        if self.parser.match_token(TokenKind::Print) {
            self.print_statement(gc);
        } else if self.parser.match_token(TokenKind::If) {
            self.if_statement(gc);
        } else if self.parser.match_token(TokenKind::Return) {
            self.return_statement(gc);
        } else if self.parser.match_token(TokenKind::While) {
            self.while_statement(gc);
        } else if self.parser.match_token(TokenKind::For) {
            self.for_statement(gc);
        } else if self.parser.match_token(TokenKind::LeftBrace) {
            self.begin_scope();
            self.block(gc);
            self.end_scope();
        } else {
            self.expression_statement(gc);
        }
    }

    fn block(&mut self, gc: &mut Gc) {
        while !self.parser.check(TokenKind::RightBrace) && !self.parser.check(TokenKind::Eof) {
            self.declaration(gc);
        }
        self.parser.consume(TokenKind::RightBrace, "Expect '}' after block.");
    }

    fn print_statement(&mut self, gc: &mut Gc) {
        self.expression(gc);
        self.parser.consume(TokenKind::Semicolon, "Expect ';' after value.");
        self.emit_opcode(Opcode::Print);
    }

    fn expression_statement(&mut self, gc: &mut Gc) {
        self.expression(gc);
        self.parser.consume(TokenKind::Semicolon, "Expect ';' after expression.");
        self.emit_opcode(Opcode::Pop);
    }

    fn if_statement(&mut self, gc: &mut Gc) {
        self.parser.consume(TokenKind::LeftParen, "Expect '(' after 'if'.");
        self.expression(gc);
        self.parser.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let then_jump = self.emit_jump(Opcode::JumpIfFalse);
        self.emit_opcode(Opcode::Pop);
        self.statement(gc);

        let else_jump = self.emit_jump(Opcode::Jump);
        self.patch_jump(then_jump);
        self.emit_opcode(Opcode::Pop);

        if self.parser.match_token(TokenKind::Else) {
            self.statement(gc);
        }
        self.patch_jump(else_jump);
    }

    fn while_statement(&mut self, gc: &mut Gc) {
        let loop_start = self.chunk().code.len();
        self.parser.consume(TokenKind::LeftParen, "Expect '(' after 'while'.");
        self.expression(gc);
        self.parser.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let exit_jump = self.emit_jump(Opcode::JumpIfFalse);
        self.emit_opcode(Opcode::Pop);
        self.statement(gc);
        self.emit_loop(loop_start);

        self.patch_jump(exit_jump);
        self.emit_opcode(Opcode::Pop);
    }

    fn for_statement(&mut self, gc: &mut Gc) {
        self.begin_scope();
        self.parser.consume(TokenKind::LeftParen, "Expect '(' after 'for'.");

        if self.parser.match_token(TokenKind::Semicolon) {
            // no initializer
        } else if self.parser.match_token(TokenKind::Var) {
            self.var_declaration(gc);
        } else {
            self.expression_statement(gc);
        }

        let mut loop_start = self.chunk().code.len();
        let mut exit_jump: Option<usize> = None;
        if !self.parser.match_token(TokenKind::Semicolon) {
            self.expression(gc);
            self.parser.consume(TokenKind::Semicolon, "Expect ';' after loop condition.");
            exit_jump = Some(self.emit_jump(Opcode::JumpIfFalse));
            self.emit_opcode(Opcode::Pop);
        }

        if !self.parser.match_token(TokenKind::RightParen) {
            let body_jump = self.emit_jump(Opcode::Jump);
            let increment_start = self.chunk().code.len();
            self.expression(gc);
            self.emit_opcode(Opcode::Pop);
            self.parser.consume(TokenKind::RightParen, "Expect ')' after for clauses.");

            self.emit_loop(loop_start);
            loop_start = increment_start;
            self.patch_jump(body_jump);
        }

        self.statement(gc);
        self.emit_loop(loop_start);

        if let Some(exit_jump) = exit_jump {
            self.patch_jump(exit_jump);
            self.emit_opcode(Opcode::Pop);
        }

        self.end_scope();
    }

    fn return_statement(&mut self, gc: &mut Gc) {
        if self.current().kind == FunctionKind::Script {
            self.parser.error("Can't return from top-level code.");
        }
        if self.parser.match_token(TokenKind::Semicolon) {
            self.emit_return();
        } else {
            if self.current().kind == FunctionKind::Initializer {
                self.parser.error("Can't return a value from an initializer.");
            }
            self.expression(gc);
            self.parser.consume(TokenKind::Semicolon, "Expect ';' after return value.");
            self.emit_opcode(Opcode::Return);
        }
    }

    // ---- expressions --------------------------------------------------------

    fn expression(&mut self, gc: &mut Gc) {
        self.parse_precedence(gc, Precedence::Assignment);
    }

    fn parse_precedence(&mut self, gc: &mut Gc, precedence: Precedence) {
        self.parser.advance();
        let prefix_rule = get_rule(self.parser.previous.kind).prefix;
        let prefix = match prefix_rule {
            Some(rule) => rule,
            None => {
                self.parser.error("Expect expression.");
                return;
            }
        };

        let can_assign = precedence <= Precedence::Assignment;
        prefix(self, gc, can_assign);

        while precedence <= get_rule(self.parser.current.kind).precedence {
            self.parser.advance();
            if let Some(infix) = get_rule(self.parser.previous.kind).infix {
                infix(self, gc, can_assign);
            }
        }

        if can_assign && self.parser.match_token(TokenKind::Equal) {
            self.parser.error("Invalid assignment target.");
        }
    }

    pub(crate) fn number(&mut self, _gc: &mut Gc, _can_assign: bool) {
        let lexeme = self.parser.previous.lexeme;
        match lexeme.parse::<f64>() {
            Ok(value) => self.emit_constant(Value::Number(value)),
            Err(_) => self.parser.error("Invalid number literal."),
        }
    }

    pub(crate) fn string(&mut self, gc: &mut Gc, _can_assign: bool) {
        let lexeme = self.parser.previous.lexeme;
        let contents = &lexeme[1..lexeme.len() - 1];
        let interned = gc.intern(contents);
        self.emit_constant(Value::Object(interned));
    }

    pub(crate) fn literal(&mut self, _gc: &mut Gc, _can_assign: bool) {
        match self.parser.previous.kind {
            TokenKind::False => self.emit_opcode(Opcode::False),
            TokenKind::Nil => self.emit_opcode(Opcode::Nil),
            TokenKind::True => self.emit_opcode(Opcode::True),
            _ => unreachable!("literal() only dispatched for false/nil/true"),
        }
    }

    pub(crate) fn grouping(&mut self, gc: &mut Gc, _can_assign: bool) {
        self.expression(gc);
        self.parser.consume(TokenKind::RightParen, "Expect ')' after expression.");
    }

    pub(crate) fn unary(&mut self, gc: &mut Gc, _can_assign: bool) {
        let operator = self.parser.previous.kind;
        self.parse_precedence(gc, Precedence::Unary);
        match operator {
            TokenKind::Minus => self.emit_opcode(Opcode::Negate),
            TokenKind::Bang => self.emit_opcode(Opcode::Not),
            _ => unreachable!("unary() only dispatched for -/!"),
        }
    }

    pub(crate) fn binary(&mut self, gc: &mut Gc, _can_assign: bool) {
        let operator = self.parser.previous.kind;
        let rule = get_rule(operator);
        self.parse_precedence(gc, rule.precedence.next());
        match operator {
            TokenKind::Plus => self.emit_opcode(Opcode::Add),
            TokenKind::Minus => self.emit_opcode(Opcode::Subtract),
            TokenKind::Star => self.emit_opcode(Opcode::Multiply),
            TokenKind::Slash => self.emit_opcode(Opcode::Divide),
            TokenKind::EqualEqual => self.emit_opcode(Opcode::Equal),
            TokenKind::BangEqual => self.emit_opcode(Opcode::NotEqual),
            TokenKind::Greater => self.emit_opcode(Opcode::Greater),
            TokenKind::GreaterEqual => self.emit_opcode(Opcode::GreaterEqual),
            TokenKind::Less => self.emit_opcode(Opcode::Less),
            TokenKind::LessEqual => self.emit_opcode(Opcode::LessEqual),
            _ => unreachable!("binary() only dispatched for binary operators"),
        }
    }

    pub(crate) fn and(&mut self, gc: &mut Gc, _can_assign: bool) {
        let end_jump = self.emit_jump(Opcode::JumpIfFalse);
        self.emit_opcode(Opcode::Pop);
        self.parse_precedence(gc, Precedence::And);
        self.patch_jump(end_jump);
    }

    pub(crate) fn or(&mut self, gc: &mut Gc, _can_assign: bool) {
        let else_jump = self.emit_jump(Opcode::JumpIfFalse);
        let end_jump = self.emit_jump(Opcode::Jump);
        self.patch_jump(else_jump);
        self.emit_opcode(Opcode::Pop);
        self.parse_precedence(gc, Precedence::Or);
        self.patch_jump(end_jump);
    }

    pub(crate) fn call(&mut self, gc: &mut Gc, _can_assign: bool) {
        let argc = self.argument_list(gc);
        self.emit_two(Opcode::Call, argc);
    }

    fn argument_list(&mut self, gc: &mut Gc) -> u8 {
        let mut argc = 0u8;
        if !self.parser.check(TokenKind::RightParen) {
            loop {
                self.expression(gc);
                if argc as usize == MAX_ARGS {
                    self.parser.error("Can't have more than 255 arguments.");
                } else {
                    argc += 1;
                }
                if !self.parser.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.parser.consume(TokenKind::RightParen, "Expect ')' after arguments.");
        argc
    }

    pub(crate) fn dot(&mut self, gc: &mut Gc, can_assign: bool) {
        self.parser.consume(TokenKind::Identifier, "Expect property name after '.'.");
        let name = self.parser.previous.lexeme;
        let constant = self.identifier_constant(gc, name);

        if can_assign && self.parser.match_token(TokenKind::Equal) {
            self.expression(gc);
            self.emit_indexed(Opcode::SetProperty, Opcode::SetPropertyLong, constant);
        } else if self.parser.match_token(TokenKind::LeftParen) {
            let argc = self.argument_list(gc);
            self.emit_indexed(Opcode::Invoke, Opcode::InvokeLong, constant);
            self.emit_byte(argc);
        } else {
            self.emit_indexed(Opcode::GetProperty, Opcode::GetPropertyLong, constant);
        }
    }

    pub(crate) fn this(&mut self, gc: &mut Gc, _can_assign: bool) {
        if self.classes.is_empty() {
            self.parser.error("Can't use 'this' outside of a class.");
            return;
        }
        self.variable_named(gc, "this", false);
    }

    pub(crate) fn super_(&mut self, gc: &mut Gc, _can_assign: bool) {
        match self.classes.last() {
            None => self.parser.error("Can't use 'super' outside of a class."),
            Some(class) if !class.has_superclass => self.parser.error("Can't use 'super' in a class with no superclass."),
            _ => {}
        }

        self.parser.consume(TokenKind::Dot, "Expect '.' after 'super'.");
        self.parser.consume(TokenKind::Identifier, "Expect superclass method name.");
        let name = self.parser.previous.lexeme;
        let constant = self.identifier_constant(gc, name);

        self.variable_named(gc, "this", false);
        if self.parser.match_token(TokenKind::LeftParen) {
            let argc = self.argument_list(gc);
            self.variable_named(gc, "super", false);
            self.emit_indexed(Opcode::SuperInvoke, Opcode::SuperInvokeLong, constant);
            self.emit_byte(argc);
        } else {
            self.variable_named(gc, "super", false);
            self.emit_indexed(Opcode::GetSuper, Opcode::GetSuperLong, constant);
        }
    }

    pub(crate) fn variable(&mut self, gc: &mut Gc, can_assign: bool) {
        let name = self.parser.previous.lexeme;
        self.variable_named(gc, name, can_assign);
    }

    fn variable_named(&mut self, gc: &mut Gc, name: &str, can_assign: bool) {
        let state_index = self.states.len() - 1;
        let local = match self.resolve_local(state_index, name) {
            Ok(local) => local,
            Err(message) => {
                self.parser.error(message);
                None
            }
        };

        let (get_short, get_long, set_short, set_long, arg) = if let Some(index) = local {
            (Opcode::GetLocal, Opcode::GetLocal, Opcode::SetLocal, Opcode::SetLocal, index as usize)
        } else if let Some(index) = self.resolve_upvalue(state_index, name) {
            (Opcode::GetUpvalue, Opcode::GetUpvalue, Opcode::SetUpvalue, Opcode::SetUpvalue, index as usize)
        } else {
            let index = self.identifier_constant(gc, name);
            (Opcode::GetGlobal, Opcode::GetGlobalLong, Opcode::SetGlobal, Opcode::SetGlobalLong, index)
        };

        if can_assign && self.parser.match_token(TokenKind::Equal) {
            self.expression(gc);
            self.emit_indexed(set_short, set_long, arg);
        } else {
            self.emit_indexed(get_short, get_long, arg);
        }
    }
}
