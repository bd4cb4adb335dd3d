use crate::error::CompileError;
use crate::scanner::token::{Span, Token, TokenKind};
use crate::vm::chunk::{Chunk, Constant, OpCode};

/// Expression precedence levels, lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    None,
    Assignment, // =
    Or,         // or
    And,        // and
    Equality,   // == !=
    Comparison, // < > <= >=
    Term,       // + -
    Factor,     // * /
    Unary,      // ! -
    Call,       // . ()
    Primary,
}

impl Precedence {
    fn next(self) -> Self {
        match self {
            Self::None => Self::Assignment,
            Self::Assignment => Self::Or,
            Self::Or => Self::And,
            Self::And => Self::Equality,
            Self::Equality => Self::Comparison,
            Self::Comparison => Self::Term,
            Self::Term => Self::Factor,
            Self::Factor => Self::Unary,
            Self::Unary => Self::Call,
            Self::Call | Self::Primary => Self::Primary,
        }
    }
}

type ParseFn = fn(&mut Compiler, bool) -> Result<(), CompileError>;

/// One row of the Pratt rule table.
struct Rule {
    prefix: Option<ParseFn>,
    infix: Option<ParseFn>,
    precedence: Precedence,
}

impl Rule {
    const fn new(prefix: Option<ParseFn>, infix: Option<ParseFn>, precedence: Precedence) -> Self {
        Self {
            prefix,
            infix,
            precedence,
        }
    }
}

/// The Pratt rule table, keyed by token kind.
fn rule_for(kind: TokenKind) -> Rule {
    use Precedence as P;
    match kind {
        TokenKind::LeftParen => Rule::new(Some(Compiler::grouping), Some(Compiler::call), P::Call),
        TokenKind::Dot => Rule::new(None, Some(Compiler::dot), P::Call),
        TokenKind::Minus => Rule::new(Some(Compiler::unary), Some(Compiler::binary), P::Term),
        TokenKind::Plus => Rule::new(None, Some(Compiler::binary), P::Term),
        TokenKind::Slash | TokenKind::Star => {
            Rule::new(None, Some(Compiler::binary), P::Factor)
        }
        TokenKind::Bang => Rule::new(Some(Compiler::unary), None, P::None),
        TokenKind::BangEqual | TokenKind::EqualEqual => {
            Rule::new(None, Some(Compiler::binary), P::Equality)
        }
        TokenKind::Greater
        | TokenKind::GreaterEqual
        | TokenKind::Less
        | TokenKind::LessEqual => Rule::new(None, Some(Compiler::binary), P::Comparison),
        TokenKind::Identifier => Rule::new(Some(Compiler::variable), None, P::None),
        TokenKind::String => Rule::new(Some(Compiler::string), None, P::None),
        TokenKind::Number => Rule::new(Some(Compiler::number), None, P::None),
        TokenKind::And => Rule::new(None, Some(Compiler::and_op), P::And),
        TokenKind::Or => Rule::new(None, Some(Compiler::or_op), P::Or),
        TokenKind::True | TokenKind::False | TokenKind::Nil => {
            Rule::new(Some(Compiler::literal), None, P::None)
        }
        TokenKind::This | TokenKind::Super => {
            Rule::new(Some(Compiler::unsupported_primary), None, P::None)
        }
        _ => Rule::new(None, None, P::None),
    }
}

#[derive(Debug, Clone)]
struct Local {
    name: String,
    /// Scope depth, or -1 while the initializer is still being compiled
    depth: i32,
}

/// Maximum locals addressable by a one-byte slot operand.
const MAX_LOCALS: usize = 256;
/// Maximum constants addressable by a one-byte pool index.
const MAX_CONSTANTS: usize = 256;

/// Single-pass bytecode compiler: consumes the token stream directly and
/// emits into one chunk. Covers the statement and expression subset the VM
/// executes; functions, classes, and property access are reported as
/// unsupported.
pub struct Compiler {
    tokens: Vec<Token>,
    current: usize,
    chunk: Chunk,
    locals: Vec<Local>,
    scope_depth: i32,
    errors: Vec<CompileError>,
}

impl Compiler {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            current: 0,
            chunk: Chunk::new(),
            locals: Vec::new(),
            scope_depth: 0,
            errors: Vec::new(),
        }
    }

    /// Compile the whole token stream. All errors are collected; if any
    /// occurred no chunk is produced.
    pub fn compile(mut self) -> Result<Chunk, Vec<CompileError>> {
        while !self.check(TokenKind::Eof) {
            if let Err(e) = self.declaration() {
                self.errors.push(e);
                self.synchronize();
            }
        }
        self.emit_op(OpCode::Return);
        if self.errors.is_empty() {
            Ok(self.chunk)
        } else {
            Err(self.errors)
        }
    }

    // --- Token plumbing ---

    fn peek(&self) -> &Token {
        &self.tokens[self.current]
    }

    fn previous(&self) -> &Token {
        &self.tokens[self.current.saturating_sub(1)]
    }

    fn advance(&mut self) -> &Token {
        if !self.check(TokenKind::Eof) {
            self.current += 1;
        }
        self.previous()
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek().kind == kind
    }

    fn match_token(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn consume(&mut self, kind: TokenKind, message: &str) -> Result<(), CompileError> {
        if self.check(kind) {
            self.advance();
            Ok(())
        } else {
            Err(self.error_at_current(format!(
                "expected {message}, found '{}'",
                self.peek().lexeme
            )))
        }
    }

    fn line(&self) -> usize {
        self.previous().line
    }

    fn error_at_current(&self, message: impl Into<String>) -> CompileError {
        let token = self.peek();
        CompileError::compile(message, error_span(token))
    }

    fn error_at_previous(&self, message: impl Into<String>) -> CompileError {
        CompileError::compile(message, error_span(self.previous()))
    }

    /// Discard tokens until a statement boundary so compilation can resume.
    fn synchronize(&mut self) {
        self.advance();
        while !self.check(TokenKind::Eof) {
            if self.previous().kind == TokenKind::Semicolon {
                return;
            }
            match self.peek().kind {
                TokenKind::Class
                | TokenKind::Fun
                | TokenKind::Var
                | TokenKind::For
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Print
                | TokenKind::Return => return,
                _ => {
                    self.advance();
                }
            }
        }
    }

    // --- Emit helpers ---

    fn emit_op(&mut self, op: OpCode) {
        let line = self.line();
        self.chunk.write_op(op, line);
    }

    fn emit_byte(&mut self, byte: u8) {
        let line = self.line();
        self.chunk.write_byte(byte, line);
    }

    fn make_constant(&mut self, constant: Constant) -> Result<u8, CompileError> {
        if self.chunk.constants.len() >= MAX_CONSTANTS {
            return Err(self.error_at_previous("too many constants in one chunk"));
        }
        Ok(self.chunk.add_constant(constant) as u8)
    }

    fn emit_constant(&mut self, constant: Constant) -> Result<(), CompileError> {
        let idx = self.make_constant(constant)?;
        self.emit_op(OpCode::Constant);
        self.emit_byte(idx);
        Ok(())
    }

    /// Intern an identifier into the constant pool, reusing an existing
    /// entry for the same name.
    fn identifier_constant(&mut self, name: &str) -> Result<u8, CompileError> {
        if let Some(i) = self
            .chunk
            .constants
            .iter()
            .position(|c| matches!(c, Constant::String(s) if s == name))
        {
            return Ok(i as u8);
        }
        self.make_constant(Constant::String(name.to_string()))
    }

    /// Emit a forward jump with a placeholder operand; returns the operand
    /// offset for later patching.
    fn emit_jump(&mut self, op: OpCode) -> usize {
        self.emit_op(op);
        let line = self.line();
        self.chunk.write_u16(0xffff, line);
        self.chunk.code.len() - 2
    }

    /// Backpatch a forward jump to land just past the current end of code.
    fn patch_jump(&mut self, offset: usize) -> Result<(), CompileError> {
        // the operand counts bytes after itself
        let jump = self.chunk.code.len() - offset - 2;
        if jump > u16::MAX as usize {
            return Err(self.error_at_previous("too much code to jump over"));
        }
        self.chunk.code[offset] = (jump & 0xff) as u8;
        self.chunk.code[offset + 1] = (jump >> 8) as u8;
        Ok(())
    }

    /// Emit a backward jump to `loop_start`.
    fn emit_loop(&mut self, loop_start: usize) -> Result<(), CompileError> {
        self.emit_op(OpCode::Loop);
        // +2 for the operand the VM will have consumed
        let offset = self.chunk.code.len() - loop_start + 2;
        if offset > u16::MAX as usize {
            return Err(self.error_at_previous("loop body too large"));
        }
        let line = self.line();
        self.chunk.write_u16(offset as u16, line);
        Ok(())
    }

    // --- Scopes and locals ---

    fn begin_scope(&mut self) {
        self.scope_depth += 1;
    }

    fn end_scope(&mut self) {
        self.scope_depth -= 1;
        while let Some(local) = self.locals.last() {
            if local.depth <= self.scope_depth {
                break;
            }
            self.emit_op(OpCode::Pop);
            self.locals.pop();
        }
    }

    /// Record a new local in the current scope, still uninitialized.
    fn declare_variable(&mut self, name: &Token) -> Result<(), CompileError> {
        if self.scope_depth == 0 {
            return Ok(());
        }
        for local in self.locals.iter().rev() {
            if local.depth != -1 && local.depth < self.scope_depth {
                break;
            }
            if local.name == name.lexeme {
                return Err(CompileError::compile(
                    format!("variable '{}' already declared in this scope", name.lexeme),
                    error_span(name),
                ));
            }
        }
        if self.locals.len() >= MAX_LOCALS {
            return Err(CompileError::compile(
                "too many local variables in scope",
                error_span(name),
            ));
        }
        self.locals.push(Local {
            name: name.lexeme.clone(),
            depth: -1,
        });
        Ok(())
    }

    /// Make the declared variable visible: locals become initialized,
    /// globals get a DefineGlobal.
    fn define_variable(&mut self, name: &Token) -> Result<(), CompileError> {
        if self.scope_depth > 0 {
            self.locals
                .last_mut()
                .expect("declare_variable pushed a local")
                .depth = self.scope_depth;
            return Ok(());
        }
        let idx = self.identifier_constant(&name.lexeme)?;
        self.emit_op(OpCode::DefineGlobal);
        self.emit_byte(idx);
        Ok(())
    }

    /// Find a local slot by name, innermost first. Reading a local inside
    /// its own initializer is an error.
    fn resolve_local(&self, name: &Token) -> Result<Option<u8>, CompileError> {
        for (i, local) in self.locals.iter().enumerate().rev() {
            if local.name == name.lexeme {
                if local.depth == -1 {
                    return Err(CompileError::compile(
                        "can't read local variable in its own initializer",
                        error_span(name),
                    ));
                }
                return Ok(Some(i as u8));
            }
        }
        Ok(None)
    }

    // --- Declarations and statements ---

    fn declaration(&mut self) -> Result<(), CompileError> {
        if self.check(TokenKind::Var) {
            self.var_declaration()
        } else if self.check(TokenKind::Fun) {
            self.advance();
            Err(self.error_at_previous(
                "functions are not supported in the bytecode compiler",
            ))
        } else if self.check(TokenKind::Class) {
            self.advance();
            Err(self.error_at_previous("classes are not supported in the bytecode compiler"))
        } else {
            self.statement()
        }
    }

    fn var_declaration(&mut self) -> Result<(), CompileError> {
        self.advance(); // consume 'var'
        if !self.check(TokenKind::Identifier) {
            return Err(self.error_at_current("expected variable name"));
        }
        let name = self.advance().clone();
        self.declare_variable(&name)?;

        if self.match_token(TokenKind::Equal) {
            self.expression()?;
        } else {
            self.emit_op(OpCode::Nil);
        }
        self.consume(TokenKind::Semicolon, "';' after variable declaration")?;
        self.define_variable(&name)
    }

    fn statement(&mut self) -> Result<(), CompileError> {
        if self.check(TokenKind::Print) {
            self.print_statement()
        } else if self.check(TokenKind::If) {
            self.if_statement()
        } else if self.check(TokenKind::While) {
            self.while_statement()
        } else if self.check(TokenKind::For) {
            self.for_statement()
        } else if self.check(TokenKind::LeftBrace) {
            self.advance();
            self.begin_scope();
            let result = self.block();
            self.end_scope();
            result
        } else if self.check(TokenKind::Return) {
            self.advance();
            Err(self.error_at_previous("can't return from top-level code"))
        } else {
            self.expression_statement()
        }
    }

    fn print_statement(&mut self) -> Result<(), CompileError> {
        self.advance(); // consume 'print'
        self.expression()?;
        self.consume(TokenKind::Semicolon, "';' after print value")?;
        self.emit_op(OpCode::Print);
        Ok(())
    }

    fn expression_statement(&mut self) -> Result<(), CompileError> {
        self.expression()?;
        self.consume(TokenKind::Semicolon, "';' after expression")?;
        self.emit_op(OpCode::Pop);
        Ok(())
    }

    fn block(&mut self) -> Result<(), CompileError> {
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.declaration()?;
        }
        self.consume(TokenKind::RightBrace, "'}' after block")
    }

    fn if_statement(&mut self) -> Result<(), CompileError> {
        self.advance(); // consume 'if'
        self.consume(TokenKind::LeftParen, "'(' after 'if'")?;
        self.expression()?;
        self.consume(TokenKind::RightParen, "')' after if condition")?;

        let then_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement()?;
        let else_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(then_jump)?;
        self.emit_op(OpCode::Pop);
        if self.match_token(TokenKind::Else) {
            self.statement()?;
        }
        self.patch_jump(else_jump)
    }

    fn while_statement(&mut self) -> Result<(), CompileError> {
        self.advance(); // consume 'while'
        let loop_start = self.chunk.code.len();
        self.consume(TokenKind::LeftParen, "'(' after 'while'")?;
        self.expression()?;
        self.consume(TokenKind::RightParen, "')' after while condition")?;

        let exit_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement()?;
        self.emit_loop(loop_start)?;
        self.patch_jump(exit_jump)?;
        self.emit_op(OpCode::Pop);
        Ok(())
    }

    /// `for` compiles directly in one pass: the increment clause is emitted
    /// before the body in code order, so the body jumps back to it and it
    /// loops back to the condition.
    fn for_statement(&mut self) -> Result<(), CompileError> {
        self.advance(); // consume 'for'
        self.begin_scope();
        self.consume(TokenKind::LeftParen, "'(' after 'for'")?;

        if self.match_token(TokenKind::Semicolon) {
            // no initializer
        } else if self.check(TokenKind::Var) {
            self.var_declaration()?;
        } else {
            self.expression_statement()?;
        }

        let mut loop_start = self.chunk.code.len();
        let mut exit_jump = None;
        if !self.match_token(TokenKind::Semicolon) {
            self.expression()?;
            self.consume(TokenKind::Semicolon, "';' after loop condition")?;
            exit_jump = Some(self.emit_jump(OpCode::JumpIfFalse));
            self.emit_op(OpCode::Pop);
        }

        if !self.match_token(TokenKind::RightParen) {
            let body_jump = self.emit_jump(OpCode::Jump);
            let increment_start = self.chunk.code.len();
            self.expression()?;
            self.emit_op(OpCode::Pop);
            self.consume(TokenKind::RightParen, "')' after for clauses")?;
            self.emit_loop(loop_start)?;
            loop_start = increment_start;
            self.patch_jump(body_jump)?;
        }

        self.statement()?;
        self.emit_loop(loop_start)?;

        if let Some(exit) = exit_jump {
            self.patch_jump(exit)?;
            self.emit_op(OpCode::Pop);
        }
        self.end_scope();
        Ok(())
    }

    // --- Expressions (Pratt) ---

    fn expression(&mut self) -> Result<(), CompileError> {
        self.parse_precedence(Precedence::Assignment)
    }

    /// The Pratt driver: run the prefix rule for the current token, then
    /// fold in infix rules while the next token binds at least as tightly
    /// as `precedence`.
    fn parse_precedence(&mut self, precedence: Precedence) -> Result<(), CompileError> {
        self.advance();
        let Some(prefix) = rule_for(self.previous().kind).prefix else {
            return Err(self.error_at_previous(format!(
                "expected expression, found '{}'",
                self.previous().lexeme
            )));
        };
        let can_assign = precedence <= Precedence::Assignment;
        prefix(self, can_assign)?;

        while precedence <= rule_for(self.peek().kind).precedence {
            self.advance();
            let infix = rule_for(self.previous().kind)
                .infix
                .expect("tokens with infix precedence have infix rules");
            infix(self, can_assign)?;
        }

        if can_assign && self.check(TokenKind::Equal) {
            // nothing consumed the '=': the left side was not assignable
            self.advance();
            return Err(self.error_at_previous("invalid assignment target"));
        }
        Ok(())
    }

    fn number(&mut self, _can_assign: bool) -> Result<(), CompileError> {
        let value = self
            .previous()
            .number()
            .expect("number token carries its value");
        self.emit_constant(Constant::Number(value))
    }

    fn string(&mut self, _can_assign: bool) -> Result<(), CompileError> {
        let value = self
            .previous()
            .string()
            .expect("string token carries its contents")
            .to_string();
        self.emit_constant(Constant::String(value))
    }

    fn literal(&mut self, _can_assign: bool) -> Result<(), CompileError> {
        match self.previous().kind {
            TokenKind::True => self.emit_op(OpCode::True),
            TokenKind::False => self.emit_op(OpCode::False),
            TokenKind::Nil => self.emit_op(OpCode::Nil),
            _ => unreachable!("literal rule only registered for true/false/nil"),
        }
        Ok(())
    }

    fn grouping(&mut self, _can_assign: bool) -> Result<(), CompileError> {
        self.expression()?;
        self.consume(TokenKind::RightParen, "')' after expression")
    }

    fn unary(&mut self, _can_assign: bool) -> Result<(), CompileError> {
        let op = self.previous().kind;
        self.parse_precedence(Precedence::Unary)?;
        match op {
            TokenKind::Minus => self.emit_op(OpCode::Negate),
            TokenKind::Bang => self.emit_op(OpCode::Not),
            _ => unreachable!("unary rule only registered for '-' and '!'"),
        }
        Ok(())
    }

    fn binary(&mut self, _can_assign: bool) -> Result<(), CompileError> {
        let op = self.previous().kind;
        let rule = rule_for(op);
        self.parse_precedence(rule.precedence.next())?;
        match op {
            TokenKind::Plus => self.emit_op(OpCode::Add),
            TokenKind::Minus => self.emit_op(OpCode::Subtract),
            TokenKind::Star => self.emit_op(OpCode::Multiply),
            TokenKind::Slash => self.emit_op(OpCode::Divide),
            TokenKind::EqualEqual => self.emit_op(OpCode::Equal),
            TokenKind::BangEqual => {
                self.emit_op(OpCode::Equal);
                self.emit_op(OpCode::Not);
            }
            TokenKind::Greater => self.emit_op(OpCode::Greater),
            TokenKind::GreaterEqual => {
                self.emit_op(OpCode::Less);
                self.emit_op(OpCode::Not);
            }
            TokenKind::Less => self.emit_op(OpCode::Less),
            TokenKind::LessEqual => {
                self.emit_op(OpCode::Greater);
                self.emit_op(OpCode::Not);
            }
            _ => unreachable!("binary rule only registered for operators"),
        }
        Ok(())
    }

    fn variable(&mut self, can_assign: bool) -> Result<(), CompileError> {
        let name = self.previous().clone();
        let (get_op, set_op, arg) = match self.resolve_local(&name)? {
            Some(slot) => (OpCode::GetLocal, OpCode::SetLocal, slot),
            None => {
                let idx = self.identifier_constant(&name.lexeme)?;
                (OpCode::GetGlobal, OpCode::SetGlobal, idx)
            }
        };
        if can_assign && self.match_token(TokenKind::Equal) {
            self.expression()?;
            self.emit_op(set_op);
            self.emit_byte(arg);
        } else {
            self.emit_op(get_op);
            self.emit_byte(arg);
        }
        Ok(())
    }

    /// `and` short-circuits: if the left operand is falsey it stays on the
    /// stack as the result and the right operand is skipped.
    fn and_op(&mut self, _can_assign: bool) -> Result<(), CompileError> {
        let end_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::And)?;
        self.patch_jump(end_jump)
    }

    /// `or` short-circuits: a truthy left operand jumps over the right one
    /// and remains as the result.
    fn or_op(&mut self, _can_assign: bool) -> Result<(), CompileError> {
        let else_jump = self.emit_jump(OpCode::JumpIfFalse);
        let end_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(else_jump)?;
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::Or)?;
        self.patch_jump(end_jump)
    }

    fn call(&mut self, _can_assign: bool) -> Result<(), CompileError> {
        Err(self.error_at_previous("calls are not supported in the bytecode compiler"))
    }

    fn dot(&mut self, _can_assign: bool) -> Result<(), CompileError> {
        Err(self.error_at_previous("properties are not supported in the bytecode compiler"))
    }

    fn unsupported_primary(&mut self, _can_assign: bool) -> Result<(), CompileError> {
        let lexeme = self.previous().lexeme.clone();
        Err(self.error_at_previous(format!(
            "'{lexeme}' is not supported in the bytecode compiler"
        )))
    }
}

fn error_span(token: &Token) -> Span {
    if token.kind == TokenKind::Eof {
        token.span
    } else {
        Span::new(token.span.offset, token.span.len.max(1))
    }
}
