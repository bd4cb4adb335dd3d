use crate::ast::*;
use crate::error::CompileError;
use crate::scanner::token::{Span, Token, TokenKind};

/// Smallest span covering both `a` and `b`.
fn join(a: Span, b: Span) -> Span {
    Span::new(a.offset, b.offset + b.len - a.offset)
}

/// Recursive-descent parser with precedence climbing. Expression ids are
/// handed out from a per-parser counter as nodes are built.
pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    next_id: ExprId,
    errors: Vec<CompileError>,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            next_id: 0,
            errors: Vec::new(),
        }
    }

    /// Parse a whole program. All syntax errors are collected; if any
    /// occurred, no tree is produced.
    pub fn parse(mut self) -> Result<Program, Vec<CompileError>> {
        let mut statements = Vec::new();
        while !self.at_end() {
            match self.declaration() {
                Ok(stmt) => statements.push(stmt),
                Err(e) => {
                    self.errors.push(e);
                    self.synchronize();
                }
            }
        }
        if self.errors.is_empty() {
            Ok(Program { statements })
        } else {
            Err(self.errors)
        }
    }

    // --- Node construction ---

    fn mk_expr(&mut self, kind: ExprKind, span: Span) -> Expr {
        let id = self.next_id;
        self.next_id += 1;
        Expr { id, span, kind }
    }

    // --- Declarations and statements ---

    fn declaration(&mut self) -> Result<Stmt, CompileError> {
        match self.peek().kind {
            TokenKind::Class => self.class_declaration(),
            TokenKind::Fun => self.fun_declaration(),
            TokenKind::Var => self.var_declaration(),
            _ => self.statement(),
        }
    }

    fn class_declaration(&mut self) -> Result<Stmt, CompileError> {
        let start = self.peek().span;
        self.bump(); // 'class'
        let name = self.ident("class name")?;

        let superclass = if self.eat(TokenKind::Less) {
            Some(self.ident("superclass name")?)
        } else {
            None
        };

        self.expect(TokenKind::LeftBrace, "'{' before class body")?;
        let mut methods = Vec::new();
        while !self.at(TokenKind::RightBrace) && !self.at_end() {
            methods.push(self.function("method")?);
        }
        self.expect(TokenKind::RightBrace, "'}' after class body")?;

        Ok(Stmt {
            span: self.span_from(start),
            kind: StmtKind::Class {
                name,
                superclass,
                methods,
            },
        })
    }

    fn fun_declaration(&mut self) -> Result<Stmt, CompileError> {
        let start = self.peek().span;
        self.bump(); // 'fun'
        let function = self.function("function")?;
        Ok(Stmt {
            span: self.span_from(start),
            kind: StmtKind::Function(function),
        })
    }

    fn function(&mut self, what: &str) -> Result<Function, CompileError> {
        let start = self.peek().span;
        let name = self.ident(&format!("{what} name"))?;

        self.expect(TokenKind::LeftParen, &format!("'(' after {what} name"))?;
        let mut params = Vec::new();
        if !self.at(TokenKind::RightParen) {
            loop {
                if params.len() >= 255 {
                    return Err(CompileError::parse(
                        "can't have more than 255 parameters",
                        self.peek().span,
                    ));
                }
                params.push(self.ident("parameter name")?);
                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RightParen, "')' after parameters")?;

        self.expect(TokenKind::LeftBrace, &format!("'{{' before {what} body"))?;
        let body = self.block_body()?;

        Ok(Function {
            name,
            params,
            body,
            span: self.span_from(start),
        })
    }

    fn var_declaration(&mut self) -> Result<Stmt, CompileError> {
        let start = self.peek().span;
        self.bump(); // 'var'
        let name = self.ident("variable name")?;
        let initializer = if self.eat(TokenKind::Equal) {
            Some(self.expression()?)
        } else {
            None
        };
        self.expect(TokenKind::Semicolon, "';' after variable declaration")?;
        Ok(Stmt {
            span: self.span_from(start),
            kind: StmtKind::Var { name, initializer },
        })
    }

    fn statement(&mut self) -> Result<Stmt, CompileError> {
        match self.peek().kind {
            TokenKind::Print => self.print_statement(),
            TokenKind::Return => self.return_statement(),
            TokenKind::LeftBrace => self.block_statement(),
            TokenKind::If => self.if_statement(),
            TokenKind::While => self.while_statement(),
            TokenKind::For => self.for_statement(),
            _ => self.expression_statement(),
        }
    }

    fn print_statement(&mut self) -> Result<Stmt, CompileError> {
        let start = self.peek().span;
        self.bump(); // 'print'
        let expr = self.expression()?;
        self.expect(TokenKind::Semicolon, "';' after print value")?;
        Ok(Stmt {
            span: self.span_from(start),
            kind: StmtKind::Print { expr },
        })
    }

    fn return_statement(&mut self) -> Result<Stmt, CompileError> {
        let start = self.peek().span;
        self.bump(); // 'return'
        let value = if self.at(TokenKind::Semicolon) {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect(TokenKind::Semicolon, "';' after return value")?;
        Ok(Stmt {
            span: self.span_from(start),
            kind: StmtKind::Return { value },
        })
    }

    fn block_statement(&mut self) -> Result<Stmt, CompileError> {
        let start = self.peek().span;
        self.bump(); // '{'
        let body = self.block_body()?;
        Ok(Stmt {
            span: self.span_from(start),
            kind: StmtKind::Block { body },
        })
    }

    fn block_body(&mut self) -> Result<Vec<Stmt>, CompileError> {
        let mut body = Vec::new();
        while !self.at(TokenKind::RightBrace) && !self.at_end() {
            body.push(self.declaration()?);
        }
        self.expect(TokenKind::RightBrace, "'}' after block")?;
        Ok(body)
    }

    fn if_statement(&mut self) -> Result<Stmt, CompileError> {
        let start = self.peek().span;
        self.bump(); // 'if'
        self.expect(TokenKind::LeftParen, "'(' after 'if'")?;
        let condition = self.expression()?;
        self.expect(TokenKind::RightParen, "')' after if condition")?;

        let then_branch = Box::new(self.statement()?);
        let else_branch = if self.eat(TokenKind::Else) {
            Some(Box::new(self.statement()?))
        } else {
            None
        };

        Ok(Stmt {
            span: self.span_from(start),
            kind: StmtKind::If {
                condition,
                then_branch,
                else_branch,
            },
        })
    }

    fn while_statement(&mut self) -> Result<Stmt, CompileError> {
        let start = self.peek().span;
        self.bump(); // 'while'
        self.expect(TokenKind::LeftParen, "'(' after 'while'")?;
        let condition = self.expression()?;
        self.expect(TokenKind::RightParen, "')' after while condition")?;
        let body = Box::new(self.statement()?);
        Ok(Stmt {
            span: self.span_from(start),
            kind: StmtKind::While { condition, body },
        })
    }

    /// Desugar `for (init; cond; inc) body` into
    /// `{ init; while (cond) { body; inc; } }`.
    fn for_statement(&mut self) -> Result<Stmt, CompileError> {
        let start = self.peek().span;
        self.bump(); // 'for'
        self.expect(TokenKind::LeftParen, "'(' after 'for'")?;

        let initializer = if self.eat(TokenKind::Semicolon) {
            None
        } else if self.at(TokenKind::Var) {
            Some(self.var_declaration()?)
        } else {
            Some(self.expression_statement()?)
        };

        let condition = if self.at(TokenKind::Semicolon) {
            // an empty condition means loop forever
            let span = self.peek().span;
            self.mk_expr(
                ExprKind::Literal {
                    value: Lit::Bool(true),
                },
                span,
            )
        } else {
            self.expression()?
        };
        self.expect(TokenKind::Semicolon, "';' after for condition")?;

        let increment = if self.at(TokenKind::RightParen) {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect(TokenKind::RightParen, "')' after for clauses")?;

        let mut body = self.statement()?;

        if let Some(inc) = increment {
            let inc_stmt = Stmt {
                span: inc.span,
                kind: StmtKind::Expression { expr: inc },
            };
            body = Stmt {
                span: self.span_from(start),
                kind: StmtKind::Block {
                    body: vec![body, inc_stmt],
                },
            };
        }

        body = Stmt {
            span: self.span_from(start),
            kind: StmtKind::While {
                condition,
                body: Box::new(body),
            },
        };

        if let Some(init) = initializer {
            body = Stmt {
                span: self.span_from(start),
                kind: StmtKind::Block {
                    body: vec![init, body],
                },
            };
        }

        Ok(body)
    }

    fn expression_statement(&mut self) -> Result<Stmt, CompileError> {
        let expr = self.expression()?;
        self.expect(TokenKind::Semicolon, "';' after expression")?;
        Ok(Stmt {
            span: expr.span,
            kind: StmtKind::Expression { expr },
        })
    }

    // --- Expressions ---

    fn expression(&mut self) -> Result<Expr, CompileError> {
        self.assignment()
    }

    /// Assignment is parsed LL(1) with look-back: parse the l-value
    /// candidate as an ordinary expression, then rewrite a variable read
    /// into an assignment, or a property get into a set, when '=' follows.
    fn assignment(&mut self) -> Result<Expr, CompileError> {
        let target = self.or()?;

        if !self.eat(TokenKind::Equal) {
            return Ok(target);
        }

        let value = self.assignment()?;
        let span = join(target.span, value.span);
        match target.kind {
            ExprKind::Variable { name } => Ok(self.mk_expr(
                ExprKind::Assign {
                    name,
                    value: Box::new(value),
                },
                span,
            )),
            ExprKind::Get { object, name } => Ok(self.mk_expr(
                ExprKind::Set {
                    object,
                    name,
                    value: Box::new(value),
                },
                span,
            )),
            _ => Err(CompileError::parse("invalid assignment target", span)),
        }
    }

    fn or(&mut self) -> Result<Expr, CompileError> {
        let mut left = self.and()?;
        while self.eat(TokenKind::Or) {
            let right = self.and()?;
            let span = join(left.span, right.span);
            left = self.mk_expr(
                ExprKind::Logical {
                    op: LogicalOp::Or,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                span,
            );
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Expr, CompileError> {
        let mut left = self.equality()?;
        while self.eat(TokenKind::And) {
            let right = self.equality()?;
            let span = join(left.span, right.span);
            left = self.mk_expr(
                ExprKind::Logical {
                    op: LogicalOp::And,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                span,
            );
        }
        Ok(left)
    }

    fn equality(&mut self) -> Result<Expr, CompileError> {
        const OPS: &[(TokenKind, BinaryOp)] = &[
            (TokenKind::EqualEqual, BinaryOp::Equal),
            (TokenKind::BangEqual, BinaryOp::NotEqual),
        ];
        self.binary_level(OPS, Self::comparison)
    }

    fn comparison(&mut self) -> Result<Expr, CompileError> {
        const OPS: &[(TokenKind, BinaryOp)] = &[
            (TokenKind::Greater, BinaryOp::Greater),
            (TokenKind::GreaterEqual, BinaryOp::GreaterEqual),
            (TokenKind::Less, BinaryOp::Less),
            (TokenKind::LessEqual, BinaryOp::LessEqual),
        ];
        self.binary_level(OPS, Self::term)
    }

    fn term(&mut self) -> Result<Expr, CompileError> {
        const OPS: &[(TokenKind, BinaryOp)] = &[
            (TokenKind::Plus, BinaryOp::Add),
            (TokenKind::Minus, BinaryOp::Subtract),
        ];
        self.binary_level(OPS, Self::factor)
    }

    fn factor(&mut self) -> Result<Expr, CompileError> {
        const OPS: &[(TokenKind, BinaryOp)] = &[
            (TokenKind::Star, BinaryOp::Multiply),
            (TokenKind::Slash, BinaryOp::Divide),
        ];
        self.binary_level(OPS, Self::unary)
    }

    /// One level of left-associative binary operators, mapped from token
    /// kinds by the table.
    fn binary_level(
        &mut self,
        ops: &[(TokenKind, BinaryOp)],
        next: fn(&mut Self) -> Result<Expr, CompileError>,
    ) -> Result<Expr, CompileError> {
        let mut left = next(self)?;
        while let Some(op) = self.eat_operator(ops) {
            let right = next(self)?;
            let span = join(left.span, right.span);
            left = self.mk_expr(
                ExprKind::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                span,
            );
        }
        Ok(left)
    }

    fn eat_operator(&mut self, ops: &[(TokenKind, BinaryOp)]) -> Option<BinaryOp> {
        let kind = self.peek().kind;
        let &(_, op) = ops.iter().find(|(k, _)| *k == kind)?;
        self.bump();
        Some(op)
    }

    fn unary(&mut self) -> Result<Expr, CompileError> {
        let op = match self.peek().kind {
            TokenKind::Bang => UnaryOp::Not,
            TokenKind::Minus => UnaryOp::Negate,
            _ => return self.call(),
        };
        let start = self.peek().span;
        self.bump();
        let operand = self.unary()?;
        let span = join(start, operand.span);
        Ok(self.mk_expr(
            ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            span,
        ))
    }

    fn call(&mut self) -> Result<Expr, CompileError> {
        let mut callee = self.primary()?;

        loop {
            if self.eat(TokenKind::LeftParen) {
                callee = self.finish_call(callee)?;
            } else if self.eat(TokenKind::Dot) {
                let name = self.ident("property name")?;
                let span = join(callee.span, self.prev_span());
                callee = self.mk_expr(
                    ExprKind::Get {
                        object: Box::new(callee),
                        name,
                    },
                    span,
                );
            } else {
                break;
            }
        }

        Ok(callee)
    }

    fn finish_call(&mut self, callee: Expr) -> Result<Expr, CompileError> {
        let mut args = Vec::new();
        if !self.at(TokenKind::RightParen) {
            loop {
                if args.len() >= 255 {
                    return Err(CompileError::parse(
                        "can't have more than 255 arguments",
                        self.peek().span,
                    ));
                }
                args.push(self.expression()?);
                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RightParen, "')' after arguments")?;
        let span = join(callee.span, self.prev_span());
        Ok(self.mk_expr(
            ExprKind::Call {
                callee: Box::new(callee),
                args,
            },
            span,
        ))
    }

    fn primary(&mut self) -> Result<Expr, CompileError> {
        let token = self.peek().clone();
        let span = token.span;
        match token.kind {
            TokenKind::Number => {
                self.bump();
                let value = token.number().expect("number token carries its value");
                Ok(self.mk_expr(
                    ExprKind::Literal {
                        value: Lit::Number(value),
                    },
                    span,
                ))
            }
            TokenKind::String => {
                self.bump();
                let value = token
                    .string()
                    .expect("string token carries its contents")
                    .to_string();
                Ok(self.mk_expr(
                    ExprKind::Literal {
                        value: Lit::Str(value),
                    },
                    span,
                ))
            }
            TokenKind::True => {
                self.bump();
                Ok(self.mk_expr(
                    ExprKind::Literal {
                        value: Lit::Bool(true),
                    },
                    span,
                ))
            }
            TokenKind::False => {
                self.bump();
                Ok(self.mk_expr(
                    ExprKind::Literal {
                        value: Lit::Bool(false),
                    },
                    span,
                ))
            }
            TokenKind::Nil => {
                self.bump();
                Ok(self.mk_expr(ExprKind::Literal { value: Lit::Nil }, span))
            }
            TokenKind::This => {
                self.bump();
                Ok(self.mk_expr(ExprKind::This, span))
            }
            TokenKind::Super => {
                self.bump();
                self.expect(TokenKind::Dot, "'.' after 'super'")?;
                let method = self.ident("superclass method name")?;
                let span = join(span, self.prev_span());
                Ok(self.mk_expr(ExprKind::Super { method }, span))
            }
            TokenKind::Identifier => {
                self.bump();
                Ok(self.mk_expr(ExprKind::Variable { name: token.lexeme }, span))
            }
            TokenKind::LeftParen => {
                self.bump();
                let inner = self.expression()?;
                self.expect(TokenKind::RightParen, "')' after expression")?;
                let span = join(span, self.prev_span());
                Ok(self.mk_expr(
                    ExprKind::Grouping {
                        inner: Box::new(inner),
                    },
                    span,
                ))
            }
            _ => Err(CompileError::parse(
                format!("expected expression, found '{}'", token.lexeme),
                Span::new(span.offset, span.len.max(1)),
            )),
        }
    }

    // --- Cursor ---

    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn at(&self, kind: TokenKind) -> bool {
        self.peek().kind == kind
    }

    fn at_end(&self) -> bool {
        self.at(TokenKind::Eof)
    }

    fn bump(&mut self) -> &Token {
        if !self.at_end() {
            self.pos += 1;
        }
        &self.tokens[self.pos - 1]
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.at(kind) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<(), CompileError> {
        if self.at(kind) {
            self.bump();
            return Ok(());
        }
        let token = self.peek();
        let span = if token.kind == TokenKind::Eof {
            token.span
        } else {
            Span::new(token.span.offset, token.span.len.max(1))
        };
        Err(CompileError::parse(
            format!("expected {what}, found '{}'", token.lexeme),
            span,
        ))
    }

    fn ident(&mut self, what: &str) -> Result<String, CompileError> {
        if self.at(TokenKind::Identifier) {
            return Ok(self.bump().lexeme.clone());
        }
        let token = self.peek();
        Err(CompileError::parse(
            format!("expected {what}"),
            Span::new(token.span.offset, token.span.len.max(1)),
        ))
    }

    fn prev_span(&self) -> Span {
        self.tokens[self.pos - 1].span
    }

    fn span_from(&self, start: Span) -> Span {
        join(start, self.prev_span())
    }

    /// Discard tokens until a statement boundary so parsing can continue
    /// after an error.
    fn synchronize(&mut self) {
        self.bump();
        while !self.at_end() {
            if self.tokens[self.pos - 1].kind == TokenKind::Semicolon {
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
                    self.bump();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner;

    fn parse_ok(source: &str) -> Program {
        let tokens = scanner::scan(source).expect("scan should succeed");
        Parser::new(tokens).parse().expect("parse should succeed")
    }

    fn parse_err(source: &str) -> Vec<CompileError> {
        let tokens = scanner::scan(source).expect("scan should succeed");
        Parser::new(tokens).parse().unwrap_err()
    }

    fn parse_sexp(source: &str) -> String {
        let program = parse_ok(source);
        crate::ast::printer::to_sexp(&program).trim().to_string()
    }

    #[test]
    fn precedence_add_mul() {
        assert_eq!(parse_sexp("1 + 2 * 3;"), "(+ 1 (* 2 3))");
    }

    #[test]
    fn precedence_group() {
        assert_eq!(parse_sexp("(1 + 2) * 3;"), "(* (group (+ 1 2)) 3)");
    }

    #[test]
    fn unary_negate() {
        assert_eq!(parse_sexp("-1;"), "(- 1)");
    }

    #[test]
    fn unary_not() {
        assert_eq!(parse_sexp("!true;"), "(! true)");
    }

    #[test]
    fn var_declaration() {
        assert_eq!(parse_sexp("var x = 42;"), "(var x 42)");
    }

    #[test]
    fn var_no_init() {
        assert_eq!(parse_sexp("var x;"), "(var x)");
    }

    #[test]
    fn string_literal_loses_quotes() {
        assert_eq!(parse_sexp("print \"hi\";"), "(print \"hi\")");
    }

    #[test]
    fn if_else() {
        assert_eq!(
            parse_sexp("if (true) print 1; else print 2;"),
            "(if true (print 1) (print 2))"
        );
    }

    #[test]
    fn while_loop() {
        assert_eq!(
            parse_sexp("while (true) print 1;"),
            "(while true (print 1))"
        );
    }

    #[test]
    fn for_desugars_to_while() {
        let sexp = parse_sexp("for (var i = 0; i < 10; i = i + 1) print i;");
        assert!(sexp.contains("while"));
        assert!(sexp.contains("var i"));
    }

    #[test]
    fn for_with_empty_clauses() {
        assert_eq!(parse_sexp("for (;;) print 1;"), "(while true (print 1))");
    }

    #[test]
    fn function_decl() {
        assert_eq!(
            parse_sexp("fun foo(a, b) { return a + b; }"),
            "(fun foo (a b) (return (+ a b)))"
        );
    }

    #[test]
    fn class_with_methods() {
        let sexp = parse_sexp("class Foo { bar() { return 1; } }");
        assert!(sexp.starts_with("(class Foo"));
        assert!(sexp.contains("(fun bar ()"));
    }

    #[test]
    fn class_with_superclass() {
        let sexp = parse_sexp("class Foo < Bar { }");
        assert!(sexp.contains("< Bar"));
    }

    #[test]
    fn super_method_access() {
        let sexp = parse_sexp("class B < A { m() { return super.m(); } }");
        assert!(sexp.contains("(call (super m))"));
    }

    #[test]
    fn expr_ids_are_unique() {
        let program = parse_ok("var x = 1 + 2; print x * x;");
        let mut ids = Vec::new();
        fn collect(expr: &Expr, ids: &mut Vec<ExprId>) {
            ids.push(expr.id);
            match &expr.kind {
                ExprKind::Binary { left, right, .. }
                | ExprKind::Logical { left, right, .. } => {
                    collect(left, ids);
                    collect(right, ids);
                }
                ExprKind::Unary { operand, .. } => collect(operand, ids),
                ExprKind::Grouping { inner } => collect(inner, ids),
                ExprKind::Assign { value, .. } => collect(value, ids),
                _ => {}
            }
        }
        for stmt in &program.statements {
            match &stmt.kind {
                StmtKind::Var {
                    initializer: Some(init),
                    ..
                } => collect(init, &mut ids),
                StmtKind::Print { expr } => collect(expr, &mut ids),
                _ => {}
            }
        }
        let mut deduped = ids.clone();
        deduped.sort_unstable();
        deduped.dedup();
        assert_eq!(ids.len(), deduped.len(), "ids must not repeat: {ids:?}");
    }

    #[test]
    fn error_recovery() {
        let errors = parse_err("var x = ; var y = 1;");
        assert!(!errors.is_empty());
    }

    #[test]
    fn invalid_assignment_target() {
        let errors = parse_err("1 + 2 = 3;");
        assert!(errors[0].to_string().contains("invalid assignment target"));
    }

    #[test]
    fn logical_operators() {
        assert_eq!(
            parse_sexp("true and false or true;"),
            "(or (and true false) true)"
        );
    }

    #[test]
    fn function_call() {
        assert_eq!(parse_sexp("foo(1, 2);"), "(call foo 1 2)");
    }

    #[test]
    fn property_access() {
        assert_eq!(parse_sexp("obj.field;"), "(. obj field)");
    }

    #[test]
    fn assignment() {
        assert_eq!(parse_sexp("x = 42;"), "(= x 42)");
    }

    #[test]
    fn set_property() {
        assert_eq!(parse_sexp("obj.field = 42;"), "(.= obj field 42)");
    }

    #[test]
    fn json_output_is_valid() {
        let program = parse_ok("var x = 42;");
        let json = crate::ast::printer::to_json(&program);
        let _: serde_json::Value = serde_json::from_str(&json).expect("valid JSON");
    }
}
