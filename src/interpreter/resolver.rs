use std::collections::HashMap;

use crate::ast::*;
use crate::error::CompileError;
use crate::scanner::token::Span;

#[derive(Debug, Clone, Copy, PartialEq)]
enum FunctionKind {
    None,
    Function,
    Method,
    Initializer,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ClassKind {
    None,
    Class,
    Subclass,
}

/// Lifecycle of a name in a scope: declared when first seen, defined once
/// its initializer has been resolved. Reading a name that is still only
/// declared means the initializer refers to itself.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Binding {
    Declared,
    Defined,
}

/// Static scope analysis. Walks the AST once with a stack of scopes and
/// records, per expression id, how many scope hops separate a variable use
/// from its binding. Uses that match no scope are left unannotated and fall
/// through to globals at runtime.
pub struct Resolver {
    scopes: Vec<HashMap<String, Binding>>,
    locals: HashMap<ExprId, usize>,
    function: FunctionKind,
    class: ClassKind,
    errors: Vec<CompileError>,
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new()
    }
}

impl Resolver {
    pub fn new() -> Self {
        Self {
            scopes: Vec::new(),
            locals: HashMap::new(),
            function: FunctionKind::None,
            class: ClassKind::None,
            errors: Vec::new(),
        }
    }

    pub fn resolve(
        mut self,
        program: &Program,
    ) -> Result<HashMap<ExprId, usize>, Vec<CompileError>> {
        for stmt in &program.statements {
            self.resolve_stmt(stmt);
        }
        if self.errors.is_empty() {
            Ok(self.locals)
        } else {
            Err(self.errors)
        }
    }

    // --- Scope bookkeeping ---

    fn enter(&mut self) {
        self.scopes.push(HashMap::new());
    }

    fn exit(&mut self) {
        self.scopes.pop();
    }

    fn declare(&mut self, name: &str, span: Span) {
        let Some(scope) = self.scopes.last_mut() else {
            return; // global scope is not tracked
        };
        let previous = scope.insert(name.to_string(), Binding::Declared);
        if previous.is_some() {
            self.errors.push(CompileError::resolve(
                format!("variable '{name}' already declared in this scope"),
                span,
            ));
        }
    }

    fn define(&mut self, name: &str) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), Binding::Defined);
        }
    }

    /// Annotate a variable use with its hop distance, if any scope binds it.
    fn note_use(&mut self, id: ExprId, name: &str) {
        let found = self
            .scopes
            .iter()
            .rev()
            .position(|scope| scope.contains_key(name));
        if let Some(depth) = found {
            self.locals.insert(id, depth);
        }
    }

    // --- Statements ---

    fn resolve_stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::Var { name, initializer } => {
                self.declare(name, stmt.span);
                if let Some(init) = initializer {
                    self.resolve_expr(init);
                }
                self.define(name);
            }
            StmtKind::Function(function) => {
                self.declare(&function.name, stmt.span);
                self.define(&function.name);
                self.resolve_function(function, FunctionKind::Function);
            }
            StmtKind::Class {
                name,
                superclass,
                methods,
            } => self.resolve_class(name, superclass.as_deref(), methods, stmt.span),
            StmtKind::Expression { expr } => self.resolve_expr(expr),
            StmtKind::Print { expr } => self.resolve_expr(expr),
            StmtKind::Return { value } => {
                if self.function == FunctionKind::None {
                    self.errors.push(CompileError::resolve(
                        "can't return from top-level code",
                        stmt.span,
                    ));
                }
                if let Some(value) = value {
                    if self.function == FunctionKind::Initializer {
                        self.errors.push(CompileError::resolve(
                            "can't return a value from an initializer",
                            stmt.span,
                        ));
                    }
                    self.resolve_expr(value);
                }
            }
            StmtKind::Block { body } => {
                self.enter();
                for inner in body {
                    self.resolve_stmt(inner);
                }
                self.exit();
            }
            StmtKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                self.resolve_expr(condition);
                self.resolve_stmt(then_branch);
                if let Some(else_branch) = else_branch {
                    self.resolve_stmt(else_branch);
                }
            }
            StmtKind::While { condition, body } => {
                self.resolve_expr(condition);
                self.resolve_stmt(body);
            }
        }
    }

    fn resolve_class(
        &mut self,
        name: &str,
        superclass: Option<&str>,
        methods: &[Function],
        span: Span,
    ) {
        let enclosing = std::mem::replace(&mut self.class, ClassKind::Class);

        self.declare(name, span);
        self.define(name);

        if let Some(superclass) = superclass {
            if superclass == name {
                self.errors.push(CompileError::resolve(
                    "a class can't inherit from itself",
                    span,
                ));
            }
            self.class = ClassKind::Subclass;
            // 'super' gets a scope of its own wrapped around the methods,
            // so every method closure captures the superclass of the
            // *defining* class
            self.enter();
            self.define("super");
        }

        self.enter();
        self.define("this");

        for method in methods {
            let kind = if method.name == "init" {
                FunctionKind::Initializer
            } else {
                FunctionKind::Method
            };
            self.resolve_function(method, kind);
        }

        self.exit();
        if superclass.is_some() {
            self.exit();
        }
        self.class = enclosing;
    }

    fn resolve_function(&mut self, function: &Function, kind: FunctionKind) {
        let enclosing = std::mem::replace(&mut self.function, kind);
        self.enter();
        for param in &function.params {
            self.declare(param, function.span);
            self.define(param);
        }
        for stmt in &function.body {
            self.resolve_stmt(stmt);
        }
        self.exit();
        self.function = enclosing;
    }

    // --- Expressions ---

    fn resolve_expr(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::Variable { name } => {
                let in_own_initializer = self
                    .scopes
                    .last()
                    .is_some_and(|scope| scope.get(name) == Some(&Binding::Declared));
                if in_own_initializer {
                    self.errors.push(CompileError::resolve(
                        "can't read local variable in its own initializer",
                        expr.span,
                    ));
                }
                self.note_use(expr.id, name);
            }
            ExprKind::Assign { name, value } => {
                self.resolve_expr(value);
                self.note_use(expr.id, name);
            }
            ExprKind::Binary { left, right, .. } | ExprKind::Logical { left, right, .. } => {
                self.resolve_expr(left);
                self.resolve_expr(right);
            }
            ExprKind::Unary { operand, .. } => self.resolve_expr(operand),
            ExprKind::Call { callee, args } => {
                self.resolve_expr(callee);
                for arg in args {
                    self.resolve_expr(arg);
                }
            }
            ExprKind::Get { object, .. } => self.resolve_expr(object),
            ExprKind::Set { object, value, .. } => {
                self.resolve_expr(value);
                self.resolve_expr(object);
            }
            ExprKind::Grouping { inner } => self.resolve_expr(inner),
            ExprKind::This => {
                if self.class == ClassKind::None {
                    self.errors.push(CompileError::resolve(
                        "can't use 'this' outside of a class",
                        expr.span,
                    ));
                }
                self.note_use(expr.id, "this");
            }
            ExprKind::Super { .. } => {
                match self.class {
                    ClassKind::None => {
                        self.errors.push(CompileError::resolve(
                            "can't use 'super' outside of a class",
                            expr.span,
                        ));
                    }
                    ClassKind::Class => {
                        self.errors.push(CompileError::resolve(
                            "can't use 'super' in a class with no superclass",
                            expr.span,
                        ));
                    }
                    ClassKind::Subclass => {}
                }
                self.note_use(expr.id, "super");
            }
            ExprKind::Literal { .. } => {}
        }
    }
}
