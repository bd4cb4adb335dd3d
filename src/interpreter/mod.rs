pub mod callable;
pub mod environment;
pub mod resolver;
pub mod value;

use std::cell::RefCell;
use std::collections::HashMap;
use std::io::Write;
use std::rc::Rc;

use crate::ast::*;
use crate::error::{RuntimeError, offset_to_line};
use crate::interpreter::callable::{Callable, LoxFunction, NativeFunction};
use crate::interpreter::environment::Env;
use crate::interpreter::value::{LoxClass, LoxInstance, Value};
use crate::scanner::token::Span;

/// Tree-walking evaluator. Executes a resolved program against a chain of
/// shared scopes; `print` output goes to the configured writer.
pub struct Interpreter {
    globals: Env,
    environment: Env,
    locals: HashMap<ExprId, usize>,
    output: Vec<String>,
    /// Writer for print output (allows testing without stdout)
    writer: Box<dyn Write>,
    /// Source code, retained for line numbers in runtime errors.
    source: String,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    pub fn new() -> Self {
        let globals = Env::global();
        globals.define(
            "clock",
            Value::Function(Callable::Native(NativeFunction::Clock)),
        );

        Self {
            globals: globals.clone(),
            environment: globals,
            locals: HashMap::new(),
            output: Vec::new(),
            writer: Box::new(std::io::stdout()),
            source: String::new(),
        }
    }

    /// Create an interpreter that captures output (for testing).
    #[cfg(test)]
    fn new_capturing() -> Self {
        let mut interp = Self::new();
        interp.writer = Box::new(Vec::<u8>::new());
        interp
    }

    /// Set the source code for line-number computation in runtime errors.
    pub fn set_source(&mut self, source: &str) {
        self.source = source.to_string();
    }

    pub fn interpret(
        &mut self,
        program: &Program,
        locals: HashMap<ExprId, usize>,
    ) -> Result<(), RuntimeError> {
        self.locals = locals;
        for stmt in &program.statements {
            self.execute_stmt(stmt)?;
        }
        Ok(())
    }

    pub fn output(&self) -> &[String] {
        &self.output
    }

    /// Merge additional locals (for REPL line-by-line resolution).
    pub fn merge_locals(&mut self, locals: HashMap<ExprId, usize>) {
        self.locals.extend(locals);
    }

    /// Execute additional statements without resetting the environment
    /// (for REPL).
    pub fn interpret_additional(&mut self, program: &Program) -> Result<(), RuntimeError> {
        for stmt in &program.statements {
            self.execute_stmt(stmt)?;
        }
        Ok(())
    }

    fn error(&self, message: impl Into<String>, span: Span) -> RuntimeError {
        if self.source.is_empty() {
            RuntimeError::new(message)
        } else {
            RuntimeError::at_line(message, offset_to_line(&self.source, span.offset))
        }
    }

    fn execute_stmt(&mut self, stmt: &Stmt) -> Result<(), RuntimeError> {
        match &stmt.kind {
            StmtKind::Var { name, initializer } => {
                let value = match initializer {
                    Some(init) => self.evaluate_expr(init)?,
                    None => Value::Nil,
                };
                self.environment.define(name.clone(), value);
                Ok(())
            }
            StmtKind::Function(function) => {
                let closure = LoxFunction {
                    declaration: function.clone(),
                    closure: self.environment.clone(),
                    is_initializer: false,
                };
                self.environment.define(
                    function.name.clone(),
                    Value::Function(Callable::User(closure)),
                );
                Ok(())
            }
            StmtKind::Class {
                name,
                superclass,
                methods,
            } => self.execute_class(name, superclass.as_deref(), methods, stmt.span),
            StmtKind::Expression { expr } => {
                self.evaluate_expr(expr)?;
                Ok(())
            }
            StmtKind::Print { expr } => {
                let value = self.evaluate_expr(expr)?;
                let text = format!("{value}");
                writeln!(self.writer, "{text}").expect("write should succeed");
                self.output.push(text);
                Ok(())
            }
            StmtKind::Return { value } => {
                let value = match value {
                    Some(value) => self.evaluate_expr(value)?,
                    None => Value::Nil,
                };
                // Non-local unwind, caught at the enclosing call frame
                Err(RuntimeError::Return { value })
            }
            StmtKind::Block { body } => self.execute_block(body, self.environment.child()),
            StmtKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                if self.evaluate_expr(condition)?.is_truthy() {
                    self.execute_stmt(then_branch)
                } else if let Some(else_branch) = else_branch {
                    self.execute_stmt(else_branch)
                } else {
                    Ok(())
                }
            }
            StmtKind::While { condition, body } => {
                while self.evaluate_expr(condition)?.is_truthy() {
                    self.execute_stmt(body)?;
                }
                Ok(())
            }
        }
    }

    fn execute_class(
        &mut self,
        name: &str,
        superclass: Option<&str>,
        methods: &[Function],
        span: Span,
    ) -> Result<(), RuntimeError> {
        let superclass = match superclass {
            Some(sc_name) => {
                let val = self
                    .environment
                    .get(sc_name)
                    .ok_or_else(|| self.error(format!("undefined variable '{sc_name}'"), span))?;
                match val {
                    Value::Class(sc) => Some(sc),
                    _ => return Err(self.error("superclass must be a class", span)),
                }
            }
            None => None,
        };

        self.environment.define(name.to_string(), Value::Nil);

        // Methods of a subclass close over a scope that binds 'super' to
        // the superclass of this (defining) class
        let enclosing = superclass.as_ref().map(|sc| {
            let env = self.environment.child();
            env.define("super", Value::Class(Rc::clone(sc)));
            std::mem::replace(&mut self.environment, env)
        });

        let mut method_table = HashMap::new();
        for method in methods {
            let function = Callable::User(LoxFunction {
                declaration: method.clone(),
                closure: self.environment.clone(),
                is_initializer: method.name == "init",
            });
            method_table.insert(method.name.clone(), function);
        }

        if let Some(old) = enclosing {
            self.environment = old;
        }

        let class = Rc::new(LoxClass {
            name: name.to_string(),
            superclass,
            methods: method_table,
        });
        self.environment.assign(name, Value::Class(class));
        Ok(())
    }

    fn execute_block(&mut self, body: &[Stmt], env: Env) -> Result<(), RuntimeError> {
        let previous = std::mem::replace(&mut self.environment, env);
        let result = body.iter().try_for_each(|stmt| self.execute_stmt(stmt));
        self.environment = previous;
        result
    }

    fn evaluate_expr(&mut self, expr: &Expr) -> Result<Value, RuntimeError> {
        match &expr.kind {
            ExprKind::Literal { value } => Ok(match value {
                Lit::Number(n) => Value::Number(*n),
                Lit::Str(s) => Value::Str(s.clone()),
                Lit::Bool(b) => Value::Bool(*b),
                Lit::Nil => Value::Nil,
            }),
            ExprKind::Grouping { inner } => self.evaluate_expr(inner),
            ExprKind::Unary { op, operand } => {
                let operand = self.evaluate_expr(operand)?;
                match op {
                    UnaryOp::Negate => match operand {
                        Value::Number(n) => Ok(Value::Number(-n)),
                        _ => Err(self.error("operand must be a number", expr.span)),
                    },
                    UnaryOp::Not => Ok(Value::Bool(!operand.is_truthy())),
                }
            }
            ExprKind::Binary { op, left, right } => {
                self.evaluate_binary(*op, left, right, expr.span)
            }
            ExprKind::Variable { name } => self.look_up_variable(name, expr.id, expr.span),
            ExprKind::Assign { name, value } => {
                let value = self.evaluate_expr(value)?;
                if let Some(&distance) = self.locals.get(&expr.id) {
                    self.environment.assign_at(distance, name, value.clone());
                } else if !self.globals.assign(name, value.clone()) {
                    return Err(self.error(format!("undefined variable '{name}'"), expr.span));
                }
                Ok(value)
            }
            ExprKind::Logical { op, left, right } => {
                let left = self.evaluate_expr(left)?;
                // Short-circuit: the deciding operand is the result,
                // not a coerced bool
                match op {
                    LogicalOp::Or if left.is_truthy() => Ok(left),
                    LogicalOp::And if !left.is_truthy() => Ok(left),
                    _ => self.evaluate_expr(right),
                }
            }
            ExprKind::Call { callee, args } => self.evaluate_call(callee, args, expr.span),
            ExprKind::Get { object, name } => {
                let object = self.evaluate_expr(object)?;
                match object {
                    Value::Instance(inst) => {
                        let val = inst.borrow().get(name, Rc::clone(&inst));
                        val.ok_or_else(|| {
                            self.error(format!("undefined property '{name}'"), expr.span)
                        })
                    }
                    _ => Err(self.error("only instances have properties", expr.span)),
                }
            }
            ExprKind::Set {
                object,
                name,
                value,
            } => {
                let object = self.evaluate_expr(object)?;
                match object {
                    Value::Instance(inst) => {
                        let value = self.evaluate_expr(value)?;
                        inst.borrow_mut().set(name.clone(), value.clone());
                        Ok(value)
                    }
                    _ => Err(self.error("only instances have fields", expr.span)),
                }
            }
            ExprKind::This => self.look_up_variable("this", expr.id, expr.span),
            ExprKind::Super { method } => {
                let distance = *self
                    .locals
                    .get(&expr.id)
                    .expect("resolver should have resolved 'super'");
                let superclass = self
                    .environment
                    .get_at(distance, "super")
                    .expect("resolver guarantees 'super' exists");
                // 'this' always sits one scope inside the 'super' scope
                let object = self
                    .environment
                    .get_at(distance - 1, "this")
                    .expect("resolver guarantees 'this' exists");

                if let (Value::Class(sc), Value::Instance(inst)) = (superclass, object) {
                    let found = sc.find_method(method).ok_or_else(|| {
                        self.error(format!("undefined property '{method}'"), expr.span)
                    })?;
                    Ok(Value::Function(found.bind(inst)))
                } else {
                    Err(self.error("super lookup failed", expr.span))
                }
            }
        }
    }

    fn evaluate_binary(
        &mut self,
        op: BinaryOp,
        left: &Expr,
        right: &Expr,
        span: Span,
    ) -> Result<Value, RuntimeError> {
        let left = self.evaluate_expr(left)?;
        let right = self.evaluate_expr(right)?;

        match op {
            BinaryOp::Add => match (&left, &right) {
                (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),
                (Value::Str(a), Value::Str(b)) => Ok(Value::Str(format!("{a}{b}"))),
                _ => Err(self.error("operands must be two numbers or two strings", span)),
            },
            BinaryOp::Subtract => self.number_binop(&left, &right, |a, b| a - b, span),
            BinaryOp::Multiply => self.number_binop(&left, &right, |a, b| a * b, span),
            // Division by zero follows IEEE: inf/nan, never an error
            BinaryOp::Divide => self.number_binop(&left, &right, |a, b| a / b, span),
            BinaryOp::Less => self.number_cmp(&left, &right, |a, b| a < b, span),
            BinaryOp::LessEqual => self.number_cmp(&left, &right, |a, b| a <= b, span),
            BinaryOp::Greater => self.number_cmp(&left, &right, |a, b| a > b, span),
            BinaryOp::GreaterEqual => self.number_cmp(&left, &right, |a, b| a >= b, span),
            BinaryOp::Equal => Ok(Value::Bool(left.is_equal(&right))),
            BinaryOp::NotEqual => Ok(Value::Bool(!left.is_equal(&right))),
        }
    }

    fn number_binop(
        &self,
        left: &Value,
        right: &Value,
        op: fn(f64, f64) -> f64,
        span: Span,
    ) -> Result<Value, RuntimeError> {
        match (left, right) {
            (Value::Number(a), Value::Number(b)) => Ok(Value::Number(op(*a, *b))),
            _ => Err(self.error("operands must be numbers", span)),
        }
    }

    fn number_cmp(
        &self,
        left: &Value,
        right: &Value,
        op: fn(f64, f64) -> bool,
        span: Span,
    ) -> Result<Value, RuntimeError> {
        match (left, right) {
            (Value::Number(a), Value::Number(b)) => Ok(Value::Bool(op(*a, *b))),
            _ => Err(self.error("operands must be numbers", span)),
        }
    }

    fn evaluate_call(
        &mut self,
        callee: &Expr,
        args: &[Expr],
        span: Span,
    ) -> Result<Value, RuntimeError> {
        let callee = self.evaluate_expr(callee)?;

        let mut arg_values = Vec::with_capacity(args.len());
        for arg in args {
            arg_values.push(self.evaluate_expr(arg)?);
        }

        match callee {
            Value::Function(func) => {
                if arg_values.len() != func.arity() {
                    return Err(self.error(
                        format!(
                            "expected {} arguments but got {}",
                            func.arity(),
                            arg_values.len()
                        ),
                        span,
                    ));
                }
                self.call_function(&func, arg_values)
            }
            Value::Class(class) => {
                let instance = Rc::new(RefCell::new(LoxInstance::new(Rc::clone(&class))));
                if let Some(init) = class.find_method("init") {
                    if arg_values.len() != init.arity() {
                        return Err(self.error(
                            format!(
                                "expected {} arguments but got {}",
                                init.arity(),
                                arg_values.len()
                            ),
                            span,
                        ));
                    }
                    let bound = init.bind(Rc::clone(&instance));
                    self.call_function(&bound, arg_values)?;
                } else if !arg_values.is_empty() {
                    return Err(self.error(
                        format!("expected 0 arguments but got {}", arg_values.len()),
                        span,
                    ));
                }
                Ok(Value::Instance(instance))
            }
            _ => Err(self.error("can only call functions and classes", span)),
        }
    }

    fn call_function(&mut self, func: &Callable, args: Vec<Value>) -> Result<Value, RuntimeError> {
        match func {
            Callable::Native(native) => Ok(native.call(&args)),
            Callable::User(user_fn) => {
                let env = user_fn.closure.child();
                for (param, arg) in user_fn.declaration.params.iter().zip(args) {
                    env.define(param.clone(), arg);
                }

                let result = self.execute_block(&user_fn.declaration.body, env);

                // The Return unwind is caught exactly here, at the frame
                // boundary; an initializer always yields its instance
                match result {
                    Ok(()) => {
                        if user_fn.is_initializer {
                            Ok(user_fn
                                .closure
                                .get_at(0, "this")
                                .expect("init closure has 'this'"))
                        } else {
                            Ok(Value::Nil)
                        }
                    }
                    Err(RuntimeError::Return { value }) => {
                        if user_fn.is_initializer {
                            Ok(user_fn
                                .closure
                                .get_at(0, "this")
                                .expect("init closure has 'this'"))
                        } else {
                            Ok(value)
                        }
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }

    fn look_up_variable(&self, name: &str, id: ExprId, span: Span) -> Result<Value, RuntimeError> {
        if let Some(&distance) = self.locals.get(&id) {
            Ok(self
                .environment
                .get_at(distance, name)
                .expect("resolver guarantees variable exists"))
        } else {
            self.globals
                .get(name)
                .ok_or_else(|| self.error(format!("undefined variable '{name}'"), span))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::resolver::Resolver;
    use crate::parser::Parser;
    use crate::scanner;
    use rstest::rstest;

    fn run(source: &str) -> Vec<String> {
        let tokens = scanner::scan(source).expect("scan should succeed");
        let program = Parser::new(tokens).parse().expect("parse should succeed");
        let locals = Resolver::new()
            .resolve(&program)
            .expect("resolve should succeed");
        let mut interp = Interpreter::new_capturing();
        interp
            .interpret(&program, locals)
            .expect("interpret should succeed");
        interp.output.clone()
    }

    fn run_err(source: &str) -> RuntimeError {
        let tokens = scanner::scan(source).expect("scan should succeed");
        let program = Parser::new(tokens).parse().expect("parse should succeed");
        let locals = Resolver::new()
            .resolve(&program)
            .expect("resolve should succeed");
        let mut interp = Interpreter::new_capturing();
        interp.set_source(source);
        interp.interpret(&program, locals).unwrap_err()
    }

    #[rstest]
    #[case("print 1 + 2;", "3")]
    #[case("print 10 - 3;", "7")]
    #[case("print 2 * 3;", "6")]
    #[case("print 10 / 4;", "2.5")]
    #[case("print -5;", "-5")]
    fn arithmetic(#[case] source: &str, #[case] expected: &str) {
        assert_eq!(run(source), vec![expected]);
    }

    #[test]
    fn string_concatenation() {
        assert_eq!(run("print \"hello\" + \" world\";"), vec!["hello world"]);
    }

    #[test]
    fn division_by_zero_is_ieee() {
        assert_eq!(run("print 1 / 0;"), vec!["inf"]);
        assert_eq!(run("print -1 / 0;"), vec!["-inf"]);
    }

    #[test]
    fn truthiness() {
        assert_eq!(run("print !nil;"), vec!["true"]);
        assert_eq!(run("print !false;"), vec!["true"]);
        assert_eq!(run("print !0;"), vec!["false"]);
        assert_eq!(run("print !\"hello\";"), vec!["false"]);
    }

    #[test]
    fn equality() {
        assert_eq!(run("print 1 == 1;"), vec!["true"]);
        assert_eq!(run("print 1 == 2;"), vec!["false"]);
        assert_eq!(run("print nil == nil;"), vec!["true"]);
        assert_eq!(run("print 1 != 2;"), vec!["true"]);
        assert_eq!(run("print 1 == \"1\";"), vec!["false"]);
    }

    #[test]
    fn variables() {
        assert_eq!(run("var x = 10; print x;"), vec!["10"]);
        assert_eq!(run("var x; print x;"), vec!["nil"]);
        assert_eq!(run("var x = 1; x = 2; print x;"), vec!["2"]);
    }

    #[test]
    fn blocks_and_scoping() {
        let output = run("var x = 1; { var x = 2; print x; } print x;");
        assert_eq!(output, vec!["2", "1"]);
    }

    #[test]
    fn if_else() {
        assert_eq!(run("if (true) print 1; else print 2;"), vec!["1"]);
        assert_eq!(run("if (false) print 1; else print 2;"), vec!["2"]);
    }

    #[test]
    fn while_loop() {
        let output = run("var i = 0; while (i < 3) { print i; i = i + 1; }");
        assert_eq!(output, vec!["0", "1", "2"]);
    }

    #[test]
    fn for_loop() {
        let output = run("for (var i = 0; i < 3; i = i + 1) print i;");
        assert_eq!(output, vec!["0", "1", "2"]);
    }

    #[test]
    fn functions() {
        let output = run("fun add(a, b) { return a + b; } print add(1, 2);");
        assert_eq!(output, vec!["3"]);
    }

    #[test]
    fn function_without_return_yields_nil() {
        assert_eq!(run("fun f() {} print f();"), vec!["nil"]);
    }

    #[test]
    fn first_return_wins() {
        assert_eq!(run("fun f() { return 1; return 2; } print f();"), vec!["1"]);
    }

    #[test]
    fn return_unwinds_nested_blocks() {
        assert_eq!(run("fun f() { { { return 7; } } } print f();"), vec!["7"]);
    }

    #[test]
    fn closures() {
        let output = run("fun makeCounter() {
                var i = 0;
                fun count() {
                    i = i + 1;
                    return i;
                }
                return count;
            }
            var counter = makeCounter();
            print counter();
            print counter();");
        assert_eq!(output, vec!["1", "2"]);
    }

    #[test]
    fn sibling_closures_share_environment() {
        let output = run("fun make() {
                var n = 0;
                fun inc() { n = n + 1; }
                fun get() { return n; }
                inc();
                inc();
                return get();
            }
            print make();");
        assert_eq!(output, vec!["2"]);
    }

    #[test]
    fn classes() {
        let output = run("class Foo {
                bar() { return 42; }
            }
            var foo = Foo();
            print foo.bar();");
        assert_eq!(output, vec!["42"]);
    }

    #[test]
    fn class_fields() {
        let output = run("class Foo {}
            var foo = Foo();
            foo.x = 10;
            print foo.x;");
        assert_eq!(output, vec!["10"]);
    }

    #[test]
    fn class_this() {
        let output = run("class Foo {
                init(x) { this.x = x; }
                getX() { return this.x; }
            }
            var foo = Foo(42);
            print foo.getX();");
        assert_eq!(output, vec!["42"]);
    }

    #[test]
    fn initializer_bare_return_yields_instance() {
        let output = run("class Foo {
                init() { this.x = 1; return; }
            }
            print Foo().x;");
        assert_eq!(output, vec!["1"]);
    }

    #[test]
    fn inheritance() {
        let output = run("class Animal {
                speak() { return \"...\"; }
            }
            class Dog < Animal {
                speak() { return \"Woof!\"; }
            }
            var dog = Dog();
            print dog.speak();");
        assert_eq!(output, vec!["Woof!"]);
    }

    #[test]
    fn super_call() {
        let output = run("class A {
                greet() { return \"A\"; }
            }
            class B < A {
                greet() { return super.greet() + \"B\"; }
            }
            var b = B();
            print b.greet();");
        assert_eq!(output, vec!["AB"]);
    }

    #[test]
    fn super_uses_defining_class_not_receiver() {
        // C inherits B's test(); super inside it must still start above B's
        // defining class (A), not above the receiver's class (C)
        let output = run("class A { m() { return \"A\"; } }
            class B < A { test() { return super.m(); } }
            class C < B { m() { return \"C\"; } }
            print C().test();");
        assert_eq!(output, vec!["A"]);
    }

    #[test]
    fn bound_method_remembers_instance() {
        let output = run("class Foo {
                init(n) { this.n = n; }
                get() { return this.n; }
            }
            var m = Foo(7).get;
            print m();");
        assert_eq!(output, vec!["7"]);
    }

    #[test]
    fn logical_operators_return_operand() {
        assert_eq!(run("print true or false;"), vec!["true"]);
        assert_eq!(run("print false and true;"), vec!["false"]);
        assert_eq!(run("print nil or \"yes\";"), vec!["yes"]);
        assert_eq!(run("print nil and \"never\";"), vec!["nil"]);
    }

    #[test]
    fn print_callable_forms() {
        assert_eq!(run("fun f() {} print f;"), vec!["<fn f>"]);
        assert_eq!(run("print clock;"), vec!["<native fn>"]);
        assert_eq!(run("class C {} print C;"), vec!["C"]);
        assert_eq!(run("class C {} print C();"), vec!["C instance"]);
        assert_eq!(run("class C { m() {} } print C().m;"), vec!["<fn m>"]);
    }

    #[test]
    fn undefined_variable_error() {
        let err = run_err("print x;");
        assert!(err.to_string().contains("undefined variable"));
    }

    #[test]
    fn runtime_error_carries_line() {
        let err = run_err("var ok = 1;\nprint \"a\" + 1;");
        assert_eq!(err.line(), Some(2));
    }

    #[test]
    fn wrong_arity_error() {
        let err = run_err("fun f(a) {} f(1, 2);");
        assert!(err.to_string().contains("expected 1 arguments"));
    }

    #[test]
    fn type_error_addition() {
        let err = run_err("print 1 + \"a\";");
        assert!(err.to_string().contains("operands must be"));
    }

    #[test]
    fn call_non_callable_error() {
        let err = run_err("var x = 1; x();");
        assert!(err.to_string().contains("can only call"));
    }

    #[test]
    fn property_on_non_instance_error() {
        let err = run_err("var x = 1; print x.y;");
        assert!(err.to_string().contains("only instances"));
    }

    #[test]
    fn fibonacci() {
        let output = run("fun fib(n) {
                if (n <= 1) return n;
                return fib(n - 1) + fib(n - 2);
            }
            for (var i = 0; i < 10; i = i + 1) {
                print fib(i);
            }");
        assert_eq!(
            output,
            vec!["0", "1", "1", "2", "3", "5", "8", "13", "21", "34"]
        );
    }
}
