use crate::ast::*;

/// Render a program as one s-expression per top-level statement.
pub fn to_sexp(program: &Program) -> String {
    let mut out = String::new();
    for stmt in &program.statements {
        out.push_str(&stmt_sexp(stmt));
        out.push('\n');
    }
    out
}

pub fn to_json(program: &Program) -> String {
    serde_json::to_string_pretty(program).expect("AST should be serializable")
}

fn stmt_sexp(stmt: &Stmt) -> String {
    match &stmt.kind {
        StmtKind::Block { body } => {
            let mut s = String::from("(block");
            for inner in body {
                s.push(' ');
                s.push_str(&stmt_sexp(inner));
            }
            s.push(')');
            s
        }
        StmtKind::Class {
            name,
            superclass,
            methods,
        } => {
            let mut s = format!("(class {name}");
            if let Some(superclass) = superclass {
                s.push_str(&format!(" < {superclass}"));
            }
            for method in methods {
                s.push(' ');
                s.push_str(&function_sexp(method));
            }
            s.push(')');
            s
        }
        StmtKind::Expression { expr } => expr_sexp(expr),
        StmtKind::Function(function) => function_sexp(function),
        StmtKind::If {
            condition,
            then_branch,
            else_branch,
        } => {
            let mut s = format!("(if {} {}", expr_sexp(condition), stmt_sexp(then_branch));
            if let Some(else_branch) = else_branch {
                s.push(' ');
                s.push_str(&stmt_sexp(else_branch));
            }
            s.push(')');
            s
        }
        StmtKind::Print { expr } => format!("(print {})", expr_sexp(expr)),
        StmtKind::Return { value } => match value {
            Some(value) => format!("(return {})", expr_sexp(value)),
            None => "(return)".to_string(),
        },
        StmtKind::Var { name, initializer } => match initializer {
            Some(init) => format!("(var {name} {})", expr_sexp(init)),
            None => format!("(var {name})"),
        },
        StmtKind::While { condition, body } => {
            format!("(while {} {})", expr_sexp(condition), stmt_sexp(body))
        }
    }
}

fn function_sexp(function: &Function) -> String {
    let mut s = format!("(fun {} ({})", function.name, function.params.join(" "));
    for stmt in &function.body {
        s.push(' ');
        s.push_str(&stmt_sexp(stmt));
    }
    s.push(')');
    s
}

fn expr_sexp(expr: &Expr) -> String {
    match &expr.kind {
        ExprKind::Assign { name, value } => format!("(= {name} {})", expr_sexp(value)),
        ExprKind::Binary { op, left, right } => {
            format!("({op} {} {})", expr_sexp(left), expr_sexp(right))
        }
        ExprKind::Call { callee, args } => {
            let mut s = format!("(call {}", expr_sexp(callee));
            for arg in args {
                s.push(' ');
                s.push_str(&expr_sexp(arg));
            }
            s.push(')');
            s
        }
        ExprKind::Get { object, name } => format!("(. {} {name})", expr_sexp(object)),
        ExprKind::Grouping { inner } => format!("(group {})", expr_sexp(inner)),
        ExprKind::Literal { value } => lit_sexp(value),
        ExprKind::Logical { op, left, right } => {
            format!("({op} {} {})", expr_sexp(left), expr_sexp(right))
        }
        ExprKind::Set {
            object,
            name,
            value,
        } => format!("(.= {} {name} {})", expr_sexp(object), expr_sexp(value)),
        ExprKind::Super { method } => format!("(super {method})"),
        ExprKind::This => "this".to_string(),
        ExprKind::Unary { op, operand } => format!("({op} {})", expr_sexp(operand)),
        ExprKind::Variable { name } => name.clone(),
    }
}

fn lit_sexp(value: &Lit) -> String {
    match value {
        Lit::Number(n) => format!("{n}"),
        Lit::Str(s) => format!("\"{s}\""),
        Lit::Bool(b) => b.to_string(),
        Lit::Nil => "nil".to_string(),
    }
}
