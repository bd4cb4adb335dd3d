use std::io::{self, BufRead, Write};

use crate::interpreter::Interpreter;
use crate::interpreter::resolver::Resolver;
use crate::parser::Parser;
use crate::scanner;
use crate::vm::compiler::Compiler;
use crate::vm::vm::Vm;

/// Run the tree-walk REPL, one statement per line. The environment (and the
/// resolver annotations accumulated so far) persists across lines.
pub fn run_repl() {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut interpreter = Interpreter::new();

    loop {
        let Some(source) = read_line(&stdin, &mut stdout) else {
            break;
        };
        if source.is_empty() {
            continue;
        }

        let tokens = match scanner::scan(&source) {
            Ok(t) => t,
            Err(errors) => {
                report_static_errors(errors, &source);
                continue;
            }
        };

        let program = match Parser::new(tokens).parse() {
            Ok(p) => p,
            Err(errors) => {
                report_static_errors(errors, &source);
                continue;
            }
        };

        let locals = match Resolver::new().resolve(&program) {
            Ok(l) => l,
            Err(errors) => {
                report_static_errors(errors, &source);
                continue;
            }
        };

        interpreter.merge_locals(locals);
        if let Err(e) = interpreter.interpret_additional(&program) {
            eprintln!("{}", e.report());
        }
    }
}

/// Run the bytecode REPL: each line compiles to its own chunk, executed on
/// one VM so globals persist.
pub fn run_vm_repl() {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut vm = Vm::new();

    loop {
        let Some(source) = read_line(&stdin, &mut stdout) else {
            break;
        };
        if source.is_empty() {
            continue;
        }

        let tokens = match scanner::scan(&source) {
            Ok(t) => t,
            Err(errors) => {
                report_static_errors(errors, &source);
                continue;
            }
        };

        let chunk = match Compiler::new(tokens).compile() {
            Ok(c) => c,
            Err(errors) => {
                report_static_errors(errors, &source);
                continue;
            }
        };

        if let Err(e) = vm.interpret(&chunk) {
            eprintln!("{}", e.report());
        }
    }
}

/// Prompt, read one line, trim it, and auto-wrap bare expressions as
/// `print <expr>;`. Returns `None` at EOF.
fn read_line(stdin: &io::Stdin, stdout: &mut io::Stdout) -> Option<String> {
    print!("> ");
    stdout.flush().expect("flush stdout");

    let mut line = String::new();
    match stdin.lock().read_line(&mut line) {
        Ok(0) => return None, // Ctrl-D / EOF
        Ok(_) => {}
        Err(e) => {
            eprintln!("read error: {e}");
            return None;
        }
    }

    let trimmed = line.trim();
    if is_bare_expression(trimmed) {
        Some(format!("print {trimmed};"))
    } else {
        Some(trimmed.to_string())
    }
}

fn report_static_errors(errors: Vec<crate::error::CompileError>, source: &str) {
    for e in errors {
        let report = miette::Report::new(e.with_source_code("repl", source));
        eprintln!("{report:?}");
    }
}

/// Heuristic: treat the line as a bare expression if it doesn't end with
/// ';' or '}' and doesn't start with a keyword that begins a declaration
/// or statement.
fn is_bare_expression(line: &str) -> bool {
    if line.is_empty() || line.ends_with(';') || line.ends_with('}') {
        return false;
    }
    let first_word = line.split_whitespace().next().unwrap_or("");
    !matches!(
        first_word,
        "var" | "fun" | "class" | "if" | "while" | "for" | "print" | "return" | "{"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_expression_detection() {
        assert!(is_bare_expression("1 + 2"));
        assert!(is_bare_expression("x"));
        assert!(!is_bare_expression(""));
        assert!(!is_bare_expression("var x = 1;"));
        assert!(!is_bare_expression("print 1;"));
        assert!(!is_bare_expression("{ var x = 1; }"));
        assert!(!is_bare_expression("if (true) print 1;"));
        assert!(!is_bare_expression("fun foo() {}"));
    }
}
