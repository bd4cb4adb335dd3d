use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;

use duolox::ast::printer;
use duolox::interpreter::Interpreter;
use duolox::interpreter::resolver::Resolver;
use duolox::parser::Parser as LoxParser;
use duolox::scanner;

/// Exit code for static (scan/parse/resolve) errors, per sysexits EX_DATAERR.
const EXIT_STATIC_ERROR: u8 = 65;
/// Exit code for runtime errors, per sysexits EX_SOFTWARE.
const EXIT_RUNTIME_ERROR: u8 = 70;

#[derive(Parser, Debug)]
#[command(name = "duolox", about = "The Lox tree-walk interpreter")]
struct Cli {
    /// Lox source file to run (omit for REPL)
    file: Option<PathBuf>,

    /// Dump tokens and exit
    #[arg(long)]
    dump_tokens: bool,

    /// Dump AST and exit
    #[arg(long)]
    dump_ast: bool,

    /// AST output format
    #[arg(long, default_value = "sexp", value_parser = ["sexp", "json"])]
    ast_format: String,
}

fn read_source(path: &PathBuf) -> Result<String> {
    std::fs::read_to_string(path)
        .with_context(|| format!("read source file '{}'", path.display()))
}

fn report_static_errors(errors: Vec<duolox::error::CompileError>, source: &str) -> ExitCode {
    for error in errors {
        eprintln!("{}", error.report(source));
    }
    ExitCode::from(EXIT_STATIC_ERROR)
}

fn run_source(source: &str) -> ExitCode {
    let tokens = match scanner::scan(source) {
        Ok(t) => t,
        Err(errors) => return report_static_errors(errors, source),
    };
    let program = match LoxParser::new(tokens).parse() {
        Ok(p) => p,
        Err(errors) => return report_static_errors(errors, source),
    };
    let locals = match Resolver::new().resolve(&program) {
        Ok(l) => l,
        Err(errors) => return report_static_errors(errors, source),
    };

    let mut interpreter = Interpreter::new();
    interpreter.set_source(source);
    match interpreter.interpret(&program, locals) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.report());
            ExitCode::from(EXIT_RUNTIME_ERROR)
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    if cli.dump_tokens {
        let path = cli.file.as_ref().context("--dump-tokens requires a file")?;
        let source = read_source(path)?;
        let tokens = match scanner::scan(&source) {
            Ok(t) => t,
            Err(errors) => return Ok(report_static_errors(errors, &source)),
        };
        for token in &tokens {
            println!("{token}");
        }
        return Ok(ExitCode::SUCCESS);
    }

    if cli.dump_ast {
        let path = cli.file.as_ref().context("--dump-ast requires a file")?;
        let source = read_source(path)?;
        let tokens = match scanner::scan(&source) {
            Ok(t) => t,
            Err(errors) => return Ok(report_static_errors(errors, &source)),
        };
        let program = match LoxParser::new(tokens).parse() {
            Ok(p) => p,
            Err(errors) => return Ok(report_static_errors(errors, &source)),
        };
        if cli.ast_format.as_str() == "json" {
            print!("{}", printer::to_json(&program));
        } else {
            print!("{}", printer::to_sexp(&program));
        }
        return Ok(ExitCode::SUCCESS);
    }

    match cli.file {
        Some(ref path) => {
            let source = read_source(path)?;
            Ok(run_source(&source))
        }
        None => {
            duolox::repl::run_repl();
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
