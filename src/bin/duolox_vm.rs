use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::Parser;

use duolox::vm::chunk::{self, Chunk};
use duolox::vm::vm::Vm;

/// Exit code for static (scan/compile) errors, per sysexits EX_DATAERR.
const EXIT_STATIC_ERROR: u8 = 65;
/// Exit code for runtime errors, per sysexits EX_SOFTWARE.
const EXIT_RUNTIME_ERROR: u8 = 70;

/// Magic number at the start of every `.blox` file: ASCII "blox"
const BLOX_MAGIC: &[u8; 4] = b"blox";

#[derive(Parser, Debug)]
#[command(name = "duolox-vm", about = "The Lox bytecode compiler and VM")]
struct Cli {
    /// Lox source file or compiled .blox file to run (omit for REPL)
    file: Option<PathBuf>,

    /// Compile to bytecode and save to a .blox file (derived from input path)
    #[arg(long)]
    compile: bool,

    /// Disassemble bytecode (from source or a saved .blox file) and print
    #[arg(long)]
    disassemble: bool,

    /// Trace execution: print the stack and each instruction to stderr
    #[arg(long)]
    trace: bool,
}

fn read_source(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .with_context(|| format!("read source file '{}'", path.display()))
}

fn save_chunk(compiled: &Chunk, path: &Path) -> Result<()> {
    let payload = rmp_serde::to_vec(compiled).context("serialize bytecode to MessagePack")?;
    let mut bytes = Vec::with_capacity(BLOX_MAGIC.len() + payload.len());
    bytes.extend_from_slice(BLOX_MAGIC);
    bytes.extend_from_slice(&payload);
    std::fs::write(path, bytes).with_context(|| format!("write bytecode to '{}'", path.display()))
}

fn load_chunk(path: &Path) -> Result<Chunk> {
    let bytes =
        std::fs::read(path).with_context(|| format!("read bytecode from '{}'", path.display()))?;
    if bytes.len() < BLOX_MAGIC.len() || &bytes[..BLOX_MAGIC.len()] != BLOX_MAGIC {
        bail!(
            "'{}' is not a valid .blox file (missing magic header)",
            path.display()
        );
    }
    rmp_serde::from_slice(&bytes[BLOX_MAGIC.len()..])
        .context("deserialize bytecode from MessagePack")
}

fn is_bytecode_file(path: &Path) -> Result<bool> {
    let file =
        std::fs::File::open(path).with_context(|| format!("open file '{}'", path.display()))?;
    let mut header = [0u8; 4];
    use std::io::Read;
    match file.take(4).read(&mut header) {
        Ok(4) => Ok(&header == BLOX_MAGIC),
        _ => Ok(false),
    }
}

fn report_static_errors(errors: Vec<duolox::error::CompileError>, source: &str) -> ExitCode {
    for error in errors {
        eprintln!("{}", error.report(source));
    }
    ExitCode::from(EXIT_STATIC_ERROR)
}

fn run_chunk(compiled: &Chunk, trace: bool) -> ExitCode {
    let mut vm = Vm::new();
    vm.set_trace(trace);
    match vm.interpret(compiled) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.report());
            ExitCode::from(EXIT_RUNTIME_ERROR)
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    if cli.compile {
        let input_path = cli.file.as_ref().context("--compile requires an input file")?;
        let source = read_source(input_path)?;
        let compiled = match duolox::vm::compile_to_chunk(&source) {
            Ok(c) => c,
            Err(errors) => return Ok(report_static_errors(errors, &source)),
        };
        let output_path = input_path.with_extension("blox");
        save_chunk(&compiled, &output_path)?;
        return Ok(ExitCode::SUCCESS);
    }

    if cli.disassemble {
        let path = cli.file.as_ref().context("--disassemble requires an input file")?;
        if is_bytecode_file(path)? {
            let compiled = load_chunk(path)?;
            print!("{}", chunk::disassemble(&compiled, &path.display().to_string()));
        } else {
            let source = read_source(path)?;
            let compiled = match duolox::vm::compile_to_chunk(&source) {
                Ok(c) => c,
                Err(errors) => return Ok(report_static_errors(errors, &source)),
            };
            print!("{}", chunk::disassemble(&compiled, &path.display().to_string()));
        }
        return Ok(ExitCode::SUCCESS);
    }

    match cli.file {
        Some(ref path) => {
            // a saved .blox chunk runs directly, anything else compiles first
            if is_bytecode_file(path)? {
                let compiled = load_chunk(path)?;
                Ok(run_chunk(&compiled, cli.trace))
            } else {
                let source = read_source(path)?;
                let compiled = match duolox::vm::compile_to_chunk(&source) {
                    Ok(c) => c,
                    Err(errors) => return Ok(report_static_errors(errors, &source)),
                };
                Ok(run_chunk(&compiled, cli.trace))
            }
        }
        None => {
            duolox::repl::run_vm_repl();
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
