pub mod chunk;
pub mod compiler;
#[allow(clippy::module_inception)]
pub mod vm;

use crate::error::{CompileError, RuntimeError};
use crate::scanner;
use crate::vm::compiler::Compiler;
use crate::vm::vm::Vm;

/// Compile source code to a bytecode chunk. Scan and compile errors are
/// collected and returned together.
pub fn compile_to_chunk(source: &str) -> Result<chunk::Chunk, Vec<CompileError>> {
    let tokens = scanner::scan(source)?;
    Compiler::new(tokens).compile()
}

/// Errors from running source on the bytecode pipeline: static errors keep
/// their diagnostics, runtime errors carry a line.
pub enum VmRunError {
    Compile(Vec<CompileError>),
    Runtime(RuntimeError),
}

/// One-shot convenience: compile and execute source on a fresh VM.
pub fn interpret(source: &str) -> Result<(), VmRunError> {
    let compiled = compile_to_chunk(source).map_err(VmRunError::Compile)?;
    let mut vm = Vm::new();
    vm.interpret(&compiled).map_err(VmRunError::Runtime)
}
