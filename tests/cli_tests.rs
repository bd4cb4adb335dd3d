//! End-to-end checks of the two binaries: exit codes, stdout, and the
//! stderr diagnostic formats.

use std::path::PathBuf;
use std::process::Command;

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("fixtures")
        .join(name)
}

fn tree_walk() -> Command {
    Command::new(env!("CARGO_BIN_EXE_duolox"))
}

fn bytecode() -> Command {
    Command::new(env!("CARGO_BIN_EXE_duolox-vm"))
}

#[test]
fn tree_walk_runs_fixture_successfully() {
    let output = tree_walk()
        .arg(fixture("fib.lox"))
        .output()
        .expect("run duolox");
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout), "55\n");
}

#[test]
fn tree_walk_static_error_exits_65() {
    let output = tree_walk()
        .arg(fixture("error_missing_semicolon.lox"))
        .output()
        .expect("run duolox");
    assert_eq!(output.status.code(), Some(65));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("[line 4] Error at 'print'"),
        "unexpected stderr: {stderr}"
    );
}

#[test]
fn tree_walk_runtime_error_exits_70() {
    let output = tree_walk()
        .arg(fixture("type_error.lox"))
        .output()
        .expect("run duolox");
    assert_eq!(output.status.code(), Some(70));
    // output before the error still made it to stdout
    assert_eq!(String::from_utf8_lossy(&output.stdout), "ok\n");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("operands must be two numbers or two strings"));
    assert!(stderr.contains("[line 2]"));
}

#[test]
fn tree_walk_missing_file_exits_1() {
    let output = tree_walk()
        .arg("no-such-file.lox")
        .output()
        .expect("run duolox");
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn tree_walk_dump_tokens() {
    let output = tree_walk()
        .arg("--dump-tokens")
        .arg(fixture("hello.lox"))
        .output()
        .expect("run duolox");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Print"));
    assert!(stdout.contains("Eof"));
}

#[test]
fn tree_walk_dump_ast_sexp() {
    let output = tree_walk()
        .arg("--dump-ast")
        .arg(fixture("hello.lox"))
        .output()
        .expect("run duolox");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.trim(), "(print \"hello, lox\")");
}

#[test]
fn vm_runs_fixture_successfully() {
    let output = bytecode()
        .arg(fixture("loops.lox"))
        .output()
        .expect("run duolox-vm");
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout), "15\n0\n1\n2\nx\n");
}

#[test]
fn vm_unsupported_construct_exits_65() {
    let output = bytecode()
        .arg(fixture("fib.lox"))
        .output()
        .expect("run duolox-vm");
    assert_eq!(output.status.code(), Some(65));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("not supported"));
}

#[test]
fn vm_runtime_error_exits_70() {
    let output = bytecode()
        .arg(fixture("type_error.lox"))
        .output()
        .expect("run duolox-vm");
    assert_eq!(output.status.code(), Some(70));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("[line 2]"));
}

#[test]
fn vm_disassembles_source() {
    let output = bytecode()
        .arg("--disassemble")
        .arg(fixture("hello.lox"))
        .output()
        .expect("run duolox-vm");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Constant"));
    assert!(stdout.contains("Print"));
    assert!(stdout.contains("Return"));
}

#[test]
fn vm_compiles_and_runs_blox_file() {
    // compile into a scratch copy so the fixtures directory stays clean
    let scratch = std::env::temp_dir().join("duolox-cli-test");
    std::fs::create_dir_all(&scratch).expect("create scratch dir");
    let lox_path = scratch.join("hello.lox");
    std::fs::copy(fixture("hello.lox"), &lox_path).expect("copy fixture");

    let compile_output = bytecode()
        .arg("--compile")
        .arg(&lox_path)
        .output()
        .expect("run duolox-vm --compile");
    assert!(
        compile_output.status.success(),
        "compile failed: {}",
        String::from_utf8_lossy(&compile_output.stderr)
    );

    let blox_path = lox_path.with_extension("blox");
    assert!(blox_path.exists(), "expected {} to exist", blox_path.display());

    let run_output = bytecode()
        .arg(&blox_path)
        .output()
        .expect("run duolox-vm on .blox");
    assert!(run_output.status.success());
    assert_eq!(
        String::from_utf8_lossy(&run_output.stdout),
        "hello, lox\n"
    );
}

#[test]
fn vm_trace_goes_to_stderr_not_stdout() {
    let output = bytecode()
        .arg("--trace")
        .arg(fixture("hello.lox"))
        .output()
        .expect("run duolox-vm --trace");
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout), "hello, lox\n");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Constant"), "trace should disassemble: {stderr}");
}
