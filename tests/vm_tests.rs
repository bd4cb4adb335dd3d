use duolox::error::RuntimeError;
use duolox::vm::chunk;
use duolox::vm::compile_to_chunk;
use duolox::vm::vm::Vm;

fn run_vm_fixture(source: &str) -> Vec<String> {
    let compiled = compile_to_chunk(source).expect("compile should succeed");
    let mut vm = Vm::new();
    vm.interpret(&compiled).expect("interpret should succeed");
    vm.output().to_vec()
}

fn run_vm_roundtrip(source: &str) -> Vec<String> {
    let compiled = compile_to_chunk(source).expect("compile should succeed");
    let bytes = rmp_serde::to_vec(&compiled).expect("serialize should succeed");
    let loaded: chunk::Chunk = rmp_serde::from_slice(&bytes).expect("deserialize should succeed");
    let mut vm = Vm::new();
    vm.interpret(&loaded).expect("interpret should succeed");
    vm.output().to_vec()
}

fn run_vm_err(source: &str) -> RuntimeError {
    let compiled = compile_to_chunk(source).expect("compile should succeed");
    let mut vm = Vm::new();
    vm.interpret(&compiled).unwrap_err()
}

#[test]
fn vm_fixture_hello() {
    let source = include_str!("../fixtures/hello.lox");
    let expected = include_str!("../fixtures/hello.expected");
    let expected_lines: Vec<&str> = expected.lines().collect();
    assert_eq!(run_vm_fixture(source), expected_lines);
}

#[test]
fn vm_fixture_arithmetic() {
    let source = include_str!("../fixtures/arithmetic.lox");
    let expected = include_str!("../fixtures/arithmetic.expected");
    let expected_lines: Vec<&str> = expected.lines().collect();
    assert_eq!(run_vm_fixture(source), expected_lines);
}

#[test]
fn vm_fixture_scoping() {
    let source = include_str!("../fixtures/scoping.lox");
    let expected = include_str!("../fixtures/scoping.expected");
    let expected_lines: Vec<&str> = expected.lines().collect();
    assert_eq!(run_vm_fixture(source), expected_lines);
}

#[test]
fn vm_fixture_loops() {
    let source = include_str!("../fixtures/loops.lox");
    let expected = include_str!("../fixtures/loops.expected");
    let expected_lines: Vec<&str> = expected.lines().collect();
    assert_eq!(run_vm_fixture(source), expected_lines);
}

#[test]
fn vm_bytecode_roundtrip_loops() {
    let source = include_str!("../fixtures/loops.lox");
    let expected = include_str!("../fixtures/loops.expected");
    let expected_lines: Vec<&str> = expected.lines().collect();
    assert_eq!(run_vm_roundtrip(source), expected_lines);
}

#[test]
fn vm_bytecode_roundtrip_preserves_chunk() {
    let compiled = compile_to_chunk("var x = 1; print x + 2;").expect("compile should succeed");
    let bytes = rmp_serde::to_vec(&compiled).expect("serialize should succeed");
    let loaded: chunk::Chunk = rmp_serde::from_slice(&bytes).expect("deserialize should succeed");
    assert_eq!(compiled, loaded);
}

#[test]
fn vm_bytecode_roundtrip_with_magic_header() {
    let compiled = compile_to_chunk("print 1 + 2;").expect("compile should succeed");
    let payload = rmp_serde::to_vec(&compiled).expect("serialize should succeed");

    let mut bytes = Vec::with_capacity(4 + payload.len());
    bytes.extend_from_slice(b"blox");
    bytes.extend_from_slice(&payload);

    assert_eq!(&bytes[..4], b"blox", "file should start with magic header");

    let loaded: chunk::Chunk =
        rmp_serde::from_slice(&bytes[4..]).expect("deserialize should succeed");
    let mut vm = Vm::new();
    vm.interpret(&loaded).expect("interpret should succeed");
    assert_eq!(vm.output(), &["3"]);
}

#[test]
fn vm_disassemble_then_reread_opcodes() {
    let compiled = compile_to_chunk("if (1 < 2) print \"yes\"; else print \"no\";")
        .expect("compile should succeed");
    // the decoded opcode walk and the disassembly must agree on
    // instruction count
    let ops = chunk::opcodes(&compiled);
    let text = chunk::disassemble(&compiled, "test");
    // one header line plus one line per instruction
    assert_eq!(text.lines().count(), ops.len() + 1);
}

#[test]
fn vm_runtime_error_reports_line() {
    let err = run_vm_err("var ok = 1;\nprint -\"bad\";");
    let msg = err.report();
    assert!(msg.contains("operand must be a number"));
    assert!(msg.contains("[line 2]"));
}

#[test]
fn vm_unsupported_function_is_compile_error() {
    let errors = compile_to_chunk("fun f() {}").unwrap_err();
    assert!(errors[0].to_string().contains("not supported"));
}

#[test]
fn vm_deep_scopes() {
    // nesting well past anything a statement needs; each scope adds a local
    let mut source = String::new();
    for i in 0..64 {
        source.push_str(&format!("{{ var v{i} = {i};\n"));
    }
    source.push_str("print v63;\n");
    for _ in 0..64 {
        source.push('}');
    }
    assert_eq!(run_vm_fixture(&source), vec!["63"]);
}
