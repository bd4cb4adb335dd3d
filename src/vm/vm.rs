use std::collections::HashMap;
use std::io::Write;
use std::rc::Rc;

use crate::error::RuntimeError;
use crate::vm::chunk::{Chunk, Constant, OpCode, disassemble_instruction, op_from_u8};

/// A value on the VM's operand stack. The bytecode pipeline covers the
/// function- and class-free subset, so only the four base types appear.
#[derive(Debug, Clone)]
pub enum Value {
    Number(f64),
    Bool(bool),
    Nil,
    String(Rc<String>),
}

impl Value {
    fn is_falsey(&self) -> bool {
        matches!(self, Self::Nil | Self::Bool(false))
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Nil => write!(f, "nil"),
            Self::String(s) => write!(f, "{s}"),
        }
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Nil, Value::Nil) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Number(a), Value::Number(b)) => a == b,
        (Value::String(a), Value::String(b)) => a == b,
        _ => false,
    }
}

/// Stack-based bytecode interpreter. Globals persist across `interpret`
/// calls so a REPL can feed it one chunk per line.
pub struct Vm {
    stack: Vec<Value>,
    globals: HashMap<String, Value>,
    output: Vec<String>,
    writer: Box<dyn Write>,
    trace: bool,
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

impl Vm {
    pub fn new() -> Self {
        Self {
            stack: Vec::with_capacity(256),
            globals: HashMap::new(),
            output: Vec::new(),
            writer: Box::new(std::io::stdout()),
            trace: false,
        }
    }

    #[cfg(test)]
    fn new_capturing() -> Self {
        let mut vm = Self::new();
        vm.writer = Box::new(Vec::<u8>::new());
        vm
    }

    /// Enable execution tracing: stack contents and the disassembled
    /// current instruction go to stderr before every step.
    pub fn set_trace(&mut self, trace: bool) {
        self.trace = trace;
    }

    pub fn output(&self) -> &[String] {
        &self.output
    }

    #[cfg(test)]
    fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    pub fn interpret(&mut self, chunk: &Chunk) -> Result<(), RuntimeError> {
        let mut ip = 0;

        while ip < chunk.code.len() {
            if self.trace {
                let mut line = String::from("          ");
                for value in &self.stack {
                    line.push_str(&format!("[ {value} ]"));
                }
                eprintln!("{line}");
                let mut text = String::new();
                disassemble_instruction(chunk, ip, &mut text);
                eprint!("{text}");
            }

            let op_offset = ip;
            let op = op_from_u8(chunk.code[ip]).ok_or_else(|| {
                RuntimeError::at_line(
                    format!("unknown opcode {}", chunk.code[ip]),
                    chunk.line_at(ip),
                )
            })?;
            ip += 1;

            match op {
                OpCode::Constant => {
                    let idx = chunk.code[ip] as usize;
                    ip += 1;
                    self.stack.push(constant_to_value(&chunk.constants[idx]));
                }
                OpCode::Nil => self.stack.push(Value::Nil),
                OpCode::True => self.stack.push(Value::Bool(true)),
                OpCode::False => self.stack.push(Value::Bool(false)),
                OpCode::Pop => {
                    self.pop();
                }
                OpCode::GetLocal => {
                    let slot = chunk.code[ip] as usize;
                    ip += 1;
                    let value = self.stack[slot].clone();
                    self.stack.push(value);
                }
                OpCode::SetLocal => {
                    let slot = chunk.code[ip] as usize;
                    ip += 1;
                    let value = self.peek().clone();
                    self.stack[slot] = value;
                }
                OpCode::GetGlobal => {
                    let name = string_constant(chunk, chunk.code[ip]);
                    ip += 1;
                    let value = self.globals.get(name).cloned().ok_or_else(|| {
                        RuntimeError::at_line(
                            format!("undefined variable '{name}'"),
                            chunk.line_at(op_offset),
                        )
                    })?;
                    self.stack.push(value);
                }
                OpCode::SetGlobal => {
                    let name = string_constant(chunk, chunk.code[ip]);
                    ip += 1;
                    if !self.globals.contains_key(name) {
                        return Err(RuntimeError::at_line(
                            format!("undefined variable '{name}'"),
                            chunk.line_at(op_offset),
                        ));
                    }
                    // assignment is an expression: the value stays on the stack
                    let value = self.peek().clone();
                    self.globals.insert(name.to_string(), value);
                }
                OpCode::DefineGlobal => {
                    let name = string_constant(chunk, chunk.code[ip]).to_string();
                    ip += 1;
                    let value = self.pop();
                    self.globals.insert(name, value);
                }
                OpCode::Equal => {
                    let b = self.pop();
                    let a = self.pop();
                    self.stack.push(Value::Bool(values_equal(&a, &b)));
                }
                OpCode::Greater => {
                    self.numeric_cmp(|a, b| a > b, chunk.line_at(op_offset))?;
                }
                OpCode::Less => {
                    self.numeric_cmp(|a, b| a < b, chunk.line_at(op_offset))?;
                }
                OpCode::Add => {
                    let b = self.pop();
                    let a = self.pop();
                    match (&a, &b) {
                        (Value::Number(x), Value::Number(y)) => {
                            self.stack.push(Value::Number(x + y));
                        }
                        (Value::String(x), Value::String(y)) => {
                            self.stack.push(Value::String(Rc::new(format!("{x}{y}"))));
                        }
                        _ => {
                            return Err(RuntimeError::at_line(
                                "operands must be two numbers or two strings",
                                chunk.line_at(op_offset),
                            ));
                        }
                    }
                }
                OpCode::Subtract => {
                    self.numeric_binop(|a, b| a - b, chunk.line_at(op_offset))?;
                }
                OpCode::Multiply => {
                    self.numeric_binop(|a, b| a * b, chunk.line_at(op_offset))?;
                }
                OpCode::Divide => {
                    // IEEE semantics: division by zero yields inf/nan
                    self.numeric_binop(|a, b| a / b, chunk.line_at(op_offset))?;
                }
                OpCode::Not => {
                    let value = self.pop();
                    self.stack.push(Value::Bool(value.is_falsey()));
                }
                OpCode::Negate => {
                    let value = self.pop();
                    match value {
                        Value::Number(n) => self.stack.push(Value::Number(-n)),
                        _ => {
                            return Err(RuntimeError::at_line(
                                "operand must be a number",
                                chunk.line_at(op_offset),
                            ));
                        }
                    }
                }
                OpCode::Print => {
                    let value = self.pop();
                    let text = format!("{value}");
                    writeln!(self.writer, "{text}").expect("write should succeed");
                    self.output.push(text);
                }
                OpCode::Jump => {
                    let offset = chunk.read_u16(ip);
                    ip += 2;
                    ip += offset as usize;
                }
                OpCode::JumpIfFalse => {
                    let offset = chunk.read_u16(ip);
                    ip += 2;
                    if self.peek().is_falsey() {
                        ip += offset as usize;
                    }
                }
                OpCode::Loop => {
                    let offset = chunk.read_u16(ip);
                    ip += 2;
                    ip -= offset as usize;
                }
                OpCode::Return => {
                    return Ok(());
                }
            }
        }

        Ok(())
    }

    fn pop(&mut self) -> Value {
        self.stack.pop().expect("compiler maintains stack discipline")
    }

    fn peek(&self) -> &Value {
        self.stack.last().expect("compiler maintains stack discipline")
    }

    fn numeric_binop(&mut self, op: fn(f64, f64) -> f64, line: usize) -> Result<(), RuntimeError> {
        let b = self.pop();
        let a = self.pop();
        match (&a, &b) {
            (Value::Number(x), Value::Number(y)) => {
                self.stack.push(Value::Number(op(*x, *y)));
                Ok(())
            }
            _ => Err(RuntimeError::at_line("operands must be numbers", line)),
        }
    }

    fn numeric_cmp(&mut self, op: fn(f64, f64) -> bool, line: usize) -> Result<(), RuntimeError> {
        let b = self.pop();
        let a = self.pop();
        match (&a, &b) {
            (Value::Number(x), Value::Number(y)) => {
                self.stack.push(Value::Bool(op(*x, *y)));
                Ok(())
            }
            _ => Err(RuntimeError::at_line("operands must be numbers", line)),
        }
    }
}

fn constant_to_value(constant: &Constant) -> Value {
    match constant {
        Constant::Number(n) => Value::Number(*n),
        Constant::String(s) => Value::String(Rc::new(s.clone())),
    }
}

fn string_constant(chunk: &Chunk, idx: u8) -> &str {
    match &chunk.constants[idx as usize] {
        Constant::String(s) => s,
        Constant::Number(_) => panic!("compiler emits string constants for names"),
    }
}
