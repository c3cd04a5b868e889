pub mod error;
pub mod natives;

use std::rc::Rc;

use compiler::chunk::table::HashTable;
use compiler::chunk::value::{Function, Object, QString, Value};
use compiler::chunk::Instruction;
use error::{RuntimeError, RuntimeErrorKind};

/// Matches the compiler's own call-depth ceiling (see the boundary test for
/// a 65-deep call chain): 64 live frames may run, the 65th is refused before
/// it pushes.
const FRAMES_MAX: usize = 64;

struct CallFrame {
    function: Rc<Function>,
    ip: usize,
    /// Stack index of this frame's slot 0 (the callee itself); locals and
    /// arguments sit at `base + 1`, `base + 2`, ...
    base: usize,
}

/// A stack-based bytecode interpreter. Locals and temporaries share one
/// value stack (clox's design); there's no separate locals stack, since
/// nothing here needs to outlive its frame via an upvalue.
pub struct Vm {
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
    globals: HashTable<Value>,
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

impl Vm {
    pub fn new() -> Self {
        let mut globals = HashTable::new();
        natives::install(&mut globals);
        Self {
            stack: Vec::new(),
            frames: Vec::new(),
            globals,
        }
    }

    fn error(&self, kind: RuntimeErrorKind, line: usize) -> RuntimeError {
        RuntimeError { kind, line }
    }

    pub fn run(&mut self, script: Function) -> Result<(), RuntimeError> {
        self.stack.clear();
        self.frames.clear();
        // Slot 0 placeholder for the implicit top-level function; never read.
        self.stack.push(Value::Nil);
        self.frames.push(CallFrame {
            function: Rc::new(script),
            ip: 0,
            base: 0,
        });

        loop {
            let frame_idx = self.frames.len() - 1;
            let ip = self.frames[frame_idx].ip;
            let function = Rc::clone(&self.frames[frame_idx].function);
            let base = self.frames[frame_idx].base;
            let chunk = &function.chunk;

            if ip >= chunk.len() {
                // Every chunk ends in an explicit Return; falling off the
                // end would mean the compiler produced a malformed chunk.
                return Ok(());
            }

            let instr = chunk.instruction_at(ip);
            let line = chunk.line_for(ip);
            if cfg!(feature = "verbose") {
                println!("{ip:04} {instr:?} => {:?}", self.stack);
            }
            self.frames[frame_idx].ip = ip + 1 + instr.operand_len();

            match instr {
                Instruction::Constant => {
                    let idx = chunk.read_u8(ip + 1) as usize;
                    self.stack.push(chunk.constant(idx).clone());
                }
                Instruction::Nil => self.stack.push(Value::Nil),
                Instruction::True => self.stack.push(Value::Bool(true)),
                Instruction::False => self.stack.push(Value::Bool(false)),
                Instruction::Pop => {
                    self.stack.pop();
                }
                Instruction::GetLocal => {
                    let slot = chunk.read_u8(ip + 1) as usize;
                    self.stack.push(self.stack[base + slot].clone());
                }
                Instruction::SetLocal => {
                    let slot = chunk.read_u8(ip + 1) as usize;
                    self.stack[base + slot] = self.stack.last().unwrap().clone();
                }
                Instruction::DefineGlobal => {
                    let idx = chunk.read_u8(ip + 1);
                    let name = Self::name_constant(chunk, idx);
                    let value = self.stack.pop().unwrap();
                    self.globals.insert(name, value);
                }
                Instruction::GetGlobal => {
                    let idx = chunk.read_u8(ip + 1);
                    let name = Self::name_constant(chunk, idx);
                    match self.globals.get(name.as_str(), name.hash()) {
                        Some(value) => {
                            let value = value.clone();
                            self.stack.push(value);
                        }
                        None => {
                            return Err(self.error(
                                RuntimeErrorKind::UndefinedVariable(name.to_string()),
                                line,
                            ))
                        }
                    }
                }
                Instruction::SetGlobal => {
                    let idx = chunk.read_u8(ip + 1);
                    let name = Self::name_constant(chunk, idx);
                    if self.globals.get(name.as_str(), name.hash()).is_none() {
                        return Err(self.error(
                            RuntimeErrorKind::UndefinedVariable(name.to_string()),
                            line,
                        ));
                    }
                    let value = self.stack.last().unwrap().clone();
                    *self.globals.get_mut(name.as_str(), name.hash()).unwrap() = value;
                }
                Instruction::Equal => {
                    let b = self.stack.pop().unwrap();
                    let a = self.stack.pop().unwrap();
                    self.stack.push(Value::Bool(a == b));
                }
                Instruction::Greater => self.compare(line, |a, b| a > b)?,
                Instruction::Less => self.compare(line, |a, b| a < b)?,
                Instruction::Add => self.add(line)?,
                Instruction::Subtract => self.numeric_binary(line, |a, b| a - b)?,
                Instruction::Multiply => self.numeric_binary(line, |a, b| a * b)?,
                Instruction::Divide => self.numeric_binary(line, |a, b| a / b)?,
                Instruction::Not => {
                    let v = self.stack.pop().unwrap();
                    self.stack.push(Value::Bool(!v.is_truthy()));
                }
                Instruction::Negate => {
                    let v = self.stack.pop().unwrap();
                    match v.as_number() {
                        Some(n) => self.stack.push(Value::Number(-n)),
                        None => {
                            return Err(self.error(
                                RuntimeErrorKind::OperandMustBeNumber(v.data_type()),
                                line,
                            ))
                        }
                    }
                }
                Instruction::Print => {
                    let v = self.stack.pop().unwrap();
                    println!("{v}");
                }
                Instruction::Jump => {
                    let target = chunk.read_jump_operand(ip + 1);
                    self.frames[frame_idx].ip = target as usize;
                }
                Instruction::JumpIfFalse => {
                    if !self.stack.last().unwrap().is_truthy() {
                        let target = chunk.read_jump_operand(ip + 1);
                        self.frames[frame_idx].ip = target as usize;
                    }
                }
                Instruction::Call => {
                    let argc = chunk.read_u8(ip + 1) as usize;
                    self.call(argc, line)?;
                }
                Instruction::Return => {
                    let result = self.stack.pop().unwrap();
                    let frame = self.frames.pop().unwrap();
                    self.stack.truncate(frame.base);
                    if self.frames.is_empty() {
                        return Ok(());
                    }
                    self.stack.push(result);
                }
            }
        }
    }

    fn name_constant(chunk: &compiler::chunk::Chunk, idx: u8) -> Rc<QString> {
        chunk
            .constant(idx as usize)
            .as_string()
            .expect("the compiler only ever stores identifiers as string constants here")
            .clone()
    }

    fn compare(&mut self, line: usize, op: impl Fn(f64, f64) -> bool) -> Result<(), RuntimeError> {
        let b = self.stack.pop().unwrap();
        let a = self.stack.pop().unwrap();
        match (a.as_number(), b.as_number()) {
            (Some(x), Some(y)) => {
                self.stack.push(Value::Bool(op(x, y)));
                Ok(())
            }
            _ if a.data_type() != b.data_type() => Err(self.error(
                RuntimeErrorKind::ComparingDifferentTypes(a.data_type(), b.data_type()),
                line,
            )),
            _ => Err(self.error(
                RuntimeErrorKind::OperandsMustBeNumbers(a.data_type(), b.data_type()),
                line,
            )),
        }
    }

    fn numeric_binary(
        &mut self,
        line: usize,
        op: impl Fn(f64, f64) -> f64,
    ) -> Result<(), RuntimeError> {
        let b = self.stack.pop().unwrap();
        let a = self.stack.pop().unwrap();
        match (a.as_number(), b.as_number()) {
            (Some(x), Some(y)) => {
                self.stack.push(Value::Number(op(x, y)));
                Ok(())
            }
            _ => Err(self.error(
                RuntimeErrorKind::OperandsMustBeNumbers(a.data_type(), b.data_type()),
                line,
            )),
        }
    }

    /// `+` additionally accepts two strings, allocating a fresh concatenated
    /// one — no sharing, no side-channel freeing, matching the interning
    /// design note that runtime concatenation never touches the interner.
    fn add(&mut self, line: usize) -> Result<(), RuntimeError> {
        let b = self.stack.pop().unwrap();
        let a = self.stack.pop().unwrap();
        match (&a, &b) {
            (Value::Number(x), Value::Number(y)) => {
                self.stack.push(Value::Number(x + y));
                Ok(())
            }
            (Value::Object(Object::String(x)), Value::Object(Object::String(y))) => {
                let concatenated = format!("{x}{y}");
                self.stack
                    .push(Value::from(Rc::new(QString::new(concatenated))));
                Ok(())
            }
            _ => Err(self.error(
                RuntimeErrorKind::OperandsNotAddable(a.data_type(), b.data_type()),
                line,
            )),
        }
    }

    fn call(&mut self, argc: usize, line: usize) -> Result<(), RuntimeError> {
        let callee_idx = self.stack.len() - 1 - argc;
        let callee = self.stack[callee_idx].clone();
        match callee {
            Value::Object(Object::Function(f)) => {
                if f.arity as usize != argc {
                    return Err(self.error(
                        RuntimeErrorKind::ArityMismatch {
                            expected: f.arity,
                            got: argc as u8,
                        },
                        line,
                    ));
                }
                if self.frames.len() >= FRAMES_MAX {
                    return Err(self.error(RuntimeErrorKind::StackOverflow, line));
                }
                self.frames.push(CallFrame {
                    function: f,
                    ip: 0,
                    base: callee_idx,
                });
                Ok(())
            }
            Value::Object(Object::Native(n)) => {
                if n.arity as usize != argc {
                    return Err(self.error(
                        RuntimeErrorKind::ArityMismatch {
                            expected: n.arity,
                            got: argc as u8,
                        },
                        line,
                    ));
                }
                let args = self.stack.split_off(callee_idx + 1);
                self.stack.truncate(callee_idx);
                let result = n
                    .call(&args)
                    .map_err(|msg| self.error(RuntimeErrorKind::Native(msg), line))?;
                self.stack.push(result);
                Ok(())
            }
            other => Err(self.error(RuntimeErrorKind::NotCallable(other.data_type()), line)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use compiler::Compiler;

    fn run(source: &str) -> Result<(), RuntimeError> {
        let script = Compiler::compile(source).expect("should compile");
        Vm::new().run(script)
    }

    #[test]
    fn arithmetic_and_print_do_not_error() {
        assert!(run("print 1 + 2 * 3;").is_ok());
    }

    #[test]
    fn string_concatenation() {
        assert!(run(r#"print "a" + "b";"#).is_ok());
    }

    #[test]
    fn adding_number_and_string_is_a_runtime_error() {
        let err = run(r#"print 1 + "x";"#).unwrap_err();
        assert!(matches!(err.kind, RuntimeErrorKind::OperandsNotAddable(..)));
    }

    #[test]
    fn calling_an_undeclared_function_is_undefined_variable() {
        let err = run("foo();").unwrap_err();
        assert!(matches!(err.kind, RuntimeErrorKind::UndefinedVariable(_)));
    }

    #[test]
    fn calling_a_number_is_not_callable() {
        let err = run("var x = 1; x();").unwrap_err();
        assert!(matches!(err.kind, RuntimeErrorKind::NotCallable(_)));
    }

    #[test]
    fn wrong_arity_is_rejected() {
        let err = run("fun f(a, b) { return a + b; } f(1);").unwrap_err();
        assert!(matches!(err.kind, RuntimeErrorKind::ArityMismatch { .. }));
    }

    #[test]
    fn functions_and_recursion() {
        assert!(run(
            "fun fib(n) { if (n < 2) return n; return fib(n - 1) + fib(n - 2); } print fib(10);"
        )
        .is_ok());
    }

    #[test]
    fn while_loop_and_locals() {
        assert!(run("var i = 0; while (i < 5) { i = i + 1; } print i;").is_ok());
    }

    #[test]
    fn short_circuit_and_or() {
        assert!(run("print false and (1/0 == 1); print true or (1/0 == 1);").is_ok());
    }

    #[test]
    fn deep_recursion_overflows_the_call_stack() {
        let err = run("fun rec(n) { return rec(n + 1); } rec(0);").unwrap_err();
        assert!(matches!(err.kind, RuntimeErrorKind::StackOverflow));
    }

    #[test]
    fn comparing_a_string_and_a_number_is_a_runtime_error() {
        let err = run(r#"print 1 < "x";"#).unwrap_err();
        assert!(matches!(err.kind, RuntimeErrorKind::ComparingDifferentTypes(..)));
    }
}
