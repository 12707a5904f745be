//! Stack-based virtual machine.
//!
//! Executes bytecode against a fixed-capacity value stack and a stack of
//! call frames. A synthetic top-level closure wraps the main instructions
//! so dispatch is uniform: fetch the opcode at the current frame's `ip`,
//! advance past the operands, execute. Jump targets are absolute offsets
//! within the executing function's instruction blob.
//!
//! Fatal conditions (type mismatches, arity errors, capacity overflows)
//! abort the run with `Error::Runtime`. In-language `Error` values, by
//! contrast, are ordinary stack values and become the program's result.

use std::collections::HashMap;
use std::rc::Rc;

use log::debug;
use smallvec::SmallVec;

use crate::Error;
use crate::builtins::{self, BuiltinDef};
use crate::code::{Op, read_u16};
use crate::compiler::Bytecode;
use crate::object::{Closure, CompiledFunction, HashPair, Value};

pub const STACK_SIZE: usize = 2048;
pub const GLOBALS_SIZE: usize = 65536;
pub const MAX_FRAMES: usize = 1024;

/// A call record: the executing closure, the instruction pointer, and the
/// stack offset where this call's locals begin.
#[derive(Debug)]
struct Frame {
    closure: Rc<Closure>,
    ip: usize,
    base_pointer: usize,
}

impl Frame {
    fn new(closure: Rc<Closure>, base_pointer: usize) -> Self {
        Frame {
            closure,
            ip: 0,
            base_pointer,
        }
    }
}

pub struct Vm {
    constants: Vec<Value>,
    stack: Vec<Value>,
    sp: usize,
    globals: Vec<Value>,
    frames: Vec<Frame>,
}

impl Vm {
    pub fn new(bytecode: Bytecode) -> Self {
        Vm::with_globals(bytecode, Vm::new_globals())
    }

    /// Reuse a globals store from an earlier run, so a REPL keeps `let`
    /// bindings across lines.
    pub fn with_globals(bytecode: Bytecode, globals: Vec<Value>) -> Self {
        let main_function = CompiledFunction {
            instructions: bytecode.instructions,
            num_locals: 0,
            num_parameters: 0,
        };
        let main_closure = Closure {
            func: Rc::new(main_function),
            free: Vec::new(),
        };

        let mut frames = Vec::with_capacity(MAX_FRAMES);
        frames.push(Frame::new(Rc::new(main_closure), 0));

        Vm {
            constants: bytecode.constants,
            stack: vec![Value::Null; STACK_SIZE],
            sp: 0,
            globals,
            frames,
        }
    }

    pub fn new_globals() -> Vec<Value> {
        vec![Value::Null; GLOBALS_SIZE]
    }

    /// Hand the globals store back to the caller (REPL loop).
    pub fn into_globals(self) -> Vec<Value> {
        self.globals
    }

    /// The most recently popped stack value: the result of the last
    /// top-level expression even after its trailing `OpPop`.
    pub fn last_popped(&self) -> &Value {
        &self.stack[self.sp]
    }

    pub fn run(&mut self) -> Result<(), Error> {
        debug!(
            "running: {} constants, {} byte main function",
            self.constants.len(),
            self.current_frame().closure.func.instructions.len()
        );

        loop {
            // Fetch and decode, advancing ip past the opcode and operands.
            // Operand widths come from the opcode definitions table; an
            // opcode has at most two operands.
            let (op, a, b) = {
                let frame = self.current_frame_mut();
                let instructions = &frame.closure.func.instructions.0;
                if frame.ip >= instructions.len() {
                    break;
                }
                let byte = instructions[frame.ip];
                let op = Op::try_from(byte).map_err(|_| {
                    Error::Runtime(format!("unknown opcode {byte}"))
                })?;

                let mut offset = frame.ip + 1;
                let mut operands = [0usize; 2];
                for (slot, width) in operands
                    .iter_mut()
                    .zip(op.definition().operand_widths)
                {
                    *slot = match *width {
                        2 => read_u16(&instructions[offset..]) as usize,
                        _ => instructions[offset] as usize,
                    };
                    offset += *width;
                }
                frame.ip = offset;
                (op, operands[0], operands[1])
            };

            match op {
                Op::Constant => {
                    let constant = self.constants[a].clone();
                    self.push(constant)?;
                }
                Op::Pop => {
                    self.pop();
                }
                Op::Add | Op::Sub | Op::Mul | Op::Div => {
                    self.execute_binary_operation(op)?;
                }
                Op::True => self.push(Value::Boolean(true))?,
                Op::False => self.push(Value::Boolean(false))?,
                Op::Null => self.push(Value::Null)?,
                Op::Equal | Op::NotEqual | Op::GreaterThan => {
                    self.execute_comparison(op)?;
                }
                Op::Minus => {
                    let operand = self.pop();
                    match operand {
                        Value::Integer(value) => {
                            self.push(Value::Integer(value.wrapping_neg()))?;
                        }
                        other => {
                            return Err(Error::Runtime(format!(
                                "unknown operator: -{}",
                                other.kind()
                            )));
                        }
                    }
                }
                Op::Bang => {
                    let operand = self.pop();
                    self.push(Value::Boolean(!operand.is_truthy()))?;
                }
                Op::Jump => {
                    self.current_frame_mut().ip = a;
                }
                Op::JumpNotTruthy => {
                    let condition = self.pop();
                    if !condition.is_truthy() {
                        self.current_frame_mut().ip = a;
                    }
                }
                Op::SetGlobal => {
                    let value = self.pop();
                    if a >= self.globals.len() {
                        return Err(Error::Runtime("global index out of range".into()));
                    }
                    self.globals[a] = value;
                }
                Op::GetGlobal => {
                    if a >= self.globals.len() {
                        return Err(Error::Runtime("global index out of range".into()));
                    }
                    let value = self.globals[a].clone();
                    self.push(value)?;
                }
                Op::SetLocal => {
                    let base_pointer = self.current_frame().base_pointer;
                    let value = self.pop();
                    self.stack[base_pointer + a] = value;
                }
                Op::GetLocal => {
                    let base_pointer = self.current_frame().base_pointer;
                    let value = self.stack[base_pointer + a].clone();
                    self.push(value)?;
                }
                Op::GetBuiltin => {
                    let builtin = builtins::by_index(a).ok_or_else(|| {
                        Error::Runtime(format!("builtin index out of range: {a}"))
                    })?;
                    self.push(Value::Builtin(builtin))?;
                }
                Op::GetFree => {
                    let value = self.current_frame().closure.free[a].clone();
                    self.push(value)?;
                }
                Op::CurrentClosure => {
                    let closure = self.current_frame().closure.clone();
                    self.push(Value::Closure(closure))?;
                }
                Op::Closure => {
                    self.push_closure(a, b)?;
                }
                Op::Array => {
                    let elements = self.stack[self.sp - a..self.sp].to_vec();
                    self.sp -= a;
                    self.push(Value::Array(Rc::new(elements)))?;
                }
                Op::Hash => {
                    let hash = self.build_hash(a)?;
                    self.sp -= a;
                    self.push(hash)?;
                }
                Op::Index => {
                    let index = self.pop();
                    let left = self.pop();
                    self.execute_index(left, index)?;
                }
                Op::Call => {
                    self.execute_call(a)?;
                }
                Op::ReturnValue => {
                    let value = self.pop();
                    if self.execute_return(value)? {
                        return Ok(());
                    }
                }
                Op::Return => {
                    if self.execute_return(Value::Null)? {
                        return Ok(());
                    }
                }
            }
        }
        Ok(())
    }

    // ─── Stack primitives ────────────────────────────────────────────────

    fn current_frame(&self) -> &Frame {
        &self.frames[self.frames.len() - 1]
    }

    fn current_frame_mut(&mut self) -> &mut Frame {
        let last = self.frames.len() - 1;
        &mut self.frames[last]
    }

    fn push(&mut self, value: Value) -> Result<(), Error> {
        if self.sp >= STACK_SIZE {
            return Err(Error::Runtime("stack overflow".into()));
        }
        self.stack[self.sp] = value;
        self.sp += 1;
        Ok(())
    }

    /// Pop the top value. The slot is left in place, which is what makes
    /// `last_popped` work.
    fn pop(&mut self) -> Value {
        self.sp -= 1;
        self.stack[self.sp].clone()
    }

    // ─── Operations ──────────────────────────────────────────────────────

    fn execute_binary_operation(&mut self, op: Op) -> Result<(), Error> {
        let right = self.pop();
        let left = self.pop();

        match (&left, &right) {
            (Value::Integer(l), Value::Integer(r)) => {
                self.execute_integer_binary(op, *l, *r)
            }
            (Value::String(l), Value::String(r)) if op == Op::Add => {
                let mut joined = String::with_capacity(l.len() + r.len());
                joined.push_str(l);
                joined.push_str(r);
                self.push(Value::String(Rc::from(joined)))
            }
            _ if left.kind() != right.kind() => Err(Error::Runtime(format!(
                "type mismatch: {} {} {}",
                left.kind(),
                op_symbol(op),
                right.kind()
            ))),
            _ => Err(Error::Runtime(format!(
                "unknown operator: {} {} {}",
                left.kind(),
                op_symbol(op),
                right.kind()
            ))),
        }
    }

    fn execute_integer_binary(&mut self, op: Op, left: i64, right: i64) -> Result<(), Error> {
        let result = match op {
            Op::Add => left.wrapping_add(right),
            Op::Sub => left.wrapping_sub(right),
            Op::Mul => left.wrapping_mul(right),
            Op::Div => {
                if right == 0 {
                    return Err(Error::Runtime("division by zero".into()));
                }
                left.wrapping_div(right)
            }
            _ => unreachable!("not a binary integer opcode: {op:?}"),
        };
        self.push(Value::Integer(result))
    }

    fn execute_comparison(&mut self, op: Op) -> Result<(), Error> {
        let right = self.pop();
        let left = self.pop();

        if let (Value::Integer(l), Value::Integer(r)) = (&left, &right) {
            let result = match op {
                Op::Equal => l == r,
                Op::NotEqual => l != r,
                _ => l > r,
            };
            return self.push(Value::Boolean(result));
        }

        match op {
            // Canonical variants make this the identity comparison for
            // booleans and null; values of different kinds are unequal
            Op::Equal => self.push(Value::Boolean(left == right)),
            Op::NotEqual => self.push(Value::Boolean(left != right)),
            _ if left.kind() != right.kind() => Err(Error::Runtime(format!(
                "type mismatch: {} > {}",
                left.kind(),
                right.kind()
            ))),
            _ => Err(Error::Runtime(format!(
                "unknown operator: {} > {}",
                left.kind(),
                right.kind()
            ))),
        }
    }

    fn build_hash(&mut self, count: usize) -> Result<Value, Error> {
        let mut pairs = HashMap::with_capacity(count / 2);
        let start = self.sp - count;

        for i in (start..self.sp).step_by(2) {
            let key = self.stack[i].clone();
            let value = self.stack[i + 1].clone();
            let hash_key = key.hash_key().ok_or_else(|| {
                Error::Runtime(format!("unusable as hash key: {}", key.kind()))
            })?;
            // Duplicate keys overwrite earlier entries
            pairs.insert(hash_key, HashPair { key, value });
        }
        Ok(Value::Hash(Rc::new(pairs)))
    }

    fn execute_index(&mut self, left: Value, index: Value) -> Result<(), Error> {
        match (&left, &index) {
            (Value::Array(elements), Value::Integer(i)) => {
                // Out-of-range indexing yields null, not an error
                if *i < 0 || *i >= elements.len() as i64 {
                    self.push(Value::Null)
                } else {
                    self.push(elements[*i as usize].clone())
                }
            }
            (Value::Hash(pairs), _) => {
                let key = index.hash_key().ok_or_else(|| {
                    Error::Runtime(format!("unusable as hash key: {}", index.kind()))
                })?;
                match pairs.get(&key) {
                    Some(pair) => self.push(pair.value.clone()),
                    None => self.push(Value::Null),
                }
            }
            _ => Err(Error::Runtime(format!(
                "index operator not supported: {}",
                left.kind()
            ))),
        }
    }

    fn execute_call(&mut self, num_args: usize) -> Result<(), Error> {
        let callee = self.stack[self.sp - 1 - num_args].clone();
        match callee {
            Value::Closure(closure) => self.call_closure(closure, num_args),
            Value::Builtin(builtin) => self.call_builtin(builtin, num_args),
            _ => Err(Error::Runtime("calling non-closure and non-builtin".into())),
        }
    }

    fn call_closure(&mut self, closure: Rc<Closure>, num_args: usize) -> Result<(), Error> {
        if num_args != closure.func.num_parameters {
            return Err(Error::Runtime(format!(
                "wrong number of arguments: want={}, got={}",
                closure.func.num_parameters, num_args
            )));
        }
        if self.frames.len() >= MAX_FRAMES {
            return Err(Error::Runtime("frame overflow".into()));
        }

        let base_pointer = self.sp - num_args;
        let num_locals = closure.func.num_locals;
        if base_pointer + num_locals > STACK_SIZE {
            return Err(Error::Runtime("stack overflow".into()));
        }

        self.frames.push(Frame::new(closure, base_pointer));
        // Arguments occupy the first local slots; reserve the rest above
        self.sp = base_pointer + num_locals;
        Ok(())
    }

    fn call_builtin(&mut self, builtin: &'static BuiltinDef, num_args: usize) -> Result<(), Error> {
        let args: SmallVec<[Value; 4]> =
            self.stack[self.sp - num_args..self.sp].iter().cloned().collect();
        let result = (builtin.func)(&args);

        // Drop the arguments and the callee beneath them
        self.sp -= num_args + 1;
        if builtin.void {
            self.push(Value::Null)
        } else {
            self.push(result)
        }
    }

    /// Pop the current frame and push `value` as the call's result.
    /// Returns `true` when a top-level `return` ended the program.
    fn execute_return(&mut self, value: Value) -> Result<bool, Error> {
        if self.frames.len() == 1 {
            // `return` in the main function: the value is the final result
            self.push(value)?;
            self.pop();
            return Ok(true);
        }
        let frame = self.frames.pop().expect("frame stack is not empty");
        // Rewind past the locals, the arguments, and the callee itself
        self.sp = frame.base_pointer - 1;
        self.push(value)?;
        Ok(false)
    }

    fn push_closure(&mut self, const_index: usize, num_free: usize) -> Result<(), Error> {
        let constant = self.constants[const_index].clone();
        let Value::CompiledFunction(func) = constant else {
            return Err(Error::Runtime(format!(
                "not a function: {}",
                constant.kind()
            )));
        };

        let free = self.stack[self.sp - num_free..self.sp].to_vec();
        self.sp -= num_free;
        self.push(Value::Closure(Rc::new(Closure { func, free })))
    }
}

fn op_symbol(op: Op) -> &'static str {
    match op {
        Op::Add => "+",
        Op::Sub => "-",
        Op::Mul => "*",
        Op::Div => "/",
        Op::GreaterThan => ">",
        Op::Equal => "==",
        Op::NotEqual => "!=",
        _ => "?",
    }
}
