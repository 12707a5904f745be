//! Compiler: AST to bytecode.
//!
//! Walks the tree and emits instructions into the current compilation
//! scope. Each function literal opens a fresh scope (instruction buffer +
//! enclosed symbol table); closing it yields a `CompiledFunction` constant
//! and an `OpClosure` in the enclosing scope, preceded by one load per
//! captured free variable. Forward jumps are emitted with a placeholder
//! operand and back-patched once the target offset is known.

use std::mem;
use std::rc::Rc;

use log::debug;

use crate::Error;
use crate::ast::{BlockStatement, Expression, InfixOp, PrefixOp, Program, Statement};
use crate::builtins::BUILTINS;
use crate::code::{Instructions, Op, make};
use crate::object::{CompiledFunction, Value};
use crate::symbols::{Symbol, SymbolScope, SymbolTable};

/// The compiler's output: top-level instructions plus the constant pool
/// shared by all functions.
#[derive(Debug, Clone)]
pub struct Bytecode {
    pub instructions: Instructions,
    pub constants: Vec<Value>,
}

/// Operand value used where a jump target is not yet known. Any u16 works;
/// this one is recognizable in disassembly if a patch is ever missed.
const PLACEHOLDER: usize = 0xffff;

#[derive(Debug, Clone, Copy)]
struct EmittedInstruction {
    opcode: Op,
    position: usize,
}

#[derive(Debug, Default)]
struct CompilationScope {
    instructions: Instructions,
    last: Option<EmittedInstruction>,
    previous: Option<EmittedInstruction>,
}

pub struct Compiler {
    constants: Vec<Value>,
    symbols: SymbolTable,
    scopes: Vec<CompilationScope>,
}

impl Default for Compiler {
    fn default() -> Self {
        Compiler::new()
    }
}

impl Compiler {
    pub fn new() -> Self {
        let mut symbols = SymbolTable::new();
        for (index, builtin) in BUILTINS.iter().enumerate() {
            symbols.define_builtin(index, builtin.name);
        }
        Compiler::with_state(symbols, Vec::new())
    }

    /// Resume with symbol table and constants carried over from an earlier
    /// compile, so a REPL can keep globals across lines.
    pub fn with_state(symbols: SymbolTable, constants: Vec<Value>) -> Self {
        Compiler {
            constants,
            symbols,
            scopes: vec![CompilationScope::default()],
        }
    }

    /// Hand the reusable state back to the caller (REPL loop).
    pub fn into_state(self) -> (SymbolTable, Vec<Value>) {
        (self.symbols, self.constants)
    }

    pub fn bytecode(&self) -> Bytecode {
        Bytecode {
            instructions: self.current_scope().instructions.clone(),
            constants: self.constants.clone(),
        }
    }

    pub fn compile_program(&mut self, program: &Program) -> Result<(), Error> {
        for statement in &program.statements {
            self.compile_statement(statement)?;
        }
        debug!(
            "compiled {} statements into {} bytes, {} constants",
            program.statements.len(),
            self.current_scope().instructions.len(),
            self.constants.len()
        );
        Ok(())
    }

    fn compile_statement(&mut self, statement: &Statement) -> Result<(), Error> {
        match statement {
            Statement::Expression(expr) => {
                self.compile_expression(expr)?;
                self.emit(Op::Pop, &[]);
            }
            Statement::Let { name, value } => {
                // Define before compiling the value so a function literal
                // can resolve a recursive reference to its own name.
                let symbol = self.symbols.define(name);
                self.compile_expression(value)?;
                match symbol.scope {
                    SymbolScope::Global => self.emit(Op::SetGlobal, &[symbol.index]),
                    _ => self.emit(Op::SetLocal, &[symbol.index]),
                };
            }
            Statement::Return(value) => {
                self.compile_expression(value)?;
                self.emit(Op::ReturnValue, &[]);
            }
        }
        Ok(())
    }

    fn compile_block(&mut self, block: &BlockStatement) -> Result<(), Error> {
        for statement in &block.statements {
            self.compile_statement(statement)?;
        }
        Ok(())
    }

    fn compile_expression(&mut self, expr: &Expression) -> Result<(), Error> {
        match expr {
            Expression::Identifier(name) => {
                let symbol = self
                    .symbols
                    .resolve(name)
                    .ok_or_else(|| Error::Compile(format!("undefined variable {name}")))?;
                self.load_symbol(&symbol);
            }
            Expression::Integer(value) => {
                let index = self.add_constant(Value::Integer(*value));
                self.emit(Op::Constant, &[index]);
            }
            Expression::Str(value) => {
                let index = self.add_constant(Value::String(Rc::from(value.as_str())));
                self.emit(Op::Constant, &[index]);
            }
            Expression::Boolean(true) => {
                self.emit(Op::True, &[]);
            }
            Expression::Boolean(false) => {
                self.emit(Op::False, &[]);
            }
            Expression::Prefix { op, right } => {
                self.compile_expression(right)?;
                match op {
                    PrefixOp::Bang => self.emit(Op::Bang, &[]),
                    PrefixOp::Minus => self.emit(Op::Minus, &[]),
                };
            }
            Expression::Infix { op, left, right } => {
                // `<` has no opcode: swap operands and compare with `>`
                if *op == InfixOp::Lt {
                    self.compile_expression(right)?;
                    self.compile_expression(left)?;
                    self.emit(Op::GreaterThan, &[]);
                    return Ok(());
                }
                self.compile_expression(left)?;
                self.compile_expression(right)?;
                match op {
                    InfixOp::Add => self.emit(Op::Add, &[]),
                    InfixOp::Sub => self.emit(Op::Sub, &[]),
                    InfixOp::Mul => self.emit(Op::Mul, &[]),
                    InfixOp::Div => self.emit(Op::Div, &[]),
                    InfixOp::Gt => self.emit(Op::GreaterThan, &[]),
                    InfixOp::Eq => self.emit(Op::Equal, &[]),
                    InfixOp::NotEq => self.emit(Op::NotEqual, &[]),
                    InfixOp::Lt => unreachable!("handled above"),
                };
            }
            Expression::If {
                condition,
                consequence,
                alternative,
            } => {
                self.compile_expression(condition)?;
                let jump_not_truthy = self.emit(Op::JumpNotTruthy, &[PLACEHOLDER]);

                // The consequence is an expression: keep its value on the
                // stack by stripping the trailing statement Pop
                self.compile_block(consequence)?;
                if self.last_instruction_is(Op::Pop) {
                    self.remove_last_instruction();
                }

                let jump = self.emit(Op::Jump, &[PLACEHOLDER]);
                let after_consequence = self.current_scope().instructions.len();
                self.change_operand(jump_not_truthy, after_consequence);

                match alternative {
                    None => {
                        self.emit(Op::Null, &[]);
                    }
                    Some(alternative) => {
                        self.compile_block(alternative)?;
                        if self.last_instruction_is(Op::Pop) {
                            self.remove_last_instruction();
                        }
                    }
                }
                let after_alternative = self.current_scope().instructions.len();
                self.change_operand(jump, after_alternative);
            }
            Expression::Array(elements) => {
                for element in elements {
                    self.compile_expression(element)?;
                }
                self.emit(Op::Array, &[elements.len()]);
            }
            Expression::Hash(pairs) => {
                // Sort by the key's source form for deterministic output
                let mut sorted: Vec<&(Expression, Expression)> = pairs.iter().collect();
                sorted.sort_by_key(|(key, _)| key.to_string());

                for (key, value) in sorted {
                    self.compile_expression(key)?;
                    self.compile_expression(value)?;
                }
                self.emit(Op::Hash, &[pairs.len() * 2]);
            }
            Expression::Index { left, index } => {
                self.compile_expression(left)?;
                self.compile_expression(index)?;
                self.emit(Op::Index, &[]);
            }
            Expression::Function {
                parameters,
                body,
                name,
            } => {
                self.compile_function_literal(parameters, body, name)?;
            }
            Expression::Call {
                function,
                arguments,
            } => {
                self.compile_expression(function)?;
                for argument in arguments {
                    self.compile_expression(argument)?;
                }
                self.emit(Op::Call, &[arguments.len()]);
            }
        }
        Ok(())
    }

    fn compile_function_literal(
        &mut self,
        parameters: &[String],
        body: &BlockStatement,
        name: &str,
    ) -> Result<(), Error> {
        self.enter_scope();

        if !name.is_empty() {
            self.symbols.define_function_name(name);
        }
        for parameter in parameters {
            self.symbols.define(parameter);
        }

        self.compile_block(body)?;

        // An implicit-return body ends in a statement Pop: the popped value
        // is the return value. Bodies that produce no value return null.
        if self.last_instruction_is(Op::Pop) {
            self.replace_last_with_return();
        }
        if !self.last_instruction_is(Op::ReturnValue) {
            self.emit(Op::Return, &[]);
        }

        let free_symbols = self.symbols.free_symbols.clone();
        let num_locals = self.symbols.num_definitions;
        let instructions = self.leave_scope();

        // Load captured variables in capture order, then bundle them
        for symbol in &free_symbols {
            self.load_symbol(symbol);
        }

        let function = CompiledFunction {
            instructions,
            num_locals,
            num_parameters: parameters.len(),
        };
        let index = self.add_constant(Value::CompiledFunction(Rc::new(function)));
        self.emit(Op::Closure, &[index, free_symbols.len()]);
        Ok(())
    }

    // ─── Emission helpers ────────────────────────────────────────────────

    fn current_scope(&self) -> &CompilationScope {
        &self.scopes[self.scopes.len() - 1]
    }

    fn current_scope_mut(&mut self) -> &mut CompilationScope {
        let last = self.scopes.len() - 1;
        &mut self.scopes[last]
    }

    fn add_constant(&mut self, value: Value) -> usize {
        self.constants.push(value);
        self.constants.len() - 1
    }

    fn emit(&mut self, op: Op, operands: &[usize]) -> usize {
        let instruction = make(op, operands);
        let scope = self.current_scope_mut();
        let position = scope.instructions.len();
        scope.instructions.0.extend(instruction);
        scope.previous = scope.last;
        scope.last = Some(EmittedInstruction {
            opcode: op,
            position,
        });
        position
    }

    fn last_instruction_is(&self, op: Op) -> bool {
        self.current_scope()
            .last
            .is_some_and(|last| last.opcode == op)
    }

    fn remove_last_instruction(&mut self) {
        let scope = self.current_scope_mut();
        if let Some(last) = scope.last {
            scope.instructions.0.truncate(last.position);
            scope.last = scope.previous;
            scope.previous = None;
        }
    }

    fn replace_instruction(&mut self, position: usize, instruction: Vec<u8>) {
        let scope = self.current_scope_mut();
        scope.instructions.0[position..position + instruction.len()]
            .copy_from_slice(&instruction);
    }

    /// Back-patch the operand of the jump emitted at `position`.
    fn change_operand(&mut self, position: usize, operand: usize) {
        let byte = self.current_scope().instructions.0[position];
        let op = Op::try_from(byte).expect("patch target is a previously emitted opcode");
        self.replace_instruction(position, make(op, &[operand]));
    }

    fn replace_last_with_return(&mut self) {
        let Some(last) = self.current_scope().last else {
            return;
        };
        self.replace_instruction(last.position, make(Op::ReturnValue, &[]));
        if let Some(last) = &mut self.current_scope_mut().last {
            last.opcode = Op::ReturnValue;
        }
    }

    fn enter_scope(&mut self) {
        self.scopes.push(CompilationScope::default());
        let outer = mem::take(&mut self.symbols);
        self.symbols = SymbolTable::enclosed(outer);
    }

    fn leave_scope(&mut self) -> Instructions {
        let scope = self
            .scopes
            .pop()
            .expect("leave_scope without matching enter_scope");
        let enclosed = mem::take(&mut self.symbols);
        self.symbols = enclosed
            .pop()
            .expect("scope symbol table always has an outer table");
        scope.instructions
    }

    fn load_symbol(&mut self, symbol: &Symbol) {
        match symbol.scope {
            SymbolScope::Global => self.emit(Op::GetGlobal, &[symbol.index]),
            SymbolScope::Local => self.emit(Op::GetLocal, &[symbol.index]),
            SymbolScope::Builtin => self.emit(Op::GetBuiltin, &[symbol.index]),
            SymbolScope::Free => self.emit(Op::GetFree, &[symbol.index]),
            SymbolScope::Function => self.emit(Op::CurrentClosure, &[]),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    /// Expected constant-pool entries, with function constants given as
    /// instruction fragments.
    enum Constant {
        Int(i64),
        Str(&'static str),
        Function(Vec<Vec<u8>>),
    }

    fn compile(input: &str) -> Bytecode {
        let program = parse(input).expect("input parses");
        let mut compiler = Compiler::new();
        compiler
            .compile_program(&program)
            .unwrap_or_else(|err| panic!("compile error for {input:?}: {err}"));
        compiler.bytecode()
    }

    fn run_compiler_tests(cases: Vec<(&str, Vec<Constant>, Vec<Vec<u8>>)>) {
        for (input, expected_constants, expected_instructions) in cases {
            let bytecode = compile(input);

            let expected = Instructions(expected_instructions.concat());
            assert_eq!(
                bytecode.instructions, expected,
                "wrong instructions for {input:?}\nwant:\n{expected}\ngot:\n{}",
                bytecode.instructions
            );

            assert_eq!(
                bytecode.constants.len(),
                expected_constants.len(),
                "wrong number of constants for {input:?}"
            );
            for (i, (constant, expected)) in bytecode
                .constants
                .iter()
                .zip(&expected_constants)
                .enumerate()
            {
                match (constant, expected) {
                    (Value::Integer(actual), Constant::Int(want)) => {
                        assert_eq!(actual, want, "constant {i} for {input:?}")
                    }
                    (Value::String(actual), Constant::Str(want)) => {
                        assert_eq!(&actual[..], *want, "constant {i} for {input:?}")
                    }
                    (Value::CompiledFunction(actual), Constant::Function(want)) => {
                        let expected = Instructions(want.concat());
                        assert_eq!(
                            actual.instructions, expected,
                            "function constant {i} for {input:?}\nwant:\n{expected}\ngot:\n{}",
                            actual.instructions
                        );
                    }
                    (actual, _) => panic!(
                        "constant {i} for {input:?} has unexpected kind: {}",
                        actual.kind()
                    ),
                }
            }
        }
    }

    #[test]
    fn test_integer_arithmetic() {
        run_compiler_tests(vec![
            (
                "1 + 2",
                vec![Constant::Int(1), Constant::Int(2)],
                vec![
                    make(Op::Constant, &[0]),
                    make(Op::Constant, &[1]),
                    make(Op::Add, &[]),
                    make(Op::Pop, &[]),
                ],
            ),
            (
                "1; 2",
                vec![Constant::Int(1), Constant::Int(2)],
                vec![
                    make(Op::Constant, &[0]),
                    make(Op::Pop, &[]),
                    make(Op::Constant, &[1]),
                    make(Op::Pop, &[]),
                ],
            ),
            (
                "1 - 2",
                vec![Constant::Int(1), Constant::Int(2)],
                vec![
                    make(Op::Constant, &[0]),
                    make(Op::Constant, &[1]),
                    make(Op::Sub, &[]),
                    make(Op::Pop, &[]),
                ],
            ),
            (
                "1 * 2",
                vec![Constant::Int(1), Constant::Int(2)],
                vec![
                    make(Op::Constant, &[0]),
                    make(Op::Constant, &[1]),
                    make(Op::Mul, &[]),
                    make(Op::Pop, &[]),
                ],
            ),
            (
                "2 / 1",
                vec![Constant::Int(2), Constant::Int(1)],
                vec![
                    make(Op::Constant, &[0]),
                    make(Op::Constant, &[1]),
                    make(Op::Div, &[]),
                    make(Op::Pop, &[]),
                ],
            ),
            (
                "-1",
                vec![Constant::Int(1)],
                vec![
                    make(Op::Constant, &[0]),
                    make(Op::Minus, &[]),
                    make(Op::Pop, &[]),
                ],
            ),
        ]);
    }

    #[test]
    fn test_boolean_expressions() {
        run_compiler_tests(vec![
            ("true", vec![], vec![make(Op::True, &[]), make(Op::Pop, &[])]),
            (
                "false",
                vec![],
                vec![make(Op::False, &[]), make(Op::Pop, &[])],
            ),
            (
                "1 > 2",
                vec![Constant::Int(1), Constant::Int(2)],
                vec![
                    make(Op::Constant, &[0]),
                    make(Op::Constant, &[1]),
                    make(Op::GreaterThan, &[]),
                    make(Op::Pop, &[]),
                ],
            ),
            (
                // `<` compiles to a swapped `>`
                "1 < 2",
                vec![Constant::Int(2), Constant::Int(1)],
                vec![
                    make(Op::Constant, &[0]),
                    make(Op::Constant, &[1]),
                    make(Op::GreaterThan, &[]),
                    make(Op::Pop, &[]),
                ],
            ),
            (
                "1 == 2",
                vec![Constant::Int(1), Constant::Int(2)],
                vec![
                    make(Op::Constant, &[0]),
                    make(Op::Constant, &[1]),
                    make(Op::Equal, &[]),
                    make(Op::Pop, &[]),
                ],
            ),
            (
                "true != false",
                vec![],
                vec![
                    make(Op::True, &[]),
                    make(Op::False, &[]),
                    make(Op::NotEqual, &[]),
                    make(Op::Pop, &[]),
                ],
            ),
            (
                "!true",
                vec![],
                vec![
                    make(Op::True, &[]),
                    make(Op::Bang, &[]),
                    make(Op::Pop, &[]),
                ],
            ),
        ]);
    }

    #[test]
    fn test_conditionals() {
        run_compiler_tests(vec![
            (
                "if (true) { 10 }; 3333;",
                vec![Constant::Int(10), Constant::Int(3333)],
                vec![
                    make(Op::True, &[]),                 // 0000
                    make(Op::JumpNotTruthy, &[10]),      // 0001
                    make(Op::Constant, &[0]),            // 0004
                    make(Op::Jump, &[11]),               // 0007
                    make(Op::Null, &[]),                 // 0010
                    make(Op::Pop, &[]),                  // 0011
                    make(Op::Constant, &[1]),            // 0012
                    make(Op::Pop, &[]),                  // 0015
                ],
            ),
            (
                "if (true) { 10 } else { 20 }; 3333;",
                vec![Constant::Int(10), Constant::Int(20), Constant::Int(3333)],
                vec![
                    make(Op::True, &[]),                 // 0000
                    make(Op::JumpNotTruthy, &[10]),      // 0001
                    make(Op::Constant, &[0]),            // 0004
                    make(Op::Jump, &[13]),               // 0007
                    make(Op::Constant, &[1]),            // 0010
                    make(Op::Pop, &[]),                  // 0013
                    make(Op::Constant, &[2]),            // 0014
                    make(Op::Pop, &[]),                  // 0017
                ],
            ),
        ]);
    }

    #[test]
    fn test_global_let_statements() {
        run_compiler_tests(vec![
            (
                "let one = 1; let two = 2;",
                vec![Constant::Int(1), Constant::Int(2)],
                vec![
                    make(Op::Constant, &[0]),
                    make(Op::SetGlobal, &[0]),
                    make(Op::Constant, &[1]),
                    make(Op::SetGlobal, &[1]),
                ],
            ),
            (
                "let one = 1; one;",
                vec![Constant::Int(1)],
                vec![
                    make(Op::Constant, &[0]),
                    make(Op::SetGlobal, &[0]),
                    make(Op::GetGlobal, &[0]),
                    make(Op::Pop, &[]),
                ],
            ),
        ]);
    }

    #[test]
    fn test_string_expressions() {
        run_compiler_tests(vec![
            (
                r#""stack machine""#,
                vec![Constant::Str("stack machine")],
                vec![make(Op::Constant, &[0]), make(Op::Pop, &[])],
            ),
            (
                r#""stack" + "script""#,
                vec![Constant::Str("stack"), Constant::Str("script")],
                vec![
                    make(Op::Constant, &[0]),
                    make(Op::Constant, &[1]),
                    make(Op::Add, &[]),
                    make(Op::Pop, &[]),
                ],
            ),
        ]);
    }

    #[test]
    fn test_array_literals() {
        run_compiler_tests(vec![
            (
                "[]",
                vec![],
                vec![make(Op::Array, &[0]), make(Op::Pop, &[])],
            ),
            (
                "[1, 2, 3]",
                vec![Constant::Int(1), Constant::Int(2), Constant::Int(3)],
                vec![
                    make(Op::Constant, &[0]),
                    make(Op::Constant, &[1]),
                    make(Op::Constant, &[2]),
                    make(Op::Array, &[3]),
                    make(Op::Pop, &[]),
                ],
            ),
        ]);
    }

    #[test]
    fn test_hash_literals() {
        run_compiler_tests(vec![
            (
                "{}",
                vec![],
                vec![make(Op::Hash, &[0]), make(Op::Pop, &[])],
            ),
            (
                "{1: 2, 3: 4, 5: 6}",
                vec![
                    Constant::Int(1),
                    Constant::Int(2),
                    Constant::Int(3),
                    Constant::Int(4),
                    Constant::Int(5),
                    Constant::Int(6),
                ],
                vec![
                    make(Op::Constant, &[0]),
                    make(Op::Constant, &[1]),
                    make(Op::Constant, &[2]),
                    make(Op::Constant, &[3]),
                    make(Op::Constant, &[4]),
                    make(Op::Constant, &[5]),
                    make(Op::Hash, &[6]),
                    make(Op::Pop, &[]),
                ],
            ),
            (
                // Keys are emitted sorted by source form: "1" < "3"
                "{3: 4, 1: 2}",
                vec![
                    Constant::Int(1),
                    Constant::Int(2),
                    Constant::Int(3),
                    Constant::Int(4),
                ],
                vec![
                    make(Op::Constant, &[0]),
                    make(Op::Constant, &[1]),
                    make(Op::Constant, &[2]),
                    make(Op::Constant, &[3]),
                    make(Op::Hash, &[4]),
                    make(Op::Pop, &[]),
                ],
            ),
        ]);
    }

    #[test]
    fn test_index_expressions() {
        run_compiler_tests(vec![
            (
                "[1, 2][1 + 1]",
                vec![
                    Constant::Int(1),
                    Constant::Int(2),
                    Constant::Int(1),
                    Constant::Int(1),
                ],
                vec![
                    make(Op::Constant, &[0]),
                    make(Op::Constant, &[1]),
                    make(Op::Array, &[2]),
                    make(Op::Constant, &[2]),
                    make(Op::Constant, &[3]),
                    make(Op::Add, &[]),
                    make(Op::Index, &[]),
                    make(Op::Pop, &[]),
                ],
            ),
            (
                "{1: 2}[2 - 1]",
                vec![
                    Constant::Int(1),
                    Constant::Int(2),
                    Constant::Int(2),
                    Constant::Int(1),
                ],
                vec![
                    make(Op::Constant, &[0]),
                    make(Op::Constant, &[1]),
                    make(Op::Hash, &[2]),
                    make(Op::Constant, &[2]),
                    make(Op::Constant, &[3]),
                    make(Op::Sub, &[]),
                    make(Op::Index, &[]),
                    make(Op::Pop, &[]),
                ],
            ),
        ]);
    }

    #[test]
    fn test_functions() {
        run_compiler_tests(vec![
            (
                "fn() { return 5 + 10 }",
                vec![
                    Constant::Int(5),
                    Constant::Int(10),
                    Constant::Function(vec![
                        make(Op::Constant, &[0]),
                        make(Op::Constant, &[1]),
                        make(Op::Add, &[]),
                        make(Op::ReturnValue, &[]),
                    ]),
                ],
                vec![make(Op::Closure, &[2, 0]), make(Op::Pop, &[])],
            ),
            (
                // Implicit return: the trailing Pop becomes ReturnValue
                "fn() { 5 + 10 }",
                vec![
                    Constant::Int(5),
                    Constant::Int(10),
                    Constant::Function(vec![
                        make(Op::Constant, &[0]),
                        make(Op::Constant, &[1]),
                        make(Op::Add, &[]),
                        make(Op::ReturnValue, &[]),
                    ]),
                ],
                vec![make(Op::Closure, &[2, 0]), make(Op::Pop, &[])],
            ),
            (
                "fn() { 1; 2 }",
                vec![
                    Constant::Int(1),
                    Constant::Int(2),
                    Constant::Function(vec![
                        make(Op::Constant, &[0]),
                        make(Op::Pop, &[]),
                        make(Op::Constant, &[1]),
                        make(Op::ReturnValue, &[]),
                    ]),
                ],
                vec![make(Op::Closure, &[2, 0]), make(Op::Pop, &[])],
            ),
            (
                // Empty body returns null
                "fn() { }",
                vec![Constant::Function(vec![make(Op::Return, &[])])],
                vec![make(Op::Closure, &[0, 0]), make(Op::Pop, &[])],
            ),
        ]);
    }

    #[test]
    fn test_function_calls() {
        run_compiler_tests(vec![
            (
                "fn() { 24 }();",
                vec![
                    Constant::Int(24),
                    Constant::Function(vec![
                        make(Op::Constant, &[0]),
                        make(Op::ReturnValue, &[]),
                    ]),
                ],
                vec![
                    make(Op::Closure, &[1, 0]),
                    make(Op::Call, &[0]),
                    make(Op::Pop, &[]),
                ],
            ),
            (
                "let oneArg = fn(a) { a }; oneArg(24);",
                vec![
                    Constant::Function(vec![
                        make(Op::GetLocal, &[0]),
                        make(Op::ReturnValue, &[]),
                    ]),
                    Constant::Int(24),
                ],
                vec![
                    make(Op::Closure, &[0, 0]),
                    make(Op::SetGlobal, &[0]),
                    make(Op::GetGlobal, &[0]),
                    make(Op::Constant, &[1]),
                    make(Op::Call, &[1]),
                    make(Op::Pop, &[]),
                ],
            ),
            (
                "let manyArg = fn(a, b, c) { a; b; c }; manyArg(24, 25, 26);",
                vec![
                    Constant::Function(vec![
                        make(Op::GetLocal, &[0]),
                        make(Op::Pop, &[]),
                        make(Op::GetLocal, &[1]),
                        make(Op::Pop, &[]),
                        make(Op::GetLocal, &[2]),
                        make(Op::ReturnValue, &[]),
                    ]),
                    Constant::Int(24),
                    Constant::Int(25),
                    Constant::Int(26),
                ],
                vec![
                    make(Op::Closure, &[0, 0]),
                    make(Op::SetGlobal, &[0]),
                    make(Op::GetGlobal, &[0]),
                    make(Op::Constant, &[1]),
                    make(Op::Constant, &[2]),
                    make(Op::Constant, &[3]),
                    make(Op::Call, &[3]),
                    make(Op::Pop, &[]),
                ],
            ),
        ]);
    }

    #[test]
    fn test_let_statement_scopes() {
        run_compiler_tests(vec![
            (
                "let num = 55; fn() { num }",
                vec![
                    Constant::Int(55),
                    Constant::Function(vec![
                        make(Op::GetGlobal, &[0]),
                        make(Op::ReturnValue, &[]),
                    ]),
                ],
                vec![
                    make(Op::Constant, &[0]),
                    make(Op::SetGlobal, &[0]),
                    make(Op::Closure, &[1, 0]),
                    make(Op::Pop, &[]),
                ],
            ),
            (
                "fn() { let num = 55; num }",
                vec![
                    Constant::Int(55),
                    Constant::Function(vec![
                        make(Op::Constant, &[0]),
                        make(Op::SetLocal, &[0]),
                        make(Op::GetLocal, &[0]),
                        make(Op::ReturnValue, &[]),
                    ]),
                ],
                vec![make(Op::Closure, &[1, 0]), make(Op::Pop, &[])],
            ),
            (
                "fn() { let a = 55; let b = 77; a + b }",
                vec![
                    Constant::Int(55),
                    Constant::Int(77),
                    Constant::Function(vec![
                        make(Op::Constant, &[0]),
                        make(Op::SetLocal, &[0]),
                        make(Op::Constant, &[1]),
                        make(Op::SetLocal, &[1]),
                        make(Op::GetLocal, &[0]),
                        make(Op::GetLocal, &[1]),
                        make(Op::Add, &[]),
                        make(Op::ReturnValue, &[]),
                    ]),
                ],
                vec![make(Op::Closure, &[2, 0]), make(Op::Pop, &[])],
            ),
        ]);
    }

    #[test]
    fn test_builtins() {
        run_compiler_tests(vec![
            (
                "len([]); push([], 1);",
                vec![Constant::Int(1)],
                vec![
                    make(Op::GetBuiltin, &[0]),
                    make(Op::Array, &[0]),
                    make(Op::Call, &[1]),
                    make(Op::Pop, &[]),
                    make(Op::GetBuiltin, &[5]),
                    make(Op::Array, &[0]),
                    make(Op::Constant, &[0]),
                    make(Op::Call, &[2]),
                    make(Op::Pop, &[]),
                ],
            ),
            (
                "fn() { len([]) }",
                vec![Constant::Function(vec![
                    make(Op::GetBuiltin, &[0]),
                    make(Op::Array, &[0]),
                    make(Op::Call, &[1]),
                    make(Op::ReturnValue, &[]),
                ])],
                vec![make(Op::Closure, &[0, 0]), make(Op::Pop, &[])],
            ),
        ]);
    }

    #[test]
    fn test_closures() {
        run_compiler_tests(vec![
            (
                "fn(a) { fn(b) { a + b } }",
                vec![
                    Constant::Function(vec![
                        make(Op::GetFree, &[0]),
                        make(Op::GetLocal, &[0]),
                        make(Op::Add, &[]),
                        make(Op::ReturnValue, &[]),
                    ]),
                    Constant::Function(vec![
                        make(Op::GetLocal, &[0]),
                        make(Op::Closure, &[0, 1]),
                        make(Op::ReturnValue, &[]),
                    ]),
                ],
                vec![make(Op::Closure, &[1, 0]), make(Op::Pop, &[])],
            ),
            (
                "fn(a) { fn(b) { fn(c) { a + b + c } } };",
                vec![
                    Constant::Function(vec![
                        make(Op::GetFree, &[0]),
                        make(Op::GetFree, &[1]),
                        make(Op::Add, &[]),
                        make(Op::GetLocal, &[0]),
                        make(Op::Add, &[]),
                        make(Op::ReturnValue, &[]),
                    ]),
                    Constant::Function(vec![
                        make(Op::GetFree, &[0]),
                        make(Op::GetLocal, &[0]),
                        make(Op::Closure, &[0, 2]),
                        make(Op::ReturnValue, &[]),
                    ]),
                    Constant::Function(vec![
                        make(Op::GetLocal, &[0]),
                        make(Op::Closure, &[1, 1]),
                        make(Op::ReturnValue, &[]),
                    ]),
                ],
                vec![make(Op::Closure, &[2, 0]), make(Op::Pop, &[])],
            ),
            (
                "let global = 55;
                 fn() {
                     let a = 66;
                     fn() {
                         let b = 77;
                         fn() {
                             let c = 88;
                             global + a + b + c;
                         }
                     }
                 }",
                vec![
                    Constant::Int(55),
                    Constant::Int(66),
                    Constant::Int(77),
                    Constant::Int(88),
                    Constant::Function(vec![
                        make(Op::Constant, &[3]),
                        make(Op::SetLocal, &[0]),
                        make(Op::GetGlobal, &[0]),
                        make(Op::GetFree, &[0]),
                        make(Op::Add, &[]),
                        make(Op::GetFree, &[1]),
                        make(Op::Add, &[]),
                        make(Op::GetLocal, &[0]),
                        make(Op::Add, &[]),
                        make(Op::ReturnValue, &[]),
                    ]),
                    Constant::Function(vec![
                        make(Op::Constant, &[2]),
                        make(Op::SetLocal, &[0]),
                        make(Op::GetFree, &[0]),
                        make(Op::GetLocal, &[0]),
                        make(Op::Closure, &[4, 2]),
                        make(Op::ReturnValue, &[]),
                    ]),
                    Constant::Function(vec![
                        make(Op::Constant, &[1]),
                        make(Op::SetLocal, &[0]),
                        make(Op::GetLocal, &[0]),
                        make(Op::Closure, &[5, 1]),
                        make(Op::ReturnValue, &[]),
                    ]),
                ],
                vec![
                    make(Op::Constant, &[0]),
                    make(Op::SetGlobal, &[0]),
                    make(Op::Closure, &[6, 0]),
                    make(Op::Pop, &[]),
                ],
            ),
        ]);
    }

    #[test]
    fn test_recursive_functions() {
        run_compiler_tests(vec![
            (
                "let countDown = fn(x) { countDown(x - 1); }; countDown(1);",
                vec![
                    Constant::Int(1),
                    Constant::Function(vec![
                        make(Op::CurrentClosure, &[]),
                        make(Op::GetLocal, &[0]),
                        make(Op::Constant, &[0]),
                        make(Op::Sub, &[]),
                        make(Op::Call, &[1]),
                        make(Op::ReturnValue, &[]),
                    ]),
                    Constant::Int(1),
                ],
                vec![
                    make(Op::Closure, &[1, 0]),
                    make(Op::SetGlobal, &[0]),
                    make(Op::GetGlobal, &[0]),
                    make(Op::Constant, &[2]),
                    make(Op::Call, &[1]),
                    make(Op::Pop, &[]),
                ],
            ),
            (
                "let wrapper = fn() {
                     let countDown = fn(x) { countDown(x - 1); };
                     countDown(1);
                 };
                 wrapper();",
                vec![
                    Constant::Int(1),
                    Constant::Function(vec![
                        make(Op::CurrentClosure, &[]),
                        make(Op::GetLocal, &[0]),
                        make(Op::Constant, &[0]),
                        make(Op::Sub, &[]),
                        make(Op::Call, &[1]),
                        make(Op::ReturnValue, &[]),
                    ]),
                    Constant::Int(1),
                    Constant::Function(vec![
                        make(Op::Closure, &[1, 0]),
                        make(Op::SetLocal, &[0]),
                        make(Op::GetLocal, &[0]),
                        make(Op::Constant, &[2]),
                        make(Op::Call, &[1]),
                        make(Op::ReturnValue, &[]),
                    ]),
                ],
                vec![
                    make(Op::Closure, &[3, 0]),
                    make(Op::SetGlobal, &[0]),
                    make(Op::GetGlobal, &[0]),
                    make(Op::Call, &[0]),
                    make(Op::Pop, &[]),
                ],
            ),
        ]);
    }

    #[test]
    fn test_undefined_variable() {
        let program = parse("foobar").expect("input parses");
        let mut compiler = Compiler::new();
        let err = compiler
            .compile_program(&program)
            .expect_err("expected a compile error");
        assert_eq!(err.to_string(), "compile error: undefined variable foobar");
    }

    #[test]
    fn test_compiler_scopes() {
        let mut compiler = Compiler::new();
        assert_eq!(compiler.scopes.len(), 1);

        compiler.emit(Op::Mul, &[]);

        compiler.enter_scope();
        assert_eq!(compiler.scopes.len(), 2);
        compiler.emit(Op::Sub, &[]);
        assert_eq!(compiler.current_scope().instructions.len(), 1);
        assert!(compiler.last_instruction_is(Op::Sub));

        compiler.leave_scope();
        assert_eq!(compiler.scopes.len(), 1);
        assert!(compiler.last_instruction_is(Op::Mul));

        compiler.emit(Op::Add, &[]);
        assert_eq!(compiler.current_scope().instructions.len(), 2);
        assert!(compiler.last_instruction_is(Op::Add));
    }
}
