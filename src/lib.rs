//! Stackscript - a small dynamically-typed scripting language compiled to
//! bytecode and executed on a stack-based virtual machine.
//!
//! The language is expression-oriented with first-class functions and
//! lexical closures:
//!
//! ```text
//! let newAdder = fn(a, b) {
//!     fn(c) { a + b + c }
//! };
//! let adder = newAdder(1, 2);
//! adder(8)                      # => 11
//! ```
//!
//! It has integers, booleans, strings, arrays and hash maps, `let`
//! bindings, `if`/`else` expressions, `return`, and a handful of built-in
//! functions (`len`, `first`, `last`, `rest`, `push`, `puts`, ...).
//!
//! ## Pipeline
//!
//! ```text
//! source --lexer--> tokens --parser--> AST --compiler--> bytecode --vm--> value
//! ```
//!
//! The compiler performs lexical scope analysis (global/local/free/builtin
//! resolution) and closure conversion; nested functions become
//! `CompiledFunction` constants referenced by `OpClosure`. The VM executes
//! the flat bytecode against a value stack and a call-frame stack.
//!
//! ## Modules
//!
//! - [`lexer`]/[`token`]: source text to tokens
//! - [`parser`]/[`ast`]: tokens to syntax tree
//! - [`compiler`]/[`symbols`]/[`code`]: syntax tree to bytecode
//! - [`vm`]/[`object`]/[`builtins`]: bytecode execution
//!
//! ## Quick start
//!
//! ```
//! let result = stackscript::run("let double = fn(x) { x * 2 }; double(21)").unwrap();
//! assert_eq!(result, stackscript::Value::Integer(42));
//! ```

use std::fmt;

pub mod ast;
pub mod builtins;
pub mod code;
pub mod compiler;
pub mod lexer;
pub mod object;
pub mod parser;
pub mod symbols;
pub mod token;
pub mod vm;

pub use compiler::{Bytecode, Compiler};
pub use object::Value;
pub use vm::Vm;

/// Errors from the three pipeline stages.
///
/// These abort a run. They are distinct from in-language `Error` *values*
/// (see [`object::Value::Error`]), which builtins return on misuse and
/// which flow through the program like any other value.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// One message per syntax error the parser recovered from.
    Parse(Vec<String>),
    /// Scope analysis or emission failure (`undefined variable x`).
    Compile(String),
    /// Fatal VM error: type mismatch, arity, capacity overflow.
    Runtime(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Parse(messages) => {
                write!(f, "parse error")?;
                for message in messages {
                    write!(f, "\n  {message}")?;
                }
                Ok(())
            }
            Error::Compile(message) => write!(f, "compile error: {message}"),
            Error::Runtime(message) => write!(f, "runtime error: {message}"),
        }
    }
}

impl std::error::Error for Error {}

/// Parse and compile source text to bytecode.
pub fn compile(source: &str) -> Result<Bytecode, Error> {
    let program = parser::parse(source)?;
    let mut compiler = Compiler::new();
    compiler.compile_program(&program)?;
    Ok(compiler.bytecode())
}

/// Compile and run source text, returning the final expression's value.
pub fn run(source: &str) -> Result<Value, Error> {
    let mut vm = Vm::new(compile(source)?);
    vm.run()?;
    Ok(vm.last_popped().clone())
}
