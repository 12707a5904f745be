//! Runtime value model shared by the compiler and the VM.
//!
//! `Value` is a sealed tagged union; every operation dispatches on the tag.
//! Compound payloads sit behind `Rc` so stack traffic clones a pointer, not
//! the payload. Values are immutable after creation, so shared ownership
//! needs no interior mutability and closures cannot form reference cycles.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hasher;
use std::rc::Rc;

use fnv::FnvHasher;

use crate::builtins::BuiltinDef;
use crate::code::Instructions;

/// The type tag of a value, rendered as a short uppercase token in error
/// messages (`type mismatch: INTEGER + BOOLEAN`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Integer,
    Boolean,
    Null,
    String,
    Array,
    Hash,
    CompiledFunction,
    Closure,
    Builtin,
    Error,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Integer => "INTEGER",
            ValueKind::Boolean => "BOOLEAN",
            ValueKind::Null => "NULL",
            ValueKind::String => "STRING",
            ValueKind::Array => "ARRAY",
            ValueKind::Hash => "HASH",
            ValueKind::CompiledFunction => "COMPILED_FUNCTION",
            ValueKind::Closure => "CLOSURE",
            ValueKind::Builtin => "BUILTIN",
            ValueKind::Error => "ERROR",
        };
        write!(f, "{name}")
    }
}

/// Key derived from a hashable value: the tag plus a 64-bit hash. Structural
/// equality over both fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HashKey {
    pub kind: ValueKind,
    pub value: u64,
}

/// An entry in a hash: the original key object is preserved alongside the
/// value so inspection can render it.
#[derive(Debug, Clone, PartialEq)]
pub struct HashPair {
    pub key: Value,
    pub value: Value,
}

/// Compile-time function artifact: an instruction blob plus the frame
/// metadata the VM needs to reserve local slots.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledFunction {
    pub instructions: Instructions,
    pub num_locals: usize,
    pub num_parameters: usize,
}

/// Runtime pairing of a compiled function with its captured free variables.
/// The only user-defined callable the VM knows.
#[derive(Debug, Clone)]
pub struct Closure {
    pub func: Rc<CompiledFunction>,
    pub free: Vec<Value>,
}

#[derive(Debug, Clone)]
pub enum Value {
    Integer(i64),
    Boolean(bool),
    Null,
    String(Rc<str>),
    Array(Rc<Vec<Value>>),
    Hash(Rc<HashMap<HashKey, HashPair>>),
    CompiledFunction(Rc<CompiledFunction>),
    Closure(Rc<Closure>),
    Builtin(&'static BuiltinDef),
    /// An in-language error value. Builtins return these on misuse; the VM
    /// pushes them like any other value.
    Error(Rc<str>),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Integer(_) => ValueKind::Integer,
            Value::Boolean(_) => ValueKind::Boolean,
            Value::Null => ValueKind::Null,
            Value::String(_) => ValueKind::String,
            Value::Array(_) => ValueKind::Array,
            Value::Hash(_) => ValueKind::Hash,
            Value::CompiledFunction(_) => ValueKind::CompiledFunction,
            Value::Closure(_) => ValueKind::Closure,
            Value::Builtin(_) => ValueKind::Builtin,
            Value::Error(_) => ValueKind::Error,
        }
    }

    pub fn error(message: impl Into<String>) -> Value {
        Value::Error(Rc::from(message.into()))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error(_))
    }

    /// Falsy values are exactly `false` and `null`; everything else is
    /// truthy, including `0` and `""`.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Boolean(false) | Value::Null)
    }

    /// Derive the hash key for this value, or `None` for unhashable kinds.
    pub fn hash_key(&self) -> Option<HashKey> {
        match self {
            Value::Integer(value) => Some(HashKey {
                kind: ValueKind::Integer,
                value: *value as u64,
            }),
            Value::Boolean(value) => Some(HashKey {
                kind: ValueKind::Boolean,
                value: u64::from(*value),
            }),
            Value::String(value) => Some(HashKey {
                kind: ValueKind::String,
                value: fnv1a(value.as_bytes()),
            }),
            _ => None,
        }
    }
}

/// FNV-1a over the bytes, as the string hash-key function.
fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hasher = FnvHasher::default();
    hasher.write(bytes);
    hasher.finish()
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Null, Value::Null) => true,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Hash(a), Value::Hash(b)) => a == b,
            // Structural comparison lets tests match compiled constants
            (Value::CompiledFunction(a), Value::CompiledFunction(b)) => a == b,
            (Value::Closure(a), Value::Closure(b)) => Rc::ptr_eq(a, b),
            (Value::Builtin(a), Value::Builtin(b)) => std::ptr::eq(*a, *b),
            (Value::Error(a), Value::Error(b)) => a == b,
            _ => false,
        }
    }
}

/// The inspection rendering used by `puts`, the REPL, and the CLI.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(value) => write!(f, "{value}"),
            Value::Boolean(value) => write!(f, "{value}"),
            Value::Null => write!(f, "null"),
            Value::String(value) => write!(f, "{value}"),
            Value::Array(elements) => {
                write!(f, "[")?;
                for (i, element) in elements.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{element}")?;
                }
                write!(f, "]")
            }
            Value::Hash(pairs) => {
                write!(f, "{{")?;
                for (i, pair) in pairs.values().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", pair.key, pair.value)?;
                }
                write!(f, "}}")
            }
            Value::CompiledFunction(func) => {
                write!(f, "CompiledFunction[{:p}]", Rc::as_ptr(func))
            }
            Value::Closure(closure) => write!(f, "Closure[{:p}]", Rc::as_ptr(closure)),
            Value::Builtin(_) => write!(f, "builtin function"),
            Value::Error(message) => write!(f, "ERROR: {message}"),
        }
    }
}
