//! Built-in function registry.
//!
//! A single contiguous table of `BuiltinDef` entries for ease of auditing.
//! The table order is the `OpGetBuiltin` operand space, so entries must
//! never be reordered once emitted bytecode depends on them. Builtins
//! report misuse by returning an in-language `Error` value, which the VM
//! pushes like any result; they never abort the run themselves.

use std::process::Command;
use std::rc::Rc;

use crate::object::{Value, ValueKind};

/// One registry entry. `void` marks builtins whose result is to be
/// discarded by callers (the REPL does not echo it).
#[derive(Debug)]
pub struct BuiltinDef {
    pub name: &'static str,
    pub void: bool,
    pub func: fn(&[Value]) -> Value,
}

pub static BUILTINS: &[BuiltinDef] = &[
    BuiltinDef {
        name: "len",
        void: false,
        func: builtin_len,
    },
    BuiltinDef {
        name: "puts",
        void: true,
        func: builtin_puts,
    },
    BuiltinDef {
        name: "first",
        void: false,
        func: builtin_first,
    },
    BuiltinDef {
        name: "last",
        void: false,
        func: builtin_last,
    },
    BuiltinDef {
        name: "rest",
        void: false,
        func: builtin_rest,
    },
    BuiltinDef {
        name: "push",
        void: false,
        func: builtin_push,
    },
    BuiltinDef {
        name: "exec",
        void: false,
        func: builtin_exec,
    },
    BuiltinDef {
        name: "cmp",
        void: false,
        func: builtin_cmp,
    },
];

pub fn by_index(index: usize) -> Option<&'static BuiltinDef> {
    BUILTINS.get(index)
}

pub fn by_name(name: &str) -> Option<&'static BuiltinDef> {
    BUILTINS.iter().find(|builtin| builtin.name == name)
}

fn wrong_arity(got: usize, want: usize) -> Value {
    Value::error(format!("wrong number of arguments. got={got}, want={want}"))
}

/// Check the single-array-argument contract shared by `first`, `last` and
/// `rest`.
fn check_array<'a>(name: &str, args: &'a [Value]) -> Result<&'a [Value], Value> {
    match args {
        [Value::Array(elements)] => Ok(elements),
        [other] => Err(Value::error(format!(
            "argument to '{name}' must be ARRAY, got {}",
            other.kind()
        ))),
        _ => Err(wrong_arity(args.len(), 1)),
    }
}

fn builtin_len(args: &[Value]) -> Value {
    match args {
        [Value::String(s)] => Value::Integer(s.len() as i64),
        [Value::Array(elements)] => Value::Integer(elements.len() as i64),
        [Value::Hash(pairs)] => Value::Integer(pairs.len() as i64),
        [other] => Value::error(format!(
            "argument to 'len' not supported, got {}",
            other.kind()
        )),
        _ => wrong_arity(args.len(), 1),
    }
}

fn builtin_puts(args: &[Value]) -> Value {
    for arg in args {
        println!("{arg}");
    }
    Value::Null
}

fn builtin_first(args: &[Value]) -> Value {
    match check_array("first", args) {
        Ok(elements) => elements.first().cloned().unwrap_or(Value::Null),
        Err(err) => err,
    }
}

fn builtin_last(args: &[Value]) -> Value {
    match check_array("last", args) {
        Ok(elements) => elements.last().cloned().unwrap_or(Value::Null),
        Err(err) => err,
    }
}

fn builtin_rest(args: &[Value]) -> Value {
    match check_array("rest", args) {
        Ok([]) => Value::Array(Rc::new(Vec::new())),
        Ok([_, rest @ ..]) => Value::Array(Rc::new(rest.to_vec())),
        Err(err) => err,
    }
}

fn builtin_push(args: &[Value]) -> Value {
    match args {
        [Value::Array(elements), value] => {
            let mut pushed = elements.as_ref().clone();
            pushed.push(value.clone());
            Value::Array(Rc::new(pushed))
        }
        [other, _] => Value::error(format!(
            "argument to 'push' must be ARRAY, got {}",
            other.kind()
        )),
        _ => wrong_arity(args.len(), 2),
    }
}

/// Run a command line, returning its captured stdout as a string.
fn builtin_exec(args: &[Value]) -> Value {
    let command = match args {
        [Value::String(command)] => command,
        [other] => {
            return Value::error(format!(
                "argument to 'exec' must be STRING, got {}",
                other.kind()
            ));
        }
        _ => return wrong_arity(args.len(), 1),
    };

    let mut parts = command.split_whitespace();
    let Some(program) = parts.next() else {
        return Value::error("exec requires a non-empty command");
    };

    match Command::new(program).args(parts).output() {
        Ok(output) => Value::String(Rc::from(
            String::from_utf8_lossy(&output.stdout).into_owned(),
        )),
        Err(err) => Value::error(format!("exec failed: {err}")),
    }
}

/// Three-way comparison of two integers or two strings: -1, 0 or 1.
fn builtin_cmp(args: &[Value]) -> Value {
    match args {
        [Value::Integer(a), Value::Integer(b)] => Value::Integer(ordering(a.cmp(b))),
        [Value::String(a), Value::String(b)] => Value::Integer(ordering(a.cmp(b))),
        [a, b] => {
            let kind = if matches!(a.kind(), ValueKind::Integer | ValueKind::String) {
                b.kind()
            } else {
                a.kind()
            };
            Value::error(format!("unsupported type: {kind}"))
        }
        _ => wrong_arity(args.len(), 2),
    }
}

fn ordering(order: std::cmp::Ordering) -> i64 {
    match order {
        std::cmp::Ordering::Less => -1,
        std::cmp::Ordering::Equal => 0,
        std::cmp::Ordering::Greater => 1,
    }
}
