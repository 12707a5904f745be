//! End-to-end tests: source text through lexer, parser, compiler and VM.

use std::rc::Rc;

use stackscript::{Error, Value, run};

fn int(value: i64) -> Value {
    Value::Integer(value)
}

fn int_array(values: &[i64]) -> Value {
    Value::Array(Rc::new(values.iter().copied().map(Value::Integer).collect()))
}

fn run_ok(input: &str) -> Value {
    run(input).unwrap_or_else(|err| panic!("error for {input:?}: {err}"))
}

#[test]
fn test_final_values() {
    let cases: Vec<(&str, Value)> = vec![
        ("1 + 2 * 3", int(7)),
        ("let a = fn(x) { x + 1 }; a(41)", int(42)),
        ("let c = fn(x) { fn(y) { x + y } }; c(3)(4)", int(7)),
        (
            "let f = fn(n) { if (n == 0) { 0 } else { f(n - 1) } }; f(5)",
            int(0),
        ),
        (r#"let h = {"a": 1, "b": 2}; h["b"]"#, int(2)),
        (r#"let h = {"a": 1, "b": 2}; h["z"]"#, Value::Null),
        (r#"len([1, 2, 3]) + len("hi")"#, int(5)),
        ("[1, 2, 3][-1]", Value::Null),
        ("[1, 2, 3][99]", Value::Null),
        (r#""hello" + " " + "world""#, Value::String(Rc::from("hello world"))),
        ("!!0", Value::Boolean(true)),
        (
            r#"if (len("") == 0) { "empty" } else { "full" }"#,
            Value::String(Rc::from("empty")),
        ),
    ];
    for (input, expected) in cases {
        assert_eq!(run_ok(input), expected, "wrong value for {input:?}");
    }
}

#[test]
fn test_runtime_failures() {
    let cases = [
        ("fn(a, b) { a + b }(1)", "wrong number of arguments: want=2, got=1"),
        ("{fn(x) { x }: 1}", "unusable as hash key: CLOSURE"),
        ("5 + true", "type mismatch: INTEGER + BOOLEAN"),
    ];
    for (input, expected) in cases {
        match run(input) {
            Err(Error::Runtime(message)) => {
                assert_eq!(message, expected, "wrong error for {input:?}")
            }
            other => panic!("expected runtime error for {input:?}, got {other:?}"),
        }
    }
}

#[test]
fn test_builtin_misuse_is_the_program_result() {
    // Builtins report misuse as an in-language Error value; the run itself
    // succeeds and the value is the result
    let result = run_ok("len(1)");
    assert!(result.is_error());
    assert_eq!(
        result.to_string(),
        "ERROR: argument to 'len' not supported, got INTEGER"
    );
}

#[test]
fn test_higher_order_map() {
    let input = "
        let map = fn(arr, f) {
            let iter = fn(arr, accumulated) {
                if (len(arr) == 0) {
                    accumulated
                } else {
                    iter(rest(arr), push(accumulated, f(first(arr))));
                }
            };
            iter(arr, []);
        };
        map([1, 2, 3, 4], fn(x) { x * 2 })";
    assert_eq!(run_ok(input), int_array(&[2, 4, 6, 8]));
}

#[test]
fn test_higher_order_reduce() {
    let input = "
        let reduce = fn(arr, initial, f) {
            let iter = fn(arr, result) {
                if (len(arr) == 0) {
                    result
                } else {
                    iter(rest(arr), f(result, first(arr)));
                }
            };
            iter(arr, initial);
        };
        let sum = fn(arr) { reduce(arr, 0, fn(acc, el) { acc + el }) };
        sum([1, 2, 3, 4, 5])";
    assert_eq!(run_ok(input), int(15));
}

#[test]
fn test_comments_are_ignored() {
    let input = "
        # compute the answer
        let answer = 6 * 7; # the usual one
        answer";
    assert_eq!(run_ok(input), int(42));
}

#[cfg(unix)]
#[test]
fn test_exec_builtin() {
    let result = run_ok(r#"exec("echo hi")"#);
    assert_eq!(result, Value::String(Rc::from("hi\n")));
}
