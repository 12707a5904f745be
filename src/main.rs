use std::fs;
use std::process;

use clap::{Arg, ArgAction, Command};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;

use stackscript::ast::Statement;
use stackscript::{Compiler, Vm, parser};

fn main() {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("warn"),
    )
    .init();

    let command = Command::new("stackscript")
        .about("A small scripting language compiled to bytecode and run on a stack VM")
        .arg(
            Arg::new("file")
                .value_name("FILE")
                .help("A stackscript source file to run"),
        )
        .arg(
            Arg::new("repl")
                .long("repl")
                .action(ArgAction::SetTrue)
                .help("Start the interactive REPL"),
        )
        .arg(
            Arg::new("cpuprofile")
                .long("cpuprofile")
                .value_name("PATH")
                .help("Write a CPU profile (flamegraph) of the run to PATH"),
        );

    let matches = command.try_get_matches().unwrap_or_else(|err| {
        // Usage errors exit 1 with the synopsis
        let _ = err.print();
        process::exit(1);
    });

    let profile_path = matches.get_one::<String>("cpuprofile").cloned();
    #[cfg(unix)]
    let profiler = match &profile_path {
        Some(_) => pprof::ProfilerGuard::new(100).ok(),
        None => None,
    };
    #[cfg(not(unix))]
    if profile_path.is_some() {
        eprintln!("--cpuprofile is not supported on this platform");
    }

    let exit_code = match matches.get_one::<String>("file") {
        Some(file) if !matches.get_flag("repl") => run_file(file),
        _ => run_repl(),
    };

    #[cfg(unix)]
    if let (Some(path), Some(guard)) = (&profile_path, &profiler) {
        write_profile(path, guard);
    }

    process::exit(exit_code);
}

/// Run a script file and print the final value's inspection. An in-language
/// error result exits 1, like any pipeline failure.
fn run_file(path: &str) -> i32 {
    let source = match fs::read_to_string(path) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("{path}: {err}");
            return 1;
        }
    };

    match stackscript::run(&source) {
        Ok(value) => {
            println!("{value}");
            if value.is_error() { 1 } else { 0 }
        }
        Err(err) => {
            eprintln!("{err}");
            1
        }
    }
}

/// Interactive loop. Compiler symbols, the constant pool, and the VM's
/// globals persist across lines, so `let` bindings stay visible.
fn run_repl() -> i32 {
    println!("Stackscript REPL");
    println!("Enter expressions like: let add = fn(a, b) {{ a + b }}; add(1, 2)");
    println!("Ctrl-D exits.");

    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(err) => {
            eprintln!("could not initialize line editing: {err}");
            return 1;
        }
    };

    let (mut symbols, mut constants) = Compiler::new().into_state();
    let mut globals = Vm::new_globals();

    loop {
        let line = match editor.readline(">> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => return 0,
            Err(err) => {
                eprintln!("could not read line: {err}");
                return 1;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let _ = editor.add_history_entry(line);

        let program = match parser::parse(line) {
            Ok(program) => program,
            Err(err) => {
                eprintln!("{err}");
                continue;
            }
        };

        let mut compiler = Compiler::with_state(symbols, constants);
        let compiled = compiler.compile_program(&program);
        let bytecode = compiler.bytecode();
        (symbols, constants) = compiler.into_state();
        if let Err(err) = compiled {
            eprintln!("{err}");
            continue;
        }

        let mut vm = Vm::with_globals(bytecode, globals);
        match vm.run() {
            Ok(()) => {
                let result = vm.last_popped().clone();
                globals = vm.into_globals();
                // Echo only lines ending in an expression; `let` and
                // `return` statements leave nothing on the stack to show
                if ends_in_expression(&program) {
                    println!("{result}");
                }
            }
            Err(err) => {
                globals = vm.into_globals();
                eprintln!("{err}");
            }
        }
    }
}

fn ends_in_expression(program: &stackscript::ast::Program) -> bool {
    matches!(
        program.statements.last(),
        Some(Statement::Expression(_)) | Some(Statement::Return(_))
    )
}

#[cfg(unix)]
fn write_profile(path: &str, guard: &pprof::ProfilerGuard<'_>) {
    let report = match guard.report().build() {
        Ok(report) => report,
        Err(err) => {
            eprintln!("could not build CPU profile: {err}");
            return;
        }
    };
    match fs::File::create(path) {
        Ok(file) => {
            if let Err(err) = report.flamegraph(file) {
                eprintln!("could not write CPU profile to {path}: {err}");
            }
        }
        Err(err) => eprintln!("could not create {path}: {err}"),
    }
}
