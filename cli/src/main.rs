mod args;

use std::{fs, path::PathBuf, process::exit};

use args::Action;
use colored::Colorize;
use compiler::Compiler;
use rustyline::error::ReadlineError;
use rustyline::Editor;
use vm::Vm;

const HELP_MSG: &str = "usage:
  qatam [flags] [path]

With no path, runs an interactive REPL. With a path, interprets that file
once and exits.

flags:
  --version   print the crate version and exit
  --help      print this message and exit
";

fn main() {
    match args::from_env() {
        Ok(Action::File(path)) => run_file(path),
        Ok(Action::Repl) => run_repl(),
        Ok(Action::Version) => println!("{}", env!("CARGO_PKG_VERSION")),
        Ok(Action::Help) => {
            println!("{} {}\n\n{HELP_MSG}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        }
        Err(err) => {
            eprintln!("{err}");
            eprintln!("run with --help to see usage");
            exit(exitcode::USAGE);
        }
    }
}

fn run_file(path: PathBuf) {
    let source = match fs::read_to_string(&path) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("couldn't read {}: {err}", path.display());
            exit(exitcode::NOINPUT);
        }
    };

    let script = match Compiler::compile(&source) {
        Ok(script) => script,
        Err(errors) => {
            for err in &errors {
                report_compile_error(err);
            }
            exit(exitcode::DATAERR);
        }
    };

    if let Err(err) = Vm::new().run(script) {
        report_runtime_error(&err);
        exit(exitcode::SOFTWARE);
    }
}

/// A session's `Vm` is kept across lines so top-level `var`s persist, the
/// way a REPL user expects; each line still gets its own compile pass.
fn run_repl() {
    let mut vm = Vm::new();
    let mut rl = Editor::<()>::new();

    loop {
        match rl.readline("> ") {
            Ok(line) => {
                rl.add_history_entry(&line);
                run_line(&mut vm, &line);
            }
            Err(ReadlineError::Eof) | Err(ReadlineError::Interrupted) => break,
            Err(err) => {
                eprintln!("readline error: {err}");
                break;
            }
        }
    }
}

fn run_line(vm: &mut Vm, line: &str) {
    match Compiler::compile(line) {
        Ok(script) => {
            if let Err(err) = vm.run(script) {
                report_runtime_error(&err);
            }
        }
        Err(errors) => {
            for err in &errors {
                report_compile_error(err);
            }
        }
    }
}

fn report_compile_error(err: &compiler::error::CompileError) {
    eprintln!("{} {err}", "[COMPILER] ERROR:".red().bold());
    eprintln!("{}", err.token());
}

fn report_runtime_error(err: &vm::error::RuntimeError) {
    eprintln!("{} {err}", "[INTERPRETER] ERROR:".red().bold());
}
