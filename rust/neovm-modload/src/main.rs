//! neovm-modload: load native dynamic modules into a NeoVM evaluator and
//! call the functions they define.
//!
//!   neovm-modload -m ./mymod.so --call mymod-add 1 2
//!
//! Each `--call` result is printed on stdout.  The first failing load or
//! call ends the run with a non-zero status.

use std::path::PathBuf;
use std::process::ExitCode;

use neovm_core::elisp::{print_value, Evaluator, ModuleConfig, Value};

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = match parse_args(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(message) => {
            log::error!("{}", message);
            eprintln!("{}", USAGE);
            return ExitCode::from(2);
        }
    };
    if args.help {
        println!("{}", USAGE);
        return ExitCode::SUCCESS;
    }

    let mut config = ModuleConfig::from_env();
    if args.assertions {
        config = config.with_assertions(true);
    }
    let mut evaluator = Evaluator::with_module_config(config);
    log::info!("Evaluator initialized (module assertions: {})", config.assertions);

    for action in &args.actions {
        match action {
            Action::Load(path) => {
                log::info!("Loading module: {}", path.display());
                match evaluator.load_module(path) {
                    Ok(_) => log::info!("  Loaded: {}", path.display()),
                    Err(e) => {
                        log::error!("  Error loading {}: {}", path.display(), e);
                        return ExitCode::FAILURE;
                    }
                }
            }
            Action::Call { function, args } => {
                log::info!("Calling: {} {:?}", function, args);
                let values = args.iter().map(|arg| parse_value(arg)).collect();
                match evaluator.funcall_named(function, values) {
                    Ok(value) => println!("{}", print_value(&value)),
                    Err(e) => {
                        log::error!("  Error: {}", e);
                        return ExitCode::FAILURE;
                    }
                }
            }
        }
    }
    ExitCode::SUCCESS
}

const USAGE: &str = "\
usage: neovm-modload [--module-assertions] [-m FILE]... [--call FUNCTION [ARG]...]...

  -m, --module FILE      load a dynamic module (repeatable)
  --call FUNCTION ARGS   call FUNCTION; integers and floats are passed as
                         numbers, anything else as a string
  --module-assertions    treat module contract violations as fatal
  -h, --help             show this help";

// ===== CLI argument parsing =====

#[derive(Debug, PartialEq)]
enum Action {
    Load(PathBuf),
    Call { function: String, args: Vec<String> },
}

#[derive(Debug, Default)]
struct Args {
    /// Loads and calls, in command-line order.
    actions: Vec<Action>,
    assertions: bool,
    help: bool,
}

fn parse_args(argv: impl IntoIterator<Item = String>) -> Result<Args, String> {
    let mut args = Args::default();
    let mut iter = argv.into_iter().peekable();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-m" | "--module" => {
                let path = iter
                    .next()
                    .ok_or_else(|| format!("{} requires a file path argument", arg))?;
                args.actions.push(Action::Load(PathBuf::from(path)));
            }
            "--call" => {
                let function = iter
                    .next()
                    .ok_or_else(|| format!("{} requires a function name", arg))?;
                let mut call_args = Vec::new();
                // Call arguments run up to the next long option; "-1" is an argument.
                while let Some(next) = iter.next_if(|next| !next.starts_with("--")) {
                    call_args.push(next);
                }
                args.actions.push(Action::Call {
                    function,
                    args: call_args,
                });
            }
            "--module-assertions" => args.assertions = true,
            "-h" | "--help" => args.help = true,
            _ => return Err(format!("Unknown argument: {}", arg)),
        }
    }
    Ok(args)
}

/// Command-line argument as a Lisp value.
fn parse_value(arg: &str) -> Value {
    if let Ok(n) = arg.parse::<i64>() {
        if let Some(value) = Value::fixnum(n) {
            return value;
        }
    }
    if let Ok(f) = arg.parse::<f64>() {
        return Value::Float(f);
    }
    Value::string(arg)
}
