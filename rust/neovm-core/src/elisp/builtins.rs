//! Built-in functions available to Lisp and to native modules via `funcall`.

use super::error::{signal, signal_with_data, EvalResult, Flow};
use super::eval::Evaluator;
use super::intern::intern;
use super::module::{funcall as module_funcall, load as module_load};
use super::symbol::Obarray;
use super::value::{eq_value, equal_value, list_to_vec, Value};

/// Every name `dispatch_builtin` handles.
const BUILTIN_NAMES: &[&str] = &[
    "funcall",
    "apply",
    "fset",
    "symbol-function",
    "fboundp",
    "provide",
    "featurep",
    "list",
    "cons",
    "car",
    "cdr",
    "length",
    "eq",
    "equal",
    "identity",
    "concat",
    "+",
    "-",
    "signal",
    "throw",
    "type-of",
    "garbage-collect",
    "module-load",
    "internal--module-call",
    "module-function-p",
    "user-ptrp",
    "documentation",
];

/// Bind each builtin's function cell to its subr.
pub(crate) fn register_builtins(obarray: &mut Obarray) {
    for name in BUILTIN_NAMES {
        obarray.set_symbol_function(name, Value::subr(name));
    }
}

// ---------------------------------------------------------------------------
// Argument helpers
// ---------------------------------------------------------------------------

fn expect_args(name: &str, args: &[Value], n: usize) -> Result<(), Flow> {
    if args.len() != n {
        Err(signal(
            "wrong-number-of-arguments",
            vec![Value::symbol(name), Value::Int(args.len() as i64)],
        ))
    } else {
        Ok(())
    }
}

fn expect_min_args(name: &str, args: &[Value], min: usize) -> Result<(), Flow> {
    if args.len() < min {
        Err(signal(
            "wrong-number-of-arguments",
            vec![Value::symbol(name), Value::Int(args.len() as i64)],
        ))
    } else {
        Ok(())
    }
}

fn expect_range_args(name: &str, args: &[Value], min: usize, max: usize) -> Result<(), Flow> {
    if args.len() < min || args.len() > max {
        Err(signal(
            "wrong-number-of-arguments",
            vec![Value::symbol(name), Value::Int(args.len() as i64)],
        ))
    } else {
        Ok(())
    }
}

fn expect_symbol_name(value: &Value) -> Result<&'static str, Flow> {
    value.as_symbol_name().ok_or_else(|| {
        signal(
            "wrong-type-argument",
            vec![Value::symbol("symbolp"), *value],
        )
    })
}

fn expect_list(value: &Value) -> Result<Vec<Value>, Flow> {
    list_to_vec(value).ok_or_else(|| {
        signal(
            "wrong-type-argument",
            vec![Value::symbol("listp"), *value],
        )
    })
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

pub(crate) fn dispatch_builtin(
    eval: &mut Evaluator,
    name: &str,
    args: Vec<Value>,
) -> Option<EvalResult> {
    let result = match name {
        // Evaluator access
        "funcall" => builtin_funcall(eval, args),
        "apply" => builtin_apply(eval, args),
        "fset" => builtin_fset(eval, args),
        "symbol-function" => builtin_symbol_function(eval, args),
        "fboundp" => builtin_fboundp(eval, args),
        "provide" => builtin_provide(eval, args),
        "featurep" => builtin_featurep(eval, args),
        "garbage-collect" => builtin_garbage_collect(eval, args),
        "documentation" => builtin_documentation(eval, args),
        // Modules
        "module-load" => module_load::builtin_module_load(eval, args),
        "internal--module-call" => module_funcall::builtin_internal_module_call(eval, args),
        "module-function-p" => module_funcall::builtin_module_function_p(args),
        "user-ptrp" => module_funcall::builtin_user_ptrp(args),
        // Pure
        "list" => Ok(Value::list(args)),
        "cons" => builtin_cons(args),
        "car" => builtin_car(args),
        "cdr" => builtin_cdr(args),
        "length" => builtin_length(args),
        "eq" => builtin_eq(args),
        "equal" => builtin_equal(args),
        "identity" => builtin_identity(args),
        "concat" => builtin_concat(args),
        "+" => builtin_add(args),
        "-" => builtin_sub(args),
        "signal" => builtin_signal(args),
        "throw" => builtin_throw(args),
        "type-of" => builtin_type_of(args),
        _ => return None,
    };
    Some(result)
}

// ---------------------------------------------------------------------------
// Functions and symbols
// ---------------------------------------------------------------------------

fn builtin_funcall(eval: &mut Evaluator, args: Vec<Value>) -> EvalResult {
    expect_min_args("funcall", &args, 1)?;
    let mut args = args;
    let function = args.remove(0);
    eval.apply(function, args)
}

fn builtin_apply(eval: &mut Evaluator, args: Vec<Value>) -> EvalResult {
    expect_min_args("apply", &args, 1)?;
    let mut args = args;
    let function = args.remove(0);
    let Some(last) = args.pop() else {
        return eval.apply(function, Vec::new());
    };
    args.extend(expect_list(&last)?);
    eval.apply(function, args)
}

fn builtin_fset(eval: &mut Evaluator, args: Vec<Value>) -> EvalResult {
    expect_args("fset", &args, 2)?;
    let name = expect_symbol_name(&args[0])?;
    if name == "nil" {
        return Err(signal("setting-constant", vec![Value::symbol("nil")]));
    }
    eval.obarray_mut().set_symbol_function(name, args[1]);
    Ok(args[1])
}

fn builtin_symbol_function(eval: &mut Evaluator, args: Vec<Value>) -> EvalResult {
    expect_args("symbol-function", &args, 1)?;
    let name = expect_symbol_name(&args[0])?;
    Ok(eval.obarray().symbol_function(name).copied().unwrap_or(Value::Nil))
}

fn builtin_fboundp(eval: &mut Evaluator, args: Vec<Value>) -> EvalResult {
    expect_args("fboundp", &args, 1)?;
    let name = expect_symbol_name(&args[0])?;
    Ok(Value::bool(eval.obarray().fboundp(name)))
}

fn builtin_provide(eval: &mut Evaluator, args: Vec<Value>) -> EvalResult {
    expect_range_args("provide", &args, 1, 2)?;
    eval.provide(args[0])
}

fn builtin_featurep(eval: &mut Evaluator, args: Vec<Value>) -> EvalResult {
    expect_range_args("featurep", &args, 1, 2)?;
    expect_symbol_name(&args[0])?;
    Ok(Value::bool(eval.featurep(&args[0])))
}

fn builtin_garbage_collect(eval: &mut Evaluator, args: Vec<Value>) -> EvalResult {
    expect_args("garbage-collect", &args, 0)?;
    let stats = eval.garbage_collect();
    Ok(Value::list(vec![
        Value::Int(stats.live as i64),
        Value::Int(stats.freed as i64),
    ]))
}

fn builtin_documentation(eval: &mut Evaluator, args: Vec<Value>) -> EvalResult {
    expect_range_args("documentation", &args, 1, 2)?;
    let function = eval.indirect_function(args[0])?;
    if function.is_nil() {
        return Err(signal("void-function", vec![args[0]]));
    }
    Ok(module_funcall::module_function_documentation(&function)
        .map(Value::string)
        .unwrap_or(Value::Nil))
}

// ---------------------------------------------------------------------------
// Lists and equality
// ---------------------------------------------------------------------------

fn builtin_cons(args: Vec<Value>) -> EvalResult {
    expect_args("cons", &args, 2)?;
    Ok(Value::cons(args[0], args[1]))
}

fn builtin_car(args: Vec<Value>) -> EvalResult {
    expect_args("car", &args, 1)?;
    match args[0] {
        Value::Nil => Ok(Value::Nil),
        cons @ Value::Cons(_) => Ok(cons.cons_car()),
        other => Err(signal(
            "wrong-type-argument",
            vec![Value::symbol("listp"), other],
        )),
    }
}

fn builtin_cdr(args: Vec<Value>) -> EvalResult {
    expect_args("cdr", &args, 1)?;
    match args[0] {
        Value::Nil => Ok(Value::Nil),
        cons @ Value::Cons(_) => Ok(cons.cons_cdr()),
        other => Err(signal(
            "wrong-type-argument",
            vec![Value::symbol("listp"), other],
        )),
    }
}

fn builtin_length(args: Vec<Value>) -> EvalResult {
    expect_args("length", &args, 1)?;
    let len = match &args[0] {
        Value::Str(_) => args[0].as_str().map_or(0, |s| s.chars().count()),
        other => list_to_vec(other)
            .ok_or_else(|| {
                signal(
                    "wrong-type-argument",
                    vec![Value::symbol("sequencep"), *other],
                )
            })?
            .len(),
    };
    Ok(Value::Int(len as i64))
}

fn builtin_eq(args: Vec<Value>) -> EvalResult {
    expect_args("eq", &args, 2)?;
    Ok(Value::bool(eq_value(&args[0], &args[1])))
}

fn builtin_equal(args: Vec<Value>) -> EvalResult {
    expect_args("equal", &args, 2)?;
    Ok(Value::bool(equal_value(&args[0], &args[1], 0)))
}

fn builtin_identity(args: Vec<Value>) -> EvalResult {
    expect_args("identity", &args, 1)?;
    Ok(args[0])
}

fn builtin_concat(args: Vec<Value>) -> EvalResult {
    let mut out = String::new();
    for arg in &args {
        match arg {
            Value::Nil => {}
            Value::Str(_) => out.push_str(arg.as_str().unwrap_or_default()),
            other => {
                return Err(signal(
                    "wrong-type-argument",
                    vec![Value::symbol("sequencep"), *other],
                ))
            }
        }
    }
    Ok(Value::string(out))
}

// ---------------------------------------------------------------------------
// Arithmetic
// ---------------------------------------------------------------------------

#[derive(Clone, Copy)]
enum Number {
    Int(i64),
    Float(f64),
}

fn expect_number(value: &Value) -> Result<Number, Flow> {
    match value {
        Value::Int(n) => Ok(Number::Int(*n)),
        Value::Float(f) => Ok(Number::Float(*f)),
        other => Err(signal(
            "wrong-type-argument",
            vec![Value::symbol("number-or-marker-p"), *other],
        )),
    }
}

fn arith(
    args: &[Value],
    init: Number,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> EvalResult {
    let mut acc = init;
    for arg in args {
        acc = match (acc, expect_number(arg)?) {
            (Number::Int(a), Number::Int(b)) => match int_op(a, b) {
                Some(n) => Number::Int(n),
                None => return Err(signal("overflow-error", vec![])),
            },
            (Number::Int(a), Number::Float(b)) => Number::Float(float_op(a as f64, b)),
            (Number::Float(a), Number::Int(b)) => Number::Float(float_op(a, b as f64)),
            (Number::Float(a), Number::Float(b)) => Number::Float(float_op(a, b)),
        };
    }
    match acc {
        Number::Int(n) => super::module::check_fixnum(n),
        Number::Float(f) => Ok(Value::Float(f)),
    }
}

fn builtin_add(args: Vec<Value>) -> EvalResult {
    arith(&args, Number::Int(0), i64::checked_add, |a, b| a + b)
}

fn builtin_sub(args: Vec<Value>) -> EvalResult {
    match args.split_first() {
        None => Ok(Value::Int(0)),
        Some((only, [])) => arith(&[*only], Number::Int(0), i64::checked_sub, |a, b| a - b),
        Some((first, rest)) => {
            arith(rest, expect_number(first)?, i64::checked_sub, |a, b| a - b)
        }
    }
}

// ---------------------------------------------------------------------------
// Non-local exits and types
// ---------------------------------------------------------------------------

fn builtin_signal(args: Vec<Value>) -> EvalResult {
    expect_args("signal", &args, 2)?;
    let name = expect_symbol_name(&args[0])?;
    Err(signal_with_data(intern(name), args[1]))
}

fn builtin_throw(args: Vec<Value>) -> EvalResult {
    expect_args("throw", &args, 2)?;
    Err(Flow::Throw {
        tag: args[0],
        value: args[1],
    })
}

fn builtin_type_of(args: Vec<Value>) -> EvalResult {
    expect_args("type-of", &args, 1)?;
    Ok(Value::symbol(args[0].type_name()))
}
