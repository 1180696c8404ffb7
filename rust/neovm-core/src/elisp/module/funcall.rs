//! Module functions: closures created by `make_function` and the
//! dispatcher that calls them.

use std::ffi::c_void;

use super::abi::{EmacsSubr, VARIADIC_FUNCTION};
use super::with_native_frame;
use crate::elisp::error::{signal, EvalResult, Flow};
use crate::elisp::eval::Evaluator;
use crate::elisp::value::{with_heap, with_heap_mut, Value};

/// Heap payload of a module function value.
pub struct ModuleFunction {
    pub min_arity: isize,
    /// `VARIADIC_FUNCTION` for no upper bound.
    pub max_arity: isize,
    pub subr: EmacsSubr,
    pub documentation: Option<String>,
    pub data: *mut c_void,
}

impl ModuleFunction {
    pub fn is_variadic(&self) -> bool {
        self.max_arity == VARIADIC_FUNCTION
    }

    pub fn accepts(&self, nargs: usize) -> bool {
        let nargs = nargs as isize;
        nargs >= self.min_arity && (self.is_variadic() || nargs <= self.max_arity)
    }

    pub(crate) fn subr_address(&self) -> usize {
        self.subr as usize
    }
}

/// Validate an arity declaration and allocate the function object.
pub(crate) fn make_function(
    min_arity: isize,
    max_arity: isize,
    subr: Option<EmacsSubr>,
    documentation: Option<String>,
    data: *mut c_void,
) -> EvalResult {
    if min_arity < 0 || (max_arity != VARIADIC_FUNCTION && max_arity < min_arity) {
        return Err(signal(
            "invalid-arity",
            vec![Value::Int(min_arity as i64), Value::Int(max_arity as i64)],
        ));
    }
    let Some(subr) = subr else {
        return Err(signal(
            "wrong-type-argument",
            vec![Value::symbol("functionp"), Value::Nil],
        ));
    };
    let id = with_heap_mut(|heap| {
        heap.alloc_module_function(ModuleFunction {
            min_arity,
            max_arity,
            subr,
            documentation,
            data,
        })
    });
    Ok(Value::ModuleFunction(id))
}

/// Call module function `function` with `args`.
///
/// The arity is checked before any environment is created.  A pending exit
/// left by the native code wins over its return value; a null return with
/// nothing pending signals `invalid-module-call`.
pub fn call_module_function(eval: &mut Evaluator, function: Value, args: &[Value]) -> EvalResult {
    let Value::ModuleFunction(id) = function else {
        return Err(signal(
            "wrong-type-argument",
            vec![Value::symbol("module-function-p"), function],
        ));
    };
    let (accepts, subr, data) = with_heap(|heap| {
        let f = heap.get_module_function(id);
        (f.accepts(args.len()), f.subr, f.data)
    });
    if !accepts {
        return Err(signal(
            "wrong-number-of-arguments",
            vec![function, Value::Int(args.len() as i64)],
        ));
    }
    tracing::debug!(nargs = args.len(), "calling module function");

    let roots = eval.push_temp_root(function);
    let outcome = with_native_frame(
        eval,
        args,
        |env, handles| unsafe { subr(env, handles.len() as isize, handles.as_mut_ptr(), data) },
        |modules, ret| (!ret.is_null()).then(|| modules.lookup(ret)),
    );
    eval.truncate_temp_roots(roots);

    let (result, pending) = outcome?;
    if let Some(flow) = pending.into_flow() {
        return Err(flow);
    }
    match result {
        Some(value) => value,
        None => Err(signal("invalid-module-call", vec![function])),
    }
}

/// `(internal--module-call FUNCTION &rest ARGS)`.
pub(crate) fn builtin_internal_module_call(eval: &mut Evaluator, args: Vec<Value>) -> EvalResult {
    let Some((function, rest)) = args.split_first() else {
        return Err(signal(
            "wrong-number-of-arguments",
            vec![Value::symbol("internal--module-call"), Value::Int(0)],
        ));
    };
    call_module_function(eval, *function, rest)
}

/// `(module-function-p OBJECT)`.
pub(crate) fn builtin_module_function_p(args: Vec<Value>) -> EvalResult {
    expect_one("module-function-p", &args)?;
    Ok(Value::bool(matches!(args[0], Value::ModuleFunction(_))))
}

/// `(user-ptrp OBJECT)`.
pub(crate) fn builtin_user_ptrp(args: Vec<Value>) -> EvalResult {
    expect_one("user-ptrp", &args)?;
    Ok(Value::bool(matches!(args[0], Value::UserPtr(_))))
}

fn expect_one(name: &str, args: &[Value]) -> Result<(), Flow> {
    if args.len() != 1 {
        return Err(signal(
            "wrong-number-of-arguments",
            vec![Value::symbol(name), Value::Int(args.len() as i64)],
        ));
    }
    Ok(())
}

/// Documentation string given to `make_function`, if any.
pub(crate) fn module_function_documentation(function: &Value) -> Option<String> {
    match function {
        Value::ModuleFunction(id) => with_heap(|heap| heap.get_module_function(*id).documentation.clone()),
        _ => None,
    }
}
