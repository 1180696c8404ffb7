//! `extern "C"` entry points of the module environment table.
//!
//! Every entry point goes through [`entry`]: it checks thread affinity,
//! finds the live environment behind the `env` pointer, short-circuits
//! when an exit is already pending (checking entry points only), and runs
//! the body with Rust panics caught.  A body's `Err(Flow)` becomes the
//! environment's pending exit and the entry point returns its sentinel.

use std::any::Any;
use std::cell::Cell;
use std::ffi::{c_char, c_void, CStr};
use std::panic::{self, AssertUnwindSafe};

use super::abi::{EmacsEnv, EmacsFinalizer, EmacsRuntime, EmacsSubr, EmacsValue, FuncallExit};
use super::env::PendingExit;
use super::user_ptr::UserPtr;
use super::{check_fixnum, contract_violation, funcall};
use crate::elisp::error::{error_message, signal, Flow};
use crate::elisp::eval::Evaluator;
use crate::elisp::intern::intern;
use crate::elisp::value::{eq_value, with_heap, with_heap_mut, Value};
use crate::gc::ObjId;

// ---------------------------------------------------------------------------
// Evaluator access from native callbacks
// ---------------------------------------------------------------------------

thread_local! {
    static CURRENT_EVALUATOR: Cell<*mut Evaluator> = const { Cell::new(std::ptr::null_mut()) };
}

/// Makes `eval` reachable from entry points for the duration of a native
/// call.  Restores the previous evaluator on drop, so scopes nest.
pub(crate) struct EvaluatorScope {
    previous: *mut Evaluator,
}

impl EvaluatorScope {
    pub(crate) fn enter(eval: &mut Evaluator) -> Self {
        let previous = CURRENT_EVALUATOR.with(|slot| slot.replace(eval as *mut Evaluator));
        Self { previous }
    }
}

impl Drop for EvaluatorScope {
    fn drop(&mut self) {
        CURRENT_EVALUATOR.with(|slot| slot.set(self.previous));
    }
}

fn current_evaluator<'a>() -> &'a mut Evaluator {
    let ptr = CURRENT_EVALUATOR.with(Cell::get);
    if ptr.is_null() {
        // Only the evaluator's own thread ever has a scope installed.
        contract_violation("module API called outside a module call or from a non-main thread");
    }
    unsafe { &mut *ptr }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Record `flow` as frame `index`'s pending exit unless one is already set.
fn record_exit(eval: &mut Evaluator, index: usize, flow: Flow) {
    let pending = PendingExit::from_flow(flow);
    let frame = eval.modules.frame_mut(index);
    if !frame.pending.is_pending() {
        frame.pending = pending;
    }
}

/// Set a pending exit requested by native code.
fn set_exit(eval: &mut Evaluator, index: usize, pending: PendingExit) {
    if eval.modules.frame(index).pending.is_pending() {
        eval.modules
            .tolerate("non-local exit set while another one is pending; keeping the first");
        return;
    }
    eval.modules.frame_mut(index).pending = pending;
}

fn entry<T>(
    env: *mut EmacsEnv,
    sentinel: T,
    checking: bool,
    body: impl FnOnce(&mut Evaluator, usize) -> Result<T, Flow>,
) -> T {
    let eval = current_evaluator();
    if !eval.modules.affinity().is_current() {
        contract_violation("module API called from a non-main thread");
    }
    let Some(index) = eval.modules.frame_index(env) else {
        contract_violation("module API called with an environment that is not live");
    };
    if checking && eval.modules.frame(index).pending.is_pending() {
        return sentinel;
    }
    match panic::catch_unwind(AssertUnwindSafe(|| body(&mut *eval, index))) {
        Ok(Ok(value)) => value,
        Ok(Err(flow)) => {
            record_exit(eval, index, flow);
            sentinel
        }
        Err(payload) => {
            let message = panic_message(&*payload);
            tracing::error!(target: "neovm::module", "panic inside module entry point: {message}");
            eval.modules.unwind_to(index + 1);
            record_exit(eval, index, error_message(format!("Rust panic: {message}")));
            sentinel
        }
    }
}

// ---------------------------------------------------------------------------
// Tables
// ---------------------------------------------------------------------------

/// Function table for a new environment.
pub(crate) fn env_table(module_id: i32, private_members: *mut c_void) -> EmacsEnv {
    EmacsEnv {
        size: std::mem::size_of::<EmacsEnv>() as isize,
        module_id,
        private_members,
        make_global_ref,
        free_global_ref,
        error_check,
        error_clear,
        error_get,
        error_signal,
        error_throw,
        make_function,
        funcall,
        intern: intern_symbol,
        type_of,
        is_not_nil,
        eq,
        fixnum_to_int,
        make_fixnum,
        float_to_c_double,
        make_float,
        copy_string_contents,
        make_string,
        make_user_ptr,
        get_user_ptr,
        set_user_ptr,
        get_user_finalizer,
        set_user_finalizer,
    }
}

/// Runtime handed to a module's init function; `env` must stay live for
/// the whole init call.
pub(crate) fn runtime_for(env: *mut EmacsEnv) -> EmacsRuntime {
    EmacsRuntime {
        size: std::mem::size_of::<EmacsRuntime>() as isize,
        private_members: env.cast(),
        get_environment,
    }
}

extern "C" fn get_environment(runtime: *mut EmacsRuntime) -> *mut EmacsEnv {
    let eval = current_evaluator();
    if !eval.modules.affinity().is_current() {
        contract_violation("get_environment called from a non-main thread");
    }
    if runtime.is_null() {
        contract_violation("get_environment called with a null runtime");
    }
    let env: *mut EmacsEnv = unsafe { (*runtime).private_members.cast() };
    if eval.modules.frame_index(env).is_none() {
        contract_violation("get_environment called after module init returned");
    }
    env
}

// ---------------------------------------------------------------------------
// Global references
// ---------------------------------------------------------------------------

extern "C" fn make_global_ref(env: *mut EmacsEnv, value: EmacsValue) -> EmacsValue {
    entry(env, EmacsValue::NULL, true, |eval, _| {
        let value = eval.modules.lookup(value)?;
        eval.modules.globals_mut().make(value)
    })
}

extern "C" fn free_global_ref(env: *mut EmacsEnv, value: EmacsValue) {
    entry(env, (), true, |eval, _| {
        let object = eval.modules.lookup_for_release(value)?;
        if let Err(err) = eval.modules.globals_mut().free(value, object) {
            eval.modules.tolerate(&err.to_string());
        }
        Ok(())
    })
}

// ---------------------------------------------------------------------------
// Non-local exits
// ---------------------------------------------------------------------------

extern "C" fn error_check(env: *mut EmacsEnv) -> FuncallExit {
    entry(env, FuncallExit::Return, false, |eval, index| {
        Ok(eval.modules.frame(index).pending.status())
    })
}

extern "C" fn error_clear(env: *mut EmacsEnv) {
    entry(env, (), false, |eval, index| {
        eval.modules.frame_mut(index).pending = PendingExit::Return;
        Ok(())
    })
}

extern "C" fn error_get(
    env: *mut EmacsEnv,
    symbol: *mut EmacsValue,
    data: *mut EmacsValue,
) -> FuncallExit {
    entry(env, FuncallExit::Return, false, |eval, index| {
        let pending = eval.modules.frame(index).pending;
        if let Some((first, second)) = pending.parts() {
            let first = eval.modules.make_local(index, first).unwrap_or(EmacsValue::NULL);
            let second = eval.modules.make_local(index, second).unwrap_or(EmacsValue::NULL);
            unsafe {
                if !symbol.is_null() {
                    *symbol = first;
                }
                if !data.is_null() {
                    *data = second;
                }
            }
        }
        Ok(pending.status())
    })
}

extern "C" fn error_signal(env: *mut EmacsEnv, symbol: EmacsValue, data: EmacsValue) {
    entry(env, (), false, |eval, index| {
        let symbol = eval.modules.lookup(symbol)?;
        let data = eval.modules.lookup(data)?;
        let Some(name) = symbol.as_symbol_name() else {
            return Err(signal(
                "wrong-type-argument",
                vec![Value::symbol("symbolp"), symbol],
            ));
        };
        set_exit(
            eval,
            index,
            PendingExit::Signal {
                symbol: intern(name),
                data,
            },
        );
        Ok(())
    })
}

extern "C" fn error_throw(env: *mut EmacsEnv, tag: EmacsValue, value: EmacsValue) {
    entry(env, (), false, |eval, index| {
        let tag = eval.modules.lookup(tag)?;
        let value = eval.modules.lookup(value)?;
        set_exit(eval, index, PendingExit::Throw { tag, value });
        Ok(())
    })
}

// ---------------------------------------------------------------------------
// Functions and symbols
// ---------------------------------------------------------------------------

extern "C" fn make_function(
    env: *mut EmacsEnv,
    min_arity: isize,
    max_arity: isize,
    function: Option<EmacsSubr>,
    documentation: *const c_char,
    data: *mut c_void,
) -> EmacsValue {
    entry(env, EmacsValue::NULL, true, |eval, index| {
        let documentation = if documentation.is_null() {
            None
        } else {
            Some(unsafe { CStr::from_ptr(documentation) }.to_string_lossy().into_owned())
        };
        let function = funcall::make_function(min_arity, max_arity, function, documentation, data)?;
        eval.modules.make_local(index, function)
    })
}

extern "C" fn funcall(
    env: *mut EmacsEnv,
    function: EmacsValue,
    nargs: isize,
    args: *mut EmacsValue,
) -> EmacsValue {
    entry(env, EmacsValue::NULL, true, |eval, index| {
        let function = eval.modules.lookup(function)?;
        let handles: &[EmacsValue] = match nargs {
            0 => &[],
            n if n < 0 => return Err(signal("args-out-of-range", vec![Value::Int(n as i64)])),
            _ if args.is_null() => return Err(error_message("Null argument vector")),
            n => unsafe { std::slice::from_raw_parts(args, n as usize) },
        };
        let argv = handles
            .iter()
            .map(|handle| eval.modules.lookup(*handle))
            .collect::<Result<Vec<_>, _>>()?;
        let result = eval.apply(function, argv)?;
        eval.modules.make_local(index, result)
    })
}

extern "C" fn intern_symbol(env: *mut EmacsEnv, name: *const c_char) -> EmacsValue {
    entry(env, EmacsValue::NULL, true, |eval, index| {
        if name.is_null() {
            return Err(error_message("Null symbol name"));
        }
        let name = unsafe { CStr::from_ptr(name) }
            .to_str()
            .map_err(|_| error_message("Invalid UTF-8 string"))?;
        eval.modules.make_local(index, Value::symbol(name))
    })
}

// ---------------------------------------------------------------------------
// Predicates and numbers
// ---------------------------------------------------------------------------

extern "C" fn type_of(env: *mut EmacsEnv, value: EmacsValue) -> EmacsValue {
    entry(env, EmacsValue::NULL, true, |eval, index| {
        let value = eval.modules.lookup(value)?;
        eval.modules.make_local(index, Value::symbol(value.type_name()))
    })
}

extern "C" fn is_not_nil(env: *mut EmacsEnv, value: EmacsValue) -> bool {
    entry(env, false, true, |eval, _| {
        Ok(eval.modules.lookup(value)?.is_truthy())
    })
}

extern "C" fn eq(env: *mut EmacsEnv, a: EmacsValue, b: EmacsValue) -> bool {
    entry(env, false, true, |eval, _| {
        let a = eval.modules.lookup(a)?;
        let b = eval.modules.lookup(b)?;
        Ok(eq_value(&a, &b))
    })
}

extern "C" fn fixnum_to_int(env: *mut EmacsEnv, value: EmacsValue) -> i64 {
    entry(env, 0, true, |eval, _| match eval.modules.lookup(value)? {
        Value::Int(n) => Ok(n),
        other => Err(signal(
            "wrong-type-argument",
            vec![Value::symbol("integerp"), other],
        )),
    })
}

extern "C" fn make_fixnum(env: *mut EmacsEnv, value: i64) -> EmacsValue {
    entry(env, EmacsValue::NULL, true, |eval, index| {
        let value = check_fixnum(value)?;
        eval.modules.make_local(index, value)
    })
}

extern "C" fn float_to_c_double(env: *mut EmacsEnv, value: EmacsValue) -> f64 {
    entry(env, 0.0, true, |eval, _| match eval.modules.lookup(value)? {
        Value::Float(f) => Ok(f),
        other => Err(signal(
            "wrong-type-argument",
            vec![Value::symbol("floatp"), other],
        )),
    })
}

extern "C" fn make_float(env: *mut EmacsEnv, value: f64) -> EmacsValue {
    entry(env, EmacsValue::NULL, true, |eval, index| {
        eval.modules.make_local(index, Value::Float(value))
    })
}

// ---------------------------------------------------------------------------
// Strings
// ---------------------------------------------------------------------------

extern "C" fn copy_string_contents(
    env: *mut EmacsEnv,
    value: EmacsValue,
    buffer: *mut c_char,
    size: *mut isize,
) -> bool {
    entry(env, false, true, |eval, _| {
        let value = eval.modules.lookup(value)?;
        let Some(text) = value.as_str() else {
            return Err(signal(
                "wrong-type-argument",
                vec![Value::symbol("stringp"), value],
            ));
        };
        if size.is_null() {
            eval.modules
                .tolerate("copy_string_contents called with a null size pointer");
            return Err(error_message("Null size pointer"));
        }
        let required = text.len() as isize + 1;
        if buffer.is_null() {
            unsafe { *size = required };
            return Ok(true);
        }
        let available = unsafe { *size };
        if available < required {
            unsafe { *size = required };
            return Err(signal(
                "args-out-of-range",
                vec![Value::Int(available as i64), Value::Int(required as i64)],
            ));
        }
        unsafe {
            std::ptr::copy_nonoverlapping(text.as_ptr(), buffer.cast::<u8>(), text.len());
            *buffer.add(text.len()) = 0;
            *size = required;
        }
        Ok(true)
    })
}

extern "C" fn make_string(env: *mut EmacsEnv, contents: *const c_char, length: isize) -> EmacsValue {
    entry(env, EmacsValue::NULL, true, |eval, index| {
        if length < 0 {
            return Err(signal("args-out-of-range", vec![Value::Int(length as i64)]));
        }
        let bytes: &[u8] = if length == 0 {
            &[]
        } else if contents.is_null() {
            return Err(error_message("Null string contents"));
        } else {
            unsafe { std::slice::from_raw_parts(contents.cast::<u8>(), length as usize) }
        };
        let text = std::str::from_utf8(bytes).map_err(|_| error_message("Invalid UTF-8 string"))?;
        eval.modules.make_local(index, Value::string(text))
    })
}

// ---------------------------------------------------------------------------
// User pointers
// ---------------------------------------------------------------------------

fn expect_user_ptr(value: Value) -> Result<ObjId, Flow> {
    match value {
        Value::UserPtr(id) => Ok(id),
        other => Err(signal(
            "wrong-type-argument",
            vec![Value::symbol("user-ptrp"), other],
        )),
    }
}

extern "C" fn make_user_ptr(
    env: *mut EmacsEnv,
    finalizer: Option<EmacsFinalizer>,
    ptr: *mut c_void,
) -> EmacsValue {
    entry(env, EmacsValue::NULL, true, |eval, index| {
        let id = with_heap_mut(|heap| heap.alloc_user_ptr(UserPtr::new(ptr, finalizer)));
        eval.modules.make_local(index, Value::UserPtr(id))
    })
}

extern "C" fn get_user_ptr(env: *mut EmacsEnv, value: EmacsValue) -> *mut c_void {
    entry(env, std::ptr::null_mut(), true, |eval, _| {
        let id = expect_user_ptr(eval.modules.lookup(value)?)?;
        Ok(with_heap(|heap| heap.get_user_ptr(id).ptr))
    })
}

extern "C" fn set_user_ptr(env: *mut EmacsEnv, value: EmacsValue, ptr: *mut c_void) {
    entry(env, (), true, |eval, _| {
        let id = expect_user_ptr(eval.modules.lookup(value)?)?;
        with_heap_mut(|heap| heap.get_user_ptr_mut(id).ptr = ptr);
        Ok(())
    })
}

extern "C" fn get_user_finalizer(env: *mut EmacsEnv, value: EmacsValue) -> Option<EmacsFinalizer> {
    entry(env, None, true, |eval, _| {
        let id = expect_user_ptr(eval.modules.lookup(value)?)?;
        Ok(with_heap(|heap| heap.get_user_ptr(id).finalizer))
    })
}

extern "C" fn set_user_finalizer(
    env: *mut EmacsEnv,
    value: EmacsValue,
    finalizer: Option<EmacsFinalizer>,
) {
    entry(env, (), true, |eval, _| {
        let id = expect_user_ptr(eval.modules.lookup(value)?)?;
        with_heap_mut(|heap| heap.get_user_ptr_mut(id).finalizer = finalizer);
        Ok(())
    })
}
