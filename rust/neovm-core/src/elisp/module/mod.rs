//! Dynamic module support.
//!
//! Native shared libraries talk to the evaluator through the `emacs_env`
//! function table in [`abi`].  Each call into native code gets a fresh
//! [`Environment`] pushed on a LIFO stack; its arena backs the local value
//! handles given to native code and its pending exit turns `signal`/`throw`
//! into in-band status that is re-raised once the native call returns.
//!
//! - `arena`: frame-chained handle storage.
//! - `global_refs`: refcounted handles that outlive a call.
//! - `api`: the `extern "C"` entry points.
//! - `funcall`: `make_function` closures and the dispatcher.
//! - `load`: `module-load` and the init handshake.

pub mod abi;
pub mod api;
pub mod arena;
pub mod config;
pub mod env;
pub mod funcall;
pub mod global_refs;
pub mod load;
pub mod user_ptr;

use std::path::{Path, PathBuf};
use std::thread::ThreadId;

use abi::{EmacsEnv, EmacsValue};
use arena::{HandleError, GLOBAL_ARENA_ID};
use env::{Environment, PendingExit};
use global_refs::GlobalRefTable;
use load::DynamicLibrary;

use super::error::{signal, Flow};
use super::eval::Evaluator;
use super::symbol::Obarray;
use super::value::{Value, MOST_NEGATIVE_FIXNUM, MOST_POSITIVE_FIXNUM};
use crate::gc::GcTrace;

pub use config::ModuleConfig;

/// Records the thread that owns the module subsystem.
#[derive(Clone, Copy, Debug)]
pub struct ThreadAffinity {
    owner: ThreadId,
}

impl ThreadAffinity {
    pub fn current() -> Self {
        Self {
            owner: std::thread::current().id(),
        }
    }

    pub fn is_current(&self) -> bool {
        std::thread::current().id() == self.owner
    }
}

/// Log and abort.  Unwinding is not an option inside `extern "C"` frames.
pub(crate) fn contract_violation(message: &str) -> ! {
    tracing::error!(target: "neovm::module", "module contract violation: {message}");
    std::process::abort()
}

/// A loaded shared library, kept open for the life of the evaluator since
/// module functions point into it.
pub struct LoadedModule {
    pub path: PathBuf,
    /// Id of the environment the init function ran in.
    pub init_env: u32,
    #[allow(dead_code)]
    library: Box<dyn DynamicLibrary>,
}

/// All module state owned by one evaluator.
pub struct ModuleState {
    config: ModuleConfig,
    affinity: ThreadAffinity,
    frames: Vec<Environment>,
    globals: GlobalRefTable,
    next_env_id: u32,
    loaded: Vec<LoadedModule>,
}

impl ModuleState {
    pub fn new(config: ModuleConfig) -> Self {
        Self {
            config,
            affinity: ThreadAffinity::current(),
            frames: Vec::new(),
            globals: GlobalRefTable::new(),
            next_env_id: 1,
            loaded: Vec::new(),
        }
    }

    pub fn config(&self) -> ModuleConfig {
        self.config
    }

    pub fn affinity(&self) -> ThreadAffinity {
        self.affinity
    }

    pub fn globals(&self) -> &GlobalRefTable {
        &self.globals
    }

    pub(crate) fn globals_mut(&mut self) -> &mut GlobalRefTable {
        &mut self.globals
    }

    /// Number of live environments.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn loaded_modules(&self) -> &[LoadedModule] {
        &self.loaded
    }

    pub(crate) fn record_loaded(
        &mut self,
        path: &Path,
        init_env: u32,
        library: Box<dyn DynamicLibrary>,
    ) {
        self.loaded.push(LoadedModule {
            path: path.to_path_buf(),
            init_env,
            library,
        });
    }

    // -----------------------------------------------------------------------
    // Environment stack
    // -----------------------------------------------------------------------

    pub(crate) fn push_environment(&mut self) -> u32 {
        let id = self.next_env_id;
        self.next_env_id = self.next_env_id.checked_add(1).unwrap_or(1);
        self.frames.push(Environment::new(id));
        tracing::debug!(env = id, depth = self.frames.len(), "module environment pushed");
        id
    }

    /// Finalize and pop the innermost environment, which must be `id`.
    pub(crate) fn pop_environment(&mut self, id: u32) -> PendingExit {
        match self.frames.last_mut() {
            Some(top) if top.id() == id => {
                let pending = top.finalize();
                self.frames.pop();
                tracing::debug!(env = id, status = ?pending.status(), "module environment finalized");
                pending
            }
            _ => contract_violation("module environments popped out of order"),
        }
    }

    pub(crate) fn top_id(&self) -> Option<u32> {
        self.frames.last().map(Environment::id)
    }

    pub(crate) fn top_mut(&mut self) -> Option<&mut Environment> {
        self.frames.last_mut()
    }

    /// Finalize and drop every environment above the first `len`.
    pub(crate) fn unwind_to(&mut self, len: usize) {
        while self.frames.len() > len {
            if let Some(mut frame) = self.frames.pop() {
                tracing::warn!(env = frame.id(), "discarding module environment after a panic");
                frame.finalize();
            }
        }
    }

    /// Index of the live environment behind `env`.
    pub(crate) fn frame_index(&self, env: *const EmacsEnv) -> Option<usize> {
        self.frames.iter().rposition(|frame| frame.is(env))
    }

    pub(crate) fn frame(&self, index: usize) -> &Environment {
        &self.frames[index]
    }

    pub(crate) fn frame_mut(&mut self, index: usize) -> &mut Environment {
        &mut self.frames[index]
    }

    // -----------------------------------------------------------------------
    // Handles
    // -----------------------------------------------------------------------

    fn resolve(&self, handle: EmacsValue) -> Result<Value, HandleError> {
        if handle.is_null() {
            return Err(HandleError::Null);
        }
        match handle.arena_id() {
            GLOBAL_ARENA_ID => self.globals.get(handle),
            id => self
                .frames
                .iter()
                .rev()
                .find(|frame| frame.id() == id)
                .ok_or(HandleError::Dangling(handle))?
                .arena
                .get(handle),
        }
    }

    /// Value behind `handle`.  Invalid handles signal, or abort under
    /// module assertions.
    pub(crate) fn lookup(&self, handle: EmacsValue) -> Result<Value, Flow> {
        self.resolve(handle).map_err(|err| {
            self.tolerate(&err.to_string());
            Flow::from(err)
        })
    }

    /// Like `lookup`, but a global handle whose reference count already
    /// dropped to zero still names its object, so a repeated free is a
    /// tolerated no-op instead of a dangling-handle error.
    pub(crate) fn lookup_for_release(&self, handle: EmacsValue) -> Result<Value, Flow> {
        if !handle.is_null() && handle.arena_id() == GLOBAL_ARENA_ID {
            if let Ok(value) = self.globals.peek(handle) {
                return Ok(value);
            }
        }
        self.lookup(handle)
    }

    /// Store `value` in the arena of frame `index`.
    pub(crate) fn make_local(&mut self, index: usize, value: Value) -> Result<EmacsValue, Flow> {
        Ok(self.frames[index].arena.allocate(value)?)
    }

    /// Report a violation that is fatal only under module assertions.
    pub(crate) fn tolerate(&self, message: &str) {
        if self.config.assertions {
            contract_violation(message);
        }
        tracing::warn!(target: "neovm::module", "{message}");
    }
}

impl GcTrace for ModuleState {
    fn trace_roots(&self, roots: &mut Vec<Value>) {
        for frame in &self.frames {
            frame.trace_roots(roots);
        }
        self.globals.trace_roots(roots);
    }
}

/// Run native code in a fresh environment whose arena holds `args`.
///
/// `native` receives the environment pointer and the argument handles;
/// `finish` sees its raw result while the arena is still live.  The
/// environment is finalized before returning, and its pending exit is
/// handed back to the caller to re-raise.
pub(crate) fn with_native_frame<R, T>(
    eval: &mut Evaluator,
    args: &[Value],
    native: impl FnOnce(*mut EmacsEnv, &mut [EmacsValue]) -> R,
    finish: impl FnOnce(&ModuleState, R) -> T,
) -> Result<(T, PendingExit), Flow> {
    let id = eval.modules.push_environment();
    let mut handles = Vec::with_capacity(args.len());
    for arg in args {
        let index = eval.modules.depth() - 1;
        match eval.modules.make_local(index, *arg) {
            Ok(handle) => handles.push(handle),
            Err(flow) => {
                eval.modules.pop_environment(id);
                return Err(flow);
            }
        }
    }
    let env = match eval.modules.top_mut() {
        Some(top) => top.as_ptr(),
        None => contract_violation("module environment stack is empty"),
    };
    let raw = {
        let _scope = api::EvaluatorScope::enter(eval);
        native(env, &mut handles)
    };
    let finished = finish(&eval.modules, raw);
    let pending = eval.modules.pop_environment(id);
    Ok((finished, pending))
}

/// Signal for an integer outside the fixnum range.
pub(crate) fn check_fixnum(n: i64) -> Result<Value, Flow> {
    if n > MOST_POSITIVE_FIXNUM {
        Err(signal("overflow-error", vec![]))
    } else if n < MOST_NEGATIVE_FIXNUM {
        Err(signal("underflow-error", vec![]))
    } else {
        Ok(Value::Int(n))
    }
}

/// Variables the module subsystem exposes to Lisp.
pub(crate) fn register_bootstrap_vars(obarray: &mut Obarray) {
    obarray.set_symbol_value(
        "module-file-suffix",
        Value::string(std::env::consts::DLL_SUFFIX),
    );
    obarray.set_symbol_value("most-positive-fixnum", Value::Int(MOST_POSITIVE_FIXNUM));
    obarray.set_symbol_value("most-negative-fixnum", Value::Int(MOST_NEGATIVE_FIXNUM));
}
