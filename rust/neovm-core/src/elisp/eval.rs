//! The evaluator: function application, non-local exits and GC roots.

use std::path::Path;

use super::builtins;
use super::error::{condition_matches, map_flow, signal, EvalError, EvalResult, Flow, SignalData};
use super::intern::{resolve_sym, set_current_interner, clear_current_interner_if, StringInterner};
use super::module::{self, ModuleConfig, ModuleState};
use super::symbol::Obarray;
use super::value::{clear_current_heap_if, eq_value, list_to_vec, set_current_heap, Value};
use crate::gc::{CollectStats, GcTrace, LispHeap};

const DEFAULT_MAX_DEPTH: usize = 1600;
/// Longest chain of symbol function indirections `apply` follows.
const MAX_INDIRECTIONS: usize = 100;

/// The Elisp evaluator state.
///
/// Fields drop in declaration order: the heap goes first so user-pointer
/// finalizers run while the module libraries that own them are still loaded.
pub struct Evaluator {
    heap: Box<LispHeap>,
    interner: Box<StringInterner>,
    pub(crate) obarray: Obarray,
    /// Values held only by Rust frames that must survive a collection.
    temp_roots: Vec<Value>,
    depth: usize,
    max_depth: usize,
    pub(crate) modules: ModuleState,
}

impl Evaluator {
    /// An evaluator whose module configuration comes from the environment.
    pub fn new() -> Self {
        Self::with_module_config(ModuleConfig::from_env())
    }

    pub fn with_module_config(config: ModuleConfig) -> Self {
        let mut eval = Self {
            heap: Box::new(LispHeap::new()),
            interner: Box::new(StringInterner::new()),
            obarray: Obarray::new(),
            temp_roots: Vec::new(),
            depth: 0,
            max_depth: DEFAULT_MAX_DEPTH,
            modules: ModuleState::new(config),
        };
        eval.setup_thread_locals();
        builtins::register_builtins(&mut eval.obarray);
        module::register_bootstrap_vars(&mut eval.obarray);
        eval.obarray.set_symbol_value("features", Value::Nil);
        eval
    }

    /// Install this evaluator's heap and interner as the thread's current
    /// ones.  Called on construction; call again after switching between
    /// evaluators on one thread.
    pub fn setup_thread_locals(&mut self) {
        set_current_heap(&mut self.heap);
        set_current_interner(&mut self.interner);
    }

    pub fn obarray(&self) -> &Obarray {
        &self.obarray
    }

    pub fn obarray_mut(&mut self) -> &mut Obarray {
        &mut self.obarray
    }

    pub fn module_state(&self) -> &ModuleState {
        &self.modules
    }

    pub fn module_config(&self) -> ModuleConfig {
        self.modules.config()
    }

    pub fn heap_allocated(&self) -> usize {
        self.heap.allocated_count()
    }

    pub fn set_max_depth(&mut self, depth: usize) {
        self.max_depth = depth.max(1);
    }

    // -----------------------------------------------------------------------
    // Application
    // -----------------------------------------------------------------------

    /// Call `function` with `args`.
    pub fn apply(&mut self, function: Value, args: Vec<Value>) -> EvalResult {
        self.depth += 1;
        if self.depth > self.max_depth {
            self.depth -= 1;
            return Err(signal(
                "excessive-lisp-nesting",
                vec![Value::Int(self.max_depth as i64)],
            ));
        }
        let result = self.apply_inner(function, args);
        self.depth -= 1;
        result
    }

    fn apply_inner(&mut self, function: Value, args: Vec<Value>) -> EvalResult {
        match self.indirect_function(function)? {
            Value::Subr(id) => {
                let name = resolve_sym(id);
                builtins::dispatch_builtin(self, name, args)
                    .unwrap_or_else(|| Err(signal("void-function", vec![Value::Subr(id)])))
            }
            f @ Value::ModuleFunction(_) => module::funcall::call_module_function(self, f, &args),
            Value::Nil => Err(signal("void-function", vec![Value::Nil])),
            other => Err(signal("invalid-function", vec![other])),
        }
    }

    /// Follow symbol function cells until a non-symbol definition.
    pub(crate) fn indirect_function(&self, function: Value) -> Result<Value, Flow> {
        let mut current = function;
        for _ in 0..MAX_INDIRECTIONS {
            let name = match current {
                Value::Symbol(_) | Value::True => current.as_symbol_name().unwrap_or("t"),
                other => return Ok(other),
            };
            current = match self.obarray.symbol_function(name) {
                Some(def) => *def,
                None => return Err(signal("void-function", vec![Value::symbol(name)])),
            };
        }
        Err(signal("cyclic-function-indirection", vec![function]))
    }

    /// Call the function named `name`; top-level convenience for embedders.
    pub fn funcall_named(&mut self, name: &str, args: Vec<Value>) -> Result<Value, EvalError> {
        map_flow(self.apply(Value::symbol(name), args))
    }

    /// Load a native module and run its init function.
    pub fn load_module(&mut self, path: &Path) -> Result<Value, EvalError> {
        map_flow(module::load::module_load(self, path))
    }

    // -----------------------------------------------------------------------
    // Non-local exits
    // -----------------------------------------------------------------------

    /// `(catch TAG BODY)`: a `throw` to a tag `eq` to `tag` returns its value.
    pub fn catch_tag(
        &mut self,
        tag: Value,
        body: impl FnOnce(&mut Self) -> EvalResult,
    ) -> EvalResult {
        let mark = self.push_temp_root(tag);
        let result = body(self);
        self.truncate_temp_roots(mark);
        match result {
            Err(Flow::Throw { tag: thrown, value }) if eq_value(&thrown, &tag) => Ok(value),
            other => other,
        }
    }

    /// `(condition-case nil BODY (CONDITIONS HANDLER))`.
    pub fn condition_case(
        &mut self,
        conditions: &[&str],
        body: impl FnOnce(&mut Self) -> EvalResult,
        handler: impl FnOnce(&mut Self, SignalData) -> EvalResult,
    ) -> EvalResult {
        match body(self) {
            Err(Flow::Signal(sig))
                if conditions
                    .iter()
                    .any(|condition| condition_matches(sig.symbol_name(), condition)) =>
            {
                handler(self, sig)
            }
            other => other,
        }
    }

    // -----------------------------------------------------------------------
    // Features
    // -----------------------------------------------------------------------

    pub fn provide(&mut self, feature: Value) -> EvalResult {
        if !feature.is_symbol() {
            return Err(signal(
                "wrong-type-argument",
                vec![Value::symbol("symbolp"), feature],
            ));
        }
        if !self.featurep(&feature) {
            let features = self.features_list();
            self.obarray
                .set_symbol_value("features", Value::cons(feature, Value::list(features)));
        }
        Ok(feature)
    }

    pub fn featurep(&self, feature: &Value) -> bool {
        self.features_list().iter().any(|f| eq_value(f, feature))
    }

    fn features_list(&self) -> Vec<Value> {
        self.obarray
            .symbol_value("features")
            .and_then(list_to_vec)
            .unwrap_or_default()
    }

    // -----------------------------------------------------------------------
    // Garbage collection
    // -----------------------------------------------------------------------

    /// Protect `value` from collection until `truncate_temp_roots(mark)`.
    pub(crate) fn push_temp_root(&mut self, value: Value) -> usize {
        let mark = self.temp_roots.len();
        self.temp_roots.push(value);
        mark
    }

    pub(crate) fn truncate_temp_roots(&mut self, mark: usize) {
        self.temp_roots.truncate(mark);
    }

    /// Full mark-and-sweep collection from every root the evaluator knows:
    /// the obarray, temporary roots, live module environments (arenas and
    /// pending exits) and the global reference table.
    pub fn garbage_collect(&mut self) -> CollectStats {
        let mut roots = self.temp_roots.clone();
        self.obarray.trace_roots(&mut roots);
        self.modules.trace_roots(&mut roots);
        let stats = self.heap.collect(roots.into_iter());
        tracing::debug!(live = stats.live, freed = stats.freed, "garbage collection");
        stats
    }
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Evaluator {
    fn drop(&mut self) {
        clear_current_heap_if(&*self.heap);
        clear_current_interner_if(&*self.interner);
    }
}
