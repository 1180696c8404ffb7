//! Per-call module environments and their pending non-local exit.

use std::ptr::null_mut;

use super::abi::{EmacsEnv, FuncallExit};
use super::api;
use super::arena::Arena;
use crate::elisp::error::{signal_with_data, Flow};
use crate::elisp::intern::{resolve_sym, SymId};
use crate::elisp::value::Value;
use crate::gc::GcTrace;

/// Non-local exit recorded by a failing entry point or by native code.
#[derive(Clone, Copy, Debug, Default)]
pub enum PendingExit {
    #[default]
    Return,
    Signal { symbol: SymId, data: Value },
    Throw { tag: Value, value: Value },
}

impl PendingExit {
    pub fn status(&self) -> FuncallExit {
        match self {
            PendingExit::Return => FuncallExit::Return,
            PendingExit::Signal { .. } => FuncallExit::Signal,
            PendingExit::Throw { .. } => FuncallExit::Throw,
        }
    }

    pub fn is_pending(&self) -> bool {
        !matches!(self, PendingExit::Return)
    }

    pub fn from_flow(flow: Flow) -> Self {
        match flow {
            Flow::Signal(sig) => PendingExit::Signal {
                symbol: sig.symbol,
                data: sig.data_value(),
            },
            Flow::Throw { tag, value } => PendingExit::Throw { tag, value },
        }
    }

    /// The exit to re-raise in the evaluator, `None` for a normal return.
    pub fn into_flow(self) -> Option<Flow> {
        match self {
            PendingExit::Return => None,
            PendingExit::Signal { symbol, data } => Some(signal_with_data(symbol, data)),
            PendingExit::Throw { tag, value } => Some(Flow::Throw { tag, value }),
        }
    }

    /// The symbol (or tag) and data (or value) of a pending exit.
    pub fn parts(&self) -> Option<(Value, Value)> {
        match self {
            PendingExit::Return => None,
            PendingExit::Signal { symbol, data } => {
                Some((Value::symbol(resolve_sym(*symbol)), *data))
            }
            PendingExit::Throw { tag, value } => Some((*tag, *value)),
        }
    }
}

/// One live module call frame: the ABI table handed to native code, the
/// frame's pending exit and the arena backing its local handles.
pub struct Environment {
    abi: Box<EmacsEnv>,
    id: u32,
    pub(crate) pending: PendingExit,
    pub(crate) arena: Arena,
}

impl Environment {
    pub fn new(id: u32) -> Self {
        let abi = Box::new(api::env_table(id as i32, null_mut()));
        Self {
            abi,
            id,
            pending: PendingExit::Return,
            arena: Arena::new(id),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// Pointer handed to native code.  Stable while the environment lives.
    pub fn as_ptr(&mut self) -> *mut EmacsEnv {
        &mut *self.abi as *mut EmacsEnv
    }

    pub(crate) fn is(&self, env: *const EmacsEnv) -> bool {
        std::ptr::eq(&*self.abi, env)
    }

    pub fn pending(&self) -> &PendingExit {
        &self.pending
    }

    /// Release the arena and hand back the pending exit.
    pub fn finalize(&mut self) -> PendingExit {
        self.arena.finalize();
        std::mem::take(&mut self.pending)
    }
}

impl GcTrace for Environment {
    fn trace_roots(&self, roots: &mut Vec<Value>) {
        self.arena.trace_roots(roots);
        match self.pending {
            PendingExit::Return => {}
            PendingExit::Signal { data, .. } => roots.push(data),
            PendingExit::Throw { tag, value } => roots.extend([tag, value]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elisp::error::signal;
    use crate::elisp::eval::Evaluator;

    #[test]
    fn new_environment_table() {
        let mut env = Environment::new(7);
        let abi = unsafe { &*env.as_ptr() };
        assert_eq!(abi.module_id, 7);
        assert!(abi.private_members.is_null());
        assert_eq!(abi.size, std::mem::size_of::<EmacsEnv>() as isize);
    }

    #[test]
    fn pending_exit_round_trips_through_flow() {
        let _eval = Evaluator::new();
        let pending = PendingExit::from_flow(signal("overflow-error", vec![Value::Int(1)]));
        assert_eq!(pending.status(), FuncallExit::Signal);
        let Some(Flow::Signal(sig)) = pending.into_flow() else {
            panic!("expected a signal");
        };
        assert_eq!(sig.symbol_name(), "overflow-error");
        assert_eq!(sig.data, vec![Value::Int(1)]);

        let thrown = PendingExit::from_flow(Flow::Throw {
            tag: Value::symbol("done"),
            value: Value::Int(2),
        });
        assert_eq!(thrown.status(), FuncallExit::Throw);
        assert_eq!(
            thrown.parts(),
            Some((Value::symbol("done"), Value::Int(2)))
        );
    }

    #[test]
    fn non_list_signal_data_is_preserved() {
        let _eval = Evaluator::new();
        let pending = PendingExit::Signal {
            symbol: crate::elisp::intern::intern("error"),
            data: Value::Int(9),
        };
        let Some(Flow::Signal(sig)) = pending.into_flow() else {
            panic!("expected a signal");
        };
        assert_eq!(sig.raw_data, Some(Value::Int(9)));
    }

    #[test]
    fn finalize_resets_pending_and_arena() {
        let mut env = Environment::new(4);
        let handle = env.arena.allocate(Value::Int(1)).unwrap();
        env.pending = PendingExit::Throw {
            tag: Value::Nil,
            value: Value::Int(3),
        };
        let ptr = env.as_ptr();
        assert!(env.is(ptr));

        let drained = env.finalize();
        assert_eq!(drained.status(), FuncallExit::Throw);
        assert!(!env.pending().is_pending());
        assert!(!env.arena.contains(handle));
    }
}
