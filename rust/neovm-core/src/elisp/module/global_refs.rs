//! Refcounted global references handed out to native modules.

use std::collections::HashMap;

use super::abi::EmacsValue;
use super::arena::{Arena, HandleError, GLOBAL_ARENA_ID};
use crate::elisp::error::{signal, Flow};
use crate::elisp::intern::SymId;
use crate::elisp::value::{Value, MOST_POSITIVE_FIXNUM};
use crate::gc::{GcTrace, ObjId};

/// Object identity, the key global references are counted under.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum RefKey {
    Nil,
    True,
    Int(i64),
    Float(u64),
    Symbol(SymId),
    Subr(SymId),
    Object(ObjId),
}

impl RefKey {
    fn of(value: &Value) -> Self {
        match value {
            Value::Nil => RefKey::Nil,
            Value::True => RefKey::True,
            Value::Int(n) => RefKey::Int(*n),
            Value::Float(f) => RefKey::Float(f.to_bits()),
            Value::Symbol(id) => RefKey::Symbol(*id),
            Value::Subr(id) => RefKey::Subr(*id),
            Value::Str(id) | Value::Cons(id) | Value::ModuleFunction(id) | Value::UserPtr(id) => {
                RefKey::Object(*id)
            }
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct GlobalRef {
    value: Value,
    refcount: i64,
}

/// Process-wide table of global references plus the arena that backs
/// global handles.
pub struct GlobalRefTable {
    refs: HashMap<RefKey, GlobalRef>,
    arena: Arena,
    limit: i64,
}

impl GlobalRefTable {
    pub fn new() -> Self {
        Self::with_limit(MOST_POSITIVE_FIXNUM)
    }

    /// Table whose per-object refcount may not exceed `limit`.
    pub fn with_limit(limit: i64) -> Self {
        Self {
            refs: HashMap::new(),
            arena: Arena::new(GLOBAL_ARENA_ID),
            limit,
        }
    }

    /// Count one more reference to `value` and return a fresh global handle.
    ///
    /// Global arena slots are never reused, so every call grows the arena
    /// even when the reference is later freed.
    pub fn make(&mut self, value: Value) -> Result<EmacsValue, Flow> {
        let key = RefKey::of(&value);
        match self.refs.get(&key) {
            Some(entry) if entry.refcount >= self.limit => {
                return Err(signal("overflow-error", vec![]));
            }
            _ => {}
        }
        let handle = self.arena.allocate(value)?;
        self.refs
            .entry(key)
            .and_modify(|entry| entry.refcount += 1)
            .or_insert(GlobalRef { value, refcount: 1 });
        Ok(handle)
    }

    /// Drop one reference to `value`, which `handle` resolved to, and
    /// return the remaining count.  The entry is removed at zero.
    pub fn free(&mut self, handle: EmacsValue, value: Value) -> Result<i64, HandleError> {
        let key = RefKey::of(&value);
        let Some(entry) = self.refs.get_mut(&key) else {
            return Err(HandleError::NotGlobalRef(handle));
        };
        entry.refcount -= 1;
        let remaining = entry.refcount;
        if remaining == 0 {
            self.refs.remove(&key);
        }
        Ok(remaining)
    }

    /// Resolve a global handle.  Handles whose object no longer has a
    /// table entry are dangling.
    pub fn get(&self, handle: EmacsValue) -> Result<Value, HandleError> {
        let value = self.arena.get(handle)?;
        if self.refs.contains_key(&RefKey::of(&value)) {
            Ok(value)
        } else {
            Err(HandleError::Dangling(handle))
        }
    }

    /// The object a global handle was issued for, live or not.
    pub(crate) fn peek(&self, handle: EmacsValue) -> Result<Value, HandleError> {
        self.arena.get(handle)
    }

    /// Current refcount for `value`, zero when absent.
    pub fn refcount(&self, value: &Value) -> i64 {
        self.refs
            .get(&RefKey::of(value))
            .map_or(0, |entry| entry.refcount)
    }

    pub fn len(&self) -> usize {
        self.refs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }
}

impl Default for GlobalRefTable {
    fn default() -> Self {
        Self::new()
    }
}

impl GcTrace for GlobalRefTable {
    fn trace_roots(&self, roots: &mut Vec<Value>) {
        roots.extend(self.refs.values().map(|entry| entry.value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn make_and_free_balance() {
        let mut table = GlobalRefTable::new();
        let v = Value::Int(42);
        let h1 = table.make(v).unwrap();
        let h2 = table.make(v).unwrap();
        assert_ne!(h1, h2);
        assert_eq!(table.refcount(&v), 2);
        assert_eq!(table.get(h2).unwrap(), v);

        assert_eq!(table.free(h1, v), Ok(1));
        assert_eq!(table.free(h2, v), Ok(0));
        assert!(table.is_empty());
        assert_eq!(table.get(h1), Err(HandleError::Dangling(h1)));
    }

    #[test]
    fn free_of_absent_entry_reports_it() {
        let mut table = GlobalRefTable::new();
        let handle = EmacsValue::from_parts(GLOBAL_ARENA_ID, 9);
        assert_eq!(
            table.free(handle, Value::Int(1)),
            Err(HandleError::NotGlobalRef(handle))
        );
        assert!(table.is_empty());
    }

    #[test]
    fn floats_are_keyed_by_bits() {
        let mut table = GlobalRefTable::new();
        table.make(Value::Float(0.0)).unwrap();
        table.make(Value::Float(-0.0)).unwrap();
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn refcount_limit_signals_overflow() {
        let _eval = crate::elisp::eval::Evaluator::new();
        let mut table = GlobalRefTable::with_limit(2);
        let v = Value::Int(5);
        table.make(v).unwrap();
        table.make(v).unwrap();
        match table.make(v) {
            Err(Flow::Signal(sig)) => assert_eq!(sig.symbol_name(), "overflow-error"),
            other => panic!("expected overflow-error, got {other:?}"),
        }
        assert_eq!(table.refcount(&v), 2);
    }

    #[test]
    fn freed_global_slots_are_not_reused() {
        let mut table = GlobalRefTable::new();
        let v = Value::Int(3);
        for _ in 0..3 {
            let handle = table.make(v).unwrap();
            table.free(handle, v).unwrap();
        }
        assert!(table.is_empty());
        assert_eq!(table.arena.len(), 3);
    }
}
