//! Symbol name interner.
//!
//! `SymId(u32)` is a compact, `Copy` handle into an append-only
//! `StringInterner`, which keeps `Value::Symbol` and `Value::Subr` at
//! 16 bytes.  The interner in use is reached through a thread-local pointer,
//! installed by `Evaluator::setup_thread_locals`, the same way the heap is.

use std::cell::Cell;
use std::collections::HashMap;

/// A compact handle to an interned name.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct SymId(pub(crate) u32);

/// Append-only name table.  Interning the same name twice yields the same id.
#[derive(Default)]
pub struct StringInterner {
    names: Vec<Box<str>>,
    ids: HashMap<Box<str>, SymId>,
}

impl StringInterner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, name: &str) -> SymId {
        if let Some(&id) = self.ids.get(name) {
            return id;
        }
        let id = SymId(self.names.len() as u32);
        self.names.push(name.into());
        self.ids.insert(name.into(), id);
        id
    }

    /// Look up a name without interning it.
    pub fn lookup(&self, name: &str) -> Option<SymId> {
        self.ids.get(name).copied()
    }

    /// Panics on an id that did not come from this interner.
    #[inline]
    pub fn resolve(&self, id: SymId) -> &str {
        &self.names[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Thread-local interner access
// ---------------------------------------------------------------------------

thread_local! {
    static CURRENT_INTERNER: Cell<*mut StringInterner> = const { Cell::new(std::ptr::null_mut()) };
}

/// Install `interner` as the interner for this thread.
pub fn set_current_interner(interner: &mut StringInterner) {
    CURRENT_INTERNER.with(|slot| slot.set(interner as *mut StringInterner));
}

/// Uninstall the thread's interner if it is `interner`.
pub(crate) fn clear_current_interner_if(interner: *const StringInterner) {
    CURRENT_INTERNER.with(|slot| {
        if slot.get() as *const StringInterner == interner {
            slot.set(std::ptr::null_mut());
        }
    });
}

#[inline]
fn current_interner_ptr() -> *mut StringInterner {
    let ptr = CURRENT_INTERNER.with(Cell::get);
    if ptr.is_null() {
        panic!("no interner installed on this thread; create an Evaluator first");
    }
    ptr
}

/// Intern `name` in the thread's interner.
#[inline]
pub fn intern(name: &str) -> SymId {
    let ptr = current_interner_ptr();
    unsafe { &mut *ptr }.intern(name)
}

/// Resolve `id` in the thread's interner.
///
/// # Safety
/// The interner is append-only and each name is a separate heap allocation,
/// so the returned `&str` stays valid while the owning `Evaluator` lives.
#[inline]
pub fn resolve_sym(id: SymId) -> &'static str {
    let ptr = current_interner_ptr();
    let name = unsafe { &*ptr }.resolve(id);
    unsafe { &*(name as *const str) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_idempotent() {
        let mut interner = StringInterner::new();
        let a = interner.intern("module-load");
        let b = interner.intern("module-load");
        let c = interner.intern("module-call");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(interner.resolve(c), "module-call");
        assert_eq!(interner.len(), 2);
    }

    #[test]
    fn lookup_does_not_intern() {
        let mut interner = StringInterner::new();
        assert_eq!(interner.lookup("fset"), None);
        let id = interner.intern("fset");
        assert_eq!(interner.lookup("fset"), Some(id));
        assert_eq!(interner.len(), 1);
    }

    #[test]
    fn thread_local_round_trip() {
        let mut interner = Box::new(StringInterner::new());
        set_current_interner(&mut interner);
        let id = intern("provide");
        assert_eq!(resolve_sym(id), "provide");
        clear_current_interner_if(&*interner);
    }
}
