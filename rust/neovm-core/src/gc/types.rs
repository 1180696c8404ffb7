//! GC heap object types and handles.

use crate::elisp::module::funcall::ModuleFunction;
use crate::elisp::module::user_ptr::UserPtr;
use crate::elisp::value::Value;

/// Handle to a heap-allocated object.  Copy-able, 8 bytes.
///
/// `index` selects the slot in `LispHeap::objects`.
/// `generation` detects use-after-free (stale handles panic on access).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl std::fmt::Debug for ObjId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ObjId({}/{})", self.index, self.generation)
    }
}

/// The concrete object stored on the managed heap.
pub enum HeapObject {
    Cons { car: Value, cdr: Value },
    Str(String),
    /// Closure record of a function defined by a native module.  Owned by
    /// the heap, so it is reclaimed together with the last reference to it.
    ModuleFunction(ModuleFunction),
    /// Opaque native pointer; its finalizer runs when the slot is swept.
    UserPtr(UserPtr),
    /// Freed slot, available for reuse.
    Free,
}

impl HeapObject {
    /// Collect all `Value` references contained in this object.
    pub fn trace_values(&self) -> Vec<Value> {
        match self {
            HeapObject::Cons { car, cdr } => vec![*car, *cdr],
            HeapObject::Str(_)
            | HeapObject::ModuleFunction(_)
            | HeapObject::UserPtr(_)
            | HeapObject::Free => Vec::new(),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            HeapObject::Cons { .. } => "cons",
            HeapObject::Str(_) => "string",
            HeapObject::ModuleFunction(_) => "module-function",
            HeapObject::UserPtr(_) => "user-ptr",
            HeapObject::Free => "free",
        }
    }
}
