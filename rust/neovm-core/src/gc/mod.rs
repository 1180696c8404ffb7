//! Garbage collector for the NeoVM Elisp runtime.
//!
//! - **LispHeap**: arena that owns every boxed object (cons, string, module
//!   function closure, user pointer).
//! - **ObjId**: 8-byte handle (index + generation).
//! - **Mark-and-sweep**: worklist marking from the root set; sweep frees
//!   unmarked objects and runs user-pointer finalizers.
//! - **Generation counters**: stale `ObjId`s panic on access instead of
//!   reading a reused slot.

pub mod heap;
pub mod types;

pub use heap::{CollectStats, LispHeap};
pub use types::{HeapObject, ObjId};

use crate::elisp::value::Value;

/// Trait for types that hold GC-managed `Value` references.
///
/// Each owner of values outside the heap (obarray, module environments,
/// the global reference table) enumerates them here so the collector can
/// discover every live object.
pub trait GcTrace {
    /// Push all `Value` references held by `self` into `roots`.
    fn trace_roots(&self, roots: &mut Vec<Value>);
}
