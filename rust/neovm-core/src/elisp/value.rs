//! Lisp value representation and fundamental operations.

use std::cell::Cell;
use std::fmt;

use super::intern::{intern, resolve_sym, SymId};
use crate::gc::heap::LispHeap;
use crate::gc::types::ObjId;

/// Largest integer representable as a fixnum (62-bit fixnums).
pub const MOST_POSITIVE_FIXNUM: i64 = (1 << 61) - 1;
/// Smallest integer representable as a fixnum.
pub const MOST_NEGATIVE_FIXNUM: i64 = -(1 << 61);

// ---------------------------------------------------------------------------
// Thread-local heap access
// ---------------------------------------------------------------------------

thread_local! {
    static CURRENT_HEAP: Cell<*mut LispHeap> = const { Cell::new(std::ptr::null_mut()) };
}

/// Set the current thread-local heap pointer.
/// Must be called before any Value constructors that allocate on the heap.
pub fn set_current_heap(heap: &mut LispHeap) {
    CURRENT_HEAP.with(|h| h.set(heap as *mut LispHeap));
}

/// Clear the thread-local heap pointer if it still points at `heap`.
pub(crate) fn clear_current_heap_if(heap: *const LispHeap) {
    CURRENT_HEAP.with(|h| {
        if h.get() as *const LispHeap == heap {
            h.set(std::ptr::null_mut());
        }
    });
}

#[inline]
pub(crate) fn current_heap_ptr() -> *mut LispHeap {
    let ptr = CURRENT_HEAP.with(Cell::get);
    if ptr.is_null() {
        panic!("current heap not set; call Evaluator::setup_thread_locals() first");
    }
    ptr
}

/// Immutable access to the current thread-local heap.
///
/// Do NOT call `with_heap` or `with_heap_mut` from within `f`.
#[inline]
pub(crate) fn with_heap<R>(f: impl FnOnce(&LispHeap) -> R) -> R {
    let ptr = current_heap_ptr();
    f(unsafe { &*ptr })
}

/// Mutable access to the current thread-local heap.
///
/// Do NOT call `with_heap` or `with_heap_mut` from within `f`.
#[inline]
pub(crate) fn with_heap_mut<R>(f: impl FnOnce(&mut LispHeap) -> R) -> R {
    let ptr = current_heap_ptr();
    f(unsafe { &mut *ptr })
}

// ---------------------------------------------------------------------------
// Core value type
// ---------------------------------------------------------------------------

/// Runtime Lisp value.
///
/// Boxed objects are `ObjId` handles into the thread-local `LispHeap`;
/// symbol and subr names are `SymId` handles into the thread-local
/// interner, so `Value` is `Copy` and 16 bytes.
#[derive(Clone, Copy, Debug)]
pub enum Value {
    Nil,
    /// `t`, the canonical true value.
    True,
    Int(i64),
    Float(f64),
    Symbol(SymId),
    Str(ObjId),
    Cons(ObjId),
    /// Built-in function reference (name).  Dispatched by the evaluator.
    Subr(SymId),
    /// Function defined by a native module through `make_function`.
    ModuleFunction(ObjId),
    /// Opaque pointer owned by a native module.
    UserPtr(ObjId),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        equal_value(self, other, 0)
    }
}

impl Value {
    pub fn bool(b: bool) -> Self {
        if b {
            Value::True
        } else {
            Value::Nil
        }
    }

    pub fn symbol(s: impl AsRef<str>) -> Self {
        match s.as_ref() {
            "nil" => Value::Nil,
            "t" => Value::True,
            name => Value::Symbol(intern(name)),
        }
    }

    pub fn subr(name: &str) -> Self {
        Value::Subr(intern(name))
    }

    pub fn string(s: impl Into<String>) -> Self {
        let id = with_heap_mut(|heap| heap.alloc_string(s.into()));
        Value::Str(id)
    }

    pub fn cons(car: Value, cdr: Value) -> Self {
        let id = with_heap_mut(|heap| heap.alloc_cons(car, cdr));
        Value::Cons(id)
    }

    pub fn list(values: Vec<Value>) -> Self {
        values
            .into_iter()
            .rev()
            .fold(Value::Nil, |acc, item| Value::cons(item, acc))
    }

    /// Fixnum constructor that refuses out-of-range integers.
    pub fn fixnum(n: i64) -> Option<Self> {
        (MOST_NEGATIVE_FIXNUM..=MOST_POSITIVE_FIXNUM)
            .contains(&n)
            .then_some(Value::Int(n))
    }

    // -----------------------------------------------------------------------
    // Heap accessor methods (via thread-local)
    // -----------------------------------------------------------------------

    pub fn cons_car(&self) -> Value {
        match self {
            Value::Cons(id) => with_heap(|h| h.cons_car(*id)),
            _ => panic!("cons_car on non-cons: {}", self.type_name()),
        }
    }

    pub fn cons_cdr(&self) -> Value {
        match self {
            Value::Cons(id) => with_heap(|h| h.cons_cdr(*id)),
            _ => panic!("cons_cdr on non-cons: {}", self.type_name()),
        }
    }

    // -----------------------------------------------------------------------
    // Type predicates
    // -----------------------------------------------------------------------

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn is_truthy(&self) -> bool {
        !self.is_nil()
    }

    pub fn is_string(&self) -> bool {
        matches!(self, Value::Str(_))
    }

    pub fn is_symbol(&self) -> bool {
        matches!(self, Value::Nil | Value::True | Value::Symbol(_))
    }

    pub fn is_function(&self) -> bool {
        matches!(self, Value::Subr(_) | Value::ModuleFunction(_))
    }

    /// Name returned by `type-of`.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil | Value::True | Value::Symbol(_) => "symbol",
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Cons(_) => "cons",
            Value::Subr(_) => "subr",
            Value::ModuleFunction(_) => "module-function",
            Value::UserPtr(_) => "user-ptr",
        }
    }

    /// Borrow the string contents from the heap.
    ///
    /// The reference is valid until the next collection; collections only
    /// run at explicit `garbage_collect` calls, never during a borrow.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(id) => {
                let ptr = current_heap_ptr();
                let heap = unsafe { &*ptr };
                Some(heap.get_string(*id))
            }
            _ => None,
        }
    }

    pub fn as_str_owned(&self) -> Option<String> {
        self.as_str().map(str::to_owned)
    }

    pub fn as_symbol_name(&self) -> Option<&'static str> {
        match self {
            Value::Nil => Some("nil"),
            Value::True => Some("t"),
            Value::Symbol(id) => Some(resolve_sym(*id)),
            _ => None,
        }
    }

    /// Heap handle of a boxed value, if any.
    pub fn obj_id(&self) -> Option<ObjId> {
        match self {
            Value::Str(id) | Value::Cons(id) | Value::ModuleFunction(id) | Value::UserPtr(id) => {
                Some(*id)
            }
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Equality
// ---------------------------------------------------------------------------

/// `eq`: identity comparison.
pub fn eq_value(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Nil, Value::Nil) => true,
        (Value::True, Value::True) => true,
        (Value::Int(a), Value::Int(b)) => a == b,
        (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
        (Value::Symbol(a), Value::Symbol(b)) => a == b,
        (Value::Subr(a), Value::Subr(b)) => a == b,
        (Value::Str(a), Value::Str(b))
        | (Value::Cons(a), Value::Cons(b))
        | (Value::ModuleFunction(a), Value::ModuleFunction(b))
        | (Value::UserPtr(a), Value::UserPtr(b)) => a == b,
        _ => false,
    }
}

/// `equal`: structural comparison.
pub fn equal_value(left: &Value, right: &Value, depth: usize) -> bool {
    if depth > 4096 {
        return false;
    }
    match (left, right) {
        (Value::Str(a), Value::Str(b)) => {
            a == b || with_heap(|h| h.get_string(*a) == h.get_string(*b))
        }
        (Value::Cons(a), Value::Cons(b)) => {
            if a == b {
                return true;
            }
            let (a_car, a_cdr) = with_heap(|h| (h.cons_car(*a), h.cons_cdr(*a)));
            let (b_car, b_cdr) = with_heap(|h| (h.cons_car(*b), h.cons_cdr(*b)));
            equal_value(&a_car, &b_car, depth + 1) && equal_value(&a_cdr, &b_cdr, depth + 1)
        }
        _ => eq_value(left, right),
    }
}

// ---------------------------------------------------------------------------
// List helpers
// ---------------------------------------------------------------------------

/// Collect a proper list into a Vec.  Returns None if not a proper list.
pub fn list_to_vec(value: &Value) -> Option<Vec<Value>> {
    with_heap(|h| h.list_to_vec(value))
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&super::print::print_value(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elisp::eval::Evaluator;

    #[test]
    fn constructors_and_predicates() {
        let _eval = Evaluator::new();
        assert!(Value::Nil.is_nil());
        assert!(Value::True.is_truthy());
        assert!(Value::string("hello").is_string());
        assert!(Value::symbol("foo").is_symbol());
        assert!(Value::symbol("nil").is_nil());
        assert!(matches!(Value::symbol("t"), Value::True));
        assert!(Value::subr("fset").is_function());
    }

    #[test]
    fn fixnum_range_is_62_bits() {
        assert!(Value::fixnum(MOST_POSITIVE_FIXNUM).is_some());
        assert!(Value::fixnum(MOST_NEGATIVE_FIXNUM).is_some());
        assert!(Value::fixnum(MOST_POSITIVE_FIXNUM + 1).is_none());
        assert!(Value::fixnum(MOST_NEGATIVE_FIXNUM - 1).is_none());
    }

    #[test]
    fn eq_is_identity_equal_is_structural() {
        let _eval = Evaluator::new();
        let a = Value::list(vec![Value::Int(1), Value::string("x")]);
        let b = Value::list(vec![Value::Int(1), Value::string("x")]);
        assert!(equal_value(&a, &b, 0));
        assert!(!eq_value(&a, &b));
        assert!(eq_value(&a, &a));
        assert!(eq_value(&Value::symbol("foo"), &Value::symbol("foo")));
        assert!(eq_value(&Value::Float(1.5), &Value::Float(1.5)));
    }

    #[test]
    fn list_helpers() {
        let _eval = Evaluator::new();
        let lst = Value::list(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        assert_eq!(list_to_vec(&lst).unwrap()[2], Value::Int(3));
        assert_eq!(list_to_vec(&Value::Int(3)), None);
        assert_eq!(lst.cons_car(), Value::Int(1));
    }

    #[test]
    fn type_names() {
        let _eval = Evaluator::new();
        assert_eq!(Value::Int(1).type_name(), "integer");
        assert_eq!(Value::Float(1.0).type_name(), "float");
        assert_eq!(Value::string("s").type_name(), "string");
        assert_eq!(Value::Nil.type_name(), "symbol");
    }

    #[test]
    fn value_is_copy_and_16_bytes() {
        assert_eq!(std::mem::size_of::<Value>(), 16);
    }
}
