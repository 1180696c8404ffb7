//! C ABI shared with native modules (`emacs-module.h` layout).
//!
//! Every table starts with a `size` field so a module built against an
//! older, shorter table keeps working when entries are appended.

use std::ffi::{c_char, c_int, c_void};

/// Name of the symbol a module exports to declare GPL compatibility.
pub const GPL_COMPATIBLE_SYMBOL: &str = "plugin_is_GPL_compatible";
/// Name of the module's init entry point.
pub const INIT_SYMBOL: &str = "emacs_module_init";

/// `max_arity` value that declares a variadic function.
pub const VARIADIC_FUNCTION: isize = -2;

const _: () = assert!(
    std::mem::size_of::<usize>() == 8,
    "module handles pack an arena id and a slot index into 64 bits"
);

/// Opaque handle passed to native code in place of a Lisp value.
///
/// The bits are `(arena_id << 32) | (slot + 1)`; the all-zero handle is the
/// error sentinel.  Handles never point into arena storage.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct EmacsValue(*mut c_void);

impl EmacsValue {
    pub const NULL: EmacsValue = EmacsValue(std::ptr::null_mut());

    pub(crate) fn from_parts(arena_id: u32, slot: u32) -> Self {
        let bits = (u64::from(arena_id) << 32) | (u64::from(slot) + 1);
        EmacsValue(bits as usize as *mut c_void)
    }

    pub fn is_null(self) -> bool {
        self.0.is_null()
    }

    fn bits(self) -> u64 {
        self.0 as usize as u64
    }

    /// Id of the arena that issued the handle.
    pub(crate) fn arena_id(self) -> u32 {
        (self.bits() >> 32) as u32
    }

    /// Slot index inside the issuing arena, `None` for the null handle.
    pub(crate) fn slot(self) -> Option<u32> {
        (self.bits() as u32).checked_sub(1)
    }
}

impl std::fmt::Debug for EmacsValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.slot() {
            None => f.write_str("EmacsValue(null)"),
            Some(slot) => write!(f, "EmacsValue({}:{})", self.arena_id(), slot),
        }
    }
}

/// Pending-exit state reported by `error_check` and friends.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FuncallExit {
    Return = 0,
    Signal = 1,
    Throw = 2,
}

pub type EmacsSubr = unsafe extern "C" fn(
    env: *mut EmacsEnv,
    nargs: isize,
    args: *mut EmacsValue,
    data: *mut c_void,
) -> EmacsValue;

pub type EmacsFinalizer = unsafe extern "C" fn(ptr: *mut c_void);

pub type InitFunction = unsafe extern "C" fn(runtime: *mut EmacsRuntime) -> c_int;

/// Handed to a module's init function; valid only during that call.
#[repr(C)]
pub struct EmacsRuntime {
    pub size: isize,
    pub private_members: *mut c_void,
    pub get_environment: unsafe extern "C" fn(runtime: *mut EmacsRuntime) -> *mut EmacsEnv,
}

/// Function table given to native code for one call frame.
#[repr(C)]
pub struct EmacsEnv {
    pub size: isize,
    pub module_id: i32,
    pub private_members: *mut c_void,

    pub make_global_ref: unsafe extern "C" fn(env: *mut EmacsEnv, value: EmacsValue) -> EmacsValue,
    pub free_global_ref: unsafe extern "C" fn(env: *mut EmacsEnv, value: EmacsValue),

    pub error_check: unsafe extern "C" fn(env: *mut EmacsEnv) -> FuncallExit,
    pub error_clear: unsafe extern "C" fn(env: *mut EmacsEnv),
    pub error_get: unsafe extern "C" fn(
        env: *mut EmacsEnv,
        symbol: *mut EmacsValue,
        data: *mut EmacsValue,
    ) -> FuncallExit,
    pub error_signal: unsafe extern "C" fn(env: *mut EmacsEnv, symbol: EmacsValue, data: EmacsValue),
    pub error_throw: unsafe extern "C" fn(env: *mut EmacsEnv, tag: EmacsValue, value: EmacsValue),

    pub make_function: unsafe extern "C" fn(
        env: *mut EmacsEnv,
        min_arity: isize,
        max_arity: isize,
        function: Option<EmacsSubr>,
        documentation: *const c_char,
        data: *mut c_void,
    ) -> EmacsValue,
    pub funcall: unsafe extern "C" fn(
        env: *mut EmacsEnv,
        function: EmacsValue,
        nargs: isize,
        args: *mut EmacsValue,
    ) -> EmacsValue,
    pub intern: unsafe extern "C" fn(env: *mut EmacsEnv, name: *const c_char) -> EmacsValue,

    pub type_of: unsafe extern "C" fn(env: *mut EmacsEnv, value: EmacsValue) -> EmacsValue,
    pub is_not_nil: unsafe extern "C" fn(env: *mut EmacsEnv, value: EmacsValue) -> bool,
    pub eq: unsafe extern "C" fn(env: *mut EmacsEnv, a: EmacsValue, b: EmacsValue) -> bool,

    pub fixnum_to_int: unsafe extern "C" fn(env: *mut EmacsEnv, value: EmacsValue) -> i64,
    pub make_fixnum: unsafe extern "C" fn(env: *mut EmacsEnv, value: i64) -> EmacsValue,
    pub float_to_c_double: unsafe extern "C" fn(env: *mut EmacsEnv, value: EmacsValue) -> f64,
    pub make_float: unsafe extern "C" fn(env: *mut EmacsEnv, value: f64) -> EmacsValue,

    pub copy_string_contents: unsafe extern "C" fn(
        env: *mut EmacsEnv,
        value: EmacsValue,
        buffer: *mut c_char,
        size: *mut isize,
    ) -> bool,
    pub make_string:
        unsafe extern "C" fn(env: *mut EmacsEnv, contents: *const c_char, length: isize) -> EmacsValue,

    pub make_user_ptr: unsafe extern "C" fn(
        env: *mut EmacsEnv,
        finalizer: Option<EmacsFinalizer>,
        ptr: *mut c_void,
    ) -> EmacsValue,
    pub get_user_ptr: unsafe extern "C" fn(env: *mut EmacsEnv, value: EmacsValue) -> *mut c_void,
    pub set_user_ptr: unsafe extern "C" fn(env: *mut EmacsEnv, value: EmacsValue, ptr: *mut c_void),
    pub get_user_finalizer:
        unsafe extern "C" fn(env: *mut EmacsEnv, value: EmacsValue) -> Option<EmacsFinalizer>,
    pub set_user_finalizer: unsafe extern "C" fn(
        env: *mut EmacsEnv,
        value: EmacsValue,
        finalizer: Option<EmacsFinalizer>,
    ),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_handle_has_no_slot() {
        assert!(EmacsValue::NULL.is_null());
        assert_eq!(EmacsValue::NULL.slot(), None);
    }

    #[test]
    fn handle_packs_arena_and_slot() {
        let handle = EmacsValue::from_parts(7, 0);
        assert!(!handle.is_null());
        assert_eq!(handle.arena_id(), 7);
        assert_eq!(handle.slot(), Some(0));

        let global = EmacsValue::from_parts(0, 513);
        assert!(!global.is_null());
        assert_eq!(global.arena_id(), 0);
        assert_eq!(global.slot(), Some(513));
        assert_eq!(format!("{global:?}"), "EmacsValue(0:513)");
    }

    #[test]
    fn tables_lead_with_size() {
        assert_eq!(std::mem::offset_of!(EmacsEnv, size), 0);
        assert_eq!(std::mem::offset_of!(EmacsRuntime, size), 0);
        assert_eq!(std::mem::size_of::<EmacsValue>(), std::mem::size_of::<*mut c_void>());
    }
}
