//! Native pointers boxed as Lisp objects.

use std::ffi::c_void;

use super::abi::EmacsFinalizer;

/// Heap payload of a `user-ptr` object.
///
/// The finalizer runs once, when the object is swept or the heap is dropped.
pub struct UserPtr {
    pub ptr: *mut c_void,
    pub finalizer: Option<EmacsFinalizer>,
}

impl UserPtr {
    pub fn new(ptr: *mut c_void, finalizer: Option<EmacsFinalizer>) -> Self {
        Self { ptr, finalizer }
    }

    pub(crate) fn finalizer_address(&self) -> usize {
        self.finalizer.map_or(0, |f| f as usize)
    }
}

impl Drop for UserPtr {
    fn drop(&mut self) {
        if let Some(finalizer) = self.finalizer.take() {
            tracing::debug!(ptr = ?self.ptr, "running user-ptr finalizer");
            unsafe { finalizer(self.ptr) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gc::LispHeap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static FINALIZED: AtomicUsize = AtomicUsize::new(0);

    unsafe extern "C" fn count_finalize(ptr: *mut c_void) {
        FINALIZED.fetch_add(ptr as usize, Ordering::SeqCst);
    }

    #[test]
    fn finalizer_runs_once_when_swept() {
        let mut heap = LispHeap::new();
        let id = heap.alloc_user_ptr(UserPtr::new(1000 as *mut c_void, Some(count_finalize)));
        let kept = heap.alloc_user_ptr(UserPtr::new(std::ptr::null_mut(), None));

        heap.collect([crate::elisp::value::Value::UserPtr(id)].into_iter());
        assert_eq!(FINALIZED.load(Ordering::SeqCst), 0);
        assert!(!heap.is_live(kept));

        heap.collect(std::iter::empty());
        assert_eq!(FINALIZED.load(Ordering::SeqCst), 1000);
        heap.collect(std::iter::empty());
        assert_eq!(FINALIZED.load(Ordering::SeqCst), 1000);
    }

    #[test]
    fn finalizer_address_is_zero_without_finalizer() {
        let p = UserPtr::new(std::ptr::null_mut(), None);
        assert_eq!(p.finalizer_address(), 0);
    }
}
