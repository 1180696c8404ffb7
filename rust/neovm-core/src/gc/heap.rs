//! Slot heap with mark-and-sweep collection.

use super::types::{HeapObject, ObjId};
use crate::elisp::module::funcall::ModuleFunction;
use crate::elisp::module::user_ptr::UserPtr;
use crate::elisp::value::Value;

/// Outcome of one collection cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CollectStats {
    pub live: usize,
    pub freed: usize,
}

struct Slot {
    object: HeapObject,
    generation: u32,
    marked: bool,
}

/// The managed heap for boxed Lisp objects.
///
/// Module function closures and user pointers live here alongside conses
/// and strings, so they are reclaimed with their last reference.
pub struct LispHeap {
    slots: Vec<Slot>,
    free_list: Vec<u32>,
    live: usize,
}

impl LispHeap {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_list: Vec::new(),
            live: 0,
        }
    }

    fn alloc(&mut self, object: HeapObject) -> ObjId {
        self.live += 1;
        if let Some(index) = self.free_list.pop() {
            let slot = &mut self.slots[index as usize];
            slot.object = object;
            slot.marked = false;
            return ObjId {
                index,
                generation: slot.generation,
            };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            object,
            generation: 0,
            marked: false,
        });
        ObjId {
            index,
            generation: 0,
        }
    }

    pub fn alloc_cons(&mut self, car: Value, cdr: Value) -> ObjId {
        self.alloc(HeapObject::Cons { car, cdr })
    }

    pub fn alloc_string(&mut self, s: String) -> ObjId {
        self.alloc(HeapObject::Str(s))
    }

    pub fn alloc_module_function(&mut self, function: ModuleFunction) -> ObjId {
        self.alloc(HeapObject::ModuleFunction(function))
    }

    pub fn alloc_user_ptr(&mut self, user_ptr: UserPtr) -> ObjId {
        self.alloc(HeapObject::UserPtr(user_ptr))
    }

    // -----------------------------------------------------------------------
    // Checked access
    // -----------------------------------------------------------------------

    /// True when `id` still names a live object.
    pub fn is_live(&self, id: ObjId) -> bool {
        self.slots.get(id.index as usize).is_some_and(|slot| {
            slot.generation == id.generation && !matches!(slot.object, HeapObject::Free)
        })
    }

    fn slot(&self, id: ObjId) -> &Slot {
        match self.slots.get(id.index as usize) {
            Some(slot) if slot.generation == id.generation => slot,
            Some(slot) => panic!("stale ObjId: {id:?} (current gen={})", slot.generation),
            None => panic!("stale ObjId: {id:?} (no such slot)"),
        }
    }

    pub fn get(&self, id: ObjId) -> &HeapObject {
        &self.slot(id).object
    }

    fn get_mut(&mut self, id: ObjId) -> &mut HeapObject {
        self.slot(id);
        &mut self.slots[id.index as usize].object
    }

    pub fn cons_car(&self, id: ObjId) -> Value {
        match self.get(id) {
            HeapObject::Cons { car, .. } => *car,
            other => panic!("cons_car on {}", other.kind_name()),
        }
    }

    pub fn cons_cdr(&self, id: ObjId) -> Value {
        match self.get(id) {
            HeapObject::Cons { cdr, .. } => *cdr,
            other => panic!("cons_cdr on {}", other.kind_name()),
        }
    }

    pub fn get_string(&self, id: ObjId) -> &str {
        match self.get(id) {
            HeapObject::Str(s) => s,
            other => panic!("get_string on {}", other.kind_name()),
        }
    }

    pub fn get_module_function(&self, id: ObjId) -> &ModuleFunction {
        match self.get(id) {
            HeapObject::ModuleFunction(f) => f,
            other => panic!("get_module_function on {}", other.kind_name()),
        }
    }

    pub fn get_user_ptr(&self, id: ObjId) -> &UserPtr {
        match self.get(id) {
            HeapObject::UserPtr(p) => p,
            other => panic!("get_user_ptr on {}", other.kind_name()),
        }
    }

    pub fn get_user_ptr_mut(&mut self, id: ObjId) -> &mut UserPtr {
        match self.get_mut(id) {
            HeapObject::UserPtr(p) => p,
            other => panic!("get_user_ptr_mut on {}", other.kind_name()),
        }
    }

    /// Elements of a proper list, `None` for anything else.
    pub fn list_to_vec(&self, value: &Value) -> Option<Vec<Value>> {
        let mut items = Vec::new();
        let mut cursor = *value;
        loop {
            match cursor {
                Value::Nil => return Some(items),
                Value::Cons(id) => {
                    items.push(self.cons_car(id));
                    cursor = self.cons_cdr(id);
                }
                _ => return None,
            }
        }
    }

    // -----------------------------------------------------------------------
    // Mark-and-sweep collection
    // -----------------------------------------------------------------------

    /// Collect garbage. `roots` must yield every Value that is reachable.
    ///
    /// Sweeping a user pointer drops it, which runs its finalizer.
    pub fn collect(&mut self, roots: impl Iterator<Item = Value>) -> CollectStats {
        for slot in &mut self.slots {
            slot.marked = false;
        }
        let worklist = roots.filter_map(|root| root.obj_id()).collect();
        self.mark(worklist);
        let freed = self.sweep();
        CollectStats {
            live: self.live,
            freed,
        }
    }

    fn mark(&mut self, mut worklist: Vec<ObjId>) {
        while let Some(id) = worklist.pop() {
            let Some(slot) = self.slots.get_mut(id.index as usize) else {
                continue;
            };
            if slot.marked || slot.generation != id.generation {
                continue;
            }
            slot.marked = true;
            worklist.extend(
                slot.object
                    .trace_values()
                    .into_iter()
                    .filter_map(|child| child.obj_id()),
            );
        }
    }

    fn sweep(&mut self) -> usize {
        let mut freed = 0;
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.marked || matches!(slot.object, HeapObject::Free) {
                continue;
            }
            // Dropping the old object runs a user-ptr finalizer.
            slot.object = HeapObject::Free;
            slot.generation = slot.generation.wrapping_add(1);
            self.free_list.push(index as u32);
            freed += 1;
        }
        self.live -= freed;
        freed
    }

    pub fn allocated_count(&self) -> usize {
        self.live
    }
}

impl Default for LispHeap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elisp::module::abi::{EmacsEnv, EmacsValue};
    use std::ffi::c_void;

    unsafe extern "C" fn unused_subr(
        _env: *mut EmacsEnv,
        _nargs: isize,
        _args: *mut EmacsValue,
        _data: *mut c_void,
    ) -> EmacsValue {
        EmacsValue::NULL
    }

    fn closure() -> ModuleFunction {
        ModuleFunction {
            min_arity: 0,
            max_arity: 0,
            subr: unused_subr,
            documentation: None,
            data: std::ptr::null_mut(),
        }
    }

    #[test]
    fn freed_slot_is_reused_with_new_generation() {
        let mut heap = LispHeap::new();
        let first = heap.alloc_string("garbage".into());
        heap.collect(std::iter::empty());
        assert!(!heap.is_live(first));
        let second = heap.alloc_module_function(closure());
        assert_eq!(second.index, first.index);
        assert_ne!(second.generation, first.generation);
        assert!(heap.is_live(second));
    }

    #[test]
    #[should_panic(expected = "stale ObjId")]
    fn stale_module_function_id_panics() {
        let mut heap = LispHeap::new();
        let id = heap.alloc_module_function(closure());
        heap.collect(std::iter::empty());
        let _ = heap.get_module_function(id);
    }

    #[test]
    fn closures_reachable_through_lists_survive() {
        let mut heap = LispHeap::new();
        let _unreferenced = heap.alloc_module_function(closure());
        let f = heap.alloc_module_function(closure());
        let list = heap.alloc_cons(Value::ModuleFunction(f), Value::Nil);
        let stats = heap.collect([Value::Cons(list)].into_iter());
        assert_eq!(stats, CollectStats { live: 2, freed: 1 });
        assert_eq!(heap.get_module_function(f).max_arity, 0);
        assert_eq!(
            heap.list_to_vec(&Value::Cons(list)),
            Some(vec![Value::ModuleFunction(f)])
        );
    }

    #[test]
    fn improper_list_is_not_a_list() {
        let mut heap = LispHeap::new();
        let pair = heap.alloc_cons(Value::Int(1), Value::Int(2));
        assert_eq!(heap.list_to_vec(&Value::Cons(pair)), None);
        assert_eq!(heap.list_to_vec(&Value::Nil), Some(vec![]));
    }
}
