//! Frame-chained storage backing module value handles.
//!
//! An arena is an append-only list of fixed-size frames.  A handle names a
//! slot by index, and slots are never moved or reused until `finalize`, so
//! two equal handles always denote the same slot while the arena lives.

use super::abi::EmacsValue;
use crate::elisp::error::{error_message, Flow};
use crate::elisp::value::Value;
use crate::gc::GcTrace;

/// Handle slots per frame.
pub const FRAME_CAPACITY: usize = 512;

/// Arena id reserved for the process-wide global arena.
pub const GLOBAL_ARENA_ID: u32 = 0;

/// Largest slot count an arena can address (slot + 1 must fit 32 bits).
const MAX_SLOTS: usize = u32::MAX as usize - 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum HandleError {
    #[error("Memory exhausted")]
    OutOfMemory,
    #[error("module value handle {0:?} is not live")]
    Dangling(EmacsValue),
    #[error("null module value handle")]
    Null,
    #[error("no global reference for handle {0:?}")]
    NotGlobalRef(EmacsValue),
}

impl From<HandleError> for Flow {
    fn from(err: HandleError) -> Self {
        match err {
            HandleError::OutOfMemory => error_message("Memory exhausted"),
            HandleError::Dangling(_) | HandleError::Null | HandleError::NotGlobalRef(_) => {
                error_message("Invalid module value handle")
            }
        }
    }
}

pub struct Arena {
    id: u32,
    frames: Vec<Box<[Value]>>,
    len: usize,
}

impl Arena {
    /// An empty arena; its first frame is allocated on first use.
    pub fn new(id: u32) -> Self {
        Self {
            id,
            frames: Vec::new(),
            len: 0,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Store `value` in the next free slot and return its handle.
    pub fn allocate(&mut self, value: Value) -> Result<EmacsValue, HandleError> {
        if self.len >= MAX_SLOTS {
            return Err(HandleError::OutOfMemory);
        }
        let (frame, offset) = (self.len / FRAME_CAPACITY, self.len % FRAME_CAPACITY);
        if frame == self.frames.len() {
            self.frames.try_reserve(1).map_err(|_| HandleError::OutOfMemory)?;
            self.frames.push(new_frame()?);
        }
        self.frames[frame][offset] = value;
        let slot = self.len as u32;
        self.len += 1;
        Ok(EmacsValue::from_parts(self.id, slot))
    }

    /// Whether `handle` was issued by this arena and is still live.
    pub fn contains(&self, handle: EmacsValue) -> bool {
        handle.arena_id() == self.id
            && handle.slot().is_some_and(|slot| (slot as usize) < self.len)
    }

    pub fn get(&self, handle: EmacsValue) -> Result<Value, HandleError> {
        let slot = handle.slot().ok_or(HandleError::Null)? as usize;
        if handle.arena_id() != self.id || slot >= self.len {
            return Err(HandleError::Dangling(handle));
        }
        Ok(self.frames[slot / FRAME_CAPACITY][slot % FRAME_CAPACITY])
    }

    /// Drop every handle and release all frames but the first.
    pub fn finalize(&mut self) {
        self.frames.truncate(1);
        self.len = 0;
    }
}

fn new_frame() -> Result<Box<[Value]>, HandleError> {
    let mut slots = Vec::new();
    slots
        .try_reserve_exact(FRAME_CAPACITY)
        .map_err(|_| HandleError::OutOfMemory)?;
    slots.resize(FRAME_CAPACITY, Value::Nil);
    Ok(slots.into_boxed_slice())
}

impl GcTrace for Arena {
    fn trace_roots(&self, roots: &mut Vec<Value>) {
        for (index, frame) in self.frames.iter().enumerate() {
            let used = self.len.saturating_sub(index * FRAME_CAPACITY).min(FRAME_CAPACITY);
            roots.extend_from_slice(&frame[..used]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_and_read_back() {
        let mut arena = Arena::new(3);
        let a = arena.allocate(Value::Int(10)).unwrap();
        let b = arena.allocate(Value::Int(20)).unwrap();
        assert_ne!(a, b);
        assert_eq!(arena.get(a).unwrap(), Value::Int(10));
        assert_eq!(arena.get(b).unwrap(), Value::Int(20));
        assert_eq!(arena.len(), 2);
        assert_eq!(arena.frame_count(), 1);
    }

    #[test]
    fn spills_into_new_frame_and_keeps_old_handles() {
        let mut arena = Arena::new(1);
        let handles: Vec<_> = (0..(FRAME_CAPACITY as i64 * 2 + 1))
            .map(|n| arena.allocate(Value::Int(n)).unwrap())
            .collect();
        assert_eq!(arena.frame_count(), 3);
        for (n, handle) in handles.iter().enumerate() {
            assert_eq!(arena.get(*handle).unwrap(), Value::Int(n as i64));
        }
    }

    #[test]
    fn finalize_keeps_first_frame_and_invalidates_handles() {
        let mut arena = Arena::new(1);
        let handles: Vec<_> = (0..600)
            .map(|n| arena.allocate(Value::Int(n)).unwrap())
            .collect();
        assert_eq!(arena.frame_count(), 2);
        arena.finalize();
        assert_eq!(arena.frame_count(), 1);
        assert!(arena.is_empty());
        assert!(!arena.contains(handles[0]));
        assert_eq!(arena.get(handles[0]), Err(HandleError::Dangling(handles[0])));
    }

    #[test]
    fn foreign_and_null_handles_are_rejected() {
        let mut arena = Arena::new(1);
        let mut other = Arena::new(2);
        let _ = arena.allocate(Value::Nil).unwrap();
        let foreign = other.allocate(Value::Int(1)).unwrap();
        assert_eq!(arena.get(foreign), Err(HandleError::Dangling(foreign)));
        assert_eq!(arena.get(EmacsValue::NULL), Err(HandleError::Null));
    }

    #[test]
    fn trace_roots_covers_only_used_slots() {
        let mut arena = Arena::new(GLOBAL_ARENA_ID);
        for n in 0..(FRAME_CAPACITY as i64 + 3) {
            arena.allocate(Value::Int(n)).unwrap();
        }
        let mut roots = Vec::new();
        arena.trace_roots(&mut roots);
        assert_eq!(roots.len(), FRAME_CAPACITY + 3);
        assert_eq!(roots[FRAME_CAPACITY + 2], Value::Int(FRAME_CAPACITY as i64 + 2));
    }
}
