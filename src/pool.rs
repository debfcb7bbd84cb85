use std::sync::{Arc, Mutex};

use crate::handle::{Handle, HandleKind};
use crate::{Error, Result};

/// A fixed-capacity, generation-checked arena of runtime objects.
///
/// Each interface owns one pool per object kind, sized by the interface
/// limits. Allocation hands out `(Handle, Arc<T>)`; the handle is a weak
/// reference that [`get`] re-validates (kind, interface, generation)
/// before upgrading. Freeing a slot bumps its generation so stale
/// handles stop resolving.
///
/// [`get`]: Pool::get
pub(crate) struct Pool<T> {
    kind: HandleKind,
    ni_index: u8,
    slots: Mutex<Slots<T>>,
}

struct Slots<T> {
    entries: Vec<Slot<T>>,
    // Free slot indices, reused LIFO.
    free: Vec<u32>,
    live: usize,
}

struct Slot<T> {
    generation: u16,
    value: Option<Arc<T>>,
}

impl<T> Pool<T> {
    pub(crate) fn with_capacity(kind: HandleKind, ni_index: u8, capacity: usize) -> Pool<T> {
        let mut entries = Vec::with_capacity(capacity);
        let mut free = Vec::with_capacity(capacity);
        for i in 0..capacity {
            entries.push(Slot {
                generation: 0,
                value: None,
            });
            free.push((capacity - 1 - i) as u32);
        }
        Pool {
            kind,
            ni_index,
            slots: Mutex::new(Slots {
                entries,
                free,
                live: 0,
            }),
        }
    }

    /// Allocates a slot for `value`. Fails with [`Error::NoSpace`] when
    /// the pool is at capacity.
    pub(crate) fn insert(&self, value: T) -> Result<(Handle, Arc<T>)> {
        let mut slots = self.slots.lock().unwrap();
        let index = slots.free.pop().ok_or(Error::NoSpace)?;
        let arc = Arc::new(value);
        let slot = &mut slots.entries[index as usize];
        debug_assert!(slot.value.is_none());
        slot.value = Some(Arc::clone(&arc));
        let handle = Handle::new(self.kind, self.ni_index, slot.generation, index);
        slots.live += 1;
        Ok((handle, arc))
    }

    /// Upgrades a handle to a strong reference, validating kind,
    /// interface index, and generation.
    pub(crate) fn get(&self, handle: Handle) -> Result<Arc<T>> {
        let slots = self.slots.lock().unwrap();
        let slot = self.validate(&slots, handle)?;
        Ok(Arc::clone(slot.value.as_ref().unwrap()))
    }

    /// Removes the object behind `handle` and bumps the slot generation.
    /// Returns the (possibly last) strong reference so the caller can
    /// finish teardown outside the pool lock.
    pub(crate) fn remove(&self, handle: Handle) -> Result<Arc<T>> {
        let mut slots = self.slots.lock().unwrap();
        self.validate(&slots, handle)?;
        let index = handle.slot() as usize;
        let slot = &mut slots.entries[index];
        let value = slot.value.take().unwrap();
        slot.generation = slot.generation.wrapping_add(1);
        slots.free.push(handle.slot());
        slots.live -= 1;
        Ok(value)
    }

    /// Snapshot of every live object, used by teardown to interrupt
    /// waiters without knowing their handles.
    pub(crate) fn iter_live(&self) -> Vec<Arc<T>> {
        let slots = self.slots.lock().unwrap();
        slots
            .entries
            .iter()
            .filter_map(|slot| slot.value.as_ref().map(Arc::clone))
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.lock().unwrap().live
    }

    fn validate<'a>(&self, slots: &'a Slots<T>, handle: Handle) -> Result<&'a Slot<T>> {
        if handle.kind() != Some(self.kind) || handle.ni_index() != self.ni_index {
            return Err(Error::ArgInvalid);
        }
        let slot = slots
            .entries
            .get(handle.slot() as usize)
            .ok_or(Error::ArgInvalid)?;
        if slot.value.is_none() || slot.generation != handle.generation() {
            return Err(Error::ArgInvalid);
        }
        Ok(slot)
    }
}
