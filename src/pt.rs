use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use crate::handle::Handle;
use crate::options::{ListKind, PtOptions};
use crate::proto::Header;
use crate::{Error, Result};

/// Lifecycle of one portal-table slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PtStatus {
    Unallocated,
    Enabled,
    Disabled,
}

/// Externally visible condition of a portal-table slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PtValidation {
    Unallocated,
    Disabled,
    /// Allocated and enabled, but with no bound event queue.
    EnabledNoEq,
    Enabled,
}

/// A header captured before any priority entry could consume it.
///
/// `data` is the payload copy; `start` is the address the bytes landed
/// at when an overflow-list entry absorbed the message (zero when the
/// message matched nothing and was merely buffered). Reported as the
/// event `start` when a later priority append drains the record.
#[derive(Debug)]
pub(crate) struct BufferedHdr {
    pub hdr: Header,
    pub data: Vec<u8>,
    pub start: usize,
}

pub(crate) struct PtState {
    pub status: PtStatus,
    pub options: PtOptions,
    pub eq: Option<Handle>,
    pub priority: VecDeque<Handle>,
    pub overflow: VecDeque<Handle>,
    pub buffered: VecDeque<BufferedHdr>,
    /// In-flight operations referencing the slot; free is refused
    /// while non-zero.
    pub refs: usize,
}

impl PtState {
    fn clear(&mut self) {
        self.status = PtStatus::Unallocated;
        self.options = PtOptions::empty();
        self.eq = None;
        self.priority.clear();
        self.overflow.clear();
        self.buffered.clear();
    }

    /// Removes `handle` from the given list; reports whether it was
    /// present.
    pub(crate) fn unlink(&mut self, list: ListKind, handle: Handle) -> bool {
        let list = match list {
            ListKind::Priority => &mut self.priority,
            ListKind::Overflow => &mut self.overflow,
            ListKind::ProbeOnly => return false,
        };
        if let Some(at) = list.iter().position(|h| *h == handle) {
            list.remove(at);
            true
        } else {
            false
        }
    }
}

/// The per-interface portal table. Each slot carries its own mutex,
/// serializing the matching walk against list mutation.
pub(crate) struct PtTable {
    slots: Vec<Mutex<PtState>>,
}

impl PtTable {
    pub(crate) fn new(size: usize) -> PtTable {
        let mut slots = Vec::with_capacity(size);
        for _ in 0..size {
            slots.push(Mutex::new(PtState {
                status: PtStatus::Unallocated,
                options: PtOptions::empty(),
                eq: None,
                priority: VecDeque::new(),
                overflow: VecDeque::new(),
                buffered: VecDeque::new(),
                refs: 0,
            }));
        }
        PtTable { slots }
    }

    /// Allocates a slot. `requested == None` picks the lowest free
    /// index; a requested index already in use is an argument error.
    pub(crate) fn alloc(
        &self,
        requested: Option<u32>,
        options: PtOptions,
        eq: Option<Handle>,
    ) -> Result<u32> {
        match requested {
            Some(index) => {
                let mut state = self.lock(index)?;
                if state.status != PtStatus::Unallocated {
                    return Err(Error::ArgInvalid);
                }
                state.status = PtStatus::Enabled;
                state.options = options;
                state.eq = eq;
                Ok(index)
            }
            None => {
                for (index, slot) in self.slots.iter().enumerate() {
                    let mut state = slot.lock().unwrap();
                    if state.status == PtStatus::Unallocated {
                        state.status = PtStatus::Enabled;
                        state.options = options;
                        state.eq = eq;
                        return Ok(index as u32);
                    }
                }
                Err(Error::NoSpace)
            }
        }
    }

    pub(crate) fn free(&self, index: u32) -> Result<()> {
        let mut state = self.lock(index)?;
        if state.status == PtStatus::Unallocated {
            return Err(Error::ArgInvalid);
        }
        if state.refs > 0 || !state.priority.is_empty() || !state.overflow.is_empty() {
            return Err(Error::InUse);
        }
        state.clear();
        Ok(())
    }

    pub(crate) fn enable(&self, index: u32) -> Result<()> {
        let mut state = self.lock(index)?;
        if state.status == PtStatus::Unallocated {
            return Err(Error::ArgInvalid);
        }
        state.status = PtStatus::Enabled;
        Ok(())
    }

    pub(crate) fn disable(&self, index: u32) -> Result<()> {
        let mut state = self.lock(index)?;
        if state.status == PtStatus::Unallocated {
            return Err(Error::ArgInvalid);
        }
        state.status = PtStatus::Disabled;
        Ok(())
    }

    pub(crate) fn validate(&self, index: u32) -> Result<PtValidation> {
        let state = self.lock(index)?;
        Ok(match state.status {
            PtStatus::Unallocated => PtValidation::Unallocated,
            PtStatus::Disabled => PtValidation::Disabled,
            PtStatus::Enabled if state.eq.is_none() => PtValidation::EnabledNoEq,
            PtStatus::Enabled => PtValidation::Enabled,
        })
    }

    pub(crate) fn lock(&self, index: u32) -> Result<MutexGuard<'_, PtState>> {
        self.slots
            .get(index as usize)
            .map(|slot| slot.lock().unwrap())
            .ok_or(Error::ArgInvalid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn any_picks_lowest_free() {
        let table = PtTable::new(4);
        assert_eq!(table.alloc(None, PtOptions::empty(), None).unwrap(), 0);
        assert_eq!(table.alloc(Some(2), PtOptions::empty(), None).unwrap(), 2);
        assert_eq!(table.alloc(None, PtOptions::empty(), None).unwrap(), 1);
        assert_eq!(table.alloc(None, PtOptions::empty(), None).unwrap(), 3);
        assert!(matches!(
            table.alloc(None, PtOptions::empty(), None),
            Err(Error::NoSpace)
        ));
    }

    #[test]
    fn requested_index_in_use() {
        let table = PtTable::new(2);
        table.alloc(Some(1), PtOptions::empty(), None).unwrap();
        assert!(matches!(
            table.alloc(Some(1), PtOptions::empty(), None),
            Err(Error::ArgInvalid)
        ));
    }

    #[test]
    fn free_requires_empty_lists() {
        let table = PtTable::new(1);
        table.alloc(Some(0), PtOptions::empty(), None).unwrap();
        table.lock(0).unwrap().priority.push_back(Handle::NONE);
        assert!(matches!(table.free(0), Err(Error::InUse)));
        table.lock(0).unwrap().priority.clear();
        table.free(0).unwrap();
        assert!(matches!(table.enable(0), Err(Error::ArgInvalid)));
    }

    #[test]
    fn validate_reports_condition() {
        let table = PtTable::new(2);
        assert_eq!(table.validate(0).unwrap(), PtValidation::Unallocated);
        table.alloc(Some(0), PtOptions::empty(), None).unwrap();
        assert_eq!(table.validate(0).unwrap(), PtValidation::EnabledNoEq);
        table
            .alloc(Some(1), PtOptions::empty(), Some(Handle::NONE))
            .unwrap();
        assert_eq!(table.validate(1).unwrap(), PtValidation::Enabled);
        table.disable(0).unwrap();
        assert_eq!(table.validate(0).unwrap(), PtValidation::Disabled);
        assert!(table.validate(7).is_err());
    }

    #[test]
    fn enable_disable_cycle() {
        let table = PtTable::new(1);
        table.alloc(Some(0), PtOptions::empty(), None).unwrap();
        table.disable(0).unwrap();
        assert_eq!(table.lock(0).unwrap().status, PtStatus::Disabled);
        table.enable(0).unwrap();
        assert_eq!(table.lock(0).unwrap().status, PtStatus::Enabled);
    }
}
