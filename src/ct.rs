use std::sync::{Condvar, Mutex};

use crate::event::CtEvent;
use crate::triggered::TriggeredOp;
use crate::{Error, Result};

/// A counting event.
///
/// Mutations happen through [`NiInner::ct_mutate`], which holds the
/// interface-level `ct_wait` mutex around the per-object lock so
/// multi-object pollers observe a consistent broadcast, then runs the
/// triggered scheduler on whatever crossed its threshold.
///
/// [`NiInner::ct_mutate`]: crate::ni::NiInner::ct_mutate
pub(crate) struct Ct {
    pub(crate) state: Mutex<CtState>,
    pub(crate) cond: Condvar,
}

pub(crate) struct CtState {
    pub(crate) event: CtEvent,
    pub(crate) interrupt: bool,
    /// Pending triggered operations, ascending by threshold; FIFO
    /// within a threshold.
    pub(crate) pending: Vec<TriggeredOp>,
}

impl Ct {
    pub(crate) fn new() -> Ct {
        Ct {
            state: Mutex::new(CtState {
                event: CtEvent::default(),
                interrupt: false,
                pending: Vec::new(),
            }),
            cond: Condvar::new(),
        }
    }

    pub(crate) fn value(&self) -> CtEvent {
        self.state.lock().unwrap().event
    }

    /// Blocks until `success + failure` reaches `threshold` or the
    /// counting event is interrupted. A threshold already reached never
    /// blocks, even on an interrupted object.
    pub(crate) fn wait(&self, threshold: u64) -> Result<CtEvent> {
        let mut state = self.state.lock().unwrap();
        loop {
            if state.event.reached(threshold) {
                return Ok(state.event);
            }
            if state.interrupt {
                return Err(Error::Interrupted);
            }
            state = self.cond.wait(state).unwrap();
        }
    }

    /// Raises the interrupt flag and wakes per-object waiters. The
    /// caller wakes the interface-level wait set.
    pub(crate) fn interrupt(&self) {
        let mut state = self.state.lock().unwrap();
        state.interrupt = true;
        self.cond.notify_all();
    }
}

impl CtState {
    /// Queues a triggered operation, keeping the list ordered by
    /// threshold (FIFO among equals).
    pub(crate) fn queue_triggered(&mut self, op: TriggeredOp) {
        let at = self
            .pending
            .partition_point(|queued| queued.threshold <= op.threshold);
        self.pending.insert(at, op);
    }

    /// Extracts every queued operation whose threshold the current
    /// value has reached, in firing order.
    pub(crate) fn take_fired(&mut self) -> Vec<TriggeredOp> {
        let upto = self
            .pending
            .partition_point(|queued| self.event.reached(queued.threshold));
        self.pending.drain(..upto).collect()
    }
}
