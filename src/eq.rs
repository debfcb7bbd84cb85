use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::trace;

use crate::event::{Event, WaitSet};
use crate::{Error, Result};

/// A bounded queue of full events.
///
/// Producers are the matching engine and the acknowledgement handler,
/// both running on the interface's progress machinery; consumers are
/// application threads blocking on the interface-level wait set. When
/// the ring is full the oldest event is overwritten and a dropped
/// latch is raised; the next consumer sees [`Error::EqDropped`] once
/// before draining resumes.
pub(crate) struct EventQueue {
    ring: Mutex<Ring>,
    capacity: usize,
    wait: Arc<WaitSet>,
}

struct Ring {
    events: VecDeque<Event>,
    dropped: bool,
}

impl EventQueue {
    pub(crate) fn new(capacity: usize, wait: Arc<WaitSet>) -> EventQueue {
        EventQueue {
            ring: Mutex::new(Ring {
                events: VecDeque::with_capacity(capacity),
                dropped: false,
            }),
            capacity,
            wait,
        }
    }

    pub(crate) fn push(&self, event: Event) {
        {
            let mut ring = self.ring.lock().unwrap();
            if ring.events.len() == self.capacity {
                trace!("event queue full, overwriting oldest event");
                ring.events.pop_front();
                ring.dropped = true;
            }
            ring.events.push_back(event);
        }
        self.wait.wake();
    }

    /// Non-blocking dequeue.
    pub(crate) fn get(&self) -> Result<Event> {
        let mut ring = self.ring.lock().unwrap();
        if ring.dropped {
            ring.dropped = false;
            return Err(Error::EqDropped);
        }
        ring.events.pop_front().ok_or(Error::EqEmpty)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.ring.lock().unwrap().events.is_empty()
    }

    /// Blocks until an event is available or the interface is torn
    /// down.
    pub(crate) fn wait(&self) -> Result<Event> {
        let mut seq = self.wait.mutex.lock().unwrap();
        loop {
            if self.wait.interrupted() {
                return Err(Error::Interrupted);
            }
            match self.get() {
                Err(Error::EqEmpty) => {}
                other => return other,
            }
            seq = self.wait.cond.wait(seq).unwrap();
        }
    }

    /// Waits over several queues of one interface with a millisecond
    /// timeout, returning the index of the queue that produced.
    pub(crate) fn poll(
        queues: &[Arc<EventQueue>],
        timeout_ms: Option<u64>,
        wait: &WaitSet,
    ) -> Result<(usize, Event)> {
        if queues.is_empty() {
            return Err(Error::ArgInvalid);
        }
        let deadline = timeout_ms.map(|ms| Instant::now() + Duration::from_millis(ms));
        let mut seq = wait.mutex.lock().unwrap();
        loop {
            if wait.interrupted() {
                return Err(Error::Interrupted);
            }
            for (which, eq) in queues.iter().enumerate() {
                match eq.get() {
                    Err(Error::EqEmpty) => continue,
                    Ok(event) => return Ok((which, event)),
                    Err(err) => return Err(err),
                }
            }
            match deadline {
                None => seq = wait.cond.wait(seq).unwrap(),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(Error::EqEmpty);
                    }
                    let (guard, _) = wait.cond.wait_timeout(seq, deadline - now).unwrap();
                    seq = guard;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventKind, NiFail};

    fn event() -> Event {
        Event::initiator_event(EventKind::Send, 0, 0, 0, NiFail::Ok)
    }

    #[test]
    fn fifo_order() {
        let eq = EventQueue::new(4, Arc::new(WaitSet::new()));
        for i in 0..3 {
            let mut ev = event();
            ev.user_ptr = i;
            eq.push(ev);
        }
        for i in 0..3 {
            assert_eq!(eq.get().unwrap().user_ptr, i);
        }
        assert!(matches!(eq.get(), Err(Error::EqEmpty)));
    }

    #[test]
    fn overflow_drops_oldest_and_latches() {
        let eq = EventQueue::new(2, Arc::new(WaitSet::new()));
        for i in 0..3 {
            let mut ev = event();
            ev.user_ptr = i;
            eq.push(ev);
        }
        assert!(matches!(eq.get(), Err(Error::EqDropped)));
        // Oldest event was replaced; the remaining two drain in order.
        assert_eq!(eq.get().unwrap().user_ptr, 1);
        assert_eq!(eq.get().unwrap().user_ptr, 2);
    }
}
