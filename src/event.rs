use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};

/// A counting-event value: a success count and a failure count.
///
/// Waits and triggers test the sum of the two fields against a
/// threshold, so a failed operation still makes progress towards any
/// threshold while remaining distinguishable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CtEvent {
    pub success: u64,
    pub failure: u64,
}

impl CtEvent {
    pub(crate) fn reached(&self, threshold: u64) -> bool {
        self.success + self.failure >= threshold
    }
}

/// Failure cause carried by completion events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NiFail {
    /// The operation completed successfully.
    Ok,
    /// The peer was unreachable after connection retries.
    Undeliverable,
    /// The target rejected the operation on a permission check.
    PermViolation,
    /// The target dropped the operation without delivering it.
    Dropped,
}

impl NiFail {
    pub(crate) fn to_wire(self) -> u8 {
        match self {
            NiFail::Ok => 0,
            NiFail::Undeliverable => 1,
            NiFail::PermViolation => 2,
            NiFail::Dropped => 3,
        }
    }

    pub(crate) fn from_wire(raw: u8) -> NiFail {
        match raw {
            1 => NiFail::Undeliverable,
            2 => NiFail::PermViolation,
            3 => NiFail::Dropped,
            _ => NiFail::Ok,
        }
    }
}

/// Full event types posted to an event queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // Target side.
    Put,
    Get,
    Atomic,
    PutOverflow,
    AtomicOverflow,
    Unlink,
    Dropped,
    // Initiator side.
    Send,
    Ack,
    Reply,
}

/// A single full event.
///
/// Target events describe a delivery into a posted entry; initiator
/// events describe the local completion of an issued operation. Fields
/// that do not apply to a given kind are zero.
#[derive(Debug, Clone)]
pub struct Event {
    pub kind: EventKind,
    /// Source process of the delivered operation (target events).
    pub initiator: u32,
    pub pt_index: u32,
    pub match_bits: u64,
    /// Requested transfer length from the header.
    pub rlength: u64,
    /// Length actually manipulated after clamping to the entry window.
    pub mlength: u64,
    pub remote_offset: u64,
    /// Target-side address the data landed at, zero when absent.
    pub start: usize,
    pub user_ptr: u64,
    pub hdr_data: u64,
    pub ni_fail: NiFail,
}

impl Event {
    pub(crate) fn initiator_event(kind: EventKind, mlength: u64, offset: u64, user_ptr: u64, ni_fail: NiFail) -> Event {
        Event {
            kind,
            initiator: 0,
            pt_index: 0,
            match_bits: 0,
            rlength: 0,
            mlength,
            remote_offset: offset,
            start: 0,
            user_ptr,
            hdr_data: 0,
            ni_fail,
        }
    }
}

/// Interface-level wait coordination shared by many waiters.
///
/// Counting-event pollers and event-queue waiters cannot block on a
/// single object's condvar: the set of objects they watch is only known
/// at the call site. They block here instead, and every mutator of any
/// watched object wakes the set. The sequence counter means a waker is
/// never lost between a waiter's check and its block.
pub(crate) struct WaitSet {
    pub(crate) mutex: Mutex<u64>,
    pub(crate) cond: Condvar,
    interrupt: AtomicBool,
}

impl WaitSet {
    pub(crate) fn new() -> WaitSet {
        WaitSet {
            mutex: Mutex::new(0),
            cond: Condvar::new(),
            interrupt: AtomicBool::new(false),
        }
    }

    /// Wakes every waiter blocked on the set.
    pub(crate) fn wake(&self) {
        let mut seq = self.mutex.lock().unwrap();
        *seq = seq.wrapping_add(1);
        self.cond.notify_all();
    }

    /// Marks the set interrupted (teardown) and wakes all waiters.
    pub(crate) fn interrupt(&self) {
        self.interrupt.store(true, Ordering::SeqCst);
        self.wake();
    }

    pub(crate) fn interrupted(&self) -> bool {
        self.interrupt.load(Ordering::SeqCst)
    }
}
