//! OS-specific plumbing: the readiness selector used by the
//! connection-manager event loop, the eventfd waker, and the
//! shared-memory segment primitive.

#[cfg(unix)]
mod unix;

#[cfg(unix)]
pub(crate) use unix::{
    event_token, is_closed, is_readable, Segment, Selector, SelectorEvent,
    SelectorEvents, Waker,
};
