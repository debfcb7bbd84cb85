use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::ptr;
use std::time::Duration;

use libc::{EPOLLIN, EPOLLOUT, EPOLLRDHUP};

/// Thin wrapper over an epoll instance.
///
/// Registrations are level-triggered: the event loop re-arms nothing
/// and simply retries short reads on the next iteration.
#[derive(Debug)]
pub(crate) struct Selector {
    ep: OwnedFd,
}

pub(crate) type SelectorEvent = libc::epoll_event;
pub(crate) type SelectorEvents = Vec<SelectorEvent>;

impl Selector {
    pub(crate) fn new() -> io::Result<Selector> {
        // `epoll_create1(2)` ensures the fd is valid.
        let ep = unsafe { OwnedFd::from_raw_fd(syscall!(epoll_create1(libc::EPOLL_CLOEXEC))?) };
        Ok(Selector { ep })
    }

    pub(crate) fn select(
        &self,
        events: &mut SelectorEvents,
        timeout: Option<Duration>,
    ) -> io::Result<()> {
        // `Duration::as_millis` truncates, so round up to avoid turning
        // sub-millisecond timeouts into busy loops.
        let timeout = timeout
            .map(|to| {
                to.checked_add(Duration::from_nanos(999_999))
                    .unwrap_or(to)
                    .as_millis() as libc::c_int
            })
            .unwrap_or(-1);

        events.clear();
        syscall!(epoll_wait(
            self.ep.as_raw_fd(),
            events.as_mut_ptr(),
            events.capacity() as i32,
            timeout,
        ))
        .map(|n_events| {
            // `epoll_wait` guarantees `n_events` entries are assigned.
            unsafe { events.set_len(n_events as usize) };
        })
    }

    pub(crate) fn register(
        &self,
        fd: RawFd,
        token: u64,
        readable: bool,
        writable: bool,
    ) -> io::Result<()> {
        let mut event = libc::epoll_event {
            events: epoll_mask(readable, writable),
            u64: token,
        };
        syscall!(epoll_ctl(
            self.ep.as_raw_fd(),
            libc::EPOLL_CTL_ADD,
            fd,
            &mut event
        ))
        .map(|_| ())
    }

    pub(crate) fn reregister(
        &self,
        fd: RawFd,
        token: u64,
        readable: bool,
        writable: bool,
    ) -> io::Result<()> {
        let mut event = libc::epoll_event {
            events: epoll_mask(readable, writable),
            u64: token,
        };
        syscall!(epoll_ctl(
            self.ep.as_raw_fd(),
            libc::EPOLL_CTL_MOD,
            fd,
            &mut event
        ))
        .map(|_| ())
    }

    pub(crate) fn deregister(&self, fd: RawFd) -> io::Result<()> {
        syscall!(epoll_ctl(
            self.ep.as_raw_fd(),
            libc::EPOLL_CTL_DEL,
            fd,
            ptr::null_mut()
        ))
        .map(|_| ())
    }
}

fn epoll_mask(readable: bool, writable: bool) -> u32 {
    let mut kind = 0;
    if readable {
        kind = kind | EPOLLIN | EPOLLRDHUP;
    }
    if writable {
        kind |= EPOLLOUT;
    }
    kind as u32
}

pub(crate) fn event_token(event: &SelectorEvent) -> u64 {
    event.u64
}

pub(crate) fn is_readable(event: &SelectorEvent) -> bool {
    (event.events as libc::c_int & libc::EPOLLIN) != 0
}

pub(crate) fn is_closed(event: &SelectorEvent) -> bool {
    (event.events as libc::c_int & (libc::EPOLLHUP | libc::EPOLLRDHUP | libc::EPOLLERR)) != 0
}
