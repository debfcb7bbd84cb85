use std::sync::atomic::{AtomicUsize, Ordering};

use crate::handle::Handle;
use crate::options::MdOptions;
use crate::{Error, Result};

/// Description of an initiator-side memory window, passed to
/// [`Ni::md_bind`].
///
/// When `iovecs` is non-empty it describes the window as a gather
/// vector and `start`/`length` are ignored.
///
/// [`Ni::md_bind`]: crate::Ni::md_bind
#[derive(Debug)]
pub struct MdDesc {
    pub start: *mut u8,
    pub length: u64,
    pub iovecs: Vec<Iovec>,
    pub options: MdOptions,
    /// Event queue receiving SEND/ACK/REPLY events, or [`Handle::NONE`].
    pub eq: Handle,
    /// Counting event incremented per `options`, or [`Handle::NONE`].
    pub ct: Handle,
}

/// One element of a gather/scatter vector.
#[derive(Debug, Clone, Copy)]
pub struct Iovec {
    pub base: *mut u8,
    pub len: u64,
}

#[derive(Debug, Clone, Copy)]
struct Span {
    base: usize,
    len: u64,
}

/// A bound memory descriptor. Immutable after bind until release.
pub(crate) struct Md {
    spans: Vec<Span>,
    length: u64,
    pub(crate) options: MdOptions,
    pub(crate) eq: Option<Handle>,
    pub(crate) ct: Option<Handle>,
    // Operations in flight against this descriptor; release is refused
    // while non-zero.
    pending: AtomicUsize,
}

impl Md {
    pub(crate) fn new(desc: &MdDesc) -> Result<Md> {
        let spans: Vec<Span> = if desc.iovecs.is_empty() {
            if desc.start.is_null() && desc.length > 0 {
                return Err(Error::ArgInvalid);
            }
            vec![Span {
                base: desc.start as usize,
                len: desc.length,
            }]
        } else {
            desc.iovecs
                .iter()
                .map(|iov| {
                    if iov.base.is_null() && iov.len > 0 {
                        Err(Error::ArgInvalid)
                    } else {
                        Ok(Span {
                            base: iov.base as usize,
                            len: iov.len,
                        })
                    }
                })
                .collect::<Result<_>>()?
        };
        let length = spans.iter().map(|s| s.len).sum();
        Ok(Md {
            spans,
            length,
            options: desc.options,
            eq: if desc.eq == Handle::NONE {
                None
            } else {
                Some(desc.eq)
            },
            ct: if desc.ct == Handle::NONE {
                None
            } else {
                Some(desc.ct)
            },
            pending: AtomicUsize::new(0),
        })
    }

    pub(crate) fn length(&self) -> u64 {
        self.length
    }

    pub(crate) fn window_ok(&self, offset: u64, length: u64) -> bool {
        offset
            .checked_add(length)
            .map_or(false, |end| end <= self.length)
    }

    pub(crate) fn acquire(&self) {
        self.pending.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn release(&self) {
        let prev = self.pending.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(prev > 0);
    }

    pub(crate) fn in_use(&self) -> bool {
        self.pending.load(Ordering::SeqCst) > 0
    }

    /// Gathers `len` bytes starting at `offset` into `out`.
    ///
    /// The bind contract guarantees the spans stay valid and unaliased
    /// by the runtime for the descriptor's lifetime.
    pub(crate) fn read(&self, mut offset: u64, len: u64, out: &mut Vec<u8>) {
        debug_assert!(self.window_ok(offset, len));
        let mut remaining = len;
        for span in &self.spans {
            if remaining == 0 {
                break;
            }
            if offset >= span.len {
                offset -= span.len;
                continue;
            }
            let take = (span.len - offset).min(remaining);
            unsafe {
                let src = (span.base as *const u8).add(offset as usize);
                out.extend_from_slice(std::slice::from_raw_parts(src, take as usize));
            }
            remaining -= take;
            offset = 0;
        }
        debug_assert_eq!(remaining, 0);
    }

    /// Scatters `data` into the window starting at `offset`.
    pub(crate) fn write(&self, mut offset: u64, data: &[u8]) {
        debug_assert!(self.window_ok(offset, data.len() as u64));
        let mut data = data;
        for span in &self.spans {
            if data.is_empty() {
                break;
            }
            if offset >= span.len {
                offset -= span.len;
                continue;
            }
            let take = ((span.len - offset) as usize).min(data.len());
            unsafe {
                let dst = (span.base as *mut u8).add(offset as usize);
                std::ptr::copy_nonoverlapping(data.as_ptr(), dst, take);
            }
            data = &data[take..];
            offset = 0;
        }
        debug_assert!(data.is_empty());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iovec_gather_scatter() {
        let mut a = [0u8; 4];
        let mut b = [0u8; 4];
        let md = Md::new(&MdDesc {
            start: std::ptr::null_mut(),
            length: 0,
            iovecs: vec![
                Iovec {
                    base: a.as_mut_ptr(),
                    len: 4,
                },
                Iovec {
                    base: b.as_mut_ptr(),
                    len: 4,
                },
            ],
            options: MdOptions::empty(),
            eq: Handle::NONE,
            ct: Handle::NONE,
        })
        .unwrap();
        assert_eq!(md.length(), 8);
        md.write(2, &[1, 2, 3, 4]);
        let mut out = Vec::new();
        md.read(0, 8, &mut out);
        assert_eq!(out, vec![0, 0, 1, 2, 3, 4, 0, 0]);
        assert_eq!(a, [0, 0, 1, 2]);
        assert_eq!(b, [3, 4, 0, 0]);
    }

    #[test]
    fn window_bounds() {
        let mut buf = [0u8; 16];
        let md = Md::new(&MdDesc {
            start: buf.as_mut_ptr(),
            length: 16,
            iovecs: Vec::new(),
            options: MdOptions::empty(),
            eq: Handle::NONE,
            ct: Handle::NONE,
        })
        .unwrap();
        assert!(md.window_ok(0, 16));
        assert!(md.window_ok(16, 0));
        assert!(!md.window_ok(8, 9));
        assert!(!md.window_ok(u64::MAX, 1));
    }
}
