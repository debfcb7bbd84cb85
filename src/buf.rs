use std::sync::Mutex;

use crate::proto::Header;

/// A transport-agnostic message carrier.
///
/// A `Buf` is owned by whoever most recently pushed it into a queue:
/// the initiator builds it, the transport delivers it, and the target
/// either consumes it or flips the header type and hands it back as a
/// reply. `via` records the wire connection a frame arrived on so the
/// reply can take the same path.
#[derive(Debug)]
pub(crate) struct Buf {
    pub hdr: Header,
    pub payload: Vec<u8>,
    pub via: Option<u64>,
}

impl Buf {
    pub(crate) fn new(hdr: Header) -> Buf {
        Buf {
            hdr,
            payload: Vec::new(),
            via: None,
        }
    }

    pub(crate) fn with_payload(hdr: Header, payload: Vec<u8>) -> Buf {
        Buf {
            hdr,
            payload,
            via: None,
        }
    }
}

/// Payload buffer recycling in two fragment classes.
///
/// Send paths allocate from here and the progress thread returns
/// buffers on completion, so steady-state traffic does not allocate.
/// Requests larger than the large fragment size fall through to a
/// plain allocation and are not recycled.
pub(crate) struct BufPool {
    small_size: usize,
    large_size: usize,
    small: Mutex<Vec<Vec<u8>>>,
    large: Mutex<Vec<Vec<u8>>>,
}

impl BufPool {
    pub(crate) fn new(
        small_size: usize,
        small_count: usize,
        large_size: usize,
        large_count: usize,
    ) -> BufPool {
        BufPool {
            small_size,
            large_size,
            small: Mutex::new(Vec::with_capacity(small_count)),
            large: Mutex::new(Vec::with_capacity(large_count)),
        }
    }

    pub(crate) fn get(&self, len: usize) -> Vec<u8> {
        let (pool, cap) = if len <= self.small_size {
            (&self.small, self.small_size)
        } else if len <= self.large_size {
            (&self.large, self.large_size)
        } else {
            return Vec::with_capacity(len);
        };
        pool.lock()
            .unwrap()
            .pop()
            .unwrap_or_else(|| Vec::with_capacity(cap))
    }

    pub(crate) fn put(&self, mut buf: Vec<u8>) {
        let pool = if buf.capacity() <= self.small_size {
            &self.small
        } else if buf.capacity() <= self.large_size {
            &self.large
        } else {
            return;
        };
        let mut pool = pool.lock().unwrap();
        if pool.len() < pool.capacity() {
            buf.clear();
            pool.push(buf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recycles_by_class() {
        let pool = BufPool::new(64, 2, 1024, 2);
        let mut buf = pool.get(10);
        assert!(buf.capacity() >= 64);
        buf.extend_from_slice(&[1, 2, 3]);
        pool.put(buf);
        let buf = pool.get(10);
        assert!(buf.is_empty());
    }

    #[test]
    fn oversize_not_recycled() {
        let pool = BufPool::new(64, 1, 1024, 1);
        let buf = pool.get(4096);
        assert!(buf.capacity() >= 4096);
        pool.put(buf);
        assert_eq!(pool.large.lock().unwrap().len(), 0);
    }
}
