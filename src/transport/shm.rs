use std::io;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};

use log::trace;

use crate::buf::Buf;
use crate::transport::{Transport, TransportKind};
use crate::{Error, Result};

/// The intra-node communication pad: one inbox per rank.
///
/// Every interface on the node registers the sending half of its
/// internal queue here at creation and deregisters at teardown. A send
/// is a single enqueue onto the destination's queue; the destination's
/// progress thread consumes it and pushes the carrier back, flipped to
/// release, once it is done with it.
pub(crate) struct CommPad {
    slots: Mutex<Vec<Option<Sender<Buf>>>>,
}

impl CommPad {
    pub(crate) fn new(num_procs: usize) -> Arc<CommPad> {
        Arc::new(CommPad {
            slots: Mutex::new(vec![None; num_procs]),
        })
    }

    pub(crate) fn register(&self, rank: u32, tx: Sender<Buf>) -> Result<()> {
        let mut slots = self.slots.lock().unwrap();
        let slot = slots.get_mut(rank as usize).ok_or(Error::ArgInvalid)?;
        if slot.is_some() {
            return Err(Error::ArgInvalid);
        }
        *slot = Some(tx);
        Ok(())
    }

    pub(crate) fn deregister(&self, rank: u32) {
        if let Some(slot) = self.slots.lock().unwrap().get_mut(rank as usize) {
            *slot = None;
        }
    }

    pub(crate) fn send(&self, rank: u32, buf: Buf) -> Result<()> {
        let tx = {
            let slots = self.slots.lock().unwrap();
            slots
                .get(rank as usize)
                .and_then(|slot| slot.clone())
                .ok_or_else(not_connected)?
        };
        tx.send(buf).map_err(|_| not_connected())?;
        Ok(())
    }
}

fn not_connected() -> Error {
    Error::Io(io::Error::from(io::ErrorKind::NotConnected))
}

/// Shared-memory transport: delivery is an enqueue on the peer's
/// internal queue.
pub(crate) struct ShmTransport {
    pad: Arc<CommPad>,
}

impl ShmTransport {
    pub(crate) fn new(pad: Arc<CommPad>) -> ShmTransport {
        ShmTransport { pad }
    }
}

impl Transport for ShmTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Shm
    }

    fn max_inline(&self) -> usize {
        // Everything is inline on the pad; fragments are pooled, not
        // descriptor-chained.
        usize::MAX
    }

    fn send(&self, dst: u32, buf: Buf) -> Result<()> {
        trace!("shm send {:?} to rank {}", buf.hdr.ty, dst);
        self.pad.send(dst, buf)
    }

    fn respond(&self, dst: u32, buf: Buf) -> Result<()> {
        self.pad.send(dst, buf)
    }

    fn shutdown(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::{Header, HdrType};
    use std::sync::mpsc;

    #[test]
    fn routes_by_rank() {
        let pad = CommPad::new(2);
        let (tx, rx) = mpsc::channel();
        pad.register(1, tx).unwrap();
        pad.send(1, Buf::new(Header::new(HdrType::Put))).unwrap();
        assert_eq!(rx.try_recv().unwrap().hdr.ty, HdrType::Put);
        assert!(pad.send(0, Buf::new(Header::new(HdrType::Put))).is_err());
    }

    #[test]
    fn double_register_rejected() {
        let pad = CommPad::new(1);
        let (tx, _rx) = mpsc::channel();
        pad.register(0, tx.clone()).unwrap();
        assert!(pad.register(0, tx).is_err());
        pad.deregister(0);
        let (tx, _rx) = mpsc::channel();
        assert!(pad.register(0, tx).is_ok());
    }
}
