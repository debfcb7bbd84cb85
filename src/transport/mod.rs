//! The two data-plane transports behind one dispatch surface.
//!
//! A connection to an intra-node peer uses the shared-memory transport;
//! anything else goes over the wire engine. Both move the same [`Buf`]
//! carriers and both deliver into the destination interface's internal
//! queue, where the progress thread picks them up.
//!
//! [`Buf`]: crate::buf::Buf

use crate::buf::Buf;
use crate::Result;

mod shm;
mod wire;

pub(crate) use shm::{CommPad, ShmTransport};
pub(crate) use wire::{WireEngine, WireTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TransportKind {
    Shm,
    Wire,
}

/// Per-interface transport dispatch.
pub(crate) trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Largest payload sent inline with the header; beyond it the wire
    /// side switches to descriptor-based transfers.
    fn max_inline(&self) -> usize;

    /// Submits an initiator request towards `dst`.
    fn send(&self, dst: u32, buf: Buf) -> Result<()>;

    /// Returns an acknowledgement, reply, or release carrier to `dst`,
    /// preferring the connection the request arrived on.
    fn respond(&self, dst: u32, buf: Buf) -> Result<()>;

    fn shutdown(&self);
}
