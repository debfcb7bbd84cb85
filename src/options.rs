//! Option flags and small enums shared across the object classes.

use bitflags::bitflags;

bitflags! {
    /// Interface-wide behaviour flags, fixed at [`Ni`] creation.
    ///
    /// [`Ni`]: crate::Ni
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct NiOptions: u32 {
        /// The interface runs the matching walker: targets post match
        /// entries and incoming headers carry match bits. Without it,
        /// list entries match positionally.
        const MATCHING = 1 << 0;
        /// Peers are addressed by physical `{nid, pid}` identity rather
        /// than by logical rank.
        const PHYSICAL = 1 << 1;
    }
}

bitflags! {
    /// Memory-descriptor flags controlling initiator-side notification.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct MdOptions: u32 {
        /// Count send completions on the bound counting event.
        const EVENT_CT_SEND = 1 << 0;
        /// Count acknowledgements on the bound counting event.
        const EVENT_CT_ACK = 1 << 1;
        /// Count replies on the bound counting event.
        const EVENT_CT_REPLY = 1 << 2;
        /// Counting-event increments add bytes moved instead of one.
        const EVENT_CT_BYTES = 1 << 3;
        /// Suppress all full events on the bound event queue.
        const EVENT_DISABLE = 1 << 4;
        /// Suppress successful events; failures still post.
        const EVENT_SUCCESS_DISABLE = 1 << 5;
    }
}

bitflags! {
    /// List/match entry flags: permissions, unlink discipline, and the
    /// counting-event increment mask.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct LeOptions: u32 {
        /// The entry accepts put-class operations (put, atomics).
        const OP_PUT = 1 << 0;
        /// The entry accepts get-class operations (get, fetch-atomics).
        const OP_GET = 1 << 1;
        /// Unlink the entry after its first delivery.
        const USE_ONCE = 1 << 2;
        /// Never send an acknowledgement for deliveries to this entry.
        const ACK_DISABLE = 1 << 3;
        /// Offsets are managed locally by the entry, not by the
        /// initiator's remote offset.
        const MANAGE_LOCAL = 1 << 4;
        /// Suppress all events for this entry.
        const EVENT_DISABLE = 1 << 5;
        /// Suppress successful events; failures still post.
        const EVENT_SUCCESS_DISABLE = 1 << 6;
        /// Suppress the UNLINK event when the entry is consumed.
        const EVENT_UNLINK_DISABLE = 1 << 7;
        /// Authenticate by job id instead of user id.
        const AUTH_USE_JID = 1 << 8;
        /// Count put deliveries on the bound counting event.
        const EVENT_CT_PUT = 1 << 9;
        /// Count get deliveries on the bound counting event.
        const EVENT_CT_GET = 1 << 10;
        /// Count atomic deliveries on the bound counting event.
        const EVENT_CT_ATOMIC = 1 << 11;
        /// Count put deliveries landing via the overflow list.
        const EVENT_CT_PUT_OVERFLOW = 1 << 12;
        /// Count atomic deliveries landing via the overflow list.
        const EVENT_CT_ATOMIC_OVERFLOW = 1 << 13;
        /// Counting-event increments add bytes moved instead of one.
        const EVENT_CT_BYTES = 1 << 14;
    }
}

bitflags! {
    /// Portal-table entry allocation flags.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct PtOptions: u32 {
        /// Every entry appended to this table entry must be use-once.
        const ONLY_USE_ONCE = 1 << 0;
    }
}

/// Acknowledgement policy requested by a put or atomic initiator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AckReq {
    /// No acknowledgement; the operation completes at send time.
    None = 0,
    /// Full acknowledgement event on the descriptor's event queue.
    Ack = 1,
    /// Counting-only acknowledgement; no full event is generated.
    CtAck = 2,
}

impl AckReq {
    pub(crate) fn from_wire(raw: u8) -> Option<AckReq> {
        Some(match raw {
            0 => AckReq::None,
            1 => AckReq::Ack,
            2 => AckReq::CtAck,
            _ => return None,
        })
    }
}

/// Which list of a portal-table entry an append targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
    /// First-match list, walked before overflow.
    Priority,
    /// Captures arrivals no priority entry claimed.
    Overflow,
    /// Search without delivery. Declared but not implemented; appends
    /// return [`Fail`](crate::Error::Fail).
    ProbeOnly,
}
