//! The target-side matching engine.
//!
//! [`deliver`] runs under the portal-table slot mutex: it walks the
//! priority list, then the overflow list, performs the data movement,
//! posts notifications, and reports the acknowledgement the caller
//! should send. Arrivals nothing claimed are buffered on the slot and
//! drained by a later priority append ([`append_entry`]).

use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use log::{trace, warn};

use crate::atomics::{self, AtomicOp, AtomicType};
use crate::entry::ListEntry;
use crate::event::{Event, EventKind, NiFail};
use crate::handle::Handle;
use crate::ni::NiInner;
use crate::options::{LeOptions, ListKind, PtOptions};
use crate::proto::{
    Header, HdrType, ACK_OK, ACK_OVERFLOW, ACK_PERM_VIOLATION,
};
use crate::pt::{BufferedHdr, PtState, PtStatus};
use crate::{Error, Result};

/// What the target owes the initiator for a delivered header.
#[derive(Debug)]
pub(crate) enum Disposition {
    /// Nothing is sent back; the initiator bookkeeping still completes
    /// through a silent acknowledgement frame when one was requested.
    Silent,
    /// Acknowledgement with the given code and manipulated length
    /// (put-class operations).
    Ack { code: u8, mlength: u64 },
    /// Reply frame carrying the read-back bytes (get-class operations).
    Reply {
        fail: NiFail,
        payload: Vec<u8>,
        mlength: u64,
    },
}

/// Delivers one incoming header to its portal-table entry.
pub(crate) fn deliver(ni: &NiInner, hdr: &Header, payload: &[u8]) -> Disposition {
    let mut pt = match ni.pt.lock(hdr.pt_index) {
        Ok(pt) => pt,
        Err(_) => {
            ni.drop_count.fetch_add(1, Ordering::SeqCst);
            trace!("arrival for out-of-range pt index {}", hdr.pt_index);
            return dropped_disposition(hdr);
        }
    };
    if pt.status != PtStatus::Enabled {
        ni.drop_count.fetch_add(1, Ordering::SeqCst);
        trace!("arrival for {:?} pt index {}", pt.status, hdr.pt_index);
        return dropped_disposition(hdr);
    }

    if let Some(pos) = walk(ni, &pt.priority, hdr) {
        return deliver_to_entry(ni, &mut pt, pos, ListKind::Priority, hdr, payload);
    }
    // Only operations with nothing to read back can land in overflow
    // or be buffered; get-class arrivals need a live entry to reply
    // from.
    if hdr.ty.is_get_class() {
        ni.drop_count.fetch_add(1, Ordering::SeqCst);
        post_dropped_event(ni, &pt, hdr);
        return Disposition::Reply {
            fail: NiFail::Dropped,
            payload: Vec::new(),
            mlength: 0,
        };
    }
    if let Some(pos) = walk(ni, &pt.overflow, hdr) {
        return deliver_to_entry(ni, &mut pt, pos, ListKind::Overflow, hdr, payload);
    }
    buffer_unexpected(ni, &mut pt, hdr, payload)
}

/// Appends a freshly allocated entry to its list, draining buffered
/// headers first for priority appends. Returns `true` when a buffered
/// header consumed a use-once entry, in which case the entry never
/// lands on the list and the caller releases its slot.
pub(crate) fn append_entry(ni: &NiInner, handle: Handle, entry: &Arc<ListEntry>) -> Result<bool> {
    let mut pt = ni.pt.lock(entry.pt_index)?;
    if pt.status == PtStatus::Unallocated {
        return Err(Error::ArgInvalid);
    }
    if pt.options.contains(PtOptions::ONLY_USE_ONCE)
        && !entry.options.contains(LeOptions::USE_ONCE)
    {
        return Err(Error::ArgInvalid);
    }
    match entry.list {
        ListKind::Priority => {
            // Buffered headers get first claim on a priority append,
            // in arrival order.
            let mut i = 0;
            while i < pt.buffered.len() {
                if !entry.matches(&pt.buffered[i].hdr) {
                    i += 1;
                    continue;
                }
                if !entry.permission_ok(pt.buffered[i].hdr.ty) {
                    ni.perm_violations.fetch_add(1, Ordering::SeqCst);
                    pt.buffered.remove(i);
                    continue;
                }
                if !entry.options.contains(LeOptions::USE_ONCE) {
                    // A persistent entry over captured headers needs a
                    // replay protocol this runtime does not implement.
                    return Err(Error::Fail);
                }
                let rec = pt.buffered.remove(i).unwrap();
                drain_record(ni, &pt, entry, &rec);
                return Ok(true);
            }
            pt.priority.push_back(handle);
            Ok(false)
        }
        ListKind::Overflow => {
            pt.overflow.push_back(handle);
            Ok(false)
        }
        ListKind::ProbeOnly => Err(Error::Fail),
    }
}

/// First entry of `list` claiming `hdr`, if any.
fn walk(ni: &NiInner, list: &VecDeque<Handle>, hdr: &Header) -> Option<usize> {
    list.iter().position(|handle| {
        let entry = ni
            .entry(*handle)
            .expect("posted list entry resolves while linked");
        entry.matches(hdr)
    })
}

fn deliver_to_entry(
    ni: &NiInner,
    pt: &mut PtState,
    pos: usize,
    list: ListKind,
    hdr: &Header,
    payload: &[u8],
) -> Disposition {
    let handle = match list {
        ListKind::Priority => pt.priority[pos],
        ListKind::Overflow => pt.overflow[pos],
        ListKind::ProbeOnly => unreachable!(),
    };
    let entry = ni
        .entry(handle)
        .expect("posted list entry resolves while linked");

    if !entry.permission_ok(hdr.ty) {
        ni.perm_violations.fetch_add(1, Ordering::SeqCst);
        trace!(
            "permission violation: {:?} from {} on pt {}",
            hdr.ty,
            hdr.src,
            hdr.pt_index
        );
        if entry.options.contains(LeOptions::ACK_DISABLE) {
            return Disposition::Silent;
        }
        return if hdr.ty.is_get_class() {
            Disposition::Reply {
                fail: NiFail::PermViolation,
                payload: Vec::new(),
                mlength: 0,
            }
        } else {
            Disposition::Ack {
                code: ACK_PERM_VIOLATION,
                mlength: 0,
            }
        };
    }

    let (offset, exhausted) = entry.claim_offset(hdr.dest_offset, u64::from(hdr.length));
    let mut mlength = entry.mlength(offset, u64::from(hdr.length));
    let start = entry.start + offset as usize;

    let mut reply = None;
    match hdr.ty {
        HdrType::Put => entry.write(offset, &payload[..mlength as usize]),
        HdrType::Atomic => {
            mlength = apply_atomic(&entry, hdr, offset, mlength, payload);
        }
        HdrType::FetchAtomic => {
            let old = entry.read(offset, mlength);
            mlength = apply_atomic(&entry, hdr, offset, mlength, payload);
            reply = Some(old);
        }
        HdrType::Get => reply = Some(entry.read(offset, mlength)),
        HdrType::Swap => {
            let old = entry.read(offset, mlength);
            mlength = apply_swap(&entry, hdr, offset, mlength, payload);
            reply = Some(old);
        }
        _ => unreachable!("only requests reach the matching engine"),
    }

    let overflow = list == ListKind::Overflow;
    if overflow {
        // The payload is captured alongside the saved start so a later
        // priority append can replay the delivery; the full event is
        // deferred until that drain.
        pt.buffered.push_back(BufferedHdr {
            hdr: *hdr,
            data: payload[..mlength as usize].to_vec(),
            start,
        });
    }
    announce(ni, pt.eq, &entry, hdr, mlength, start, overflow, !overflow);

    if entry.options.contains(LeOptions::USE_ONCE) || exhausted {
        pt.unlink(list, handle);
        ni.remove_entry(handle);
        if !entry
            .options
            .intersects(LeOptions::EVENT_DISABLE | LeOptions::EVENT_UNLINK_DISABLE)
        {
            if let Some(eq) = pt.eq {
                let mut event = target_event(EventKind::Unlink, hdr, 0, start);
                event.user_ptr = entry.user_ptr;
                ni.post_event(eq, event);
            }
        }
    }

    match reply {
        Some(payload) => Disposition::Reply {
            fail: NiFail::Ok,
            payload,
            mlength,
        },
        None if entry.options.contains(LeOptions::ACK_DISABLE) => Disposition::Silent,
        None if overflow => Disposition::Ack {
            code: ACK_OVERFLOW,
            mlength,
        },
        None => Disposition::Ack {
            code: ACK_OK,
            mlength,
        },
    }
}

fn buffer_unexpected(
    ni: &NiInner,
    pt: &mut PtState,
    hdr: &Header,
    payload: &[u8],
) -> Disposition {
    if pt.buffered.len() >= ni.limits.max_unexpected_headers {
        warn!(
            "unexpected-header store full on pt {}, dropping arrival from {}",
            hdr.pt_index, hdr.src
        );
        ni.drop_count.fetch_add(1, Ordering::SeqCst);
        post_dropped_event(ni, pt, hdr);
        return Disposition::Silent;
    }
    let keep = (payload.len() as u64).min(ni.limits.max_buffered_payload) as usize;
    pt.buffered.push_back(BufferedHdr {
        hdr: *hdr,
        data: payload[..keep].to_vec(),
        start: 0,
    });
    trace!(
        "buffered unexpected {:?} from {} on pt {} ({} bytes)",
        hdr.ty,
        hdr.src,
        hdr.pt_index,
        keep
    );
    Disposition::Ack {
        code: ACK_OVERFLOW,
        mlength: keep as u64,
    }
}

/// Replays a buffered header into a draining priority entry.
fn drain_record(ni: &NiInner, pt: &PtState, entry: &ListEntry, rec: &BufferedHdr) {
    let (offset, _) = entry.claim_offset(rec.hdr.dest_offset, rec.data.len() as u64);
    let mut mlength = entry
        .mlength(offset, u64::from(rec.hdr.length))
        .min(rec.data.len() as u64);
    match rec.hdr.ty {
        HdrType::Put => entry.write(offset, &rec.data[..mlength as usize]),
        HdrType::Atomic => {
            mlength = apply_atomic(entry, &rec.hdr, offset, mlength, &rec.data);
        }
        _ => unreachable!("only put-class headers are buffered"),
    }
    // The event start points at wherever the bytes first landed: the
    // overflow entry that absorbed the message, or this entry.
    let start = if rec.start != 0 {
        rec.start
    } else {
        entry.start + offset as usize
    };
    announce(ni, pt.eq, entry, &rec.hdr, mlength, start, true, true);
}

fn apply_atomic(
    entry: &ListEntry,
    hdr: &Header,
    offset: u64,
    mlength: u64,
    payload: &[u8],
) -> u64 {
    let (op, ty) = match (
        AtomicOp::from_wire(hdr.atom_op),
        AtomicType::from_wire(hdr.atom_type),
    ) {
        (Some(op), Some(ty)) => (op, ty),
        _ => {
            warn!("malformed atomic header from {}", hdr.src);
            return 0;
        }
    };
    // Clamping may leave a partial trailing element; drop it.
    let mlength = mlength - mlength % ty.width() as u64;
    atomics::perform(
        op,
        ty,
        entry.window_mut(offset, mlength),
        &payload[..mlength as usize],
    );
    mlength
}

fn apply_swap(
    entry: &ListEntry,
    hdr: &Header,
    offset: u64,
    mlength: u64,
    payload: &[u8],
) -> u64 {
    let (op, ty) = match (
        AtomicOp::from_wire(hdr.atom_op),
        AtomicType::from_wire(hdr.atom_type),
    ) {
        (Some(op), Some(ty)) => (op, ty),
        _ => {
            warn!("malformed swap header from {}", hdr.src);
            return 0;
        }
    };
    let mlength = mlength - mlength % ty.width() as u64;
    atomics::perform_swap(
        op,
        ty,
        entry.window_mut(offset, mlength),
        &payload[..mlength as usize],
        hdr.operand,
    );
    mlength
}

/// Posts the counting-event increment and (optionally) the full event
/// for a delivery.
#[allow(clippy::too_many_arguments)]
fn announce(
    ni: &NiInner,
    eq: Option<Handle>,
    entry: &ListEntry,
    hdr: &Header,
    mlength: u64,
    start: usize,
    overflow: bool,
    emit_event: bool,
) {
    if let Some(ct) = entry.ct {
        let mask = if overflow {
            match hdr.ty {
                HdrType::Put => LeOptions::EVENT_CT_PUT_OVERFLOW,
                _ => LeOptions::EVENT_CT_ATOMIC_OVERFLOW,
            }
        } else {
            match hdr.ty {
                HdrType::Put => LeOptions::EVENT_CT_PUT,
                HdrType::Get => LeOptions::EVENT_CT_GET,
                _ => LeOptions::EVENT_CT_ATOMIC,
            }
        };
        if entry.options.contains(mask) {
            let amount = if entry.options.contains(LeOptions::EVENT_CT_BYTES) {
                mlength
            } else {
                1
            };
            if let Ok(ct) = ni.cts.get(ct) {
                ni.ct_mutate(&ct, |event| event.success += amount);
            }
        }
    }

    if !emit_event {
        return;
    }
    if entry
        .options
        .intersects(LeOptions::EVENT_DISABLE | LeOptions::EVENT_SUCCESS_DISABLE)
    {
        return;
    }
    let Some(eq) = eq else { return };
    let kind = match (hdr.ty, overflow) {
        (HdrType::Put, false) => EventKind::Put,
        (HdrType::Put, true) => EventKind::PutOverflow,
        (HdrType::Get, _) => EventKind::Get,
        (_, false) => EventKind::Atomic,
        (_, true) => EventKind::AtomicOverflow,
    };
    ni.post_event(eq, target_event(kind, hdr, mlength, start));
}

fn post_dropped_event(ni: &NiInner, pt: &PtState, hdr: &Header) {
    if let Some(eq) = pt.eq {
        let mut event = target_event(EventKind::Dropped, hdr, 0, 0);
        event.ni_fail = NiFail::Dropped;
        ni.post_event(eq, event);
    }
}

fn dropped_disposition(hdr: &Header) -> Disposition {
    if hdr.ty.is_get_class() {
        // The initiator is waiting on a reply; complete it as dropped.
        Disposition::Reply {
            fail: NiFail::Dropped,
            payload: Vec::new(),
            mlength: 0,
        }
    } else {
        Disposition::Silent
    }
}

fn target_event(kind: EventKind, hdr: &Header, mlength: u64, start: usize) -> Event {
    Event {
        kind,
        initiator: hdr.src,
        pt_index: hdr.pt_index,
        match_bits: hdr.match_bits,
        rlength: u64::from(hdr.length),
        mlength,
        remote_offset: hdr.dest_offset,
        start,
        user_ptr: hdr.user_ptr,
        hdr_data: hdr.hdr_data,
        ni_fail: NiFail::Ok,
    }
}
