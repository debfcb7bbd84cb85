//! The initiator side: operation validation, framing, submission, and
//! completion of acknowledgements and replies.

use std::sync::Arc;

use log::{trace, warn};

use crate::atomics::{AtomicOp, AtomicType};
use crate::event::{EventKind, NiFail};
use crate::handle::Handle;
use crate::md::Md;
use crate::ni::NiInner;
use crate::options::{AckReq, MdOptions};
use crate::proto::{Header, HdrType, ACK_PERM_VIOLATION, ACK_SILENT};
use crate::triggered::{TriggeredAction, TriggeredOp};
use crate::{Buf, Error, Result};

/// Captured parameters of one initiating operation.
///
/// Everything needed to frame and send the request, whether issued
/// immediately or replayed later by the triggered scheduler.
#[derive(Debug)]
pub(crate) struct OpArgs {
    pub kind: HdrType,
    /// Source descriptor for put-class operations, destination for get.
    pub md: Handle,
    pub local_offset: u64,
    pub length: u64,
    pub ack_req: AckReq,
    pub target: u32,
    pub pt_index: u32,
    pub match_bits: u64,
    pub remote_offset: u64,
    pub user_ptr: u64,
    pub hdr_data: u64,
    pub atomic: Option<(AtomicOp, AtomicType)>,
    pub operand: u64,
    /// Reply destination for fetch-atomic and swap.
    pub get_md: Option<(Handle, u64)>,
}

/// A submitted operation awaiting its acknowledgement or reply,
/// keyed by the token echoed in the response header.
#[derive(Debug)]
pub(crate) struct InitOp {
    pub kind: HdrType,
    /// Descriptor the response completes against.
    pub md: Handle,
    pub local_offset: u64,
    pub user_ptr: u64,
    pub ack_req: AckReq,
}

fn resolve_window(ni: &NiInner, md: Handle, offset: u64, length: u64) -> Result<Arc<Md>> {
    let md = ni.mds.get(md)?;
    if !md.window_ok(offset, length) {
        return Err(Error::ArgInvalid);
    }
    Ok(md)
}

/// Argument validation shared by immediate and triggered submission.
/// No side effects: a failed validation leaves nothing behind.
pub(crate) fn validate_op(ni: &NiInner, args: &OpArgs) -> Result<()> {
    if args.length > u64::from(u32::MAX) {
        return Err(Error::ArgInvalid);
    }
    resolve_window(ni, args.md, args.local_offset, args.length)?;
    if let Some((get_md, get_offset)) = args.get_md {
        resolve_window(ni, get_md, get_offset, args.length)?;
    }
    match args.kind {
        HdrType::Put | HdrType::Get => {
            if args.atomic.is_some() {
                return Err(Error::ArgInvalid);
            }
        }
        HdrType::Atomic | HdrType::FetchAtomic | HdrType::Swap => {
            let (op, ty) = args.atomic.ok_or(Error::ArgInvalid)?;
            if !op.accepts(ty) {
                return Err(Error::ArgInvalid);
            }
            if args.kind == HdrType::Swap {
                if !op.is_swap_family() {
                    return Err(Error::ArgInvalid);
                }
                // Conditional and masked swaps act on one element.
                if matches!(op, AtomicOp::Cswap | AtomicOp::Mswap)
                    && args.length != ty.width() as u64
                {
                    return Err(Error::ArgInvalid);
                }
            } else if op.is_swap_family() {
                return Err(Error::ArgInvalid);
            }
            if args.length % ty.width() as u64 != 0 {
                return Err(Error::ArgInvalid);
            }
            if args.length > ni.limits.max_atomic_size {
                return Err(Error::ArgInvalid);
            }
        }
        _ => return Err(Error::ArgInvalid),
    }
    Ok(())
}

/// Frames and submits one operation: pins the descriptor window,
/// loads the payload, registers the pending record when a response is
/// expected, and hands the buffer to the transport.
pub(crate) fn start_op(ni: &NiInner, args: OpArgs) -> Result<()> {
    validate_op(ni, &args)?;
    let md = ni.mds.get(args.md)?;

    let mut hdr = Header::new(args.kind);
    hdr.ni = ni.index;
    hdr.src = ni.rank;
    hdr.pt_index = args.pt_index;
    hdr.match_bits = args.match_bits;
    hdr.dest_offset = args.remote_offset;
    hdr.length = args.length as u32;
    hdr.hdr_data = args.hdr_data;
    hdr.user_ptr = args.user_ptr;
    hdr.ack_req = args.ack_req as u8;
    hdr.operand = args.operand;
    if let Some((op, ty)) = args.atomic {
        hdr.atom_op = op as u8;
        hdr.atom_type = ty as u8;
    }

    // A response is owed for every get-class operation, and for
    // put-class operations that asked for one.
    let needs_response = args.kind.is_get_class() || args.ack_req != AckReq::None;
    let token = if needs_response {
        let (reply_md, reply_offset) = match args.get_md {
            Some((get_md, get_offset)) => (get_md, get_offset),
            None => (args.md, args.local_offset),
        };
        ni.mds.get(reply_md)?.acquire();
        Some(ni.register_pending(InitOp {
            kind: args.kind,
            md: reply_md,
            local_offset: reply_offset,
            user_ptr: args.user_ptr,
            ack_req: args.ack_req,
        }))
    } else {
        None
    };
    if let Some(token) = token {
        hdr.token = token;
    }

    let mut payload = Vec::new();
    if args.kind.is_put_class() {
        payload = ni.bufs.get(args.length as usize);
        md.read(args.local_offset, args.length, &mut payload);
    }

    trace!(
        "submit {:?} len {} to rank {} pt {}",
        args.kind,
        args.length,
        args.target,
        args.pt_index
    );
    if let Err(err) = ni.transport.send(args.target, Buf::with_payload(hdr, payload)) {
        warn!("send to rank {} failed: {}", args.target, err);
        match token {
            Some(token) => fail_pending(ni, token, NiFail::Undeliverable),
            None => complete_md(ni, &md, EventKind::Send, NiFail::Undeliverable, 0, &args),
        }
        return Ok(());
    }

    // The payload is copied out at submission, so the send completes
    // immediately; gets complete only through their reply.
    if args.kind.is_put_class() {
        complete_md(ni, &md, EventKind::Send, NiFail::Ok, args.length, &args);
    }
    Ok(())
}

/// Send-side completion: counting-event increment and full event per
/// the descriptor options.
fn complete_md(
    ni: &NiInner,
    md: &Md,
    kind: EventKind,
    ni_fail: NiFail,
    length: u64,
    args: &OpArgs,
) {
    if let Some(ct) = md.ct {
        if md.options.contains(MdOptions::EVENT_CT_SEND) {
            let amount = if md.options.contains(MdOptions::EVENT_CT_BYTES) {
                length
            } else {
                1
            };
            if let Ok(ct) = ni.cts.get(ct) {
                ni.ct_mutate(&ct, |event| {
                    if ni_fail == NiFail::Ok {
                        event.success += amount;
                    } else {
                        event.failure += 1;
                    }
                });
            }
        }
    }
    if let Some(eq) = md.eq {
        if suppressed(md.options, ni_fail) {
            return;
        }
        ni.post_event(
            eq,
            crate::event::Event::initiator_event(kind, length, args.local_offset, args.user_ptr, ni_fail),
        );
    }
}

fn suppressed(options: MdOptions, ni_fail: NiFail) -> bool {
    if options.contains(MdOptions::EVENT_DISABLE) {
        return true;
    }
    options.contains(MdOptions::EVENT_SUCCESS_DISABLE) && ni_fail == NiFail::Ok
}

/// Handles an acknowledgement or reply frame from the target.
pub(crate) fn complete(ni: &NiInner, buf: Buf) {
    let hdr = buf.hdr;
    let Some(op) = ni.take_pending(hdr.token) else {
        warn!("response with unknown token {} from {}", hdr.token, hdr.src);
        return;
    };
    let md = match ni.mds.get(op.md) {
        Ok(md) => md,
        Err(_) => return,
    };

    match hdr.ty {
        HdrType::Ack => {
            let code = hdr.atom_op;
            let ni_fail = if code == ACK_PERM_VIOLATION {
                NiFail::PermViolation
            } else {
                NiFail::from_wire(hdr.fail)
            };
            let mlength = u64::from(hdr.length);
            // The operation is over before anything observable posts,
            // so a release racing the notification cannot see it
            // in flight.
            md.release();
            if code != ACK_SILENT {
                ct_completion(ni, &md, MdOptions::EVENT_CT_ACK, ni_fail, mlength);
                if op.ack_req == AckReq::Ack {
                    if let Some(eq) = md.eq {
                        if !suppressed(md.options, ni_fail) {
                            ni.post_event(
                                eq,
                                crate::event::Event::initiator_event(
                                    EventKind::Ack,
                                    mlength,
                                    op.local_offset,
                                    op.user_ptr,
                                    ni_fail,
                                ),
                            );
                        }
                    }
                }
            }
        }
        HdrType::Reply => {
            let ni_fail = NiFail::from_wire(hdr.fail);
            let mlength = buf.payload.len() as u64;
            if ni_fail == NiFail::Ok {
                if !md.window_ok(op.local_offset, mlength) {
                    // A reply can never legitimately outgrow the
                    // window it was validated against.
                    warn!("oversized reply ({} bytes) from {}", mlength, hdr.src);
                    md.release();
                    return;
                }
                md.write(op.local_offset, &buf.payload);
            }
            md.release();
            ct_completion(ni, &md, MdOptions::EVENT_CT_REPLY, ni_fail, mlength);
            if let Some(eq) = md.eq {
                if !suppressed(md.options, ni_fail) {
                    ni.post_event(
                        eq,
                        crate::event::Event::initiator_event(
                            EventKind::Reply,
                            mlength,
                            op.local_offset,
                            op.user_ptr,
                            ni_fail,
                        ),
                    );
                }
            }
        }
        _ => {
            warn!("unexpected response type {:?}", hdr.ty);
            md.release();
        }
    }
}

fn ct_completion(ni: &NiInner, md: &Md, mask: MdOptions, ni_fail: NiFail, mlength: u64) {
    if let Some(ct) = md.ct {
        if md.options.contains(mask) {
            let amount = if md.options.contains(MdOptions::EVENT_CT_BYTES) {
                mlength
            } else {
                1
            };
            if let Ok(ct) = ni.cts.get(ct) {
                ni.ct_mutate(&ct, |event| {
                    if ni_fail == NiFail::Ok {
                        event.success += amount;
                    } else {
                        event.failure += 1;
                    }
                });
            }
        }
    }
}

/// Fails a pending operation that will never see a response, e.g.
/// after connection retries are exhausted.
pub(crate) fn fail_pending(ni: &NiInner, token: u64, ni_fail: NiFail) {
    let Some(op) = ni.take_pending(token) else {
        return;
    };
    let Ok(md) = ni.mds.get(op.md) else { return };
    md.release();
    let mask = if op.kind.is_get_class() {
        MdOptions::EVENT_CT_REPLY
    } else {
        MdOptions::EVENT_CT_ACK
    };
    ct_completion(ni, &md, mask, ni_fail, 0);
    if let Some(eq) = md.eq {
        if !suppressed(md.options, ni_fail) {
            let kind = if op.kind.is_get_class() {
                EventKind::Reply
            } else {
                EventKind::Ack
            };
            ni.post_event(
                eq,
                crate::event::Event::initiator_event(kind, 0, op.local_offset, op.user_ptr, ni_fail),
            );
        }
    }
}

/// Queues an operation on its trigger counting event, or issues it
/// immediately when the threshold has already been reached.
pub(crate) fn submit_triggered(
    ni: &NiInner,
    action: TriggeredAction,
    trig_ct: Handle,
    threshold: u64,
) -> Result<()> {
    if let TriggeredAction::Op(args) = &action {
        validate_op(ni, args)?;
    }
    let ct = ni.cts.get(trig_ct)?;
    if !ni.triggered_reserve() {
        return Err(Error::NoSpace);
    }

    let mut action = Some(action);
    {
        let _wait = ni.ct_wait.mutex.lock().unwrap();
        let mut state = ct.state.lock().unwrap();
        if !state.event.reached(threshold) {
            state.queue_triggered(TriggeredOp {
                threshold,
                action: action.take().unwrap(),
            });
        }
    }
    // Threshold already reached: issue on the submitting thread, like
    // any other fired record.
    if let Some(action) = action {
        ni.triggered_release(1);
        crate::triggered::execute(ni, action);
    }
    Ok(())
}
