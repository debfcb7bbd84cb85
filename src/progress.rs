//! The progress loop: drains the interface's internal queue, runs the
//! matching engine for requests, routes responses to the initiator
//! bookkeeping, and recycles released carriers.
//!
//! Both transports feed the same queue: the wire event loop forwards
//! parsed frames here, and shared-memory peers enqueue directly. One or
//! more workers share the receiving end.

use std::sync::atomic::Ordering;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{trace, warn};

use crate::buf::Buf;
use crate::deliver::{self, Disposition};
use crate::initiator;
use crate::ni::NiInner;
use crate::options::AckReq;
use crate::proto::{Header, HdrType, ACK_SILENT};
use crate::transport::TransportKind;

/// How many frames one wakeup handles before checking for shutdown.
const BATCH: usize = 16;

/// Body of one progress worker.
pub(crate) fn progress_loop(ni: Arc<NiInner>, rx: Arc<Mutex<Receiver<Buf>>>) {
    loop {
        if ni.shutdown.load(Ordering::SeqCst) {
            return;
        }
        // Workers take turns on the queue; the lock is only held while
        // dequeuing so several workers can be in `handle` at once.
        let first = {
            let rx = rx.lock().unwrap();
            rx.recv_timeout(Duration::from_millis(1))
        };
        let mut buf = match first {
            Ok(buf) => buf,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return,
        };
        for _ in 0..BATCH {
            handle(&ni, buf);
            let next = {
                let rx = rx.lock().unwrap();
                rx.try_recv()
            };
            match next {
                Ok(more) => buf = more,
                Err(_) => break,
            }
        }
    }
}

fn handle(ni: &NiInner, buf: Buf) {
    match buf.hdr.ty {
        HdrType::Put | HdrType::Get | HdrType::Atomic | HdrType::FetchAtomic | HdrType::Swap => {
            incoming(ni, buf)
        }
        HdrType::Ack | HdrType::Reply => initiator::complete(ni, buf),
        HdrType::Release => ni.bufs.put(buf.payload),
    }
}

/// Runs the matching engine for one arrival and sends whatever the
/// target owes back.
fn incoming(ni: &NiInner, mut buf: Buf) {
    let hdr = buf.hdr;
    let disposition = deliver::deliver(ni, &hdr, &buf.payload);
    trace!("delivered {:?} from {}: {:?}", hdr.ty, hdr.src, disposition);

    match disposition {
        Disposition::Reply {
            fail,
            payload,
            mlength,
        } => {
            let mut reply = Header::new(HdrType::Reply);
            reply.ni = hdr.ni;
            reply.src = ni.rank;
            reply.token = hdr.token;
            reply.fail = fail.to_wire();
            debug_assert_eq!(mlength, payload.len() as u64);
            reply.length = payload.len() as u32;
            let mut out = Buf::with_payload(reply, payload);
            out.via = buf.via;
            if let Err(err) = ni.transport.respond(hdr.src, out) {
                warn!("reply to rank {} failed: {}", hdr.src, err);
            }
        }
        Disposition::Ack { code, mlength } => {
            send_ack(ni, &buf, code, mlength);
        }
        Disposition::Silent => {
            // A requested acknowledgement still completes the
            // initiator's bookkeeping, it just carries the silent code
            // and produces no event there.
            send_ack(ni, &buf, ACK_SILENT, 0);
        }
    }

    // Shared-memory carriers travel back to the sender for release so
    // its fragment pool sees the buffer again.
    if ni.transport.kind() == TransportKind::Shm {
        buf.hdr.ty = HdrType::Release;
        let payload = std::mem::take(&mut buf.payload);
        let release = Buf::with_payload(buf.hdr, payload);
        let _ = ni.transport.respond(hdr.src, release);
    } else {
        ni.bufs.put(buf.payload);
    }
}

fn send_ack(ni: &NiInner, request: &Buf, code: u8, mlength: u64) {
    let hdr = request.hdr;
    if hdr.token == 0 || AckReq::from_wire(hdr.ack_req) == Some(AckReq::None) {
        return;
    }
    let mut ack = Header::new(HdrType::Ack);
    ack.ni = hdr.ni;
    ack.src = ni.rank;
    ack.token = hdr.token;
    ack.atom_op = code;
    ack.length = mlength as u32;
    let mut out = Buf::new(ack);
    out.via = request.via;
    if let Err(err) = ni.transport.respond(hdr.src, out) {
        warn!("ack to rank {} failed: {}", hdr.src, err);
    }
}
