use portl::{
    AckReq, Error, EventKind, Handle, LeDesc, LeOptions, ListKind, MdDesc, MdOptions, MeDesc,
    NiFail, PtOptions, StatusRegister, UID_ANY,
};

mod util;

use util::{expect_event, expect_no_event, runtime, shm_ni};

fn me_desc(start: *mut u8, length: u64, match_bits: u64, options: LeOptions) -> MeDesc {
    MeDesc {
        start,
        length,
        ct: Handle::NONE,
        ac_id: UID_ANY,
        options,
        match_bits,
        ignore_bits: 0,
        min_free: 0,
    }
}

fn md_desc(start: *mut u8, length: u64, eq: Handle) -> MdDesc {
    MdDesc {
        start,
        length,
        iovecs: Vec::new(),
        options: MdOptions::empty(),
        eq,
        ct: Handle::NONE,
    }
}

#[test]
fn basic_put_with_ack() {
    let runtime = runtime(2);
    let ni0 = shm_ni(&runtime, 0, true);
    let ni1 = shm_ni(&runtime, 1, true);

    let teq = ni1.eq_alloc(16).unwrap();
    let pt = ni1.pt_alloc(Some(0), PtOptions::empty(), teq).unwrap();
    let mut landing = vec![0u8; 16];
    let me = unsafe {
        ni1.me_append(
            pt,
            &me_desc(landing.as_mut_ptr(), 16, 0x42, LeOptions::OP_PUT),
            ListKind::Priority,
            0,
        )
        .unwrap()
    };

    let ieq = ni0.eq_alloc(16).unwrap();
    let mut source: Vec<u8> = (0..16).collect();
    let md = unsafe { ni0.md_bind(&md_desc(source.as_mut_ptr(), 16, ieq)).unwrap() };

    ni0.put(md, 0, 16, AckReq::Ack, 1, pt, 0x42, 0, 99, 0xfeed)
        .unwrap();

    let send = expect_event(&ni0, ieq);
    assert_eq!(send.kind, EventKind::Send);
    assert_eq!(send.mlength, 16);

    let ack = expect_event(&ni0, ieq);
    assert_eq!(ack.kind, EventKind::Ack);
    assert_eq!(ack.ni_fail, NiFail::Ok);
    assert_eq!(ack.mlength, 16);
    assert_eq!(ack.user_ptr, 99);

    let put = expect_event(&ni1, teq);
    assert_eq!(put.kind, EventKind::Put);
    assert_eq!(put.initiator, 0);
    assert_eq!(put.rlength, 16);
    assert_eq!(put.mlength, 16);
    assert_eq!(put.match_bits, 0x42);
    assert_eq!(put.hdr_data, 0xfeed);
    assert_eq!(put.start, landing.as_ptr() as usize);

    assert_eq!(landing, (0..16).collect::<Vec<u8>>());

    ni1.le_unlink(me).unwrap();
    ni0.md_release(md).unwrap();
    ni0.fini();
    ni1.fini();
}

#[test]
fn use_once_entry_unlinks_after_delivery() {
    let runtime = runtime(2);
    let ni0 = shm_ni(&runtime, 0, true);
    let ni1 = shm_ni(&runtime, 1, true);

    let teq = ni1.eq_alloc(16).unwrap();
    let pt = ni1.pt_alloc(Some(0), PtOptions::empty(), teq).unwrap();
    let mut landing = vec![0u8; 8];
    let me = unsafe {
        ni1.me_append(
            pt,
            &me_desc(
                landing.as_mut_ptr(),
                8,
                1,
                LeOptions::OP_PUT | LeOptions::USE_ONCE,
            ),
            ListKind::Priority,
            0,
        )
        .unwrap()
    };

    let mut source = vec![0xabu8; 8];
    let md = unsafe {
        ni0.md_bind(&md_desc(source.as_mut_ptr(), 8, Handle::NONE))
            .unwrap()
    };
    ni0.put(md, 0, 8, AckReq::None, 1, pt, 1, 0, 0, 0).unwrap();

    let put = expect_event(&ni1, teq);
    assert_eq!(put.kind, EventKind::Put);
    let unlink = expect_event(&ni1, teq);
    assert_eq!(unlink.kind, EventKind::Unlink);

    // The entry is gone: unlinking again is an argument error, and a
    // second put has nothing to match.
    assert!(matches!(ni1.le_unlink(me), Err(Error::ArgInvalid)));

    ni0.fini();
    ni1.fini();
}

#[test]
fn permission_violation_reports_to_both_sides() {
    let runtime = runtime(2);
    let ni0 = shm_ni(&runtime, 0, true);
    let ni1 = shm_ni(&runtime, 1, true);

    let teq = ni1.eq_alloc(16).unwrap();
    let pt = ni1.pt_alloc(Some(0), PtOptions::empty(), teq).unwrap();
    let mut landing = vec![0u8; 16];
    // Get-only entry; a put must bounce.
    unsafe {
        ni1.me_append(
            pt,
            &me_desc(landing.as_mut_ptr(), 16, 0x7, LeOptions::OP_GET),
            ListKind::Priority,
            0,
        )
        .unwrap()
    };

    let ieq = ni0.eq_alloc(16).unwrap();
    let mut source = vec![1u8; 16];
    let md = unsafe { ni0.md_bind(&md_desc(source.as_mut_ptr(), 16, ieq)).unwrap() };
    ni0.put(md, 0, 16, AckReq::Ack, 1, pt, 0x7, 0, 0, 0).unwrap();

    let send = expect_event(&ni0, ieq);
    assert_eq!(send.kind, EventKind::Send);
    let ack = expect_event(&ni0, ieq);
    assert_eq!(ack.kind, EventKind::Ack);
    assert_eq!(ack.ni_fail, NiFail::PermViolation);

    assert_eq!(ni1.status(StatusRegister::PermViolations), 1);
    assert_eq!(landing, vec![0u8; 16]);

    ni0.fini();
    ni1.fini();
}

#[test]
fn overflow_absorbs_then_priority_append_drains() {
    let runtime = runtime(2);
    let ni0 = shm_ni(&runtime, 0, false);
    let ni1 = shm_ni(&runtime, 1, false);

    let teq = ni1.eq_alloc(16).unwrap();
    let pt = ni1.pt_alloc(Some(0), PtOptions::empty(), teq).unwrap();

    // Overflow entry with room for all four messages; its counting
    // event observes the captures.
    let absorbed = ni1.ct_alloc().unwrap();
    let mut overflow_buf = vec![0u8; 64];
    unsafe {
        ni1.le_append(
            pt,
            &LeDesc {
                start: overflow_buf.as_mut_ptr(),
                length: 64,
                ct: absorbed,
                ac_id: UID_ANY,
                options: LeOptions::OP_PUT | LeOptions::EVENT_CT_PUT_OVERFLOW,
            },
            ListKind::Overflow,
            0,
        )
        .unwrap()
    };

    let mut source: Vec<u8> = (0..64).collect();
    let md = unsafe {
        ni0.md_bind(&md_desc(source.as_mut_ptr(), 64, Handle::NONE))
            .unwrap()
    };
    for chunk in 0..4u64 {
        ni0.put(md, chunk * 16, 16, AckReq::None, 1, pt, 0, chunk * 16, 0, 0)
            .unwrap();
    }
    // All four captured by the overflow entry, none delivered as full
    // events yet.
    assert_eq!(ni1.ct_wait(absorbed, 4).unwrap().success, 4);
    expect_no_event(&ni1, teq);
    assert_eq!(overflow_buf, (0..64).collect::<Vec<u8>>());

    // A use-once priority append claims the oldest buffered message.
    let drained = ni1.ct_alloc().unwrap();
    let mut landing = vec![0u8; 16];
    unsafe {
        ni1.le_append(
            pt,
            &LeDesc {
                start: landing.as_mut_ptr(),
                length: 16,
                ct: drained,
                ac_id: UID_ANY,
                options: LeOptions::OP_PUT
                    | LeOptions::USE_ONCE
                    | LeOptions::EVENT_CT_PUT_OVERFLOW,
            },
            ListKind::Priority,
            0,
        )
        .unwrap()
    };

    let event = expect_event(&ni1, teq);
    assert_eq!(event.kind, EventKind::PutOverflow);
    // The event start points at where the bytes first landed, inside
    // the overflow entry.
    assert_eq!(event.start, overflow_buf.as_ptr() as usize);
    assert_eq!(event.mlength, 16);
    assert_eq!(ni1.ct_get(drained).unwrap().success, 1);

    ni0.fini();
    ni1.fini();
}

#[test]
fn persistent_append_over_buffered_headers_fails() {
    let runtime = runtime(2);
    let ni0 = shm_ni(&runtime, 0, false);
    let ni1 = shm_ni(&runtime, 1, false);

    let ack_eq = ni0.eq_alloc(16).unwrap();
    let pt = ni1.pt_alloc(Some(0), PtOptions::empty(), Handle::NONE).unwrap();

    // Nothing posted: the put is buffered as unexpected.
    let mut source = vec![9u8; 8];
    let md = unsafe { ni0.md_bind(&md_desc(source.as_mut_ptr(), 8, ack_eq)).unwrap() };
    ni0.put(md, 0, 8, AckReq::Ack, 1, pt, 0, 0, 0, 0).unwrap();
    let send = expect_event(&ni0, ack_eq);
    assert_eq!(send.kind, EventKind::Send);
    let ack = expect_event(&ni0, ack_eq);
    assert_eq!(ack.kind, EventKind::Ack);

    // A persistent priority entry cannot be appended over captured
    // headers.
    let mut landing = vec![0u8; 8];
    let result = unsafe {
        ni1.le_append(
            pt,
            &LeDesc {
                start: landing.as_mut_ptr(),
                length: 8,
                ct: Handle::NONE,
                ac_id: UID_ANY,
                options: LeOptions::OP_PUT,
            },
            ListKind::Priority,
            0,
        )
    };
    assert!(matches!(result, Err(Error::Fail)));

    // A use-once entry drains it instead.
    let teq = ni1.eq_alloc(4).unwrap();
    // Rebind the queue so the drain event is observable.
    // (The portal-table entry was allocated without one.)
    ni1.pt_free(pt).unwrap();
    let pt = ni1.pt_alloc(Some(1), PtOptions::empty(), teq).unwrap();
    ni0.put(md, 0, 8, AckReq::None, 1, pt, 0, 0, 0, 0).unwrap();
    std::thread::sleep(std::time::Duration::from_millis(100));
    unsafe {
        ni1.le_append(
            pt,
            &LeDesc {
                start: landing.as_mut_ptr(),
                length: 8,
                ct: Handle::NONE,
                ac_id: UID_ANY,
                options: LeOptions::OP_PUT | LeOptions::USE_ONCE,
            },
            ListKind::Priority,
            0,
        )
        .unwrap()
    };
    let event = expect_event(&ni1, teq);
    assert_eq!(event.kind, EventKind::PutOverflow);
    assert_eq!(event.start, landing.as_ptr() as usize);
    assert_eq!(landing, vec![9u8; 8]);

    ni0.fini();
    ni1.fini();
}

#[test]
fn probe_only_append_is_unimplemented() {
    let runtime = runtime(1);
    let ni = shm_ni(&runtime, 0, false);
    let pt = ni.pt_alloc(Some(0), PtOptions::empty(), Handle::NONE).unwrap();
    let mut buf = vec![0u8; 8];
    let result = unsafe {
        ni.le_append(
            pt,
            &LeDesc {
                start: buf.as_mut_ptr(),
                length: 8,
                ct: Handle::NONE,
                ac_id: UID_ANY,
                options: LeOptions::OP_PUT,
            },
            ListKind::ProbeOnly,
            0,
        )
    };
    assert!(matches!(result, Err(Error::Fail)));
    ni.fini();
}

#[test]
fn put_then_get_round_trips_bytes() {
    let runtime = runtime(2);
    let ni0 = shm_ni(&runtime, 0, false);
    let ni1 = shm_ni(&runtime, 1, false);

    let pt = ni1.pt_alloc(Some(0), PtOptions::empty(), Handle::NONE).unwrap();
    let mut region = vec![0u8; 32];
    unsafe {
        ni1.le_append(
            pt,
            &LeDesc {
                start: region.as_mut_ptr(),
                length: 32,
                ct: Handle::NONE,
                ac_id: UID_ANY,
                options: LeOptions::OP_PUT | LeOptions::OP_GET,
            },
            ListKind::Priority,
            0,
        )
        .unwrap()
    };

    let ieq = ni0.eq_alloc(16).unwrap();
    let mut outbound: Vec<u8> = (100..116).collect();
    let out_md = unsafe { ni0.md_bind(&md_desc(outbound.as_mut_ptr(), 16, ieq)).unwrap() };
    ni0.put(out_md, 0, 16, AckReq::Ack, 1, pt, 0, 4, 0, 0).unwrap();
    assert_eq!(expect_event(&ni0, ieq).kind, EventKind::Send);
    assert_eq!(expect_event(&ni0, ieq).kind, EventKind::Ack);

    let mut inbound = vec![0u8; 16];
    let in_md = unsafe { ni0.md_bind(&md_desc(inbound.as_mut_ptr(), 16, ieq)).unwrap() };
    ni0.get(in_md, 0, 16, 1, pt, 0, 4, 0).unwrap();
    let reply = expect_event(&ni0, ieq);
    assert_eq!(reply.kind, EventKind::Reply);
    assert_eq!(reply.ni_fail, NiFail::Ok);
    assert_eq!(reply.mlength, 16);
    assert_eq!(inbound, (100..116).collect::<Vec<u8>>());

    ni0.fini();
    ni1.fini();
}

#[test]
fn disabled_table_entry_drops_and_counts() {
    let runtime = runtime(2);
    let ni0 = shm_ni(&runtime, 0, false);
    let ni1 = shm_ni(&runtime, 1, false);

    let ieq = ni0.eq_alloc(16).unwrap();
    let pt = ni1.pt_alloc(Some(0), PtOptions::empty(), Handle::NONE).unwrap();
    ni1.pt_disable(pt).unwrap();

    let mut source = vec![5u8; 8];
    let md = unsafe { ni0.md_bind(&md_desc(source.as_mut_ptr(), 8, ieq)).unwrap() };
    ni0.put(md, 0, 8, AckReq::Ack, 1, pt, 0, 0, 0, 0).unwrap();

    // Only the send event: the drop is silent on the initiator side.
    assert_eq!(expect_event(&ni0, ieq).kind, EventKind::Send);
    expect_no_event(&ni0, ieq);

    // Give the target a moment, then check the register.
    std::thread::sleep(std::time::Duration::from_millis(100));
    assert_eq!(ni1.status(StatusRegister::DropCount), 1);

    ni0.fini();
    ni1.fini();
}

#[test]
fn atomic_sum_applies_at_target() {
    let runtime = runtime(2);
    let ni0 = shm_ni(&runtime, 0, false);
    let ni1 = shm_ni(&runtime, 1, false);

    let pt = ni1.pt_alloc(Some(0), PtOptions::empty(), Handle::NONE).unwrap();
    let mut counters = vec![0u8; 16];
    counters[..8].copy_from_slice(&10u64.to_le_bytes());
    counters[8..].copy_from_slice(&20u64.to_le_bytes());
    unsafe {
        ni1.le_append(
            pt,
            &LeDesc {
                start: counters.as_mut_ptr(),
                length: 16,
                ct: Handle::NONE,
                ac_id: UID_ANY,
                options: LeOptions::OP_PUT | LeOptions::OP_GET,
            },
            ListKind::Priority,
            0,
        )
        .unwrap()
    };

    let ieq = ni0.eq_alloc(16).unwrap();
    let mut operand = vec![0u8; 16];
    operand[..8].copy_from_slice(&5u64.to_le_bytes());
    operand[8..].copy_from_slice(&7u64.to_le_bytes());
    let md = unsafe { ni0.md_bind(&md_desc(operand.as_mut_ptr(), 16, ieq)).unwrap() };
    ni0.atomic(
        md,
        0,
        16,
        AckReq::Ack,
        1,
        pt,
        0,
        0,
        0,
        0,
        portl::AtomicOp::Sum,
        portl::AtomicType::U64,
    )
    .unwrap();
    assert_eq!(expect_event(&ni0, ieq).kind, EventKind::Send);
    assert_eq!(expect_event(&ni0, ieq).kind, EventKind::Ack);

    assert_eq!(u64::from_le_bytes(counters[..8].try_into().unwrap()), 15);
    assert_eq!(u64::from_le_bytes(counters[8..].try_into().unwrap()), 27);

    ni0.fini();
    ni1.fini();
}

#[test]
fn fetch_atomic_returns_prior_value() {
    let runtime = runtime(2);
    let ni0 = shm_ni(&runtime, 0, false);
    let ni1 = shm_ni(&runtime, 1, false);

    let pt = ni1.pt_alloc(Some(0), PtOptions::empty(), Handle::NONE).unwrap();
    let mut cell = 100u64.to_le_bytes().to_vec();
    unsafe {
        ni1.le_append(
            pt,
            &LeDesc {
                start: cell.as_mut_ptr(),
                length: 8,
                ct: Handle::NONE,
                ac_id: UID_ANY,
                options: LeOptions::OP_PUT | LeOptions::OP_GET,
            },
            ListKind::Priority,
            0,
        )
        .unwrap()
    };

    let ieq = ni0.eq_alloc(16).unwrap();
    let mut addend = 11u64.to_le_bytes().to_vec();
    let put_md = unsafe { ni0.md_bind(&md_desc(addend.as_mut_ptr(), 8, Handle::NONE)).unwrap() };
    let mut fetched = vec![0u8; 8];
    let get_md = unsafe { ni0.md_bind(&md_desc(fetched.as_mut_ptr(), 8, ieq)).unwrap() };

    ni0.fetch_atomic(
        get_md,
        0,
        put_md,
        0,
        8,
        1,
        pt,
        0,
        0,
        0,
        0,
        portl::AtomicOp::Sum,
        portl::AtomicType::U64,
    )
    .unwrap();

    // The reply carries the prior contents into the get descriptor.
    assert_eq!(expect_event(&ni0, ieq).kind, EventKind::Reply);
    assert_eq!(u64::from_le_bytes(fetched.clone().try_into().unwrap()), 100);
    assert_eq!(u64::from_le_bytes(cell.clone().try_into().unwrap()), 111);

    ni0.fini();
    ni1.fini();
}
