use std::thread;
use std::time::{Duration, Instant};

use portl::{
    AckReq, CtEvent, Error, EventKind, Handle, LeDesc, LeOptions, ListKind, MdDesc, MdOptions,
    Ni, PtOptions, UID_ANY,
};

mod util;

use util::{expect_event, expect_no_event, runtime, shm_ni};

/// Target-side fixture: a posted 16-byte entry with an event queue.
fn target(ni: &Ni, landing: &mut [u8]) -> (u32, Handle) {
    let eq = ni.eq_alloc(16).unwrap();
    let pt = ni.pt_alloc(Some(0), PtOptions::empty(), eq).unwrap();
    unsafe {
        ni.le_append(
            pt,
            &LeDesc {
                start: landing.as_mut_ptr(),
                length: landing.len() as u64,
                ct: Handle::NONE,
                ac_id: UID_ANY,
                options: LeOptions::OP_PUT,
            },
            ListKind::Priority,
            0,
        )
        .unwrap()
    };
    (pt, eq)
}

fn bind(ni: &Ni, buf: &mut [u8]) -> Handle {
    unsafe {
        ni.md_bind(&MdDesc {
            start: buf.as_mut_ptr(),
            length: buf.len() as u64,
            iovecs: Vec::new(),
            options: MdOptions::empty(),
            eq: Handle::NONE,
            ct: Handle::NONE,
        })
        .unwrap()
    }
}

#[test]
fn set_then_get_round_trips() {
    let runtime = runtime(1);
    let ni = shm_ni(&runtime, 0, false);
    let ct = ni.ct_alloc().unwrap();
    ni.ct_set(
        ct,
        CtEvent {
            success: 11,
            failure: 3,
        },
    )
    .unwrap();
    assert_eq!(
        ni.ct_get(ct).unwrap(),
        CtEvent {
            success: 11,
            failure: 3
        }
    );
    ni.ct_free(ct).unwrap();
    assert!(matches!(ni.ct_get(ct), Err(Error::ArgInvalid)));
    ni.fini();
}

#[test]
fn wait_returns_when_threshold_already_reached() {
    let runtime = runtime(1);
    let ni = shm_ni(&runtime, 0, false);
    let ct = ni.ct_alloc().unwrap();
    ni.ct_inc(
        ct,
        CtEvent {
            success: 2,
            failure: 1,
        },
    )
    .unwrap();
    let event = ni.ct_wait(ct, 3).unwrap();
    assert_eq!(event.success, 2);
    assert_eq!(event.failure, 1);
    ni.fini();
}

#[test]
fn triggered_put_fires_at_threshold() {
    let runtime = runtime(2);
    let ni0 = shm_ni(&runtime, 0, false);
    let ni1 = shm_ni(&runtime, 1, false);

    let mut landing = vec![0u8; 16];
    let (pt, teq) = target(&ni1, &mut landing);

    let mut source = vec![0x5au8; 16];
    let md = bind(&ni0, &mut source);
    let trigger = ni0.ct_alloc().unwrap();
    ni0.triggered_put(md, 0, 16, AckReq::None, 1, pt, 0, 0, 0, 0, trigger, 3)
        .unwrap();

    // Two of three: nothing moves.
    ni0.ct_inc(
        trigger,
        CtEvent {
            success: 2,
            failure: 0,
        },
    )
    .unwrap();
    expect_no_event(&ni1, teq);

    // The crossing increment releases the put, and a waiter unblocked
    // by the same increment observes the final value.
    let waiter = {
        let ni0 = ni0.clone();
        thread::spawn(move || ni0.ct_wait(trigger, 3))
    };
    ni0.ct_inc(
        trigger,
        CtEvent {
            success: 1,
            failure: 0,
        },
    )
    .unwrap();
    let event = waiter.join().unwrap().unwrap();
    assert_eq!(event.success, 3);
    assert_eq!(event.failure, 0);

    let put = expect_event(&ni1, teq);
    assert_eq!(put.kind, EventKind::Put);
    assert_eq!(landing, vec![0x5au8; 16]);

    ni0.fini();
    ni1.fini();
}

#[test]
fn triggered_ops_fire_in_threshold_order() {
    let runtime = runtime(2);
    let ni0 = shm_ni(&runtime, 0, false);
    let ni1 = shm_ni(&runtime, 1, false);

    let mut landing = vec![0u8; 16];
    let (pt, teq) = target(&ni1, &mut landing);

    let mut source = vec![1u8; 8];
    let md = bind(&ni0, &mut source);
    let trigger = ni0.ct_alloc().unwrap();
    // Submitted high-threshold first; must still fire after the lower
    // one.
    ni0.triggered_put(md, 0, 8, AckReq::None, 1, pt, 0, 0, 222, 0, trigger, 2)
        .unwrap();
    ni0.triggered_put(md, 0, 8, AckReq::None, 1, pt, 0, 8, 111, 0, trigger, 1)
        .unwrap();

    ni0.ct_inc(
        trigger,
        CtEvent {
            success: 2,
            failure: 0,
        },
    )
    .unwrap();

    let first = expect_event(&ni1, teq);
    let second = expect_event(&ni1, teq);
    assert_eq!(first.user_ptr, 111);
    assert_eq!(second.user_ptr, 222);

    ni0.fini();
    ni1.fini();
}

#[test]
fn cancel_discards_pending_triggered_ops() {
    let runtime = runtime(2);
    let ni0 = shm_ni(&runtime, 0, false);
    let ni1 = shm_ni(&runtime, 1, false);

    let mut landing = vec![0u8; 16];
    let (pt, teq) = target(&ni1, &mut landing);

    let mut source = vec![7u8; 8];
    let md = bind(&ni0, &mut source);
    let trigger = ni0.ct_alloc().unwrap();
    ni0.triggered_put(md, 0, 8, AckReq::None, 1, pt, 0, 0, 0, 0, trigger, 5)
        .unwrap();
    ni0.ct_cancel_triggered(trigger).unwrap();
    ni0.ct_inc(
        trigger,
        CtEvent {
            success: 5,
            failure: 0,
        },
    )
    .unwrap();
    expect_no_event(&ni1, teq);

    ni0.fini();
    ni1.fini();
}

#[test]
fn triggered_ct_inc_chains() {
    let runtime = runtime(1);
    let ni = shm_ni(&runtime, 0, false);
    let first = ni.ct_alloc().unwrap();
    let second = ni.ct_alloc().unwrap();

    ni.triggered_ct_inc(
        second,
        CtEvent {
            success: 10,
            failure: 0,
        },
        first,
        2,
    )
    .unwrap();
    assert_eq!(ni.ct_get(second).unwrap().success, 0);

    ni.ct_inc(
        first,
        CtEvent {
            success: 2,
            failure: 0,
        },
    )
    .unwrap();
    assert_eq!(ni.ct_get(second).unwrap().success, 10);
    ni.fini();
}

#[test]
fn poll_times_out_then_sees_late_increment() {
    let runtime = runtime(1);
    let ni = shm_ni(&runtime, 0, false);
    let a = ni.ct_alloc().unwrap();
    let b = ni.ct_alloc().unwrap();

    let started = Instant::now();
    let result = ni.ct_poll(&[a, b], &[5, 5], Some(100));
    assert!(matches!(result, Err(Error::CtNoneReached)));
    assert!(started.elapsed() >= Duration::from_millis(100));

    let incrementer = {
        let ni = ni.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            ni.ct_inc(
                b,
                CtEvent {
                    success: 5,
                    failure: 0,
                },
            )
            .unwrap();
        })
    };
    let (which, event) = ni.ct_poll(&[a, b], &[5, 5], Some(2_000)).unwrap();
    assert_eq!(which, 1);
    assert_eq!(event.success, 5);
    assert_eq!(event.failure, 0);
    incrementer.join().unwrap();
    ni.fini();
}

#[test]
fn teardown_interrupts_waiters() {
    let runtime = runtime(1);
    let ni = shm_ni(&runtime, 0, false);
    let ct = ni.ct_alloc().unwrap();

    let waiter = {
        let ni = ni.clone();
        thread::spawn(move || ni.ct_wait(ct, 1 << 30))
    };
    let poller = {
        let ni = ni.clone();
        thread::spawn(move || ni.ct_poll(&[ct], &[1 << 30], None))
    };
    thread::sleep(Duration::from_millis(50));
    ni.fini();

    assert!(matches!(waiter.join().unwrap(), Err(Error::Interrupted)));
    assert!(matches!(poller.join().unwrap(), Err(Error::Interrupted)));
}

#[test]
fn bound_ct_counts_deliveries_in_bytes() {
    let runtime = runtime(2);
    let ni0 = shm_ni(&runtime, 0, false);
    let ni1 = shm_ni(&runtime, 1, false);

    let pt = ni1
        .pt_alloc(Some(0), PtOptions::empty(), Handle::NONE)
        .unwrap();
    let delivered = ni1.ct_alloc().unwrap();
    let mut landing = vec![0u8; 64];
    unsafe {
        ni1.le_append(
            pt,
            &LeDesc {
                start: landing.as_mut_ptr(),
                length: 64,
                ct: delivered,
                ac_id: UID_ANY,
                options: LeOptions::OP_PUT
                    | LeOptions::EVENT_CT_PUT
                    | LeOptions::EVENT_CT_BYTES,
            },
            ListKind::Priority,
            0,
        )
        .unwrap()
    };

    let mut source = vec![2u8; 48];
    let md = bind(&ni0, &mut source);
    ni0.put(md, 0, 48, AckReq::None, 1, pt, 0, 0, 0, 0).unwrap();

    let event = ni1.ct_wait(delivered, 48).unwrap();
    assert_eq!(event.success, 48);

    ni0.fini();
    ni1.fini();
}
