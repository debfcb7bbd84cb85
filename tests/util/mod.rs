// Not all helpers are used by all tests.
#![allow(dead_code)]

use std::sync::Once;

use portl::{
    Config, Error, Event, Handle, Ni, NiDesc, NiOptions, Runtime,
};

pub fn init() {
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

pub fn runtime(num_procs: u32) -> Runtime {
    init();
    Runtime::init(Config::standalone(num_procs)).expect("unable to create runtime")
}

/// A shared-memory interface on `runtime` for the given rank.
pub fn shm_ni(runtime: &Runtime, rank: u32, matching: bool) -> Ni {
    let options = if matching {
        NiOptions::MATCHING
    } else {
        NiOptions::empty()
    };
    runtime
        .ni_init(NiDesc {
            rank,
            options,
            ..NiDesc::default()
        })
        .expect("unable to create interface")
}

/// Blocks until `eq` produces an event, with a generous deadline so a
/// stuck progress path fails the test instead of hanging it.
pub fn expect_event(ni: &Ni, eq: Handle) -> Event {
    let (_, event) = ni
        .eq_poll(&[eq], Some(5_000))
        .expect("expected an event within the deadline");
    event
}

/// Asserts the queue stays quiet for a little while.
pub fn expect_no_event(ni: &Ni, eq: Handle) {
    match ni.eq_poll(&[eq], Some(50)) {
        Err(Error::EqEmpty) => {}
        other => panic!("expected no event, got {:?}", other),
    }
}

pub fn assert_send<T: Send>() {}
pub fn assert_sync<T: Sync>() {}
