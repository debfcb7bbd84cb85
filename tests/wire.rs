use portl::{
    AckReq, EventKind, Handle, Iface, LeDesc, LeOptions, ListKind, MdDesc, MdOptions, Ni,
    NiDesc, NiFail, PtOptions, Runtime, UID_ANY,
};

mod util;

use util::{expect_event, init, runtime};

fn wire_ni(runtime: &Runtime, rank: u32) -> Ni {
    runtime
        .ni_init(NiDesc {
            rank,
            iface: Iface::Wire {
                listen: "127.0.0.1:0".parse().unwrap(),
            },
            ..NiDesc::default()
        })
        .expect("unable to create wire interface")
}

fn bind(ni: &Ni, buf: &mut [u8], eq: Handle) -> Handle {
    unsafe {
        ni.md_bind(&MdDesc {
            start: buf.as_mut_ptr(),
            length: buf.len() as u64,
            iovecs: Vec::new(),
            options: MdOptions::empty(),
            eq,
            ct: Handle::NONE,
        })
        .unwrap()
    }
}

#[test]
fn put_and_get_across_the_wire() {
    init();
    let runtime = runtime(2);
    let ni0 = wire_ni(&runtime, 0);
    let ni1 = wire_ni(&runtime, 1);
    ni0.set_peer(1, ni1.listen_addr().unwrap()).unwrap();
    ni1.set_peer(0, ni0.listen_addr().unwrap()).unwrap();

    let teq = ni1.eq_alloc(16).unwrap();
    let pt = ni1.pt_alloc(Some(0), PtOptions::empty(), teq).unwrap();
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
    let mut outbound: Vec<u8> = (0..32).collect();
    let out_md = bind(&ni0, &mut outbound, ieq);
    ni0.put(out_md, 0, 32, AckReq::Ack, 1, pt, 0, 0, 0, 0).unwrap();

    assert_eq!(expect_event(&ni0, ieq).kind, EventKind::Send);
    let ack = expect_event(&ni0, ieq);
    assert_eq!(ack.kind, EventKind::Ack);
    assert_eq!(ack.ni_fail, NiFail::Ok);
    let put = expect_event(&ni1, teq);
    assert_eq!(put.kind, EventKind::Put);
    assert_eq!(put.mlength, 32);
    assert_eq!(region, (0..32).collect::<Vec<u8>>());

    // Read the bytes back over the same connection.
    let mut inbound = vec![0u8; 32];
    let in_md = bind(&ni0, &mut inbound, ieq);
    ni0.get(in_md, 0, 32, 1, pt, 0, 0, 0).unwrap();
    let reply = expect_event(&ni0, ieq);
    assert_eq!(reply.kind, EventKind::Reply);
    assert_eq!(reply.mlength, 32);
    assert_eq!(inbound, (0..32).collect::<Vec<u8>>());

    ni0.fini();
    ni1.fini();
}

#[test]
fn unknown_peer_surfaces_undeliverable() {
    init();
    let runtime = runtime(2);
    let ni0 = wire_ni(&runtime, 0);

    let ieq = ni0.eq_alloc(16).unwrap();
    let mut source = vec![1u8; 8];
    let md = bind(&ni0, &mut source, ieq);
    // Rank 9 has no recorded address; resolution retries, then the
    // parked operation fails with an undeliverable acknowledgement.
    ni0.put(md, 0, 8, AckReq::Ack, 9, 0, 0, 0, 0, 0).unwrap();

    assert_eq!(expect_event(&ni0, ieq).kind, EventKind::Send);
    let ack = expect_event(&ni0, ieq);
    assert_eq!(ack.kind, EventKind::Ack);
    assert_eq!(ack.ni_fail, NiFail::Undeliverable);

    ni0.fini();
}

#[test]
fn connection_established_once_and_reused() {
    init();
    let runtime = runtime(2);
    let ni0 = wire_ni(&runtime, 0);
    let ni1 = wire_ni(&runtime, 1);
    ni0.set_peer(1, ni1.listen_addr().unwrap()).unwrap();
    ni1.set_peer(0, ni0.listen_addr().unwrap()).unwrap();

    let teq = ni1.eq_alloc(64).unwrap();
    let pt = ni1.pt_alloc(Some(0), PtOptions::empty(), teq).unwrap();
    let mut region = vec![0u8; 256];
    unsafe {
        ni1.le_append(
            pt,
            &LeDesc {
                start: region.as_mut_ptr(),
                length: 256,
                ct: Handle::NONE,
                ac_id: UID_ANY,
                options: LeOptions::OP_PUT,
            },
            ListKind::Priority,
            0,
        )
        .unwrap()
    };

    let mut source: Vec<u8> = (0..=255).collect();
    let md = bind(&ni0, &mut source, Handle::NONE);
    // A burst over one connection keeps submission order.
    for chunk in 0..8u64 {
        ni0.put(md, chunk * 32, 32, AckReq::None, 1, pt, 0, chunk * 32, chunk, 0)
            .unwrap();
    }
    for chunk in 0..8u64 {
        let event = expect_event(&ni1, teq);
        assert_eq!(event.kind, EventKind::Put);
        assert_eq!(event.user_ptr, chunk);
    }
    assert_eq!(region, (0..=255).collect::<Vec<u8>>());

    ni0.fini();
    ni1.fini();
}
