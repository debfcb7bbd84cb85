use std::path::PathBuf;
use std::time::{Duration, Instant};

use portl::ppe::{PpeClient, PpeConfig, PpeServer};
use portl::{Error, LeOptions};

mod util;

fn socket_path(tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!("portl-ppe-test-{}-{}", tag, std::process::id()))
}

fn start(tag: &str) -> (PpeServer, PpeClient) {
    util::init();
    let socket = socket_path(tag);
    let server = PpeServer::start(PpeConfig {
        socket: socket.clone(),
        nppebufs: 8,
        nprogthreads: 1,
        ..PpeConfig::default()
    })
    .expect("unable to start engine");
    let client =
        PpeClient::connect(&socket, std::process::id(), 1).expect("unable to connect client");
    (server, client)
}

#[test]
fn rejects_bad_configuration() {
    util::init();
    assert!(matches!(
        PpeServer::start(PpeConfig {
            nppebufs: 0,
            ..PpeConfig::default()
        }),
        Err(Error::ArgInvalid)
    ));
    assert!(matches!(
        PpeServer::start(PpeConfig {
            nprogthreads: 99,
            ..PpeConfig::default()
        }),
        Err(Error::ArgInvalid)
    ));
}

#[test]
fn command_queue_round_trip() {
    let (server, client) = start("basic");

    let (ni, _rank) = client.ni_init().unwrap();
    let ct = client.ct_alloc(ni).unwrap();
    client.ct_inc(ni, ct, 3, 1).unwrap();
    assert_eq!(client.ct_get(ni, ct).unwrap(), (3, 1));
    client.ct_set(ni, ct, 7, 0).unwrap();
    assert_eq!(client.ct_get(ni, ct).unwrap(), (7, 0));

    let pt = client.pt_alloc(ni, Some(5), 0).unwrap();
    assert_eq!(pt, 5);
    client.pt_free(ni, pt).unwrap();

    // Errors travel back as status codes.
    assert!(matches!(
        client.ct_get(ni, u64::MAX),
        Err(Error::ArgInvalid)
    ));

    client.ct_free(ni, ct).unwrap();
    client.ni_fini(ni).unwrap();
    server.stop();
}

#[test]
fn hosted_interfaces_move_data_through_the_segment() {
    let (server, client) = start("data");

    let (ni_a, _) = client.ni_init().unwrap();
    let (ni_b, rank_b) = client.ni_init().unwrap();

    // Target: entry over segment bytes [64, 80); initiator: descriptor
    // over [0, 16).
    let eq = client.eq_alloc(ni_b, 16).unwrap();
    let pt = client.pt_alloc(ni_b, Some(0), eq).unwrap();
    client
        .le_append(ni_b, pt, 64, 16, LeOptions::OP_PUT.bits(), 0, 0)
        .unwrap();

    let pattern: Vec<u8> = (0..16).map(|byte| byte * 3).collect();
    client.write_data(0, &pattern);
    let md = client.md_bind(ni_a, 0, 16, 0, 0, 0).unwrap();
    client
        .put(ni_a, md, 0, 16, 0, rank_b, pt, 0, 0, 0)
        .unwrap();

    // The delivery is asynchronous; poll the hosted event queue.
    let deadline = Instant::now() + Duration::from_secs(5);
    let event = loop {
        match client.eq_get(ni_b, eq) {
            Ok(event) => break event,
            Err(Error::EqEmpty) => {
                assert!(Instant::now() < deadline, "no delivery event");
                std::thread::sleep(Duration::from_millis(10));
            }
            Err(err) => panic!("eq_get failed: {}", err),
        }
    };
    // (kind, mlength, match_bits); kind 1 is a put delivery.
    assert_eq!(event.0, 1);
    assert_eq!(event.1, 16);

    let mut landed = vec![0u8; 16];
    client.read_data(64, &mut landed);
    assert_eq!(landed, pattern);

    client.ni_fini(ni_a).unwrap();
    client.ni_fini(ni_b).unwrap();
    server.stop();
}
