use std::collections::VecDeque;
use std::io::{self, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use log::trace;

use crate::buf::Buf;
use crate::proto::HDR_LEN;

/// How many times each connection stage is retried before the peer is
/// declared unreachable.
pub(crate) const CONNECT_RETRIES: u32 = 3;

/// Lifecycle of one peer connection, driven by connection-manager
/// events.
///
/// ```text
/// Disconnected -> ResolvingAddr -> ResolvingRoute -> Connecting -> Connected
///       ^                                                             |
///       +-------------------------------------------------------------
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnState {
    Disconnected,
    ResolvingAddr,
    ResolvingRoute,
    Connecting,
    Connected,
}

/// One peer connection: state, the established stream, and the work
/// parked while the connection was still coming up.
///
/// `state` also guards the parked lists, so a submitter deciding
/// between "write now" and "park" cannot race the establishment drain.
pub(crate) struct Conn {
    pub(crate) peer: u32,
    pub(crate) token: u64,
    pub(crate) state: Mutex<ConnState>,
    pub(crate) stream: Mutex<Option<TcpStream>>,
    pub(crate) pending_init: Mutex<VecDeque<Buf>>,
    pub(crate) pending_tgt: Mutex<VecDeque<Buf>>,
    pub(crate) rx: Mutex<RxState>,
    pub(crate) attempts: AtomicU32,
}

pub(crate) struct RxState {
    pub(crate) data: Vec<u8>,
    /// Whether the peer's 4-byte rank greeting has been consumed.
    pub(crate) greeted: bool,
    pub(crate) peer: u32,
}

impl Conn {
    pub(crate) fn new(peer: u32, token: u64) -> Conn {
        Conn {
            peer,
            token,
            state: Mutex::new(ConnState::Disconnected),
            stream: Mutex::new(None),
            pending_init: Mutex::new(VecDeque::new()),
            pending_tgt: Mutex::new(VecDeque::new()),
            rx: Mutex::new(RxState {
                data: Vec::new(),
                greeted: false,
                peer,
            }),
            attempts: AtomicU32::new(0),
        }
    }

    /// Inbound connections arrive established; the peer identity comes
    /// from its greeting.
    pub(crate) fn accepted(token: u64, stream: TcpStream) -> Conn {
        let conn = Conn::new(u32::MAX, token);
        *conn.state.lock().unwrap() = ConnState::Connected;
        *conn.stream.lock().unwrap() = Some(stream);
        conn
    }

    pub(crate) fn set_state(&self, state: ConnState) {
        trace!("conn {} (peer {}): -> {:?}", self.token, self.peer, state);
        *self.state.lock().unwrap() = state;
    }

    pub(crate) fn next_attempt(&self) -> u32 {
        self.attempts.fetch_add(1, Ordering::SeqCst)
    }

    /// Serializes and writes one frame.
    ///
    /// The stream is non-blocking; a full socket buffer is retried with
    /// a small sleep, which is where a sender suspends when the peer
    /// stops draining its receive side.
    pub(crate) fn write_frame(&self, buf: &Buf) -> io::Result<()> {
        let mut frame = Vec::with_capacity(HDR_LEN + buf.payload.len());
        frame.resize(HDR_LEN, 0);
        buf.hdr.encode(&mut frame);
        frame.extend_from_slice(&buf.payload);

        let guard = self.stream.lock().unwrap();
        let mut stream = guard
            .as_ref()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))?;
        let mut written = 0;
        while written < frame.len() {
            match stream.write(&frame[written..]) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero)),
                Ok(n) => written += n,
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(1));
                }
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }
}
