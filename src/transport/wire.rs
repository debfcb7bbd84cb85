//! The wire transport: framed streams over the node interconnect,
//! driven by a connection-manager event loop.
//!
//! One engine per interface owns the listener, the readiness selector,
//! and every peer connection. Application threads submit frames from
//! their own context; the event loop harvests inbound frames and feeds
//! them to the interface's internal queue, where the progress thread
//! dispatches them.

use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use log::{debug, error, trace, warn};

use crate::buf::Buf;
use crate::conn::{Conn, ConnState, CONNECT_RETRIES};
use crate::event::NiFail;
use crate::proto::{Header, HdrType, ACK_OK, HDR_LEN};
use crate::sys::{self, Selector, SelectorEvents, Waker};
use crate::transport::{Transport, TransportKind};
use crate::{Error, Result};

const TOKEN_LISTENER: u64 = 0;
const TOKEN_WAKER: u64 = 1;
const TOKEN_FIRST_CONN: u64 = 2;

/// Payload sent inline with the header; larger transfers would move to
/// descriptor-chained DMA on an offloading fabric.
const WIRE_INLINE_MAX: usize = 512;

fn backoff(attempt: u32) -> Duration {
    Duration::from_millis(10u64 << attempt.min(6))
}

/// Connection-manager events, posted to the event loop by connector
/// threads and submitters.
enum CmEvent {
    Dial(u64),
    Established(u64, TcpStream),
    Unreachable(u64),
}

pub(crate) struct WireTransport {
    engine: Arc<WireEngine>,
}

impl WireTransport {
    pub(crate) fn new(engine: Arc<WireEngine>) -> WireTransport {
        WireTransport { engine }
    }
}

impl Transport for WireTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Wire
    }

    fn max_inline(&self) -> usize {
        WIRE_INLINE_MAX
    }

    fn send(&self, dst: u32, buf: Buf) -> Result<()> {
        self.engine.send(dst, buf)
    }

    fn respond(&self, dst: u32, buf: Buf) -> Result<()> {
        self.engine.respond(dst, buf)
    }

    fn shutdown(&self) {
        self.engine.shutdown();
    }
}

struct EngineState {
    peers: HashMap<u32, SocketAddr>,
    conns: HashMap<u64, Arc<Conn>>,
    by_rank: HashMap<u32, u64>,
    next_token: u64,
    cm_events: VecDeque<CmEvent>,
}

pub(crate) struct WireEngine {
    rank: u32,
    local: SocketAddr,
    listener: TcpListener,
    selector: Selector,
    waker: Waker,
    to_ni: Sender<Buf>,
    state: Mutex<EngineState>,
    stop: AtomicBool,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl WireEngine {
    /// Binds the listener and spawns the event-loop thread.
    pub(crate) fn start(rank: u32, listen: SocketAddr, to_ni: Sender<Buf>) -> Result<Arc<WireEngine>> {
        let listener = TcpListener::bind(listen)?;
        listener.set_nonblocking(true)?;
        let local = listener.local_addr()?;
        let selector = Selector::new()?;
        let waker = Waker::new()?;
        selector.register(listener.as_raw_fd(), TOKEN_LISTENER, true, false)?;
        selector.register(waker.as_raw_fd(), TOKEN_WAKER, true, false)?;

        let engine = Arc::new(WireEngine {
            rank,
            local,
            listener,
            selector,
            waker,
            to_ni,
            state: Mutex::new(EngineState {
                peers: HashMap::new(),
                conns: HashMap::new(),
                by_rank: HashMap::new(),
                next_token: TOKEN_FIRST_CONN,
                cm_events: VecDeque::new(),
            }),
            stop: AtomicBool::new(false),
            thread: Mutex::new(None),
        });
        let looper = Arc::clone(&engine);
        let handle = thread::Builder::new()
            .name(format!("portl-cm-{}", rank))
            .spawn(move || looper.run())
            .map_err(Error::Io)?;
        *engine.thread.lock().unwrap() = Some(handle);
        debug!("wire engine for rank {} listening on {}", rank, local);
        Ok(engine)
    }

    pub(crate) fn local_addr(&self) -> SocketAddr {
        self.local
    }

    /// Records where a peer rank can be dialled.
    pub(crate) fn set_peer(&self, rank: u32, addr: SocketAddr) {
        self.state.lock().unwrap().peers.insert(rank, addr);
    }

    fn peer_addr(&self, rank: u32) -> Option<SocketAddr> {
        self.state.lock().unwrap().peers.get(&rank).copied()
    }

    pub(crate) fn shutdown(&self) {
        self.stop.store(true, Ordering::SeqCst);
        let _ = self.waker.wake();
        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    fn post(&self, event: CmEvent) {
        self.state.lock().unwrap().cm_events.push_back(event);
        let _ = self.waker.wake();
    }

    /// Looks up (or creates, scheduling a dial) the connection for a
    /// rank.
    fn conn_for_rank(&self, rank: u32) -> Arc<Conn> {
        let mut state = self.state.lock().unwrap();
        if let Some(token) = state.by_rank.get(&rank) {
            if let Some(conn) = state.conns.get(token) {
                return Arc::clone(conn);
            }
        }
        let token = state.next_token;
        state.next_token += 1;
        let conn = Arc::new(Conn::new(rank, token));
        state.conns.insert(token, Arc::clone(&conn));
        state.by_rank.insert(rank, token);
        state.cm_events.push_back(CmEvent::Dial(token));
        drop(state);
        let _ = self.waker.wake();
        conn
    }

    fn send(&self, dst: u32, buf: Buf) -> Result<()> {
        let conn = self.conn_for_rank(dst);
        let state = conn.state.lock().unwrap();
        if *state == ConnState::Connected {
            drop(state);
            if let Err(err) = conn.write_frame(&buf) {
                warn!("write to rank {} failed: {}", dst, err);
                self.post(CmEvent::Unreachable(conn.token));
                return Err(Error::Io(err));
            }
            Ok(())
        } else {
            // Parked until ESTABLISHED drains the list, or failed with
            // the connection.
            conn.pending_init.lock().unwrap().push_back(buf);
            Ok(())
        }
    }

    fn respond(&self, dst: u32, buf: Buf) -> Result<()> {
        if let Some(token) = buf.via {
            let conn = {
                let state = self.state.lock().unwrap();
                state.conns.get(&token).map(Arc::clone)
            };
            if let Some(conn) = conn {
                let state = conn.state.lock().unwrap();
                if *state == ConnState::Connected {
                    drop(state);
                    return conn.write_frame(&buf).map_err(Error::Io);
                }
                conn.pending_tgt.lock().unwrap().push_back(buf);
                return Ok(());
            }
        }
        self.send(dst, buf)
    }

    fn run(self: Arc<WireEngine>) {
        let mut events: SelectorEvents = Vec::with_capacity(64);
        while !self.stop.load(Ordering::SeqCst) {
            Self::process_cm_events(&self);
            if let Err(err) = self.selector.select(&mut events, Some(Duration::from_millis(100))) {
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                error!("selector failed: {}", err);
                break;
            }
            for event in &events {
                match sys::event_token(event) {
                    TOKEN_WAKER => {
                        let _ = self.waker.reset();
                    }
                    TOKEN_LISTENER => self.accept_ready(),
                    token => {
                        if sys::is_readable(event) || sys::is_closed(event) {
                            self.conn_ready(token, sys::is_closed(event));
                        }
                    }
                }
            }
        }
        debug!("wire engine for rank {} stopped", self.rank);
    }

    fn process_cm_events(engine: &Arc<WireEngine>) {
        let drained: Vec<CmEvent> = {
            let mut state = engine.state.lock().unwrap();
            state.cm_events.drain(..).collect()
        };
        for event in drained {
            match event {
                CmEvent::Dial(token) => {
                    if let Some(conn) = engine.conn(token) {
                        let engine = Arc::clone(engine);
                        let _ = thread::Builder::new()
                            .name(format!("portl-dial-{}", conn.peer))
                            .spawn(move || connector(engine, conn));
                    }
                }
                CmEvent::Established(token, stream) => engine.establish(token, stream),
                CmEvent::Unreachable(token) => engine.disconnect(token),
            }
        }
    }

    fn conn(&self, token: u64) -> Option<Arc<Conn>> {
        self.state.lock().unwrap().conns.get(&token).map(Arc::clone)
    }

    fn establish(&self, token: u64, stream: TcpStream) {
        let Some(conn) = self.conn(token) else { return };
        let fd = stream.as_raw_fd();
        *conn.stream.lock().unwrap() = Some(stream);
        if let Err(err) = self.selector.register(fd, token, true, false) {
            error!("register of peer {} stream failed: {}", conn.peer, err);
            self.disconnect(token);
            return;
        }
        // Flip the state and drain parked work while holding the state
        // lock: submitters park or write under the same lock, so the
        // parked frames keep their submission order ahead of new ones.
        let mut state = conn.state.lock().unwrap();
        *state = ConnState::Connected;
        let mut parked: Vec<Buf> = conn.pending_init.lock().unwrap().drain(..).collect();
        parked.extend(conn.pending_tgt.lock().unwrap().drain(..));
        debug!(
            "conn {} to rank {} established, draining {} parked frames",
            token,
            conn.peer,
            parked.len()
        );
        for buf in parked {
            if let Err(err) = conn.write_frame(&buf) {
                warn!("drain to rank {} failed: {}", conn.peer, err);
                self.fail_buf(buf);
            }
        }
    }

    fn disconnect(&self, token: u64) {
        let conn = {
            let mut state = self.state.lock().unwrap();
            let conn = state.conns.remove(&token);
            if let Some(conn) = &conn {
                if state.by_rank.get(&conn.peer) == Some(&token) {
                    state.by_rank.remove(&conn.peer);
                }
            }
            conn
        };
        let Some(conn) = conn else { return };
        conn.set_state(ConnState::Disconnected);
        if let Some(stream) = conn.stream.lock().unwrap().take() {
            let _ = self.selector.deregister(stream.as_raw_fd());
        }
        let mut parked: Vec<Buf> = conn.pending_init.lock().unwrap().drain(..).collect();
        parked.extend(conn.pending_tgt.lock().unwrap().drain(..));
        if !parked.is_empty() {
            warn!(
                "rank {} unreachable, failing {} parked frames",
                conn.peer,
                parked.len()
            );
        }
        for buf in parked {
            self.fail_buf(buf);
        }
    }

    /// Completes a frame that will never reach its peer by synthesizing
    /// the response the initiator is waiting for.
    fn fail_buf(&self, buf: Buf) {
        if buf.hdr.token == 0 || !buf.hdr.ty.is_request() {
            return;
        }
        let ty = if buf.hdr.ty.is_get_class() {
            HdrType::Reply
        } else {
            HdrType::Ack
        };
        let mut hdr = Header::new(ty);
        hdr.token = buf.hdr.token;
        hdr.fail = NiFail::Undeliverable.to_wire();
        hdr.atom_op = ACK_OK;
        let _ = self.to_ni.send(Buf::new(hdr));
    }

    fn accept_ready(&self) {
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    if stream.set_nonblocking(true).is_err() {
                        continue;
                    }
                    let _ = stream.set_nodelay(true);
                    let fd = stream.as_raw_fd();
                    let token = {
                        let mut state = self.state.lock().unwrap();
                        let token = state.next_token;
                        state.next_token += 1;
                        state
                            .conns
                            .insert(token, Arc::new(Conn::accepted(token, stream)));
                        token
                    };
                    trace!("accepted {} as conn {}", addr, token);
                    if let Err(err) = self.selector.register(fd, token, true, false) {
                        error!("register of accepted stream failed: {}", err);
                        self.disconnect(token);
                    }
                }
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => {
                    warn!("accept failed: {}", err);
                    break;
                }
            }
        }
    }

    fn conn_ready(&self, token: u64, closed: bool) {
        let Some(conn) = self.conn(token) else { return };
        let mut hangup = closed;
        {
            let guard = conn.stream.lock().unwrap();
            if let Some(stream) = guard.as_ref() {
                let mut stream = stream;
                let mut tmp = [0u8; 16384];
                loop {
                    match stream.read(&mut tmp) {
                        Ok(0) => {
                            hangup = true;
                            break;
                        }
                        Ok(n) => conn.rx.lock().unwrap().data.extend_from_slice(&tmp[..n]),
                        Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => break,
                        Err(ref err) if err.kind() == io::ErrorKind::Interrupted => {}
                        Err(err) => {
                            warn!("read from rank {} failed: {}", conn.rx.lock().unwrap().peer, err);
                            hangup = true;
                            break;
                        }
                    }
                }
            }
        }
        if !self.parse_frames(&conn) {
            hangup = true;
        }
        if hangup {
            self.disconnect(token);
        }
    }

    /// Splits the receive accumulation into frames. Returns `false` on
    /// protocol desync, which is unrecoverable for the stream.
    fn parse_frames(&self, conn: &Arc<Conn>) -> bool {
        let mut rx = conn.rx.lock().unwrap();
        if !rx.greeted {
            if rx.data.len() < 4 {
                return true;
            }
            let peer = u32::from_le_bytes(rx.data[..4].try_into().unwrap());
            rx.data.drain(..4);
            rx.greeted = true;
            rx.peer = peer;
            let mut state = self.state.lock().unwrap();
            state.by_rank.entry(peer).or_insert(conn.token);
            trace!("conn {} greeted as rank {}", conn.token, peer);
        }
        loop {
            if rx.data.len() < HDR_LEN {
                return true;
            }
            let hdr = match Header::decode(&rx.data[..HDR_LEN]) {
                Ok(hdr) => hdr,
                Err(_) => {
                    error!("protocol desync from rank {}", rx.peer);
                    rx.data.clear();
                    return false;
                }
            };
            let total = HDR_LEN + payload_len(&hdr);
            if rx.data.len() < total {
                return true;
            }
            let payload = rx.data[HDR_LEN..total].to_vec();
            rx.data.drain(..total);
            let mut buf = Buf::with_payload(hdr, payload);
            buf.via = Some(conn.token);
            if self.to_ni.send(buf).is_err() {
                // Interface is tearing down.
                return false;
            }
        }
    }
}

/// Frames that carry bytes after the header. Acknowledgements reuse
/// `length` for the manipulated length, so it cannot be trusted as a
/// payload size there.
fn payload_len(hdr: &Header) -> usize {
    match hdr.ty {
        HdrType::Put | HdrType::Atomic | HdrType::FetchAtomic | HdrType::Swap | HdrType::Reply => {
            hdr.length as usize
        }
        _ => 0,
    }
}

/// Resolves, routes, and connects to a peer, retrying each stage with
/// backoff before declaring it unreachable.
fn connector(engine: Arc<WireEngine>, conn: Arc<Conn>) {
    conn.set_state(ConnState::ResolvingAddr);
    let mut addr = None;
    for attempt in 0..CONNECT_RETRIES {
        if let Some(found) = engine.peer_addr(conn.peer) {
            addr = Some(found);
            break;
        }
        thread::sleep(backoff(attempt));
    }
    let Some(addr) = addr else {
        warn!("no address for rank {}", conn.peer);
        engine.post(CmEvent::Unreachable(conn.token));
        return;
    };
    // Route selection collapses into the connect call on a socket
    // fabric.
    conn.set_state(ConnState::ResolvingRoute);
    conn.set_state(ConnState::Connecting);
    loop {
        let attempt = conn.next_attempt();
        if attempt >= CONNECT_RETRIES {
            warn!("rank {} unreachable after {} attempts", conn.peer, attempt);
            engine.post(CmEvent::Unreachable(conn.token));
            return;
        }
        match TcpStream::connect_timeout(&addr, Duration::from_secs(1)) {
            Ok(mut stream) => {
                // Private data: the 4-byte source rank, written before
                // the stream goes non-blocking.
                if stream.write_all(&engine.rank.to_le_bytes()).is_err()
                    || stream.set_nonblocking(true).is_err()
                {
                    thread::sleep(backoff(attempt));
                    continue;
                }
                let _ = stream.set_nodelay(true);
                engine.post(CmEvent::Established(conn.token, stream));
                return;
            }
            Err(err) => {
                trace!(
                    "connect to rank {} attempt {} failed: {}",
                    conn.peer,
                    attempt,
                    err
                );
                thread::sleep(backoff(attempt));
            }
        }
    }
}
