//! The process engine: an out-of-process server that owns the object
//! pools and progress machinery on behalf of client processes.
//!
//! A client connects to the control socket, sends `{pid, segid}`, and
//! receives the name of a shared segment. The segment holds a command
//! queue (one fixed-size record per API call) and a data area the
//! engine treats as the client's memory: descriptors and entries bind
//! offsets into it. Engine workers poll the queues, execute each
//! record against the hosted interfaces, and post the result back.

use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::config::Config;
use crate::entry::LeDesc;
use crate::event::CtEvent;
use crate::handle::Handle;
use crate::md::MdDesc;
use crate::ni::{Ni, NiDesc, MAX_PROGRESS_THREADS};
use crate::options::{AckReq, LeOptions, ListKind, PtOptions};
use crate::runtime::Runtime;
use crate::sys::Segment;
use crate::{Error, EventKind, Result};

/// Default control socket path.
pub const PPE_SOCKET_NAME: &str = "/tmp/portl-ppe.sock";

/// Ranks the engine can host.
const PPE_RANKS: u32 = 64;

const SEG_MAGIC: u32 = 0x70_72_74_6c; // "prtl"
const SEG_HDR_SIZE: usize = 16;
const ENTRY_SIZE: usize = std::mem::size_of::<CmdEntry>();
const NAME_FIELD: usize = 64;

// Command record states.
const ST_FREE: u32 = 0;
const ST_CLAIMED: u32 = 1;
const ST_READY: u32 = 2;
const ST_EXECUTING: u32 = 3;
const ST_DONE: u32 = 4;

// Opcodes, one per hosted API call.
const OP_NI_INIT: u32 = 1;
const OP_NI_FINI: u32 = 2;
const OP_CT_ALLOC: u32 = 3;
const OP_CT_FREE: u32 = 4;
const OP_CT_GET: u32 = 5;
const OP_CT_SET: u32 = 6;
const OP_CT_INC: u32 = 7;
const OP_PT_ALLOC: u32 = 8;
const OP_PT_FREE: u32 = 9;
const OP_PT_ENABLE: u32 = 10;
const OP_PT_DISABLE: u32 = 11;
const OP_EQ_ALLOC: u32 = 12;
const OP_EQ_FREE: u32 = 13;
const OP_MD_BIND: u32 = 14;
const OP_MD_RELEASE: u32 = 15;
const OP_LE_APPEND: u32 = 16;
const OP_PUT: u32 = 17;
const OP_GET: u32 = 18;
const OP_EQ_GET: u32 = 19;

/// One command-queue record. Lives in the shared segment; `state`
/// carries the cross-process hand-off.
#[repr(C)]
struct CmdEntry {
    state: AtomicU32,
    opcode: u32,
    args: [u64; 10],
    result: i64,
    result2: u64,
    result3: u64,
}

/// Engine configuration; mirrored by the `portl-ppe` binary flags.
#[derive(Debug, Clone)]
pub struct PpeConfig {
    pub socket: PathBuf,
    /// Command-queue capacity per client.
    pub nppebufs: usize,
    /// Engine worker count.
    pub nprogthreads: usize,
    /// Bytes of client data area per segment.
    pub data_size: usize,
}

impl Default for PpeConfig {
    fn default() -> PpeConfig {
        PpeConfig {
            socket: PathBuf::from(PPE_SOCKET_NAME),
            nppebufs: 1000,
            nprogthreads: 1,
            data_size: 1 << 20,
        }
    }
}

impl PpeConfig {
    fn validate(&self) -> Result<()> {
        if self.nppebufs < 1 {
            return Err(Error::ArgInvalid);
        }
        if self.nprogthreads < 1 || self.nprogthreads > MAX_PROGRESS_THREADS {
            return Err(Error::ArgInvalid);
        }
        Ok(())
    }
}

struct ClientState {
    cookie: u64,
    segment: Segment,
    nbufs: usize,
    data_off: usize,
    data_len: usize,
    stream: Mutex<UnixStream>,
    nis: Mutex<Vec<Option<Ni>>>,
    gone: AtomicBool,
}

struct PpeInner {
    config: PpeConfig,
    runtime: Runtime,
    clients: Mutex<Vec<Arc<ClientState>>>,
    next_cookie: AtomicU64,
    next_rank: AtomicU32,
    stop: AtomicBool,
}

/// The engine server. Dropping it (or calling [`stop`]) shuts the
/// engine down and tears hosted interfaces down.
///
/// [`stop`]: PpeServer::stop
pub struct PpeServer {
    inner: Arc<PpeInner>,
    threads: Vec<thread::JoinHandle<()>>,
}

impl std::fmt::Debug for PpeServer {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt.debug_struct("PpeServer")
            .field("config", &self.inner.config)
            .finish()
    }
}

impl PpeServer {
    pub fn start(config: PpeConfig) -> Result<PpeServer> {
        config.validate()?;
        let _ = std::fs::remove_file(&config.socket);
        let listener = UnixListener::bind(&config.socket)?;
        listener.set_nonblocking(true)?;
        let runtime = Runtime::init(Config::standalone(PPE_RANKS))?;
        info!(
            "process engine on {:?}: {} bufs, {} workers",
            config.socket, config.nppebufs, config.nprogthreads
        );
        let inner = Arc::new(PpeInner {
            config,
            runtime,
            clients: Mutex::new(Vec::new()),
            next_cookie: AtomicU64::new(1),
            next_rank: AtomicU32::new(0),
            stop: AtomicBool::new(false),
        });

        let mut threads = Vec::new();
        {
            let inner = Arc::clone(&inner);
            threads.push(
                thread::Builder::new()
                    .name("portl-ppe-accept".into())
                    .spawn(move || accept_loop(inner, listener))
                    .map_err(Error::Io)?,
            );
        }
        for worker in 0..inner.config.nprogthreads {
            let inner = Arc::clone(&inner);
            threads.push(
                thread::Builder::new()
                    .name(format!("portl-ppe-{}", worker))
                    .spawn(move || worker_loop(inner))
                    .map_err(Error::Io)?,
            );
        }
        Ok(PpeServer { inner, threads })
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.inner.stop.store(true, Ordering::SeqCst);
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
        let clients: Vec<_> = self.inner.clients.lock().unwrap().drain(..).collect();
        for client in clients {
            drop_client(&client);
        }
        let _ = std::fs::remove_file(&self.inner.config.socket);
    }
}

impl Drop for PpeServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn drop_client(client: &ClientState) {
    let nis: Vec<_> = client.nis.lock().unwrap().drain(..).collect();
    for ni in nis.into_iter().flatten() {
        ni.fini();
    }
}

fn accept_loop(inner: Arc<PpeInner>, listener: UnixListener) {
    while !inner.stop.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, _)) => {
                if let Err(err) = admit(&inner, stream) {
                    warn!("client admission failed: {}", err);
                }
            }
            Err(ref err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                reap_disconnected(&inner);
                thread::sleep(Duration::from_millis(10));
            }
            Err(err) => {
                warn!("accept failed: {}", err);
                break;
            }
        }
    }
}

/// Hello exchange: `{pid, segid}` in, `{status, queue_index, cookie,
/// seg_len, seg_name}` out.
fn admit(inner: &Arc<PpeInner>, mut stream: UnixStream) -> Result<()> {
    stream.set_nonblocking(false)?;
    let mut hello = [0u8; 8];
    stream.read_exact(&mut hello)?;
    let pid = u32::from_le_bytes(hello[..4].try_into().unwrap());
    let segid = u32::from_le_bytes(hello[4..].try_into().unwrap());

    let nbufs = inner.config.nppebufs;
    let data_off = SEG_HDR_SIZE + nbufs * ENTRY_SIZE;
    let seg_len = data_off + inner.config.data_size;
    let name = format!("/portl-ppe-{}-{}", pid, segid);
    let segment = Segment::create(&name, seg_len)?;
    unsafe {
        let hdr = segment.offset_as::<u32>(0);
        hdr.write(SEG_MAGIC);
        hdr.add(1).write(nbufs as u32);
        segment.offset_as::<u64>(8).write(data_off as u64);
    }

    let cookie = inner.next_cookie.fetch_add(1, Ordering::SeqCst);
    let queue_index = {
        let clients = inner.clients.lock().unwrap();
        clients.len() as u32
    };

    let mut response = Vec::with_capacity(24 + NAME_FIELD);
    response.extend_from_slice(&0i32.to_le_bytes());
    response.extend_from_slice(&queue_index.to_le_bytes());
    response.extend_from_slice(&cookie.to_le_bytes());
    response.extend_from_slice(&(seg_len as u64).to_le_bytes());
    let mut name_field = [0u8; NAME_FIELD];
    name_field[..name.len()].copy_from_slice(name.as_bytes());
    response.extend_from_slice(&name_field);
    stream.write_all(&response)?;
    stream.set_nonblocking(true)?;

    debug!("admitted client pid {} segid {} as cookie {}", pid, segid, cookie);
    inner.clients.lock().unwrap().push(Arc::new(ClientState {
        cookie,
        segment,
        nbufs,
        data_off,
        data_len: inner.config.data_size,
        stream: Mutex::new(stream),
        nis: Mutex::new(Vec::new()),
        gone: AtomicBool::new(false),
    }));
    Ok(())
}

/// Detects clients whose control stream hit EOF and unmaps them.
fn reap_disconnected(inner: &Arc<PpeInner>) {
    let mut clients = inner.clients.lock().unwrap();
    clients.retain(|client| {
        let mut probe = [0u8; 1];
        let gone = match client.stream.lock().unwrap().read(&mut probe) {
            Ok(0) => true,
            Ok(_) => false,
            Err(ref err) if err.kind() == std::io::ErrorKind::WouldBlock => false,
            Err(_) => true,
        };
        if gone {
            debug!("client cookie {} disconnected", client.cookie);
            client.gone.store(true, Ordering::SeqCst);
            drop_client(client);
        }
        !gone
    });
}

fn worker_loop(inner: Arc<PpeInner>) {
    while !inner.stop.load(Ordering::SeqCst) {
        let clients: Vec<_> = inner.clients.lock().unwrap().to_vec();
        let mut busy = false;
        for client in &clients {
            if client.gone.load(Ordering::SeqCst) {
                continue;
            }
            for slot in 0..client.nbufs {
                let entry = entry_ptr(&client.segment, slot);
                let state = unsafe { &(*entry).state };
                if state.load(Ordering::Acquire) != ST_READY {
                    continue;
                }
                if state
                    .compare_exchange(ST_READY, ST_EXECUTING, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
                {
                    continue;
                }
                busy = true;
                let (opcode, args) = unsafe { ((*entry).opcode, (*entry).args) };
                let (result, result2, result3) = execute(&inner, client, opcode, &args);
                unsafe {
                    (*entry).result = result;
                    (*entry).result2 = result2;
                    (*entry).result3 = result3;
                }
                state.store(ST_DONE, Ordering::Release);
            }
        }
        if !busy {
            thread::sleep(Duration::from_millis(1));
        }
    }
}

fn entry_ptr(segment: &Segment, slot: usize) -> *mut CmdEntry {
    unsafe { segment.offset_as::<CmdEntry>(SEG_HDR_SIZE + slot * ENTRY_SIZE) }
}

fn err_code(err: Error) -> i64 {
    -i64::from(err.code())
}

/// One command, dispatched by opcode. The result triple is
/// `(status-or-value, aux, aux)`.
fn execute(
    inner: &Arc<PpeInner>,
    client: &Arc<ClientState>,
    opcode: u32,
    args: &[u64; 10],
) -> (i64, u64, u64) {
    match dispatch(inner, client, opcode, args) {
        Ok(triple) => triple,
        Err(err) => (err_code(err), 0, 0),
    }
}

fn dispatch(
    inner: &Arc<PpeInner>,
    client: &Arc<ClientState>,
    opcode: u32,
    args: &[u64; 10],
) -> Result<(i64, u64, u64)> {
    match opcode {
        OP_NI_INIT => {
            let rank = inner.next_rank.fetch_add(1, Ordering::SeqCst);
            if rank >= PPE_RANKS {
                return Err(Error::NoSpace);
            }
            let ni = inner.runtime.ni_init(NiDesc {
                rank,
                ..NiDesc::default()
            })?;
            let mut nis = client.nis.lock().unwrap();
            nis.push(Some(ni));
            Ok(((nis.len() - 1) as i64, u64::from(rank), 0))
        }
        OP_NI_FINI => {
            let ni = take_ni(client, args[0])?;
            ni.fini();
            Ok((0, 0, 0))
        }
        OP_CT_ALLOC => with_ni(client, args[0], |ni| {
            Ok((0, ni.ct_alloc()?.into_raw(), 0))
        }),
        OP_CT_FREE => with_ni(client, args[0], |ni| {
            ni.ct_free(Handle::from_raw(args[1]))?;
            Ok((0, 0, 0))
        }),
        OP_CT_GET => with_ni(client, args[0], |ni| {
            let event = ni.ct_get(Handle::from_raw(args[1]))?;
            Ok((0, event.success, event.failure))
        }),
        OP_CT_SET => with_ni(client, args[0], |ni| {
            ni.ct_set(
                Handle::from_raw(args[1]),
                CtEvent {
                    success: args[2],
                    failure: args[3],
                },
            )?;
            Ok((0, 0, 0))
        }),
        OP_CT_INC => with_ni(client, args[0], |ni| {
            ni.ct_inc(
                Handle::from_raw(args[1]),
                CtEvent {
                    success: args[2],
                    failure: args[3],
                },
            )?;
            Ok((0, 0, 0))
        }),
        OP_PT_ALLOC => with_ni(client, args[0], |ni| {
            let requested = if args[1] == 0 {
                None
            } else {
                Some((args[1] - 1) as u32)
            };
            let index = ni.pt_alloc(
                requested,
                PtOptions::from_bits_truncate(args[2] as u32),
                opt_handle(args[3]),
            )?;
            Ok((i64::from(index), 0, 0))
        }),
        OP_PT_FREE => with_ni(client, args[0], |ni| {
            ni.pt_free(args[1] as u32)?;
            Ok((0, 0, 0))
        }),
        OP_PT_ENABLE => with_ni(client, args[0], |ni| {
            ni.pt_enable(args[1] as u32)?;
            Ok((0, 0, 0))
        }),
        OP_PT_DISABLE => with_ni(client, args[0], |ni| {
            ni.pt_disable(args[1] as u32)?;
            Ok((0, 0, 0))
        }),
        OP_EQ_ALLOC => with_ni(client, args[0], |ni| {
            Ok((0, ni.eq_alloc(args[1] as usize)?.into_raw(), 0))
        }),
        OP_EQ_FREE => with_ni(client, args[0], |ni| {
            ni.eq_free(Handle::from_raw(args[1]))?;
            Ok((0, 0, 0))
        }),
        OP_MD_BIND => with_ni(client, args[0], |ni| {
            let start = client_data(client, args[1], args[2])?;
            let desc = MdDesc {
                start,
                length: args[2],
                iovecs: Vec::new(),
                options: crate::MdOptions::from_bits_truncate(args[3] as u32),
                eq: opt_handle(args[4]),
                ct: opt_handle(args[5]),
            };
            // The client's data area stays mapped for the client's
            // lifetime, which bounds every descriptor bound in it.
            let handle = unsafe { ni.md_bind(&desc)? };
            Ok((0, handle.into_raw(), 0))
        }),
        OP_MD_RELEASE => with_ni(client, args[0], |ni| {
            ni.md_release(Handle::from_raw(args[1]))?;
            Ok((0, 0, 0))
        }),
        OP_LE_APPEND => with_ni(client, args[0], |ni| {
            let start = client_data(client, args[2], args[3])?;
            let desc = LeDesc {
                start,
                length: args[3],
                ct: opt_handle(args[6]),
                ac_id: crate::entry::UID_ANY,
                options: LeOptions::from_bits_truncate(args[4] as u32),
            };
            let list = match args[7] {
                0 => ListKind::Priority,
                1 => ListKind::Overflow,
                _ => ListKind::ProbeOnly,
            };
            let handle = unsafe { ni.le_append(args[1] as u32, &desc, list, args[5])? };
            Ok((0, handle.into_raw(), 0))
        }),
        OP_PUT => with_ni(client, args[0], |ni| {
            let ack = AckReq::from_wire(args[4] as u8).ok_or(Error::ArgInvalid)?;
            ni.put(
                Handle::from_raw(args[1]),
                args[2],
                args[3],
                ack,
                args[5] as u32,
                args[6] as u32,
                args[7],
                args[8],
                0,
                args[9],
            )?;
            Ok((0, 0, 0))
        }),
        OP_GET => with_ni(client, args[0], |ni| {
            ni.get(
                Handle::from_raw(args[1]),
                args[2],
                args[3],
                args[4] as u32,
                args[5] as u32,
                args[6],
                args[7],
                0,
            )?;
            Ok((0, 0, 0))
        }),
        OP_EQ_GET => with_ni(client, args[0], |ni| {
            let event = ni.eq_get(Handle::from_raw(args[1]))?;
            Ok((
                i64::from(event_code(event.kind)),
                event.mlength,
                event.match_bits,
            ))
        }),
        _ => Err(Error::ArgInvalid),
    }
}

/// Raw zero on the queue means "no handle".
fn opt_handle(raw: u64) -> Handle {
    if raw == 0 {
        Handle::NONE
    } else {
        Handle::from_raw(raw)
    }
}

fn event_code(kind: EventKind) -> i32 {
    match kind {
        EventKind::Put => 1,
        EventKind::Get => 2,
        EventKind::Atomic => 3,
        EventKind::PutOverflow => 4,
        EventKind::AtomicOverflow => 5,
        EventKind::Unlink => 6,
        EventKind::Dropped => 7,
        EventKind::Send => 8,
        EventKind::Ack => 9,
        EventKind::Reply => 10,
    }
}

fn with_ni<T>(
    client: &Arc<ClientState>,
    id: u64,
    body: impl FnOnce(&Ni) -> Result<T>,
) -> Result<T> {
    let nis = client.nis.lock().unwrap();
    let ni = nis
        .get(id as usize)
        .and_then(|slot| slot.as_ref())
        .ok_or(Error::ArgInvalid)?
        .clone();
    drop(nis);
    body(&ni)
}

fn take_ni(client: &Arc<ClientState>, id: u64) -> Result<Ni> {
    let mut nis = client.nis.lock().unwrap();
    nis.get_mut(id as usize)
        .and_then(|slot| slot.take())
        .ok_or(Error::ArgInvalid)
}

/// Pointer into the client's data area, bounds-checked.
fn client_data(client: &Arc<ClientState>, offset: u64, length: u64) -> Result<*mut u8> {
    let end = offset.checked_add(length).ok_or(Error::ArgInvalid)?;
    if end > client.data_len as u64 {
        return Err(Error::ArgInvalid);
    }
    Ok(unsafe {
        client
            .segment
            .as_ptr()
            .add(client.data_off + offset as usize)
    })
}

// === Client side ===

/// Library side of the engine protocol, for processes that submit
/// their API calls to a hosted interface.
#[derive(Debug)]
pub struct PpeClient {
    segment: Segment,
    nbufs: usize,
    data_off: usize,
    cookie: u64,
    // Keeps the control stream open; the engine reaps us on EOF.
    _stream: UnixStream,
}

impl PpeClient {
    pub fn connect(socket: &Path, pid: u32, segid: u32) -> Result<PpeClient> {
        let mut stream = UnixStream::connect(socket)?;
        let mut hello = [0u8; 8];
        hello[..4].copy_from_slice(&pid.to_le_bytes());
        hello[4..].copy_from_slice(&segid.to_le_bytes());
        stream.write_all(&hello)?;

        let mut response = [0u8; 24 + NAME_FIELD];
        stream.read_exact(&mut response)?;
        let status = i32::from_le_bytes(response[..4].try_into().unwrap());
        if status != 0 {
            return Err(Error::from_code(status).unwrap_or(Error::Fail));
        }
        let cookie = u64::from_le_bytes(response[8..16].try_into().unwrap());
        let seg_len = u64::from_le_bytes(response[16..24].try_into().unwrap());
        let name_end = response[24..]
            .iter()
            .position(|b| *b == 0)
            .map_or(NAME_FIELD, |n| n);
        let name = std::str::from_utf8(&response[24..24 + name_end])
            .map_err(|_| Error::Fail)?
            .to_string();

        let segment = Segment::open(&name, seg_len as usize)?;
        let (magic, nbufs, data_off) = unsafe {
            (
                segment.offset_as::<u32>(0).read(),
                segment.offset_as::<u32>(4).read(),
                segment.offset_as::<u64>(8).read(),
            )
        };
        if magic != SEG_MAGIC {
            return Err(Error::Fail);
        }
        Ok(PpeClient {
            segment,
            nbufs: nbufs as usize,
            data_off: data_off as usize,
            cookie,
            _stream: stream,
        })
    }

    pub fn cookie(&self) -> u64 {
        self.cookie
    }

    /// Writes into the client data area the engine binds descriptors
    /// over.
    pub fn write_data(&self, offset: usize, data: &[u8]) {
        assert!(self.data_off + offset + data.len() <= self.segment.len());
        unsafe {
            std::ptr::copy_nonoverlapping(
                data.as_ptr(),
                self.segment.as_ptr().add(self.data_off + offset),
                data.len(),
            );
        }
    }

    pub fn read_data(&self, offset: usize, out: &mut [u8]) {
        assert!(self.data_off + offset + out.len() <= self.segment.len());
        unsafe {
            std::ptr::copy_nonoverlapping(
                self.segment.as_ptr().add(self.data_off + offset),
                out.as_mut_ptr(),
                out.len(),
            );
        }
    }

    fn submit(&self, opcode: u32, args: [u64; 10]) -> Result<(i64, u64, u64)> {
        let deadline = Instant::now() + Duration::from_secs(5);
        // Claim a free record.
        let entry = 'claim: loop {
            for slot in 0..self.nbufs {
                let entry = entry_ptr(&self.segment, slot);
                let state = unsafe { &(*entry).state };
                if state
                    .compare_exchange(ST_FREE, ST_CLAIMED, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    break 'claim entry;
                }
            }
            if Instant::now() >= deadline {
                return Err(Error::NoSpace);
            }
            thread::sleep(Duration::from_micros(100));
        };

        unsafe {
            (*entry).opcode = opcode;
            (*entry).args = args;
            (*entry).state.store(ST_READY, Ordering::Release);
        }
        loop {
            let state = unsafe { (*entry).state.load(Ordering::Acquire) };
            if state == ST_DONE {
                break;
            }
            if Instant::now() >= deadline {
                return Err(Error::Fail);
            }
            thread::sleep(Duration::from_micros(100));
        }
        let triple = unsafe { ((*entry).result, (*entry).result2, (*entry).result3) };
        unsafe { (*entry).state.store(ST_FREE, Ordering::Release) };
        if triple.0 < 0 {
            return Err(Error::from_code((-triple.0) as i32).unwrap_or(Error::Fail));
        }
        Ok(triple)
    }

    /// Creates a hosted interface; returns `(interface id, rank)`.
    pub fn ni_init(&self) -> Result<(u64, u32)> {
        let (id, rank, _) = self.submit(OP_NI_INIT, [0; 10])?;
        Ok((id as u64, rank as u32))
    }

    pub fn ni_fini(&self, ni: u64) -> Result<()> {
        self.submit(OP_NI_FINI, args1(ni)).map(|_| ())
    }

    pub fn ct_alloc(&self, ni: u64) -> Result<u64> {
        Ok(self.submit(OP_CT_ALLOC, args1(ni))?.1)
    }

    pub fn ct_free(&self, ni: u64, ct: u64) -> Result<()> {
        self.submit(OP_CT_FREE, args2(ni, ct)).map(|_| ())
    }

    pub fn ct_get(&self, ni: u64, ct: u64) -> Result<(u64, u64)> {
        let (_, success, failure) = self.submit(OP_CT_GET, args2(ni, ct))?;
        Ok((success, failure))
    }

    pub fn ct_set(&self, ni: u64, ct: u64, success: u64, failure: u64) -> Result<()> {
        self.submit(OP_CT_SET, [ni, ct, success, failure, 0, 0, 0, 0, 0, 0])
            .map(|_| ())
    }

    pub fn ct_inc(&self, ni: u64, ct: u64, success: u64, failure: u64) -> Result<()> {
        self.submit(OP_CT_INC, [ni, ct, success, failure, 0, 0, 0, 0, 0, 0])
            .map(|_| ())
    }

    /// `requested == None` asks for the lowest free index.
    pub fn pt_alloc(&self, ni: u64, requested: Option<u32>, eq: u64) -> Result<u32> {
        let encoded = requested.map_or(0, |index| u64::from(index) + 1);
        let (index, _, _) = self.submit(OP_PT_ALLOC, [ni, encoded, 0, eq, 0, 0, 0, 0, 0, 0])?;
        Ok(index as u32)
    }

    pub fn pt_free(&self, ni: u64, index: u32) -> Result<()> {
        self.submit(OP_PT_FREE, args2(ni, u64::from(index))).map(|_| ())
    }

    pub fn eq_alloc(&self, ni: u64, capacity: u64) -> Result<u64> {
        Ok(self.submit(OP_EQ_ALLOC, args2(ni, capacity))?.1)
    }

    pub fn md_bind(&self, ni: u64, offset: u64, length: u64, options: u32, eq: u64, ct: u64) -> Result<u64> {
        Ok(self
            .submit(
                OP_MD_BIND,
                [ni, offset, length, u64::from(options), eq, ct, 0, 0, 0, 0],
            )?
            .1)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn le_append(
        &self,
        ni: u64,
        pt_index: u32,
        offset: u64,
        length: u64,
        options: u32,
        ct: u64,
        list: u64,
    ) -> Result<u64> {
        Ok(self
            .submit(
                OP_LE_APPEND,
                [
                    ni,
                    u64::from(pt_index),
                    offset,
                    length,
                    u64::from(options),
                    0,
                    ct,
                    list,
                    0,
                    0,
                ],
            )?
            .1)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn put(
        &self,
        ni: u64,
        md: u64,
        local_offset: u64,
        length: u64,
        ack: u8,
        target: u32,
        pt_index: u32,
        match_bits: u64,
        remote_offset: u64,
        hdr_data: u64,
    ) -> Result<()> {
        self.submit(
            OP_PUT,
            [
                ni,
                md,
                local_offset,
                length,
                u64::from(ack),
                u64::from(target),
                u64::from(pt_index),
                match_bits,
                remote_offset,
                hdr_data,
            ],
        )
        .map(|_| ())
    }

    /// Returns `(event-code, mlength, match_bits)`.
    pub fn eq_get(&self, ni: u64, eq: u64) -> Result<(i64, u64, u64)> {
        self.submit(OP_EQ_GET, args2(ni, eq))
    }
}

fn args1(a: u64) -> [u64; 10] {
    [a, 0, 0, 0, 0, 0, 0, 0, 0, 0]
}

fn args2(a: u64, b: u64) -> [u64; 10] {
    [a, b, 0, 0, 0, 0, 0, 0, 0, 0]
}
