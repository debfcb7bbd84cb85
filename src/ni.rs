use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use log::debug;

use crate::buf::{Buf, BufPool};
use crate::config::Config;
use crate::ct::Ct;
use crate::deliver;
use crate::entry::{LeDesc, ListEntry, MeDesc};
use crate::eq::EventQueue;
use crate::event::{CtEvent, Event, WaitSet};
use crate::handle::{Handle, HandleKind};
use crate::initiator::{self, InitOp, OpArgs};
use crate::md::{Md, MdDesc};
use crate::options::{AckReq, ListKind, NiOptions, PtOptions};
use crate::pool::Pool;
use crate::proto::HdrType;
use crate::pt::{PtTable, PtValidation};
use crate::transport::{CommPad, ShmTransport, Transport, WireEngine, WireTransport};
use crate::triggered::TriggeredAction;
use crate::{AtomicOp, AtomicType, Error, Result};

/// Upper bound on progress workers per interface.
pub const MAX_PROGRESS_THREADS: usize = 8;

/// Default connection-manager listen port on deployed fabrics.
/// Embedders and tests usually bind an ephemeral port instead.
pub const WIRE_PORT: u16 = 7694;

/// Per-interface object limits.
///
/// `Ni` creation sizes every pool from these; allocation past a limit
/// fails with [`Error::NoSpace`].
#[derive(Debug, Clone)]
pub struct Limits {
    pub max_mds: usize,
    pub max_entries: usize,
    pub max_cts: usize,
    pub max_eqs: usize,
    pub max_pt_index: u32,
    pub max_iovecs: usize,
    pub max_triggered_ops: usize,
    pub max_atomic_size: u64,
    /// Largest number of buffered unexpected headers per portal-table
    /// entry.
    pub max_unexpected_headers: usize,
    /// Payload bytes kept per buffered unexpected header.
    pub max_buffered_payload: u64,
}

impl Default for Limits {
    fn default() -> Limits {
        Limits {
            max_mds: 1024,
            max_entries: 1024,
            max_cts: 1024,
            max_eqs: 64,
            max_pt_index: 63,
            max_iovecs: 64,
            max_triggered_ops: 1024,
            max_atomic_size: 512,
            max_unexpected_headers: 128,
            max_buffered_payload: 4096,
        }
    }
}

/// Readable status registers of an interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusRegister {
    /// Arrivals dropped at unallocated or disabled portal-table
    /// entries, or that matched nothing and could not be buffered.
    DropCount,
    /// Deliveries refused by the permission checks.
    PermViolations,
}

/// Which fabric an interface sits on.
#[derive(Debug, Clone, Copy)]
pub enum Iface {
    /// The intra-node shared-memory pad.
    Shm,
    /// The wire engine, listening on the given address.
    Wire { listen: SocketAddr },
}

/// Parameters for [`Runtime::ni_init`].
///
/// [`Runtime::ni_init`]: crate::Runtime::ni_init
#[derive(Debug)]
pub struct NiDesc {
    pub rank: u32,
    pub options: NiOptions,
    pub limits: Limits,
    pub iface: Iface,
    pub progress_threads: usize,
}

impl Default for NiDesc {
    fn default() -> NiDesc {
        NiDesc {
            rank: 0,
            options: NiOptions::empty(),
            limits: Limits::default(),
            iface: Iface::Shm,
            progress_threads: 1,
        }
    }
}

pub(crate) struct NiInner {
    pub(crate) index: u8,
    pub(crate) rank: u32,
    pub(crate) options: NiOptions,
    pub(crate) limits: Limits,
    pub(crate) drop_count: AtomicU64,
    pub(crate) perm_violations: AtomicU64,
    pub(crate) mds: Pool<Md>,
    pub(crate) les: Pool<ListEntry>,
    pub(crate) mes: Pool<ListEntry>,
    pub(crate) cts: Pool<Ct>,
    pub(crate) eqs: Pool<EventQueue>,
    pub(crate) pt: PtTable,
    pub(crate) ct_wait: Arc<WaitSet>,
    pub(crate) eq_wait: Arc<WaitSet>,
    pub(crate) bufs: BufPool,
    pub(crate) transport: Box<dyn Transport>,
    pub(crate) shutdown: AtomicBool,
    pending: Mutex<HashMap<u64, InitOp>>,
    next_token: AtomicU64,
    triggered: AtomicUsize,
    wire: Option<Arc<WireEngine>>,
    pad: Option<Arc<CommPad>>,
    threads: Mutex<Vec<thread::JoinHandle<()>>>,
    fini_done: AtomicBool,
}

/// A network interface: the per-process endpoint owning every object
/// table, the portal table, and the progress machinery.
///
/// `Ni` is a cheap clone of a shared core, so teardown can be driven
/// from any thread; [`fini`] interrupts all outstanding waiters.
///
/// Lock order, outermost first: portal-table slot mutex, the
/// interface `ct_wait` mutex, then a counting event's own mutex.
/// Pool locks and the pending-operation map nest inside any of these
/// and never hold another lock while taken.
///
/// [`fini`]: Ni::fini
#[derive(Clone)]
pub struct Ni {
    inner: Arc<NiInner>,
}

impl std::fmt::Debug for Ni {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt.debug_struct("Ni")
            .field("index", &self.inner.index)
            .field("rank", &self.inner.rank)
            .field("options", &self.inner.options)
            .finish()
    }
}

impl Ni {
    pub(crate) fn create(index: u8, desc: NiDesc, config: &Config, pad: &Arc<CommPad>) -> Result<Ni> {
        if desc.progress_threads == 0 || desc.progress_threads > MAX_PROGRESS_THREADS {
            return Err(Error::ArgInvalid);
        }
        let (tx, rx): (Sender<Buf>, Receiver<Buf>) = mpsc::channel();
        let mut wire = None;
        let mut shm = None;
        let transport: Box<dyn Transport> = match desc.iface {
            Iface::Shm => {
                pad.register(desc.rank, tx.clone())?;
                shm = Some(Arc::clone(pad));
                Box::new(ShmTransport::new(Arc::clone(pad)))
            }
            Iface::Wire { listen } => {
                let engine = WireEngine::start(desc.rank, listen, tx.clone())?;
                wire = Some(Arc::clone(&engine));
                Box::new(WireTransport::new(engine))
            }
        };

        let limits = desc.limits;
        let ct_wait = Arc::new(WaitSet::new());
        let eq_wait = Arc::new(WaitSet::new());
        let inner = Arc::new(NiInner {
            index,
            rank: desc.rank,
            options: desc.options,
            drop_count: AtomicU64::new(0),
            perm_violations: AtomicU64::new(0),
            mds: Pool::with_capacity(HandleKind::Md, index, limits.max_mds),
            les: Pool::with_capacity(HandleKind::Le, index, limits.max_entries),
            mes: Pool::with_capacity(HandleKind::Me, index, limits.max_entries),
            cts: Pool::with_capacity(HandleKind::Ct, index, limits.max_cts),
            eqs: Pool::with_capacity(HandleKind::Eq, index, limits.max_eqs),
            pt: PtTable::new(limits.max_pt_index as usize + 1),
            ct_wait,
            eq_wait,
            bufs: BufPool::new(
                config.small_frag_size,
                config.small_frag_count,
                config.large_frag_size,
                config.large_frag_count,
            ),
            transport,
            shutdown: AtomicBool::new(false),
            pending: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(1),
            triggered: AtomicUsize::new(0),
            wire,
            pad: shm,
            threads: Mutex::new(Vec::new()),
            fini_done: AtomicBool::new(false),
            limits,
        });

        let rx = Arc::new(Mutex::new(rx));
        let mut threads = Vec::with_capacity(desc.progress_threads);
        for worker in 0..desc.progress_threads {
            let ni = Arc::clone(&inner);
            let rx = Arc::clone(&rx);
            let handle = thread::Builder::new()
                .name(format!("portl-progress-{}-{}", desc.rank, worker))
                .spawn(move || crate::progress::progress_loop(ni, rx))
                .map_err(Error::Io)?;
            threads.push(handle);
        }
        *inner.threads.lock().unwrap() = threads;
        debug!("ni {} created for rank {}", index, desc.rank);
        Ok(Ni { inner })
    }

    /// Tears the interface down: every blocked waiter returns
    /// [`Error::Interrupted`], the progress machinery stops, and the
    /// interface leaves the fabric. Idempotent.
    pub fn fini(&self) {
        let ni = &self.inner;
        if ni.fini_done.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("ni {} (rank {}) tearing down", ni.index, ni.rank);
        ni.shutdown.store(true, Ordering::SeqCst);
        for ct in ni.cts.iter_live() {
            ct.interrupt();
        }
        ni.ct_wait.interrupt();
        ni.eq_wait.interrupt();
        ni.transport.shutdown();
        let threads: Vec<_> = ni.threads.lock().unwrap().drain(..).collect();
        for handle in threads {
            let _ = handle.join();
        }
        if let Some(pad) = &ni.pad {
            pad.deregister(ni.rank);
        }
    }

    pub fn rank(&self) -> u32 {
        self.inner.rank
    }

    pub fn options(&self) -> NiOptions {
        self.inner.options
    }

    /// The limits this interface was created with.
    pub fn limits(&self) -> &Limits {
        &self.inner.limits
    }

    pub fn status(&self, register: StatusRegister) -> u64 {
        match register {
            StatusRegister::DropCount => self.inner.drop_count.load(Ordering::SeqCst),
            StatusRegister::PermViolations => self.inner.perm_violations.load(Ordering::SeqCst),
        }
    }

    /// Address the wire engine listens on; `None` on the shared-memory
    /// fabric.
    pub fn listen_addr(&self) -> Option<SocketAddr> {
        self.inner.wire.as_ref().map(|engine| engine.local_addr())
    }

    /// Records where a peer rank can be dialled (wire fabric only).
    pub fn set_peer(&self, rank: u32, addr: SocketAddr) -> Result<()> {
        let engine = self.inner.wire.as_ref().ok_or(Error::ArgInvalid)?;
        engine.set_peer(rank, addr);
        Ok(())
    }

    // === Portal table ===

    /// Allocates a portal-table entry. `requested == None` picks the
    /// lowest free index.
    pub fn pt_alloc(
        &self,
        requested: Option<u32>,
        options: PtOptions,
        eq: Handle,
    ) -> Result<u32> {
        if let Some(index) = requested {
            if index > self.inner.limits.max_pt_index {
                return Err(Error::ArgInvalid);
            }
        }
        let eq = if eq == Handle::NONE {
            None
        } else {
            self.inner.eqs.get(eq)?;
            Some(eq)
        };
        self.inner.pt.alloc(requested, options, eq)
    }

    pub fn pt_free(&self, index: u32) -> Result<()> {
        self.inner.pt.free(index)
    }

    pub fn pt_enable(&self, index: u32) -> Result<()> {
        self.inner.pt.enable(index)
    }

    /// Reports the condition of a portal-table slot.
    pub fn pt_validate(&self, index: u32) -> Result<PtValidation> {
        self.inner.pt.validate(index)
    }

    pub fn pt_disable(&self, index: u32) -> Result<()> {
        self.inner.pt.disable(index)
    }

    // === Memory descriptors ===

    /// Binds a window of the caller's memory for use as an initiator
    /// buffer.
    ///
    /// # Safety
    ///
    /// The described memory must stay valid, and must not be freed or
    /// shrunk, until [`md_release`] succeeds; the runtime reads and
    /// writes it from its progress threads.
    ///
    /// [`md_release`]: Ni::md_release
    pub unsafe fn md_bind(&self, desc: &MdDesc) -> Result<Handle> {
        if desc.iovecs.len() > self.inner.limits.max_iovecs {
            return Err(Error::ArgInvalid);
        }
        if desc.eq != Handle::NONE {
            self.inner.eqs.get(desc.eq)?;
        }
        if desc.ct != Handle::NONE {
            self.inner.cts.get(desc.ct)?;
        }
        let md = Md::new(desc)?;
        let (handle, _) = self.inner.mds.insert(md)?;
        Ok(handle)
    }

    /// Releases a descriptor. Fails with [`Error::InUse`] while
    /// operations are still outstanding against it.
    pub fn md_release(&self, md: Handle) -> Result<()> {
        if self.inner.mds.get(md)?.in_use() {
            return Err(Error::InUse);
        }
        self.inner.mds.remove(md)?;
        Ok(())
    }

    // === List and match entries ===

    /// Posts a list entry on a non-matching interface.
    ///
    /// # Safety
    ///
    /// As [`md_bind`]: the described memory must outlive the entry.
    ///
    /// [`md_bind`]: Ni::md_bind
    pub unsafe fn le_append(
        &self,
        pt_index: u32,
        desc: &LeDesc,
        list: ListKind,
        user_ptr: u64,
    ) -> Result<Handle> {
        if self.inner.options.contains(NiOptions::MATCHING) {
            return Err(Error::ArgInvalid);
        }
        let entry = ListEntry::from_le(desc, pt_index, list, user_ptr)?;
        self.append(entry, desc.ct, &self.inner.les)
    }

    /// Posts a match entry on a matching interface.
    ///
    /// # Safety
    ///
    /// As [`md_bind`]: the described memory must outlive the entry.
    ///
    /// [`md_bind`]: Ni::md_bind
    pub unsafe fn me_append(
        &self,
        pt_index: u32,
        desc: &MeDesc,
        list: ListKind,
        user_ptr: u64,
    ) -> Result<Handle> {
        if !self.inner.options.contains(NiOptions::MATCHING) {
            return Err(Error::ArgInvalid);
        }
        let entry = ListEntry::from_me(desc, pt_index, list, user_ptr)?;
        self.append(entry, desc.ct, &self.inner.mes)
    }

    fn append(&self, entry: ListEntry, ct: Handle, pool: &Pool<ListEntry>) -> Result<Handle> {
        if entry.pt_index > self.inner.limits.max_pt_index {
            return Err(Error::ArgInvalid);
        }
        if entry.list == ListKind::ProbeOnly {
            // Declared but unimplemented; see the runtime design notes.
            return Err(Error::Fail);
        }
        if ct != Handle::NONE {
            self.inner.cts.get(ct)?;
        }
        let (handle, entry) = pool.insert(entry)?;
        match deliver::append_entry(&self.inner, handle, &entry) {
            Ok(consumed) => {
                if consumed {
                    // A use-once entry eaten by a buffered header never
                    // reaches the list; its handle is already stale.
                    let _ = pool.remove(handle);
                }
                Ok(handle)
            }
            Err(err) => {
                let _ = pool.remove(handle);
                Err(err)
            }
        }
    }

    /// Unlinks a posted entry from its portal-table list and frees it.
    pub fn le_unlink(&self, handle: Handle) -> Result<()> {
        let entry = self.inner.entry(handle)?;
        let mut pt = self.inner.pt.lock(entry.pt_index)?;
        if !pt.unlink(entry.list, handle) {
            return Err(Error::ArgInvalid);
        }
        drop(pt);
        self.inner.remove_entry(handle);
        Ok(())
    }

    // === Counting events ===

    pub fn ct_alloc(&self) -> Result<Handle> {
        let (handle, _) = self.inner.cts.insert(Ct::new())?;
        Ok(handle)
    }

    /// Frees a counting event, interrupting its waiters and discarding
    /// its pending triggered operations.
    pub fn ct_free(&self, handle: Handle) -> Result<()> {
        let ct = self.inner.cts.remove(handle)?;
        let discarded = {
            let _wait = self.inner.ct_wait.mutex.lock().unwrap();
            let mut state = ct.state.lock().unwrap();
            state.interrupt = true;
            ct.cond.notify_all();
            state.pending.drain(..).count()
        };
        if discarded > 0 {
            self.inner.triggered_release(discarded);
        }
        self.inner.ct_wait.wake();
        Ok(())
    }

    pub fn ct_get(&self, handle: Handle) -> Result<CtEvent> {
        Ok(self.inner.cts.get(handle)?.value())
    }

    pub fn ct_set(&self, handle: Handle, value: CtEvent) -> Result<()> {
        let ct = self.inner.cts.get(handle)?;
        self.inner.ct_mutate(&ct, |event| *event = value);
        Ok(())
    }

    pub fn ct_inc(&self, handle: Handle, increment: CtEvent) -> Result<()> {
        let ct = self.inner.cts.get(handle)?;
        self.inner.ct_mutate(&ct, |event| {
            event.success += increment.success;
            event.failure += increment.failure;
        });
        Ok(())
    }

    /// Blocks until the counting event reaches `threshold`.
    pub fn ct_wait(&self, handle: Handle, threshold: u64) -> Result<CtEvent> {
        let ct = self.inner.cts.get(handle)?;
        ct.wait(threshold)
    }

    /// Waits on several counting events of this interface at once.
    /// Returns the index of the first to reach its threshold together
    /// with its value; [`Error::CtNoneReached`] on timeout.
    ///
    /// `timeout_ms` is milliseconds; `None` waits forever.
    pub fn ct_poll(
        &self,
        handles: &[Handle],
        thresholds: &[u64],
        timeout_ms: Option<u64>,
    ) -> Result<(usize, CtEvent)> {
        if handles.is_empty() || handles.len() != thresholds.len() {
            return Err(Error::ArgInvalid);
        }
        let cts = handles
            .iter()
            .map(|handle| self.inner.cts.get(*handle))
            .collect::<Result<Vec<_>>>()?;
        let deadline = timeout_ms.map(|ms| Instant::now() + Duration::from_millis(ms));

        let mut seq = self.inner.ct_wait.mutex.lock().unwrap();
        loop {
            for (which, ct) in cts.iter().enumerate() {
                let state = ct.state.lock().unwrap();
                if state.interrupt {
                    return Err(Error::Interrupted);
                }
                if state.event.reached(thresholds[which]) {
                    return Ok((which, state.event));
                }
            }
            if self.inner.ct_wait.interrupted() {
                return Err(Error::Interrupted);
            }
            match deadline {
                None => seq = self.inner.ct_wait.cond.wait(seq).unwrap(),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(Error::CtNoneReached);
                    }
                    let (guard, _) = self
                        .inner
                        .ct_wait
                        .cond
                        .wait_timeout(seq, deadline - now)
                        .unwrap();
                    seq = guard;
                }
            }
        }
    }

    /// Discards every triggered operation pending on the counting
    /// event.
    pub fn ct_cancel_triggered(&self, handle: Handle) -> Result<()> {
        let ct = self.inner.cts.get(handle)?;
        let discarded = {
            let _wait = self.inner.ct_wait.mutex.lock().unwrap();
            let mut state = ct.state.lock().unwrap();
            state.pending.drain(..).count()
        };
        if discarded > 0 {
            self.inner.triggered_release(discarded);
        }
        Ok(())
    }

    // === Event queues ===

    pub fn eq_alloc(&self, capacity: usize) -> Result<Handle> {
        if capacity == 0 {
            return Err(Error::ArgInvalid);
        }
        let eq = EventQueue::new(capacity, Arc::clone(&self.inner.eq_wait));
        let (handle, _) = self.inner.eqs.insert(eq)?;
        Ok(handle)
    }

    pub fn eq_free(&self, handle: Handle) -> Result<()> {
        self.inner.eqs.remove(handle)?;
        self.inner.eq_wait.wake();
        Ok(())
    }

    /// Non-blocking dequeue of the oldest event.
    pub fn eq_get(&self, handle: Handle) -> Result<Event> {
        self.inner.eqs.get(handle)?.get()
    }

    /// Blocks until the queue produces an event.
    pub fn eq_wait(&self, handle: Handle) -> Result<Event> {
        self.inner.eqs.get(handle)?.wait()
    }

    /// Waits over several queues with a millisecond timeout.
    pub fn eq_poll(
        &self,
        handles: &[Handle],
        timeout_ms: Option<u64>,
    ) -> Result<(usize, Event)> {
        let eqs = handles
            .iter()
            .map(|handle| self.inner.eqs.get(*handle))
            .collect::<Result<Vec<_>>>()?;
        EventQueue::poll(&eqs, timeout_ms, &self.inner.eq_wait)
    }

    // === Initiator operations ===

    /// Pushes `length` bytes from the descriptor window into the
    /// target's matched entry.
    #[allow(clippy::too_many_arguments)]
    pub fn put(
        &self,
        md: Handle,
        local_offset: u64,
        length: u64,
        ack: AckReq,
        target: u32,
        pt_index: u32,
        match_bits: u64,
        remote_offset: u64,
        user_ptr: u64,
        hdr_data: u64,
    ) -> Result<()> {
        initiator::start_op(
            &self.inner,
            OpArgs {
                kind: HdrType::Put,
                md,
                local_offset,
                length,
                ack_req: ack,
                target,
                pt_index,
                match_bits,
                remote_offset,
                user_ptr,
                hdr_data,
                atomic: None,
                operand: 0,
                get_md: None,
            },
        )
    }

    /// Pulls `length` bytes from the target's matched entry into the
    /// descriptor window; completion is the REPLY event.
    #[allow(clippy::too_many_arguments)]
    pub fn get(
        &self,
        md: Handle,
        local_offset: u64,
        length: u64,
        target: u32,
        pt_index: u32,
        match_bits: u64,
        remote_offset: u64,
        user_ptr: u64,
    ) -> Result<()> {
        initiator::start_op(
            &self.inner,
            OpArgs {
                kind: HdrType::Get,
                md,
                local_offset,
                length,
                ack_req: AckReq::None,
                target,
                pt_index,
                match_bits,
                remote_offset,
                user_ptr,
                hdr_data: 0,
                atomic: None,
                operand: 0,
                get_md: None,
            },
        )
    }

    /// Applies an atomic update to the target's matched entry.
    #[allow(clippy::too_many_arguments)]
    pub fn atomic(
        &self,
        md: Handle,
        local_offset: u64,
        length: u64,
        ack: AckReq,
        target: u32,
        pt_index: u32,
        match_bits: u64,
        remote_offset: u64,
        user_ptr: u64,
        hdr_data: u64,
        op: AtomicOp,
        datatype: AtomicType,
    ) -> Result<()> {
        initiator::start_op(
            &self.inner,
            OpArgs {
                kind: HdrType::Atomic,
                md,
                local_offset,
                length,
                ack_req: ack,
                target,
                pt_index,
                match_bits,
                remote_offset,
                user_ptr,
                hdr_data,
                atomic: Some((op, datatype)),
                operand: 0,
                get_md: None,
            },
        )
    }

    /// Atomic update returning the target's prior contents into
    /// `get_md`.
    #[allow(clippy::too_many_arguments)]
    pub fn fetch_atomic(
        &self,
        get_md: Handle,
        get_offset: u64,
        put_md: Handle,
        put_offset: u64,
        length: u64,
        target: u32,
        pt_index: u32,
        match_bits: u64,
        remote_offset: u64,
        user_ptr: u64,
        hdr_data: u64,
        op: AtomicOp,
        datatype: AtomicType,
    ) -> Result<()> {
        initiator::start_op(
            &self.inner,
            OpArgs {
                kind: HdrType::FetchAtomic,
                md: put_md,
                local_offset: put_offset,
                length,
                ack_req: AckReq::None,
                target,
                pt_index,
                match_bits,
                remote_offset,
                user_ptr,
                hdr_data,
                atomic: Some((op, datatype)),
                operand: 0,
                get_md: Some((get_md, get_offset)),
            },
        )
    }

    /// Swap-family atomic; `operand` feeds conditional and masked
    /// swaps.
    #[allow(clippy::too_many_arguments)]
    pub fn swap(
        &self,
        get_md: Handle,
        get_offset: u64,
        put_md: Handle,
        put_offset: u64,
        length: u64,
        target: u32,
        pt_index: u32,
        match_bits: u64,
        remote_offset: u64,
        user_ptr: u64,
        hdr_data: u64,
        operand: u64,
        op: AtomicOp,
        datatype: AtomicType,
    ) -> Result<()> {
        initiator::start_op(
            &self.inner,
            OpArgs {
                kind: HdrType::Swap,
                md: put_md,
                local_offset: put_offset,
                length,
                ack_req: AckReq::None,
                target,
                pt_index,
                match_bits,
                remote_offset,
                user_ptr,
                hdr_data,
                atomic: Some((op, datatype)),
                operand,
                get_md: Some((get_md, get_offset)),
            },
        )
    }

    // === Triggered operations ===

    /// A put issued when `trig_ct` reaches `threshold`.
    #[allow(clippy::too_many_arguments)]
    pub fn triggered_put(
        &self,
        md: Handle,
        local_offset: u64,
        length: u64,
        ack: AckReq,
        target: u32,
        pt_index: u32,
        match_bits: u64,
        remote_offset: u64,
        user_ptr: u64,
        hdr_data: u64,
        trig_ct: Handle,
        threshold: u64,
    ) -> Result<()> {
        initiator::submit_triggered(
            &self.inner,
            TriggeredAction::Op(OpArgs {
                kind: HdrType::Put,
                md,
                local_offset,
                length,
                ack_req: ack,
                target,
                pt_index,
                match_bits,
                remote_offset,
                user_ptr,
                hdr_data,
                atomic: None,
                operand: 0,
                get_md: None,
            }),
            trig_ct,
            threshold,
        )
    }

    /// A get issued when `trig_ct` reaches `threshold`.
    #[allow(clippy::too_many_arguments)]
    pub fn triggered_get(
        &self,
        md: Handle,
        local_offset: u64,
        length: u64,
        target: u32,
        pt_index: u32,
        match_bits: u64,
        remote_offset: u64,
        user_ptr: u64,
        trig_ct: Handle,
        threshold: u64,
    ) -> Result<()> {
        initiator::submit_triggered(
            &self.inner,
            TriggeredAction::Op(OpArgs {
                kind: HdrType::Get,
                md,
                local_offset,
                length,
                ack_req: AckReq::None,
                target,
                pt_index,
                match_bits,
                remote_offset,
                user_ptr,
                hdr_data: 0,
                atomic: None,
                operand: 0,
                get_md: None,
            }),
            trig_ct,
            threshold,
        )
    }

    /// An atomic issued when `trig_ct` reaches `threshold`.
    #[allow(clippy::too_many_arguments)]
    pub fn triggered_atomic(
        &self,
        md: Handle,
        local_offset: u64,
        length: u64,
        ack: AckReq,
        target: u32,
        pt_index: u32,
        match_bits: u64,
        remote_offset: u64,
        user_ptr: u64,
        hdr_data: u64,
        op: AtomicOp,
        datatype: AtomicType,
        trig_ct: Handle,
        threshold: u64,
    ) -> Result<()> {
        initiator::submit_triggered(
            &self.inner,
            TriggeredAction::Op(OpArgs {
                kind: HdrType::Atomic,
                md,
                local_offset,
                length,
                ack_req: ack,
                target,
                pt_index,
                match_bits,
                remote_offset,
                user_ptr,
                hdr_data,
                atomic: Some((op, datatype)),
                operand: 0,
                get_md: None,
            }),
            trig_ct,
            threshold,
        )
    }

    /// A fetch-atomic issued when `trig_ct` reaches `threshold`.
    #[allow(clippy::too_many_arguments)]
    pub fn triggered_fetch_atomic(
        &self,
        get_md: Handle,
        get_offset: u64,
        put_md: Handle,
        put_offset: u64,
        length: u64,
        target: u32,
        pt_index: u32,
        match_bits: u64,
        remote_offset: u64,
        user_ptr: u64,
        hdr_data: u64,
        op: AtomicOp,
        datatype: AtomicType,
        trig_ct: Handle,
        threshold: u64,
    ) -> Result<()> {
        initiator::submit_triggered(
            &self.inner,
            TriggeredAction::Op(OpArgs {
                kind: HdrType::FetchAtomic,
                md: put_md,
                local_offset: put_offset,
                length,
                ack_req: AckReq::None,
                target,
                pt_index,
                match_bits,
                remote_offset,
                user_ptr,
                hdr_data,
                atomic: Some((op, datatype)),
                operand: 0,
                get_md: Some((get_md, get_offset)),
            }),
            trig_ct,
            threshold,
        )
    }

    /// A swap issued when `trig_ct` reaches `threshold`.
    #[allow(clippy::too_many_arguments)]
    pub fn triggered_swap(
        &self,
        get_md: Handle,
        get_offset: u64,
        put_md: Handle,
        put_offset: u64,
        length: u64,
        target: u32,
        pt_index: u32,
        match_bits: u64,
        remote_offset: u64,
        user_ptr: u64,
        hdr_data: u64,
        operand: u64,
        op: AtomicOp,
        datatype: AtomicType,
        trig_ct: Handle,
        threshold: u64,
    ) -> Result<()> {
        initiator::submit_triggered(
            &self.inner,
            TriggeredAction::Op(OpArgs {
                kind: HdrType::Swap,
                md: put_md,
                local_offset: put_offset,
                length,
                ack_req: AckReq::None,
                target,
                pt_index,
                match_bits,
                remote_offset,
                user_ptr,
                hdr_data,
                atomic: Some((op, datatype)),
                operand,
                get_md: Some((get_md, get_offset)),
            }),
            trig_ct,
            threshold,
        )
    }

    /// A counting-event increment deferred until `trig_ct` reaches
    /// `threshold`.
    pub fn triggered_ct_inc(
        &self,
        ct: Handle,
        increment: CtEvent,
        trig_ct: Handle,
        threshold: u64,
    ) -> Result<()> {
        self.inner.cts.get(ct)?;
        initiator::submit_triggered(
            &self.inner,
            TriggeredAction::CtInc { ct, increment },
            trig_ct,
            threshold,
        )
    }

    /// A counting-event overwrite deferred until `trig_ct` reaches
    /// `threshold`.
    pub fn triggered_ct_set(
        &self,
        ct: Handle,
        value: CtEvent,
        trig_ct: Handle,
        threshold: u64,
    ) -> Result<()> {
        self.inner.cts.get(ct)?;
        initiator::submit_triggered(
            &self.inner,
            TriggeredAction::CtSet { ct, value },
            trig_ct,
            threshold,
        )
    }
}

impl NiInner {
    /// Resolves a posted entry handle from either entry pool.
    pub(crate) fn entry(&self, handle: Handle) -> Result<Arc<ListEntry>> {
        match handle.kind() {
            Some(HandleKind::Le) => self.les.get(handle),
            Some(HandleKind::Me) => self.mes.get(handle),
            _ => Err(Error::ArgInvalid),
        }
    }

    pub(crate) fn remove_entry(&self, handle: Handle) {
        let _ = match handle.kind() {
            Some(HandleKind::Le) => self.les.remove(handle),
            Some(HandleKind::Me) => self.mes.remove(handle),
            _ => Err(Error::ArgInvalid),
        };
    }

    pub(crate) fn post_event(&self, eq: Handle, event: Event) {
        if let Ok(eq) = self.eqs.get(eq) {
            eq.push(event);
        }
    }

    /// Applies one mutation to a counting event under the interface
    /// and object locks, broadcasts both wait paths, and fires every
    /// triggered operation whose threshold the new value reaches.
    pub(crate) fn ct_mutate(&self, ct: &Ct, mutate: impl FnOnce(&mut CtEvent)) {
        let fired = {
            let mut seq = self.ct_wait.mutex.lock().unwrap();
            let mut state = ct.state.lock().unwrap();
            mutate(&mut state.event);
            ct.cond.notify_all();
            *seq = seq.wrapping_add(1);
            self.ct_wait.cond.notify_all();
            state.take_fired()
        };
        if fired.is_empty() {
            return;
        }
        self.triggered_release(fired.len());
        for op in fired {
            crate::triggered::execute(self, op.action);
        }
    }

    pub(crate) fn register_pending(&self, op: InitOp) -> u64 {
        let token = self.next_token.fetch_add(1, Ordering::SeqCst);
        self.pending.lock().unwrap().insert(token, op);
        token
    }

    pub(crate) fn take_pending(&self, token: u64) -> Option<InitOp> {
        self.pending.lock().unwrap().remove(&token)
    }

    /// Claims one slot against the triggered-operation limit.
    pub(crate) fn triggered_reserve(&self) -> bool {
        let prev = self.triggered.fetch_add(1, Ordering::SeqCst);
        if prev >= self.limits.max_triggered_ops {
            self.triggered.fetch_sub(1, Ordering::SeqCst);
            return false;
        }
        true
    }

    pub(crate) fn triggered_release(&self, count: usize) {
        self.triggered.fetch_sub(count, Ordering::SeqCst);
    }
}
