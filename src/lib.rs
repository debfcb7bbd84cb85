//! A user-space runtime for a one-sided, connection-oriented messaging
//! API: initiators push (put), pull (get), and atomically update
//! memory regions that targets have posted into a portal table,
//! identified by match bits and a table index.
//!
//! The runtime multiplexes operations onto two transports — a framed
//! wire transport for inter-node traffic and a shared-memory path for
//! intra-node peers — while enforcing matching semantics, counting
//! events with triggered operations, and bounded event queues.
//!
//! # Examples
//!
//! Two ranks on the intra-node fabric; rank 1 posts a buffer, rank 0
//! pushes into it:
//!
//! ```no_run
//! use portl::{AckReq, Config, Handle, LeDesc, LeOptions, ListKind, NiDesc, Runtime};
//!
//! # fn main() -> portl::Result<()> {
//! let runtime = Runtime::init(Config::standalone(2))?;
//! let ni0 = runtime.ni_init(NiDesc { rank: 0, ..NiDesc::default() })?;
//! let ni1 = runtime.ni_init(NiDesc { rank: 1, ..NiDesc::default() })?;
//!
//! let mut landing = [0u8; 16];
//! let pt = ni1.pt_alloc(Some(0), Default::default(), Handle::NONE)?;
//! let _le = unsafe {
//!     ni1.le_append(
//!         pt,
//!         &LeDesc {
//!             start: landing.as_mut_ptr(),
//!             length: 16,
//!             ct: Handle::NONE,
//!             ac_id: portl::UID_ANY,
//!             options: LeOptions::OP_PUT,
//!         },
//!         ListKind::Priority,
//!         0,
//!     )?
//! };
//!
//! let mut payload = *b"sixteen bytes!!!";
//! let md = unsafe {
//!     ni0.md_bind(&portl::MdDesc {
//!         start: payload.as_mut_ptr(),
//!         length: 16,
//!         iovecs: Vec::new(),
//!         options: Default::default(),
//!         eq: Handle::NONE,
//!         ct: Handle::NONE,
//!     })?
//! };
//! ni0.put(md, 0, 16, AckReq::None, 1, pt, 0, 0, 0, 0)?;
//! # Ok(())
//! # }
//! ```

#![cfg(unix)]
#![warn(missing_debug_implementations)]

mod atomics;
mod buf;
mod config;
mod conn;
mod ct;
mod deliver;
mod entry;
mod eq;
mod error;
mod event;
mod handle;
mod initiator;
mod md;
mod ni;
mod options;
mod pool;
pub mod ppe;
mod progress;
mod proto;
mod pt;
mod runtime;
mod sys;
mod transport;
mod triggered;

pub use atomics::{AtomicOp, AtomicType};
pub(crate) use buf::Buf;
pub use config::Config;
pub use entry::{LeDesc, MeDesc, JID_ANY, UID_ANY};
pub use error::{Error, Result};
pub use event::{CtEvent, Event, EventKind, NiFail};
pub use handle::Handle;
pub use md::{Iovec, MdDesc};
pub use ni::{Iface, Limits, Ni, NiDesc, StatusRegister, MAX_PROGRESS_THREADS, WIRE_PORT};
pub use options::{AckReq, LeOptions, ListKind, MdOptions, NiOptions, PtOptions};
pub use pt::PtValidation;
pub use runtime::Runtime;
