use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use log::debug;

use crate::config::Config;
use crate::ni::{Ni, NiDesc};
use crate::transport::CommPad;
use crate::{Error, Result};

// Interface indices are 4 bits in a handle.
const MAX_NIS: u8 = 16;

struct RuntimeInner {
    config: Config,
    pad: Arc<CommPad>,
    next_ni: AtomicU8,
}

/// The per-process runtime: bootstrap configuration plus the node's
/// shared communication pad. Interfaces are created from here.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt.debug_struct("Runtime")
            .field("config", &self.inner.config)
            .finish()
    }
}

impl Runtime {
    /// Initialises the runtime from an explicit configuration.
    pub fn init(config: Config) -> Result<Runtime> {
        debug!(
            "runtime init: {} procs, rank {}, pad '{}'",
            config.num_procs, config.rank, config.shm_name
        );
        let pad = CommPad::new(config.num_procs as usize);
        Ok(Runtime {
            inner: Arc::new(RuntimeInner {
                config,
                pad,
                next_ni: AtomicU8::new(0),
            }),
        })
    }

    /// Initialises the runtime from the `PORTALS4_*` environment.
    pub fn from_env() -> Result<Runtime> {
        Runtime::init(Config::from_env()?)
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Creates a network interface on this runtime.
    pub fn ni_init(&self, desc: NiDesc) -> Result<Ni> {
        let index = self.inner.next_ni.fetch_add(1, Ordering::SeqCst);
        if index >= MAX_NIS {
            self.inner.next_ni.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::NoSpace);
        }
        Ni::create(index, desc, &self.inner.config, &self.inner.pad)
    }
}
