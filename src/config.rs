use std::env;

use crate::{Error, Result};

/// Client-side bootstrap configuration.
///
/// [`from_env`] reads the `PORTALS4_*` environment; the first four
/// variables are required and their absence fails initialisation with
/// [`Error::NoInit`]. Embedders that already know their topology can
/// build a `Config` directly.
///
/// [`from_env`]: Config::from_env
#[derive(Debug, Clone)]
pub struct Config {
    /// Name of the node's shared communication pad.
    pub shm_name: String,
    /// Number of processes on the pad; ranks run `0..num_procs`.
    pub num_procs: u32,
    /// This process's rank.
    pub rank: u32,
    /// Per-process communication buffer budget in bytes.
    pub comm_size: usize,
    pub small_frag_size: usize,
    pub large_frag_size: usize,
    pub small_frag_count: usize,
    pub large_frag_count: usize,
}

pub(crate) const DEFAULT_SMALL_FRAG_SIZE: usize = 256;
pub(crate) const DEFAULT_LARGE_FRAG_SIZE: usize = 4096;
pub(crate) const DEFAULT_SMALL_FRAG_COUNT: usize = 512;
pub(crate) const DEFAULT_LARGE_FRAG_COUNT: usize = 128;

impl Config {
    pub fn from_env() -> Result<Config> {
        Ok(Config {
            shm_name: env::var("PORTALS4_SHM_NAME").map_err(|_| Error::NoInit)?,
            num_procs: required_num("PORTALS4_NUM_PROCS")?,
            rank: required_num("PORTALS4_RANK")?,
            comm_size: required_num("PORTALS4_COMM_SIZE")? as usize,
            small_frag_size: optional_num("PORTALS4_SMALL_FRAG_SIZE", DEFAULT_SMALL_FRAG_SIZE)?,
            large_frag_size: optional_num("PORTALS4_LARGE_FRAG_SIZE", DEFAULT_LARGE_FRAG_SIZE)?,
            small_frag_count: optional_num("PORTALS4_SMALL_FRAG_COUNT", DEFAULT_SMALL_FRAG_COUNT)?,
            large_frag_count: optional_num("PORTALS4_LARGE_FRAG_COUNT", DEFAULT_LARGE_FRAG_COUNT)?,
        })
    }

    /// A standalone configuration for embedders and tests: `num_procs`
    /// ranks, default fragment classes.
    pub fn standalone(num_procs: u32) -> Config {
        Config {
            shm_name: String::new(),
            num_procs,
            rank: 0,
            comm_size: 1 << 20,
            small_frag_size: DEFAULT_SMALL_FRAG_SIZE,
            large_frag_size: DEFAULT_LARGE_FRAG_SIZE,
            small_frag_count: DEFAULT_SMALL_FRAG_COUNT,
            large_frag_count: DEFAULT_LARGE_FRAG_COUNT,
        }
    }
}

fn required_num(name: &str) -> Result<u32> {
    let raw = env::var(name).map_err(|_| Error::NoInit)?;
    raw.trim().parse().map_err(|_| Error::NoInit)
}

fn optional_num(name: &str, default: usize) -> Result<usize> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| Error::NoInit),
        Err(_) => Ok(default),
    }
}
