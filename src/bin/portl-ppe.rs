//! The process-engine server binary.

use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::Parser;
use log::{error, info};

use portl::ppe::{PpeConfig, PpeServer, PPE_SOCKET_NAME};
use portl::MAX_PROGRESS_THREADS;

#[derive(Debug, Parser)]
#[command(name = "portl-ppe", about = "Hosts object pools and progress threads for client processes.")]
struct Args {
    /// Command-queue capacity per client (min 1).
    #[arg(long, default_value_t = 1000)]
    nppebufs: usize,

    /// Engine worker count.
    #[arg(long, default_value_t = 1)]
    nprogthreads: usize,

    /// Control socket path.
    #[arg(long, default_value = PPE_SOCKET_NAME)]
    socket: PathBuf,
}

static STOP: AtomicBool = AtomicBool::new(false);

extern "C" fn on_signal(_sig: libc::c_int) {
    STOP.store(true, Ordering::SeqCst);
}

fn main() {
    env_logger::init();
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            // Usage goes to the user; configuration failures are exit
            // code 1.
            let _ = err.print();
            process::exit(if err.use_stderr() { 1 } else { 0 });
        }
    };
    if args.nppebufs < 1 {
        error!("invalid nppebufs: {}", args.nppebufs);
        process::exit(1);
    }
    if args.nprogthreads < 1 || args.nprogthreads > MAX_PROGRESS_THREADS {
        error!(
            "invalid nprogthreads: {} (1..={})",
            args.nprogthreads, MAX_PROGRESS_THREADS
        );
        process::exit(1);
    }

    let server = match PpeServer::start(PpeConfig {
        socket: args.socket,
        nppebufs: args.nppebufs,
        nprogthreads: args.nprogthreads,
        ..PpeConfig::default()
    }) {
        Ok(server) => server,
        Err(err) => {
            error!("engine failed to start: {}", err);
            process::exit(1);
        }
    };

    let handler = on_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
    unsafe {
        libc::signal(libc::SIGINT, handler);
        libc::signal(libc::SIGTERM, handler);
    }
    while !STOP.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(100));
    }
    info!("shutting down");
    server.stop();
}
