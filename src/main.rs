//! socket-threads demo: an echo server built directly on top of [`Pool`].
//!
//! Exercises the multiplexer end to end the way the reference crate's
//! `main.rs` exercises its `Server`: parse a small CLI, initialize
//! logging, bind a listener, and hand every accepted connection to the
//! pool with a trivial callback. This binary is integration scaffolding
//! for the library, not a feature of the subsystem itself.

use std::net::TcpListener as StdTcpListener;
use std::sync::Arc;

use clap::Parser;
use mio::net::TcpStream;
use socket_threads::echo::EchoCallback;
use socket_threads::Pool;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Command-line arguments for the echo demo server.
#[derive(Parser, Debug)]
#[command(name = "socket-threads")]
#[command(about = "Worker-pool socket multiplexer echo demo", long_about = None)]
struct CliArgs {
    /// Address to bind to.
    #[arg(short = 'l', long, default_value = "127.0.0.1:7878")]
    listen: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> std::io::Result<()> {
    let args = CliArgs::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    let listener = StdTcpListener::bind(&args.listen)?;
    info!(listen = %args.listen, "socket-threads echo demo listening");

    let pool = Pool::new();

    loop {
        let (stream, peer) = match listener.accept() {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "accept failed");
                continue;
            }
        };

        if let Err(e) = stream.set_nonblocking(true) {
            warn!(error = %e, peer = %peer, "failed to set non-blocking, dropping connection");
            continue;
        }

        let socket = TcpStream::from_std(stream);
        let callback: Arc<dyn socket_threads::ClientCallback> = Arc::new(EchoCallback::new());

        if pool.attach(socket, callback) {
            info!(peer = %peer, workers = pool.worker_count(), "attached connection");
        } else {
            error!(peer = %peer, "failed to attach connection to pool");
        }
    }
}
