//! gvstream Echo Server
//!
//! Accepts connections from `onconnection`, echoes every `onread` chunk
//! back (try_write first, a suspending write in its own context for
//! whatever is left) and half-closes on EOF.
//!
//! Usage:
//!     cargo build --release -p gvs-echo
//!     ./target/release/gvs-echo [port]
//!
//! Test with:
//!     echo "hello" | nc -q1 localhost 9998

use gvstream::{Event, HandleId, Runtime, StreamBridge, StreamConfig, DEFAULT_BACKLOG};
use gvstream_core::{kerror, kinfo, kwarn};

use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

static RUNNING: AtomicBool = AtomicBool::new(true);

extern "C" fn handle_sigint(_sig: libc::c_int) {
    RUNNING.store(false, Ordering::Relaxed);
}

#[derive(Default)]
struct Stats {
    accepts: AtomicU64,
    bytes: AtomicU64,
    direct: AtomicU64,
    queued: AtomicU64,
    errors: AtomicU64,
}

impl Stats {
    fn bump(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }
}

/// Writer contexts spawned for one client and not finished yet.
/// While any exist, new data must queue behind them.
#[derive(Default)]
struct Conn {
    writers: AtomicUsize,
}

fn on_client(
    stats: &Arc<Stats>,
    conn: &Arc<Conn>,
    b: &Arc<StreamBridge>,
    h: HandleId,
    ev: Event,
) {
    match ev {
        Event::Read { error: None, data: Some(data) } => {
            Stats::bump(&stats.bytes, data.len() as u64);
            let sent = if conn.writers.load(Ordering::Acquire) == 0 {
                b.try_write(h, &data).unwrap_or(0)
            } else {
                0
            };
            if sent == data.len() {
                Stats::bump(&stats.direct, 1);
                return;
            }
            Stats::bump(&stats.queued, 1);
            conn.writers.fetch_add(1, Ordering::AcqRel);
            let b2 = Arc::clone(b);
            let st = Arc::clone(stats);
            let cn = Arc::clone(conn);
            let spawned = b.spawn(move || {
                if let Err(e) = b2.write(b2.write_req(), h, &data[sent..]) {
                    Stats::bump(&st.errors, 1);
                    kwarn!("gvs-echo: {} write: {}", h, e);
                }
                cn.writers.fetch_sub(1, Ordering::AcqRel);
            });
            if let Err(e) = spawned {
                conn.writers.fetch_sub(1, Ordering::AcqRel);
                kerror!("gvs-echo: spawn: {}", e);
            }
        }
        Event::Read { error, .. } => {
            if error.is_some() {
                Stats::bump(&stats.errors, 1);
            }
            let b2 = Arc::clone(b);
            let spawned = b.spawn(move || {
                // EOF: flush, half-close, then release the handle.
                if let Err(e) = b2.shutdown(h) {
                    kwarn!("gvs-echo: {} shutdown: {}", h, e);
                }
                let _ = b2.close(h);
            });
            if let Err(e) = spawned {
                kerror!("gvs-echo: spawn: {}", e);
            }
        }
        Event::Connection { .. } => {}
    }
}

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let port: u16 = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(9998);

    // SIGINT handler for clean shutdown
    unsafe {
        libc::signal(libc::SIGINT, handle_sigint as usize);
        libc::signal(libc::SIGTERM, handle_sigint as usize);
    }

    let mut rt = match Runtime::new(StreamConfig::from_env()) {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("gvs-echo: {}", e);
            std::process::exit(1);
        }
    };
    let bridge = rt.bridge();
    let stats = Arc::new(Stats::default());

    let server = match TcpListener::bind(("0.0.0.0", port))
        .map_err(|e| e.to_string())
        .and_then(|l| bridge.open(l).map_err(|e| e.to_string()))
    {
        Ok(h) => h,
        Err(e) => {
            eprintln!("gvs-echo: bind {}: {}", port, e);
            std::process::exit(1);
        }
    };

    let st = Arc::clone(&stats);
    bridge.set_listener(
        server,
        Arc::new(move |b: &Arc<StreamBridge>, server: HandleId, ev: Event| {
            if let Event::Connection { error: Some(e) } = ev {
                kwarn!("gvs-echo: accept failed: {}", e);
                return;
            }
            let client = b.open_empty();
            if let Err(e) = b.accept(server, client) {
                kwarn!("gvs-echo: accept: {}", e);
                let _ = b.close(client);
                return;
            }
            Stats::bump(&st.accepts, 1);
            let per_client = Arc::clone(&st);
            let conn = Arc::new(Conn::default());
            b.set_listener(
                client,
                Arc::new(move |b: &Arc<StreamBridge>, h: HandleId, ev: Event| {
                    on_client(&per_client, &conn, b, h, ev)
                }),
            );
            if let Err(e) = b.read_start(client) {
                kwarn!("gvs-echo: {} read_start: {}", client, e);
                let _ = b.close(client);
            }
        }),
    );

    if let Err(e) = bridge.listen(server, DEFAULT_BACKLOG) {
        eprintln!("gvs-echo: listen: {}", e);
        std::process::exit(1);
    }
    kinfo!("gvs-echo: listening on 0.0.0.0:{}", port);

    while RUNNING.load(Ordering::Relaxed) {
        if let Err(e) = rt.turn() {
            kerror!("gvs-echo: {}", e);
            break;
        }
    }

    eprintln!("\ngvs-echo: shutting down...");
    let _ = bridge.close(server);
    eprintln!(
        "gvs-echo: accepts={} bytes={} direct={} queued={} errors={}",
        stats.accepts.load(Ordering::Relaxed),
        stats.bytes.load(Ordering::Relaxed),
        stats.direct.load(Ordering::Relaxed),
        stats.queued.load(Ordering::Relaxed),
        stats.errors.load(Ordering::Relaxed),
    );
}
