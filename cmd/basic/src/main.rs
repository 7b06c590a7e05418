//! Basic syncport example
//!
//! Registers the backend named by the environment, then drives a shared
//! table through the registered dispatch object: readers and writers on the
//! reader/writer lock, a producer/consumer pair on a rendezvous, and a
//! yielding read from a pipe.
//!
//! # Environment Variables
//!
//! - `SP_BACKEND=native|coop` - Backend to register (default: native)
//! - `SP_LOG_LEVEL=debug` - Set log level (off, error, warn, info, debug, trace)
//! - `SP_FLUSH_EPRINT=1` - Flush debug output immediately

use std::collections::VecDeque;
use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use syncport::{coop, init_from_env, kdebug, kerror, kinfo};
use syncport::{BackendKind, CoopScheduler, SyncConfig, SyncResult, Threading};

/// Set when a worker panics
static FAILED: AtomicBool = AtomicBool::new(false);

// SP_BACKEND=coop SP_LOG_LEVEL=debug cargo run -p syncport-basic
fn main() {
    println!("=== syncport Basic Example ===\n");

    let threading = match init_from_env() {
        Ok(t) => t,
        Err(e) => {
            kerror!("cannot register backend: {}", e);
            std::process::exit(1);
        }
    };
    println!("Backend: {}", threading.backend_name());

    let result = if threading.backend_name() == BackendKind::Coop.to_string() {
        CoopScheduler::new(&SyncConfig::from_env()).run(|| demo(threading))
    } else {
        demo(threading)
    };

    if let Err(e) = result {
        kerror!("demo failed: {}", e);
        std::process::exit(1);
    }
    if FAILED.load(Ordering::Relaxed) {
        std::process::exit(1);
    }
    println!("\n=== Example Complete ===");
}

/// Start a worker on whichever kind of thread the backend runs
fn spawn(t: &Threading, f: impl FnOnce() + Send + 'static) -> Box<dyn FnOnce()> {
    if t.backend_name() == BackendKind::Coop.to_string() {
        match coop::spawn(f) {
            Ok(h) => Box::new(move || {
                if h.join().is_err() {
                    kerror!("worker panicked");
                    FAILED.store(true, Ordering::Relaxed);
                }
            }),
            Err(e) => {
                kerror!("spawn failed: {}", e);
                Box::new(|| ())
            }
        }
    } else {
        let h = std::thread::spawn(f);
        Box::new(move || {
            if h.join().is_err() {
                kerror!("worker panicked");
                FAILED.store(true, Ordering::Relaxed);
            }
        })
    }
}

fn demo(t: &'static Threading) -> SyncResult<()> {
    table_demo(t)?;
    queue_demo(t)?;
    pipe_demo(t);
    Ok(())
}

fn table_demo(t: &'static Threading) -> SyncResult<()> {
    println!("\n-- reader/writer lock --");
    let table = Arc::new(t.rwlock(Vec::<u32>::new())?);
    let reads = Arc::new(AtomicUsize::new(0));

    let mut workers = Vec::new();
    for w in 0..2u32 {
        let table = Arc::clone(&table);
        workers.push(spawn(t, move || {
            for i in 0..5 {
                match table.write() {
                    Ok(mut rows) => rows.push(w * 100 + i),
                    Err(e) => kerror!("[writer {}] {}", w, e),
                }
                coop::yield_now();
            }
            kdebug!("[writer {}] done", w);
        }));
    }
    for r in 0..3 {
        let (table, reads) = (Arc::clone(&table), Arc::clone(&reads));
        workers.push(spawn(t, move || {
            for _ in 0..5 {
                if let Ok(rows) = table.read() {
                    kdebug!("[reader {}] sees {} rows", r, rows.len());
                    reads.fetch_add(1, Ordering::Relaxed);
                }
                coop::yield_now();
            }
        }));
    }
    for join in workers {
        join();
    }

    let rows = table.read()?;
    println!("{} rows written, {} reads", rows.len(), reads.load(Ordering::Relaxed));
    Ok(())
}

fn queue_demo(t: &'static Threading) -> SyncResult<()> {
    println!("\n-- rendezvous --");
    let queue: &'static syncport::Mutex<(VecDeque<u32>, bool)> =
        Box::leak(Box::new(t.mutex((VecDeque::new(), false))?));
    let nonempty = Arc::new(t.rendez(queue)?);

    let consumer = {
        let nonempty = Arc::clone(&nonempty);
        spawn(t, move || {
            let mut sum = 0;
            loop {
                let mut q = queue.lock();
                if let Err(e) = nonempty.sleep_while(&mut q, |(q, done)| q.is_empty() && !*done) {
                    kerror!("[consumer] {}", e);
                    return;
                }
                match q.0.pop_front() {
                    Some(v) => sum += v,
                    None => break,
                }
            }
            kinfo!("[consumer] sum = {}", sum);
            println!("consumer summed {}", sum);
        })
    };

    for v in 1..=10 {
        queue.lock().0.push_back(v);
        nonempty.wake();
        coop::yield_now();
    }
    queue.lock().1 = true;
    nonempty.wake_all();
    consumer();
    Ok(())
}

fn pipe_demo(t: &'static Threading) {
    println!("\n-- yielding I/O --");
    let (rd, wr) = match nix::unistd::pipe() {
        Ok(p) => p,
        Err(e) => {
            kerror!("pipe: {}", e);
            return;
        }
    };

    let writer = spawn(t, move || {
        if let Err(e) = t.write(wr.as_raw_fd(), b"hello through the backend") {
            kerror!("[writer] {}", e);
        }
    });

    let mut buf = [0u8; 64];
    match t.read(rd.as_raw_fd(), &mut buf) {
        Ok(n) => println!("read {} bytes: {}", n, String::from_utf8_lossy(&buf[..n])),
        Err(e) => {
            t.set_error(format_args!("read: {}", e));
            kerror!("{}", t.last_error());
        }
    }
    writer();
}
