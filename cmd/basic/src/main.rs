//! Basic tickq example
//!
//! Demonstrates one-shot and periodic timers and the three disposal
//! surfaces.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tickq::{Timer, WaitEvent};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    println!("=== tickq basic example ===\n");

    // One-shot: fires once, ~80 ms from now.
    let once_done = Arc::new(WaitEvent::new());
    let once_done2 = once_done.clone();
    let _once = Timer::new(
        move || {
            println!("[once] fired");
            once_done2.set();
        },
        Some(Duration::from_millis(80)),
        None,
    )
    .expect("create one-shot");

    // Periodic: every 50 ms until disposed.
    let beats = Arc::new(AtomicUsize::new(0));
    let beats2 = beats.clone();
    let mut heartbeat = Timer::new(
        move || {
            let n = beats2.fetch_add(1, Ordering::SeqCst) + 1;
            println!("[heartbeat] beat {}", n);
        },
        Some(Duration::from_millis(50)),
        Some(Duration::from_millis(50)),
    )
    .expect("create heartbeat");

    once_done.wait();
    std::thread::sleep(Duration::from_millis(300));

    // Synchronous-with-wait disposal: after the event is set, no
    // heartbeat callback is running or will ever run again.
    let quiet = Arc::new(WaitEvent::new());
    heartbeat.dispose_with(&quiet).expect("dispose heartbeat");
    quiet.wait();
    println!(
        "\nheartbeat stopped after {} beats",
        beats.load(Ordering::SeqCst)
    );

    // Await-completion disposal of a short periodic timer.
    let mut ticker = Timer::new(
        || println!("[ticker] tick"),
        Some(Duration::from_millis(20)),
        Some(Duration::from_millis(20)),
    )
    .expect("create ticker");
    std::thread::sleep(Duration::from_millis(100));
    futures::executor::block_on(ticker.dispose_async().expect("dispose ticker"));
    println!("ticker stopped\n");

    println!("queue stats: {:?}", tickq::global().stats());
}
