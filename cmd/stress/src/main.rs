//! tickq stress: timer churn at scale
//!
//! Registers a large population of mostly-idle timers and hammers
//! reschedule/park on a handful of them - the workload the queue's
//! cost model is built around. Rescheduling must not degrade with
//! population size.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tickq::Timer;

const POPULATION: usize = 10_000;
const CHURN_OPS: usize = 200_000;

fn main() {
    println!("=== tickq stress ===");
    println!("population: {} timers, churn: {} ops\n", POPULATION, CHURN_OPS);

    let fired = Arc::new(AtomicUsize::new(0));

    // A large population of disabled timers: registered, never armed.
    let create_start = Instant::now();
    let timers: Vec<Timer> = (0..POPULATION)
        .map(|_| {
            let fired = fired.clone();
            Timer::new(
                move || {
                    fired.fetch_add(1, Ordering::SeqCst);
                },
                None,
                None,
            )
            .expect("create timer")
        })
        .collect();
    let create_elapsed = create_start.elapsed();
    println!(
        "create: {:?} total, {} ns/timer",
        create_elapsed,
        create_elapsed.as_nanos() as usize / POPULATION
    );

    // Churn: arm far in the future, then park again. O(1) per op
    // regardless of the 10k idle siblings.
    let churn_start = Instant::now();
    for i in 0..CHURN_OPS {
        let timer = &timers[i % 64];
        timer.change_millis(1_000_000_000, 0).expect("arm");
        timer.change_millis(-1, 0).expect("park");
    }
    let churn_elapsed = churn_start.elapsed();
    println!(
        "churn: {:?} total, {} ns/op",
        churn_elapsed,
        churn_elapsed.as_nanos() as usize / (CHURN_OPS * 2)
    );

    // Sanity: nothing should have fired - everything was parked or due
    // in ~11 days.
    std::thread::sleep(Duration::from_millis(100));
    println!("spurious fires: {}", fired.load(Ordering::SeqCst));

    // A real burst at the end: arm 1000 short one-shots and let them
    // all expire.
    let burst_start = Instant::now();
    for timer in timers.iter().take(1_000) {
        timer.change_millis(10, 0).expect("arm burst");
    }
    while fired.load(Ordering::SeqCst) < 1_000 {
        std::thread::sleep(Duration::from_millis(5));
        if burst_start.elapsed() > Duration::from_secs(10) {
            break;
        }
    }
    println!(
        "burst: {} of 1000 fired in {:?}",
        fired.load(Ordering::SeqCst),
        burst_start.elapsed()
    );

    println!("\nqueue stats: {:?}", tickq::global().stats());
}
