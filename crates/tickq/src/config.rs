//! Queue configuration
//!
//! Compile-time defaults with runtime environment overrides.
//!
//! # Configuration priority (highest wins)
//!
//! 1. Builder methods (programmatic)
//! 2. Environment variables (runtime)
//! 3. Library defaults

use std::time::Duration;

/// Configuration for a [`TimerQueue`](crate::TimerQueue) and its worker
/// pool, with builder-style setters.
///
/// Use `from_env()` to start with defaults and apply any environment
/// variable overrides:
///
/// - `TICKQ_NUM_WORKERS` - worker pool size
/// - `TICKQ_PARK_TIMEOUT_MS` - idle worker park timeout
/// - `TICKQ_WORKER_STACK_KB` - worker stack size in KiB
#[derive(Debug, Clone)]
pub struct TimerConfig {
    /// Number of worker pool threads.
    pub num_workers: usize,
    /// How long an idle worker parks before re-checking the injector.
    pub park_timeout: Duration,
    /// Name of the platform timer waiter thread.
    pub timer_thread_name: String,
    /// Prefix for worker thread names (`{prefix}-{index}`).
    pub worker_name_prefix: String,
    /// Worker stack size (None = system default).
    pub worker_stack_size: Option<usize>,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            num_workers: default_workers(),
            park_timeout: Duration::from_millis(100),
            timer_thread_name: "tickq-timer".into(),
            worker_name_prefix: "tickq-worker".into(),
            worker_stack_size: None,
        }
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().min(4))
        .unwrap_or(2)
}

impl TimerConfig {
    /// Defaults plus environment overrides.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(n) = env_usize("TICKQ_NUM_WORKERS") {
            config.num_workers = n.max(1);
        }
        if let Some(ms) = env_usize("TICKQ_PARK_TIMEOUT_MS") {
            config.park_timeout = Duration::from_millis(ms as u64);
        }
        if let Some(kb) = env_usize("TICKQ_WORKER_STACK_KB") {
            config.worker_stack_size = Some(kb * 1024);
        }
        config
    }

    /// Set the worker pool size.
    pub fn num_workers(mut self, n: usize) -> Self {
        self.num_workers = n.max(1);
        self
    }

    /// Set the idle park timeout.
    pub fn park_timeout(mut self, timeout: Duration) -> Self {
        self.park_timeout = timeout;
        self
    }

    /// Set the worker stack size in bytes.
    pub fn worker_stack_size(mut self, bytes: usize) -> Self {
        self.worker_stack_size = Some(bytes);
        self
    }
}

fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key).ok()?.trim().parse().ok()
}
