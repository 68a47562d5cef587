//! Timing tests for both pacing strategies
//!
//! These measure wall-clock behavior, so they run serially.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rated::{Pacing, RatedConfig, RatedExecutor, TaskFuture};
use serial_test::serial;

fn executor(pacing: Pacing, rate: Duration) -> RatedExecutor {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    let config = RatedConfig::new(rate, pacing).expect("Invalid config");
    RatedExecutor::with_config(&config).expect("Failed to build executor")
}

fn cancel_eventually<V: Clone>(future: &TaskFuture<V>) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !future.cancel(true) {
        assert!(Instant::now() < deadline, "Task could not be cancelled");
        thread::sleep(Duration::from_millis(1));
    }
}

fn mean(values: &[Duration]) -> Duration {
    values.iter().sum::<Duration>() / values.len() as u32
}

// =============================================================================
// Rate Bound
// =============================================================================

fn check_rate_bound(pacing: Pacing) {
    let rate = Duration::from_millis(20);
    let run_time = Duration::from_millis(1000);
    let executor = executor(pacing, rate);
    let started = Arc::new(AtomicUsize::new(0));

    for _ in 0..200 {
        let started = started.clone();
        executor.execute(move || {
            started.fetch_add(1, Ordering::SeqCst);
        });
    }
    thread::sleep(run_time);

    let observed = started.load(Ordering::SeqCst) as i64;
    let expected = (run_time.as_millis() / rate.as_millis()) as i64 + 1;
    assert!(
        (observed - expected).abs() <= 2,
        "{pacing}: expected {expected} +/- 2 starts, observed {observed}"
    );
}

#[test]
#[serial]
fn test_rate_bound_timer() {
    check_rate_bound(Pacing::Timer);
}

#[test]
#[serial]
fn test_rate_bound_loop() {
    check_rate_bound(Pacing::Loop);
}

// =============================================================================
// FIFO + Alternation
// =============================================================================

fn check_alternation(pacing: Pacing) {
    let rate = Duration::from_millis(50);
    let executor = executor(pacing, rate);
    let starts: Arc<Mutex<Vec<(char, Instant)>>> = Arc::new(Mutex::new(Vec::new()));

    // Occupy the first period so both tasks are queued before either starts
    executor.execute(|| {});
    let futures: Vec<_> = ['a', 'b']
        .into_iter()
        .map(|name| {
            let starts = starts.clone();
            executor.schedule(move || starts.lock().push((name, Instant::now())))
        })
        .collect();

    thread::sleep(Duration::from_millis(620));
    for future in &futures {
        cancel_eventually(future);
    }

    let starts = starts.lock().clone();
    assert!(starts.len() >= 8, "{pacing}: only {} starts recorded", starts.len());

    // Strict alternation in submission order
    for (i, (name, _)) in starts.iter().enumerate() {
        assert_eq!(*name, if i % 2 == 0 { 'a' } else { 'b' }, "{pacing}: out of order at {i}");
    }

    let between: Vec<Duration> = starts.windows(2).map(|w| w[1].1 - w[0].1).collect();
    let same: Vec<Duration> = starts.windows(3).map(|w| w[2].1 - w[0].1).collect();

    let tolerance = Duration::from_millis(15);
    let between_mean = mean(&between);
    let same_mean = mean(&same);
    assert!(
        between_mean.abs_diff(rate) <= tolerance,
        "{pacing}: mean spacing between tasks {between_mean:?}"
    );
    assert!(
        same_mean.abs_diff(rate * 2) <= tolerance,
        "{pacing}: mean spacing of one task {same_mean:?}"
    );
}

#[test]
#[serial]
fn test_alternation_timer() {
    check_alternation(Pacing::Timer);
}

#[test]
#[serial]
fn test_alternation_loop() {
    check_alternation(Pacing::Loop);
}

// =============================================================================
// Minimum Spacing
// =============================================================================

fn check_no_burst_after_overrun(pacing: Pacing) {
    let rate = Duration::from_millis(20);
    let executor = executor(pacing, rate);
    let starts = Arc::new(Mutex::new(Vec::new()));

    let recorder = starts.clone();
    let slow = executor.submit(move || {
        recorder.lock().push(Instant::now());
        thread::sleep(Duration::from_millis(90));
    });
    let fast: Vec<_> = (0..3)
        .map(|_| {
            let recorder = starts.clone();
            executor.submit(move || recorder.lock().push(Instant::now()))
        })
        .collect();

    slow.get().expect("Slow task failed");
    for future in &fast {
        future.get_timeout(Duration::from_secs(2)).expect("Fast task failed");
    }

    let starts = starts.lock();
    assert_eq!(starts.len(), 4);
    for pair in starts.windows(2) {
        let gap = pair[1] - pair[0];
        assert!(gap + Duration::from_millis(2) >= rate, "{pacing}: starts only {gap:?} apart");
    }
}

#[test]
#[serial]
fn test_no_burst_after_overrun_timer() {
    check_no_burst_after_overrun(Pacing::Timer);
}

#[test]
#[serial]
fn test_no_burst_after_overrun_loop() {
    check_no_burst_after_overrun(Pacing::Loop);
}
