use dmxp_maml::Core::{AsyncLoop, LaunchMode};
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn counting_loop(mode: LaunchMode) -> (AsyncLoop, Arc<AtomicUsize>) {
    let count = Arc::new(AtomicUsize::new(0));
    let body_count = Arc::clone(&count);
    let task = AsyncLoop::new(
        "test-loop",
        move || {
            body_count.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_micros(100));
            ControlFlow::Continue(())
        },
        mode,
    )
    .unwrap();
    (task, count)
}

fn wait_for_count(count: &AtomicUsize, at_least: usize) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while count.load(Ordering::SeqCst) < at_least {
        if Instant::now() > deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    true
}

fn start_stop_restart(mode: LaunchMode) {
    let (task, count) = counting_loop(mode);
    assert_eq!(task.mode(), mode);
    assert!(!task.is_running());

    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(count.load(Ordering::SeqCst), 0, "body ran before start");

    task.start();
    assert!(task.is_running());
    assert!(wait_for_count(&count, 10));

    task.stop();
    assert!(!task.is_running());
    let frozen = count.load(Ordering::SeqCst);
    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(count.load(Ordering::SeqCst), frozen, "body ran after stop");

    task.start();
    assert!(wait_for_count(&count, frozen + 10));
    task.stop();
}

#[test]
fn thread_loop_starts_stops_and_restarts() {
    start_stop_restart(LaunchMode::Thread);
}

#[test]
fn task_loop_starts_stops_and_restarts() {
    start_stop_restart(LaunchMode::Task);
}

#[test]
fn break_disarms_the_loop() {
    for mode in [LaunchMode::Thread, LaunchMode::Task] {
        let count = Arc::new(AtomicUsize::new(0));
        let body_count = Arc::clone(&count);
        let task = AsyncLoop::new(
            "breaking-loop",
            move || {
                if body_count.fetch_add(1, Ordering::SeqCst) == 4 {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            },
            mode,
        )
        .unwrap();

        task.start();
        assert!(wait_for_count(&count, 5));
        let deadline = Instant::now() + Duration::from_secs(5);
        while task.is_running() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(!task.is_running());
        assert_eq!(count.load(Ordering::SeqCst), 5);
        task.stop();
    }
}

#[test]
fn auto_mode_resolves_to_a_concrete_mode() {
    let resolved = LaunchMode::Auto.resolve();
    assert_ne!(resolved, LaunchMode::Auto);
    let expected = if rayon::current_num_threads() > 4 {
        LaunchMode::Task
    } else {
        LaunchMode::Thread
    };
    assert_eq!(resolved, expected);
}

#[test]
fn dropping_a_running_loop_joins_it() {
    let (task, count) = counting_loop(LaunchMode::Thread);
    task.start();
    assert!(wait_for_count(&count, 1));
    drop(task);
    let frozen = count.load(Ordering::SeqCst);
    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(count.load(Ordering::SeqCst), frozen);
}

#[test]
fn task_chains_take_turns_on_a_single_worker() {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(1)
        .build()
        .unwrap();

    let chains: Vec<_> = (0..3).map(|_| counting_loop(LaunchMode::Task)).collect();
    pool.install(|| {
        for (task, _) in &chains {
            task.start();
        }
    });

    for (_, count) in &chains {
        assert!(wait_for_count(count, 10), "a chain never got the worker");
    }
    for (task, _) in &chains {
        task.stop();
    }
}
