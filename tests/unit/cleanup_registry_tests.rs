//! Unit tests for the once-only teardown registry.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use netlify_dev::cleanup::{CleanupRegistry, FATAL_EXIT_CODE};
use netlify_dev::AppError;

fn recording_registry() -> (CleanupRegistry, Arc<Mutex<Vec<i32>>>) {
    let exits = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&exits);
    let registry = CleanupRegistry::with_exit_hook(Arc::new(move |code| {
        sink.lock().unwrap().push(code);
    }));
    (registry, exits)
}

fn counting_task(registry: &CleanupRegistry, counter: &Arc<AtomicUsize>) {
    let counter = Arc::clone(counter);
    registry.register("count", move || async move {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
}

#[tokio::test]
async fn concurrent_triggers_run_every_task_exactly_once() {
    let (registry, exits) = recording_registry();
    let counter = Arc::new(AtomicUsize::new(0));
    for _ in 0..5 {
        counting_task(&registry, &counter);
    }

    let handles: Vec<_> = (0..10)
        .map(|i| {
            let registry = registry.clone();
            tokio::spawn(async move { registry.run_once(if i % 2 == 0 { 0 } else { 1 }).await })
        })
        .collect();

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap() {
            winners += 1;
        }
    }

    assert_eq!(winners, 1);
    assert_eq!(counter.load(Ordering::SeqCst), 5);
    assert_eq!(exits.lock().unwrap().len(), 1, "process terminates once");
}

async fn panicking_teardown() -> netlify_dev::Result<()> {
    panic!("teardown bug")
}

#[tokio::test]
async fn failing_and_panicking_tasks_do_not_block_others() {
    let (registry, exits) = recording_registry();
    let counter = Arc::new(AtomicUsize::new(0));

    registry.register("fails", || async { Err(AppError::Session("remote down".into())) });
    registry.register("panics", panicking_teardown);
    counting_task(&registry, &counter);

    assert!(registry.run_once(FATAL_EXIT_CODE).await);
    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert_eq!(*exits.lock().unwrap(), vec![FATAL_EXIT_CODE]);
}

#[tokio::test]
async fn tasks_run_concurrently() {
    let (registry, _exits) = recording_registry();
    for _ in 0..4 {
        registry.register("sleep", || async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        });
    }

    let started = std::time::Instant::now();
    registry.run_once(0).await;
    assert!(
        started.elapsed() < Duration::from_millis(700),
        "four 200ms tasks should overlap, took {:?}",
        started.elapsed()
    );
}

#[tokio::test]
async fn second_trigger_is_a_no_op() {
    let (registry, exits) = recording_registry();
    let counter = Arc::new(AtomicUsize::new(0));
    counting_task(&registry, &counter);

    assert!(registry.run_once(0).await);
    assert!(!registry.run_once(1).await);

    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert_eq!(*exits.lock().unwrap(), vec![0]);
}

#[tokio::test]
async fn losing_trigger_waits_for_teardown_to_finish() {
    let (registry, _exits) = recording_registry();
    let counter = Arc::new(AtomicUsize::new(0));
    {
        let counter = Arc::clone(&counter);
        registry.register("slow", move || async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
    }

    let winner = {
        let registry = registry.clone();
        tokio::spawn(async move { registry.run_once(1).await })
    };
    while !registry.has_started() {
        tokio::task::yield_now().await;
    }

    assert!(!registry.run_once(1).await);
    assert_eq!(counter.load(Ordering::SeqCst), 1, "loser returned before teardown finished");
    assert!(winner.await.unwrap());
}

#[tokio::test]
async fn registration_after_teardown_is_dropped() {
    let (registry, _exits) = recording_registry();
    registry.run_once(0).await;

    let counter = Arc::new(AtomicUsize::new(0));
    counting_task(&registry, &counter);

    assert_eq!(registry.pending(), 0);
    assert_eq!(counter.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn shutdown_token_fires_when_teardown_starts() {
    let (registry, _exits) = recording_registry();
    let token = registry.shutdown_token();
    assert!(!token.is_cancelled());
    assert_eq!(registry.pending(), 0);

    registry.register("noop", || async { Ok(()) });
    assert_eq!(registry.pending(), 1);

    registry.run_once(0).await;
    assert!(token.is_cancelled());
    assert!(registry.has_started());
    tokio::time::timeout(Duration::from_secs(1), registry.finished())
        .await
        .expect("finished resolves after teardown");
}
