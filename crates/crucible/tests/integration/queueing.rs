use std::time::Duration;

use crucible::{SubmissionStatus, SubmitError};

use super::{fixture_source, request, test_engine_with};

#[tokio::test]
async fn backpressure_refuses_then_queue_drains() {
    // One worker and three queue slots; a sleeper occupies the worker
    let (_root, engine) = test_engine_with(|config| {
        config.max_concurrent = 1;
        config.max_queue_size = 3;
    })
    .await;

    let napper = engine
        .submit(request("python", fixture_source("napper.py")))
        .await
        .expect("first submission");

    // Wait until the sleeper occupies the worker
    for _ in 0..200 {
        if engine.stats().running == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let mut queued = Vec::new();
    for _ in 0..3 {
        queued.push(
            engine
                .submit(request("python", fixture_source("hello.py")))
                .await
                .expect("queued submission"),
        );
    }

    // Queue is at capacity: the next one is refused synchronously
    let refused = engine
        .submit(request("python", fixture_source("hello.py")))
        .await;
    assert!(matches!(refused, Err(SubmitError::QueueFull(_))));

    // Everything accepted eventually completes
    queued.push(napper);
    for record in queued {
        let mut status = None;
        for _ in 0..300 {
            let current = engine.get(&record.token).await.unwrap().unwrap();
            if current.is_terminal() {
                status = Some(current.status);
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(status, Some(SubmissionStatus::Accepted));
    }
}

#[tokio::test]
async fn cancelled_pending_submission_never_runs() {
    let (_root, engine) = test_engine_with(|config| {
        config.max_concurrent = 1;
    })
    .await;

    engine
        .submit(request("python", fixture_source("napper.py")))
        .await
        .expect("sleeper");
    for _ in 0..200 {
        if engine.stats().running == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let pending = engine
        .submit(request("python", fixture_source("hello.py")))
        .await
        .expect("pending");
    let cancelled = engine.cancel(&pending.token).await.unwrap().unwrap();

    assert_eq!(cancelled.status, SubmissionStatus::Cancelled);
    // No process ever ran: no outputs, no measurements
    assert!(cancelled.stdout.is_none());
    assert!(cancelled.time.is_none());
}

#[tokio::test]
async fn duplicate_waits_get_identical_terminal_records() {
    let (_root, engine) = test_engine_with(|_| {}).await;

    let record = engine
        .submit_wait(request("python", fixture_source("hello.py")))
        .await
        .expect("submission");

    let again = engine.get(&record.token).await.unwrap().unwrap();
    assert_eq!(record.status, again.status);
    assert_eq!(record.stdout, again.stdout);
    assert_eq!(record.finished_at, again.finished_at);
}
