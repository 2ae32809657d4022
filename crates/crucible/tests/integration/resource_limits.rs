use crucible::{ResourceLimits, SubmissionStatus};

use super::{fixture_source, request, test_engine};

#[tokio::test]
async fn c_infinite_loop_hits_cpu_limit() {
    let (_root, engine) = test_engine().await;

    // No cpu_extra_time here on purpose: the grace comes from the catalog
    // defaults, so reported CPU time must land in [limit, limit + 0.5]
    // plus sampling jitter
    let mut req = request("c", fixture_source("spin.c"));
    req.limits = ResourceLimits::none()
        .with_cpu_time_limit(1.0)
        .with_wall_time_limit(3.0);
    let record = engine.submit_wait(req).await.expect("submission failed");

    assert_eq!(record.status, SubmissionStatus::TimeLimitExceeded);
    let message = record.message.expect("limit message");
    assert!(message.contains("CPU"), "unexpected message: {message}");

    // Real usage is reported: past the limit, inside limit + default grace
    let cpu = record.time.expect("cpu time measured");
    assert!(cpu >= 1.0, "cpu_time {cpu} below the limit");
    assert!(cpu <= 1.6, "cpu_time {cpu} way past limit + grace");
}

#[tokio::test]
async fn python_allocation_loop_hits_memory_limit() {
    let (_root, engine) = test_engine().await;

    let mut req = request("python", fixture_source("memhog.py"));
    req.limits = ResourceLimits::none().with_memory_limit(65536);
    let record = engine.submit_wait(req).await.expect("submission failed");

    assert_eq!(record.status, SubmissionStatus::MemoryLimitExceeded, "{:?}", record.message);

    let memory = record.memory.expect("memory measured");
    assert!(memory <= 65536 * 105 / 100, "memory {memory} over limit + slack");
    assert!(memory >= 65536 / 2, "memory {memory} implausibly low for the hog");
}

#[tokio::test]
async fn python_output_flood_is_output_limit() {
    let (_root, engine) = test_engine().await;

    // ~1 MB of output against a 64 KB cap; the program itself exits 0
    let mut req = request("python", fixture_source("spam.py"));
    req.limits = ResourceLimits::none().with_max_file_size(64);
    let record = engine.submit_wait(req).await.expect("submission failed");

    assert_eq!(record.status, SubmissionStatus::RuntimeError);
    assert_eq!(
        record.message.as_deref(),
        Some("Output size limit exceeded")
    );
    assert_eq!(record.stdout.map(|s| s.len()), Some(64 * 1024));
}

#[tokio::test]
async fn wall_limit_bounds_sleeping_programs() {
    let (_root, engine) = test_engine().await;

    let mut req = request("python", fixture_source("napper.py"));
    req.limits = ResourceLimits::none().with_wall_time_limit(0.4);
    let record = engine.submit_wait(req).await.expect("submission failed");

    assert_eq!(record.status, SubmissionStatus::TimeLimitExceeded);
    assert_eq!(record.message.as_deref(), Some("Wall time limit exceeded"));

    let wall = record.wall_time.expect("wall time measured");
    assert!(wall >= 0.4);
    assert!(wall <= 1.0, "wall {wall} exceeds limit + grace");
}

#[tokio::test]
async fn number_of_runs_aggregates_max() {
    let (_root, engine) = test_engine().await;

    let mut req = request("python", fixture_source("hello.py"));
    req.limits = ResourceLimits::none().with_number_of_runs(3);
    let record = engine.submit_wait(req).await.expect("submission failed");

    assert_eq!(record.status, SubmissionStatus::Accepted);
    // Output comes from the last run, unchanged across runs
    assert_eq!(record.stdout.as_deref(), Some(b"Hello, World!\n".as_slice()));
}
