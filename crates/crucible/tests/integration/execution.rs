use crucible::SubmissionStatus;

use super::{fixture_source, request, test_engine};

#[tokio::test]
async fn python_hello_world() {
    let (_root, engine) = test_engine().await;

    let record = engine
        .submit_wait(request("python", fixture_source("hello.py")))
        .await
        .expect("submission failed");

    assert_eq!(record.status, SubmissionStatus::Accepted);
    assert_eq!(record.stdout.as_deref(), Some(b"Hello, World!\n".as_slice()));
    assert_eq!(record.exit_code, Some(0));
    assert!(record.finished_at.is_some());
}

#[tokio::test]
async fn python_reads_stdin() {
    let (_root, engine) = test_engine().await;

    let mut req = request("python", fixture_source("echo.py"));
    req.stdin = b"Alice\n".to_vec();
    let record = engine.submit_wait(req).await.expect("submission failed");

    assert_eq!(record.status, SubmissionStatus::Accepted);
    assert_eq!(record.stdout.as_deref(), Some(b"Alice!\n".as_slice()));
}

#[tokio::test]
async fn python_uncaught_exception_is_runtime_error() {
    let (_root, engine) = test_engine().await;

    let record = engine
        .submit_wait(request("python", fixture_source("crash.py")))
        .await
        .expect("submission failed");

    assert_eq!(record.status, SubmissionStatus::RuntimeError);
    assert_eq!(record.exit_code, Some(1));
    let stderr = String::from_utf8_lossy(record.stderr.as_deref().unwrap_or_default());
    assert!(stderr.contains("IndexError"));
}

#[tokio::test]
async fn java_derives_class_name_from_source() {
    let (_root, engine) = test_engine().await;

    let record = engine
        .submit_wait(request("java", fixture_source("Solution.java")))
        .await
        .expect("submission failed");

    assert_eq!(record.status, SubmissionStatus::Accepted, "{:?}", record.message);
    assert_eq!(record.stdout.as_deref(), Some(b"42\n".as_slice()));
}

#[tokio::test]
async fn expected_output_mismatch_is_wrong_answer() {
    let (_root, engine) = test_engine().await;

    let mut req = request("python", fixture_source("hello.py"));
    req.expected_output = Some("Goodbye, World!".to_owned());
    let record = engine.submit_wait(req).await.expect("submission failed");

    assert_eq!(record.status, SubmissionStatus::WrongAnswer);
}

#[tokio::test]
async fn stderr_redirect_merges_into_stdout() {
    let (_root, engine) = test_engine().await;

    let mut req = request("python", fixture_source("crash.py"));
    req.flags.redirect_stderr_to_stdout = true;
    let record = engine.submit_wait(req).await.expect("submission failed");

    assert_eq!(record.status, SubmissionStatus::RuntimeError);
    assert_eq!(record.stderr.as_deref(), Some(b"".as_slice()));
    let merged = String::from_utf8_lossy(record.stdout.as_deref().unwrap_or_default());
    assert!(merged.contains("IndexError"));
}
