use crucible::SubmissionStatus;

use super::{fixture_source, request, test_engine};

#[tokio::test]
async fn cpp_compiles_and_runs() {
    let (_root, engine) = test_engine().await;

    let record = engine
        .submit_wait(request("cpp", fixture_source("hello.cpp")))
        .await
        .expect("submission failed");

    assert_eq!(record.status, SubmissionStatus::Accepted, "{:?}", record.message);
    assert_eq!(record.stdout.as_deref(), Some(b"Hello, World!\n".as_slice()));
}

#[tokio::test]
async fn cpp_missing_semicolon_is_compilation_error() {
    let (_root, engine) = test_engine().await;

    let record = engine
        .submit_wait(request("cpp", fixture_source("bad.cpp")))
        .await
        .expect("submission failed");

    assert_eq!(record.status, SubmissionStatus::CompilationError);
    let compile_output = record.compile_output.expect("compiler output captured");
    assert!(!compile_output.is_empty());
    // The run step never happened
    assert!(record.stdout.is_none());
    assert!(record.stderr.is_none());
    assert!(record.finished_at.is_some());
}

#[tokio::test]
async fn c_compiler_options_are_passed_through() {
    let (_root, engine) = test_engine().await;

    let mut req = request("c", fixture_source("answer.c"));
    req.compiler_options = Some("-DANSWER=42".to_owned());
    let record = engine.submit_wait(req).await.expect("submission failed");

    assert_eq!(record.status, SubmissionStatus::Accepted, "{:?}", record.message);
    assert_eq!(record.stdout.as_deref(), Some(b"42\n".as_slice()));
}
