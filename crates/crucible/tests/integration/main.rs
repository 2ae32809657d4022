//! Integration tests for crucible
//!
//! These tests run real language toolchains (python3, gcc, g++, javac)
//! and are therefore gated. Run with:
//!    cargo test -p crucible --features integration-tests

#![cfg(feature = "integration-tests")]

use std::fs;

use crucible::{Engine, EngineConfig, SubmissionRequest};

mod compilation;
mod execution;
mod queueing;
mod resource_limits;

const FIXTURES_PATH: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures");

/// Helper to get fixture file content
pub(crate) fn fixture_source(name: &str) -> Vec<u8> {
    let path = format!("{FIXTURES_PATH}/sources/{name}");
    fs::read(&path).unwrap_or_else(|e| panic!("Failed to read fixture {path}: {e}"))
}

/// An engine over the embedded catalog with an isolated workspace root.
/// The returned TempDir must stay alive for the engine's lifetime.
pub(crate) async fn test_engine() -> (tempfile::TempDir, Engine) {
    test_engine_with(|_| {}).await
}

pub(crate) async fn test_engine_with(
    tweak: impl FnOnce(&mut EngineConfig),
) -> (tempfile::TempDir, Engine) {
    let workspace_root = tempfile::tempdir().expect("tempdir");
    let mut config = EngineConfig::default();
    config.workspace_root = Some(workspace_root.path().to_path_buf());
    tweak(&mut config);
    (workspace_root, Engine::start(config).await)
}

pub(crate) fn request(language: &str, source: Vec<u8>) -> SubmissionRequest {
    SubmissionRequest {
        language: language.to_owned(),
        source_code: source,
        ..Default::default()
    }
}
