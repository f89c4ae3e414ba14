use std::sync::Arc;
use std::time::Duration;

use patchguard_core::validation::analyzers::PatternAnalyzer;
use patchguard_core::{
    AnalyzerSet, FindingSource, InputBundle, Layer, Pipeline, PipelineConfig, PipelineState,
};
use patchguard_patcher::{build_backend, BackendConfig, BackendKind};

fn pipeline(kind: BackendKind, backend: BackendConfig) -> Pipeline {
    let config = Arc::new(PipelineConfig::default());
    let analyzers =
        AnalyzerSet::new(config.clone()).with(PatternAnalyzer::new().expect("rules compile"));
    let patcher = build_backend(kind, &backend, config.patcher_timeout()).expect("backend builds");
    Pipeline::new(config, analyzers, patcher).expect("pipeline builds")
}

#[tokio::test]
async fn echo_backend_runs_end_to_end() {
    let pipeline = pipeline(BackendKind::Echo, BackendConfig::default());
    let bundle = InputBundle::new("Off-by-one in add().", "def add(a, b):\n    return a + b\n");

    let report = pipeline.run(&bundle, None).await;

    assert_eq!(report.final_state, PipelineState::Accepted);
    let patch = report.patch.expect("patch recorded");
    assert_eq!(patch.backend, "echo");
    assert!(patch.patch_diff.is_empty());
}

#[tokio::test]
async fn unreachable_ollama_rejects_with_patcher_finding() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let backend = BackendConfig {
        ollama_url: format!("http://{addr}"),
        ..BackendConfig::default()
    };
    let pipeline = pipeline(BackendKind::Ollama, backend);
    let bundle = InputBundle::new("Off-by-one in add().", "def add(a, b):\n    return a + b + 1\n");

    let report = pipeline.run(&bundle, None).await;

    assert_eq!(report.final_state, PipelineState::Rejected);
    assert_eq!(report.terminated_at_layer, Layer::Validation);
    assert!(report
        .findings
        .iter()
        .any(|f| f.source == FindingSource::Patcher && f.category == "patcher-unavailable"));
    assert!(report.invariant_violations().is_empty());
}

#[tokio::test]
async fn missing_aider_rejects_with_patcher_finding() {
    let backend = BackendConfig {
        aider_program: "patchguard-no-such-aider".to_string(),
        ..BackendConfig::default()
    };
    let pipeline = pipeline(BackendKind::Aider, backend);

    let report = tokio::time::timeout(
        Duration::from_secs(10),
        pipeline.run(&InputBundle::new("bug", "x = 1\n"), None),
    )
    .await
    .expect("run finishes");

    assert!(!report.patch_accepted);
    assert!(report
        .findings
        .iter()
        .any(|f| f.category == "patcher-unavailable"));
}
