//! Structured lifecycle events for pipeline runs.
//!
//! - `RunSpan`: the `patchguard.run` span tagging everything inside a run
//!   with its `run_id`
//! - `emit_*`: one `info!`/`warn!` event per lifecycle step
//!
//! Filter with `PATCHGUARD_LOG` or `RUST_LOG`; pass `--json` to the CLI for
//! JSON lines.

use tracing::{info, warn, Instrument};

use crate::domain::{DiagnosticKind, Layer, PipelineState};

/// Span carrying the run id.
pub struct RunSpan;

impl RunSpan {
    /// Attach the run span to a future without holding a guard across awaits.
    pub fn instrument<F: std::future::Future>(
        run_id: &str,
        fut: F,
    ) -> tracing::instrument::Instrumented<F> {
        fut.instrument(span(run_id))
    }
}

fn span(run_id: &str) -> tracing::Span {
    tracing::info_span!("patchguard.run", run_id = %run_id)
}

pub fn emit_run_started(run_id: &str, input_digest: &str) {
    info!(event = "run.started", run_id = %run_id, input_digest = %input_digest);
}

/// A layer finished and the machine moved to `state`.
pub fn emit_layer_completed(run_id: &str, layer: Layer, state: PipelineState, score: f64) {
    info!(
        event = "layer.completed",
        run_id = %run_id,
        layer = layer.number(),
        state = ?state,
        score = score,
    );
}

pub fn emit_run_finished(
    run_id: &str,
    final_state: PipelineState,
    terminated_at_layer: Layer,
    duration_ms: u64,
) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        final_state = ?final_state,
        terminated_at_layer = terminated_at_layer.number(),
        duration_ms = duration_ms,
    );
}

pub fn emit_analyzer_failed(tool: &str, kind: DiagnosticKind, message: &str) {
    warn!(event = "analyzer.failed", tool = %tool, kind = ?kind, message = %message);
}

pub fn emit_patcher_failed(run_id: &str, backend: &str, error: &dyn std::fmt::Display) {
    warn!(event = "patcher.failed", run_id = %run_id, backend = %backend, error = %error);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_instrumented_future_runs() {
        let value = RunSpan::instrument("run-2", async {
            emit_layer_completed("run-2", Layer::Detection, PipelineState::Detected, 0.0);
            7
        })
        .await;
        assert_eq!(value, 7);
    }
}
