use crate::registry::Stage;
use crate::sanitize::Sanitizer;
use crate::types::{StageContext, StageResult};
use chrono::Utc;
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

/// Step config key that overrides the runner-wide stage timeout
pub const TIMEOUT_CONFIG_KEY: &str = "timeout_secs";

/// Invokes a single stage with timeout and failure containment.
///
/// Whatever the stage does (returns an error, panics, overruns its timeout)
/// the caller gets a `StageResult` back. Error text is sanitized before it is
/// stored.
pub struct StageInvoker {
    sanitizer: Arc<Sanitizer>,
    timeout: Option<Duration>,
}

impl StageInvoker {
    pub fn new(sanitizer: Arc<Sanitizer>, timeout: Option<Duration>) -> Self {
        Self { sanitizer, timeout }
    }

    pub fn sanitizer(&self) -> &Sanitizer {
        &self.sanitizer
    }

    /// Execute `stage` against `context`, timing and sanitizing the outcome
    pub async fn invoke(&self, stage: Arc<dyn Stage>, context: StageContext) -> StageResult {
        let stage_id = stage.stage_id();
        let stage_name = stage.stage_name().to_string();
        let limit = timeout_override(&context).or(self.timeout);

        tracing::debug!(stage_id, stage_name = %stage_name, "Executing stage");

        let started_at = Utc::now();
        // Run on its own task so a panicking stage cannot take the runner down
        let handle = tokio::spawn(async move { stage.execute(&context).await });
        let abort = handle.abort_handle();

        let joined = match limit {
            Some(limit) => match tokio::time::timeout(limit, handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    abort.abort();
                    tracing::warn!(stage_id, "Stage timed out after {:?}", limit);
                    return StageResult::failed(
                        stage_id,
                        stage_name,
                        format!("Stage timed out after {} ms", limit.as_millis()),
                    )
                    .with_metadata("error_kind", "timeout".into())
                    .timed(started_at, Utc::now());
                }
            },
            None => handle.await,
        };
        let completed_at = Utc::now();

        let result = match joined {
            Ok(Ok(mut result)) => {
                result.stage_id.get_or_insert(stage_id);
                result.errors = result.errors.iter().map(|e| self.sanitizer.sanitize(e)).collect();
                result.warnings = result
                    .warnings
                    .iter()
                    .map(|w| self.sanitizer.sanitize(w))
                    .collect();
                result
            }
            Ok(Err(e)) => {
                let message = self.sanitizer.sanitize(&format!("{:#}", e));
                StageResult::failed(stage_id, stage_name, message)
                    .with_metadata("error_kind", "stage_error".into())
            }
            Err(e) if e.is_panic() => {
                let message = panic_message(e.into_panic());
                StageResult::failed(
                    stage_id,
                    stage_name,
                    self.sanitizer.sanitize(&format!("Stage panicked: {}", message)),
                )
                .with_metadata("error_kind", "panic".into())
            }
            Err(_) => StageResult::failed(stage_id, stage_name, "Stage task was cancelled")
                .with_metadata("error_kind", "cancelled".into()),
        };

        let result = result.timed(started_at, completed_at);
        if result.is_failed() {
            tracing::warn!(stage_id, duration_ms = result.duration_ms, "Stage failed");
        } else {
            tracing::debug!(stage_id, duration_ms = result.duration_ms, status = ?result.status, "Stage finished");
        }
        result
    }
}

fn timeout_override(context: &StageContext) -> Option<Duration> {
    context
        .config
        .get(TIMEOUT_CONFIG_KEY)
        .and_then(|v| v.as_u64())
        .map(Duration::from_secs)
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StaticStage;
    use crate::types::{GovernanceMode, StageStatus};

    fn invoker(timeout: Option<Duration>) -> StageInvoker {
        StageInvoker::new(Arc::new(Sanitizer::default()), timeout)
    }

    fn ctx() -> StageContext {
        StageContext::new("job-1", GovernanceMode::Demo)
    }

    #[tokio::test]
    async fn test_success_is_timed() {
        let result = invoker(None).invoke(StaticStage::ok(1, "ingest"), ctx()).await;
        assert_eq!(result.status, StageStatus::Completed);
        assert_eq!(result.stage_id, Some(1));
        assert!(result.completed_at >= result.started_at);
    }

    #[tokio::test]
    async fn test_error_is_sanitized() {
        let stage = StaticStage::failing(2, "validate", "bad record for SSN 123-45-6789");
        let result = invoker(None).invoke(stage, ctx()).await;

        assert_eq!(result.status, StageStatus::Failed);
        assert_eq!(result.errors.len(), 1);
        assert!(!result.errors[0].contains("123-45-6789"));
        assert_eq!(result.metadata["error_kind"], "stage_error");
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let result = invoker(None)
            .invoke(StaticStage::panicking(3, "render"), ctx())
            .await;
        assert_eq!(result.status, StageStatus::Failed);
        assert!(result.errors[0].starts_with("Stage panicked"));
        assert_eq!(result.metadata["error_kind"], "panic");
    }

    #[tokio::test]
    async fn test_timeout_fails_stage() {
        let stage = StaticStage::slow(4, "export", Duration::from_secs(5));
        let result = invoker(Some(Duration::from_millis(20))).invoke(stage, ctx()).await;
        assert_eq!(result.status, StageStatus::Failed);
        assert_eq!(result.metadata["error_kind"], "timeout");
        assert_eq!(result.errors, vec!["Stage timed out after 20 ms".to_string()]);
    }

    #[tokio::test]
    async fn test_step_config_overrides_timeout() {
        let stage = StaticStage::slow(4, "export", Duration::from_millis(50));
        let mut context = ctx();
        context
            .config
            .insert(TIMEOUT_CONFIG_KEY.into(), serde_json::json!(10));

        // Runner-wide limit would fail the stage; the step override lets it finish
        let result = invoker(Some(Duration::from_millis(1)))
            .invoke(stage, context)
            .await;
        assert_eq!(result.status, StageStatus::Completed);
    }

    #[tokio::test]
    async fn test_reported_failures_sanitized() {
        let stage = StaticStage::reporting_failure(5, "merge", "row owner jane@example.org");
        let result = invoker(None).invoke(stage, ctx()).await;
        assert_eq!(result.status, StageStatus::Failed);
        assert!(!result.errors[0].contains("jane@example.org"));
    }
}
