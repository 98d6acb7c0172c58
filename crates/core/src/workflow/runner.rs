use super::plan::{CompiledStep, CompiledWorkflow, Condition, GateType, NodeKind};
use super::step_executor::StageInvoker;
use crate::checkpoint::CheckpointSink;
use crate::config::RunnerConfig;
use crate::error::RunnerError;
use crate::registry::StageRegistry;
use crate::sanitize::Sanitizer;
use crate::types::{GovernanceMode, RunState, RunStatus, StageContext, StageResult};
use chrono::Utc;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Warning attached to gates auto-approved under live governance
pub const LIVE_GATE_WARNING: &str =
    "Gate auto-approved in live mode: approval workflow integration is pending";

/// How a step ended up in the run state
enum StepOutcome {
    Executed(StageResult),
    Skipped(StageResult),
}

/// How the step loop ended
enum LoopExit {
    Finished,
    Cancelled,
}

/// Executes compiled workflows step by step.
///
/// Holds no per-run state: everything needed to resume lives in the
/// `RunState`, so one runner can serve any number of runs.
pub struct DagRunner {
    registry: Arc<StageRegistry>,
    invoker: StageInvoker,
    config: RunnerConfig,
    checkpoint: Option<Arc<dyn CheckpointSink>>,
}

impl DagRunner {
    pub fn new(registry: Arc<StageRegistry>, sanitizer: Arc<Sanitizer>, config: RunnerConfig) -> Self {
        let invoker = StageInvoker::new(sanitizer, config.stage_timeout());
        Self {
            registry,
            invoker,
            config,
            checkpoint: None,
        }
    }

    /// Save the run state through `sink` after every step
    pub fn with_checkpoint(mut self, sink: Arc<dyn CheckpointSink>) -> Self {
        self.checkpoint = Some(sink);
        self
    }

    /// Start a new run
    pub async fn run(&self, workflow: &CompiledWorkflow, context: &StageContext) -> RunState {
        self.run_with(workflow, context, None, CancellationToken::new())
            .await
    }

    /// Continue a persisted run from its first unvisited step
    pub async fn resume(
        &self,
        workflow: &CompiledWorkflow,
        context: &StageContext,
        state: RunState,
    ) -> RunState {
        self.run_with(workflow, context, Some(state), CancellationToken::new())
            .await
    }

    /// Run or resume with an external cancellation signal.
    ///
    /// Always returns a run state; only failures in the runner's own control
    /// flow end it as `failed`.
    pub async fn run_with(
        &self,
        workflow: &CompiledWorkflow,
        context: &StageContext,
        resume: Option<RunState>,
        cancel: CancellationToken,
    ) -> RunState {
        let mut state = match resume {
            Some(mut state) => {
                tracing::info!(
                    run_id = %state.run_id,
                    workflow_id = %workflow.workflow_id,
                    visited = state.completed_nodes.len() + state.skipped_nodes.len(),
                    "Resuming workflow run"
                );
                state.status = RunStatus::Running;
                state.error_message = None;
                state.completed_at = None;
                state
            }
            None => {
                let state = RunState::new(&workflow.workflow_id, &workflow.version);
                tracing::info!(
                    run_id = %state.run_id,
                    workflow_id = %workflow.workflow_id,
                    version = %workflow.version,
                    steps = workflow.steps.len(),
                    "Starting workflow run"
                );
                state
            }
        };

        match self.execute_steps(workflow, context, &mut state, &cancel).await {
            Ok(LoopExit::Finished) => {
                state.finish(RunStatus::Completed, None);
                tracing::info!(
                    run_id = %state.run_id,
                    completed = state.completed_nodes.len(),
                    skipped = state.skipped_nodes.len(),
                    "Workflow run completed"
                );
            }
            Ok(LoopExit::Cancelled) => {
                state.finish(RunStatus::Cancelled, Some("Run cancelled".to_string()));
                tracing::warn!(run_id = %state.run_id, "Workflow run cancelled");
            }
            Err(e) => {
                let message = self.invoker.sanitizer().sanitize(&e.to_string());
                tracing::error!(run_id = %state.run_id, error = %message, "Workflow run failed");
                state.finish(RunStatus::Failed, Some(message));
            }
        }

        self.save_checkpoint(&state).await;
        state
    }

    async fn execute_steps(
        &self,
        workflow: &CompiledWorkflow,
        context: &StageContext,
        state: &mut RunState,
        cancel: &CancellationToken,
    ) -> Result<LoopExit, RunnerError> {
        check_resumable(workflow, state)?;

        for step in &workflow.steps {
            if cancel.is_cancelled() {
                return Ok(LoopExit::Cancelled);
            }

            if state.is_visited(&step.node_id) {
                tracing::debug!(node_id = %step.node_id, "Step already visited, skipping");
                continue;
            }

            state.current_node_id = Some(step.node_id.clone());
            match self.execute_step(workflow, step, context, state).await {
                StepOutcome::Executed(result) => {
                    state.record_completed(step.node_id.clone(), result);
                }
                StepOutcome::Skipped(result) => {
                    state.record_skipped(step.node_id.clone(), result);
                }
            }

            self.save_checkpoint(state).await;
        }

        Ok(LoopExit::Finished)
    }

    async fn execute_step(
        &self,
        workflow: &CompiledWorkflow,
        step: &CompiledStep,
        context: &StageContext,
        state: &RunState,
    ) -> StepOutcome {
        // Only reachable with a partial checkpoint; a valid plan orders deps first
        if let Some(missing) = step.depends_on.iter().find(|d| !state.is_visited(d)) {
            tracing::warn!(node_id = %step.node_id, dependency = %missing, "Dependency not visited, skipping step");
            return StepOutcome::Skipped(StageResult::skipped(
                step.stage_id(),
                &step.label,
                format!("Dependency '{}' has not run", missing),
            ));
        }

        if !condition_met(step, state) {
            tracing::info!(node_id = %step.node_id, "Condition not met, skipping step");
            return StepOutcome::Skipped(StageResult::skipped(
                step.stage_id(),
                &step.label,
                "Condition not met",
            ));
        }

        match &step.kind {
            NodeKind::Stage { stage_id } => {
                let Some(stage) = self.registry.lookup(*stage_id) else {
                    tracing::warn!(node_id = %step.node_id, stage_id, "Stage not registered, skipping step");
                    return StepOutcome::Skipped(
                        StageResult::skipped(Some(*stage_id), &step.label, "Stage not registered")
                            .with_warning(format!("Stage {} is not registered", stage_id)),
                    );
                };

                tracing::info!(node_id = %step.node_id, stage_id, "Executing step");
                let stage_context = stage_context(workflow, step, context, state);
                StepOutcome::Executed(self.invoker.invoke(stage, stage_context).await)
            }
            NodeKind::Gate { gate_type } => StepOutcome::Executed(
                self.pass_gate(step, *gate_type, context.governance_mode)
                    .await,
            ),
            NodeKind::Branch | NodeKind::Parallel | NodeKind::Merge => {
                tracing::debug!(node_id = %step.node_id, node_type = step.node_type(), "Structural step");
                StepOutcome::Executed(
                    StageResult::pass_through(&step.label)
                        .with_metadata("structural", true.into())
                        .with_metadata("node_type", step.node_type().into()),
                )
            }
        }
    }

    /// Gates auto-approve in every governance mode for now; live mode says so
    /// in a warning instead of passing silently.
    async fn pass_gate(
        &self,
        step: &CompiledStep,
        gate_type: Option<GateType>,
        mode: GovernanceMode,
    ) -> StageResult {
        let started_at = Utc::now();
        let mut result = StageResult::pass_through(&step.label)
            .with_metadata("gate_type", gate_type.map(|g| g.as_str()).into())
            .with_metadata("governance_mode", mode.to_string().into());

        match mode {
            GovernanceMode::Demo => {
                tokio::time::sleep(self.config.demo_gate_delay()).await;
                tracing::info!(node_id = %step.node_id, "Gate auto-passed (demo)");
            }
            GovernanceMode::Standby => {
                tracing::info!(node_id = %step.node_id, "Gate auto-passed (standby)");
            }
            GovernanceMode::Live => {
                tracing::warn!(node_id = %step.node_id, "Gate auto-approved in live mode, approval integration pending");
                result = result.with_warning(LIVE_GATE_WARNING);
            }
        }

        result
            .with_metadata("auto_passed", true.into())
            .timed(started_at, Utc::now())
    }

    async fn save_checkpoint(&self, state: &RunState) {
        let Some(sink) = &self.checkpoint else {
            return;
        };
        if let Err(e) = sink.save(state).await {
            tracing::warn!(run_id = %state.run_id, error = %e, "Checkpoint failed, continuing run");
        }
    }
}

/// A resumed state must belong to this plan and only name its nodes
fn check_resumable(workflow: &CompiledWorkflow, state: &RunState) -> Result<(), RunnerError> {
    if state.workflow_id != workflow.workflow_id || state.workflow_version != workflow.version {
        return Err(RunnerError::WorkflowMismatch {
            expected: format!("{}@{}", workflow.workflow_id, workflow.version),
            found: format!("{}@{}", state.workflow_id, state.workflow_version),
        });
    }

    if let Some(unknown) = state
        .completed_nodes
        .iter()
        .chain(state.skipped_nodes.iter())
        .find(|id| !workflow.contains(id))
    {
        return Err(RunnerError::UnknownNode(unknown.0.clone()));
    }

    Ok(())
}

fn condition_met(step: &CompiledStep, state: &RunState) -> bool {
    match &step.condition {
        None | Some(Condition::Always) => true,
        Some(Condition::OnSuccess) => step
            .depends_on
            .iter()
            .all(|d| state.node_outputs.get(d).is_some_and(|r| r.is_completed())),
        Some(Condition::OnFailure) => step
            .depends_on
            .iter()
            .any(|d| state.node_outputs.get(d).is_some_and(|r| r.is_failed())),
        Some(Condition::Expr { .. }) => {
            tracing::warn!(
                node_id = %step.node_id,
                "Expression condition is restricted and not evaluated, treating as always"
            );
            true
        }
    }
}

/// Context for one stage invocation: job config overlaid with the step's
/// config, plus every stage result this run has produced so far.
fn stage_context(
    workflow: &CompiledWorkflow,
    step: &CompiledStep,
    context: &StageContext,
    state: &RunState,
) -> StageContext {
    let mut ctx = context.with_config_overrides(&step.config);

    for node_id in &state.completed_nodes {
        if let Some(result) = state.node_outputs.get(node_id) {
            if let Some(stage_id) = result.stage_id {
                ctx.previous_results.insert(stage_id, result.clone());
            }
        }
    }

    ctx.metadata.insert("run_id".into(), state.run_id.to_string().into());
    ctx.metadata
        .insert("workflow_id".into(), workflow.workflow_id.clone().into());
    ctx.metadata
        .insert("node_id".into(), step.node_id.0.clone().into());
    ctx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{EdgeDefinition, NodeDefinition, WorkflowDefinition};
    use crate::testing::{BrokenSink, RecordingSink, StaticStage};
    use crate::types::{NodeId, StageStatus};
    use crate::workflow::compiler::WorkflowCompiler;

    fn runner(stages: Vec<Arc<StaticStage>>) -> DagRunner {
        let mut registry = StageRegistry::new();
        for stage in stages {
            registry.register(stage).unwrap();
        }
        let config = RunnerConfig {
            demo_gate_delay_ms: 5,
            stage_timeout_secs: None,
        };
        DagRunner::new(Arc::new(registry), Arc::new(Sanitizer::default()), config)
    }

    fn compile(def: &WorkflowDefinition) -> CompiledWorkflow {
        WorkflowCompiler::default().compile(def, "wf", "1").unwrap()
    }

    fn linear(third_condition: Option<&str>) -> CompiledWorkflow {
        let mut last = EdgeDefinition::new("2", "3");
        if let Some(kind) = third_condition {
            last = last.when(kind);
        }
        compile(
            &WorkflowDefinition::new("1")
                .node(NodeDefinition::stage("1", 1))
                .node(NodeDefinition::stage("2", 2))
                .node(NodeDefinition::stage("3", 3))
                .edge(EdgeDefinition::new("1", "2"))
                .edge(last),
        )
    }

    fn ctx(mode: GovernanceMode) -> StageContext {
        StageContext::new("job-42", mode)
    }

    #[tokio::test]
    async fn test_failed_stage_does_not_abort_run() {
        let third = StaticStage::ok(3, "report");
        let runner = runner(vec![
            StaticStage::ok(1, "ingest"),
            StaticStage::failing(2, "stats", "division by zero"),
            third.clone(),
        ]);

        let state = runner.run(&linear(None), &ctx(GovernanceMode::Demo)).await;

        assert_eq!(state.status, RunStatus::Completed);
        assert_eq!(state.output("2").unwrap().status, StageStatus::Failed);
        assert_eq!(state.output("3").unwrap().status, StageStatus::Completed);
        assert_eq!(third.calls(), 1);
    }

    #[tokio::test]
    async fn test_on_success_skips_after_failure() {
        let third = StaticStage::ok(3, "report");
        let runner = runner(vec![
            StaticStage::ok(1, "ingest"),
            StaticStage::failing(2, "stats", "division by zero"),
            third.clone(),
        ]);

        let state = runner
            .run(&linear(Some("on_success")), &ctx(GovernanceMode::Demo))
            .await;

        assert_eq!(state.status, RunStatus::Completed);
        assert_eq!(state.output("3").unwrap().status, StageStatus::Skipped);
        assert_eq!(state.skipped_nodes, vec![NodeId::new("3")]);
        assert_eq!(third.calls(), 0);
    }

    #[tokio::test]
    async fn test_on_failure_branch() {
        let def = WorkflowDefinition::new("a")
            .node(NodeDefinition::stage("a", 1))
            .node(NodeDefinition::stage("ok", 2))
            .node(NodeDefinition::stage("recover", 3))
            .edge(EdgeDefinition::new("a", "ok").when("on_success"))
            .edge(EdgeDefinition::new("a", "recover").when("on_failure"));
        let recover = StaticStage::ok(3, "recover");
        let runner = runner(vec![
            StaticStage::failing(1, "a", "boom"),
            StaticStage::ok(2, "ok"),
            recover.clone(),
        ]);

        let state = runner.run(&compile(&def), &ctx(GovernanceMode::Standby)).await;
        assert_eq!(state.output("ok").unwrap().status, StageStatus::Skipped);
        assert_eq!(state.output("recover").unwrap().status, StageStatus::Completed);
        assert_eq!(recover.calls(), 1);
    }

    #[tokio::test]
    async fn test_expr_condition_treated_as_true() {
        let mut def = WorkflowDefinition::new("a")
            .node(NodeDefinition::stage("a", 1))
            .node(NodeDefinition::stage("b", 2))
            .edge(EdgeDefinition::new("a", "b").when("expr"));
        def.edges[0].condition.as_mut().unwrap().expr = Some("false".into());

        let b = StaticStage::ok(2, "b");
        let runner = runner(vec![StaticStage::failing(1, "a", "x"), b.clone()]);
        let state = runner.run(&compile(&def), &ctx(GovernanceMode::Demo)).await;

        assert_eq!(state.output("b").unwrap().status, StageStatus::Completed);
        assert_eq!(b.calls(), 1);
    }

    #[tokio::test]
    async fn test_unregistered_stage_skipped_with_warning() {
        let runner = runner(vec![StaticStage::ok(1, "ingest"), StaticStage::ok(3, "report")]);
        let state = runner.run(&linear(None), &ctx(GovernanceMode::Demo)).await;

        assert_eq!(state.status, RunStatus::Completed);
        let missing = state.output("2").unwrap();
        assert_eq!(missing.status, StageStatus::Skipped);
        assert_eq!(missing.warnings, vec!["Stage 2 is not registered".to_string()]);
        assert!(state.skipped_nodes.contains(&NodeId::new("2")));
        // No condition on 2 -> 3, so the report still runs
        assert_eq!(state.output("3").unwrap().status, StageStatus::Completed);
    }

    #[tokio::test]
    async fn test_gate_policies_by_governance_mode() {
        let def = WorkflowDefinition::new("g").node(NodeDefinition::gate("g", Some("phi_scan")));
        let plan = compile(&def);
        let runner = runner(vec![]);

        let demo = runner.run(&plan, &ctx(GovernanceMode::Demo)).await;
        let gate = demo.output("g").unwrap();
        assert_eq!(gate.status, StageStatus::Completed);
        assert_eq!(gate.metadata["auto_passed"], serde_json::json!(true));
        assert_eq!(gate.metadata["gate_type"], "phi_scan");
        assert!(gate.warnings.is_empty());

        let standby = runner.run(&plan, &ctx(GovernanceMode::Standby)).await;
        assert_eq!(standby.output("g").unwrap().metadata["auto_passed"], serde_json::json!(true));

        let live = runner.run(&plan, &ctx(GovernanceMode::Live)).await;
        let gate = live.output("g").unwrap();
        assert_eq!(gate.status, StageStatus::Completed);
        assert_eq!(gate.warnings, vec![LIVE_GATE_WARNING.to_string()]);
    }

    #[tokio::test]
    async fn test_structural_nodes_pass_through() {
        let def = WorkflowDefinition::new("fan")
            .node(NodeDefinition::structural("fan", "parallel"))
            .node(NodeDefinition::stage("x", 1))
            .node(NodeDefinition::stage("y", 2))
            .node(NodeDefinition::structural("join", "merge"))
            .edge(EdgeDefinition::new("fan", "x"))
            .edge(EdgeDefinition::new("fan", "y"))
            .edge(EdgeDefinition::new("x", "join"))
            .edge(EdgeDefinition::new("y", "join"));
        let runner = runner(vec![StaticStage::ok(1, "x"), StaticStage::ok(2, "y")]);

        let state = runner.run(&compile(&def), &ctx(GovernanceMode::Demo)).await;
        let order: Vec<&str> = state.completed_nodes.iter().map(|n| n.as_str()).collect();
        assert_eq!(order, vec!["fan", "x", "y", "join"]);

        let join = state.output("join").unwrap();
        assert_eq!(join.duration_ms, 0);
        assert_eq!(join.metadata["node_type"], "merge");
        assert_eq!(join.stage_id, None);
    }

    #[tokio::test]
    async fn test_resume_runs_only_remaining_steps() {
        let def = WorkflowDefinition::new("A")
            .node(NodeDefinition::stage("A", 1))
            .node(NodeDefinition::stage("B", 2))
            .edge(EdgeDefinition::new("A", "B"));
        let plan = compile(&def);

        let a = StaticStage::ok(1, "a");
        let b = StaticStage::ok(2, "b");
        let runner = runner(vec![a.clone(), b.clone()]);

        let mut persisted = RunState::new("wf", "1");
        let prior = StageResult::completed(1, "a").with_output("rows", 120.into());
        persisted.record_completed(NodeId::new("A"), prior.clone());
        persisted.status = RunStatus::Failed;

        let state = runner
            .resume(&plan, &ctx(GovernanceMode::Demo), persisted.clone())
            .await;

        assert_eq!(state.run_id, persisted.run_id);
        assert_eq!(state.status, RunStatus::Completed);
        assert_eq!(a.calls(), 0);
        assert_eq!(b.calls(), 1);
        assert_eq!(state.output("A").unwrap().output["rows"], 120);
        assert_eq!(state.output("A").unwrap().started_at, prior.started_at);

        // The resumed stage saw the earlier result
        let seen = b.last_context().unwrap();
        assert!(seen.previous_results.contains_key(&1));
    }

    #[tokio::test]
    async fn test_resume_of_other_workflow_is_fatal() {
        let runner = runner(vec![]);
        let foreign = RunState::new("other", "1");
        let state = runner
            .resume(&linear(None), &ctx(GovernanceMode::Demo), foreign)
            .await;
        assert_eq!(state.status, RunStatus::Failed);
        assert!(state.error_message.unwrap().contains("other@1"));
    }

    #[tokio::test]
    async fn test_resume_with_unknown_node_is_fatal() {
        let runner = runner(vec![]);
        let mut persisted = RunState::new("wf", "1");
        persisted.record_completed(NodeId::new("ghost"), StageResult::pass_through("ghost"));
        let state = runner
            .resume(&linear(None), &ctx(GovernanceMode::Demo), persisted)
            .await;
        assert_eq!(state.status, RunStatus::Failed);
        assert!(state.node_outputs.get(&NodeId::new("1")).is_none());
    }

    #[tokio::test]
    async fn test_checkpoint_after_every_step() {
        let sink = Arc::new(RecordingSink::default());
        let runner = runner(vec![
            StaticStage::ok(1, "a"),
            StaticStage::ok(2, "b"),
            StaticStage::ok(3, "c"),
        ])
        .with_checkpoint(sink.clone());

        let state = runner.run(&linear(None), &ctx(GovernanceMode::Demo)).await;
        let saved = sink.saved();

        // One per step plus the terminal state
        assert_eq!(saved.len(), 4);
        assert_eq!(saved[0].completed_nodes.len(), 1);
        assert_eq!(saved[2].status, RunStatus::Running);
        assert_eq!(saved[3].status, RunStatus::Completed);
        assert_eq!(saved[3].run_id, state.run_id);
    }

    #[tokio::test]
    async fn test_checkpoint_failure_does_not_abort() {
        let runner = runner(vec![StaticStage::ok(1, "a"), StaticStage::ok(2, "b"), StaticStage::ok(3, "c")])
            .with_checkpoint(Arc::new(BrokenSink));
        let state = runner.run(&linear(None), &ctx(GovernanceMode::Demo)).await;
        assert_eq!(state.status, RunStatus::Completed);
        assert_eq!(state.completed_nodes.len(), 3);
    }

    #[tokio::test]
    async fn test_cancellation_stops_before_next_step() {
        let runner = runner(vec![StaticStage::ok(1, "a"), StaticStage::ok(2, "b"), StaticStage::ok(3, "c")]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let state = runner
            .run_with(&linear(None), &ctx(GovernanceMode::Demo), None, cancel)
            .await;
        assert_eq!(state.status, RunStatus::Cancelled);
        assert!(state.completed_nodes.is_empty());

        // A cancelled run resumes where it stopped
        let resumed = runner
            .resume(&linear(None), &ctx(GovernanceMode::Demo), state)
            .await;
        assert_eq!(resumed.status, RunStatus::Completed);
        assert_eq!(resumed.completed_nodes.len(), 3);
    }

    #[tokio::test]
    async fn test_step_config_overrides_job_config() {
        let def = WorkflowDefinition::new("a").node(
            NodeDefinition::stage("a", 1).with_config("alpha", serde_json::json!(0.01)),
        );
        let stage = StaticStage::ok(1, "a");
        let runner = runner(vec![stage.clone()]);

        let mut context = ctx(GovernanceMode::Demo);
        context.config.insert("alpha".into(), serde_json::json!(0.05));
        context.config.insert("seed".into(), serde_json::json!(7));

        runner.run(&compile(&def), &context).await;
        let seen = stage.last_context().unwrap();
        assert_eq!(seen.config["alpha"], serde_json::json!(0.01));
        assert_eq!(seen.config["seed"], serde_json::json!(7));
        assert_eq!(seen.metadata["node_id"], "a");
        // Caller's context is never modified
        assert_eq!(context.config["alpha"], serde_json::json!(0.05));
    }

    #[tokio::test]
    async fn test_panicking_stage_recorded_as_failed() {
        let runner = runner(vec![
            StaticStage::ok(1, "a"),
            StaticStage::panicking(2, "b"),
            StaticStage::ok(3, "c"),
        ]);
        let state = runner.run(&linear(None), &ctx(GovernanceMode::Demo)).await;
        assert_eq!(state.status, RunStatus::Completed);
        assert_eq!(state.output("2").unwrap().status, StageStatus::Failed);
        assert_eq!(state.completed_nodes.len(), 3);
    }

    #[tokio::test]
    async fn test_completed_and_skipped_are_disjoint() {
        let runner = runner(vec![StaticStage::failing(1, "a", "x"), StaticStage::ok(3, "c")]);
        let state = runner
            .run(&linear(Some("on_success")), &ctx(GovernanceMode::Demo))
            .await;

        for node in &state.completed_nodes {
            assert!(!state.skipped_nodes.contains(node));
        }
        assert_eq!(state.completed_nodes.len() + state.skipped_nodes.len(), 3);
    }
}
