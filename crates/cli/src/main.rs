use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use stagegraph_core::workflow::{
    CompiledWorkflow, DagRunner, SequentialOptions, SequentialRunner, WorkflowCompiler,
};
use stagegraph_core::{GovernanceMode, RunStatus, Sanitizer, WorkflowDefinition};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

mod checkpoint;
mod config;
mod stages;

use checkpoint::JsonFileCheckpoint;
use config::{AppConfig, LoggingConfig};

#[derive(Parser, Debug)]
#[command(name = "stagegraph")]
#[command(about = "Compile and run stage-based workflow graphs", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "stagegraph.toml", env = "STAGEGRAPH_CONFIG", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args, Debug)]
struct PlanArgs {
    /// Workflow definition (JSON)
    definition: PathBuf,

    /// Workflow id; defaults to the definition file stem
    #[arg(long)]
    workflow_id: Option<String>,

    /// Workflow version
    #[arg(long, default_value = "1")]
    version: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check a definition and report the first problem found
    Validate(PlanArgs),

    /// Print the compiled execution plan
    Plan(PlanArgs),

    /// Execute a workflow from its entry node
    Run {
        #[command(flatten)]
        plan: PlanArgs,

        /// Job identifier handed to every stage
        #[arg(long)]
        job_id: Option<String>,

        /// Governance mode (demo, standby, live)
        #[arg(long)]
        governance: Option<GovernanceMode>,

        /// Write run state here after every step
        #[arg(long)]
        checkpoint: Option<PathBuf>,
    },

    /// Continue a checkpointed run
    Resume {
        /// Workflow definition (JSON)
        definition: PathBuf,

        /// Checkpoint written by an earlier run
        #[arg(long)]
        checkpoint: PathBuf,

        #[arg(long)]
        job_id: Option<String>,

        #[arg(long)]
        governance: Option<GovernanceMode>,
    },

    /// Run a flat list of stage ids in order
    Sequence {
        /// Comma-separated stage ids
        #[arg(long, value_delimiter = ',', required = true)]
        stages: Vec<u32>,

        #[arg(long)]
        job_id: Option<String>,

        #[arg(long)]
        governance: Option<GovernanceMode>,

        /// Keep going after a stage fails
        #[arg(long)]
        continue_on_failure: bool,
    },

    /// List registered stages
    Stages,
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| logging.filter.as_str().into());

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if logging.json {
        builder.json().init();
    } else {
        builder.with_file(true).with_line_number(true).init();
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    let config = AppConfig::load(&args.config)?;
    init_tracing(&config.logging);

    match args.command {
        Command::Validate(plan) => {
            let workflow = compile(&config, &plan.definition, plan.workflow_id, &plan.version)?;
            println!(
                "{} v{}: {} steps, entry '{}'",
                workflow.workflow_id,
                workflow.version,
                workflow.steps.len(),
                workflow.entry_node_id
            );
            Ok(ExitCode::SUCCESS)
        }
        Command::Plan(plan) => {
            let workflow = compile(&config, &plan.definition, plan.workflow_id, &plan.version)?;
            println!("{}", serde_json::to_string_pretty(&workflow)?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Run {
            plan,
            job_id,
            governance,
            checkpoint,
        } => {
            let workflow = compile(&config, &plan.definition, plan.workflow_id, &plan.version)?;
            let runner = dag_runner(&config, checkpoint)?;
            let job_id = job_id.unwrap_or_else(|| default_job_id(&workflow));
            let context = config.stage_context(&job_id, governance);

            let state = runner
                .run_with(&workflow, &context, None, cancel_on_ctrl_c())
                .await;
            report_state(&state)
        }
        Command::Resume {
            definition,
            checkpoint,
            job_id,
            governance,
        } => {
            let previous = JsonFileCheckpoint::load(&checkpoint).await?;
            let workflow = compile(
                &config,
                &definition,
                Some(previous.workflow_id.clone()),
                &previous.workflow_version,
            )?;
            let runner = dag_runner(&config, Some(checkpoint))?;
            let job_id = job_id.unwrap_or_else(|| previous.run_id.to_string());
            let context = config.stage_context(&job_id, governance);

            let state = runner
                .run_with(&workflow, &context, Some(previous), cancel_on_ctrl_c())
                .await;
            report_state(&state)
        }
        Command::Sequence {
            stages: stage_ids,
            job_id,
            governance,
            continue_on_failure,
        } => {
            let registry = stages::build_registry(&config.stages, &config.compiler)?;
            let sanitizer = Arc::new(Sanitizer::new(&config.sanitizer));
            let runner = SequentialRunner::new(Arc::new(registry), sanitizer, &config.runner);
            let context = config.stage_context(job_id.as_deref().unwrap_or("sequence"), governance);

            let report = runner
                .run_stages(
                    &stage_ids,
                    &context,
                    SequentialOptions {
                        stop_on_failure: !continue_on_failure,
                    },
                )
                .await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(if report.success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Stages => {
            let registry = stages::build_registry(&config.stages, &config.compiler)?;
            for stage in registry.list() {
                println!("{:>3}  {}", stage.stage_id, stage.stage_name);
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Read and compile a definition file
fn compile(
    config: &AppConfig,
    path: &Path,
    workflow_id: Option<String>,
    version: &str,
) -> Result<CompiledWorkflow> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read workflow definition {}", path.display()))?;
    let definition = WorkflowDefinition::from_json(&json)
        .with_context(|| format!("Failed to parse workflow definition {}", path.display()))?;

    let workflow_id = workflow_id.unwrap_or_else(|| {
        path.file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "workflow".to_string())
    });

    let compiler = WorkflowCompiler::new(config.compiler.clone());
    compiler
        .compile(&definition, &workflow_id, version)
        .with_context(|| format!("Workflow '{}' failed to compile", workflow_id))
}

fn dag_runner(config: &AppConfig, checkpoint: Option<PathBuf>) -> Result<DagRunner> {
    let registry = stages::build_registry(&config.stages, &config.compiler)?;
    let sanitizer = Arc::new(Sanitizer::new(&config.sanitizer));
    let runner = DagRunner::new(Arc::new(registry), sanitizer, config.runner.clone());

    Ok(match checkpoint {
        Some(path) => {
            tracing::info!(path = %path.display(), "Checkpointing run state");
            runner.with_checkpoint(Arc::new(JsonFileCheckpoint::new(path)))
        }
        None => runner,
    })
}

fn default_job_id(workflow: &CompiledWorkflow) -> String {
    format!("{}-{}", workflow.workflow_id, chrono::Utc::now().format("%Y%m%d%H%M%S"))
}

/// Token cancelled on the first Ctrl-C
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling after the current step");
            child.cancel();
        }
    });
    token
}

fn report_state(state: &stagegraph_core::RunState) -> Result<ExitCode> {
    println!("{}", serde_json::to_string_pretty(state)?);
    Ok(match state.status {
        RunStatus::Completed => ExitCode::SUCCESS,
        _ => ExitCode::FAILURE,
    })
}
