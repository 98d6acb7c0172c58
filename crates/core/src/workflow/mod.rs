// Workflow compilation and execution

pub mod cache;
pub mod compiler;
pub mod dag;
pub mod plan;
pub mod runner;
pub mod sequential;
pub mod step_executor;

pub use cache::CompiledWorkflowCache;
pub use compiler::WorkflowCompiler;
pub use dag::WorkflowGraph;
pub use plan::{CompiledStep, CompiledWorkflow, Condition, GateType, NodeKind};
pub use runner::DagRunner;
pub use sequential::{SequentialOptions, SequentialReport, SequentialRunner};
pub use step_executor::StageInvoker;
