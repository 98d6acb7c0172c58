// Core types and functionality for Stagegraph workflow orchestration

pub mod checkpoint;
pub mod config;
pub mod definition;
pub mod error;
pub mod registry;
pub mod sanitize;
pub mod types;
pub mod workflow;

#[cfg(test)]
pub(crate) mod testing;

pub use checkpoint::CheckpointSink;
pub use config::{CompilerConfig, RunnerConfig, SanitizerConfig};
pub use definition::WorkflowDefinition;
pub use error::{CompileError, RegistryError, RunnerError};
pub use registry::{Stage, StageRegistry};
pub use sanitize::Sanitizer;
pub use types::*;
