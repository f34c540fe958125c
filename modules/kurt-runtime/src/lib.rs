//! Workflow runtime: a DAG executor with durable checkpointing, parallel
//! step scheduling, event/stream observability, cancellation, and retry.
//!
//! A workflow is a named set of steps with dependencies. The planner groups
//! steps into execution levels (topological sort); the runner executes levels
//! in order, steps within a level concurrently, checkpointing each step to
//! the run store before and after execution. Steps fan out by enqueueing
//! sub-tasks on a bounded queue and joining their results.

pub mod context;
pub mod dag;
pub mod parser;
pub mod queue;
pub mod registry;
pub mod runner;
pub mod state;
pub mod status;
pub mod types;

pub use context::StepContext;
pub use dag::{build_dag, CycleError, ExecutionPlan};
pub use parser::{
    parse_workflow, parse_workflow_str, InputDef, InputType, ParseError, StepDef,
    WorkflowDefinition, WorkflowMeta,
};
pub use queue::{SubTask, TaskQueue};
pub use registry::{Tool, ToolRegistry};
pub use runner::{RunOutcome, WorkflowRunner};
pub use state::{MemoryRunState, RunRecord, RunStateStore, StepRecord};
pub use status::{live_status, LiveStatus, StepProgress};
pub use types::{ItemError, RunOptions, RuntimeError, ToolResult, WorkflowHandle};
