//! The workflow runner: validates, plans, and executes a workflow DAG with
//! durable per-step checkpoints.
//!
//! Levels execute in order; steps within a level run concurrently. The unit
//! of suspension is the step boundary — a step either runs to completion or
//! fails as a unit, and a restarted run re-executes any step checkpointed
//! `running` without a terminal `completed_at`.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use uuid::Uuid;

use kurt_common::types::WorkflowStatus;
use kurt_events::{EventSink, StepEventStatus};

use crate::context::StepContext;
use crate::dag::build_dag;
use crate::parser::{InputType, WorkflowDefinition};
use crate::registry::ToolRegistry;
use crate::state::RunStateStore;
use crate::types::{RunOptions, RuntimeError, ToolResult, WorkflowHandle};

/// Base delay for exponential backoff between step attempts.
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

/// Terminal result of one run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub workflow_id: String,
    pub status: WorkflowStatus,
    pub step_outputs: BTreeMap<String, Vec<serde_json::Value>>,
    pub error: Option<String>,
}

#[derive(Clone)]
pub struct WorkflowRunner {
    registry: Arc<ToolRegistry>,
    state: Arc<dyn RunStateStore>,
    sink: Arc<dyn EventSink>,
    workflows: Arc<RwLock<HashMap<String, WorkflowDefinition>>>,
}

impl WorkflowRunner {
    pub fn new(
        registry: Arc<ToolRegistry>,
        state: Arc<dyn RunStateStore>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            registry,
            state,
            sink,
            workflows: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn state(&self) -> Arc<dyn RunStateStore> {
        self.state.clone()
    }

    pub fn sink(&self) -> Arc<dyn EventSink> {
        self.sink.clone()
    }

    /// Register a named workflow definition.
    pub async fn register_workflow(&self, definition: WorkflowDefinition) {
        let name = definition.workflow.name.clone();
        info!(workflow = %name, "registered workflow");
        self.workflows.write().await.insert(name, definition);
    }

    /// Run a registered workflow by name.
    pub async fn run(
        &self,
        workflow_name: &str,
        inputs: serde_json::Value,
        options: RunOptions,
    ) -> Result<WorkflowHandle, RuntimeError> {
        let definition = self
            .workflows
            .read()
            .await
            .get(workflow_name)
            .cloned()
            .ok_or_else(|| RuntimeError::NotFound(workflow_name.to_string()))?;
        self.run_definition(definition, inputs, options).await
    }

    /// Run a workflow definition directly.
    pub async fn run_definition(
        &self,
        definition: WorkflowDefinition,
        inputs: serde_json::Value,
        options: RunOptions,
    ) -> Result<WorkflowHandle, RuntimeError> {
        // Everything that can be rejected is rejected before any state is
        // written.
        let resolved_inputs = validate_inputs(&definition, &inputs)?;
        self.validate_steps(&definition)?;
        build_dag(&definition.steps)
            .map_err(|e| RuntimeError::Validation(e.to_string()))?;

        let workflow_id = Uuid::new_v4().to_string();
        let metadata = serde_json::json!({
            "workflow_type": definition.workflow.name,
            "parent_workflow_id": options.parent_workflow_id,
            "priority": options.priority,
        });
        self.state
            .create_run(&workflow_id, &definition.workflow.name, &inputs, &metadata)
            .await?;

        if options.background {
            let runner = self.clone();
            let id = workflow_id.clone();
            tokio::spawn(async move {
                if let Err(e) = runner
                    .execute(definition, id.clone(), resolved_inputs, options, false)
                    .await
                {
                    error!(workflow_id = %id, error = %e, "background run failed");
                }
            });
            return Ok(WorkflowHandle::Background { workflow_id });
        }

        let outcome = self
            .execute(definition, workflow_id, resolved_inputs, options, false)
            .await?;
        Ok(WorkflowHandle::Completed(outcome))
    }

    /// Request cancellation. The runner observes the transition at step
    /// boundaries and before enqueueing further sub-tasks.
    pub async fn cancel(&self, workflow_id: &str) -> Result<bool, RuntimeError> {
        let flipped = self.state.request_cancel(workflow_id).await?;
        if flipped {
            self.sink
                .set_event(workflow_id, "status", serde_json::json!("canceling"))
                .await
                .ok();
        }
        Ok(flipped)
    }

    /// Start a new run with the same inputs as a previous one. Returns the
    /// new workflow id.
    pub async fn retry(&self, workflow_id: &str) -> Result<WorkflowHandle, RuntimeError> {
        let run = self.state.get_run(workflow_id).await?;
        self.run(
            &run.workflow_name,
            run.inputs,
            RunOptions {
                background: true,
                ..RunOptions::default()
            },
        )
        .await
    }

    /// Resume an interrupted run: completed steps fan-in from their
    /// persisted outputs; anything checkpointed `running` without a
    /// terminal `completed_at` re-executes from its input snapshot.
    pub async fn resume(&self, workflow_id: &str) -> Result<RunOutcome, RuntimeError> {
        let run = self.state.get_run(workflow_id).await?;
        if run.status.is_terminal() {
            return Ok(RunOutcome {
                workflow_id: workflow_id.to_string(),
                status: run.status,
                step_outputs: BTreeMap::new(),
                error: run.error,
            });
        }
        let definition = self
            .workflows
            .read()
            .await
            .get(&run.workflow_name)
            .cloned()
            .ok_or_else(|| RuntimeError::NotFound(run.workflow_name.clone()))?;
        let resolved_inputs = validate_inputs(&definition, &run.inputs)?;
        self.execute(
            definition,
            workflow_id.to_string(),
            resolved_inputs,
            RunOptions::default(),
            true,
        )
        .await
    }

    fn validate_steps(&self, definition: &WorkflowDefinition) -> Result<(), RuntimeError> {
        for (name, step) in &definition.steps {
            let tool_name = if step.step_type == "function" {
                step.function.as_deref().ok_or_else(|| {
                    RuntimeError::Validation(format!("step {name} missing function name"))
                })?
            } else {
                &step.step_type
            };
            if !self.registry.is_empty() && !self.registry.contains(tool_name) {
                return Err(RuntimeError::Validation(format!(
                    "step {name} has unregistered type: {tool_name}"
                )));
            }
        }
        Ok(())
    }

    async fn execute(
        &self,
        definition: WorkflowDefinition,
        workflow_id: String,
        inputs: serde_json::Value,
        options: RunOptions,
        resume: bool,
    ) -> Result<RunOutcome, RuntimeError> {
        let plan = build_dag(&definition.steps)
            .map_err(|e| RuntimeError::Validation(e.to_string()))?;

        self.state
            .update_status(&workflow_id, WorkflowStatus::Running, None)
            .await?;
        self.sink
            .set_event(&workflow_id, "status", serde_json::json!("running"))
            .await
            .ok();
        self.sink
            .set_event(
                &workflow_id,
                "workflow_type",
                serde_json::json!(definition.workflow.name),
            )
            .await
            .ok();

        // Outputs of completed steps, fan-in source. On resume this is
        // preloaded from the step checkpoints.
        let mut step_outputs: BTreeMap<String, Vec<serde_json::Value>> = BTreeMap::new();
        if resume {
            for record in self.state.step_records(&workflow_id).await? {
                if record.status == "completed" && record.completed_at.is_some() {
                    let outputs = record
                        .outputs
                        .as_array()
                        .cloned()
                        .unwrap_or_default();
                    step_outputs.insert(record.step_id, outputs);
                }
            }
        }

        let mut any_step_errors = false;
        let mut terminal_error: Option<String> = None;
        let mut canceled = false;
        let mut executed: BTreeSet<String> = step_outputs.keys().cloned().collect();

        'levels: for level in &plan.levels {
            // Cancellation is observed at the step boundary.
            if matches!(
                self.state.status(&workflow_id).await?,
                WorkflowStatus::Canceling | WorkflowStatus::Canceled
            ) {
                canceled = true;
                break 'levels;
            }

            let mut join_set: JoinSet<(String, Result<ToolResult, RuntimeError>)> =
                JoinSet::new();

            for step_name in level {
                if executed.contains(step_name) {
                    continue;
                }
                let step = definition.steps[step_name].clone();

                // Fan-in: dependency outputs concatenated in declaration
                // order. A failed dependency (continue_on_error) contributes
                // nothing.
                let mut input_data = vec![];
                for dep in &step.depends_on {
                    if let Some(outputs) = step_outputs.get(dep) {
                        input_data.extend(outputs.iter().cloned());
                    }
                }

                let tool_name = if step.step_type == "function" {
                    step.function.clone().unwrap_or_default()
                } else {
                    step.step_type.clone()
                };
                let Some(tool) = self.registry.get(&tool_name) else {
                    return Err(RuntimeError::Validation(format!(
                        "step {step_name} has unregistered type: {tool_name}"
                    )));
                };

                let ctx = StepContext {
                    run_id: workflow_id.clone(),
                    step_id: step_name.clone(),
                    workflow_name: definition.workflow.name.clone(),
                    inputs: inputs.clone(),
                    sink: self.sink.clone(),
                    state: self.state.clone(),
                };
                let state = self.state.clone();
                let config = step.config.clone();
                let step_name = step_name.clone();
                let max_attempts = options.max_step_attempts;

                join_set.spawn(async move {
                    let result = run_step_with_retry(
                        state,
                        ctx,
                        tool,
                        &step_name,
                        input_data,
                        &config,
                        max_attempts,
                    )
                    .await;
                    (step_name, result)
                });
            }

            // Join the level: completion order is nondeterministic, fan-in
            // order is not.
            while let Some(joined) = join_set.join_next().await {
                let (step_name, result) = match joined {
                    Ok(pair) => pair,
                    Err(join_err) => {
                        terminal_error = Some(format!("step task panicked: {join_err}"));
                        break 'levels;
                    }
                };
                executed.insert(step_name.clone());
                let step = &definition.steps[&step_name];

                match result {
                    Ok(tool_result) => {
                        if !tool_result.errors.is_empty() {
                            any_step_errors = true;
                        }
                        step_outputs.insert(step_name, tool_result.output_data);
                    }
                    Err(e) => {
                        warn!(workflow_id = %workflow_id, step = %step_name, error = %e, "step failed");
                        any_step_errors = true;
                        if !step.continue_on_error {
                            terminal_error = Some(e.to_string());
                            break 'levels;
                        }
                    }
                }
            }
        }

        // A cancel that arrived during the final level is still honored at
        // this boundary.
        if !canceled
            && terminal_error.is_none()
            && matches!(
                self.state.status(&workflow_id).await?,
                WorkflowStatus::Canceling
            )
        {
            canceled = true;
        }

        // Steps never reached are marked canceled — both after a terminal
        // failure and after cancellation.
        if canceled || terminal_error.is_some() {
            for level in &plan.levels {
                for step_name in level {
                    if !executed.contains(step_name) {
                        let step = &definition.steps[step_name];
                        self.state
                            .start_step(&workflow_id, step_name, &step.step_type, 0, None)
                            .await
                            .ok();
                        self.state
                            .finish_step(
                                &workflow_id,
                                step_name,
                                "canceled",
                                &serde_json::json!([]),
                                0,
                                &serde_json::json!([]),
                                &serde_json::json!({}),
                            )
                            .await
                            .ok();
                    }
                }
            }
        }

        let status = if canceled {
            WorkflowStatus::Canceled
        } else if terminal_error.is_some() {
            WorkflowStatus::Failed
        } else if any_step_errors {
            WorkflowStatus::CompletedWithErrors
        } else {
            WorkflowStatus::Completed
        };

        self.state
            .update_status(&workflow_id, status, terminal_error.as_deref())
            .await?;
        self.sink
            .set_event(&workflow_id, "status", serde_json::json!(status.to_string()))
            .await
            .ok();

        info!(workflow_id = %workflow_id, status = %status, "workflow finished");
        Ok(RunOutcome {
            workflow_id,
            status,
            step_outputs,
            error: terminal_error,
        })
    }
}

/// Execute one step with checkpoints and transient-failure retry. Retries
/// are recorded as separate events against a single step_log row.
async fn run_step_with_retry(
    state: Arc<dyn RunStateStore>,
    ctx: StepContext,
    tool: Arc<dyn crate::registry::Tool>,
    step_name: &str,
    input_data: Vec<serde_json::Value>,
    config: &serde_json::Value,
    max_attempts: u32,
) -> Result<ToolResult, RuntimeError> {
    let input_hash = hash_inputs(&input_data);
    state
        .start_step(
            &ctx.run_id,
            step_name,
            tool.name(),
            input_data.len() as i64,
            Some(&input_hash),
        )
        .await?;
    ctx.step_event(StepEventStatus::Running, None).await;

    // Optional per-step timeout; an elapsed timeout is a failure, never a
    // hang.
    let timeout = config
        .get("timeout_secs")
        .and_then(|v| v.as_u64())
        .map(Duration::from_secs);

    let mut attempt = 0;
    let result = loop {
        attempt += 1;
        let attempt_result = match timeout {
            Some(limit) => {
                match tokio::time::timeout(limit, tool.run(input_data.clone(), config, &ctx))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(RuntimeError::StepFailed {
                        step: step_name.to_string(),
                        message: format!("timed out after {}s", limit.as_secs()),
                    }),
                }
            }
            None => tool.run(input_data.clone(), config, &ctx).await,
        };
        match attempt_result {
            Ok(result) => break Ok(result),
            Err(RuntimeError::Transient(message)) if attempt < max_attempts => {
                let backoff = RETRY_BASE_DELAY * 2u32.pow(attempt - 1);
                let jitter = Duration::from_millis(rand::rng().random_range(0..250));
                warn!(
                    step = step_name,
                    attempt,
                    backoff_ms = (backoff + jitter).as_millis() as u64,
                    "transient step failure, retrying"
                );
                ctx.step_event(
                    StepEventStatus::Progress,
                    Some(&format!("retry {attempt}: {message}")),
                )
                .await;
                tokio::time::sleep(backoff + jitter).await;
            }
            Err(e) => break Err(e),
        }
    };

    match &result {
        Ok(tool_result) => {
            let strict_failure = tool.strict() && !tool_result.errors.is_empty();
            let status = if strict_failure { "failed" } else { "completed" };
            state
                .finish_step(
                    &ctx.run_id,
                    step_name,
                    status,
                    &serde_json::json!(tool_result.output_data),
                    tool_result.errors.len() as i64,
                    &serde_json::to_value(&tool_result.errors)
                        .unwrap_or(serde_json::json!([])),
                    &tool_result.metadata,
                )
                .await?;
            if strict_failure {
                ctx.step_event(StepEventStatus::Failed, Some("strict mode: item errors"))
                    .await;
                return Err(RuntimeError::StepFailed {
                    step: step_name.to_string(),
                    message: format!("{} item error(s) in strict mode", tool_result.errors.len()),
                });
            }
            ctx.step_event(StepEventStatus::Completed, None).await;
        }
        Err(e) => {
            state
                .finish_step(
                    &ctx.run_id,
                    step_name,
                    "failed",
                    &serde_json::json!([]),
                    1,
                    &serde_json::json!([{ "kind": "step", "message": e.to_string() }]),
                    &serde_json::json!({}),
                )
                .await?;
            ctx.step_event(StepEventStatus::Failed, Some(&e.to_string())).await;
        }
    }

    result
}

/// Resolve and type-check workflow inputs against their declarations.
fn validate_inputs(
    definition: &WorkflowDefinition,
    provided: &serde_json::Value,
) -> Result<serde_json::Value, RuntimeError> {
    let provided_map = match provided {
        serde_json::Value::Object(map) => map.clone(),
        serde_json::Value::Null => serde_json::Map::new(),
        _ => {
            return Err(RuntimeError::Validation(
                "workflow inputs must be an object".to_string(),
            ))
        }
    };

    let mut resolved = provided_map.clone();
    for (name, input_def) in &definition.inputs {
        match provided_map.get(name) {
            Some(value) => {
                let ok = match input_def.input_type {
                    InputType::String => value.is_string(),
                    InputType::Int => value.is_i64() || value.is_u64(),
                    InputType::Float => value.is_number(),
                    InputType::Bool => value.is_boolean(),
                };
                if !ok {
                    return Err(RuntimeError::Validation(format!(
                        "input {name} has wrong type"
                    )));
                }
            }
            None => match &input_def.default {
                Some(default) => {
                    resolved.insert(name.clone(), default.clone());
                }
                None if input_def.required => {
                    return Err(RuntimeError::Validation(format!(
                        "missing required input: {name}"
                    )));
                }
                None => {}
            },
        }
    }
    Ok(serde_json::Value::Object(resolved))
}

fn hash_inputs(input_data: &[serde_json::Value]) -> String {
    let serialized = serde_json::to_string(input_data).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(serialized.as_bytes());
    hex::encode(hasher.finalize())
}
