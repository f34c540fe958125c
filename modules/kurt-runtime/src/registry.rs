//! Tool registry: dynamic dispatch over step implementations, keyed by name.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::context::StepContext;
use crate::types::{RuntimeError, ToolResult};

/// A step implementation. Invoked with the concatenated outputs of its
/// dependencies (in `depends_on` declaration order), its config, and the
/// step context for observability and fan-out.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    async fn run(
        &self,
        input_data: Vec<serde_json::Value>,
        config: &serde_json::Value,
        ctx: &StepContext,
    ) -> Result<ToolResult, RuntimeError>;

    /// Strict tools fail the step when every sub-task failed is not enough —
    /// any sub-task failure fails the step.
    fn strict(&self) -> bool {
        false
    }
}

#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        info!(tool = tool.name(), "registered tool");
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort();
        names
    }
}
