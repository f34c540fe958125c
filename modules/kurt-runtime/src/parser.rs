//! TOML workflow parser with strict validation.
//!
//! A workflow file declares `[workflow]` metadata, typed `[inputs.<name>]`
//! parameters, and `[steps.<name>]` definitions. Every validation failure
//! here happens before any step runs and leaves no database state.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::registry::ToolRegistry;

/// Step type aliases: user-friendly names → registry names.
const STEP_TYPE_ALIASES: &[(&str, &str)] = &[("llm", "batch-llm"), ("embed", "batch-embedding")];

/// Step types accepted in workflow files (before alias resolution).
/// `function` is special: it names a user-defined function instead of a tool.
const VALID_STEP_TYPES: &[&str] =
    &["map", "fetch", "llm", "embed", "write", "sql", "agent", "function"];

const WORKFLOW_KEYS: &[&str] = &["name", "description"];
const INPUT_KEYS: &[&str] = &["type", "required", "default"];
const STEP_KEYS: &[&str] = &["type", "depends_on", "config", "continue_on_error", "function"];
const TOP_LEVEL_KEYS: &[&str] = &["workflow", "inputs", "steps"];

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Cannot read {path}: {message}")]
    Io { path: String, message: String },

    #[error("Invalid TOML: {0}")]
    Toml(String),

    #[error("Missing required [workflow] section")]
    MissingWorkflowSection,

    #[error("{location} has unknown key: {key}")]
    UnknownKey { location: String, key: String },

    #[error("Step {step} has unknown type: {step_type}")]
    UnknownStepType { step: String, step_type: String },

    #[error("Step {step} depends on unknown step: {dep}")]
    UnknownDependsOn { step: String, dep: String },

    #[error("Circular dependency detected: {}", cycle.join(" -> "))]
    CircularDependency { cycle: Vec<String> },

    #[error("Input {input}: default value {default} does not match type {input_type}")]
    DefaultTypeMismatch {
        input: String,
        default: String,
        input_type: String,
    },

    #[error("Step {step} has type 'function' but missing required 'function' key")]
    MissingFunctionName { step: String },

    #[error("Step {step} missing required 'type' key")]
    MissingStepType { step: String },

    #[error("{0}")]
    Invalid(String),
}

/// Input parameter types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    String,
    Int,
    Float,
    Bool,
}

impl std::str::FromStr for InputType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "string" => Ok(Self::String),
            "int" => Ok(Self::Int),
            "float" => Ok(Self::Float),
            "bool" => Ok(Self::Bool),
            other => Err(format!("unknown input type: {other}")),
        }
    }
}

impl InputType {
    /// Whether a TOML value is acceptable for this type. Ints are accepted
    /// for floats.
    fn matches(&self, value: &toml::Value) -> bool {
        match self {
            InputType::String => value.is_str(),
            InputType::Int => value.is_integer(),
            InputType::Float => value.is_float() || value.is_integer(),
            InputType::Bool => value.is_bool(),
        }
    }

    /// Coerce a CLI string into a JSON value of this type.
    pub fn coerce(&self, raw: &str) -> Result<serde_json::Value, String> {
        match self {
            InputType::String => Ok(serde_json::Value::String(raw.to_string())),
            InputType::Int => raw
                .parse::<i64>()
                .map(serde_json::Value::from)
                .map_err(|_| format!("{raw} is not an int")),
            InputType::Float => raw
                .parse::<f64>()
                .map(serde_json::Value::from)
                .map_err(|_| format!("{raw} is not a float")),
            InputType::Bool => raw
                .parse::<bool>()
                .map(serde_json::Value::from)
                .map_err(|_| format!("{raw} is not a bool")),
        }
    }
}

/// Definition of a workflow input parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputDef {
    pub input_type: InputType,
    pub required: bool,
    pub default: Option<serde_json::Value>,
}

/// Definition of a workflow step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDef {
    /// Tool name to execute (after alias resolution).
    pub step_type: String,
    pub depends_on: Vec<String>,
    pub config: serde_json::Value,
    /// For `step_type = "function"`, the function name to call.
    pub function: Option<String>,
    pub continue_on_error: bool,
}

impl StepDef {
    pub fn new(step_type: &str) -> Self {
        Self {
            step_type: step_type.to_string(),
            depends_on: vec![],
            config: serde_json::json!({}),
            function: None,
            continue_on_error: false,
        }
    }

    pub fn with_deps(mut self, deps: &[&str]) -> Self {
        self.depends_on = deps.iter().map(|d| d.to_string()).collect();
        self
    }

    /// Scheduling priority from config; lower runs first. Default 100.
    pub fn priority(&self) -> i64 {
        self.config
            .get("priority")
            .and_then(|v| v.as_i64())
            .unwrap_or(100)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowMeta {
    pub name: String,
    pub description: Option<String>,
}

/// Complete workflow definition parsed from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub workflow: WorkflowMeta,
    pub inputs: BTreeMap<String, InputDef>,
    pub steps: BTreeMap<String, StepDef>,
}

/// Resolve a step type alias to its registry name.
pub fn resolve_step_type(step_type: &str) -> &str {
    STEP_TYPE_ALIASES
        .iter()
        .find(|(alias, _)| *alias == step_type)
        .map(|(_, resolved)| *resolved)
        .unwrap_or(step_type)
}

pub fn parse_workflow(
    path: &Path,
    registry: Option<&ToolRegistry>,
) -> Result<WorkflowDefinition, ParseError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ParseError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    parse_workflow_str(&raw, registry)
}

/// Parse and validate a workflow definition.
///
/// When a registry is given, non-function step types must resolve to a
/// registered tool.
pub fn parse_workflow_str(
    raw: &str,
    registry: Option<&ToolRegistry>,
) -> Result<WorkflowDefinition, ParseError> {
    let data: toml::Table = raw.parse().map_err(|e: toml::de::Error| ParseError::Toml(e.to_string()))?;

    check_unknown_keys(&data, TOP_LEVEL_KEYS, "Workflow file")?;

    // [workflow] section (required)
    let workflow_table = data
        .get("workflow")
        .and_then(|v| v.as_table())
        .ok_or(ParseError::MissingWorkflowSection)?;
    check_unknown_keys(workflow_table, WORKFLOW_KEYS, "[workflow]")?;
    let workflow = WorkflowMeta {
        name: workflow_table
            .get("name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ParseError::Invalid("[workflow] missing name".to_string()))?
            .to_string(),
        description: workflow_table
            .get("description")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()),
    };

    // [inputs] section (optional)
    let mut inputs = BTreeMap::new();
    if let Some(inputs_table) = data.get("inputs") {
        let inputs_table = inputs_table.as_table().ok_or_else(|| {
            ParseError::Invalid("[inputs] must be a table of tables".to_string())
        })?;
        for (input_name, input_value) in inputs_table {
            let input_table = input_value.as_table().ok_or_else(|| {
                ParseError::Invalid(format!("Input {input_name} must be a table"))
            })?;
            check_unknown_keys(input_table, INPUT_KEYS, &format!("[inputs.{input_name}]"))?;
            inputs.insert(input_name.clone(), parse_input(input_name, input_table)?);
        }
    }

    // [steps.*] sections
    let mut steps = BTreeMap::new();
    if let Some(steps_table) = data.get("steps") {
        let steps_table = steps_table
            .as_table()
            .ok_or_else(|| ParseError::Invalid("[steps] must be a table of tables".to_string()))?;
        for (step_name, step_value) in steps_table {
            let step_table = step_value.as_table().ok_or_else(|| {
                ParseError::Invalid(format!("Step {step_name} must be a table"))
            })?;
            check_unknown_keys(step_table, STEP_KEYS, &format!("[steps.{step_name}]"))?;
            steps.insert(step_name.clone(), parse_step(step_name, step_table, registry)?);
        }
    }

    // All depends_on targets must exist.
    for (step_name, step) in &steps {
        for dep in &step.depends_on {
            if !steps.contains_key(dep) {
                return Err(ParseError::UnknownDependsOn {
                    step: step_name.clone(),
                    dep: dep.clone(),
                });
            }
        }
    }

    // No cycles.
    if let Some(cycle) = detect_cycle(&steps) {
        return Err(ParseError::CircularDependency { cycle });
    }

    Ok(WorkflowDefinition {
        workflow,
        inputs,
        steps,
    })
}

fn parse_input(name: &str, table: &toml::Table) -> Result<InputDef, ParseError> {
    let type_str = table
        .get("type")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ParseError::Invalid(format!("Input {name} missing type")))?;
    let input_type: InputType = type_str
        .parse()
        .map_err(|e: String| ParseError::Invalid(format!("Input {name}: {e}")))?;

    let required = table
        .get("required")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let default = match table.get("default") {
        Some(value) => {
            if !input_type.matches(value) {
                return Err(ParseError::DefaultTypeMismatch {
                    input: name.to_string(),
                    default: value.to_string(),
                    input_type: type_str.to_string(),
                });
            }
            Some(toml_to_json(value))
        }
        None => None,
    };

    Ok(InputDef {
        input_type,
        required,
        default,
    })
}

fn parse_step(
    name: &str,
    table: &toml::Table,
    registry: Option<&ToolRegistry>,
) -> Result<StepDef, ParseError> {
    let step_type = table
        .get("type")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ParseError::MissingStepType {
            step: name.to_string(),
        })?;

    if !VALID_STEP_TYPES.contains(&step_type) {
        return Err(ParseError::UnknownStepType {
            step: name.to_string(),
            step_type: step_type.to_string(),
        });
    }

    let function = table
        .get("function")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    if step_type == "function" {
        if function.is_none() {
            return Err(ParseError::MissingFunctionName {
                step: name.to_string(),
            });
        }
    } else if let Some(registry) = registry {
        let resolved = resolve_step_type(step_type);
        if !registry.is_empty() && !registry.contains(resolved) {
            return Err(ParseError::UnknownStepType {
                step: name.to_string(),
                step_type: step_type.to_string(),
            });
        }
    }

    let depends_on = table
        .get("depends_on")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect()
        })
        .unwrap_or_default();

    let config = table
        .get("config")
        .map(toml_to_json)
        .unwrap_or_else(|| serde_json::json!({}));

    let continue_on_error = table
        .get("continue_on_error")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    Ok(StepDef {
        step_type: resolve_step_type(step_type).to_string(),
        depends_on,
        config,
        function,
        continue_on_error,
    })
}

fn check_unknown_keys(
    table: &toml::Table,
    valid: &[&str],
    location: &str,
) -> Result<(), ParseError> {
    for key in table.keys() {
        if !valid.contains(&key.as_str()) {
            return Err(ParseError::UnknownKey {
                location: location.to_string(),
                key: key.clone(),
            });
        }
    }
    Ok(())
}

/// Three-color DFS cycle detection. Iteration order is sorted so the
/// reported cycle is deterministic.
pub(crate) fn detect_cycle(steps: &BTreeMap<String, StepDef>) -> Option<Vec<String>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Color {
        White,
        Gray,
        Black,
    }

    let mut color: BTreeMap<&str, Color> =
        steps.keys().map(|name| (name.as_str(), Color::White)).collect();

    fn visit<'a>(
        node: &'a str,
        steps: &'a BTreeMap<String, StepDef>,
        color: &mut BTreeMap<&'a str, Color>,
        path: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        color.insert(node, Color::Gray);
        path.push(node);

        if let Some(step) = steps.get(node) {
            for dep in &step.depends_on {
                let Some(&dep_color) = color.get(dep.as_str()) else {
                    // Missing dependency is reported elsewhere.
                    continue;
                };
                match dep_color {
                    Color::Gray => {
                        // Cycle: path from dep to here, plus the repeated node.
                        let start = path.iter().position(|n| *n == dep.as_str()).unwrap_or(0);
                        let mut cycle: Vec<String> =
                            path[start..].iter().map(|s| s.to_string()).collect();
                        cycle.push(dep.clone());
                        return Some(cycle);
                    }
                    Color::White => {
                        if let Some(cycle) = visit(dep.as_str(), steps, color, path) {
                            return Some(cycle);
                        }
                    }
                    Color::Black => {}
                }
            }
        }

        path.pop();
        color.insert(node, Color::Black);
        None
    }

    // BTreeMap iterates sorted, so detection is deterministic.
    let names: Vec<&str> = steps.keys().map(|s| s.as_str()).collect();
    for node in names {
        if color[node] == Color::White {
            let mut path = vec![];
            if let Some(cycle) = visit(node, steps, &mut color, &mut path) {
                return Some(cycle);
            }
        }
    }
    None
}

fn toml_to_json(value: &toml::Value) -> serde_json::Value {
    match value {
        toml::Value::String(s) => serde_json::Value::String(s.clone()),
        toml::Value::Integer(i) => serde_json::Value::from(*i),
        toml::Value::Float(f) => serde_json::Value::from(*f),
        toml::Value::Boolean(b) => serde_json::Value::Bool(*b),
        toml::Value::Datetime(dt) => serde_json::Value::String(dt.to_string()),
        toml::Value::Array(arr) => {
            serde_json::Value::Array(arr.iter().map(toml_to_json).collect())
        }
        toml::Value::Table(table) => serde_json::Value::Object(
            table
                .iter()
                .map(|(k, v)| (k.clone(), toml_to_json(v)))
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"
[workflow]
name = "test-ingest"
description = "Fetch and index"

[inputs.url]
type = "string"
required = true

[inputs.limit]
type = "int"
default = 100

[steps.discover]
type = "map"
config = { source = "sitemap" }

[steps.fetch]
type = "fetch"
depends_on = ["discover"]

[steps.extract]
type = "llm"
depends_on = ["fetch"]
continue_on_error = true
"#;

    #[test]
    fn parses_valid_workflow() {
        let def = parse_workflow_str(VALID, None).unwrap();
        assert_eq!(def.workflow.name, "test-ingest");
        assert_eq!(def.inputs.len(), 2);
        assert!(def.inputs["url"].required);
        assert_eq!(def.inputs["limit"].default, Some(serde_json::json!(100)));
        assert_eq!(def.steps.len(), 3);
        assert_eq!(def.steps["fetch"].depends_on, vec!["discover"]);
        assert!(def.steps["extract"].continue_on_error);
    }

    #[test]
    fn alias_resolution() {
        let def = parse_workflow_str(VALID, None).unwrap();
        assert_eq!(def.steps["extract"].step_type, "batch-llm");
        assert_eq!(resolve_step_type("embed"), "batch-embedding");
        assert_eq!(resolve_step_type("fetch"), "fetch");
    }

    #[test]
    fn missing_workflow_section() {
        let err = parse_workflow_str("[steps.a]\ntype = \"map\"\n", None).unwrap_err();
        assert!(matches!(err, ParseError::MissingWorkflowSection));
    }

    #[test]
    fn unknown_top_level_key() {
        let raw = "[workflow]\nname = \"x\"\n[bogus]\nkey = 1\n";
        let err = parse_workflow_str(raw, None).unwrap_err();
        assert!(matches!(err, ParseError::UnknownKey { .. }));
    }

    #[test]
    fn unknown_step_key() {
        let raw = "[workflow]\nname = \"x\"\n[steps.a]\ntype = \"map\"\nbogus = 1\n";
        let err = parse_workflow_str(raw, None).unwrap_err();
        match err {
            ParseError::UnknownKey { location, key } => {
                assert_eq!(location, "[steps.a]");
                assert_eq!(key, "bogus");
            }
            other => panic!("unexpected: {other}"),
        }
    }

    #[test]
    fn unknown_step_type() {
        let raw = "[workflow]\nname = \"x\"\n[steps.a]\ntype = \"teleport\"\n";
        let err = parse_workflow_str(raw, None).unwrap_err();
        assert!(matches!(err, ParseError::UnknownStepType { .. }));
    }

    #[test]
    fn unknown_depends_on() {
        let raw = "[workflow]\nname = \"x\"\n[steps.a]\ntype = \"map\"\ndepends_on = [\"ghost\"]\n";
        let err = parse_workflow_str(raw, None).unwrap_err();
        match err {
            ParseError::UnknownDependsOn { step, dep } => {
                assert_eq!(step, "a");
                assert_eq!(dep, "ghost");
            }
            other => panic!("unexpected: {other}"),
        }
    }

    #[test]
    fn cycle_detected_with_full_path() {
        let raw = r#"
[workflow]
name = "x"
[steps.a]
type = "map"
depends_on = ["c"]
[steps.b]
type = "map"
depends_on = ["a"]
[steps.c]
type = "map"
depends_on = ["b"]
"#;
        let err = parse_workflow_str(raw, None).unwrap_err();
        match err {
            ParseError::CircularDependency { cycle } => {
                // The cycle names every participant and repeats the entry node.
                assert_eq!(cycle.first(), cycle.last());
                assert_eq!(cycle.len(), 4);
                for name in ["a", "b", "c"] {
                    assert!(cycle.contains(&name.to_string()));
                }
            }
            other => panic!("unexpected: {other}"),
        }
    }

    #[test]
    fn default_type_mismatch() {
        let raw = "[workflow]\nname = \"x\"\n[inputs.n]\ntype = \"int\"\ndefault = \"nope\"\n";
        let err = parse_workflow_str(raw, None).unwrap_err();
        assert!(matches!(err, ParseError::DefaultTypeMismatch { .. }));
    }

    #[test]
    fn int_default_accepted_for_float() {
        let raw = "[workflow]\nname = \"x\"\n[inputs.t]\ntype = \"float\"\ndefault = 3\n";
        let def = parse_workflow_str(raw, None).unwrap();
        assert_eq!(def.inputs["t"].default, Some(serde_json::json!(3)));
    }

    #[test]
    fn function_step_requires_function_key() {
        let raw = "[workflow]\nname = \"x\"\n[steps.a]\ntype = \"function\"\n";
        let err = parse_workflow_str(raw, None).unwrap_err();
        assert!(matches!(err, ParseError::MissingFunctionName { .. }));

        let raw = "[workflow]\nname = \"x\"\n[steps.a]\ntype = \"function\"\nfunction = \"my_fn\"\n";
        let def = parse_workflow_str(raw, None).unwrap();
        assert_eq!(def.steps["a"].function.as_deref(), Some("my_fn"));
    }

    #[test]
    fn input_coercion() {
        assert_eq!(InputType::Int.coerce("42").unwrap(), serde_json::json!(42));
        assert_eq!(InputType::Bool.coerce("true").unwrap(), serde_json::json!(true));
        assert_eq!(InputType::Float.coerce("2.5").unwrap(), serde_json::json!(2.5));
        assert!(InputType::Int.coerce("abc").is_err());
    }
}
