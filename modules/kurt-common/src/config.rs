use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::KurtError;

/// Project configuration, loaded from a TOML file at the project root.
///
/// Known sections land in typed fields; everything else is flattened into
/// `overlay` as `SECTION.KEY` entries so integrations can self-register
/// without the core knowing their keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KurtConfig {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub indexing: ModelSection,
    #[serde(default)]
    pub answer: ModelSection,
    #[serde(default)]
    pub fetch: FetchSection,
    #[serde(skip)]
    overlay: BTreeMap<String, toml::Value>,
    #[serde(skip)]
    project_root: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub sources_dir: String,
    pub projects_dir: String,
    pub rules_dir: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            sources_dir: "sources".to_string(),
            projects_dir: "projects".to_string(),
            rules_dir: "rules".to_string(),
        }
    }
}

/// Model identifiers for an LLM-using module, with per-step overrides held
/// in the overlay (`MODULE.STEP.KEY`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelSection {
    pub llm_model: Option<String>,
    pub embedding_model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchSection {
    pub default_engine: String,
    pub batch_size: Option<usize>,
    pub concurrency: usize,
}

impl Default for FetchSection {
    fn default() -> Self {
        Self {
            default_engine: "trafilatura".to_string(),
            batch_size: None,
            concurrency: 5,
        }
    }
}

impl Default for KurtConfig {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            indexing: ModelSection::default(),
            answer: ModelSection::default(),
            fetch: FetchSection::default(),
            overlay: BTreeMap::new(),
            project_root: PathBuf::from("."),
        }
    }
}

impl KurtConfig {
    /// Load from a TOML file. Unknown sections and keys are kept in the
    /// overlay rather than rejected.
    pub fn load(path: &Path) -> Result<Self, KurtError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| KurtError::Config(format!("cannot read {}: {e}", path.display())))?;
        let mut config = Self::from_toml_str(&raw)?;
        config.project_root = path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, KurtError> {
        let value: toml::Value = raw
            .parse()
            .map_err(|e| KurtError::Config(format!("invalid TOML: {e}")))?;

        let mut config: KurtConfig = value
            .clone()
            .try_into()
            .map_err(|e| KurtError::Config(format!("invalid config: {e}")))?;

        // Flatten every section into SECTION.KEY overlay entries. Typed fields
        // above are a convenience view; the overlay is the complete picture.
        if let toml::Value::Table(table) = value {
            flatten_into(&mut config.overlay, &table, "");
        }
        Ok(config)
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn sources_path(&self) -> PathBuf {
        self.project_root.join(&self.paths.sources_dir)
    }

    pub fn projects_path(&self) -> PathBuf {
        self.project_root.join(&self.paths.projects_dir)
    }

    pub fn rules_path(&self) -> PathBuf {
        self.project_root.join(&self.paths.rules_dir)
    }

    /// Raw overlay lookup by dotted key (`RESEARCH.TAVILY_API_KEY`).
    /// Keys are case-insensitive.
    pub fn get(&self, key: &str) -> Option<&toml::Value> {
        self.overlay.get(&key.to_uppercase())
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(|v| v.as_str())
    }

    /// A credential from the config. Placeholder values (`YOUR_*`) count as
    /// unconfigured.
    pub fn credential(&self, key: &str) -> Result<String, KurtError> {
        match self.get_str(key) {
            Some(value) if value.starts_with("YOUR_") => Err(KurtError::Config(format!(
                "{key} is a placeholder; set a real credential"
            ))),
            Some(value) if !value.is_empty() => Ok(value.to_string()),
            _ => Err(KurtError::Config(format!("{key} is not configured"))),
        }
    }

    /// Resolve a model setting with hierarchical fallback:
    /// `MODULE.STEP.KEY` > `MODULE.KEY` > `KEY` > `default`.
    pub fn resolve_model_setting(
        &self,
        module: &str,
        step: Option<&str>,
        key: &str,
        default: &str,
    ) -> String {
        let module = module.to_uppercase();
        let key = key.to_uppercase();
        if let Some(step) = step {
            let step_key = format!("{module}.{}.{key}", step.to_uppercase());
            if let Some(value) = self.get_str(&step_key) {
                return value.to_string();
            }
        }
        if let Some(value) = self.get_str(&format!("{module}.{key}")) {
            return value.to_string();
        }
        if let Some(value) = self.get_str(&key) {
            return value.to_string();
        }
        default.to_string()
    }
}

fn flatten_into(out: &mut BTreeMap<String, toml::Value>, table: &toml::Table, prefix: &str) {
    for (key, value) in table {
        let flat_key = if prefix.is_empty() {
            key.to_uppercase()
        } else {
            format!("{prefix}.{}", key.to_uppercase())
        };
        match value {
            toml::Value::Table(inner) => flatten_into(out, inner, &flat_key),
            other => {
                out.insert(flat_key, other.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[paths]
sources_dir = "sources"
projects_dir = "projects"
rules_dir = "rules"

[indexing]
llm_model = "gpt-4o-mini"
embedding_model = "text-embedding-3-small"

[indexing.section_extractions]
llm_model = "gpt-4o"

[fetch]
default_engine = "tavily"
concurrency = 5

[research]
tavily_api_key = "tvly-abc123"

[cms]
sanity_api_key = "YOUR_SANITY_API_KEY"
"#;

    #[test]
    fn known_sections_are_typed() {
        let config = KurtConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.fetch.default_engine, "tavily");
        assert_eq!(config.fetch.concurrency, 5);
        assert_eq!(config.indexing.llm_model.as_deref(), Some("gpt-4o-mini"));
    }

    #[test]
    fn unknown_sections_pass_through() {
        let config = KurtConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.get_str("RESEARCH.TAVILY_API_KEY"), Some("tvly-abc123"));
    }

    #[test]
    fn placeholder_credentials_rejected() {
        let config = KurtConfig::from_toml_str(SAMPLE).unwrap();
        assert!(config.credential("RESEARCH.TAVILY_API_KEY").is_ok());
        assert!(matches!(
            config.credential("CMS.SANITY_API_KEY"),
            Err(KurtError::Config(_))
        ));
        assert!(matches!(
            config.credential("CMS.MISSING_KEY"),
            Err(KurtError::Config(_))
        ));
    }

    #[test]
    fn model_resolution_order() {
        let config = KurtConfig::from_toml_str(SAMPLE).unwrap();
        // Step-specific wins.
        assert_eq!(
            config.resolve_model_setting("indexing", Some("section_extractions"), "llm_model", "d"),
            "gpt-4o"
        );
        // Module-level for steps without overrides.
        assert_eq!(
            config.resolve_model_setting("indexing", Some("claim_clustering"), "llm_model", "d"),
            "gpt-4o-mini"
        );
        // Built-in default when nothing matches.
        assert_eq!(config.resolve_model_setting("answer", None, "llm_model", "d"), "d");
    }

    #[test]
    fn missing_sections_default() {
        let config = KurtConfig::from_toml_str("[paths]\nsources_dir = \"s\"\nprojects_dir = \"p\"\nrules_dir = \"r\"\n").unwrap();
        assert_eq!(config.fetch.default_engine, "trafilatura");
        assert_eq!(config.fetch.concurrency, 5);
    }
}
