//! Pipeline configuration
//!
//! Loaded from TOML (or JSON, by extension) and validated once at startup.
//!
//! ```toml
//! stages = ["assertions", "materialize", "conformance", "storage:archive", "storage:default"]
//! default_backend = "default"
//! assertion_parallelism = 4
//!
//! [[backends]]
//! id = "archive"
//! claim_predicate = "http://example.org/archived"
//!
//! [[backends]]
//! id = "default"
//! ```

use crate::assertions::DEFAULT_ASSERTION_PARALLELISM;
use crate::error::{ChangeError, Result};
use crate::materialize::{DEFAULT_MAX_TEMPLATE_RESULTS, DEFAULT_REFERENCE_BATCH_SIZE};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Id of the backend created when none are configured
pub const DEFAULT_BACKEND_ID: &str = "default";

const STORAGE_PREFIX: &str = "storage:";

/// Identifier of one pipeline stage
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum StageId {
    Assertions,
    Materialize,
    Conformance,
    /// `storage:<backend-id>`
    Storage(String),
}

impl StageId {
    pub fn storage(backend_id: impl Into<String>) -> Self {
        StageId::Storage(backend_id.into())
    }

    pub fn is_storage(&self) -> bool {
        matches!(self, StageId::Storage(_))
    }
}

impl FromStr for StageId {
    type Err = ChangeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "assertions" => Ok(StageId::Assertions),
            "materialize" => Ok(StageId::Materialize),
            "conformance" => Ok(StageId::Conformance),
            other => match other.strip_prefix(STORAGE_PREFIX) {
                Some(id) if !id.is_empty() => Ok(StageId::Storage(id.to_string())),
                _ => Err(ChangeError::config(format!("unknown stage '{other}'"))),
            },
        }
    }
}

impl TryFrom<String> for StageId {
    type Error = ChangeError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<StageId> for String {
    fn from(id: StageId) -> Self {
        id.to_string()
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageId::Assertions => f.write_str("assertions"),
            StageId::Materialize => f.write_str("materialize"),
            StageId::Conformance => f.write_str("conformance"),
            StageId::Storage(id) => write!(f, "{STORAGE_PREFIX}{id}"),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Memory,
}

/// One configured storage backend
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendConfig {
    pub id: String,
    #[serde(default)]
    pub kind: BackendKind,
    /// Marker predicate IRI; absent means the backend claims everything
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim_predicate: Option<String>,
}

impl BackendConfig {
    pub fn memory(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: BackendKind::Memory,
            claim_predicate: None,
        }
    }

    pub fn with_claim_predicate(mut self, predicate: impl Into<String>) -> Self {
        self.claim_predicate = Some(predicate.into());
        self
    }

    pub fn claims_all(&self) -> bool {
        self.claim_predicate.is_none()
    }
}

/// Top-level pipeline configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Stage order; empty means the default order
    pub stages: Vec<StageId>,
    pub default_backend: Option<String>,
    pub assertion_parallelism: usize,
    pub reference_batch_size: usize,
    pub max_template_results: usize,
    pub record_preprocessed: bool,
    pub allow_partial_coverage: bool,
    pub backends: Vec<BackendConfig>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stages: Vec::new(),
            default_backend: None,
            assertion_parallelism: DEFAULT_ASSERTION_PARALLELISM,
            reference_batch_size: DEFAULT_REFERENCE_BATCH_SIZE,
            max_template_results: DEFAULT_MAX_TEMPLATE_RESULTS,
            record_preprocessed: false,
            allow_partial_coverage: false,
            backends: vec![BackendConfig::memory(DEFAULT_BACKEND_ID)],
        }
    }
}

impl PipelineConfig {
    /// Parse a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| ChangeError::config(e.to_string()))
    }

    /// Load a config file: `.json` as JSON, everything else as TOML
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ChangeError::config(format!("failed to read {}: {e}", path.display()))
        })?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let parsed = if is_json {
            serde_json::from_str(&content).map_err(|e| e.to_string())
        } else {
            toml::from_str(&content).map_err(|e| e.to_string())
        };
        parsed.map_err(|detail| {
            ChangeError::config(format!("failed to parse {}: {detail}", path.display()))
        })
    }

    /// Configured stages, or the default order when none are listed
    pub fn resolved_stages(&self) -> Vec<StageId> {
        if !self.stages.is_empty() {
            return self.stages.clone();
        }
        let mut stages = vec![
            StageId::Assertions,
            StageId::Materialize,
            StageId::Conformance,
        ];
        stages.extend(self.backends.iter().map(|b| StageId::storage(&b.id)));
        stages
    }

    pub fn backend(&self, id: &str) -> Option<&BackendConfig> {
        self.backends.iter().find(|b| b.id == id)
    }

    /// The configured default backend, or the first backend
    pub fn default_backend_id(&self) -> Result<&str> {
        match &self.default_backend {
            Some(id) => self
                .backend(id)
                .map(|b| b.id.as_str())
                .ok_or_else(|| ChangeError::config(format!("unknown default backend '{id}'"))),
            None => self
                .backends
                .first()
                .map(|b| b.id.as_str())
                .ok_or_else(|| ChangeError::config("no storage backend configured")),
        }
    }

    /// Reject configurations the pipeline cannot run safely
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("assertion_parallelism", self.assertion_parallelism),
            ("reference_batch_size", self.reference_batch_size),
            ("max_template_results", self.max_template_results),
        ] {
            if value == 0 {
                return Err(ChangeError::config(format!("{name} must be at least 1")));
            }
        }

        let mut backend_ids = FxHashSet::default();
        for backend in &self.backends {
            if backend.id.is_empty() {
                return Err(ChangeError::config("backend id must not be empty"));
            }
            if !backend_ids.insert(backend.id.as_str()) {
                return Err(ChangeError::config(format!(
                    "duplicate backend '{}'",
                    backend.id
                )));
            }
        }
        self.default_backend_id()?;

        let stages = self.resolved_stages();
        let mut seen = FxHashSet::default();
        let mut storage_seen = false;
        for stage in &stages {
            if !seen.insert(stage) {
                return Err(ChangeError::config(format!("duplicate stage '{stage}'")));
            }
            match stage {
                StageId::Storage(id) => {
                    if !backend_ids.contains(id.as_str()) {
                        return Err(ChangeError::config(format!(
                            "stage '{stage}' names an unknown backend"
                        )));
                    }
                    storage_seen = true;
                }
                _ if storage_seen => {
                    return Err(ChangeError::config(format!(
                        "stage '{stage}' must run before every storage stage"
                    )));
                }
                _ => {}
            }
        }

        if !self.allow_partial_coverage {
            let last_storage = stages.iter().rev().find_map(|s| match s {
                StageId::Storage(id) => self.backend(id),
                _ => None,
            });
            match last_storage {
                Some(backend) if backend.claims_all() => {}
                Some(backend) => {
                    return Err(ChangeError::config(format!(
                        "last storage stage '{}' does not claim every record; \
                         add a catch-all backend or set allow_partial_coverage",
                        backend.id
                    )))
                }
                None => {
                    return Err(ChangeError::config(
                        "no storage stage configured; set allow_partial_coverage to run without one",
                    ))
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = PipelineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.default_backend_id().unwrap(), DEFAULT_BACKEND_ID);
        assert_eq!(
            config.resolved_stages(),
            vec![
                StageId::Assertions,
                StageId::Materialize,
                StageId::Conformance,
                StageId::storage("default"),
            ]
        );
    }

    #[test]
    fn test_parse_toml() {
        let config = PipelineConfig::from_toml_str(
            r#"
            stages = ["assertions", "materialize", "storage:archive", "storage:main"]
            default_backend = "main"
            reference_batch_size = 10
            record_preprocessed = true

            [[backends]]
            id = "archive"
            claim_predicate = "http://example.org/archived"

            [[backends]]
            id = "main"
            kind = "memory"
            "#,
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.stages[2], StageId::storage("archive"));
        assert_eq!(config.reference_batch_size, 10);
        assert_eq!(config.assertion_parallelism, DEFAULT_ASSERTION_PARALLELISM);
        assert_eq!(config.default_backend_id().unwrap(), "main");
        assert!(!config.backends[0].claims_all());
    }

    #[test]
    fn test_empty_toml_is_default() {
        assert_eq!(
            PipelineConfig::from_toml_str("").unwrap(),
            PipelineConfig::default()
        );
    }

    #[test]
    fn test_unknown_stage_rejected_at_parse() {
        let err = PipelineConfig::from_toml_str(r#"stages = ["shacl"]"#).unwrap_err();
        assert!(err.to_string().contains("unknown stage 'shacl'"));
    }

    fn invalid(config: PipelineConfig) -> String {
        config.validate().unwrap_err().to_string()
    }

    #[test]
    fn test_validation_rules() {
        let base = PipelineConfig::default();

        let mut c = base.clone();
        c.backends.clear();
        assert!(invalid(c).contains("no storage backend"));

        let mut c = base.clone();
        c.default_backend = Some("nope".into());
        assert!(invalid(c).contains("unknown default backend"));

        let mut c = base.clone();
        c.stages = vec![StageId::storage("nope")];
        assert!(invalid(c).contains("unknown backend"));

        let mut c = base.clone();
        c.stages = vec![StageId::Assertions, StageId::Assertions];
        assert!(invalid(c).contains("duplicate stage"));

        let mut c = base.clone();
        c.stages = vec![StageId::storage("default"), StageId::Conformance];
        assert!(invalid(c).contains("must run before"));

        let mut c = base.clone();
        c.reference_batch_size = 0;
        assert!(invalid(c).contains("reference_batch_size"));

        let mut c = base.clone();
        c.backends.push(BackendConfig::memory("default"));
        assert!(invalid(c).contains("duplicate backend"));
    }

    #[test]
    fn test_coverage_rules() {
        let mut c = PipelineConfig::default();
        c.backends = vec![
            BackendConfig::memory("main"),
            BackendConfig::memory("archive").with_claim_predicate("http://e.org/archived"),
        ];
        assert!(invalid(c.clone()).contains("does not claim every record"));

        c.allow_partial_coverage = true;
        c.validate().unwrap();

        let mut c = PipelineConfig::default();
        c.stages = vec![StageId::Assertions, StageId::Materialize];
        assert!(invalid(c.clone()).contains("no storage stage"));
        c.allow_partial_coverage = true;
        c.validate().unwrap();
    }

    #[test]
    fn test_stage_id_round_trip() {
        for s in ["assertions", "materialize", "conformance", "storage:x"] {
            assert_eq!(s.parse::<StageId>().unwrap().to_string(), s);
        }
        assert!("storage:".parse::<StageId>().is_err());
    }
}
