//! Descriptive metadata for targets and the per-run metadata record.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::HarnessError;

/// Implementation language of a target service.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    Go,
    Javascript,
    Rust,
}

/// API specification family the target publishes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpecificationKind {
    OpenApi,
}

/// How the target's schema came to be.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaSourceKind {
    /// Manually written without automated tooling.
    Static,
    /// Fully generated by a tool.
    Generated,
    /// Partially generated, partially hand-written.
    Mixed,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Package {
    pub name: String,
    pub version: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Specification {
    pub kind: SpecificationKind,
    pub version: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SchemaSource {
    pub kind: SchemaSourceKind,
    pub library: Option<Package>,
}

/// Metadata about a target.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TargetMetadata {
    pub language: Language,
    pub framework: Option<Package>,
    pub schema_source: SchemaSource,
    /// Whether the schema is used to validate input automatically.
    pub validation_from_schema: bool,
    pub specification: Specification,
}

/// Record written next to the harvested artifacts once a run completes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunMetadata {
    pub fuzzer: String,
    pub target: String,
    pub run_id: String,
    /// Fuzzing duration in seconds.
    pub duration: f64,
}

impl RunMetadata {
    /// Persist the record as `metadata.json` in `output_dir`.
    pub fn store(&self, output_dir: &Path) -> Result<(), HarnessError> {
        let file = std::fs::File::create(output_dir.join("metadata.json"))?;
        serde_json::to_writer(file, self).map_err(std::io::Error::from)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_metadata_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let metadata = RunMetadata {
            fuzzer: "schemathesis:Default".to_string(),
            target: "httpbin".to_string(),
            run_id: "1628183853".to_string(),
            duration: 42.5,
        };
        metadata.store(dir.path()).unwrap();
        let raw = std::fs::read_to_string(dir.path().join("metadata.json")).unwrap();
        let loaded: RunMetadata = serde_json::from_str(&raw).unwrap();
        assert_eq!(loaded.run_id, "1628183853");
        assert_eq!(loaded.duration, 42.5);
    }
}
