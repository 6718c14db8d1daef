//! Uniform evidence model for everything a run leaves behind.
//!
//! Both lifecycles reduce their output to a sequence of [`Artifact`]
//! values; how an artifact is persisted depends solely on its tag, never
//! on which side produced it.

use std::io;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::info;

use crate::errors::HarnessError;

/// File name used for captured raw output.
pub const STDOUT_FILENAME: &str = "stdout.txt";

/// Directory name used for persisted telemetry events.
pub const SENTRY_EVENTS_DIRNAME: &str = "sentry_events";

/// One piece of evidence collected from a run.
#[derive(Clone, Debug)]
pub enum Artifact {
    /// Raw captured output of a one-off command or service logs.
    Stdout(Vec<u8>),
    /// A file or directory to copy into the output tree.
    LogFile(PathBuf),
    /// A structured event fetched from the telemetry backend.
    SentryEvent(Value),
}

impl Artifact {
    pub fn stdout(value: Vec<u8>) -> Self {
        Artifact::Stdout(value)
    }

    pub fn log_file(value: PathBuf) -> Self {
        Artifact::LogFile(value)
    }

    pub fn sentry_event(value: Value) -> Self {
        Artifact::SentryEvent(value)
    }

    /// Persist this artifact under `output_dir`.
    ///
    /// Raw output goes verbatim to a fixed file name; log files and
    /// directories are copied in, merging with whatever is already
    /// there; events are written one file per event id.
    pub fn save_to(&self, output_dir: &Path) -> Result<(), HarnessError> {
        std::fs::create_dir_all(output_dir)?;
        match self {
            Artifact::Stdout(value) => {
                std::fs::write(output_dir.join(STDOUT_FILENAME), value)?;
            }
            Artifact::LogFile(path) => {
                copy_into(path, output_dir)?;
            }
            Artifact::SentryEvent(value) => {
                let directory = output_dir.join(SENTRY_EVENTS_DIRNAME);
                std::fs::create_dir_all(&directory)?;
                let path = match value.get("id").and_then(Value::as_str) {
                    Some(id) => directory.join(format!("{id}.json")),
                    None => unnamed_event_path(&directory),
                };
                let file = std::fs::File::create(path)?;
                serde_json::to_writer(file, value).map_err(io::Error::from)?;
            }
        }
        Ok(())
    }
}

/// Persist a collected artifact sequence into `output_dir`.
pub fn persist(artifacts: &[Artifact], output_dir: &Path) -> Result<(), HarnessError> {
    for artifact in artifacts {
        artifact.save_to(output_dir)?;
    }
    info!(
        output_dir = %output_dir.display(),
        artifacts = artifacts.len(),
        "Persisted artifacts"
    );
    Ok(())
}

/// First free `event-<n>.json` name, so events without an id never
/// overwrite each other.
fn unnamed_event_path(directory: &Path) -> PathBuf {
    let mut index = 0;
    loop {
        let candidate = directory.join(format!("event-{index}.json"));
        if !candidate.exists() {
            return candidate;
        }
        index += 1;
    }
}

/// Copy a file or directory into `destination`, recursively merging
/// directories rather than overwriting them.
fn copy_into(source: &Path, destination: &Path) -> io::Result<()> {
    let name = match source.file_name() {
        Some(name) => name,
        None => return Ok(()),
    };
    let target = destination.join(name);
    if source.is_dir() {
        copy_tree(source, &target)
    } else {
        std::fs::copy(source, &target).map(|_| ())
    }
}

fn copy_tree(source: &Path, destination: &Path) -> io::Result<()> {
    std::fs::create_dir_all(destination)?;
    for entry in std::fs::read_dir(source)? {
        let entry = entry?;
        let target = destination.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_tree(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stdout_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let content = b"== fuzzing finished ==\n".to_vec();
        Artifact::stdout(content.clone()).save_to(dir.path()).unwrap();
        let saved = std::fs::read(dir.path().join(STDOUT_FILENAME)).unwrap();
        assert_eq!(saved, content);
    }

    #[test]
    fn test_log_file_copy() {
        let source = tempfile::tempdir().unwrap();
        let destination = tempfile::tempdir().unwrap();
        let path = source.path().join("out.jsonl");
        std::fs::write(&path, "{}\n").unwrap();
        Artifact::log_file(path).save_to(destination.path()).unwrap();
        assert!(destination.path().join("out.jsonl").is_file());
    }

    #[test]
    fn test_directory_copy_merges() {
        let source = tempfile::tempdir().unwrap();
        let destination = tempfile::tempdir().unwrap();
        let logs = source.path().join("logs");
        std::fs::create_dir_all(logs.join("nested")).unwrap();
        std::fs::write(logs.join("nested").join("a.log"), "a").unwrap();
        // Pre-existing content with the same directory name must survive
        let existing = destination.path().join("logs");
        std::fs::create_dir_all(&existing).unwrap();
        std::fs::write(existing.join("b.log"), "b").unwrap();

        Artifact::log_file(logs).save_to(destination.path()).unwrap();

        assert!(destination.path().join("logs/nested/a.log").is_file());
        assert!(destination.path().join("logs/b.log").is_file());
    }

    #[test]
    fn test_sentry_events_without_id_are_all_kept() {
        let dir = tempfile::tempdir().unwrap();
        for exception in ["first", "second"] {
            Artifact::sentry_event(serde_json::json!({"exception": exception}))
                .save_to(dir.path())
                .unwrap();
        }
        let events = dir.path().join(SENTRY_EVENTS_DIRNAME);
        for (file, exception) in [("event-0.json", "first"), ("event-1.json", "second")] {
            let raw = std::fs::read_to_string(events.join(file)).unwrap();
            let value: Value = serde_json::from_str(&raw).unwrap();
            assert_eq!(value["exception"], exception);
        }
    }

    #[test]
    fn test_sentry_event_written_by_id() {
        let dir = tempfile::tempdir().unwrap();
        let event = serde_json::json!({"id": "abc123", "tags": []});
        Artifact::sentry_event(event).save_to(dir.path()).unwrap();
        let path = dir.path().join(SENTRY_EVENTS_DIRNAME).join("abc123.json");
        let value: Value = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(value["id"], "abc123");
    }
}
