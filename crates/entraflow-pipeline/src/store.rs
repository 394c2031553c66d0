//! Durable run snapshots.
//!
//! [`FileStateStore`] lays snapshots out as
//! `{dir}/{workflow_name}/{run_id}.json`. Each save writes a `.tmp` sibling,
//! syncs it, and renames it over the target, so a failed save never leaves a
//! half-written snapshot in place of a good one.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{PipelineError, Result};
use crate::state::RunState;

/// The record written for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub workflow_name: String,
    pub run_id: String,
    pub timestamp: DateTime<Utc>,
    pub state: RunState,
}

/// One entry of [`StateStore::list`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotSummary {
    pub workflow_name: String,
    pub run_id: String,
    pub timestamp: DateTime<Utc>,
    pub location: String,
}

/// Persists and retrieves run snapshots.
pub trait StateStore: Send + Sync {
    /// Store the state of a run, returning where it was written.
    fn save(&self, workflow_name: &str, run_id: &str, state: &RunState) -> Result<String>;

    /// Load a run. Without `run_id` the most recent snapshot is used.
    ///
    /// Returns `RunState::default()` when nothing matches.
    fn load(&self, workflow_name: &str, run_id: Option<&str>) -> Result<RunState>;

    /// Snapshot summaries, newest first, optionally for one workflow.
    fn list(&self, workflow_name: Option<&str>) -> Result<Vec<SnapshotSummary>>;
}

/// JSON-file snapshot store.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of a run's snapshot file.
    pub fn snapshot_path(&self, workflow_name: &str, run_id: &str) -> Result<PathBuf> {
        check_component("workflow name", workflow_name)?;
        check_component("run id", run_id)?;
        Ok(self
            .dir
            .join(workflow_name)
            .join(format!("{run_id}.json")))
    }

    fn read_snapshot(path: &Path) -> Result<RunSnapshot> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Every readable snapshot of one workflow. Unreadable files are skipped.
    fn snapshots_in(&self, workflow_name: &str) -> Result<Vec<(PathBuf, RunSnapshot)>> {
        let wf_dir = self.dir.join(workflow_name);
        if !wf_dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut snapshots = Vec::new();
        for entry in fs::read_dir(&wf_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Self::read_snapshot(&path) {
                Ok(snapshot) => snapshots.push((path, snapshot)),
                Err(e) => warn!("Skipping unreadable snapshot {}: {}", path.display(), e),
            }
        }
        Ok(snapshots)
    }

    fn workflow_dirs(&self) -> Result<Vec<String>> {
        if !self.dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir()
                && let Some(name) = entry.file_name().to_str()
            {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }
}

impl StateStore for FileStateStore {
    fn save(&self, workflow_name: &str, run_id: &str, state: &RunState) -> Result<String> {
        let path = self.snapshot_path(workflow_name, run_id)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let snapshot = RunSnapshot {
            workflow_name: workflow_name.to_string(),
            run_id: run_id.to_string(),
            timestamp: Utc::now(),
            state: state.clone(),
        };
        let json = serde_json::to_string_pretty(&snapshot)?;

        let tmp = path.with_extension("json.tmp");
        let written = (|| -> std::io::Result<()> {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
            fs::rename(&tmp, &path)
        })();
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }

        debug!("Saved snapshot {}", path.display());
        Ok(path.display().to_string())
    }

    fn load(&self, workflow_name: &str, run_id: Option<&str>) -> Result<RunState> {
        check_component("workflow name", workflow_name)?;

        match run_id {
            Some(run_id) => {
                let path = self.snapshot_path(workflow_name, run_id)?;
                if !path.exists() {
                    return Ok(RunState::default());
                }
                let snapshot = Self::read_snapshot(&path).map_err(|e| {
                    PipelineError::Persistence(format!(
                        "failed to read snapshot {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                debug!("Loaded snapshot {}", path.display());
                Ok(snapshot.state)
            }
            None => {
                let latest = self
                    .snapshots_in(workflow_name)?
                    .into_iter()
                    .max_by(|(_, a), (_, b)| {
                        a.timestamp
                            .cmp(&b.timestamp)
                            .then_with(|| a.run_id.cmp(&b.run_id))
                    });
                Ok(latest.map(|(_, s)| s.state).unwrap_or_default())
            }
        }
    }

    fn list(&self, workflow_name: Option<&str>) -> Result<Vec<SnapshotSummary>> {
        let workflows = match workflow_name {
            Some(name) => {
                check_component("workflow name", name)?;
                vec![name.to_string()]
            }
            None => self.workflow_dirs()?,
        };

        let mut summaries = Vec::new();
        for wf in workflows {
            for (path, snapshot) in self.snapshots_in(&wf)? {
                summaries.push(SnapshotSummary {
                    workflow_name: snapshot.workflow_name,
                    run_id: snapshot.run_id,
                    timestamp: snapshot.timestamp,
                    location: path.display().to_string(),
                });
            }
        }
        sort_newest_first(&mut summaries);
        Ok(summaries)
    }
}

/// In-process snapshot store.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    snapshots: Mutex<BTreeMap<(String, String), RunSnapshot>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.snapshots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.lock().is_empty()
    }
}

impl StateStore for MemoryStateStore {
    fn save(&self, workflow_name: &str, run_id: &str, state: &RunState) -> Result<String> {
        let snapshot = RunSnapshot {
            workflow_name: workflow_name.to_string(),
            run_id: run_id.to_string(),
            timestamp: Utc::now(),
            state: state.clone(),
        };
        self.snapshots
            .lock()
            .insert((workflow_name.to_string(), run_id.to_string()), snapshot);
        Ok(memory_location(workflow_name, run_id))
    }

    fn load(&self, workflow_name: &str, run_id: Option<&str>) -> Result<RunState> {
        let snapshots = self.snapshots.lock();
        let found = match run_id {
            Some(run_id) => snapshots.get(&(workflow_name.to_string(), run_id.to_string())),
            None => snapshots
                .values()
                .filter(|s| s.workflow_name == workflow_name)
                .max_by(|a, b| {
                    a.timestamp
                        .cmp(&b.timestamp)
                        .then_with(|| a.run_id.cmp(&b.run_id))
                }),
        };
        Ok(found.map(|s| s.state.clone()).unwrap_or_default())
    }

    fn list(&self, workflow_name: Option<&str>) -> Result<Vec<SnapshotSummary>> {
        let mut summaries: Vec<SnapshotSummary> = self
            .snapshots
            .lock()
            .values()
            .filter(|s| workflow_name.is_none_or(|name| s.workflow_name == name))
            .map(|s| SnapshotSummary {
                workflow_name: s.workflow_name.clone(),
                run_id: s.run_id.clone(),
                timestamp: s.timestamp,
                location: memory_location(&s.workflow_name, &s.run_id),
            })
            .collect();
        sort_newest_first(&mut summaries);
        Ok(summaries)
    }
}

fn memory_location(workflow_name: &str, run_id: &str) -> String {
    format!("memory://{workflow_name}/{run_id}")
}

fn sort_newest_first(summaries: &mut [SnapshotSummary]) {
    summaries.sort_by(|a, b| {
        b.timestamp
            .cmp(&a.timestamp)
            .then_with(|| b.run_id.cmp(&a.run_id))
    });
}

/// Reject names that would escape the store directory.
fn check_component(what: &str, value: &str) -> Result<()> {
    if value.is_empty()
        || value == "."
        || value.contains("..")
        || value.contains('/')
        || value.contains('\\')
    {
        return Err(PipelineError::Persistence(format!(
            "invalid {what}: '{value}'"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespace::Namespace;
    use crate::state::{BranchLabel, RunStatus};
    use crate::value::Value;

    fn temp_store() -> (tempfile::TempDir, FileStateStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path());
        (dir, store)
    }

    fn sample_state(run_id: &str) -> RunState {
        let mut ns = Namespace::new();
        ns.insert("location", Value::from("Berlin"));
        ns.insert("raw", Value::Blob(vec![0, 1, 255]));
        let mut state = RunState::start("daily", run_id, ns);
        state.completed.push("Fetcher".into());
        state.record_failure("Notifier", "smtp down");
        state.conditional_branch = Some(BranchLabel::HeightenedMonitoring);
        state.finish(RunStatus::Completed, None);
        state
    }

    #[test]
    fn test_save_then_load_is_identical() {
        let (_dir, store) = temp_store();
        let state = sample_state("r1");

        let location = store.save("daily", "r1", &state).unwrap();
        assert!(location.ends_with("r1.json"));

        let loaded = store.load("daily", Some("r1")).unwrap();
        assert_eq!(loaded, state);
    }

    #[test]
    fn test_non_finite_numbers_round_trip() {
        let (_dir, store) = temp_store();
        let mut ns = Namespace::new();
        ns.insert("score", Value::Number(f64::NAN));
        ns.insert("peak", Value::Number(f64::INFINITY));
        let mut state = RunState::start("daily", "r1", ns);
        state.finish(RunStatus::Completed, None);

        store.save("daily", "r1", &state).unwrap();

        let loaded = store.load("daily", Some("r1")).unwrap();
        assert!(loaded.namespace.get("score").and_then(Value::as_f64).unwrap().is_nan());
        assert_eq!(loaded.namespace.get("peak"), Some(&Value::Number(f64::INFINITY)));
        assert_eq!(store.load("daily", None).unwrap().run_id, "r1");
        assert_eq!(store.list(Some("daily")).unwrap().len(), 1);
    }

    #[test]
    fn test_load_latest() {
        let (_dir, store) = temp_store();
        store.save("daily", "r1", &sample_state("r1")).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        store.save("daily", "r2", &sample_state("r2")).unwrap();

        let latest = store.load("daily", None).unwrap();
        assert_eq!(latest.run_id, "r2");
    }

    #[test]
    fn test_missing_snapshot_returns_default() {
        let (_dir, store) = temp_store();
        assert_eq!(store.load("daily", None).unwrap(), RunState::default());
        assert_eq!(store.load("daily", Some("nope")).unwrap(), RunState::default());
    }

    #[test]
    fn test_corrupt_snapshot() {
        let (dir, store) = temp_store();
        store.save("daily", "good", &sample_state("good")).unwrap();
        fs::write(dir.path().join("daily").join("bad.json"), "{not json").unwrap();

        let err = store.load("daily", Some("bad")).unwrap_err();
        assert!(matches!(err, PipelineError::Persistence(_)));

        // Listing skips the corrupt file.
        let runs = store.list(Some("daily")).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].run_id, "good");
    }

    #[test]
    fn test_no_tmp_left_behind() {
        let (dir, store) = temp_store();
        store.save("daily", "r1", &sample_state("r1")).unwrap();
        let names: Vec<String> = fs::read_dir(dir.path().join("daily"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["r1.json"]);
    }

    #[test]
    fn test_overwrite_keeps_latest_content() {
        let (_dir, store) = temp_store();
        let mut state = sample_state("r1");
        store.save("daily", "r1", &state).unwrap();
        state.completed.push("Reporter".into());
        store.save("daily", "r1", &state).unwrap();
        assert_eq!(store.load("daily", Some("r1")).unwrap().completed.len(), 2);
    }

    #[test]
    fn test_list_newest_first_across_workflows() {
        let (_dir, store) = temp_store();
        store.save("daily", "r1", &sample_state("r1")).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        store.save("weekly", "r2", &sample_state("r2")).unwrap();

        let all = store.list(None).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].run_id, "r2");
        assert_eq!(all[0].workflow_name, "weekly");
        assert_eq!(all[1].run_id, "r1");

        assert_eq!(store.list(Some("daily")).unwrap().len(), 1);
        assert!(store.list(Some("none")).unwrap().is_empty());
    }

    #[test]
    fn test_rejects_path_traversal() {
        let (_dir, store) = temp_store();
        let state = sample_state("r1");
        assert!(store.save("../escape", "r1", &state).is_err());
        assert!(store.save("daily", "a/b", &state).is_err());
        assert!(store.load("..", None).is_err());
    }

    #[test]
    fn test_list_on_missing_dir() {
        let store = FileStateStore::new("/nonexistent/entraflow/state");
        assert!(store.list(None).unwrap().is_empty());
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryStateStore::new();
        assert!(store.is_empty());

        let state = sample_state("r1");
        let location = store.save("daily", "r1", &state).unwrap();
        assert_eq!(location, "memory://daily/r1");
        assert_eq!(store.load("daily", Some("r1")).unwrap(), state);
        assert_eq!(store.load("daily", None).unwrap(), state);
        assert_eq!(store.load("other", None).unwrap(), RunState::default());
        assert_eq!(store.list(Some("daily")).unwrap().len(), 1);
        assert_eq!(store.len(), 1);
    }
}
