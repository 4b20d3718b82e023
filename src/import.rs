use std::fmt;
use std::path::Path;

use serde_json::Value;
use tracing::{error, info, warn};

use crate::database::ForgeDb;
use crate::discover::expand_sources;
use crate::error::{ImportError, Result};
use crate::model::{parse_timestamp, timestamp_key};
use crate::normalize::normalize;

/// Classification of one candidate file after the pipeline has run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
    Loaded,
    Skipped,
    Failed,
}

impl fmt::Display for FileOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Loaded => "loaded",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Tri-count summary of a batch — the only user-visible output besides the
/// per-file log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub loaded: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl ImportSummary {
    fn record(&mut self, outcome: FileOutcome) {
        match outcome {
            FileOutcome::Loaded => self.loaded += 1,
            FileOutcome::Skipped => self.skipped += 1,
            FileOutcome::Failed => self.failed += 1,
        }
    }
}

impl fmt::Display for ImportSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Loaded: {}, Skipped: {}, Failed: {}",
            self.loaded, self.skipped, self.failed
        )
    }
}

/// Sequential per-file import pipeline: dedup gate → normalize → load.
///
/// Every file-scoped error is caught at the per-file boundary, classified,
/// and logged; the batch never stops early because one file is bad.
pub struct Importer {
    db: ForgeDb,
    default_username: Option<String>,
}

impl Importer {
    pub fn new(db: ForgeDb, default_username: Option<String>) -> Self {
        Self {
            db,
            default_username,
        }
    }

    /// Resolve the arguments into candidate files and import each one in
    /// discovery order.
    pub fn run_batch(&mut self, args: &[String]) -> ImportSummary {
        let sources = expand_sources(args);
        let mut summary = ImportSummary::default();

        for missing in &sources.missing {
            error!(path = %missing, outcome = "failed", "path not found");
            summary.failed += 1;
        }

        if sources.files.is_empty() && sources.missing.is_empty() {
            warn!("no files to process");
            return summary;
        }

        info!(count = sources.files.len(), "processing files");
        for path in &sources.files {
            summary.record(self.import_file(path));
        }

        info!(
            loaded = summary.loaded,
            skipped = summary.skipped,
            failed = summary.failed,
            "batch complete"
        );
        summary
    }

    /// Import one file, classifying every error at this boundary.
    pub fn import_file(&mut self, path: &Path) -> FileOutcome {
        match self.try_import(path) {
            Ok(outcome) => outcome,
            Err(e) if e.is_duplicate_experiment() => {
                // Lost the race against a concurrent importer; the storage
                // constraint is the authoritative guard.
                warn!(path = %path.display(), outcome = "skipped", "duplicate file skipped");
                FileOutcome::Skipped
            }
            Err(e) => {
                error!(path = %path.display(), outcome = "failed", error = %e, "import failed");
                FileOutcome::Failed
            }
        }
    }

    fn try_import(&mut self, path: &Path) -> Result<FileOutcome> {
        let path_str = path.display().to_string();
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path_str.clone());

        let text = std::fs::read_to_string(path).map_err(|e| ImportError::Io {
            file: path_str.clone(),
            source: e,
        })?;
        let value: Value = serde_json::from_str(&text).map_err(|e| ImportError::Malformed {
            file: path_str.clone(),
            source: e,
        })?;

        // Dedup gate: derive the (filename, timestamp) identity and check it
        // against storage before the normalizer does any further work.
        let ts_raw = value
            .get("timestamp")
            .and_then(Value::as_str)
            .ok_or_else(|| ImportError::missing(path_str.clone(), "timestamp"))?;
        let ts = parse_timestamp(ts_raw).ok_or_else(|| ImportError::InvalidTimestamp {
            file: path_str.clone(),
            value: ts_raw.to_string(),
        })?;
        let key = timestamp_key(&ts);
        if self.db.experiment_exists(&filename, &key)? {
            info!(path = %path_str, outcome = "skipped", "already imported");
            return Ok(FileOutcome::Skipped);
        }

        let doc = normalize(&value, &filename, self.default_username.as_deref())?;
        let experiment_id = self.db.load_experiment(&doc)?;
        info!(
            path = %path_str,
            experiment_id = %experiment_id,
            username = %doc.username,
            outcome = "loaded",
            "loaded file"
        );
        Ok(FileOutcome::Loaded)
    }

    /// Read access for summary output and tests.
    pub fn db(&self) -> &ForgeDb {
        &self.db
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use std::path::PathBuf;

    fn sample_json(episodes: i64, rounds: i64) -> Value {
        let round = |n: i64| {
            json!({
                "round": n,
                "agent_0_action": "COOPERATE",
                "agent_0_reasoning": "reciprocate",
                "agent_0_payoff": 3,
                "agent_0_episode_score": 3 * n,
                "agent_1_action": "DEFECT",
                "agent_1_reasoning": "press the advantage",
                "agent_1_payoff": 5,
                "agent_1_episode_score": 5 * n,
            })
        };
        let stats = json!({
            "episode_score": 3 * rounds,
            "cooperations": rounds,
            "cooperation_rate": 1.0,
            "reflection": "held the line"
        });
        let episode = |n: i64| {
            json!({
                "episode": n,
                "rounds": (1..=rounds).map(&round).collect::<Vec<_>>(),
                "agent_0": stats.clone(),
                "agent_1": stats.clone(),
            })
        };
        json!({
            "timestamp": "2026-01-25T14:30:00",
            "hostname": "platinum",
            "username": "dhart",
            "config": { "num_episodes": episodes, "rounds_per_episode": rounds },
            "agent_0": {
                "model": "llama3.1:8b",
                "total_score": 3 * rounds * episodes,
                "total_cooperations": rounds * episodes,
                "overall_cooperation_rate": 1.0
            },
            "agent_1": {
                "model": "qwen2.5:7b",
                "total_score": 5 * rounds * episodes,
                "total_cooperations": 0,
                "overall_cooperation_rate": 0.0
            },
            "episodes": (1..=episodes).map(episode).collect::<Vec<_>>()
        })
    }

    fn write_json(dir: &Path, name: &str, value: &Value) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, serde_json::to_string(value).unwrap()).unwrap();
        path
    }

    fn importer() -> Importer {
        Importer::new(ForgeDb::open_in_memory().unwrap(), None)
    }

    #[test]
    fn importing_the_same_file_twice_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_json(dir.path(), "run.json", &sample_json(2, 3));
        let mut importer = importer();

        let first = importer.run_batch(&[path.display().to_string()]);
        assert_eq!(
            first,
            ImportSummary {
                loaded: 1,
                skipped: 0,
                failed: 0
            }
        );

        let second = importer.run_batch(&[path.display().to_string()]);
        assert_eq!(
            second,
            ImportSummary {
                loaded: 0,
                skipped: 1,
                failed: 0
            }
        );

        // The second run duplicated nothing.
        let counts = importer.db().table_counts().unwrap();
        assert_eq!(counts.experiments, 1);
        assert_eq!(counts.rounds, 12);
    }

    #[test]
    fn identical_identity_in_a_different_directory_is_skipped() {
        let dir_a = tempfile::tempdir().unwrap();
        let dir_b = tempfile::tempdir().unwrap();
        let a = write_json(dir_a.path(), "run.json", &sample_json(1, 2));
        let b = write_json(dir_b.path(), "run.json", &sample_json(1, 2));
        let mut importer = importer();

        assert_eq!(importer.import_file(&a), FileOutcome::Loaded);
        assert_eq!(importer.import_file(&b), FileOutcome::Skipped);
        assert_eq!(importer.db().table_counts().unwrap().experiments, 1);
    }

    #[test]
    fn round_trip_counts_match_the_document_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_json(dir.path(), "run.json", &sample_json(2, 3));
        let mut importer = importer();

        assert_eq!(importer.import_file(&path), FileOutcome::Loaded);

        // 2 agents x 2 episodes x 3 rounds.
        let counts = importer.db().table_counts().unwrap();
        assert_eq!(counts.agents, 2);
        assert_eq!(counts.episodes, 4);
        assert_eq!(counts.rounds, 12);
    }

    #[test]
    fn username_override_applies_to_files_missing_the_field() {
        let dir = tempfile::tempdir().unwrap();
        let mut value = sample_json(1, 1);
        value.as_object_mut().unwrap().remove("username");
        let path = write_json(dir.path(), "old.json", &value);

        let mut with_override =
            Importer::new(ForgeDb::open_in_memory().unwrap(), Some("alice".to_string()));
        assert_eq!(with_override.import_file(&path), FileOutcome::Loaded);

        let mut without_override = importer();
        assert_eq!(without_override.import_file(&path), FileOutcome::Failed);
        assert_eq!(without_override.db().table_counts().unwrap().experiments, 0);
    }

    #[test]
    fn one_malformed_file_does_not_abort_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        for n in 1..=2 {
            write_json(dir.path(), &format!("run_a{n}.json"), &sample_json(n, 1));
        }
        fs::write(dir.path().join("run_bad.json"), "{ not json").unwrap();
        for n in 1..=2 {
            write_json(dir.path(), &format!("run_c{n}.json"), &sample_json(1, n));
        }
        let mut importer = importer();

        let summary = importer.run_batch(&[dir.path().display().to_string()]);
        assert_eq!(
            summary,
            ImportSummary {
                loaded: 4,
                skipped: 0,
                failed: 1
            }
        );
        assert_eq!(importer.db().table_counts().unwrap().experiments, 4);
    }

    #[test]
    fn nonexistent_path_counts_as_failed_without_stopping_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_json(dir.path(), "run.json", &sample_json(1, 1));
        let mut importer = importer();

        let summary = importer.run_batch(&[
            "/no/such/file.json".to_string(),
            path.display().to_string(),
        ]);
        assert_eq!(
            summary,
            ImportSummary {
                loaded: 1,
                skipped: 0,
                failed: 1
            }
        );
    }

    #[test]
    fn empty_directory_reports_all_zeros() {
        let dir = tempfile::tempdir().unwrap();
        let mut importer = importer();

        let summary = importer.run_batch(&[dir.path().display().to_string()]);
        assert_eq!(summary, ImportSummary::default());
    }

    #[test]
    fn structurally_broken_file_is_failed_with_nothing_written() {
        let dir = tempfile::tempdir().unwrap();
        let mut value = sample_json(2, 2);
        value["episodes"][1]
            .as_object_mut()
            .unwrap()
            .remove("rounds");
        let path = write_json(dir.path(), "broken.json", &value);
        let mut importer = importer();

        assert_eq!(importer.import_file(&path), FileOutcome::Failed);
        let counts = importer.db().table_counts().unwrap();
        assert_eq!(counts.experiments, 0);
        assert_eq!(counts.rounds, 0);
    }

    #[test]
    fn different_timestamps_same_filename_both_load() {
        let dir_a = tempfile::tempdir().unwrap();
        let dir_b = tempfile::tempdir().unwrap();
        let a = write_json(dir_a.path(), "run.json", &sample_json(1, 1));
        let mut other = sample_json(1, 1);
        other["timestamp"] = json!("2026-02-01T09:00:00");
        let b = write_json(dir_b.path(), "run.json", &other);
        let mut importer = importer();

        assert_eq!(importer.import_file(&a), FileOutcome::Loaded);
        assert_eq!(importer.import_file(&b), FileOutcome::Loaded);
        assert_eq!(importer.db().table_counts().unwrap().experiments, 2);
    }
}
