use thiserror::Error;

/// Result type alias for import operations.
pub type Result<T> = std::result::Result<T, ImportError>;

/// Errors raised while importing one result file, plus the fatal
/// configuration case that prevents a batch from starting at all.
///
/// Everything except `Config` is file-scoped: the batch loop catches it,
/// logs it, and moves on to the next candidate.
#[derive(Debug, Error)]
pub enum ImportError {
    /// A required field is absent from the document.
    #[error("{file}: missing required field `{field}`")]
    MissingField { file: String, field: String },

    /// A round action was neither `cooperate` nor `defect`.
    #[error("{file}: invalid action token `{value}`")]
    InvalidAction { file: String, value: String },

    /// The `timestamp` field could not be parsed as a datetime.
    #[error("{file}: invalid timestamp `{value}`")]
    InvalidTimestamp { file: String, value: String },

    /// The file is not valid JSON, or a field has the wrong type.
    #[error("{file}: malformed document: {source}")]
    Malformed {
        file: String,
        #[source]
        source: serde_json::Error,
    },

    /// The file could not be read from disk.
    #[error("{file}: {source}")]
    Io {
        file: String,
        #[source]
        source: std::io::Error,
    },

    /// Any failure reported by the storage layer.
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Storage unreachable or misconfigured; aborts the whole invocation.
    #[error("configuration error: {0}")]
    Config(String),
}

impl ImportError {
    pub fn missing(file: impl Into<String>, field: impl Into<String>) -> Self {
        Self::MissingField {
            file: file.into(),
            field: field.into(),
        }
    }

    /// True when the error is a uniqueness violation on
    /// `experiments(filename, timestamp)` — the benign race where another
    /// importer loaded the same file first. Classified as a skip, not a
    /// failure. Uniqueness violations on any other table stay failures.
    pub fn is_duplicate_experiment(&self) -> bool {
        match self {
            Self::Storage(rusqlite::Error::SqliteFailure(err, Some(msg))) => {
                err.code == rusqlite::ErrorCode::ConstraintViolation
                    && msg.contains("experiments.filename")
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_field_names_file_and_key() {
        let err = ImportError::missing("results.json", "timestamp");
        assert_eq!(
            err.to_string(),
            "results.json: missing required field `timestamp`"
        );
    }

    #[test]
    fn only_experiment_uniqueness_counts_as_duplicate() {
        let dup = ImportError::Storage(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE),
            Some("UNIQUE constraint failed: experiments.filename, experiments.timestamp".into()),
        ));
        assert!(dup.is_duplicate_experiment());

        let other = ImportError::Storage(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE),
            Some("UNIQUE constraint failed: episodes.experiment_id, episodes.agent_idx, episodes.episode".into()),
        ));
        assert!(!other.is_duplicate_experiment());

        assert!(!ImportError::missing("f", "k").is_duplicate_experiment());
    }
}
