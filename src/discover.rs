use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::warn;

/// Candidate files resolved from the command-line arguments, plus the
/// arguments that matched nothing on disk. A missing path is a per-candidate
/// failure the batch folds into its failed count; an empty directory or a
/// non-matching glob is simply zero candidates.
#[derive(Debug, Default)]
pub struct DiscoveredSources {
    pub files: Vec<PathBuf>,
    pub missing: Vec<String>,
}

/// Expand each argument — a file, a directory (`*.json` within,
/// non-recursive), or a glob pattern — into a deduplicated, order-stable
/// candidate list. Arguments keep their given order; each directory or
/// glob expansion is sorted internally.
pub fn expand_sources(args: &[String]) -> DiscoveredSources {
    let mut sources = DiscoveredSources::default();
    let mut seen = HashSet::new();

    for arg in args {
        let path = Path::new(arg);
        if path.is_file() {
            push_unique(&mut sources.files, &mut seen, path.to_path_buf());
        } else if path.is_dir() {
            for file in json_files_in(path) {
                push_unique(&mut sources.files, &mut seen, file);
            }
        } else if is_glob_pattern(arg) {
            match expand_glob(arg) {
                Some(files) => {
                    for file in files {
                        push_unique(&mut sources.files, &mut seen, file);
                    }
                }
                None => {
                    warn!(pattern = %arg, "invalid glob pattern");
                    sources.missing.push(arg.clone());
                }
            }
        } else {
            warn!(path = %arg, "path not found");
            sources.missing.push(arg.clone());
        }
    }

    sources
}

fn push_unique(files: &mut Vec<PathBuf>, seen: &mut HashSet<PathBuf>, path: PathBuf) {
    if seen.insert(path.clone()) {
        files.push(path);
    }
}

fn is_glob_pattern(arg: &str) -> bool {
    arg.contains(['*', '?', '['])
}

fn json_files_in(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.is_file()
                    && p.extension()
                        .map(|ext| ext.eq_ignore_ascii_case("json"))
                        .unwrap_or(false)
            })
            .collect(),
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "cannot read directory");
            return Vec::new();
        }
    };
    files.sort();
    files
}

fn expand_glob(pattern: &str) -> Option<Vec<PathBuf>> {
    let paths = glob::glob(pattern).ok()?;
    let mut files: Vec<PathBuf> = paths
        .filter_map(|entry| entry.ok())
        .filter(|p| p.is_file())
        .collect();
    files.sort();
    Some(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(path: &Path) {
        fs::write(path, "{}").unwrap();
    }

    #[test]
    fn single_file_passes_through() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("run.json");
        touch(&file);

        let sources = expand_sources(&[file.display().to_string()]);
        assert_eq!(sources.files, vec![file]);
        assert!(sources.missing.is_empty());
    }

    #[test]
    fn directory_expands_to_sorted_json_files() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("b.json"));
        touch(&dir.path().join("a.json"));
        touch(&dir.path().join("notes.txt"));

        let sources = expand_sources(&[dir.path().display().to_string()]);
        assert_eq!(
            sources.files,
            vec![dir.path().join("a.json"), dir.path().join("b.json")]
        );
    }

    #[test]
    fn glob_pattern_expands_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("run_ep50.json"));
        touch(&dir.path().join("run_ep10.json"));
        touch(&dir.path().join("other.json"));

        let pattern = dir.path().join("run_*.json").display().to_string();
        let sources = expand_sources(&[pattern]);
        assert_eq!(
            sources.files,
            vec![
                dir.path().join("run_ep10.json"),
                dir.path().join("run_ep50.json")
            ]
        );
    }

    #[test]
    fn empty_directory_yields_zero_candidates_not_an_error() {
        let dir = tempfile::tempdir().unwrap();

        let sources = expand_sources(&[dir.path().display().to_string()]);
        assert!(sources.files.is_empty());
        assert!(sources.missing.is_empty());
    }

    #[test]
    fn non_matching_glob_yields_zero_candidates() {
        let dir = tempfile::tempdir().unwrap();

        let pattern = dir.path().join("*.json").display().to_string();
        let sources = expand_sources(&[pattern]);
        assert!(sources.files.is_empty());
        assert!(sources.missing.is_empty());
    }

    #[test]
    fn nonexistent_path_is_reported_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("real.json");
        touch(&file);

        let sources = expand_sources(&[
            "/no/such/file.json".to_string(),
            file.display().to_string(),
        ]);
        assert_eq!(sources.files, vec![file]);
        assert_eq!(sources.missing, vec!["/no/such/file.json".to_string()]);
    }

    #[test]
    fn repeated_arguments_deduplicate_preserving_order() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("run.json");
        touch(&file);

        let arg = file.display().to_string();
        let sources = expand_sources(&[arg.clone(), dir.path().display().to_string(), arg]);
        assert_eq!(sources.files, vec![file]);
    }
}
