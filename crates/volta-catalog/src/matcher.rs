//! Monitored-path matching.
//!
//! A reported file path belongs to a monitored path when, after lexical
//! normalization of both sides, it falls under the monitored root and the
//! path's regex matches somewhere in the remainder. Matching is purely
//! lexical: the server never consults the harvester's filesystem.

use regex::Regex;

use volta_core::{Error, Result};

use crate::entities::MonitoredPathRow;

/// Normalizes a path lexically: forward slashes, lowercased, `.` segments
/// dropped, `..` segments resolved against their parent.
///
/// Case folding makes matching stable across harvesters on
/// case-insensitive filesystems.
#[must_use]
pub fn normalize_path(path: &str) -> String {
    let path = path.replace('\\', "/").to_lowercase();
    let absolute = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if parts.pop().is_none() && !absolute {
                    // Relative path escaping its base; keep the segment.
                    parts.push("..");
                }
            }
            other => parts.push(other),
        }
    }
    let joined = parts.join("/");
    if absolute {
        format!("/{joined}")
    } else {
        joined
    }
}

/// Validates a monitored-path regex before the path is accepted.
pub fn validate_regex(pattern: &str) -> Result<()> {
    Regex::new(pattern)
        .map(|_| ())
        .map_err(|e| Error::bad_request(format!("invalid monitored path regex: {e}")))
}

/// The part of `path` below `root`, if `path` is inside the root.
///
/// Both sides are normalized first. Containment is per path segment, so
/// `/data/lab` does not contain `/data/laboratory/x`.
#[must_use]
pub fn relative_to_root(root: &str, path: &str) -> Option<String> {
    let root = normalize_path(root);
    let path = normalize_path(path);
    if path == root {
        return Some(String::new());
    }
    let prefix = if root.ends_with('/') {
        root
    } else {
        format!("{root}/")
    };
    path.strip_prefix(&prefix).map(ToOwned::to_owned)
}

/// Whether a monitored path claims the given reported file path.
#[must_use]
pub fn path_matches(monitored: &MonitoredPathRow, reported_path: &str) -> bool {
    let Some(relative) = relative_to_root(&monitored.root, reported_path) else {
        return false;
    };
    match Regex::new(&monitored.regex) {
        Ok(regex) => regex.is_match(&relative),
        Err(e) => {
            // Patterns are validated at creation; a stored invalid pattern
            // matches nothing rather than poisoning ingestion.
            tracing::warn!(
                monitored_path = %monitored.id,
                error = %e,
                "stored monitored path regex failed to compile"
            );
            false
        }
    }
}

/// All of a harvester's active monitored paths that claim the given path.
#[must_use]
pub fn matching_paths<'a>(
    paths: &[&'a MonitoredPathRow],
    reported_path: &str,
) -> Vec<&'a MonitoredPathRow> {
    paths
        .iter()
        .filter(|p| p.active && path_matches(p, reported_path))
        .copied()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;

    #[test]
    fn normalization_folds_case_and_resolves_dots() {
        assert_eq!(normalize_path("/Data/./Cycler//Run1.CSV"), "/data/cycler/run1.csv");
        assert_eq!(normalize_path("/data/cycler/../other/run.csv"), "/data/other/run.csv");
        assert_eq!(normalize_path("C:\\Data\\run.csv"), "c:/data/run.csv");
    }

    #[test]
    fn relative_escape_above_root_is_kept() {
        assert_eq!(normalize_path("../up/run.csv"), "../up/run.csv");
    }

    #[test]
    fn containment_respects_segment_boundaries() {
        assert_eq!(
            relative_to_root("/data/lab", "/data/lab/run.csv").as_deref(),
            Some("run.csv")
        );
        assert!(relative_to_root("/data/lab", "/data/laboratory/run.csv").is_none());
    }

    #[test]
    fn regex_applies_to_the_relative_tail() {
        let fixture = testutil::Fixture::new();
        let path = fixture
            .catalog
            .monitored_path(fixture.path_id)
            .expect("path exists");
        // Fixture root is /data with regex \.csv$.
        assert!(path_matches(path, "/data/cycler/run1.csv"));
        assert!(path_matches(path, "/DATA/CYCLER/RUN1.CSV"));
        assert!(!path_matches(path, "/data/cycler/run1.xlsx"));
        assert!(!path_matches(path, "/other/run1.csv"));
    }

    #[test]
    fn invalid_patterns_are_rejected_at_creation() {
        assert!(validate_regex(r"\.csv$").is_ok());
        assert!(validate_regex(r"([unclosed").is_err());
    }

    #[test]
    fn stored_invalid_pattern_matches_nothing() {
        let fixture = testutil::Fixture::new();
        let mut path = fixture
            .catalog
            .monitored_path(fixture.path_id)
            .expect("path exists")
            .clone();
        path.regex = "([unclosed".to_string();
        assert!(!path_matches(&path, "/data/run.csv"));
    }
}
