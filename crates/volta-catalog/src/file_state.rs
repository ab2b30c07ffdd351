//! Lifecycle state machine for observed files.
//!
//! Files discovered by harvesters move through a fixed pipeline:
//!
//! ```text
//! AwaitingFileMetadata -> AwaitingMapAssignment -> Importing -> Imported
//!                                                      |
//!                                                      v
//!                                                ImportFailed -> Importing
//! ```
//!
//! `Imported` is terminal. `ImportFailed` is re-enterable: a fresh upload
//! of the same file restarts the import. Every other transition is
//! rejected by [`FileState::can_transition_to`].

use serde::{Deserialize, Serialize};

/// State of an observed file in the ingestion pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileState {
    /// Discovered; waiting for the harvester's metadata report.
    #[default]
    AwaitingFileMetadata,
    /// Metadata and summary recorded; waiting for a column mapping.
    AwaitingMapAssignment,
    /// Mapping assigned; partition uploads in flight.
    Importing,
    /// All partitions uploaded successfully. Terminal.
    Imported,
    /// The import was abandoned with errors. A fresh upload re-enters
    /// `Importing`.
    ImportFailed,
}

impl FileState {
    /// Whether a transition from this state to `next` is legal.
    #[must_use]
    pub fn can_transition_to(self, next: FileState) -> bool {
        use FileState::*;
        match self {
            AwaitingFileMetadata => matches!(next, AwaitingMapAssignment | ImportFailed),
            AwaitingMapAssignment => matches!(next, Importing | ImportFailed),
            Importing => matches!(next, Imported | ImportFailed),
            ImportFailed => matches!(next, Importing),
            Imported => false,
        }
    }

    /// Whether this state accepts no further harvester-driven transitions.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, FileState::Imported)
    }

    /// Whether a column mapping may be assigned in this state.
    #[must_use]
    pub fn accepts_mapping(self) -> bool {
        matches!(self, FileState::AwaitingMapAssignment)
    }

    /// Whether partition payloads may be accepted in this state.
    ///
    /// `ImportFailed` is included so a retried upload can revive the file.
    #[must_use]
    pub fn accepts_partitions(self) -> bool {
        matches!(self, FileState::Importing | FileState::ImportFailed)
    }
}

impl std::fmt::Display for FileState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::AwaitingFileMetadata => "AWAITING FILE METADATA",
            Self::AwaitingMapAssignment => "AWAITING MAP ASSIGNMENT",
            Self::Importing => "IMPORTING",
            Self::Imported => "IMPORTED",
            Self::ImportFailed => "IMPORT FAILED",
        };
        write!(f, "{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions() {
        assert!(FileState::AwaitingFileMetadata.can_transition_to(FileState::AwaitingMapAssignment));
        assert!(FileState::AwaitingMapAssignment.can_transition_to(FileState::Importing));
        assert!(FileState::Importing.can_transition_to(FileState::Imported));
    }

    #[test]
    fn failure_can_be_entered_from_any_active_state() {
        for state in [
            FileState::AwaitingFileMetadata,
            FileState::AwaitingMapAssignment,
            FileState::Importing,
        ] {
            assert!(state.can_transition_to(FileState::ImportFailed), "{state}");
        }
    }

    #[test]
    fn imported_is_terminal() {
        assert!(FileState::Imported.is_terminal());
        for next in [
            FileState::AwaitingFileMetadata,
            FileState::AwaitingMapAssignment,
            FileState::Importing,
            FileState::ImportFailed,
        ] {
            assert!(!FileState::Imported.can_transition_to(next));
        }
    }

    #[test]
    fn failed_import_is_revivable_only_into_importing() {
        assert!(FileState::ImportFailed.can_transition_to(FileState::Importing));
        assert!(!FileState::ImportFailed.can_transition_to(FileState::Imported));
        assert!(!FileState::ImportFailed.can_transition_to(FileState::AwaitingMapAssignment));
        assert!(!FileState::ImportFailed.is_terminal());
    }

    #[test]
    fn no_state_skipping() {
        assert!(!FileState::AwaitingFileMetadata.can_transition_to(FileState::Importing));
        assert!(!FileState::AwaitingFileMetadata.can_transition_to(FileState::Imported));
        assert!(!FileState::AwaitingMapAssignment.can_transition_to(FileState::Imported));
    }

    #[test]
    fn serialized_form_is_screaming_snake_case() {
        let json = serde_json::to_string(&FileState::AwaitingMapAssignment).expect("serialize");
        assert_eq!(json, "\"AWAITING_MAP_ASSIGNMENT\"");
    }
}
