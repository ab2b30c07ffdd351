//! Access-level primitives for the three-tier capability model.
//!
//! Every team-owned resource carries three thresholds (read/edit/delete)
//! drawn from an ordered ladder of access levels. Capability evaluation
//! compares the principal's level relative to the owning team against the
//! threshold for the requested kind. Membership resolution lives in
//! `volta-catalog`; this module owns the types and the monotonic-threshold
//! invariant.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::id::{HarvesterId, UserId};

/// Ordered capability tiers.
///
/// The derived `Ord` matches the declaration order, so
/// `AccessLevel::Anonymous < AccessLevel::LabAdmin` holds.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessLevel {
    /// Unauthenticated or unapproved caller.
    #[default]
    Anonymous,
    /// Member of some team in the resource's lab.
    LabMember,
    /// Member of the resource's owning team.
    TeamMember,
    /// Administrator of the resource's owning team.
    TeamAdmin,
    /// Administrator of the resource's lab.
    LabAdmin,
}

impl AccessLevel {
    /// Returns the numeric rank of the level (0 = anonymous).
    #[must_use]
    pub const fn rank(self) -> u8 {
        self as u8
    }
}

impl std::fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Anonymous => "ANONYMOUS",
            Self::LabMember => "LAB_MEMBER",
            Self::TeamMember => "TEAM_MEMBER",
            Self::TeamAdmin => "TEAM_ADMIN",
            Self::LabAdmin => "LAB_ADMIN",
        };
        write!(f, "{name}")
    }
}

/// The capability being evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessKind {
    /// Read the resource.
    Read,
    /// Modify the resource.
    Edit,
    /// Delete the resource.
    Delete,
}

/// Per-resource capability thresholds.
///
/// Invariant enforced on every write: `read <= edit <= delete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessThresholds {
    /// Minimum level required to read the resource.
    pub read: AccessLevel,
    /// Minimum level required to edit the resource.
    pub edit: AccessLevel,
    /// Minimum level required to delete the resource.
    pub delete: AccessLevel,
}

impl AccessThresholds {
    /// Default thresholds for ordinary team resources.
    #[must_use]
    pub const fn resource_default() -> Self {
        Self {
            read: AccessLevel::LabMember,
            edit: AccessLevel::TeamMember,
            delete: AccessLevel::TeamMember,
        }
    }

    /// Default thresholds for monitored paths, which are more sensitive
    /// because they direct what a harvester reads from disk.
    #[must_use]
    pub const fn monitored_path_default() -> Self {
        Self {
            read: AccessLevel::LabMember,
            edit: AccessLevel::TeamAdmin,
            delete: AccessLevel::TeamAdmin,
        }
    }

    /// Returns the threshold for the given capability kind.
    #[must_use]
    pub const fn for_kind(&self, kind: AccessKind) -> AccessLevel {
        match kind {
            AccessKind::Read => self.read,
            AccessKind::Edit => self.edit,
            AccessKind::Delete => self.delete,
        }
    }

    /// Validates the monotonic invariant `read <= edit <= delete`.
    ///
    /// Violations are rejected outright, never silently clamped.
    pub fn validate(&self) -> Result<()> {
        if self.read > self.edit {
            return Err(Error::bad_request(format!(
                "read access level ({}) must be less than or equal to edit access level ({})",
                self.read, self.edit
            )));
        }
        if self.edit > self.delete {
            return Err(Error::bad_request(format!(
                "edit access level ({}) must be less than or equal to delete access level ({})",
                self.edit, self.delete
            )));
        }
        Ok(())
    }
}

impl Default for AccessThresholds {
    fn default() -> Self {
        Self::resource_default()
    }
}

/// The caller on whose behalf an operation runs.
///
/// Harvester credentials are a disjoint principal kind: they carry exactly
/// the report/config rights on their own resources and no generic resource
/// capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    /// Superuser / service credential; all capabilities on everything.
    Service,
    /// An authenticated human user.
    User(UserId),
    /// An authenticated harvester agent.
    Harvester(HarvesterId),
    /// No credential presented.
    Anonymous,
}

impl Principal {
    /// Returns true when the principal is the service override.
    #[must_use]
    pub const fn is_service(&self) -> bool {
        matches!(self, Self::Service)
    }
}

/// Capability flags exposed to resource presentation layers.
///
/// `write` is the edit capability and `destroy` the delete capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionFlags {
    /// Whether the principal may read the resource.
    pub read: bool,
    /// Whether the principal may edit the resource.
    pub write: bool,
    /// Whether the principal may create resources of this kind.
    pub create: bool,
    /// Whether the principal may delete the resource.
    pub destroy: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_are_ordered() {
        assert!(AccessLevel::Anonymous < AccessLevel::LabMember);
        assert!(AccessLevel::LabMember < AccessLevel::TeamMember);
        assert!(AccessLevel::TeamMember < AccessLevel::TeamAdmin);
        assert!(AccessLevel::TeamAdmin < AccessLevel::LabAdmin);
    }

    #[test]
    fn monotonic_thresholds_validate() {
        assert!(AccessThresholds::resource_default().validate().is_ok());
        assert!(AccessThresholds::monitored_path_default().validate().is_ok());
    }

    #[test]
    fn read_above_edit_is_rejected() {
        let thresholds = AccessThresholds {
            read: AccessLevel::TeamAdmin,
            edit: AccessLevel::TeamMember,
            delete: AccessLevel::TeamAdmin,
        };
        let err = thresholds.validate().unwrap_err();
        assert!(matches!(err, Error::BadRequest { .. }));
    }

    #[test]
    fn edit_above_delete_is_rejected() {
        let thresholds = AccessThresholds {
            read: AccessLevel::LabMember,
            edit: AccessLevel::TeamAdmin,
            delete: AccessLevel::TeamMember,
        };
        assert!(thresholds.validate().is_err());
    }
}
