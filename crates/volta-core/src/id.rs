//! Strongly-typed identifiers for Volta entities.
//!
//! Every persisted row carries a UUID newtype so that, for example, a
//! [`HarvesterId`] can never be passed where a [`FileId`] is expected.
//! IDs serialize transparently as their UUID string form.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;

macro_rules! entity_id {
    ($(#[$doc:meta])* $name:ident, $label:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generates a new random identifier.
            #[must_use]
            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }

            /// Creates an identifier from a raw UUID.
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the underlying UUID.
            #[must_use]
            pub const fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Error> {
                Uuid::parse_str(s).map(Self).map_err(|e| Error::BadRequest {
                    message: format!(concat!("invalid ", $label, " id '{}': {}"), s, e),
                })
            }
        }
    };
}

entity_id!(
    /// Identifier of a lab, the top level of the ownership hierarchy.
    LabId,
    "lab"
);
entity_id!(
    /// Identifier of a team within a lab.
    TeamId,
    "team"
);
entity_id!(
    /// Identifier of a human user account.
    UserId,
    "user"
);
entity_id!(
    /// Identifier of a remote harvester agent.
    HarvesterId,
    "harvester"
);
entity_id!(
    /// Identifier of a monitored-path watch rule.
    MonitoredPathId,
    "monitored path"
);
entity_id!(
    /// Identifier of an observed file discovered by a harvester.
    FileId,
    "observed file"
);
entity_id!(
    /// Identifier of a reusable column mapping.
    MappingId,
    "column mapping"
);
entity_id!(
    /// Identifier of a data-column type (e.g. voltage, current).
    ColumnTypeId,
    "column type"
);
entity_id!(
    /// Identifier of a measurement unit.
    UnitId,
    "data unit"
);
entity_id!(
    /// Identifier of one committed parquet partition of a file.
    PartitionId,
    "parquet partition"
);
entity_id!(
    /// Identifier of a quota-bounded storage type owned by a lab.
    StorageTypeId,
    "storage type"
);
entity_id!(
    /// Identifier of a durable harvest-error log row.
    HarvestErrorId,
    "harvest error"
);
entity_id!(
    /// Identifier of an arbitrary (user-uploaded) file.
    ArbitraryFileId,
    "arbitrary file"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_roundtrip_through_strings() {
        let id = FileId::generate();
        let parsed: FileId = id.to_string().parse().expect("parse should succeed");
        assert_eq!(id, parsed);
    }

    #[test]
    fn invalid_id_is_bad_request() {
        let err = "not-a-uuid".parse::<HarvesterId>().unwrap_err();
        assert!(matches!(err, Error::BadRequest { .. }));
    }

    #[test]
    fn ids_serialize_transparently() {
        let id = LabId::generate();
        let json = serde_json::to_string(&id).expect("serialize");
        assert_eq!(json, format!("\"{id}\""));
    }
}
