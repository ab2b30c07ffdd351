//! Shared catalog fixtures for tests.
//!
//! Builds a small but fully-wired catalog: one lab with one storage type,
//! two teams, users at each membership tier, a harvester with a monitored
//! path, the required column types, and a valid mapping covering them.

use std::collections::BTreeMap;

use chrono::Utc;

use volta_core::{
    AccessThresholds, ColumnTypeId, HarvesterId, LabId, MappingId, MonitoredPathId, StorageTypeId,
    TeamId, UnitId, UserId,
};

use crate::entities::{
    ColumnMappingRow, ColumnRule, ColumnTypeRow, DataType, DataUnitRow, HarvesterRow, LabRow,
    MonitoredPathRow, StorageKind, StorageTypeRow, TeamRow, UserRow,
};
use crate::store::Catalog;

pub const HARVESTER_KEY: &str = "volta_hrv_fixture_key";
pub const MEMBER_TOKEN: &str = "token-member";
pub const TEAM_ADMIN_TOKEN: &str = "token-team-admin";
pub const LAB_ADMIN_TOKEN: &str = "token-lab-admin";
pub const OUTSIDER_TOKEN: &str = "token-outsider";

/// A populated catalog plus the ids of everything in it.
pub struct Fixture {
    pub catalog: Catalog,
    pub lab_id: LabId,
    pub team_id: TeamId,
    /// Second team in the same lab, with no members from the first.
    pub other_team_id: TeamId,
    pub storage_id: StorageTypeId,
    pub harvester_id: HarvesterId,
    pub path_id: MonitoredPathId,
    pub member_id: UserId,
    pub team_admin_id: UserId,
    pub lab_admin_id: UserId,
    /// A user in the lab's other team only.
    pub outsider_id: UserId,
    pub mapping_id: MappingId,
    pub time_type_id: ColumnTypeId,
    pub voltage_type_id: ColumnTypeId,
    pub temperature_type_id: ColumnTypeId,
}

impl Fixture {
    /// Fixture with a 10 MiB quota on the lab's only storage type.
    #[must_use]
    pub fn new() -> Self {
        Self::with_quota(10 * 1024 * 1024)
    }

    /// Fixture with an explicit quota on the lab's only storage type.
    #[must_use]
    pub fn with_quota(quota_bytes: u64) -> Self {
        let now = Utc::now();
        let mut catalog = Catalog::default();

        let lab_id = LabId::generate();
        let team_id = TeamId::generate();
        let other_team_id = TeamId::generate();
        let member_id = UserId::generate();
        let team_admin_id = UserId::generate();
        let lab_admin_id = UserId::generate();
        let outsider_id = UserId::generate();

        catalog.labs.insert(
            lab_id,
            LabRow {
                id: lab_id,
                name: "Energy Storage Lab".to_string(),
                admins: vec![lab_admin_id],
                created_at: now,
            },
        );
        catalog.teams.insert(
            team_id,
            TeamRow {
                id: team_id,
                lab_id,
                name: "Cycling".to_string(),
                admins: vec![team_admin_id],
                members: vec![member_id],
                created_at: now,
            },
        );
        catalog.teams.insert(
            other_team_id,
            TeamRow {
                id: other_team_id,
                lab_id,
                name: "Abuse Testing".to_string(),
                admins: vec![],
                members: vec![outsider_id],
                created_at: now,
            },
        );

        for (id, username, token) in [
            (member_id, "member", MEMBER_TOKEN),
            (team_admin_id, "team-admin", TEAM_ADMIN_TOKEN),
            (lab_admin_id, "lab-admin", LAB_ADMIN_TOKEN),
            (outsider_id, "outsider", OUTSIDER_TOKEN),
        ] {
            catalog.users.insert(
                id,
                UserRow {
                    id,
                    username: username.to_string(),
                    api_token: Some(token.to_string()),
                    is_service: false,
                    active: true,
                },
            );
        }

        let storage_id = StorageTypeId::generate();
        catalog.storage_types.insert(
            storage_id,
            StorageTypeRow {
                id: storage_id,
                lab_id,
                name: "managed".to_string(),
                kind: StorageKind::Managed,
                quota_bytes,
                priority: 0,
                enabled: true,
                created_at: now,
            },
        );

        let harvester_id = HarvesterId::generate();
        catalog.harvesters.insert(
            harvester_id,
            HarvesterRow {
                id: harvester_id,
                lab_id,
                name: "cycler-01".to_string(),
                api_key: HARVESTER_KEY.to_string(),
                active: true,
                sleep_time_s: 60,
                last_check_in: None,
                last_check_in_task: None,
                created_at: now,
            },
        );

        let path_id = MonitoredPathId::generate();
        catalog.monitored_paths.insert(
            path_id,
            MonitoredPathRow {
                id: path_id,
                harvester_id,
                team_id,
                root: "/data".to_string(),
                regex: r"\.csv$".to_string(),
                stable_time_s: 60,
                max_partition_rows: 100_000,
                active: true,
                thresholds: AccessThresholds::monitored_path_default(),
                created_at: now,
            },
        );

        let seconds_unit = UnitId::generate();
        catalog.units.insert(
            seconds_unit,
            DataUnitRow {
                id: seconds_unit,
                team_id: None,
                name: "Seconds".to_string(),
                symbol: "s".to_string(),
                description: None,
                thresholds: AccessThresholds::resource_default(),
            },
        );

        let time_type_id = ColumnTypeId::generate();
        let voltage_type_id = ColumnTypeId::generate();
        let temperature_type_id = ColumnTypeId::generate();
        for (id, name, required) in [
            (time_type_id, "ElapsedTime_s", true),
            (voltage_type_id, "Voltage_V", true),
            (temperature_type_id, "Temperature_K", false),
        ] {
            catalog.column_types.insert(
                id,
                ColumnTypeRow {
                    id,
                    team_id: None,
                    name: name.to_string(),
                    data_type: DataType::Float,
                    unit_id: (name == "ElapsedTime_s").then_some(seconds_unit),
                    is_required: required,
                    thresholds: AccessThresholds::resource_default(),
                },
            );
        }

        let mapping_id = MappingId::generate();
        let mut entries = BTreeMap::new();
        entries.insert(
            "time".to_string(),
            ColumnRule {
                column_type: time_type_id,
                new_name: None,
                multiplier: None,
                addition: None,
            },
        );
        entries.insert(
            "Ewe".to_string(),
            ColumnRule {
                column_type: voltage_type_id,
                new_name: None,
                multiplier: None,
                addition: None,
            },
        );
        catalog.mappings.insert(
            mapping_id,
            ColumnMappingRow {
                id: mapping_id,
                team_id,
                name: "biologic-default".to_string(),
                entries,
                thresholds: AccessThresholds::resource_default(),
                created_at: now,
            },
        );

        Self {
            catalog,
            lab_id,
            team_id,
            other_team_id,
            storage_id,
            harvester_id,
            path_id,
            member_id,
            team_admin_id,
            lab_admin_id,
            outsider_id,
            mapping_id,
            time_type_id,
            voltage_type_id,
            temperature_type_id,
        }
    }
}

impl Default for Fixture {
    fn default() -> Self {
        Self::new()
    }
}
