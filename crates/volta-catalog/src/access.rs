//! Capability evaluation over catalog rows.
//!
//! `volta-core` owns the level ladder and threshold types; this module
//! resolves a principal's effective level relative to a resource's owning
//! team and compares it to the resource's thresholds. Levels are never
//! stored: they are recomputed from membership on every check.

use std::collections::BTreeSet;

use volta_core::{
    AccessKind, AccessLevel, AccessThresholds, ArbitraryFileId, ColumnTypeId, Error, FileId,
    HarvesterId, LabId, MappingId, MonitoredPathId, PermissionFlags, Principal, Result,
    StorageTypeId, TeamId, UnitId, UserId,
};

use crate::store::Catalog;

/// A principal's resolved memberships.
#[derive(Debug, Clone, Default)]
pub struct UserScopes {
    pub is_service: bool,
    pub admin_lab_ids: BTreeSet<LabId>,
    pub member_lab_ids: BTreeSet<LabId>,
    pub admin_team_ids: BTreeSet<TeamId>,
    pub member_team_ids: BTreeSet<TeamId>,
}

impl UserScopes {
    /// Whether the principal belongs to any team or administers any lab.
    #[must_use]
    pub fn has_any_membership(&self) -> bool {
        !self.member_team_ids.is_empty()
            || !self.admin_team_ids.is_empty()
            || !self.admin_lab_ids.is_empty()
    }
}

/// Resolves the memberships of a principal.
///
/// Harvester and anonymous principals resolve to empty scopes; their
/// rights are handled separately in [`capability`].
#[must_use]
pub fn scopes_for(catalog: &Catalog, principal: &Principal) -> UserScopes {
    let user_id = match principal {
        Principal::Service => {
            return UserScopes {
                is_service: true,
                ..UserScopes::default()
            }
        }
        Principal::User(id) => *id,
        Principal::Harvester(_) | Principal::Anonymous => return UserScopes::default(),
    };
    scopes_for_user(catalog, user_id)
}

fn scopes_for_user(catalog: &Catalog, user_id: UserId) -> UserScopes {
    let mut scopes = UserScopes::default();
    if catalog.users.get(&user_id).is_some_and(|u| u.is_service) {
        scopes.is_service = true;
        return scopes;
    }
    for lab in catalog.labs.values() {
        if lab.admins.contains(&user_id) {
            scopes.admin_lab_ids.insert(lab.id);
        }
    }
    for team in catalog.teams.values() {
        let is_admin = team.admins.contains(&user_id);
        let is_member = is_admin || team.members.contains(&user_id);
        if is_admin {
            scopes.admin_team_ids.insert(team.id);
        }
        if is_member {
            scopes.member_team_ids.insert(team.id);
            scopes.member_lab_ids.insert(team.lab_id);
        }
    }
    scopes
}

/// A capability-checkable resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Lab(LabId),
    Team(TeamId),
    Harvester(HarvesterId),
    MonitoredPath(MonitoredPathId),
    File(FileId),
    Mapping(MappingId),
    ColumnType(ColumnTypeId),
    Unit(UnitId),
    StorageType(StorageTypeId),
    ArbitraryFile(ArbitraryFileId),
}

/// The access-relevant facts about a resource.
#[derive(Debug, Clone, Copy)]
pub struct ResourceAcl {
    /// Lab context, absent for global rows (shared column types, units).
    pub lab_id: Option<LabId>,
    /// Owning team, absent for lab-scoped and global rows.
    pub team_id: Option<TeamId>,
    pub thresholds: AccessThresholds,
}

/// Resolves a resource's owning team, lab, and thresholds.
pub fn resolve_acl(catalog: &Catalog, resource: Resource) -> Result<ResourceAcl> {
    let team_scoped = |team_id: TeamId, thresholds: AccessThresholds| -> Result<ResourceAcl> {
        Ok(ResourceAcl {
            lab_id: Some(catalog.team(team_id)?.lab_id),
            team_id: Some(team_id),
            thresholds,
        })
    };
    match resource {
        Resource::Lab(id) => Ok(ResourceAcl {
            lab_id: Some(catalog.lab(id)?.id),
            team_id: None,
            // Lab rows are administered by lab admins only.
            thresholds: AccessThresholds {
                read: AccessLevel::LabMember,
                edit: AccessLevel::LabAdmin,
                delete: AccessLevel::LabAdmin,
            },
        }),
        Resource::Team(id) => {
            let team = catalog.team(id)?;
            Ok(ResourceAcl {
                lab_id: Some(team.lab_id),
                team_id: Some(team.id),
                thresholds: AccessThresholds {
                    read: AccessLevel::LabMember,
                    edit: AccessLevel::TeamAdmin,
                    delete: AccessLevel::LabAdmin,
                },
            })
        }
        Resource::Harvester(id) => {
            let harvester = catalog.harvester(id)?;
            Ok(ResourceAcl {
                lab_id: Some(harvester.lab_id),
                team_id: None,
                thresholds: AccessThresholds {
                    read: AccessLevel::LabMember,
                    edit: AccessLevel::LabAdmin,
                    delete: AccessLevel::LabAdmin,
                },
            })
        }
        Resource::MonitoredPath(id) => {
            let path = catalog.monitored_path(id)?;
            team_scoped(path.team_id, path.thresholds)
        }
        Resource::File(id) => {
            let file = catalog.file(id)?;
            team_scoped(file.team_id, file.thresholds)
        }
        Resource::Mapping(id) => {
            let mapping = catalog.mapping(id)?;
            team_scoped(mapping.team_id, mapping.thresholds)
        }
        Resource::ColumnType(id) => {
            let row = catalog.column_type(id)?;
            match row.team_id {
                Some(team_id) => team_scoped(team_id, row.thresholds),
                None => Ok(ResourceAcl {
                    lab_id: None,
                    team_id: None,
                    thresholds: row.thresholds,
                }),
            }
        }
        Resource::Unit(id) => {
            let row = catalog
                .units
                .get(&id)
                .ok_or_else(|| Error::not_found("DataUnit", id))?;
            match row.team_id {
                Some(team_id) => team_scoped(team_id, row.thresholds),
                None => Ok(ResourceAcl {
                    lab_id: None,
                    team_id: None,
                    thresholds: row.thresholds,
                }),
            }
        }
        Resource::StorageType(id) => {
            let row = catalog.storage_type(id)?;
            Ok(ResourceAcl {
                lab_id: Some(row.lab_id),
                team_id: None,
                thresholds: AccessThresholds {
                    read: AccessLevel::LabMember,
                    edit: AccessLevel::LabAdmin,
                    delete: AccessLevel::LabAdmin,
                },
            })
        }
        Resource::ArbitraryFile(id) => {
            let row = catalog
                .arbitrary_files
                .get(&id)
                .ok_or_else(|| Error::not_found("ArbitraryFile", id))?;
            team_scoped(row.team_id, row.thresholds)
        }
    }
}

/// The principal's level relative to the resource's owning team and lab.
#[must_use]
pub fn level_for(scopes: &UserScopes, acl: &ResourceAcl) -> AccessLevel {
    if let Some(lab_id) = acl.lab_id {
        if scopes.admin_lab_ids.contains(&lab_id) {
            return AccessLevel::LabAdmin;
        }
        if let Some(team_id) = acl.team_id {
            if scopes.admin_team_ids.contains(&team_id) {
                return AccessLevel::TeamAdmin;
            }
            if scopes.member_team_ids.contains(&team_id) {
                return AccessLevel::TeamMember;
            }
        }
        if scopes.member_lab_ids.contains(&lab_id) {
            return AccessLevel::LabMember;
        }
    }
    AccessLevel::Anonymous
}

/// Whether a harvester principal has built-in rights on the resource.
///
/// Harvesters read their own configuration (their row and monitored
/// paths) and read and edit the files they reported. Nothing else.
fn harvester_capability(
    catalog: &Catalog,
    harvester_id: HarvesterId,
    resource: Resource,
    kind: AccessKind,
) -> bool {
    match (resource, kind) {
        (Resource::Harvester(id), AccessKind::Read) => id == harvester_id,
        (Resource::MonitoredPath(id), AccessKind::Read) => catalog
            .monitored_paths
            .get(&id)
            .is_some_and(|p| p.harvester_id == harvester_id),
        (Resource::File(id), AccessKind::Read | AccessKind::Edit) => catalog
            .files
            .get(&id)
            .is_some_and(|f| f.harvester_id == Some(harvester_id)),
        _ => false,
    }
}

/// Whether the principal holds the given capability on the resource.
pub fn capability(
    catalog: &Catalog,
    principal: &Principal,
    resource: Resource,
    kind: AccessKind,
) -> Result<bool> {
    if let Principal::Harvester(id) = principal {
        return Ok(harvester_capability(catalog, *id, resource, kind));
    }
    let scopes = scopes_for(catalog, principal);
    if scopes.is_service {
        return Ok(true);
    }
    let acl = resolve_acl(catalog, resource)?;
    // Global rows (no lab) are world-readable and service-managed.
    if acl.lab_id.is_none() {
        return Ok(matches!(kind, AccessKind::Read));
    }
    let level = level_for(&scopes, &acl);
    if level == AccessLevel::LabAdmin {
        return Ok(true);
    }
    Ok(level >= acl.thresholds.for_kind(kind))
}

/// Requires the capability, turning a shortfall into `Forbidden`.
pub fn require_capability(
    catalog: &Catalog,
    principal: &Principal,
    resource: Resource,
    kind: AccessKind,
) -> Result<()> {
    if capability(catalog, principal, resource, kind)? {
        Ok(())
    } else {
        Err(Error::forbidden(format!(
            "{kind:?} capability required",
        )))
    }
}

/// Capability flags for presenting a resource to a principal.
pub fn permissions(
    catalog: &Catalog,
    principal: &Principal,
    resource: Resource,
) -> Result<PermissionFlags> {
    let scopes = scopes_for(catalog, principal);
    Ok(PermissionFlags {
        read: capability(catalog, principal, resource, AccessKind::Read)?,
        write: capability(catalog, principal, resource, AccessKind::Edit)?,
        create: scopes.is_service || scopes.has_any_membership(),
        destroy: capability(catalog, principal, resource, AccessKind::Delete)?,
    })
}

fn thresholds_mut<'a>(catalog: &'a mut Catalog, resource: Resource) -> Result<&'a mut AccessThresholds> {
    match resource {
        Resource::MonitoredPath(id) => Ok(&mut catalog
            .monitored_paths
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("MonitoredPath", id))?
            .thresholds),
        Resource::File(id) => Ok(&mut catalog.file_mut(id)?.thresholds),
        Resource::Mapping(id) => Ok(&mut catalog
            .mappings
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("ColumnMapping", id))?
            .thresholds),
        Resource::ColumnType(id) => Ok(&mut catalog
            .column_types
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("ColumnType", id))?
            .thresholds),
        Resource::Unit(id) => Ok(&mut catalog
            .units
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("DataUnit", id))?
            .thresholds),
        Resource::ArbitraryFile(id) => Ok(&mut catalog
            .arbitrary_files
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("ArbitraryFile", id))?
            .thresholds),
        Resource::Lab(_)
        | Resource::Team(_)
        | Resource::Harvester(_)
        | Resource::StorageType(_) => Err(Error::bad_request(
            "this resource does not carry editable access thresholds",
        )),
    }
}

/// Updates a resource's thresholds, enforcing the editing rules.
///
/// Changing the read or edit threshold requires the editor to stand at
/// `TEAM_MEMBER` or above relative to the resource; changing the delete
/// threshold requires `TEAM_ADMIN` or above. The monotonic invariant is
/// validated before anything is written.
pub fn update_thresholds(
    catalog: &mut Catalog,
    principal: &Principal,
    resource: Resource,
    new: AccessThresholds,
) -> Result<()> {
    new.validate()?;
    let scopes = scopes_for(catalog, principal);
    let acl = resolve_acl(catalog, resource)?;
    if !scopes.is_service {
        let level = level_for(&scopes, &acl);
        let current = acl.thresholds;
        if (new.read != current.read || new.edit != current.edit)
            && level < AccessLevel::TeamMember
        {
            return Err(Error::forbidden(
                "changing read or edit access levels requires team membership",
            ));
        }
        if new.delete != current.delete && level < AccessLevel::TeamAdmin {
            return Err(Error::forbidden(
                "changing the delete access level requires team administration",
            ));
        }
        if level < acl.thresholds.edit && level < AccessLevel::LabAdmin {
            return Err(Error::forbidden("edit capability required"));
        }
    }
    *thresholds_mut(catalog, resource)? = new;
    Ok(())
}

fn owning_team_mut<'a>(catalog: &'a mut Catalog, resource: Resource) -> Result<&'a mut TeamId> {
    match resource {
        Resource::MonitoredPath(id) => Ok(&mut catalog
            .monitored_paths
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("MonitoredPath", id))?
            .team_id),
        Resource::File(id) => Ok(&mut catalog.file_mut(id)?.team_id),
        Resource::Mapping(id) => Ok(&mut catalog
            .mappings
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("ColumnMapping", id))?
            .team_id),
        Resource::ArbitraryFile(id) => Ok(&mut catalog
            .arbitrary_files
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("ArbitraryFile", id))?
            .team_id),
        _ => Err(Error::bad_request(
            "this resource cannot be reassigned between teams",
        )),
    }
}

/// Moves a resource to another team.
///
/// The principal must hold the edit capability under the current owner
/// AND under the destination team, so a resource cannot be pushed into a
/// team the caller has no standing in.
pub fn reassign_team(
    catalog: &mut Catalog,
    principal: &Principal,
    resource: Resource,
    destination: TeamId,
) -> Result<()> {
    let scopes = scopes_for(catalog, principal);
    let acl = resolve_acl(catalog, resource)?;
    let dest_team = catalog.team(destination)?;
    if !scopes.is_service {
        let current_level = level_for(&scopes, &acl);
        if current_level < acl.thresholds.edit && current_level < AccessLevel::LabAdmin {
            return Err(Error::forbidden(
                "edit capability in the current team is required to reassign",
            ));
        }
        let dest_acl = ResourceAcl {
            lab_id: Some(dest_team.lab_id),
            team_id: Some(destination),
            thresholds: acl.thresholds,
        };
        let dest_level = level_for(&scopes, &dest_acl);
        if dest_level < acl.thresholds.edit && dest_level < AccessLevel::LabAdmin {
            return Err(Error::forbidden(
                "edit capability in the destination team is required to reassign",
            ));
        }
    }
    *owning_team_mut(catalog, resource)? = destination;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::Fixture;

    #[test]
    fn levels_resolve_from_membership() {
        let f = Fixture::new();
        let acl = resolve_acl(&f.catalog, Resource::Mapping(f.mapping_id)).expect("acl");

        let member = scopes_for(&f.catalog, &Principal::User(f.member_id));
        assert_eq!(level_for(&member, &acl), AccessLevel::TeamMember);

        let admin = scopes_for(&f.catalog, &Principal::User(f.team_admin_id));
        assert_eq!(level_for(&admin, &acl), AccessLevel::TeamAdmin);

        let lab_admin = scopes_for(&f.catalog, &Principal::User(f.lab_admin_id));
        assert_eq!(level_for(&lab_admin, &acl), AccessLevel::LabAdmin);

        // Same lab, different team: lab member only.
        let outsider = scopes_for(&f.catalog, &Principal::User(f.outsider_id));
        assert_eq!(level_for(&outsider, &acl), AccessLevel::LabMember);

        assert_eq!(
            level_for(&scopes_for(&f.catalog, &Principal::Anonymous), &acl),
            AccessLevel::Anonymous
        );
    }

    #[test]
    fn capabilities_follow_thresholds() {
        let f = Fixture::new();
        let mapping = Resource::Mapping(f.mapping_id);
        let member = Principal::User(f.member_id);
        let outsider = Principal::User(f.outsider_id);

        // Default thresholds: read LAB_MEMBER, edit/delete TEAM_MEMBER.
        assert!(capability(&f.catalog, &member, mapping, AccessKind::Edit).expect("check"));
        assert!(capability(&f.catalog, &outsider, mapping, AccessKind::Read).expect("check"));
        assert!(!capability(&f.catalog, &outsider, mapping, AccessKind::Edit).expect("check"));
        assert!(!capability(&f.catalog, &Principal::Anonymous, mapping, AccessKind::Read)
            .expect("check"));
    }

    #[test]
    fn lab_admin_holds_every_capability() {
        let f = Fixture::new();
        let lab_admin = Principal::User(f.lab_admin_id);
        for kind in [AccessKind::Read, AccessKind::Edit, AccessKind::Delete] {
            assert!(
                capability(&f.catalog, &lab_admin, Resource::MonitoredPath(f.path_id), kind)
                    .expect("check"),
                "{kind:?}"
            );
        }
    }

    #[test]
    fn harvester_principal_has_no_generic_rights() {
        let f = Fixture::new();
        let harvester = Principal::Harvester(f.harvester_id);

        assert!(capability(
            &f.catalog,
            &harvester,
            Resource::MonitoredPath(f.path_id),
            AccessKind::Read
        )
        .expect("check"));
        assert!(!capability(
            &f.catalog,
            &harvester,
            Resource::MonitoredPath(f.path_id),
            AccessKind::Edit
        )
        .expect("check"));
        assert!(!capability(
            &f.catalog,
            &harvester,
            Resource::Mapping(f.mapping_id),
            AccessKind::Read
        )
        .expect("check"));
    }

    #[test]
    fn global_column_types_are_world_readable_and_service_managed() {
        let f = Fixture::new();
        let resource = Resource::ColumnType(f.voltage_type_id);
        assert!(capability(&f.catalog, &Principal::Anonymous, resource, AccessKind::Read)
            .expect("check"));
        assert!(!capability(
            &f.catalog,
            &Principal::User(f.team_admin_id),
            resource,
            AccessKind::Edit
        )
        .expect("check"));
        assert!(capability(&f.catalog, &Principal::Service, resource, AccessKind::Edit)
            .expect("check"));
    }

    #[test]
    fn delete_threshold_edit_requires_team_admin() {
        let mut f = Fixture::new();
        let resource = Resource::Mapping(f.mapping_id);
        let mut new = AccessThresholds::resource_default();
        new.delete = AccessLevel::TeamAdmin;

        let err = update_thresholds(&mut f.catalog, &Principal::User(f.member_id), resource, new)
            .unwrap_err();
        assert!(matches!(err, Error::Forbidden { .. }));

        update_thresholds(&mut f.catalog, &Principal::User(f.team_admin_id), resource, new)
            .expect("team admin may change the delete threshold");
        assert_eq!(
            f.catalog.mapping(f.mapping_id).expect("mapping").thresholds.delete,
            AccessLevel::TeamAdmin
        );
    }

    #[test]
    fn non_monotonic_thresholds_are_rejected_not_clamped() {
        let mut f = Fixture::new();
        let bad = AccessThresholds {
            read: AccessLevel::TeamAdmin,
            edit: AccessLevel::TeamMember,
            delete: AccessLevel::TeamAdmin,
        };
        let err = update_thresholds(
            &mut f.catalog,
            &Principal::User(f.team_admin_id),
            Resource::Mapping(f.mapping_id),
            bad,
        )
        .unwrap_err();
        assert!(matches!(err, Error::BadRequest { .. }));
        // Unchanged.
        assert_eq!(
            f.catalog.mapping(f.mapping_id).expect("mapping").thresholds,
            AccessThresholds::resource_default()
        );
    }

    #[test]
    fn reassignment_requires_standing_in_both_teams() {
        let mut f = Fixture::new();
        let resource = Resource::Mapping(f.mapping_id);

        // Member of the source team only.
        let err = reassign_team(
            &mut f.catalog,
            &Principal::User(f.member_id),
            resource,
            f.other_team_id,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Forbidden { .. }));

        // Lab admin stands above both teams.
        reassign_team(
            &mut f.catalog,
            &Principal::User(f.lab_admin_id),
            resource,
            f.other_team_id,
        )
        .expect("lab admin may reassign");
        assert_eq!(
            f.catalog.mapping(f.mapping_id).expect("mapping").team_id,
            f.other_team_id
        );
    }
}
