//! Column-mapping validation and row rendering.
//!
//! A mapping translates raw cycler column names into recognized column
//! types, optionally renaming and rescaling them. Validity and
//! missing-required-column checks are pure functions over the catalog;
//! nothing here is cached on the mapping row.

use std::collections::BTreeMap;

use serde_json::Value;

use volta_core::{AccessKind, Error, FileId, MappingId, Principal, Result};

use crate::access::{self, Resource};
use crate::entities::{ColumnRule, DataType, FileSummary};
use crate::file_state::FileState;
use crate::store::Catalog;

/// Validates mapping entries against the column-type catalog.
///
/// Rules enforced:
/// - every referenced column type must exist;
/// - a required column type may be targeted by at most one raw column;
/// - required column types keep their canonical names (`new_name` is
///   rejected);
/// - `multiplier`/`addition` apply to numeric column types only.
pub fn validate_entries(catalog: &Catalog, entries: &BTreeMap<String, ColumnRule>) -> Result<()> {
    let mut required_claims: BTreeMap<_, &str> = BTreeMap::new();
    for (raw_name, rule) in entries {
        let column_type = catalog.column_type(rule.column_type)?;
        if column_type.is_required {
            if let Some(previous) = required_claims.insert(column_type.id, raw_name) {
                return Err(Error::bad_request(format!(
                    "cannot assign column '{raw_name}' to required column type \
                     '{}': it is already assigned to column '{previous}'",
                    column_type.name
                )));
            }
            if rule.new_name.is_some() {
                return Err(Error::bad_request(format!(
                    "column '{raw_name}' maps to required column type '{}' \
                     and cannot be renamed",
                    column_type.name
                )));
            }
        }
        if (rule.multiplier.is_some() || rule.addition.is_some())
            && !matches!(column_type.data_type, DataType::Int | DataType::Float)
        {
            return Err(Error::bad_request(format!(
                "column '{raw_name}' has a rescale but column type '{}' is \
                 {}, not numeric",
                column_type.name, column_type.data_type
            )));
        }
    }
    Ok(())
}

/// Names of required column types the entries do not cover.
///
/// Recomputed on every call so newly-added required column types
/// immediately invalidate older mappings.
#[must_use]
pub fn missing_required_columns(
    catalog: &Catalog,
    entries: &BTreeMap<String, ColumnRule>,
) -> Vec<String> {
    catalog
        .column_types
        .values()
        .filter(|ct| ct.is_required)
        .filter(|ct| !entries.values().any(|rule| rule.column_type == ct.id))
        .map(|ct| ct.name.clone())
        .collect()
}

/// Whether a mapping is usable in the abstract: well-formed entries and
/// every required column type covered.
#[must_use]
pub fn is_valid(catalog: &Catalog, entries: &BTreeMap<String, ColumnRule>) -> bool {
    validate_entries(catalog, entries).is_ok() && missing_required_columns(catalog, entries).is_empty()
}

/// Checks that a mapping can be applied to a file with the given summary:
/// the mapping must be valid and every raw column it names must exist in
/// the file.
pub fn check_applicable(
    catalog: &Catalog,
    entries: &BTreeMap<String, ColumnRule>,
    summary: &FileSummary,
) -> Result<()> {
    validate_entries(catalog, entries)?;
    let missing = missing_required_columns(catalog, entries);
    if !missing.is_empty() {
        return Err(Error::bad_request(format!(
            "mapping does not cover required column types: {}",
            missing.join(", ")
        )));
    }
    let absent: Vec<&str> = entries
        .keys()
        .map(String::as_str)
        .filter(|name| !summary.contains_column(name))
        .collect();
    if !absent.is_empty() {
        return Err(Error::bad_request(format!(
            "mapping names columns absent from the file: {}",
            absent.join(", ")
        )));
    }
    Ok(())
}

/// A fully-resolved per-column rendering instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedColumn {
    /// Output column name after rename resolution.
    pub output_name: String,
    /// Output data type. A rescaled int column is promoted to float.
    pub data_type: DataType,
    pub multiplier: f64,
    pub addition: f64,
}

/// Resolves mapping entries into rendering instructions keyed by raw
/// column name.
pub fn render_plan(
    catalog: &Catalog,
    entries: &BTreeMap<String, ColumnRule>,
) -> Result<BTreeMap<String, RenderedColumn>> {
    let mut plan = BTreeMap::new();
    for (raw_name, rule) in entries {
        let column_type = catalog.column_type(rule.column_type)?;
        let rescaled = rule.multiplier.is_some() || rule.addition.is_some();
        let data_type = match column_type.data_type {
            DataType::Int if rescaled => DataType::Float,
            other => other,
        };
        plan.insert(
            raw_name.clone(),
            RenderedColumn {
                output_name: rule
                    .new_name
                    .clone()
                    .unwrap_or_else(|| column_type.name.clone()),
                data_type,
                multiplier: rule.multiplier.unwrap_or(1.0),
                addition: rule.addition.unwrap_or(0.0),
            },
        );
    }
    Ok(plan)
}

fn rescale(value: f64, column: &RenderedColumn) -> f64 {
    (value + column.addition) * column.multiplier
}

/// Coerces one raw cell according to its rendering instruction.
/// Unparseable cells become null rather than failing the import.
#[must_use]
pub fn render_value(raw: &str, column: &RenderedColumn) -> Value {
    let raw = raw.trim();
    match column.data_type {
        // Rescaled int columns are promoted to float by the plan, so an
        // int column here is always unscaled.
        DataType::Int => raw.parse::<i64>().map_or(Value::Null, Value::from),
        DataType::Float => match raw.parse::<f64>() {
            Ok(v) => Value::from(rescale(v, column)),
            Err(_) => Value::Null,
        },
        DataType::Bool => match raw.to_ascii_lowercase().as_str() {
            "true" | "1" => Value::Bool(true),
            "false" | "0" => Value::Bool(false),
            _ => Value::Null,
        },
        DataType::Str => Value::from(raw),
        DataType::Datetime => match chrono::DateTime::parse_from_rfc3339(raw) {
            Ok(dt) => Value::from(dt.to_rfc3339()),
            Err(_) => Value::Null,
        },
    }
}

/// Coerces a cell from a column the mapping does not name.
///
/// Unmapped columns keep their raw names and are treated as floats, with
/// unparseable cells rendered as null.
#[must_use]
pub fn render_unmapped_value(raw: &str) -> Value {
    raw.trim().parse::<f64>().map_or(Value::Null, Value::from)
}

/// Renders one raw row into typed output cells keyed by output name.
#[must_use]
pub fn render_row(
    plan: &BTreeMap<String, RenderedColumn>,
    raw_row: &BTreeMap<String, String>,
) -> BTreeMap<String, Value> {
    raw_row
        .iter()
        .map(|(raw_name, raw_value)| match plan.get(raw_name) {
            Some(column) => (column.output_name.clone(), render_value(raw_value, column)),
            None => (raw_name.clone(), render_unmapped_value(raw_value)),
        })
        .collect()
}

/// Assigns a mapping to a file awaiting one, moving it into `Importing`.
pub fn assign_to_file(
    catalog: &mut Catalog,
    principal: &Principal,
    file_id: FileId,
    mapping_id: MappingId,
) -> Result<()> {
    access::require_capability(catalog, principal, Resource::File(file_id), AccessKind::Edit)?;
    access::require_capability(
        catalog,
        principal,
        Resource::Mapping(mapping_id),
        AccessKind::Read,
    )?;
    let file = catalog.file(file_id)?;
    if !file.state.accepts_mapping() {
        return Err(Error::bad_request(format!(
            "file is {} and cannot take a mapping assignment",
            file.state
        )));
    }
    let summary = file.summary.clone().ok_or_else(|| {
        Error::bad_request("file has no recorded data summary to map against")
    })?;
    let mapping = catalog.mapping(mapping_id)?;
    check_applicable(catalog, &mapping.entries, &summary)?;

    let file = catalog.file_mut(file_id)?;
    file.mapping_id = Some(mapping_id);
    file.state = FileState::Importing;
    tracing::info!(file = %file_id, mapping = %mapping_id, "mapping assigned, import started");
    Ok(())
}

/// Replaces a mapping's entries.
///
/// A mapping referenced by imported or in-flight files is shared state:
/// mutating it needs edit capability on every such file, not just on
/// the mapping row. Already-imported files keep their data; the new
/// entries apply to future imports only.
pub fn update_entries(
    catalog: &mut Catalog,
    principal: &Principal,
    mapping_id: MappingId,
    entries: BTreeMap<String, ColumnRule>,
) -> Result<()> {
    access::require_capability(
        catalog,
        principal,
        Resource::Mapping(mapping_id),
        AccessKind::Edit,
    )?;
    validate_entries(catalog, &entries)?;
    let using: Vec<FileId> = catalog
        .files
        .values()
        .filter(|f| {
            f.mapping_id == Some(mapping_id)
                && matches!(f.state, FileState::Imported | FileState::Importing)
        })
        .map(|f| f.id)
        .collect();
    for file_id in using {
        if !access::capability(catalog, principal, Resource::File(file_id), AccessKind::Edit)? {
            return Err(Error::forbidden(format!(
                "mapping is in use by file {file_id}, which the caller cannot edit"
            )));
        }
    }
    catalog
        .mappings
        .get_mut(&mapping_id)
        .ok_or_else(|| Error::not_found("ColumnMapping", mapping_id))?
        .entries = entries;
    Ok(())
}
