//! `OpenAPI` specification generation for `volta-api`.

use utoipa::openapi::security::{ApiKey, ApiKeyValue, HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

/// `OpenAPI` documentation for the Volta REST API.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Volta API",
        description = "Battery-cycler test-data platform REST API"
    ),
    paths(
        crate::routes::report::submit_report,
        crate::routes::files::upload_file,
        crate::routes::files::get_file,
        crate::routes::files::assign_mapping,
        crate::routes::files::list_path_files,
        crate::routes::mappings::create_mapping,
        crate::routes::mappings::get_mapping,
        crate::routes::mappings::update_mapping,
        crate::routes::storage::list_storage_types,
        crate::routes::storage::get_usage,
        crate::routes::permissions::lab_permissions,
        crate::routes::permissions::team_permissions,
        crate::routes::permissions::file_permissions,
        crate::routes::permissions::mapping_permissions,
        crate::routes::permissions::monitored_path_permissions,
    ),
    components(
        schemas(
            crate::error::ApiErrorBody,
            crate::routes::report::ReportResponse,
            crate::routes::files::FileResponse,
            crate::routes::files::UploadResponse,
            crate::routes::files::AssignMappingRequest,
            crate::routes::files::ListFilesResponse,
            crate::routes::mappings::MappingRuleBody,
            crate::routes::mappings::CreateMappingRequest,
            crate::routes::mappings::UpdateMappingRequest,
            crate::routes::mappings::MappingResponse,
            crate::routes::storage::StorageTypeResponse,
            crate::routes::storage::ListStorageTypesResponse,
            crate::routes::storage::StorageUsageResponse,
            crate::routes::permissions::PermissionsResponse,
        )
    ),
    tags(
        (name = "report", description = "Harvester report ingestion"),
        (name = "files", description = "Observed files and direct uploads"),
        (name = "mappings", description = "Column mappings"),
        (name = "storage", description = "Storage quota status"),
        (name = "permissions", description = "Capability flags"),
    ),
    modifiers(&SecurityAddon),
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearerAuth",
            SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
        );
        components.add_security_scheme(
            "harvesterKey",
            SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new("Authorization"))),
        );
    }
}

/// Returns the generated `OpenAPI` spec.
#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_includes_every_route() {
        let spec = openapi();
        // Version defaults from the package manifest.
        assert!(!spec.info.version.is_empty());
        let paths = &spec.paths.paths;
        for expected in [
            "/report",
            "/files",
            "/files/{id}",
            "/files/{id}/mapping",
            "/monitored_paths/{id}/files",
            "/mappings",
            "/mappings/{id}",
            "/labs/{id}/storage_types",
            "/storage_types/{id}/usage",
            "/files/{id}/permissions",
        ] {
            assert!(paths.contains_key(expected), "missing path: {expected}");
        }
    }
}
