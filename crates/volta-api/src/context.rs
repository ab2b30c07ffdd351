//! Request context extraction.
//!
//! Callers authenticate with an `Authorization` header in one of two
//! schemes: `Bearer <token>` for users (and the service credential) or
//! `Harvester <api-key>` for harvester agents. A missing header yields
//! the anonymous principal; each route decides what anonymous may do.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue};

use volta_core::Principal;

use crate::error::ApiError;
use crate::server::AppState;

/// Per-request caller identity.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// The resolved principal.
    pub principal: Principal,
    /// Raw harvester credential, kept because report ingestion
    /// authenticates (and records check-ins) by key.
    pub harvester_key: Option<String>,
    /// Request ID for tracing/correlation.
    pub request_id: String,
}

impl RequestContext {
    /// Returns the harvester credential or a 401 for non-harvester callers.
    pub fn require_harvester_key(&self) -> Result<&str, ApiError> {
        self.harvester_key
            .as_deref()
            .ok_or_else(|| ApiError::unauthorized("this endpoint requires a harvester credential"))
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for RequestContext {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        if let Some(existing) = parts.extensions.get::<Self>() {
            return Ok(existing.clone());
        }

        let headers = &parts.headers;
        let request_id = header_string(headers, "X-Request-Id")
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let ctx = match header_string(headers, "Authorization") {
            None => Self {
                principal: Principal::Anonymous,
                harvester_key: None,
                request_id,
            },
            Some(raw) => {
                if let Some(token) = raw.strip_prefix("Bearer ") {
                    let principal = state
                        .store
                        .read(|catalog| {
                            let user = catalog.user_by_token(token)?;
                            Ok(if user.is_service {
                                Principal::Service
                            } else {
                                Principal::User(user.id)
                            })
                        })
                        .map_err(ApiError::from)?;
                    Self {
                        principal,
                        harvester_key: None,
                        request_id,
                    }
                } else if let Some(key) = raw.strip_prefix("Harvester ") {
                    let harvester_id = state
                        .store
                        .read(|catalog| Ok(catalog.harvester_by_key(key)?.id))
                        .map_err(ApiError::from)?;
                    Self {
                        principal: Principal::Harvester(harvester_id),
                        harvester_key: Some(key.to_string()),
                        request_id,
                    }
                } else {
                    return Err(ApiError::unauthorized(
                        "Authorization must use the Bearer or Harvester scheme",
                    ));
                }
            }
        };

        parts.extensions.insert(ctx.clone());
        Ok(ctx)
    }
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers.get(name).and_then(header_value_to_string)
}

fn header_value_to_string(value: &HeaderValue) -> Option<String> {
    value.to_str().ok().map(str::to_string)
}
