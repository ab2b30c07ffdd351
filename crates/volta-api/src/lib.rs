//! HTTP surface for the Volta battery-data platform.
//!
//! Thin axum layer over `volta-catalog`: request authentication, body
//! parsing (JSON and multipart), error-to-status mapping, and the
//! `OpenAPI` document. All domain decisions live in the catalog.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

pub mod config;
pub mod context;
pub mod error;
pub mod openapi;
pub mod routes;
pub mod server;

pub use config::Config;
pub use error::{ApiError, ApiErrorBody};
pub use server::{AppState, Server};
