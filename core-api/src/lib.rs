//! # Request Layer
//!
//! Normalizes every call against the content API into an [`ApiResponse`]
//! value: `{data, error}`. Failures never escape as `Err`; they are returned
//! as an [`ApiError`] tagged with one of the [`ApiErrorKind`] categories.
//!
//! ## Shape helpers
//!
//! - [`ApiClient::request`] parses the body into any `DeserializeOwned` type
//! - [`ApiClient::fetch_array`] coerces `null` to `[]` and a bare object to
//!   `[object]`
//! - [`ApiClient::fetch_object`] rejects array-shaped bodies with
//!   `"Response is not an object"`
//!
//! No retries happen here; reconnect policy belongs to the realtime layer.

pub mod client;
pub mod error;
pub mod models;
pub mod resource;

pub use client::{ApiClient, RequestOptions};
pub use error::{ApiError, ApiErrorKind, ApiResponse};
pub use models::{Comment, CountryStat, Image, Project, Reaction, Track, ViewStats};
pub use resource::{ResourceName, ResourceShape};
