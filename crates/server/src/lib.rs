//! HTTP server for stowage stores.
//!
//! This crate provides:
//! - The [`Store`] pipeline: validation, backend writes, copies, deletes
//! - The staging area chunks are appended to before completion
//! - Raw transfer routes and the JSON upload API
//! - Error mapping, metrics and startup wiring

pub mod bootstrap;
pub mod compression;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod registry;
pub mod routes;
pub mod staging;
pub mod state;
pub mod store;
pub mod transform;

pub use error::ApiError;
pub use registry::{RegistryError, StoreRegistry};
pub use routes::create_router;
pub use state::AppState;
pub use store::{Store, StoreError, StoreResult};
pub use transform::{ReadTransform, WriteTransform};
