//! Core domain types for the stowage upload service.
//!
//! This crate defines the data model shared by every other crate:
//! - File identifiers, records and client descriptors
//! - Admission filters and store permissions
//! - Upload token generation
//! - Configuration

pub mod config;
pub mod error;
pub mod file;
pub mod filter;
pub mod mime;
pub mod permissions;
pub mod token;

pub use error::{Error, Result};
pub use file::{FileDescriptor, FileId, FileRecord, FileUpdate, extension_of};
pub use filter::{Filter, FilterConfig, FilterError};
pub use permissions::{PermissionsConfig, StorePermissions};
pub use token::{generate_token, new_token};

/// Default client chunk size: 16 KiB
pub const DEFAULT_CHUNK_SIZE: usize = 16 * 1024;

/// Default upper bound for adaptive client chunks.
pub const MAX_CLIENT_CHUNK_SIZE: usize = 4 * 1024 * 1000;

/// Largest chunk body the server accepts: 32 MiB
pub const MAX_CHUNK_BYTES: usize = 32 * 1024 * 1024;
