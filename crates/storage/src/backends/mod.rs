//! Store backend implementations.

pub mod filesystem;
pub mod s3;
