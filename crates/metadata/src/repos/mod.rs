//! Repository traits for metadata operations.

pub mod files;
pub mod tokens;

pub use files::FileRepo;
pub use tokens::TokenRepo;
