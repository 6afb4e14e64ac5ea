//! HTTP request handlers.

pub mod common;
pub mod files;
pub mod health;
pub mod transfer;

pub use common::*;
pub use files::*;
pub use health::*;
pub use transfer::*;
