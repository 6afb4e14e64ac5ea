//! Admission rules applied to a file before a store accepts it.

use crate::file::FileRecord;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Why a filter rejected a file. Only the first failing rule is reported.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FilterError {
    #[error("file size {size} is below the minimum of {min} bytes")]
    TooSmall { size: u64, min: u64 },

    #[error("file size {size} exceeds the maximum of {max} bytes")]
    TooLarge { size: u64, max: u64 },

    #[error("file extension {0:?} is not allowed")]
    Extension(String),

    #[error("file type {0:?} is not allowed")]
    ContentType(String),

    #[error("file rejected by custom check")]
    Rejected,
}

/// Declarative part of a filter, loadable from configuration.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FilterConfig {
    /// Minimum accepted size in bytes.
    #[serde(default = "default_min_size")]
    pub min_size: u64,
    /// Maximum accepted size in bytes, 0 for unlimited.
    #[serde(default)]
    pub max_size: u64,
    /// Allowed lower-case extensions. `None` allows any.
    #[serde(default)]
    pub extensions: Option<Vec<String>>,
    /// Allowed MIME types. An entry like `image/*` matches any `image/` subtype.
    #[serde(default)]
    pub content_types: Option<Vec<String>>,
}

fn default_min_size() -> u64 {
    1
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_size: default_min_size(),
            max_size: 0,
            extensions: None,
            content_types: None,
        }
    }
}

type Predicate = Arc<dyn Fn(&FileRecord) -> bool + Send + Sync>;

/// Immutable file filter.
#[derive(Clone, Default)]
pub struct Filter {
    config: FilterConfig,
    check: Option<Predicate>,
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Filter")
            .field("config", &self.config)
            .field("custom_check", &self.check.is_some())
            .finish()
    }
}

impl Filter {
    pub fn new(config: FilterConfig) -> Self {
        Self {
            config,
            check: None,
        }
    }

    /// Add a custom predicate, evaluated after every declarative rule.
    pub fn with_check<F>(mut self, check: F) -> Self
    where
        F: Fn(&FileRecord) -> bool + Send + Sync + 'static,
    {
        self.check = Some(Arc::new(check));
        self
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    /// Validate a file, reporting the first rule it breaks.
    pub fn check(&self, file: &FileRecord) -> Result<(), FilterError> {
        let config = &self.config;

        if file.size == 0 || file.size < config.min_size {
            return Err(FilterError::TooSmall {
                size: file.size,
                min: config.min_size,
            });
        }
        if config.max_size > 0 && file.size > config.max_size {
            return Err(FilterError::TooLarge {
                size: file.size,
                max: config.max_size,
            });
        }

        if let Some(allowed) = &config.extensions {
            let ext = file.extension.as_deref().unwrap_or_default();
            if !allowed.iter().any(|a| a == ext) {
                return Err(FilterError::Extension(ext.to_string()));
            }
        }

        if let Some(allowed) = &config.content_types {
            let content_type = file.content_type.as_deref().unwrap_or_default();
            if !allowed.iter().any(|a| content_type_matches(a, content_type)) {
                return Err(FilterError::ContentType(content_type.to_string()));
            }
        }

        if let Some(check) = &self.check
            && !check(file)
        {
            return Err(FilterError::Rejected);
        }

        Ok(())
    }

    /// Like [`Filter::check`] but never fails.
    pub fn is_valid(&self, file: &FileRecord) -> bool {
        self.check(file).is_ok()
    }
}

fn content_type_matches(pattern: &str, content_type: &str) -> bool {
    match pattern.strip_suffix("/*") {
        Some(major) => content_type
            .split_once('/')
            .is_some_and(|(m, _)| m == major),
        None => pattern == content_type,
    }
}
