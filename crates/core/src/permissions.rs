//! Insert/update/remove predicates gating metadata mutations.

use crate::file::FileRecord;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

type Check = Arc<dyn Fn(Option<&str>, &FileRecord) -> bool + Send + Sync>;

/// Static permissions loadable from configuration.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PermissionsConfig {
    #[serde(default = "allow")]
    pub insert: bool,
    #[serde(default = "allow")]
    pub update: bool,
    #[serde(default = "allow")]
    pub remove: bool,
}

fn allow() -> bool {
    true
}

impl Default for PermissionsConfig {
    fn default() -> Self {
        Self {
            insert: true,
            update: true,
            remove: true,
        }
    }
}

/// Per-store permission predicates. Unset predicates allow everything.
///
/// Each predicate receives the acting user id (if any) and the record the
/// mutation targets.
#[derive(Clone, Default)]
pub struct StorePermissions {
    insert: Option<Check>,
    update: Option<Check>,
    remove: Option<Check>,
}

impl fmt::Debug for StorePermissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorePermissions")
            .field("insert", &self.insert.is_some())
            .field("update", &self.update.is_some())
            .field("remove", &self.remove.is_some())
            .finish()
    }
}

impl StorePermissions {
    pub fn allow_all() -> Self {
        Self::default()
    }

    pub fn from_config(config: &PermissionsConfig) -> Self {
        let fixed = |allowed: bool| -> Option<Check> {
            (!allowed).then(|| Arc::new(|_: Option<&str>, _: &FileRecord| false) as Check)
        };
        Self {
            insert: fixed(config.insert),
            update: fixed(config.update),
            remove: fixed(config.remove),
        }
    }

    pub fn insert<F>(mut self, f: F) -> Self
    where
        F: Fn(Option<&str>, &FileRecord) -> bool + Send + Sync + 'static,
    {
        self.insert = Some(Arc::new(f));
        self
    }

    pub fn update<F>(mut self, f: F) -> Self
    where
        F: Fn(Option<&str>, &FileRecord) -> bool + Send + Sync + 'static,
    {
        self.update = Some(Arc::new(f));
        self
    }

    pub fn remove<F>(mut self, f: F) -> Self
    where
        F: Fn(Option<&str>, &FileRecord) -> bool + Send + Sync + 'static,
    {
        self.remove = Some(Arc::new(f));
        self
    }

    pub fn check_insert(&self, user_id: Option<&str>, file: &FileRecord) -> bool {
        Self::eval(&self.insert, user_id, file)
    }

    pub fn check_update(&self, user_id: Option<&str>, file: &FileRecord) -> bool {
        Self::eval(&self.update, user_id, file)
    }

    pub fn check_remove(&self, user_id: Option<&str>, file: &FileRecord) -> bool {
        Self::eval(&self.remove, user_id, file)
    }

    fn eval(check: &Option<Check>, user_id: Option<&str>, file: &FileRecord) -> bool {
        check.as_ref().is_none_or(|f| f(user_id, file))
    }
}
