//! Instance identification and resolution
//!
//! An [`InstanceId`] names a logical SQL-Server-family endpoint without
//! committing to how it is physically reached. Resolution to an actual
//! connection string happens through an [`InstanceResolver`], which tries,
//! in order: an ad-hoc registration map, a literal-string connection prefix
//! (`server=...`), then a configured alias table.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::{DataAccessError, Result};

/// A logical handle naming a SQL-Server-family endpoint.
///
/// Two `InstanceId`s compare equal iff their names are equal; resolution is
/// handled separately by [`InstanceResolver`], so the same name can resolve
/// to different connection strings across processes without code changes.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub struct InstanceId(String);

impl InstanceId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for InstanceId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for InstanceId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Prefix that marks an `InstanceId` as carrying its own ADO.NET-style
/// connection string rather than an alias to be looked up. Matched
/// case-insensitively since `Server=` is the conventional casing.
const LITERAL_PREFIX: &str = "server=";

/// Resolves an [`InstanceId`] to a connection string.
///
/// Resolution order, first match wins:
/// 1. An ad-hoc entry registered via [`register`](Self::register).
/// 2. The id itself, if it begins with `server=` (a literal connection string).
/// 3. A configured alias, loaded via [`with_aliases`](Self::with_aliases) or
///    added with [`set_alias`](Self::set_alias).
///
/// Resolution failure is fail-fast: there is no implicit default instance.
pub struct InstanceResolver {
    ad_hoc: RwLock<HashMap<InstanceId, String>>,
    aliases: RwLock<HashMap<InstanceId, String>>,
}

impl InstanceResolver {
    pub fn new() -> Self {
        Self {
            ad_hoc: RwLock::new(HashMap::new()),
            aliases: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_aliases(aliases: HashMap<InstanceId, String>) -> Self {
        Self {
            ad_hoc: RwLock::new(HashMap::new()),
            aliases: RwLock::new(aliases),
        }
    }

    /// Register an ad-hoc connection string for an instance, taking
    /// precedence over both the literal-prefix rule and configured aliases.
    pub fn register(&self, id: InstanceId, connection_string: impl Into<String>) {
        self.ad_hoc.write().unwrap().insert(id, connection_string.into());
    }

    pub fn unregister(&self, id: &InstanceId) {
        self.ad_hoc.write().unwrap().remove(id);
    }

    pub fn set_alias(&self, id: InstanceId, connection_string: impl Into<String>) {
        self.aliases.write().unwrap().insert(id, connection_string.into());
    }

    /// Resolve an instance id to a connection string, fail-fast on miss.
    pub fn resolve(&self, id: &InstanceId) -> Result<String> {
        if let Some(cs) = self.ad_hoc.read().unwrap().get(id) {
            return Ok(cs.clone());
        }

        if id.as_str().len() >= LITERAL_PREFIX.len()
            && id.as_str()[..LITERAL_PREFIX.len()].eq_ignore_ascii_case(LITERAL_PREFIX)
        {
            return Ok(id.as_str().to_string());
        }

        if let Some(cs) = self.aliases.read().unwrap().get(id) {
            return Ok(cs.clone());
        }

        Err(DataAccessError::NotFound(format!(
            "no connection string registered, literal, or aliased for instance '{id}'"
        )))
    }
}

impl Default for InstanceResolver {
    fn default() -> Self {
        Self::new()
    }
}
