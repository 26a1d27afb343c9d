//! Shapes shared by every upstream.

use serde::{Deserialize, Serialize};

use crate::{MimirError, Result};

/// Outcome of a point lookup: the record, or an explicit "no such id".
///
/// A missing identifier is an expected outcome, not a failure, so callers
/// can tell it apart from upstream errors.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "result", rename_all = "snake_case")]
pub enum Lookup<T> {
    Found(T),
    NotFound { id: String },
}

impl<T> Lookup<T> {
    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }

    pub fn found(self) -> Option<T> {
        match self {
            Self::Found(value) => Some(value),
            Self::NotFound { .. } => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Lookup<U> {
        match self {
            Self::Found(value) => Lookup::Found(f(value)),
            Self::NotFound { id } => Lookup::NotFound { id },
        }
    }
}

/// Which way to walk a hierarchy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Parents,
    #[default]
    Children,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Parents => "parents",
            Self::Children => "children",
        }
    }
}

/// Turn a not-found failure into [`Lookup::NotFound`].
pub(crate) fn lookup<T>(id: &str, result: Result<T>) -> Result<Lookup<T>> {
    match result {
        Ok(value) => Ok(Lookup::Found(value)),
        Err(MimirError::NotFound(_)) => Ok(Lookup::NotFound { id: id.to_string() }),
        Err(e) => Err(e),
    }
}

/// List operations treat not-found as an empty result.
pub(crate) fn or_empty<T>(result: Result<Vec<T>>) -> Result<Vec<T>> {
    match result {
        Err(MimirError::NotFound(_)) => Ok(Vec::new()),
        other => other,
    }
}
