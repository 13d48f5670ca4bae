use serde::{Deserialize, Serialize};
use std::fmt;

use super::model::MigrationStage;

/// A transition that the stage graph does not allow.
///
/// This is a recoverable, reported error: the caller decides whether to
/// retry, surface it to the user, or force a reset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidMigrationStageError {
    /// Stage the migration was in when the transition was attempted.
    pub from: MigrationStage,
    /// Stage that was requested.
    pub to: MigrationStage,
    /// Optional caller-supplied context, shown before the stage names.
    pub context: Option<String>,
}

impl InvalidMigrationStageError {
    pub fn new(from: MigrationStage, to: MigrationStage) -> Self {
        Self {
            from,
            to,
            context: None,
        }
    }

    /// Blank contexts are dropped.
    pub fn with_context(from: MigrationStage, to: MigrationStage, context: impl Into<String>) -> Self {
        let context = context.into();
        Self {
            from,
            to,
            context: if context.trim().is_empty() {
                None
            } else {
                Some(context)
            },
        }
    }
}

impl fmt::Display for InvalidMigrationStageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(context) = &self.context {
            write!(f, "{}. ", context)?;
        }
        write!(f, "Attempt to migrate from `{}` to `{}`", self.from, self.to)
    }
}

impl std::error::Error for InvalidMigrationStageError {}
