use async_trait::async_trait;
use flake_selector::Selector;

use crate::error::CommandResult;
use crate::metadata::FlakeMetadata;

/// Result of evaluating a concrete selector.
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluated {
    Value(serde_json::Value),
    /// An optional segment of the selector does not exist.
    Absent,
}

impl Evaluated {
    pub fn into_value(self) -> Option<serde_json::Value> {
        match self {
            Evaluated::Value(value) => Some(value),
            Evaluated::Absent => None,
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Evaluated::Absent)
    }
}

/// The evaluator operations the flake cache depends on.
///
/// [`crate::NixCommand`] implements this by running `nix`; tests substitute their own.
#[async_trait]
pub trait FlakeEvaluator: Send + Sync {
    /// Evaluate a concrete selector to JSON.
    async fn evaluate(&self, flake: &str, selector: &Selector) -> CommandResult<Evaluated>;

    /// The output tree reported by `nix flake show --json`.
    async fn flake_show(&self, flake: &str) -> CommandResult<serde_json::Value>;

    async fn metadata(&self, flake: &str) -> CommandResult<FlakeMetadata>;
}
