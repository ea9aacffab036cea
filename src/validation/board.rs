//! Write-once result slots, one per selected problem.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use tracing::warn;

use super::result::ValidationResult;

/// Shared result board. Each problem id has exactly one slot; the first
/// publish wins and later ones are rejected.
#[derive(Debug, Default)]
pub struct ResultBoard {
    slots: BTreeMap<String, OnceLock<ValidationResult>>,
}

impl ResultBoard {
    pub fn new(ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            slots: ids.into_iter().map(|id| (id.into(), OnceLock::new())).collect(),
        }
    }

    /// Stores `result` in its slot. Returns false for an unknown id or a
    /// slot that is already filled.
    pub fn publish(&self, result: ValidationResult) -> bool {
        let Some(slot) = self.slots.get(&result.problem_id) else {
            warn!(problem_id = %result.problem_id, "Dropping result for unselected problem");
            return false;
        };
        let id = result.problem_id.clone();
        if slot.set(result).is_err() {
            warn!(problem_id = %id, "Result already published, ignoring duplicate");
            return false;
        }
        true
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of filled slots.
    pub fn published(&self) -> usize {
        self.slots.values().filter(|slot| slot.get().is_some()).count()
    }

    /// Every slot in id order. Empty slots become `cancelled` results.
    pub fn results(&self) -> Vec<ValidationResult> {
        self.slots
            .iter()
            .map(|(id, slot)| {
                slot.get()
                    .cloned()
                    .unwrap_or_else(|| ValidationResult::cancelled(id.as_str()))
            })
            .collect()
    }
}
