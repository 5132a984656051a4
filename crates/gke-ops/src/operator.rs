//! Decisions the orchestrators hand back to whoever is driving them.

use tracing::warn;

use crate::error::ProvisionError;
use crate::gateway::Instance;
use crate::provision::ResourceLog;

/// The person (or policy) answering the orchestrators' questions.
///
/// The orchestrators never prompt on their own. They ask once, act on the
/// answer and move on.
pub trait Operator: Send + Sync {
    /// Whether to tear down `created` after provisioning failed with `error`.
    fn confirm_rollback(&self, error: &ProvisionError, created: &ResourceLog) -> bool;

    /// Pick which of several same-named bastions to delete, by index.
    /// `None` leaves all of them in place.
    fn choose_bastion(&self, candidates: &[Instance]) -> Option<usize>;
}

/// Fixed answers for non-interactive runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unattended {
    rollback: bool,
}

impl Unattended {
    /// Roll back whatever was created when provisioning fails.
    #[must_use]
    pub fn rollback_on_failure() -> Self {
        Self { rollback: true }
    }

    /// Leave created resources in place when provisioning fails.
    #[must_use]
    pub fn keep_on_failure() -> Self {
        Self { rollback: false }
    }
}

impl Operator for Unattended {
    fn confirm_rollback(&self, _error: &ProvisionError, _created: &ResourceLog) -> bool {
        self.rollback
    }

    fn choose_bastion(&self, candidates: &[Instance]) -> Option<usize> {
        warn!(
            count = candidates.len(),
            "Several bastions match and no one is available to choose, skipping"
        );
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unattended_answers() {
        let err = ProvisionError::NoZones {
            region: "us-central1".into(),
        };
        let log = ResourceLog::new();
        assert!(Unattended::rollback_on_failure().confirm_rollback(&err, &log));
        assert!(!Unattended::keep_on_failure().confirm_rollback(&err, &log));
        assert_eq!(Unattended::rollback_on_failure().choose_bastion(&[]), None);
    }
}
