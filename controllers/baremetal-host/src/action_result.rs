//! Outcome of one state-machine pass.
//!
//! Every handler returns an [`ActionResult`]. The controller persists the
//! host status when the result is [dirty](ActionResult::dirty) and turns the
//! result into a requeue decision with [`ActionResult::into_action`].

use crate::backoff::calculate_backoff;
use crds::ErrorType;
use ironic_client::IronicError;
use kube_runtime::controller::Action;
use rand::Rng;
use std::time::Duration;

#[derive(Debug)]
pub enum ActionResult {
    /// Check back after the delay; status unchanged
    Continue(Duration),
    /// Persist status, then check back after the delay
    Update(Duration),
    /// Persist status and back off: the backend has no capacity
    Delayed,
    /// Persist status and run the next state right away
    Complete,
    /// The host may be removed; nothing left to reconcile
    DeleteComplete,
    /// The backend reported a failure that is now recorded on the host
    Failed {
        dirty: bool,
        error_type: ErrorType,
        error_count: u32,
    },
    /// Transport failure, handed to the controller's error policy
    Error(IronicError),
}

impl ActionResult {
    /// `Continue` with no delay.
    #[must_use]
    pub fn continue_now() -> Self {
        Self::Continue(Duration::ZERO)
    }

    /// `Update` with no delay.
    #[must_use]
    pub fn update_now() -> Self {
        Self::Update(Duration::ZERO)
    }

    /// Whether status must be saved before the next pass.
    #[must_use]
    pub fn dirty(&self) -> bool {
        match self {
            Self::Update(_) | Self::Delayed | Self::Complete => true,
            Self::Failed { dirty, .. } => *dirty,
            Self::Continue(_) | Self::DeleteComplete | Self::Error(_) => false,
        }
    }

    /// True for a transport error saying the backend lost the node.
    #[must_use]
    pub fn needs_registration(&self) -> bool {
        matches!(self, Self::Error(IronicError::NeedsRegistration))
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete)
    }

    /// Error count of a `Failed` result, if this is one.
    #[must_use]
    pub fn failed_count(&self) -> Option<u32> {
        match self {
            Self::Failed { error_count, .. } => Some(*error_count),
            _ => None,
        }
    }

    /// Short name for logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Continue(_) => "continue",
            Self::Update(_) => "update",
            Self::Delayed => "delayed",
            Self::Complete => "complete",
            Self::DeleteComplete => "delete complete",
            Self::Failed { .. } => "failed",
            Self::Error(_) => "error",
        }
    }

    /// Requeue decision for the controller runtime.
    ///
    /// # Errors
    ///
    /// An `Error` result returns its error so the error policy applies.
    pub fn into_action<R: Rng>(self, rng: &mut R) -> Result<Action, IronicError> {
        match self {
            Self::Continue(delay) | Self::Update(delay) => Ok(Action::requeue(delay)),
            Self::Delayed => Ok(Action::requeue(calculate_backoff(1, rng))),
            Self::Complete => Ok(Action::requeue(Duration::ZERO)),
            Self::DeleteComplete => Ok(Action::await_change()),
            Self::Failed { error_count, .. } => Ok(Action::requeue(calculate_backoff(error_count, rng))),
            Self::Error(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_dirty_flags() {
        assert!(!ActionResult::Continue(Duration::from_secs(5)).dirty());
        assert!(ActionResult::Update(Duration::from_secs(5)).dirty());
        assert!(ActionResult::Delayed.dirty());
        assert!(ActionResult::Complete.dirty());
        assert!(!ActionResult::DeleteComplete.dirty());
        assert!(!ActionResult::Error(IronicError::NeedsRegistration).dirty());
        let failed = ActionResult::Failed {
            dirty: true,
            error_type: ErrorType::ProvisioningError,
            error_count: 2,
        };
        assert!(failed.dirty(), "Recorded failures must be saved");
    }

    #[test]
    fn test_actions() {
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(
            ActionResult::Continue(Duration::from_secs(30)).into_action(&mut rng).unwrap(),
            Action::requeue(Duration::from_secs(30))
        );
        assert_eq!(
            ActionResult::DeleteComplete.into_action(&mut rng).unwrap(),
            Action::await_change(),
            "Deleted hosts are not requeued"
        );
        assert!(ActionResult::Error(IronicError::Api("boom".to_string()))
            .into_action(&mut rng)
            .is_err());
    }

    #[test]
    fn test_failed_backoff_matches_calculator() {
        let failed = ActionResult::Failed {
            dirty: true,
            error_type: ErrorType::InspectionError,
            error_count: 4,
        };
        let action = failed.into_action(&mut StdRng::seed_from_u64(9)).unwrap();
        let expected = calculate_backoff(4, &mut StdRng::seed_from_u64(9));
        assert_eq!(action, Action::requeue(expected), "Failed should use the error count");
    }

    #[test]
    fn test_delayed_uses_first_backoff_step() {
        let action = ActionResult::Delayed.into_action(&mut StdRng::seed_from_u64(5)).unwrap();
        let expected = calculate_backoff(1, &mut StdRng::seed_from_u64(5));
        assert_eq!(action, Action::requeue(expected));
    }

    #[test]
    fn test_needs_registration() {
        assert!(ActionResult::Error(IronicError::NeedsRegistration).needs_registration());
        assert!(!ActionResult::Error(IronicError::Api("x".to_string())).needs_registration());
        assert!(!ActionResult::Complete.needs_registration());
    }
}
