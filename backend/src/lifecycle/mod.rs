//! Reservation lifecycle: the status machine, the service that applies it
//! against the store, and the background sweeper.

mod locks;
mod machine;
mod service;
pub mod sweeper;

pub use locks::{KeyedGuard, KeyedLocks};
pub use machine::{
    can_apply, next_status, LifecycleEvent, Rejection, ReservationStatus, TransitionContext,
};
pub use service::{LifecycleManager, TransitionOutcome, TransitionRequest};
pub use sweeper::{run_sweeper, SweepReport, Sweeper};

use thiserror::Error;
use uuid::Uuid;

use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("Reservation {0} not found")]
    NotFound(Uuid),

    #[error("Cannot apply {event} to a reservation in {from}")]
    InvalidTransition {
        from: ReservationStatus,
        event: &'static str,
    },

    #[error("Cannot apply {event} to a reservation in {from}: {reason}")]
    PreconditionFailed {
        from: ReservationStatus,
        event: &'static str,
        reason: &'static str,
    },

    #[error("Reservation {0} was modified concurrently")]
    Conflict(Uuid),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LifecycleError {
    pub(crate) fn rejected(from: ReservationStatus, event: &LifecycleEvent, why: Rejection) -> Self {
        match why {
            Rejection::Undefined => LifecycleError::InvalidTransition {
                from,
                event: event.name(),
            },
            Rejection::Guard(reason) => LifecycleError::PreconditionFailed {
                from,
                event: event.name(),
                reason,
            },
        }
    }

    /// Refused by the transition table, as opposed to an infrastructure failure
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            LifecycleError::InvalidTransition { .. } | LifecycleError::PreconditionFailed { .. }
        )
    }
}

/// Fails fast when `event` can never apply from the reservation's status
pub fn ensure_can_apply(
    from: ReservationStatus,
    event: &LifecycleEvent,
) -> Result<(), LifecycleError> {
    if can_apply(from, event) {
        Ok(())
    } else {
        Err(LifecycleError::rejected(from, event, Rejection::Undefined))
    }
}
