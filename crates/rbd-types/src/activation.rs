//! Activation (sleep) state machine for rigid bodies.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Activation state of a rigid body.
///
/// Bodies that stay below their sleep thresholds for long enough are taken
/// out of the simulation until something disturbs them. The transitions are:
///
/// - `Active` → `WantsDeactivation`: the body's island voted to sleep but a
///   neighbor is still awake.
/// - `WantsDeactivation` → `Sleeping`: every member of the island is ready.
/// - `Sleeping` → `Active`: an external wake-up (contact with a kinematic
///   body, explicit activation, velocity spike).
/// - `AlwaysActive` never leaves its state through the automatic machinery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ActivationState {
    /// Simulated normally.
    #[default]
    Active,
    /// Below sleep thresholds; waiting for the rest of the island.
    WantsDeactivation,
    /// Asleep: velocities are zeroed and the body is skipped by integration.
    Sleeping,
    /// Deactivation is disabled for this body.
    AlwaysActive,
}

impl ActivationState {
    /// Whether the body participates in integration and solving.
    ///
    /// `WantsDeactivation` still counts as active: the body keeps moving
    /// until its whole island agrees to sleep.
    #[must_use]
    pub fn is_active(self) -> bool {
        !matches!(self, Self::Sleeping)
    }

    /// Whether the body is asleep.
    #[must_use]
    pub fn is_sleeping(self) -> bool {
        matches!(self, Self::Sleeping)
    }

    /// Whether the automatic sleep machinery may change this state.
    #[must_use]
    pub fn can_deactivate(self) -> bool {
        !matches!(self, Self::AlwaysActive)
    }
}
