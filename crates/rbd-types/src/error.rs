//! Error types for simulation operations.

use thiserror::Error;

/// Errors that can occur during simulation.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SimError {
    /// Invalid body ID referenced.
    #[error("invalid body ID: {0}")]
    InvalidBodyId(u64),

    /// A body with this ID already exists in the world.
    #[error("duplicate body ID: {0}")]
    DuplicateBodyId(u64),

    /// Invalid constraint ID referenced.
    #[error("invalid constraint ID: {0}")]
    InvalidConstraintId(u64),

    /// A constraint with this ID already exists in the world.
    #[error("duplicate constraint ID: {0}")]
    DuplicateConstraintId(u64),

    /// A body cannot be removed while constraints still reference it.
    #[error("body {body_id} still referenced by {count} constraint(s)")]
    BodyHasConstraints {
        /// The body that could not be removed.
        body_id: u64,
        /// Number of constraints still attached.
        count: usize,
    },

    /// Invalid timestep.
    #[error("invalid timestep: {0} (must be positive and finite)")]
    InvalidTimestep(f64),

    /// Simulation diverged (`NaN` or `Inf` detected).
    #[error("simulation diverged: {reason}")]
    Diverged {
        /// Description of what went wrong.
        reason: String,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// Description of the configuration error.
        reason: String,
    },

    /// Invalid mass properties.
    #[error("invalid mass properties: {reason}")]
    InvalidMassProperties {
        /// Description of what's wrong.
        reason: String,
    },
}

impl SimError {
    /// Create a diverged error.
    #[must_use]
    pub fn diverged(reason: impl Into<String>) -> Self {
        Self::Diverged {
            reason: reason.into(),
        }
    }

    /// Create an invalid configuration error.
    #[must_use]
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Create an invalid mass properties error.
    #[must_use]
    pub fn invalid_mass(reason: impl Into<String>) -> Self {
        Self::InvalidMassProperties {
            reason: reason.into(),
        }
    }

    /// Check if this is a divergence error.
    #[must_use]
    pub fn is_diverged(&self) -> bool {
        matches!(self, Self::Diverged { .. })
    }

    /// Check if this is a configuration error.
    #[must_use]
    pub fn is_config_error(&self) -> bool {
        matches!(self, Self::InvalidConfig { .. })
    }

    /// Check if this is a dangling-reference error on body removal.
    #[must_use]
    pub fn is_body_has_constraints(&self) -> bool {
        matches!(self, Self::BodyHasConstraints { .. })
    }
}
