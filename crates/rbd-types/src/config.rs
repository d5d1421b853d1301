//! World and solver configuration.
//!
//! All tunables live on explicit config structs owned by the world instance;
//! there is no process-wide global state.

use nalgebra::Vector3;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Configuration for the constraint solver.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SolverConfig {
    /// Number of solver iterations per island.
    pub iterations: usize,
    /// Error reduction parameter for positional correction.
    pub erp: f64,
    /// Penetration depth tolerated without correction (m).
    pub allowed_penetration: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            iterations: 10,
            erp: 0.2,
            allowed_penetration: 0.04,
        }
    }
}

impl SolverConfig {
    /// Validate the solver configuration.
    pub fn validate(&self) -> crate::Result<()> {
        if self.iterations == 0 {
            return Err(crate::SimError::invalid_config(
                "solver iterations must be at least 1",
            ));
        }
        if !self.erp.is_finite() || !(0.0..=1.0).contains(&self.erp) {
            return Err(crate::SimError::invalid_config("erp must be in [0, 1]"));
        }
        if !self.allowed_penetration.is_finite() || self.allowed_penetration < 0.0 {
            return Err(crate::SimError::invalid_config(
                "allowed penetration must be non-negative",
            ));
        }
        Ok(())
    }
}

/// Configuration for a dynamics world.
///
/// # Example
///
/// ```
/// use rbd_types::WorldConfig;
/// use nalgebra::Vector3;
///
/// let config = WorldConfig::default()
///     .with_gravity(Vector3::new(0.0, -9.81, 0.0))
///     .with_fixed_timestep(1.0 / 120.0);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct WorldConfig {
    /// Fixed internal sub-step duration (s).
    pub fixed_timestep: f64,
    /// Maximum sub-steps executed per `step` call before time is dropped.
    pub max_sub_steps: usize,
    /// Global gravity acceleration (m/s²).
    pub gravity: Vector3<f64>,
    /// Time a body must stay below its sleep thresholds before it may sleep (s).
    pub deactivation_time: f64,
    /// Disable automatic deactivation for the whole world.
    pub deactivation_disabled: bool,
    /// Constraint solver tunables.
    pub solver: SolverConfig,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            fixed_timestep: 1.0 / 60.0,
            max_sub_steps: 1,
            gravity: Vector3::new(0.0, -10.0, 0.0),
            deactivation_time: 2.0,
            deactivation_disabled: false,
            solver: SolverConfig::default(),
        }
    }
}

impl WorldConfig {
    /// Set the gravity vector.
    #[must_use]
    pub fn with_gravity(mut self, gravity: Vector3<f64>) -> Self {
        self.gravity = gravity;
        self
    }

    /// Set the fixed sub-step duration.
    #[must_use]
    pub fn with_fixed_timestep(mut self, dt: f64) -> Self {
        self.fixed_timestep = dt;
        self
    }

    /// Set the maximum sub-steps per `step` call.
    #[must_use]
    pub fn with_max_sub_steps(mut self, max: usize) -> Self {
        self.max_sub_steps = max;
        self
    }

    /// Set the global deactivation time.
    #[must_use]
    pub fn with_deactivation_time(mut self, seconds: f64) -> Self {
        self.deactivation_time = seconds;
        self
    }

    /// Disable automatic deactivation.
    #[must_use]
    pub fn without_deactivation(mut self) -> Self {
        self.deactivation_disabled = true;
        self
    }

    /// Set the solver configuration.
    #[must_use]
    pub fn with_solver(mut self, solver: SolverConfig) -> Self {
        self.solver = solver;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> crate::Result<()> {
        if !self.fixed_timestep.is_finite() || self.fixed_timestep <= 0.0 {
            return Err(crate::SimError::InvalidTimestep(self.fixed_timestep));
        }
        if !self.gravity.iter().all(|g| g.is_finite()) {
            return Err(crate::SimError::invalid_config("gravity must be finite"));
        }
        if !self.deactivation_time.is_finite() || self.deactivation_time < 0.0 {
            return Err(crate::SimError::invalid_config(
                "deactivation time must be non-negative",
            ));
        }
        self.solver.validate()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(WorldConfig::default().validate().is_ok());
    }

    #[test]
    fn test_builder_chain() {
        let config = WorldConfig::default()
            .with_gravity(Vector3::new(0.0, -9.81, 0.0))
            .with_fixed_timestep(1.0 / 120.0)
            .with_max_sub_steps(4)
            .without_deactivation();

        assert_eq!(config.fixed_timestep, 1.0 / 120.0);
        assert_eq!(config.max_sub_steps, 4);
        assert!(config.deactivation_disabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_timestep() {
        let config = WorldConfig::default().with_fixed_timestep(0.0);
        assert!(matches!(
            config.validate(),
            Err(crate::SimError::InvalidTimestep(_))
        ));

        let config = WorldConfig::default().with_fixed_timestep(f64::NAN);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_solver() {
        let mut solver = SolverConfig::default();
        solver.iterations = 0;
        let config = WorldConfig::default().with_solver(solver);
        assert!(config.validate().unwrap_err().is_config_error());
    }
}
