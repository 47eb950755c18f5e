//! Parameters structure for ServoCtrl

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

use super::ServoCtrlError;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Tuning of a single move.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ServoParams {
    /// Proportional gain of the servo law.
    pub gain: f64,

    /// The move is complete once the L1 norm of the error falls below this value.
    pub threshold: f64,

    /// Maximum absolute joint rate.
    ///
    /// Units: radians/second
    pub qd_max_rads: f64,

    /// Maximum number of ticks before the move is abandoned.
    pub max_ticks: u64,

    /// Control variable sent to the backend.
    pub control: ControlVariable,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Which joint quantity is commanded every tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ControlVariable {
    /// Joint rates are commanded directly.
    Velocity,

    /// The joint rates are integrated over one tick and commanded as a position.
    Position,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Default for ServoParams {
    fn default() -> Self {
        Self {
            gain: 2.0,
            threshold: 0.001,
            qd_max_rads: 1.0,
            max_ticks: 2500,
            control: ControlVariable::Velocity,
        }
    }
}

impl ServoParams {
    /// The same tuning with a different gain.
    pub fn with_gain(&self, gain: f64) -> Self {
        Self { gain, ..*self }
    }

    pub(crate) fn validate(&self) -> Result<(), ServoCtrlError> {
        if !(self.gain.is_finite() && self.gain > 0.0) {
            return Err(ServoCtrlError::InvalidParams(format!(
                "gain must be positive, found {}",
                self.gain
            )));
        }
        if !(self.threshold.is_finite() && self.threshold > 0.0) {
            return Err(ServoCtrlError::InvalidParams(format!(
                "threshold must be positive, found {}",
                self.threshold
            )));
        }
        if self.qd_max_rads.is_nan() || self.qd_max_rads < 0.0 {
            return Err(ServoCtrlError::InvalidParams(format!(
                "qd_max_rads must not be negative, found {}",
                self.qd_max_rads
            )));
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_partial_params_file() {
        let p: ServoParams = util::params::from_str("gain = 10.0\nmax_ticks = 100").unwrap();

        assert_eq!(p.gain, 10.0);
        assert_eq!(p.max_ticks, 100);
        assert_eq!(p.threshold, 0.001);
        assert_eq!(p.control, ControlVariable::Velocity);
    }

    #[test]
    fn test_validate() {
        assert!(ServoParams::default().validate().is_ok());
        assert!(ServoParams::default().with_gain(0.0).validate().is_err());
        assert!(ServoParams {
            threshold: f64::NAN,
            ..Default::default()
        }
        .validate()
        .is_err());
        assert!(ServoParams {
            qd_max_rads: -0.1,
            ..Default::default()
        }
        .validate()
        .is_err());
    }
}
