//! Three-state hysteresis for the heating/cooling relay pair.

use serde::{Deserialize, Serialize};
use std::fmt;

/// What the relay pair is currently doing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RelayMode {
    #[default]
    Idle,
    Heating,
    Cooling,
}

impl RelayMode {
    /// Next mode given `deviation = room - target`.
    ///
    /// From `Idle` an edge of the deadband must be crossed to start; a running
    /// mode only stops once the room is back at the target. `Heating` and
    /// `Cooling` never follow each other directly.
    pub fn next(self, deviation: f64, deadband: f64) -> Self {
        let half_band = deadband / 2.0;
        match self {
            Self::Idle if deviation <= -half_band => Self::Heating,
            Self::Idle if deviation >= half_band => Self::Cooling,
            Self::Idle => Self::Idle,
            Self::Heating if deviation >= 0.0 => Self::Idle,
            Self::Heating => Self::Heating,
            Self::Cooling if deviation <= 0.0 => Self::Idle,
            Self::Cooling => Self::Cooling,
        }
    }

    pub fn heating(self) -> bool {
        self == Self::Heating
    }

    pub fn cooling(self) -> bool {
        self == Self::Cooling
    }
}

impl fmt::Display for RelayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Heating => "heating",
            Self::Cooling => "cooling",
        };
        f.write_str(name)
    }
}
