use chrono::{DateTime, Local};
use heating_protocol::PumpState;
use serde::Serialize;
use tracing::{debug, info};

/// Never heat above this outside air temperature.
pub const NO_HEATING_ABOVE: f64 = 18.0;

/// Minimum time between two pump state changes.
pub const MIN_DWELL_SECS: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PumpInputs {
    pub nominal: Option<f64>,
    pub current: Option<f64>,
    pub outside_air_temp: Option<f64>,
    pub tolerance: Option<f64>,
}

/// The state the pump should be in, ignoring the dwell time.
pub fn candidate(inputs: &PumpInputs, pump: PumpState) -> PumpState {
    let (nominal, current, oat, tolerance) = match (
        inputs.nominal,
        inputs.current,
        inputs.outside_air_temp,
        inputs.tolerance,
    ) {
        (Some(n), Some(c), Some(o), Some(t)) => (n, c, o, t),
        // missing data: safe default
        _ => return PumpState::Off,
    };

    if oat > NO_HEATING_ABOVE {
        PumpState::Off
    } else if pump == PumpState::On && current > nominal + tolerance {
        PumpState::Off
    } else if pump == PumpState::Off && current < nominal - tolerance {
        PumpState::On
    } else {
        pump
    }
}

/// Pump state plus the time (epoch seconds) of its last change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PumpSwitch {
    #[serde(rename = "heat_pump")]
    pub state: PumpState,
    #[serde(rename = "heat_pump_ts")]
    pub changed_at: Option<i64>,
}

impl PumpSwitch {
    pub fn dwell_elapsed(&self, now: i64) -> bool {
        self.changed_at
            .map_or(true, |changed| now - changed >= MIN_DWELL_SECS)
    }

    /// Commits the candidate state if it differs and the dwell time has
    /// passed. A blocked change is not remembered; the next tick recomputes
    /// it from fresh readings. The missing-data rule is subject to the dwell
    /// time as well.
    pub fn evaluate(&mut self, inputs: &PumpInputs, now: DateTime<Local>) -> bool {
        let next = candidate(inputs, self.state);
        if next == self.state {
            return false;
        }
        let now = now.timestamp();
        if !self.dwell_elapsed(now) {
            debug!(
                "pump {} -> {} held back, last change {}s ago",
                self.state,
                next,
                now - self.changed_at.unwrap_or(now)
            );
            return false;
        }
        info!("pump {} -> {} ({:?})", self.state, next, inputs);
        self.state = next;
        self.changed_at = Some(now);
        true
    }
}
