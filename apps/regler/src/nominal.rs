use crate::settings::{InvalidSetting, Settings};
use thiserror::Error;
use tracing::{error, info};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Unavailable {
    #[error("no outside air temperature")]
    NoOutsideAirTemperature,
    #[error(transparent)]
    InvalidSetting(#[from] InvalidSetting),
}

/// Target flow temperature for the given outside air temperature.
pub fn compute(settings: &Settings, outside_air_temp: Option<f64>) -> Result<f64, Unavailable> {
    let oat = outside_air_temp.ok_or(Unavailable::NoOutsideAirTemperature)?;
    Ok(settings.a()? * oat + settings.b()?)
}

/// Logs the calculation becoming unavailable once per streak instead of
/// once per tick.
#[derive(Debug, Default)]
pub struct NominalTracker {
    unavailable: bool,
}

impl NominalTracker {
    /// Returns true when this observation started a new unavailable streak.
    pub fn observe(&mut self, reason: Option<&Unavailable>) -> bool {
        match (reason, self.unavailable) {
            (Some(reason), false) => {
                error!("nominal temperature unavailable: {reason}");
                self.unavailable = true;
                true
            }
            (None, true) => {
                info!("nominal temperature available again");
                self.unavailable = false;
                false
            }
            _ => false,
        }
    }

    pub fn is_unavailable(&self) -> bool {
        self.unavailable
    }
}
