use crate::pump::PumpSwitch;
use crate::settings::Settings;
use serde::Serialize;

const NO_ALARM: i32 = -1;

/// Published as the snapshot on every tick.
#[derive(Debug, Clone, Serialize)]
pub struct HeatingState {
    pub settings: Settings,
    pub nominal: Option<f64>,
    #[serde(flatten)]
    pub pump: PumpSwitch,
    pub alarm: bool,
    pub alarm_code: i32,
}

impl HeatingState {
    pub fn new(settings: Settings) -> Self {
        HeatingState {
            settings,
            nominal: None,
            pump: PumpSwitch::default(),
            alarm: false,
            alarm_code: NO_ALARM,
        }
    }
}
