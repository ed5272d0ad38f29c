use serde::{Deserialize, Serialize};
use std::fmt;

/// Heat pump actor state. Carried as `0`/`1`, both in the actor payload and
/// in the JSON snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum PumpState {
    #[default]
    Off,
    On,
}

impl From<u8> for PumpState {
    fn from(v: u8) -> Self {
        if v == 0 {
            PumpState::Off
        } else {
            PumpState::On
        }
    }
}

impl From<PumpState> for u8 {
    fn from(s: PumpState) -> u8 {
        match s {
            PumpState::Off => 0,
            PumpState::On => 1,
        }
    }
}

impl fmt::Display for PumpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", u8::from(*self))
    }
}
