use crate::error::RegelError;
use crate::nominal::{self, NominalTracker, Unavailable};
use crate::pump::PumpInputs;
use crate::sensors::{SensorRegistry, FLOW, OUTSIDE_AIR_TEMP};
use crate::settings::{Settings, SettingsStore};
use crate::state::HeatingState;
use chrono::{DateTime, Local, Utc};
use heating_protocol::{payload, MessageHandler, RoutingTable, Topics};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publication {
    pub topic: String,
    pub payload: String,
}

/// Everything the control loop mutates. Only the loop owns it.
#[derive(Debug)]
pub struct Context {
    pub sensors: SensorRegistry,
    pub state: HeatingState,
    store: SettingsStore,
    nominal: NominalTracker,
}

impl MessageHandler for Context {
    type Error = RegelError;

    fn on_sensor(&mut self, name: &str, data: &str) -> Result<(), RegelError> {
        let value = payload::parse_reading(data)?;
        if self.sensors.set_value(name, value) {
            debug!("sensor {name} = {value}");
        } else {
            debug!("ignoring untracked sensor {name}");
        }
        Ok(())
    }

    fn on_setting(&mut self, name: &str, data: &str) -> Result<(), RegelError> {
        debug!("setting {name} = {data:?}");
        self.state.settings.set(name, data);
        self.store.persist_if_changed(&mut self.state.settings)?;
        Ok(())
    }
}

pub struct Regler {
    topics: Topics,
    routing: RoutingTable,
    ctx: Context,
}

impl Regler {
    pub fn new(topics: Topics, store: SettingsStore, settings: Settings) -> Self {
        Regler {
            routing: RoutingTable::new(&topics),
            ctx: Context {
                sensors: SensorRegistry::new(&topics),
                state: HeatingState::new(settings),
                store,
                nominal: NominalTracker::default(),
            },
            topics,
        }
    }

    pub fn routing(&self) -> &RoutingTable {
        &self.routing
    }

    pub fn state(&self) -> &HeatingState {
        &self.ctx.state
    }

    /// Routes one inbound message. Malformed payloads are logged and
    /// dropped; only errors that must stop the loop are returned.
    pub fn dispatch(&mut self, topic: &str, raw: &[u8]) -> Result<(), RegelError> {
        match self.routing.dispatch(&mut self.ctx, topic, raw) {
            Ok(Some(kind)) => {
                debug!("{topic}: handled as {kind:?}");
                Ok(())
            }
            Ok(None) => {
                debug!("{topic}: no subscription, dropped");
                Ok(())
            }
            Err(RegelError::MalformedPayload(e)) => {
                warn!("{topic}: dropping message: {e}");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// One control cycle: nominal temperature, then the pump.
    /// Returns whether the pump changed state.
    pub fn tick(&mut self, now: DateTime<Local>) -> bool {
        let ctx = &mut self.ctx;
        let oat = ctx.sensors.get(OUTSIDE_AIR_TEMP);
        let nominal = nominal::compute(&ctx.state.settings, oat);
        let tolerance = ctx.state.settings.tolerance().map_err(Unavailable::from);
        ctx.nominal
            .observe(nominal.as_ref().err().or(tolerance.as_ref().err()));
        ctx.state.nominal = nominal.ok();

        let inputs = PumpInputs {
            nominal: ctx.state.nominal,
            current: ctx.sensors.get(FLOW),
            outside_air_temp: oat,
            tolerance: tolerance.ok(),
        };
        debug!("tick: {inputs:?}");
        ctx.state.pump.evaluate(&inputs, now)
    }

    /// Pump actor state and full snapshot, stamped with `now`.
    pub fn publications(&self, now: DateTime<Utc>) -> Result<Vec<Publication>, RegelError> {
        let state = &self.ctx.state;
        Ok(vec![
            Publication {
                topic: self.topics.heat_pump(),
                payload: payload::format(now, state.pump.state),
            },
            Publication {
                topic: self.topics.state(),
                payload: payload::format(now, serde_json::to_string(state)?),
            },
        ])
    }

    pub fn snapshot(&self) -> Result<serde_json::Value, RegelError> {
        Ok(serde_json::to_value(&self.ctx.state)?)
    }
}
