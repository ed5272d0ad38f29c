use chrono::{DateTime, Local};
use heating_protocol::Topics;
use std::collections::HashMap;

pub const FLOW: &str = "flow";
pub const OUTSIDE_AIR_TEMP: &str = "outside_air_temp";

const TRACKED: [&str; 2] = [FLOW, OUTSIDE_AIR_TEMP];

#[derive(Debug, Clone, PartialEq)]
pub struct TimestampedValue {
    pub topic: String,
    pub value: Option<f64>,
    pub observed_at: Option<DateTime<Local>>,
}

impl TimestampedValue {
    fn new(topic: String) -> Self {
        TimestampedValue {
            topic,
            value: None,
            observed_at: None,
        }
    }
}

/// Latest reading per tracked sensor. No range checks: the poller owns those.
#[derive(Debug, Clone)]
pub struct SensorRegistry {
    sensors: HashMap<String, TimestampedValue>,
}

impl SensorRegistry {
    pub fn new(topics: &Topics) -> Self {
        let sensors = TRACKED
            .iter()
            .map(|name| {
                (
                    name.to_string(),
                    TimestampedValue::new(topics.sensor_temperature(name)),
                )
            })
            .collect();
        SensorRegistry { sensors }
    }

    /// Returns false for names that are not tracked.
    pub fn set_value(&mut self, name: &str, value: f64) -> bool {
        self.set_value_at(name, value, Local::now())
    }

    pub fn set_value_at(&mut self, name: &str, value: f64, now: DateTime<Local>) -> bool {
        match self.sensors.get_mut(name) {
            Some(sensor) => {
                sensor.value = Some(value);
                sensor.observed_at = Some(now);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.sensors.get(name).and_then(|s| s.value)
    }
}
