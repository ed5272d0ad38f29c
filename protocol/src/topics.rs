pub const DEFAULT_BASE_TOPIC: &str = "/house/heating";

/// Topic names under a common base, e.g. `/house/heating/sensors/temp/flow`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    base: String,
}

impl Default for Topics {
    fn default() -> Self {
        Topics::new(DEFAULT_BASE_TOPIC)
    }
}

impl Topics {
    pub fn new(base: &str) -> Self {
        Topics {
            base: base.trim_end_matches('/').to_string(),
        }
    }

    pub fn sensor_temperatures(&self) -> String {
        format!("{}/sensors/temp/#", self.base)
    }

    pub fn sensor_temperature(&self, name: &str) -> String {
        format!("{}/sensors/temp/{}", self.base, name)
    }

    pub fn settings(&self) -> String {
        format!("{}/settings/#", self.base)
    }

    pub fn commands(&self) -> String {
        format!("{}/command/#", self.base)
    }

    pub fn heat_pump(&self) -> String {
        format!("{}/actors/heat_pump", self.base)
    }

    pub fn state(&self) -> String {
        format!("{}/state/state", self.base)
    }

    // Brokers are picky about '/' in client ids.
    pub fn client_id(&self, process: &str) -> String {
        let prefix: Vec<&str> = self.base.split('/').filter(|s| !s.is_empty()).collect();
        if prefix.is_empty() {
            process.to_string()
        } else {
            format!("{}-{}", prefix.join("-"), process)
        }
    }
}

/// Last path segment of a topic: the sensor or setting name.
pub fn last_segment(topic: &str) -> &str {
    topic.rsplit('/').next().unwrap_or(topic)
}
