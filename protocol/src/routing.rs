use crate::payload::{self, PayloadError};
use crate::topics::{last_segment, Topics};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    SensorTemperature,
    Setting,
    Command,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub filter: String,
    pub kind: HandlerKind,
}

impl Subscription {
    pub fn new(filter: String, kind: HandlerKind) -> Self {
        Subscription { filter, kind }
    }

    /// The filter with its wildcard suffix stripped.
    pub fn prefix(&self) -> &str {
        self.filter.trim_end_matches('#')
    }

    pub fn matches(&self, topic: &str) -> bool {
        topic.starts_with(self.prefix())
    }
}

pub trait MessageHandler {
    type Error: From<PayloadError>;

    fn on_sensor(&mut self, name: &str, payload: &str) -> Result<(), Self::Error>;

    fn on_setting(&mut self, name: &str, payload: &str) -> Result<(), Self::Error>;

    // Reserved.
    fn on_command(&mut self, _topic: &str, _payload: &str) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Ordered subscriptions; the first matching prefix wins.
#[derive(Debug, Clone)]
pub struct RoutingTable {
    subscriptions: Vec<Subscription>,
}

impl RoutingTable {
    /// Narrow prefixes come first so that a broader one never shadows them.
    pub fn new(topics: &Topics) -> Self {
        RoutingTable::from_subscriptions(vec![
            Subscription::new(topics.sensor_temperatures(), HandlerKind::SensorTemperature),
            Subscription::new(topics.settings(), HandlerKind::Setting),
            Subscription::new(topics.commands(), HandlerKind::Command),
        ])
    }

    pub fn from_subscriptions(subscriptions: Vec<Subscription>) -> Self {
        RoutingTable { subscriptions }
    }

    pub fn subscriptions(&self) -> &[Subscription] {
        &self.subscriptions
    }

    pub fn route(&self, topic: &str) -> Option<HandlerKind> {
        self.subscriptions
            .iter()
            .find(|s| s.matches(topic))
            .map(|s| s.kind)
    }

    /// Hands one inbound message to `handler`. Returns the handler kind that
    /// took it, or `None` when no subscription matched and it was dropped.
    pub fn dispatch<H: MessageHandler + ?Sized>(
        &self,
        handler: &mut H,
        topic: &str,
        raw: &[u8],
    ) -> Result<Option<HandlerKind>, H::Error> {
        let kind = match self.route(topic) {
            Some(kind) => kind,
            None => return Ok(None),
        };
        let data = payload::decode(raw)?;
        match kind {
            HandlerKind::SensorTemperature => handler.on_sensor(last_segment(topic), data)?,
            HandlerKind::Setting => handler.on_setting(last_segment(topic), data)?,
            HandlerKind::Command => handler.on_command(topic, data)?,
        }
        Ok(Some(kind))
    }
}
