use clap::Parser;
use heating_protocol::topics::DEFAULT_BASE_TOPIC;
use heating_protocol::Topics;
use rumqttc::MqttOptions;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_MQTT_PORT: u16 = 1883;
const KEEP_ALIVE: Duration = Duration::from_secs(30);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unsupported broker scheme {0:?}, expected mqtt:// or tcp://")]
    UnsupportedScheme(String),
    #[error("broker uri has no host")]
    MissingHost,
    #[error("invalid broker port {0:?}")]
    BadPort(String),
}

/// Heating controller: derives the flow temperature target from the outside
/// air temperature and switches the heat pump.
#[derive(Parser, Debug, Clone)]
#[command(name = "regler", version, about)]
pub struct Args {
    /// MQTT broker URI
    #[arg(long, default_value = "mqtt://localhost")]
    pub uri: String,

    /// Settings log, one JSON object per line
    #[arg(long, default_value = "/etc/house/settings.json")]
    pub settings: PathBuf,

    /// Log file
    #[arg(long, default_value = "/var/log/house/regler.log")]
    pub log: PathBuf,

    /// Log at DEBUG level
    #[arg(short = 'v')]
    pub verbose: bool,

    /// Calculation loop time in seconds
    #[arg(long = "loop-time", default_value_t = 30, value_parser = clap::value_parser!(u64).range(1..))]
    pub loop_time: u64,

    /// Root of the heating topic namespace
    #[arg(long, default_value = DEFAULT_BASE_TOPIC)]
    pub base_topic: String,

    /// Serve the published state over HTTP on this address
    #[arg(long)]
    pub status_addr: Option<SocketAddr>,

    /// Seconds to wait before reconnecting to the broker
    #[arg(long, default_value_t = 5)]
    pub retry_delay: u64,
}

impl Args {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.loop_time)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay)
    }

    pub fn topics(&self) -> Topics {
        Topics::new(&self.base_topic)
    }

    pub fn mqtt_options(&self, topics: &Topics) -> Result<MqttOptions, ConfigError> {
        let broker = Broker::parse(&self.uri)?;
        let mut options = MqttOptions::new(topics.client_id("regler"), broker.host, broker.port);
        options.set_keep_alive(KEEP_ALIVE);
        options.set_clean_session(true);
        Ok(options)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Broker {
    pub host: String,
    pub port: u16,
}

impl Broker {
    /// Accepts `mqtt://host[:port][/]`, `tcp://host[:port]` or a bare
    /// `host[:port]`.
    pub fn parse(uri: &str) -> Result<Broker, ConfigError> {
        let rest = match uri.split_once("://") {
            Some(("mqtt" | "tcp", rest)) => rest,
            Some((scheme, _)) => return Err(ConfigError::UnsupportedScheme(scheme.to_string())),
            None => uri,
        };
        let authority = rest.split('/').next().unwrap_or_default();
        // credentials are not supported; drop them rather than treat them as a host
        let authority = authority.rsplit('@').next().unwrap_or_default();
        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => (
                host,
                port.parse()
                    .map_err(|_| ConfigError::BadPort(port.to_string()))?,
            ),
            None => (authority, DEFAULT_MQTT_PORT),
        };
        if host.is_empty() {
            return Err(ConfigError::MissingHost);
        }
        Ok(Broker {
            host: host.to_string(),
            port,
        })
    }
}
