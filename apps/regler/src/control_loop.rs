use chrono::{Local, Utc};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS, SubscribeFilter};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, error, info, warn};

use crate::error::RegelError;
use crate::regler::Regler;
use crate::status::SharedStatus;

const REQUEST_CAPACITY: usize = 16;
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    #[default]
    Disconnected,
    Connecting,
    Subscribed,
    Running,
    Disconnecting,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LinkState::Disconnected => "disconnected",
            LinkState::Connecting => "connecting",
            LinkState::Subscribed => "subscribed",
            LinkState::Running => "running",
            LinkState::Disconnecting => "disconnecting",
        };
        f.write_str(s)
    }
}

#[derive(Debug, PartialEq, Eq)]
enum SessionEnd {
    Interrupted,
}

enum Wake {
    Interrupted,
    Polled(Result<Result<Event, rumqttc::ConnectionError>, tokio::time::error::Elapsed>),
}

/// Resolves once shutdown has been requested. Cancel safe.
pub async fn interrupted(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            // nobody can request a shutdown any more
            std::future::pending::<()>().await;
        }
    }
}

/// Fixed-interval tick schedule. Only a tick restarts the interval;
/// messages handled in between do not.
#[derive(Debug, Clone, Copy)]
struct TickTimer {
    interval: Duration,
    last: Instant,
}

impl TickTimer {
    fn start(interval: Duration, now: Instant) -> Self {
        TickTimer {
            interval,
            last: now,
        }
    }

    /// How long to wait for messages before the next tick is due.
    fn wait(&self, now: Instant) -> Duration {
        self.interval
            .saturating_sub(now.saturating_duration_since(self.last))
    }

    fn due(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last) >= self.interval
    }

    fn restart(&mut self, now: Instant) {
        self.last = now;
    }
}

/// Owns the broker connection and the controller context for the lifetime
/// of the process. Single worker: messages and ticks are handled in turn.
pub struct ControlLoop {
    regler: Regler,
    options: MqttOptions,
    tick_interval: Duration,
    retry_delay: Duration,
    status: SharedStatus,
    shutdown: watch::Receiver<bool>,
    link: LinkState,
}

impl ControlLoop {
    pub fn new(
        regler: Regler,
        options: MqttOptions,
        tick_interval: Duration,
        retry_delay: Duration,
        status: SharedStatus,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        ControlLoop {
            regler,
            options,
            tick_interval,
            retry_delay,
            status,
            shutdown,
            link: LinkState::Disconnected,
        }
    }

    /// Runs until interrupted. Transport failures reconnect; a settings
    /// write failure is returned.
    pub async fn run(mut self) -> Result<(), RegelError> {
        loop {
            let result = self.session().await;
            self.set_link(LinkState::Disconnected).await;
            match result {
                Ok(SessionEnd::Interrupted) => {
                    info!("interrupted, exiting");
                    return Ok(());
                }
                Err(e) if e.is_fatal() => {
                    error!("fatal: {e}");
                    return Err(e);
                }
                Err(e) => error!("session failed: {e}"),
            }

            info!("retry in {}s", self.retry_delay.as_secs());
            tokio::select! {
                _ = interrupted(&mut self.shutdown) => {
                    info!("interrupted, exiting");
                    return Ok(());
                }
                _ = sleep(self.retry_delay) => {}
            }
        }
    }

    async fn session(&mut self) -> Result<SessionEnd, RegelError> {
        self.set_link(LinkState::Connecting).await;
        let (client, mut eventloop) = AsyncClient::new(self.options.clone(), REQUEST_CAPACITY);

        let result = match self.connect(&client, &mut eventloop).await {
            Ok(None) => self.serve(&client, &mut eventloop).await,
            Ok(Some(end)) => Ok(end),
            Err(e) => Err(e),
        };

        self.set_link(LinkState::Disconnecting).await;
        self.close(&client, &mut eventloop).await;
        result
    }

    /// Waits for the broker to accept the connection, then subscribes.
    async fn connect(
        &mut self,
        client: &AsyncClient,
        eventloop: &mut EventLoop,
    ) -> Result<Option<SessionEnd>, RegelError> {
        loop {
            let wake = tokio::select! {
                _ = interrupted(&mut self.shutdown) => Wake::Interrupted,
                event = eventloop.poll() => Wake::Polled(Ok(event)),
            };
            match wake {
                Wake::Interrupted => return Ok(Some(SessionEnd::Interrupted)),
                Wake::Polled(Ok(Ok(Event::Incoming(Packet::ConnAck(ack))))) => {
                    info!("connected to broker ({:?})", ack.code);
                    break;
                }
                Wake::Polled(Ok(Ok(event))) => debug!("connecting: {event:?}"),
                Wake::Polled(Ok(Err(e))) => return Err(e.into()),
                Wake::Polled(Err(_)) => {}
            }
        }

        let filters: Vec<SubscribeFilter> = self
            .regler
            .routing()
            .subscriptions()
            .iter()
            .map(|s| SubscribeFilter::new(s.filter.clone(), QoS::ExactlyOnce))
            .collect();
        client.subscribe_many(filters).await?;
        self.set_link(LinkState::Subscribed).await;
        Ok(None)
    }

    async fn serve(
        &mut self,
        client: &AsyncClient,
        eventloop: &mut EventLoop,
    ) -> Result<SessionEnd, RegelError> {
        self.set_link(LinkState::Running).await;
        self.publish(client).await?;

        let mut ticks = TickTimer::start(self.tick_interval, Instant::now());
        loop {
            let wait = ticks.wait(Instant::now());
            debug!("wait_time={wait:?}");

            let wake = tokio::select! {
                _ = interrupted(&mut self.shutdown) => Wake::Interrupted,
                polled = timeout(wait, eventloop.poll()) => Wake::Polled(polled),
            };
            match wake {
                Wake::Interrupted => return Ok(SessionEnd::Interrupted),
                Wake::Polled(Ok(Ok(Event::Incoming(Packet::Publish(p))))) => {
                    self.regler.dispatch(&p.topic, &p.payload)?;
                }
                Wake::Polled(Ok(Ok(_))) => {}
                Wake::Polled(Ok(Err(e))) => return Err(e.into()),
                // deadline reached, fall through to the tick
                Wake::Polled(Err(_)) => {}
            }

            let now = Instant::now();
            if ticks.due(now) {
                ticks.restart(now);
                self.regler.tick(Local::now());
                self.publish(client).await?;
            }
        }
    }

    /// Queues the publications without waiting for room in the request
    /// channel: a full channel means the broker stopped completing
    /// handshakes, and the session ends with a `Client` error.
    async fn publish(&mut self, client: &AsyncClient) -> Result<(), RegelError> {
        for p in self.regler.publications(Utc::now())? {
            debug!("publish {} {}", p.topic, p.payload);
            client.try_publish(p.topic, QoS::ExactlyOnce, false, p.payload)?;
        }
        let snapshot = self.regler.snapshot()?;
        self.status.write().await.snapshot = Some(snapshot);
        Ok(())
    }

    /// Best effort: unsubscribe, disconnect and give the event loop a moment
    /// to put both on the wire.
    async fn close(&mut self, client: &AsyncClient, eventloop: &mut EventLoop) {
        for s in self.regler.routing().subscriptions() {
            if let Err(e) = client.try_unsubscribe(s.filter.clone()) {
                debug!("unsubscribe {}: {e}", s.filter);
            }
        }
        if let Err(e) = client.try_disconnect() {
            debug!("disconnect: {e}");
            return;
        }

        let drain = async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        debug!("while disconnecting: {e}");
                        break;
                    }
                }
            }
        };
        if timeout(DRAIN_TIMEOUT, drain).await.is_err() {
            warn!("broker did not take the disconnect in time");
        }
    }

    async fn set_link(&mut self, link: LinkState) {
        if self.link != link {
            info!("link {} -> {}", self.link, link);
            self.link = link;
            self.status.write().await.link = link;
        }
    }
}
