//! Just enough of an MQTT 3.1.1 broker to drive the control loop over a
//! real socket: acks connects, subscriptions and publishes, records what
//! the client sent, and lets a test inject messages or hang up.

use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq)]
pub enum Seen {
    Connect,
    Subscribe(Vec<(String, u8)>),
    Publish {
        topic: String,
        qos: u8,
        payload: String,
    },
    Unsubscribe,
    Disconnect,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Observed {
    pub conn: usize,
    pub seen: Seen,
}

enum Command {
    Publish { topic: String, payload: String },
    Hangup,
}

pub struct TestBroker {
    pub port: u16,
    observed: UnboundedReceiver<Observed>,
    connections: Arc<Mutex<Vec<UnboundedSender<Command>>>>,
    accept: JoinHandle<()>,
}

impl TestBroker {
    /// With `complete_qos2` false, QoS 2 publishes are never acknowledged.
    pub async fn start(complete_qos2: bool) -> io::Result<TestBroker> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        let (observed_tx, observed) = mpsc::unbounded_channel();
        let connections: Arc<Mutex<Vec<UnboundedSender<Command>>>> = Arc::default();

        let registry = connections.clone();
        let accept = tokio::spawn(async move {
            let mut conn = 0;
            while let Ok((stream, _)) = listener.accept().await {
                let (tx, rx) = mpsc::unbounded_channel();
                registry.lock().unwrap().push(tx);
                tokio::spawn(handle(conn, stream, rx, observed_tx.clone(), complete_qos2));
                conn += 1;
            }
        });

        Ok(TestBroker {
            port,
            observed,
            connections,
            accept,
        })
    }

    /// Next thing any client did, or None after a few seconds of silence.
    pub async fn next(&mut self) -> Option<Observed> {
        timeout(WAIT, self.observed.recv()).await.ok().flatten()
    }

    /// Skips ahead to the next publish, returning `(conn, topic, qos, payload)`.
    pub async fn next_publish(&mut self) -> Option<(usize, String, u8, String)> {
        loop {
            if let Observed {
                conn,
                seen: Seen::Publish { topic, qos, payload },
            } = self.next().await?
            {
                return Some((conn, topic, qos, payload));
            }
        }
    }

    /// A publish that has already arrived, without waiting.
    pub fn published(&mut self) -> Option<(usize, String, u8, String)> {
        while let Ok(Observed { conn, seen }) = self.observed.try_recv() {
            if let Seen::Publish { topic, qos, payload } = seen {
                return Some((conn, topic, qos, payload));
            }
        }
        None
    }

    /// Sends a QoS 0 publish to the client on connection `conn`.
    pub fn publish(&self, conn: usize, topic: &str, payload: &str) {
        self.command(
            conn,
            Command::Publish {
                topic: topic.to_string(),
                payload: payload.to_string(),
            },
        );
    }

    pub fn hang_up(&self, conn: usize) {
        self.command(conn, Command::Hangup);
    }

    fn command(&self, conn: usize, command: Command) {
        if let Some(tx) = self.connections.lock().unwrap().get(conn) {
            let _ = tx.send(command);
        }
    }
}

impl Drop for TestBroker {
    fn drop(&mut self) {
        self.accept.abort();
    }
}

async fn handle(
    conn: usize,
    stream: TcpStream,
    mut commands: UnboundedReceiver<Command>,
    observed: UnboundedSender<Observed>,
    complete_qos2: bool,
) {
    let (read, mut write) = stream.into_split();
    let (packets_tx, mut packets) = mpsc::unbounded_channel();
    let reader = tokio::spawn(read_packets(read, packets_tx));

    loop {
        tokio::select! {
            packet = packets.recv() => {
                let Some((header, body)) = packet else { break };
                let (seen, reply) = respond(header, &body, complete_qos2);
                let done = seen == Some(Seen::Disconnect);
                if let Some(seen) = seen {
                    let _ = observed.send(Observed { conn, seen });
                }
                if !reply.is_empty() && write.write_all(&reply).await.is_err() {
                    break;
                }
                if done {
                    break;
                }
            }
            command = commands.recv() => match command {
                Some(Command::Publish { topic, payload }) => {
                    if write.write_all(&encode_publish(&topic, &payload)).await.is_err() {
                        break;
                    }
                }
                Some(Command::Hangup) | None => break,
            }
        }
    }
    reader.abort();
}

async fn read_packets(
    mut read: OwnedReadHalf,
    packets: UnboundedSender<(u8, Vec<u8>)>,
) -> io::Result<()> {
    loop {
        let header = read.read_u8().await?;
        let mut len = 0usize;
        let mut shift = 0;
        loop {
            let b = read.read_u8().await?;
            len |= ((b & 0x7f) as usize) << shift;
            if b & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        let mut body = vec![0; len];
        read.read_exact(&mut body).await?;
        if packets.send((header, body)).is_err() {
            return Ok(());
        }
    }
}

fn respond(header: u8, body: &[u8], complete_qos2: bool) -> (Option<Seen>, Vec<u8>) {
    match header >> 4 {
        1 => (Some(Seen::Connect), vec![0x20, 0x02, 0x00, 0x00]),
        3 => {
            let qos = (header >> 1) & 0x03;
            let (topic, mut rest) = string_at(body);
            let mut reply = Vec::new();
            if qos > 0 {
                let (pid_hi, pid_lo) = (rest[0], rest[1]);
                rest = &rest[2..];
                if qos == 1 {
                    reply = vec![0x40, 0x02, pid_hi, pid_lo];
                } else if complete_qos2 {
                    reply = vec![0x50, 0x02, pid_hi, pid_lo];
                }
            }
            let payload = String::from_utf8_lossy(rest).into_owned();
            (Some(Seen::Publish { topic, qos, payload }), reply)
        }
        // PUBREL
        6 => (None, vec![0x70, 0x02, body[0], body[1]]),
        8 => {
            let mut filters = Vec::new();
            let mut rest = &body[2..];
            while !rest.is_empty() {
                let (filter, after) = string_at(rest);
                filters.push((filter, after[0]));
                rest = &after[1..];
            }
            let mut reply = vec![0x90, 2 + filters.len() as u8, body[0], body[1]];
            reply.extend(filters.iter().map(|(_, qos)| *qos));
            (Some(Seen::Subscribe(filters)), reply)
        }
        10 => (Some(Seen::Unsubscribe), vec![0xb0, 0x02, body[0], body[1]]),
        12 => (None, vec![0xd0, 0x00]),
        14 => (Some(Seen::Disconnect), Vec::new()),
        _ => (None, Vec::new()),
    }
}

fn string_at(buf: &[u8]) -> (String, &[u8]) {
    let len = u16::from_be_bytes([buf[0], buf[1]]) as usize;
    let s = String::from_utf8_lossy(&buf[2..2 + len]).into_owned();
    (s, &buf[2 + len..])
}

fn encode_publish(topic: &str, payload: &str) -> Vec<u8> {
    let mut body = (topic.len() as u16).to_be_bytes().to_vec();
    body.extend_from_slice(topic.as_bytes());
    body.extend_from_slice(payload.as_bytes());

    let mut packet = vec![0x30];
    let mut len = body.len();
    loop {
        let mut b = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            b |= 0x80;
        }
        packet.push(b);
        if len == 0 {
            break;
        }
    }
    packet.extend(body);
    packet
}
