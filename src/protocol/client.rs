//! Duplex connection to the coaching service

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use super::messages::{ClientMessage, Role, ServerMessage, decode_payload};
use crate::config::validate_endpoint;
use crate::session::ScenarioState;
use crate::{Error, Result};

/// Inbound events buffered toward the orchestrator
const EVENT_CAPACITY: usize = 256;

/// How long `disconnect` waits for the close frame to flush
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Transport state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Decoded inbound message, in arrival order
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// PCM16 assistant audio
    Audio(Vec<u8>),
    /// Full replacement of the current user transcript
    UserTranscript(String),
    /// Next piece of the in-progress assistant transcript
    AssistantDelta(String),
    TranscriptDone,
    /// Barge-in: flush playback, reset the partial assistant transcript
    Interrupt,
    Tool {
        name: String,
        params: serde_json::Value,
    },
    /// Scene observation, already deduplicated against the previous one
    SceneObservation(String),
    Scenario(ScenarioState),
    /// Transport closed by the peer or failed
    Closed { error: Option<String> },
}

#[derive(Debug)]
enum Outbound {
    Text(String),
    Ping,
    Close,
}

/// Fire-and-forget sender for audio and frames
#[derive(Debug, Clone)]
pub struct OutboundSender {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl OutboundSender {
    /// Send wire-format audio
    pub fn send_audio(&self, pcm: &[u8]) {
        self.send(&ClientMessage::audio(pcm));
    }

    /// Send an encoded camera frame
    pub fn send_frame(&self, jpeg: &[u8]) {
        self.send(&ClientMessage::frame(jpeg));
    }

    fn send(&self, message: &ClientMessage) {
        match message.to_json() {
            Ok(json) => {
                if self.tx.send(Outbound::Text(json)).is_err() {
                    tracing::debug!("connection closed, outbound message dropped");
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to encode outbound message"),
        }
    }
}

/// One logical duplex channel
///
/// Three tasks run per connection: a writer that owns the sink, a keepalive
/// ping, and the receive loop. Sends never wait on the receive side.
pub struct ProtocolClient {
    keepalive: Duration,
    state: watch::Sender<ConnectionState>,
    outbound: Option<OutboundSender>,
    writer: Option<JoinHandle<()>>,
    tasks: Vec<JoinHandle<()>>,
}

impl ProtocolClient {
    /// Create a disconnected client pinging every `keepalive`
    #[must_use]
    pub fn new(keepalive: Duration) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            keepalive,
            state,
            outbound: None,
            writer: None,
            tasks: Vec::new(),
        }
    }

    /// Current transport state
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch transport state changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Sender for the current connection
    #[must_use]
    pub fn sender(&self) -> Option<OutboundSender> {
        self.outbound.clone()
    }

    /// Open the transport and start the connection tasks
    ///
    /// Returns the ordered inbound event stream. The stream ends with a
    /// [`ServerEvent::Closed`] if the peer drops the connection.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for a non-websocket endpoint and
    /// `Error::Connection` if the transport cannot be opened
    pub async fn connect(&mut self, endpoint: &str) -> Result<mpsc::Receiver<ServerEvent>> {
        if self.outbound.is_some() {
            return Err(Error::InvalidState("already connected".to_string()));
        }
        let url = validate_endpoint(endpoint)?;

        self.state.send_replace(ConnectionState::Connecting);
        tracing::info!(endpoint = %url, "connecting");

        let stream = match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok((stream, _response)) => stream,
            Err(e) => {
                self.state.send_replace(ConnectionState::Disconnected);
                tracing::error!(error = %e, "connection failed");
                return Err(Error::Connection(e.to_string()));
            }
        };

        let (mut sink, mut source) = stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outbound>();
        let (event_tx, event_rx) = mpsc::channel(EVENT_CAPACITY);

        let writer = tokio::spawn(async move {
            while let Some(outbound) = out_rx.recv().await {
                let message = match outbound {
                    Outbound::Text(json) => Message::Text(json.into()),
                    Outbound::Ping => Message::Ping(Vec::new().into()),
                    Outbound::Close => {
                        let frame = CloseFrame {
                            code: CloseCode::Normal,
                            reason: "session ended".into(),
                        };
                        if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                            tracing::debug!(error = %e, "close frame not sent");
                        }
                        let _ = sink.close().await;
                        break;
                    }
                };
                if let Err(e) = sink.send(message).await {
                    tracing::warn!(error = %e, "send failed");
                }
            }
        });

        let ping_tx = out_tx.clone();
        let interval = self.keepalive;
        let keepalive = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if ping_tx.send(Outbound::Ping).is_err() {
                    break;
                }
                tracing::trace!("keepalive ping");
            }
        });

        let state = self.state.clone();
        let receiver = tokio::spawn(async move {
            let error = receive_loop(&mut source, &event_tx).await;
            state.send_replace(ConnectionState::Disconnected);
            match &error {
                Some(e) => tracing::warn!(error = %e, "connection lost"),
                None => tracing::info!("connection closed by server"),
            }
            let _ = event_tx.send(ServerEvent::Closed { error }).await;
        });

        self.outbound = Some(OutboundSender { tx: out_tx });
        self.writer = Some(writer);
        self.tasks = vec![keepalive, receiver];
        self.state.send_replace(ConnectionState::Connected);
        tracing::info!("connected");

        Ok(event_rx)
    }

    /// Cancel the connection tasks and close with a normal closure code
    ///
    /// Safe to call repeatedly.
    pub async fn disconnect(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }

        if let Some(outbound) = self.outbound.take() {
            let _ = outbound.tx.send(Outbound::Close);
        }
        if let Some(writer) = self.writer.take() {
            if tokio::time::timeout(CLOSE_TIMEOUT, writer).await.is_err() {
                tracing::debug!("close handshake timed out");
            }
            tracing::info!("disconnected");
        }

        self.state.send_replace(ConnectionState::Disconnected);
    }
}

impl Drop for ProtocolClient {
    fn drop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        if let Some(writer) = self.writer.take() {
            writer.abort();
        }
    }
}

/// Read until the transport ends; `Some(error)` if it failed
async fn receive_loop<S>(source: &mut S, events: &mpsc::Sender<ServerEvent>) -> Option<String>
where
    S: futures::Stream<Item = std::result::Result<Message, tokio_tungstenite::tungstenite::Error>>
        + Unpin,
{
    let mut last_observation: Option<String> = None;

    loop {
        let message = match source.next().await {
            Some(Ok(message)) => message,
            Some(Err(e)) => return Some(e.to_string()),
            None => return Some("connection lost".to_string()),
        };

        let text = match message {
            Message::Text(text) => text,
            Message::Close(frame) => {
                if let Some(frame) = frame {
                    tracing::debug!(code = %frame.code, reason = %frame.reason, "close frame received");
                }
                return None;
            }
            Message::Binary(bytes) => {
                tracing::debug!(len = bytes.len(), "ignoring binary frame");
                continue;
            }
            _ => continue,
        };

        let event = match ServerMessage::parse(text.as_str()) {
            Ok(message) => decode(message, &mut last_observation),
            Err(e) => {
                tracing::warn!(error = %e, "ignoring malformed message");
                None
            }
        };

        if let Some(event) = event
            && events.send(event).await.is_err()
        {
            // Nobody is listening any more
            return None;
        }
    }
}

fn decode(message: ServerMessage, last_observation: &mut Option<String>) -> Option<ServerEvent> {
    match message {
        ServerMessage::Audio { data } => match decode_payload(&data) {
            Ok(pcm) => Some(ServerEvent::Audio(pcm)),
            Err(e) => {
                tracing::warn!(error = %e, "dropping undecodable audio");
                None
            }
        },
        ServerMessage::Transcript { role, text, delta } => match role {
            Role::User => text.map(ServerEvent::UserTranscript),
            Role::Assistant => delta.or(text).map(ServerEvent::AssistantDelta),
        },
        ServerMessage::TranscriptDone => Some(ServerEvent::TranscriptDone),
        ServerMessage::Interrupt => Some(ServerEvent::Interrupt),
        ServerMessage::Tool { name, params } => Some(ServerEvent::Tool { name, params }),
        ServerMessage::SceneUpdate { observation } => {
            let observation = observation.trim();
            let key = observation.to_lowercase();
            if key.is_empty() || last_observation.as_deref() == Some(key.as_str()) {
                tracing::debug!("duplicate scene observation skipped");
                return None;
            }
            *last_observation = Some(key);
            Some(ServerEvent::SceneObservation(observation.to_string()))
        }
        ServerMessage::ScenarioUpdate {
            scenario,
            severity,
            summary,
            body_region,
        } => Some(ServerEvent::Scenario(ScenarioState::from_wire(
            &scenario,
            &severity,
            &summary,
            &body_region,
        ))),
        ServerMessage::Unknown => {
            tracing::warn!("ignoring message with unknown type");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scene_observations_are_deduplicated() {
        let mut last = None;
        let obs = |s: &str| ServerMessage::SceneUpdate {
            observation: s.to_string(),
        };

        assert_eq!(
            decode(obs("Person lying on floor"), &mut last),
            Some(ServerEvent::SceneObservation("Person lying on floor".to_string()))
        );
        assert_eq!(decode(obs("  person lying on FLOOR "), &mut last), None);
        assert!(decode(obs("Bystander kneeling"), &mut last).is_some());
        assert!(decode(obs("Person lying on floor"), &mut last).is_some());
        assert_eq!(decode(obs("   "), &mut last), None);
    }

    #[test]
    fn assistant_text_falls_back_when_no_delta() {
        let mut last = None;
        let message = ServerMessage::Transcript {
            role: Role::Assistant,
            text: Some("Keep going".to_string()),
            delta: None,
        };
        assert_eq!(
            decode(message, &mut last),
            Some(ServerEvent::AssistantDelta("Keep going".to_string()))
        );
    }

    #[test]
    fn user_transcript_without_text_is_dropped() {
        let mut last = None;
        let message = ServerMessage::Transcript {
            role: Role::User,
            text: None,
            delta: Some("x".to_string()),
        };
        assert_eq!(decode(message, &mut last), None);
    }

    #[tokio::test]
    async fn rejects_http_endpoint() {
        let mut client = ProtocolClient::new(Duration::from_secs(15));
        assert!(client.connect("http://localhost/ws").await.is_err());
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn disconnect_without_connect_is_noop() {
        let mut client = ProtocolClient::new(Duration::from_secs(15));
        client.disconnect().await;
        client.disconnect().await;
        assert!(client.sender().is_none());
    }
}
