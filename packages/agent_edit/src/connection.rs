//! ConnectionManager: one reconnecting WebSocket to the agent endpoint.
//!
//! The socket lives in a background task. Parsed agent events and open/close
//! notifications flow to the owner over one ordered channel; outbound frames
//! go through [`ConnectionManager::send`], which drops them when the socket is
//! not open. Dropped connections are retried forever with exponential backoff
//! until [`ConnectionManager::teardown`].

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::protocol::{AgentEvent, ClientMessage, parse_agent_event};

type AgentSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Reconnect delay schedule: `base_delay * factor^retry`, with `retry`
/// capped at `max_retry`.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub factor: f64,
    pub max_retry: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            factor: 1.6,
            max_retry: 6,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the reconnect that follows `retry` earlier failures,
    /// rounded to the nearest millisecond.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.min(self.max_retry) as i32;
        let millis = self.base_delay.as_millis() as f64 * self.factor.powi(exponent);
        Duration::from_millis(millis.round() as u64)
    }
}

/// Retry counter driven by connection outcomes.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: ReconnectPolicy,
    retry: u32,
}

impl Backoff {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self { policy, retry: 0 }
    }

    pub fn retry(&self) -> u32 {
        self.retry
    }

    /// Called when a connection opens.
    pub fn reset(&mut self) {
        self.retry = 0;
    }

    /// Delay for the next reconnect; advances the counter up to the cap.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.policy.delay_for(self.retry);
        self.retry = (self.retry + 1).min(self.policy.max_retry);
        delay
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// What the owner of a [`ConnectionManager`] receives, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Opened,
    Closed,
    Agent(AgentEvent),
}

struct Shared {
    state: watch::Sender<ConnectionState>,
    /// Writer for the currently open socket, `None` while disconnected.
    outbound: watch::Sender<Option<mpsc::UnboundedSender<String>>>,
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }
}

pub struct ConnectionManager {
    url: String,
    policy: ReconnectPolicy,
    shared: Arc<Shared>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ConnectionManager {
    /// Create a manager for `url`. Nothing is opened until [`connect`](Self::connect).
    pub fn new(
        url: impl Into<String>,
        policy: ReconnectPolicy,
    ) -> (Self, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (outbound, _) = watch::channel(None);
        let manager = Self {
            url: url.into(),
            policy,
            shared: Arc::new(Shared { state, outbound }),
            events,
            cancel: CancellationToken::new(),
            task: None,
        };
        (manager, events_rx)
    }

    /// The endpoint this manager connects to.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Start the connection loop. No-op while a loop is already running or
    /// after teardown.
    pub fn connect(&mut self) {
        if self.cancel.is_cancelled() {
            debug!(url = %self.url, "connect after teardown ignored");
            return;
        }
        if self.task.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }

        self.task = Some(tokio::spawn(run_connection(
            self.url.clone(),
            Backoff::new(self.policy.clone()),
            self.shared.clone(),
            self.events.clone(),
            self.cancel.clone(),
        )));
    }

    /// Queue `message` on the open socket.
    ///
    /// Returns `false` (and drops the message) when the socket is not open.
    pub fn send(&self, message: &ClientMessage) -> bool {
        let json = match serde_json::to_string(message) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "failed to serialize outbound message");
                return false;
            }
        };
        match self.shared.outbound.borrow().as_ref() {
            Some(writer) => writer.send(json).is_ok(),
            None => {
                debug!("agent channel not open; dropping outbound message");
                false
            }
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Resolve once the socket is open. Returns `false` if the manager went
    /// away first.
    pub async fn wait_connected(&self) -> bool {
        let mut state = self.subscribe_state();
        state
            .wait_for(|s| *s == ConnectionState::Connected)
            .await
            .is_ok()
    }

    pub fn is_torn_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Close the socket and stop reconnecting for good.
    pub async fn teardown(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "agent connection task ended abnormally");
            }
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_connection(
    url: String,
    mut backoff: Backoff,
    shared: Arc<Shared>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    cancel: CancellationToken,
) {
    loop {
        shared.set_state(ConnectionState::Connecting);
        let attempt = tokio::select! {
            _ = cancel.cancelled() => break,
            attempt = tokio_tungstenite::connect_async(url.as_str()) => attempt,
        };

        match attempt {
            Ok((socket, _)) => {
                backoff.reset();
                // The writer must be in place before anyone can observe `Connected`.
                let (writer, outbound_rx) = mpsc::unbounded_channel::<String>();
                shared.outbound.send_replace(Some(writer));
                info!(url = %url, "agent channel open");
                shared.set_state(ConnectionState::Connected);
                let _ = events.send(ConnectionEvent::Opened);

                pump(socket, outbound_rx, &events, &cancel).await;

                shared.outbound.send_replace(None);
                shared.set_state(ConnectionState::Disconnected);
                let _ = events.send(ConnectionEvent::Closed);
                info!(url = %url, "agent channel closed");
            }
            Err(e) => {
                shared.set_state(ConnectionState::Disconnected);
                warn!(url = %url, error = %e, "agent channel connect failed");
            }
        }

        if cancel.is_cancelled() {
            break;
        }

        let delay = backoff.next_delay();
        debug!(
            delay_ms = delay.as_millis() as u64,
            retry = backoff.retry(),
            "scheduling agent reconnect"
        );
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    shared.outbound.send_replace(None);
    shared.set_state(ConnectionState::Disconnected);
    debug!(url = %url, "agent connection loop stopped");
}

/// Move frames in both directions until the socket closes, errors, or the
/// manager is torn down.
async fn pump(
    socket: AgentSocket,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
    events: &mpsc::UnboundedSender<ConnectionEvent>,
    cancel: &CancellationToken,
) {
    let (mut ws_write, mut ws_read) = socket.split();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = ws_write.send(Message::Close(None)).await;
                break;
            }

            Some(json) = outbound_rx.recv() => {
                if let Err(e) = ws_write.send(Message::Text(json.into())).await {
                    warn!(error = %e, "agent channel write failed; closing");
                    break;
                }
            }

            frame = ws_read.next() => match frame {
                Some(Ok(Message::Text(text))) => match parse_agent_event(text.as_str()) {
                    Some(event) => {
                        if events.send(ConnectionEvent::Agent(event)).is_err() {
                            debug!("connection event receiver dropped");
                        }
                    }
                    None => debug!(frame = %text.as_str(), "dropping unrecognised agent frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "agent closed the channel");
                    break;
                }
                Some(Ok(Message::Binary(_))) => debug!("dropping binary agent frame"),
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    // Errors force the socket closed; the reconnect loop takes over.
                    warn!(error = %e, "agent channel error; closing");
                    let _ = ws_write.close().await;
                    break;
                }
                None => break,
            }
        }
    }
}
