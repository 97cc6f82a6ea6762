use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use growroom_api::Envelope;
use growroom_api::transport::{TransportError, encode};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, sleep, timeout};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::dispatcher::Dispatcher;
use crate::error::Result;
use crate::settings;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// Text of the connectivity indicator.
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::Connected => "Connected",
            ConnectionState::Connecting | ConnectionState::Disconnected => "Disconnected",
        }
    }
}

/// Outbound side of the backend channel as seen by command producers.
pub trait Transport: Send + Sync {
    fn is_connected(&self) -> bool;

    /// Queues one envelope for delivery.
    fn emit(&self, envelope: Envelope) -> Result<()>;

    /// Drops the current session, if any, and starts a new one.
    fn reconnect(&self);
}

struct Shared {
    dispatcher: Arc<Dispatcher>,
    state: watch::Sender<ConnectionState>,
    generation: AtomicU64,
}

impl Shared {
    /// Publishes `state` unless a newer session has taken over.
    fn publish(&self, generation: u64, state: ConnectionState) {
        self.state.send_if_modified(|current| {
            if self.generation.load(Ordering::SeqCst) != generation || *current == state {
                return false;
            }
            *current = state;
            true
        });
    }
}

struct Session {
    outbound: mpsc::UnboundedSender<String>,
    task: JoinHandle<()>,
}

/// The single websocket session to the backend.
///
/// Each call to [`Connection::connect`] starts a new session generation and
/// tears the previous one down first. A session retries forever with a fixed
/// delay between attempts and a handshake timeout per attempt.
pub struct Connection {
    endpoint: String,
    options: settings::Connection,
    shared: Arc<Shared>,
    session: Mutex<Option<Session>>,
}

impl Connection {
    pub fn new(
        endpoint: impl Into<String>,
        options: settings::Connection,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);

        Self {
            endpoint: endpoint.into(),
            options,
            shared: Arc::new(Shared {
                dispatcher,
                state,
                generation: AtomicU64::new(0),
            }),
            session: Mutex::new(None),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Starts a new session. Must be called within a tokio runtime.
    pub fn connect(&self) {
        let mut session = self.session.lock();

        if let Some(previous) = session.take() {
            tracing::debug!("Closing previous session to {}", self.endpoint);
            previous.task.abort();
        }

        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.publish(generation, ConnectionState::Connecting);

        let (outbound, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_session(
            self.shared.clone(),
            self.endpoint.clone(),
            self.options.clone(),
            generation,
            rx,
        ));

        *session = Some(Session { outbound, task });
    }

    /// Closes the session, if any. Dropping the socket closes it.
    pub fn disconnect(&self) {
        let Some(session) = self.session.lock().take() else {
            return;
        };

        session.task.abort();

        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.publish(generation, ConnectionState::Disconnected);

        tracing::info!("Disconnected from {}", self.endpoint);
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }
}

impl Transport for Connection {
    fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    fn emit(&self, envelope: Envelope) -> Result<()> {
        let frame = encode(&envelope)?;

        let session = self.session.lock();
        let session = session.as_ref().ok_or(TransportError::Closed)?;
        session
            .outbound
            .send(frame)
            .map_err(|_| TransportError::Closed)?;

        tracing::debug!(event = %envelope.event, "Queued outbound event");
        Ok(())
    }

    fn reconnect(&self) {
        tracing::info!("Reconnecting to {}", self.endpoint);
        self.connect();
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.disconnect();
    }
}

async fn run_session(
    shared: Arc<Shared>,
    endpoint: String,
    options: settings::Connection,
    generation: u64,
    mut outbound: mpsc::UnboundedReceiver<String>,
) {
    let mut attempt: u64 = 0;

    loop {
        attempt += 1;
        shared.publish(generation, ConnectionState::Connecting);
        tracing::debug!("Connecting to {} (attempt {})", endpoint, attempt);

        match timeout(options.handshake_timeout(), connect_async(endpoint.as_str())).await {
            Ok(Ok((socket, _))) => {
                attempt = 0;

                // Frames queued while the previous socket was going down are stale.
                let mut stale = 0;
                while outbound.try_recv().is_ok() {
                    stale += 1;
                }
                if stale > 0 {
                    tracing::warn!("Discarded {} frames queued before reconnect", stale);
                }

                tracing::info!("Connected to {}", endpoint);
                shared.publish(generation, ConnectionState::Connected);

                let (mut sink, mut stream) = socket.split();

                loop {
                    tokio::select! {
                        inbound = stream.next() => match inbound {
                            Some(Ok(Message::Text(text))) => {
                                shared.dispatcher.dispatch_frame(&text);
                            }
                            Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                                Ok(text) => {
                                    shared.dispatcher.dispatch_frame(text);
                                }
                                Err(e) => tracing::warn!("Dropping binary frame: {}", e),
                            },
                            Some(Ok(Message::Close(frame))) => {
                                tracing::info!("Backend closed the connection: {:?}", frame);
                                break;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                tracing::warn!("Websocket error: {}", e);
                                break;
                            }
                            None => break,
                        },
                        frame = outbound.recv() => match frame {
                            Some(frame) => {
                                if let Err(e) = sink.send(Message::Text(frame)).await {
                                    tracing::warn!("Failed to send frame: {}", e);
                                    break;
                                }
                            }
                            None => {
                                let _ = sink.close().await;
                                return;
                            }
                        },
                    }
                }

                shared.publish(generation, ConnectionState::Disconnected);
                tracing::error!("Lost connection to {}", endpoint);
            }
            Ok(Err(e)) => {
                shared.publish(generation, ConnectionState::Disconnected);
                tracing::error!("Failed to connect to {}: {}", endpoint, e);
            }
            Err(_) => {
                shared.publish(generation, ConnectionState::Disconnected);
                tracing::error!(
                    "Handshake with {} timed out after {:?}",
                    endpoint,
                    options.handshake_timeout()
                );
            }
        }

        sleep(options.retry_delay()).await;
    }
}

/// Calls [`Transport::reconnect`] every `interval` while disconnected.
pub fn spawn_watchdog(transport: Arc<dyn Transport>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            ticker.tick().await;

            if !transport.is_connected() {
                tracing::debug!("Watchdog found the connection down");
                transport.reconnect();
            }
        }
    })
}
