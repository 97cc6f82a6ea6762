use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use growroom_api::Envelope;
use growroom_client::Client;
use growroom_client::settings::Settings;
use growroom_client::storage::{LocalStorage, MemoryStorage};
use growroom_mock::{MockBackend, serve};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

const DEADLINE: Duration = Duration::from_secs(5);
const POLL: Duration = Duration::from_millis(20);

pub struct MockServer {
    pub backend: MockBackend,
    pub endpoint: String,
    task: JoinHandle<()>,
}

impl MockServer {
    pub async fn new() -> Self {
        Self::with_backend(MockBackend::new()).await
    }

    pub async fn with_backend(backend: MockBackend) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        Self::on(listener, backend)
    }

    /// Serves `backend` on an already bound listener.
    pub fn on(listener: TcpListener, backend: MockBackend) -> Self {
        let address = listener.local_addr().unwrap();

        let served = backend.clone();
        let task = tokio::spawn(async move {
            let _ = serve(listener, served).await;
        });

        Self {
            backend,
            endpoint: format!("ws://{address}/ws"),
            task,
        }
    }

    pub fn settings(&self) -> Settings {
        settings_for(&self.endpoint)
    }

    pub fn start_client(&self) -> Client {
        Client::start(&self.settings(), Arc::new(MemoryStorage::new()))
    }

    pub fn start_client_with(&self, storage: Arc<dyn LocalStorage>) -> Client {
        Client::start(&self.settings(), storage)
    }

    /// Waits until `count` clients hold a session.
    pub async fn wait_for_clients(&self, count: usize) {
        let deadline = tokio::time::Instant::now() + DEADLINE;
        while self.backend.active_clients().await != count {
            assert!(
                tokio::time::Instant::now() < deadline,
                "expected {count} clients, have {}",
                self.backend.active_clients().await
            );
            tokio::time::sleep(POLL).await;
        }
    }

    /// Waits until at least `count` envelopes named `event` arrived.
    pub async fn wait_for_events(&self, event: &str, count: usize) -> Vec<Envelope> {
        let deadline = tokio::time::Instant::now() + DEADLINE;
        loop {
            let received = self.backend.received_events(event).await;
            if received.len() >= count {
                return received;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "expected {count} {event} events, have {}",
                received.len()
            );
            tokio::time::sleep(POLL).await;
        }
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Finds a free local port nothing listens on yet.
pub async fn free_address() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

pub fn settings_for(endpoint: &str) -> Settings {
    let mut settings = Settings::layered(None).unwrap();
    settings.server.endpoint = endpoint.to_string();
    settings.connection.handshake_timeout_secs = 2;
    settings.connection.retry_delay_ms = 50;
    settings.connection.poll_interval_secs = 1;
    settings.storage.path = None;
    settings
}

/// Polls `check` until it holds.
pub async fn wait_until(what: &str, check: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + DEADLINE;
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(POLL).await;
    }
}

/// Waits until the client is connected and its initial sync is settled.
pub async fn wait_until_synced(client: &Client) {
    wait_until("connection", || client.is_connected()).await;
    wait_until("initial sync", || {
        client.sync().is_initialized() && client.store().pending_count() == 0
    })
    .await;
}
