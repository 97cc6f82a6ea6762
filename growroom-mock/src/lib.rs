use std::io;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time;

use crate::settings::Settings;
use crate::websocket::websocket_router;

mod backend;
pub mod settings;
pub mod simulate;
mod websocket;

pub use backend::MockBackend;

/// Serves the websocket endpoints on `listener` until the listener fails.
pub async fn serve(listener: TcpListener, backend: MockBackend) -> io::Result<()> {
    axum::serve(listener, websocket_router(backend)).await
}

/// Broadcasts simulated readings for every sector each `interval`.
pub fn spawn_sensor_updates(backend: MockBackend, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = time::interval(interval);

        loop {
            interval.tick().await;
            backend.push_sensor_updates().await;
        }
    })
}

pub async fn run(settings: &Settings) -> io::Result<()> {
    let address = format!("{}:{}", settings.mock.host, settings.mock.port);
    let listener = TcpListener::bind(&address).await?;

    tracing::info!("listening on {}", address);

    let backend = MockBackend::new();
    let updates = spawn_sensor_updates(backend.clone(), settings.mock.update_interval());

    let result = serve(listener, backend).await;
    updates.abort();
    result
}
