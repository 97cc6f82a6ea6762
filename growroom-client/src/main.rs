use growroom_client::Client;
use growroom_client::settings::Settings;
use growroom_client::storage;
use tokio::sync::broadcast::error::RecvError;

#[tokio::main]
async fn main() {
    let settings = Settings::new().expect("Failed to load settings.");

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            let app_name = env!("CARGO_PKG_NAME").replace('-', "_");
            let level = settings.logger.level.as_str();

            format!("growroom={level},{app_name}={level}").into()
        }))
        .init();

    let storage = storage::open(&settings.storage).expect("Failed to open storage.");
    let client = Client::start(&settings, storage);

    let mut notifications = client.notifications();
    let mut state = client.watch_state();

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            notification = notifications.recv() => match notification {
                Ok(notification) => {
                    tracing::info!(level = %notification.level, "{}", notification.message);
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Skipped {} notifications", skipped);
                }
                Err(RecvError::Closed) => break,
            },
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *state.borrow_and_update();
                tracing::info!("{}", current.label());
            }
        }
    }

    client.shutdown();
}
