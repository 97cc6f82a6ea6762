use std::sync::Arc;

use growroom_api::events;
use growroom_api::models::SensorKind;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::command::{CommandEncoder, ResponseChannel};
use crate::connection::{Connection, ConnectionState, Transport, spawn_watchdog};
use crate::control::ControlPanel;
use crate::dispatcher::{Dispatcher, Subscription};
use crate::notes::NoteBook;
use crate::notify::{Notification, Notifier};
use crate::settings::Settings;
use crate::storage::LocalStorage;
use crate::store::SectorStore;
use crate::sync::ReconnectSync;
use crate::telemetry::Telemetry;

/// Owns the connection and every component borrowing it.
///
/// Dropping the client, or calling [`Client::shutdown`], removes its
/// listeners, stops its tasks and closes the connection.
pub struct Client {
    connection: Arc<Connection>,
    dispatcher: Arc<Dispatcher>,
    encoder: Arc<CommandEncoder>,
    store: Arc<SectorStore>,
    control: Arc<ControlPanel>,
    notes: Arc<NoteBook>,
    telemetry: Arc<Telemetry>,
    sync: Arc<ReconnectSync>,
    notifier: Notifier,
    subscriptions: Mutex<Vec<Subscription>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Client {
    /// Wires every component and starts connecting. Must be called within a
    /// tokio runtime.
    pub fn start(settings: &Settings, storage: Arc<dyn LocalStorage>) -> Self {
        let dispatcher = Dispatcher::new();
        let connection = Arc::new(Connection::new(
            settings.server.endpoint.clone(),
            settings.connection.clone(),
            dispatcher.clone(),
        ));
        let transport: Arc<dyn Transport> = connection.clone();

        let encoder = Arc::new(CommandEncoder::new(transport.clone(), dispatcher.clone()));
        let store = Arc::new(SectorStore::new());
        let notifier = Notifier::new();
        let control = Arc::new(ControlPanel::new(
            encoder.clone(),
            store.clone(),
            storage.clone(),
            notifier.clone(),
        ));
        let notes = Arc::new(NoteBook::new(encoder.clone()));
        let telemetry = Arc::new(Telemetry::new(encoder.clone(), store.clone()));
        let sync = Arc::new(ReconnectSync::new(encoder.clone(), store.clone(), storage));

        let subscriptions = subscribe_all(&dispatcher, &control, &notes, &telemetry);

        let tasks = vec![
            sync.clone().spawn(connection.watch_state()),
            spawn_state_watcher(
                connection.watch_state(),
                telemetry.clone(),
                notes.clone(),
                store.clone(),
                encoder.clone(),
            ),
            spawn_watchdog(transport, settings.connection.poll_interval()),
        ];

        tracing::info!("Starting client for {}", settings.server.endpoint);
        connection.connect();

        Self {
            connection,
            dispatcher,
            encoder,
            store,
            control,
            notes,
            telemetry,
            sync,
            notifier,
            subscriptions: Mutex::new(subscriptions),
            tasks: Mutex::new(tasks),
        }
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn encoder(&self) -> &Arc<CommandEncoder> {
        &self.encoder
    }

    pub fn store(&self) -> &Arc<SectorStore> {
        &self.store
    }

    pub fn control(&self) -> &Arc<ControlPanel> {
        &self.control
    }

    pub fn notes(&self) -> &Arc<NoteBook> {
        &self.notes
    }

    pub fn telemetry(&self) -> &Arc<Telemetry> {
        &self.telemetry
    }

    pub fn sync(&self) -> &Arc<ReconnectSync> {
        &self.sync
    }

    pub fn notifications(&self) -> broadcast::Receiver<Notification> {
        self.notifier.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.watch_state()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn ping(&self) -> bool {
        self.encoder.send_message(events::PING, json!({}))
    }

    pub fn shutdown(&self) {
        let subscriptions: Vec<Subscription> = self.subscriptions.lock().drain(..).collect();
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();

        if subscriptions.is_empty() && tasks.is_empty() {
            return;
        }

        drop(subscriptions);
        for task in tasks {
            task.abort();
        }
        self.connection.disconnect();

        tracing::info!("Client shut down");
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn subscribe_all(
    dispatcher: &Arc<Dispatcher>,
    control: &Arc<ControlPanel>,
    notes: &Arc<NoteBook>,
    telemetry: &Arc<Telemetry>,
) -> Vec<Subscription> {
    let mut subscriptions = Vec::new();

    for channel in ResponseChannel::ALL {
        let control = control.clone();
        subscriptions.push(dispatcher.add_message_listener(channel.response_event(), move |data| {
            control.handle_response(channel, data);
        }));
    }

    for kind in SensorKind::ALL {
        let telemetry = telemetry.clone();
        subscriptions.push(dispatcher.add_message_listener(kind.response_event(), move |data| {
            telemetry.handle_response(kind, data);
        }));
    }

    let pushed = telemetry.clone();
    subscriptions.push(dispatcher.add_message_listener(events::SENSOR_UPDATE, move |data| {
        pushed.handle_sensor_update(data);
    }));

    let notes = notes.clone();
    subscriptions.push(dispatcher.add_message_listener(events::CSV_NOTE_RESPONSE, move |data| {
        notes.handle_response(data);
    }));

    subscriptions.push(dispatcher.add_message_listener(events::PONG, |data| {
        tracing::debug!("Pong: {}", data);
    }));

    subscriptions
}

/// Requests readings and notes on every connect and abandons unconfirmed
/// changes and their acknowledgement listeners on every drop.
fn spawn_state_watcher(
    mut state: watch::Receiver<ConnectionState>,
    telemetry: Arc<Telemetry>,
    notes: Arc<NoteBook>,
    store: Arc<SectorStore>,
    encoder: Arc<CommandEncoder>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut previous = ConnectionState::Disconnected;

        loop {
            let current = *state.borrow_and_update();

            if current != previous {
                tracing::info!("Connection state: {}", current.label());

                if current.is_connected() {
                    telemetry.request_readings();
                    notes.request_notes();
                } else if previous.is_connected() {
                    store.abandon_pending();
                    encoder.abandon_acks();
                }

                previous = current;
            }

            if state.changed().await.is_err() {
                break;
            }
        }
    })
}
