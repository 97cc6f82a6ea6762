use std::collections::BTreeMap;
use std::sync::Arc;

use growroom_api::models::{Reading, SensorKind, SensorResponse, SensorUpdate, SensorUpdatePayload};
use growroom_api::Sector;
use parking_lot::RwLock;
use serde_json::{Value, json};

use crate::command::CommandEncoder;
use crate::store::SectorStore;

/// Formats a reading with the kind's dashboard precision, or `--`.
pub fn format_reading(kind: SensorKind, value: Option<f64>) -> String {
    match value {
        Some(value) => format!("{:.*}", kind.precision(), value),
        None => String::from("--"),
    }
}

/// Latest sensor readings, requested on connect and pushed by the backend.
pub struct Telemetry {
    encoder: Arc<CommandEncoder>,
    store: Arc<SectorStore>,
    latest: RwLock<BTreeMap<SensorKind, Reading>>,
    sectors: RwLock<BTreeMap<Sector, SensorUpdate>>,
}

impl Telemetry {
    pub fn new(encoder: Arc<CommandEncoder>, store: Arc<SectorStore>) -> Self {
        Self {
            encoder,
            store,
            latest: RwLock::new(BTreeMap::new()),
            sectors: RwLock::new(BTreeMap::new()),
        }
    }

    /// Asks for every reading, returning how many requests went out.
    pub fn request_readings(&self) -> usize {
        SensorKind::ALL
            .into_iter()
            .filter(|kind| self.encoder.send_message(kind.request_event(), json!({})))
            .count()
    }

    pub fn handle_response(&self, kind: SensorKind, data: &Value) {
        let response = match serde_json::from_value::<SensorResponse>(data.clone()) {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("Dropping malformed {} response: {}", kind, e);
                return;
            }
        };

        match response {
            SensorResponse {
                success: true,
                data: Some(reading),
            } => {
                tracing::debug!("{} is {}", kind, reading.value);
                self.latest.write().insert(kind, reading);
            }
            _ => tracing::error!("Backend failed to report {}", kind),
        }
    }

    pub fn handle_sensor_update(&self, data: &Value) {
        let update = match serde_json::from_value::<SensorUpdatePayload>(data.clone()) {
            Ok(payload) => payload.data,
            Err(e) => {
                tracing::warn!("Dropping malformed sensor update: {}", e);
                return;
            }
        };

        let sector = update.sector;
        for kind in SensorKind::ALL {
            if let Some(value) = update.get(kind) {
                self.store.apply_reading(sector, kind, value);
            }
        }

        let mut sectors = self.sectors.write();
        let entry = sectors.entry(sector).or_insert_with(|| SensorUpdate {
            temperature: None,
            humidity: None,
            light: None,
            sector,
        });
        entry.temperature = update.temperature.or(entry.temperature);
        entry.humidity = update.humidity.or(entry.humidity);
        entry.light = update.light.or(entry.light);
    }

    pub fn reading(&self, kind: SensorKind) -> Option<Reading> {
        self.latest.read().get(&kind).cloned()
    }

    /// Most recent pushed values of one sector.
    pub fn sector_readings(&self, sector: Sector) -> Option<SensorUpdate> {
        self.sectors.read().get(&sector).cloned()
    }

    /// Dashboard text for the latest reading, e.g. `24.5 °C`.
    pub fn display(&self, kind: SensorKind) -> String {
        match self.reading(kind) {
            Some(reading) => {
                let unit = reading.unit.as_deref().unwrap_or(kind.default_unit());
                format!("{} {}", format_reading(kind, Some(reading.value)), unit)
            }
            None => format_reading(kind, None),
        }
    }
}
