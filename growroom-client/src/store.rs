use std::collections::{BTreeMap, VecDeque};

use growroom_api::models::{
    DEFAULT_ERROR_PERCENTAGE, ScheduleWindow, SensorKind, ThresholdBand, ThresholdStart,
    clamp_error_percentage,
};
use growroom_api::{ControlType, Sector};
use parking_lot::{Mutex, RwLock};

use crate::command::{Echo, ResponseChannel};
use crate::error::{ClientError, Result};

/// Devices every sector starts with.
pub const DEFAULT_DEVICES: [&str; 3] = ["Light", "Motor Fan", "Pump"];

/// Settled log entries kept for inspection.
pub const MAX_SETTLED_MUTATIONS: usize = 64;

/// Unanswered submissions tracked at once. Older ones expire as failed.
pub const MAX_PENDING_MUTATIONS: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceState {
    pub id: String,
    pub status: bool,
    pub control_type: ControlType,
    pub schedule: ScheduleWindow,
    /// Set when the backend rejected the last change
    pub stale: bool,
}

impl DeviceState {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: false,
            control_type: ControlType::Schedule,
            schedule: ScheduleWindow::default(),
            stale: false,
        }
    }

    pub fn snapshot(&self) -> DeviceSnapshot {
        DeviceSnapshot {
            status: self.status,
            control_type: self.control_type,
            schedule: self.schedule,
        }
    }

    fn restore(&mut self, snapshot: DeviceSnapshot) {
        self.status = snapshot.status;
        self.control_type = snapshot.control_type;
        self.schedule = snapshot.schedule;
    }

    /// Schedule window to submit alongside the control type, if any.
    pub fn active_schedule(&self) -> Option<ScheduleWindow> {
        (self.control_type == ControlType::Schedule).then_some(self.schedule)
    }
}

/// The part of a device a mutation may change.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceSnapshot {
    pub status: bool,
    pub control_type: ControlType,
    pub schedule: ScheduleWindow,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdState {
    pub kind: SensorKind,
    pub target: f64,
    /// Latest reading, if any arrived
    pub value: Option<f64>,
    pub unit: String,
    pub error_percentage: f64,
    pub band: ThresholdBand,
    /// Monitoring was started on the backend
    pub active: bool,
    pub out_of_range: bool,
    pub message: Option<String>,
}

impl ThresholdState {
    pub fn new(kind: SensorKind, target: f64) -> Self {
        let mut threshold = Self {
            kind,
            target,
            value: None,
            unit: kind.default_unit().to_string(),
            error_percentage: DEFAULT_ERROR_PERCENTAGE,
            band: ThresholdBand::around(target, DEFAULT_ERROR_PERCENTAGE),
            active: false,
            out_of_range: false,
            message: None,
        };
        threshold.recompute();
        threshold
    }

    fn recompute(&mut self) {
        self.error_percentage = clamp_error_percentage(self.error_percentage);
        self.band = ThresholdBand::around(self.target, self.error_percentage);

        match self.value {
            Some(value) if !self.band.contains(value) => {
                self.out_of_range = true;
                self.message = Some(format!(
                    "Value outside ±{}% range ({:.1}-{:.1})",
                    self.error_percentage, self.band.min, self.band.max
                ));
            }
            _ => {
                self.out_of_range = false;
                self.message = None;
            }
        }
    }

    /// Payload starting threshold monitoring for this sensor.
    pub fn start_payload(&self) -> ThresholdStart {
        ThresholdStart::new(self.target, self.error_percentage, self.unit.clone())
    }
}

fn default_target(kind: SensorKind) -> f64 {
    match kind {
        SensorKind::Temperature => 25.0,
        SensorKind::Humidity => 60.0,
        SensorKind::Light => 500.0,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SectorState {
    pub devices: Vec<DeviceState>,
    pub thresholds: Vec<ThresholdState>,
}

impl Default for SectorState {
    fn default() -> Self {
        Self {
            devices: DEFAULT_DEVICES.into_iter().map(DeviceState::new).collect(),
            thresholds: SensorKind::ALL
                .into_iter()
                .map(|kind| ThresholdState::new(kind, default_target(kind)))
                .collect(),
        }
    }
}

impl SectorState {
    fn device_mut(&mut self, id: &str) -> Option<&mut DeviceState> {
        self.devices.iter_mut().find(|device| device.id == id)
    }

    fn threshold_mut(&mut self, kind: SensorKind) -> Option<&mut ThresholdState> {
        self.thresholds.iter_mut().find(|threshold| threshold.kind == kind)
    }
}

pub type MutationId = u64;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MutationTarget {
    Device(String),
    Threshold(SensorKind),
}

impl MutationTarget {
    /// Device name as sent on the wire.
    pub fn name(&self) -> &str {
        match self {
            MutationTarget::Device(id) => id,
            MutationTarget::Threshold(kind) => kind.as_str(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationState {
    Pending,
    Confirmed,
    Failed,
}

/// One submitted change awaiting the backend's verdict.
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    pub id: MutationId,
    pub sector: Sector,
    pub target: MutationTarget,
    /// Response event expected to answer it
    pub channel: ResponseChannel,
    /// State to restore when submission fails
    pub previous: Option<DeviceSnapshot>,
    pub state: MutationState,
}

enum Selector<'a> {
    Id(MutationId),
    Response(ResponseChannel, &'a Echo),
    Oldest,
}

#[derive(Debug, Default)]
struct MutationLog {
    next_id: MutationId,
    entries: VecDeque<Mutation>,
}

impl MutationLog {
    /// Appends a pending entry, expiring the oldest pending ones beyond
    /// [`MAX_PENDING_MUTATIONS`]. Returns the new id and the expired entries.
    fn push(
        &mut self,
        sector: Sector,
        target: MutationTarget,
        channel: ResponseChannel,
        previous: Option<DeviceSnapshot>,
    ) -> (MutationId, Vec<Mutation>) {
        self.next_id += 1;
        self.entries.push_back(Mutation {
            id: self.next_id,
            sector,
            target,
            channel,
            previous,
            state: MutationState::Pending,
        });

        let mut expired = Vec::new();
        while self.pending() > MAX_PENDING_MUTATIONS {
            match self.settle(Selector::Oldest, MutationState::Failed) {
                Some(mutation) => expired.push(mutation),
                None => break,
            }
        }

        (self.next_id, expired)
    }

    fn pending(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.state == MutationState::Pending)
            .count()
    }

    fn select(&self, selector: &Selector<'_>) -> Option<usize> {
        let mut pending = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.state == MutationState::Pending);

        let found = match selector {
            Selector::Id(id) => pending.find(|(_, entry)| entry.id == *id),
            Selector::Oldest => pending.next(),
            // Echoed targets pick their own entry, bare responses the oldest one.
            Selector::Response(channel, echo) => pending.find(|(_, entry)| {
                entry.channel == *channel
                    && (echo.is_empty() || echo.matches(entry.sector, entry.target.name()))
            }),
        };

        found.map(|(index, _)| index)
    }

    fn settle(&mut self, selector: Selector<'_>, state: MutationState) -> Option<Mutation> {
        let index = self.select(&selector)?;
        let entry = &mut self.entries[index];
        entry.state = state;
        let settled = entry.clone();

        self.prune();
        Some(settled)
    }

    fn prune(&mut self) {
        let mut settled = self
            .entries
            .iter()
            .filter(|entry| entry.state != MutationState::Pending)
            .count();

        while settled > MAX_SETTLED_MUTATIONS {
            let Some(index) = self
                .entries
                .iter()
                .position(|entry| entry.state != MutationState::Pending)
            else {
                break;
            };
            self.entries.remove(index);
            settled -= 1;
        }
    }
}

fn expire(sectors: &mut BTreeMap<Sector, SectorState>, expired: &[Mutation]) {
    for mutation in expired {
        tracing::warn!(
            mutation = mutation.id,
            sector = %mutation.sector,
            device = mutation.target.name(),
            "Expired unanswered change"
        );
        mark_stale(sectors, mutation);
    }
}

fn mark_stale(sectors: &mut BTreeMap<Sector, SectorState>, settled: &Mutation) {
    let Some(state) = sectors.get_mut(&settled.sector) else {
        return;
    };

    match &settled.target {
        MutationTarget::Device(id) => {
            if let Some(device) = state.device_mut(id) {
                device.stale = true;
            }
        }
        MutationTarget::Threshold(kind) => {
            if let Some(threshold) = state.threshold_mut(*kind) {
                threshold.active = false;
            }
        }
    }
}

/// Client side mirror of every sector's devices and thresholds.
///
/// Device changes made by the operator are applied immediately and logged as
/// pending mutations. A submission that fails synchronously is rolled back.
/// Responses settle the pending mutation they echo, or the oldest one on
/// their response event, and a rejected change leaves its device `stale`.
pub struct SectorStore {
    sectors: RwLock<BTreeMap<Sector, SectorState>>,
    log: Mutex<MutationLog>,
}

impl Default for SectorStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SectorStore {
    pub fn new() -> Self {
        Self {
            sectors: RwLock::new(
                Sector::ALL
                    .into_iter()
                    .map(|sector| (sector, SectorState::default()))
                    .collect(),
            ),
            log: Mutex::new(MutationLog::default()),
        }
    }

    pub fn sector(&self, sector: Sector) -> SectorState {
        self.sectors.read().get(&sector).cloned().unwrap_or_default()
    }

    pub fn devices(&self, sector: Sector) -> Vec<DeviceState> {
        self.sector(sector).devices
    }

    pub fn device(&self, sector: Sector, id: &str) -> Result<DeviceState> {
        self.sectors
            .read()
            .get(&sector)
            .and_then(|state| state.devices.iter().find(|device| device.id == id))
            .cloned()
            .ok_or_else(|| ClientError::unknown_device(sector, id))
    }

    pub fn thresholds(&self, sector: Sector) -> Vec<ThresholdState> {
        self.sector(sector).thresholds
    }

    pub fn threshold(&self, sector: Sector, kind: SensorKind) -> Result<ThresholdState> {
        self.sectors
            .read()
            .get(&sector)
            .and_then(|state| state.thresholds.iter().find(|t| t.kind == kind))
            .cloned()
            .ok_or_else(|| ClientError::unknown_device(sector, kind.as_str()))
    }

    /// Applies `change` to a device and logs it as a pending mutation.
    pub fn begin<F>(
        &self,
        sector: Sector,
        id: &str,
        channel: ResponseChannel,
        change: F,
    ) -> Result<(MutationId, DeviceState)>
    where
        F: FnOnce(&mut DeviceState),
    {
        let mut sectors = self.sectors.write();
        let device = sectors
            .get_mut(&sector)
            .and_then(|state| state.device_mut(id))
            .ok_or_else(|| ClientError::unknown_device(sector, id))?;

        let previous = device.snapshot();
        change(device);
        let updated = device.clone();

        let (mutation, expired) = self.log.lock().push(
            sector,
            MutationTarget::Device(updated.id.clone()),
            channel,
            Some(previous),
        );
        expire(&mut sectors, &expired);

        tracing::debug!(
            mutation,
            sector = %sector,
            device = %updated.id,
            "Applied local change"
        );

        Ok((mutation, updated))
    }

    /// Changes a device without expecting a backend response.
    pub fn update_device<F>(&self, sector: Sector, id: &str, change: F) -> Result<DeviceState>
    where
        F: FnOnce(&mut DeviceState),
    {
        let mut sectors = self.sectors.write();
        let device = sectors
            .get_mut(&sector)
            .and_then(|state| state.device_mut(id))
            .ok_or_else(|| ClientError::unknown_device(sector, id))?;

        change(device);
        Ok(device.clone())
    }

    /// Logs a submission that changes nothing locally.
    pub fn track(
        &self,
        sector: Sector,
        target: MutationTarget,
        channel: ResponseChannel,
    ) -> MutationId {
        let mut sectors = self.sectors.write();
        let (mutation, expired) = self.log.lock().push(sector, target, channel, None);
        expire(&mut sectors, &expired);
        mutation
    }

    /// Undoes a mutation whose submission failed and marks it failed.
    pub fn rollback(&self, mutation: MutationId) -> Option<Mutation> {
        let settled = self.log.lock().settle(Selector::Id(mutation), MutationState::Failed)?;

        if let (MutationTarget::Device(id), Some(previous)) = (&settled.target, settled.previous) {
            if let Some(device) = self
                .sectors
                .write()
                .get_mut(&settled.sector)
                .and_then(|state| state.device_mut(id))
            {
                device.restore(previous);
            }
            tracing::warn!(sector = %settled.sector, device = %id, "Rolled back local change");
        }

        Some(settled)
    }

    /// Settles the mutation a successful response on `channel` answers.
    pub fn confirm(&self, channel: ResponseChannel, echo: &Echo) -> Option<Mutation> {
        let settled = self
            .log
            .lock()
            .settle(Selector::Response(channel, echo), MutationState::Confirmed)?;

        if let MutationTarget::Device(id) = &settled.target {
            if let Some(device) = self
                .sectors
                .write()
                .get_mut(&settled.sector)
                .and_then(|state| state.device_mut(id))
            {
                device.stale = false;
            }
        }

        Some(settled)
    }

    /// Settles the mutation a rejection on `channel` answers.
    pub fn fail(&self, channel: ResponseChannel, echo: &Echo) -> Option<Mutation> {
        let settled = self
            .log
            .lock()
            .settle(Selector::Response(channel, echo), MutationState::Failed)?;
        mark_stale(&mut self.sectors.write(), &settled);
        Some(settled)
    }

    /// Fails every pending mutation; their responses can no longer arrive.
    pub fn abandon_pending(&self) -> usize {
        let mut abandoned = Vec::new();
        {
            let mut log = self.log.lock();
            while let Some(settled) = log.settle(Selector::Oldest, MutationState::Failed) {
                abandoned.push(settled);
            }
        }

        let mut sectors = self.sectors.write();
        for settled in &abandoned {
            mark_stale(&mut sectors, settled);
        }
        drop(sectors);

        if !abandoned.is_empty() {
            tracing::warn!("Abandoned {} unconfirmed changes", abandoned.len());
        }

        abandoned.len()
    }

    pub fn mutations(&self) -> Vec<Mutation> {
        self.log.lock().entries.iter().cloned().collect()
    }

    pub fn pending_count(&self) -> usize {
        self.log.lock().pending()
    }

    pub fn set_threshold_target(&self, sector: Sector, kind: SensorKind, target: f64) -> Result<ThresholdState> {
        self.update_threshold(sector, kind, |threshold| threshold.target = target)
    }

    pub fn set_threshold_value(&self, sector: Sector, kind: SensorKind, value: f64) -> Result<ThresholdState> {
        self.update_threshold(sector, kind, |threshold| threshold.value = Some(value))
    }

    /// Zero and non-finite input fall back to the default before clamping.
    pub fn set_error_percentage(
        &self,
        sector: Sector,
        kind: SensorKind,
        percentage: f64,
    ) -> Result<ThresholdState> {
        self.update_threshold(sector, kind, |threshold| threshold.error_percentage = percentage)
    }

    pub fn set_threshold_active(&self, sector: Sector, kind: SensorKind, active: bool) -> Result<ThresholdState> {
        self.update_threshold(sector, kind, |threshold| threshold.active = active)
    }

    /// Feeds a pushed sensor reading into the matching threshold.
    pub fn apply_reading(&self, sector: Sector, kind: SensorKind, value: f64) {
        if let Err(e) = self.set_threshold_value(sector, kind, value) {
            tracing::warn!("Ignoring reading: {}", e);
        }
    }

    fn update_threshold<F>(&self, sector: Sector, kind: SensorKind, change: F) -> Result<ThresholdState>
    where
        F: FnOnce(&mut ThresholdState),
    {
        let mut sectors = self.sectors.write();
        let threshold = sectors
            .get_mut(&sector)
            .and_then(|state| state.threshold_mut(kind))
            .ok_or_else(|| ClientError::unknown_device(sector, kind.as_str()))?;

        change(threshold);
        threshold.recompute();
        Ok(threshold.clone())
    }
}
