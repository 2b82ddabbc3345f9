use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::device::constants::{NO_DATA, STATUS_DISCONNECTED};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetrySample {
    pub payload: String,
    pub received_at_epoch_millis: i64,
}

impl TelemetrySample {
    pub fn new(payload: impl Into<String>, received_at_epoch_millis: i64) -> Self {
        TelemetrySample { payload: payload.into(), received_at_epoch_millis }
    }

    /// Decodes a notification payload received right now. Empty payloads carry no sample.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.is_empty() {
            return None;
        }

        let payload = String::from_utf8_lossy(bytes).into_owned();
        Some(TelemetrySample::new(payload, now_epoch_millis()))
    }
}

pub fn now_epoch_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or(0)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    pub latest_sample: Option<TelemetrySample>,
    pub connection_status: String,
}

impl Default for TelemetrySnapshot {
    fn default() -> Self {
        TelemetrySnapshot {
            latest_sample: None,
            connection_status: STATUS_DISCONNECTED.to_string(),
        }
    }
}

/// The JSON document served on `/status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusDocument {
    pub last_received_data: String,
    pub timestamp: i64,
    pub connection_status: String,
}

impl From<&TelemetrySnapshot> for StatusDocument {
    fn from(snapshot: &TelemetrySnapshot) -> Self {
        let (last_received_data, timestamp) = match &snapshot.latest_sample {
            Some(sample) => (sample.payload.clone(), sample.received_at_epoch_millis),
            None => (NO_DATA.to_string(), 0),
        };

        StatusDocument {
            last_received_data,
            timestamp,
            connection_status: snapshot.connection_status.clone(),
        }
    }
}

/// Single-slot observable holding the latest sample and the connection status.
///
/// Cloning yields another handle to the same cell. Each field write is applied atomically and
/// readers only ever hold the lock for the duration of a clone.
#[derive(Clone)]
pub struct TelemetryState {
    cell: Arc<watch::Sender<TelemetrySnapshot>>,
}

impl TelemetryState {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(TelemetrySnapshot::default());
        TelemetryState { cell: Arc::new(sender) }
    }

    pub fn update(&self, sample: TelemetrySample) {
        self.cell.send_modify(|snapshot| snapshot.latest_sample = Some(sample));
    }

    pub fn update_status(&self, status: impl Into<String>) {
        let status = status.into();
        self.cell.send_modify(|snapshot| snapshot.connection_status = status);
    }

    pub fn read(&self) -> TelemetrySnapshot {
        self.cell.borrow().clone()
    }

    pub fn document(&self) -> StatusDocument {
        StatusDocument::from(&*self.cell.borrow())
    }

    /// Back to the defaults: no sample, "Disconnected".
    pub fn reset(&self) {
        self.cell.send_replace(TelemetrySnapshot::default());
    }

    pub fn subscribe(&self) -> watch::Receiver<TelemetrySnapshot> {
        self.cell.subscribe()
    }
}

impl Default for TelemetryState {
    fn default() -> Self {
        TelemetryState::new()
    }
}
