use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use futures::channel::mpsc::Receiver;

use crate::device::permissions::Permissions;
use crate::device::radio::Radio;
use crate::device::scanner::DeviceDiscoveryScanner;
use crate::device::session::ConnectionSession;
use crate::device::types::{ConnectionState, PeripheralHandle, SessionId};
use crate::server::http::StatusHttpListener;
use crate::state::events::{BridgeEvent, EventBus};
use crate::state::telemetry::{StatusDocument, TelemetryState};

/// Composition root: one telemetry cell and one event bus shared by the scanner, the session
/// and the HTTP listener.
pub struct Bridge<R: Radio> {
    telemetry: TelemetryState,
    bus: EventBus,
    scanner: DeviceDiscoveryScanner<R>,
    session: ConnectionSession<R>,
}

impl<R: Radio> Bridge<R> {
    pub fn new(radio: Arc<R>, permissions: Arc<dyn Permissions>, scan_window: Duration) -> Self {
        let telemetry = TelemetryState::new();
        let bus = EventBus::new();
        let session = ConnectionSession::new(radio.clone(), permissions.clone(), telemetry.clone(), bus.clone());
        let scanner = DeviceDiscoveryScanner::new(radio, permissions, bus.clone(), scan_window);

        let tracker = session.clone();
        scanner.on_activity(move |active| tracker.set_scanning(active));

        Bridge { telemetry, bus, scanner, session }
    }

    pub fn start_discovery(&self) -> bool {
        self.scanner.start_discovery()
    }

    pub fn stop_discovery(&self) {
        self.scanner.stop_discovery()
    }

    pub fn is_scanning(&self) -> bool {
        self.scanner.is_scanning()
    }

    pub fn devices(&self) -> Vec<PeripheralHandle> {
        self.scanner.discovered()
    }

    pub fn connect(&self, peripheral: PeripheralHandle) -> Option<SessionId> {
        self.session.connect(peripheral)
    }

    /// Connects to a peripheral of the current discovery cycle by address or name.
    pub fn connect_to(&self, target: &str) -> Option<SessionId> {
        let peripheral = self.devices().into_iter().find(|peripheral| peripheral.matches(target))?;
        self.connect(peripheral)
    }

    pub fn disconnect(&self) {
        self.session.disconnect()
    }

    pub fn state(&self) -> ConnectionState {
        self.session.state()
    }

    pub fn peripheral(&self) -> Option<PeripheralHandle> {
        self.session.peripheral()
    }

    pub fn telemetry(&self) -> TelemetryState {
        self.telemetry.clone()
    }

    pub fn document(&self) -> StatusDocument {
        self.telemetry.document()
    }

    pub fn subscribe(&self) -> Receiver<BridgeEvent> {
        self.bus.subscribe()
    }

    pub fn http_listener(&self, address: SocketAddr) -> StatusHttpListener {
        StatusHttpListener::new(self.telemetry.clone(), address)
    }
}
