use std::sync::{Arc, Mutex, MutexGuard};
use futures::StreamExt;
use log::{debug, info, warn};
use tokio::spawn;
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;

use crate::device::constants::{status_connected, status_error, DISCONNECT_DEADLINE, STATUS_CONNECTING, STATUS_DISCONNECTED};
use crate::device::permissions::{Permission, Permissions};
use crate::device::radio::{GattLink, Radio};
use crate::device::types::{CharacteristicInfo, ConnectionState, LinkEvent, PeripheralHandle, SessionId};
use crate::error::LinkError;
use crate::state::events::{BridgeEvent, EventBus};
use crate::state::telemetry::{TelemetrySample, TelemetryState};

struct ActiveSession {
    id: SessionId,
    peripheral: PeripheralHandle,
    cancel: CancellationToken,
}

struct Machine {
    last_id: u64,
    state: ConnectionState,
    active: Option<ActiveSession>,
}

impl Machine {
    fn is_current(&self, id: SessionId) -> bool {
        matches!(&self.active, Some(active) if active.id == id)
    }

    fn transition(&mut self, state: ConnectionState, bus: &EventBus) {
        if self.state != state {
            debug!("Connection state {:?} -> {:?}", self.state, state);
            self.state = state.clone();
            bus.publish(BridgeEvent::StateChange(state));
        }
    }

    // Cancels the driver of the active session, if any
    fn release(&mut self) -> Option<ActiveSession> {
        let active = self.active.take();
        if let Some(active) = &active {
            active.cancel.cancel();
        }
        active
    }
}

struct SessionShared<R: Radio> {
    radio: Arc<R>,
    permissions: Arc<dyn Permissions>,
    telemetry: TelemetryState,
    bus: EventBus,
    machine: Mutex<Machine>,
}

/// Owner of the (at most one) GATT connection.
///
/// Public operations return immediately; the radio work happens on a spawned driver task that
/// reports back through the `on_*` callbacks. Every callback carries the [`SessionId`] it was
/// issued for and is ignored once that session is no longer current.
pub struct ConnectionSession<R: Radio> {
    shared: Arc<SessionShared<R>>,
}

impl<R: Radio> Clone for ConnectionSession<R> {
    fn clone(&self) -> Self {
        ConnectionSession { shared: self.shared.clone() }
    }
}

impl<R: Radio> ConnectionSession<R> {
    pub fn new(radio: Arc<R>, permissions: Arc<dyn Permissions>, telemetry: TelemetryState, bus: EventBus) -> Self {
        let machine = Machine {
            last_id: 0,
            state: ConnectionState::Disconnected,
            active: None,
        };

        ConnectionSession {
            shared: Arc::new(SessionShared {
                radio,
                permissions,
                telemetry,
                bus,
                machine: Mutex::new(machine),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Machine> {
        self.shared.machine.lock().expect("Failed to lock connection state machine")
    }

    pub fn state(&self) -> ConnectionState {
        self.lock().state.clone()
    }

    pub fn peripheral(&self) -> Option<PeripheralHandle> {
        self.lock().active.as_ref().map(|active| active.peripheral.clone())
    }

    /// Tears down any existing session and starts connecting to `peripheral`.
    ///
    /// Returns `None` without connect permission.
    pub fn connect(&self, peripheral: PeripheralHandle) -> Option<SessionId> {
        if !self.shared.permissions.has_permission(Permission::Connect) {
            debug!("No connect permission; not connecting to {}", peripheral);
            return None;
        }

        let mut machine = self.lock();
        if let Some(previous) = machine.release() {
            info!("Tearing down session {} with {}", previous.id, previous.peripheral);
        }

        machine.last_id += 1;
        let id = SessionId(machine.last_id);
        let cancel = CancellationToken::new();
        machine.active = Some(ActiveSession {
            id,
            peripheral: peripheral.clone(),
            cancel: cancel.clone(),
        });

        info!("Session {}: connecting to {}", id, peripheral);
        self.shared.telemetry.update_status(STATUS_CONNECTING);
        machine.transition(ConnectionState::Connecting, &self.shared.bus);

        spawn(drive_session(self.clone(), id, peripheral, cancel));
        Some(id)
    }

    pub fn disconnect(&self) {
        let mut machine = self.lock();

        match machine.release() {
            Some(previous) => {
                info!("Session {}: disconnecting from {}", previous.id, previous.peripheral);
                self.shared.telemetry.reset();
                machine.transition(ConnectionState::Disconnected, &self.shared.bus);
                self.shared.bus.publish(BridgeEvent::Disconnected);
            },
            None => {
                if matches!(machine.state, ConnectionState::Failed(_)) {
                    self.shared.telemetry.reset();
                    machine.transition(ConnectionState::Disconnected, &self.shared.bus);
                }
            },
        }
    }

    /// Enters `Scanning` while idle, and leaves it again when discovery ends.
    pub fn set_scanning(&self, scanning: bool) {
        let mut machine = self.lock();

        if scanning {
            if machine.active.is_none() && machine.state.is_idle() {
                machine.transition(ConnectionState::Scanning, &self.shared.bus);
            }
        } else if machine.state == ConnectionState::Scanning {
            machine.transition(ConnectionState::Disconnected, &self.shared.bus);
        }
    }

    fn fail(&self, machine: &mut Machine, err: LinkError) {
        let id = machine.active.as_ref().map(|active| active.id);
        warn!("Session {:?}: link failure: {:?}", id, err);

        machine.release();
        self.shared.telemetry.update_status(status_error(&err));
        machine.transition(ConnectionState::Failed(err.to_string()), &self.shared.bus);
        self.shared.bus.publish(BridgeEvent::Disconnected);
    }

    /// Outcome of the connection attempt. Returns whether `id` is still the current session and
    /// should continue with service discovery.
    pub fn on_link_established(&self, id: SessionId, result: Result<(), LinkError>) -> bool {
        let mut machine = self.lock();
        if !machine.is_current(id) {
            debug!("Ignoring link result for stale session {}", id);
            return false;
        }

        if let Err(err) = result {
            self.fail(&mut machine, err);
            return false;
        }

        if machine.state != ConnectionState::Connecting {
            debug!("Session {}: unexpected link result in state {:?}", id, machine.state);
            return false;
        }

        let peripheral = match &machine.active {
            Some(active) => active.peripheral.clone(),
            None => return false,
        };

        info!("Session {}: connected to {}", id, peripheral);
        self.shared.telemetry.update_status(status_connected(&peripheral.address));
        self.shared.bus.publish(BridgeEvent::Connected(peripheral));
        machine.transition(ConnectionState::ServicesDiscovered, &self.shared.bus);
        true
    }

    /// Outcome of service discovery. Returns the characteristics to subscribe to (those with the
    /// notify capability), or `None` when the session is over.
    pub fn on_services_discovered(&self, id: SessionId, result: Result<Vec<CharacteristicInfo>, LinkError>) -> Option<Vec<CharacteristicInfo>> {
        let mut machine = self.lock();
        if !machine.is_current(id) {
            debug!("Ignoring discovered services for stale session {}", id);
            return None;
        }

        let characteristics = match result {
            Ok(v) => v,
            Err(err) => {
                self.fail(&mut machine, err);
                return None;
            },
        };

        if machine.state != ConnectionState::ServicesDiscovered {
            return None;
        }

        self.shared.bus.publish(BridgeEvent::ServicesDiscovered);

        let (notify, skipped): (Vec<_>, Vec<_>) = characteristics
            .into_iter()
            .partition(|characteristic| characteristic.notify);

        for characteristic in &skipped {
            debug!("Session {}: characteristic {} can not notify; skipping", id, characteristic.uuid);
        }
        if notify.is_empty() {
            warn!("Session {}: peripheral has no characteristic with notify capability", id);
        }

        Some(notify)
    }

    pub fn on_notifications_enabled(&self, id: SessionId) -> bool {
        let mut machine = self.lock();
        if !machine.is_current(id) {
            debug!("Ignoring notification setup for stale session {}", id);
            return false;
        }

        if machine.state == ConnectionState::ServicesDiscovered {
            info!("Session {}: streaming", id);
            machine.transition(ConnectionState::Streaming, &self.shared.bus);
        }
        machine.state == ConnectionState::Streaming
    }

    /// An inbound notification. Empty payloads are dropped.
    pub fn on_notification(&self, id: SessionId, value: &[u8]) -> bool {
        let machine = self.lock();
        if !machine.is_current(id) {
            debug!("Ignoring notification for stale session {}", id);
            return false;
        }

        if !matches!(machine.state, ConnectionState::ServicesDiscovered | ConnectionState::Streaming) {
            return true;
        }

        match TelemetrySample::decode(value) {
            None => debug!("Session {}: dropping empty notification", id),
            Some(sample) => {
                debug!("Session {}: received {:?}", id, sample.payload);
                self.shared.telemetry.update(sample.clone());
                self.shared.bus.publish(BridgeEvent::DataAvailable(sample));
            },
        }

        true
    }

    /// The link went away, cleanly (`cause` is None) or because of an error.
    pub fn on_link_lost(&self, id: SessionId, cause: Option<LinkError>) -> bool {
        let mut machine = self.lock();
        if !machine.is_current(id) {
            debug!("Ignoring link loss for stale session {}", id);
            return false;
        }

        machine.release();
        let status = match &cause {
            None => STATUS_DISCONNECTED.to_string(),
            Some(err) => status_error(err),
        };
        info!("Session {}: link lost ({})", id, status);

        self.shared.telemetry.update_status(status);
        machine.transition(ConnectionState::Disconnected, &self.shared.bus);
        self.shared.bus.publish(BridgeEvent::Disconnected);
        true
    }
}

async fn drive_session<R: Radio>(session: ConnectionSession<R>, id: SessionId, peripheral: PeripheralHandle, cancel: CancellationToken) {
    let radio = session.shared.radio.clone();

    let link = tokio::select! {
        biased;
        _ = cancel.cancelled() => return,
        result = radio.open_link(&peripheral) => match result {
            Ok(link) => link,
            Err(err) => {
                session.on_link_established(id, Err(err));
                return;
            },
        },
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => debug!("Session {} cancelled", id),
        _ = run_link(&session, id, &link) => {},
    }

    match timeout(Duration::from_millis(DISCONNECT_DEADLINE), link.disconnect()).await {
        Err(_) => warn!("Session {}: disconnecting took too long", id),
        Ok(Err(err)) => warn!("Session {}: failed to disconnect: {:?}", id, err),
        Ok(Ok(())) => debug!("Session {}: link released", id),
    }
}

async fn run_link<R: Radio>(session: &ConnectionSession<R>, id: SessionId, link: &R::Link) {
    if !session.on_link_established(id, link.connect().await) {
        return;
    }

    let notify = match session.on_services_discovered(id, link.discover_characteristics().await) {
        Some(v) => v,
        None => return,
    };

    // take the event stream before subscribing so the first notification is not lost
    let mut events = match link.events().await {
        Ok(v) => v,
        Err(err) => {
            session.on_link_lost(id, Some(err));
            return;
        },
    };

    for characteristic in &notify {
        if let Err(err) = link.subscribe(characteristic).await {
            warn!("Session {}: failed to subscribe to {}: {:?}", id, characteristic.uuid, err);
        }
    }

    if !session.on_notifications_enabled(id) {
        return;
    }

    while let Some(event) = events.next().await {
        match event {
            LinkEvent::Notification { uuid, value } => {
                debug!("Session {}: notification from {} ({} bytes)", id, uuid, value.len());
                if !session.on_notification(id, &value) {
                    return;
                }
            },
            LinkEvent::Lost { cause } => {
                session.on_link_lost(id, cause);
                return;
            },
        }
    }

    session.on_link_lost(id, None);
}
