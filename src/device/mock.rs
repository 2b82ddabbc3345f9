//! Scripted in-memory radio used by the unit tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures::future::{self, BoxFuture, FutureExt};
use futures::stream::{self, BoxStream, StreamExt};
use uuid::Uuid;

use crate::device::radio::{GattLink, Radio};
use crate::device::types::{CharacteristicInfo, LinkEvent, PeripheralHandle};
use crate::error::LinkError;

#[derive(Debug, Clone, Copy)]
pub(crate) enum ConnectBehavior {
    Succeed,
    Fail(i32),
    Hang,
    // the link comes up but service discovery fails with the code
    FailDiscovery(i32),
}

#[derive(Default)]
struct MockState {
    scans_started: usize,
    scans_stopped: usize,
    scan_fails: bool,
    scan_senders: Vec<UnboundedSender<PeripheralHandle>>,
    peripherals: HashMap<String, (ConnectBehavior, Vec<CharacteristicInfo>)>,
    link_senders: HashMap<String, UnboundedSender<LinkEvent>>,
    subscribed: Vec<(String, Uuid)>,
    disconnects: Vec<String>,
}

#[derive(Clone, Default)]
pub(crate) struct MockRadio {
    state: Arc<Mutex<MockState>>,
}

pub(crate) fn characteristic(uuid: u128, notify: bool) -> CharacteristicInfo {
    CharacteristicInfo {
        service: Uuid::from_u128(0x4fafc201_1fb5_459e_8fcc_c5c9c331914b),
        uuid: Uuid::from_u128(uuid),
        notify,
    }
}

impl MockRadio {
    pub fn new() -> Self {
        MockRadio::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn add_peripheral(&self, address: &str, connect: ConnectBehavior, characteristics: Vec<CharacteristicInfo>) -> PeripheralHandle {
        self.lock().peripherals.insert(address.to_string(), (connect, characteristics));
        PeripheralHandle::new(address, format!("ESP32 {}", address))
    }

    pub fn fail_scans(&self) {
        self.lock().scan_fails = true;
    }

    pub fn advertise(&self, handle: &PeripheralHandle) {
        let mut state = self.lock();
        state.scan_senders.retain(|sender| sender.unbounded_send(handle.clone()).is_ok());
    }

    pub fn notify(&self, address: &str, value: &[u8]) {
        if let Some(sender) = self.lock().link_senders.get(address) {
            let _ = sender.unbounded_send(LinkEvent::Notification { uuid: Uuid::nil(), value: value.to_vec() });
        }
    }

    pub fn drop_link(&self, address: &str, cause: Option<LinkError>) {
        if let Some(sender) = self.lock().link_senders.remove(address) {
            let _ = sender.unbounded_send(LinkEvent::Lost { cause });
        }
    }

    pub fn scans_started(&self) -> usize {
        self.lock().scans_started
    }

    pub fn scans_stopped(&self) -> usize {
        self.lock().scans_stopped
    }

    pub fn subscribed(&self) -> Vec<(String, Uuid)> {
        self.lock().subscribed.clone()
    }

    pub fn disconnects(&self) -> Vec<String> {
        self.lock().disconnects.clone()
    }
}

impl Radio for MockRadio {
    type Link = MockLink;

    fn start_scan(&self) -> BoxFuture<'_, Result<BoxStream<'static, PeripheralHandle>, LinkError>> {
        let mut state = self.lock();
        state.scans_started += 1;
        if state.scan_fails {
            return future::ready(Err(LinkError::Btle { source: btleplug::Error::PermissionDenied })).boxed();
        }

        let (sender, receiver) = unbounded();
        state.scan_senders.push(sender);
        future::ready(Ok(receiver.boxed())).boxed()
    }

    fn stop_scan(&self) -> BoxFuture<'_, Result<(), LinkError>> {
        let mut state = self.lock();
        state.scans_stopped += 1;
        state.scan_senders.clear();
        future::ready(Ok(())).boxed()
    }

    fn open_link<'a>(&'a self, peripheral: &'a PeripheralHandle) -> BoxFuture<'a, Result<MockLink, LinkError>> {
        let mut state = self.lock();
        let result = match state.peripherals.get(&peripheral.address).cloned() {
            None => Err(LinkError::UnknownPeripheral { address: peripheral.address.clone() }),
            Some((connect, characteristics)) => {
                let (sender, receiver) = unbounded();
                state.link_senders.insert(peripheral.address.clone(), sender);
                Ok(MockLink {
                    address: peripheral.address.clone(),
                    connect,
                    characteristics,
                    events: Mutex::new(Some(receiver)),
                    radio: self.clone(),
                })
            },
        };
        future::ready(result).boxed()
    }
}

pub(crate) struct MockLink {
    address: String,
    connect: ConnectBehavior,
    characteristics: Vec<CharacteristicInfo>,
    events: Mutex<Option<UnboundedReceiver<LinkEvent>>>,
    radio: MockRadio,
}

impl GattLink for MockLink {
    fn connect(&self) -> BoxFuture<'_, Result<(), LinkError>> {
        match self.connect {
            ConnectBehavior::Succeed | ConnectBehavior::FailDiscovery(_) => future::ready(Ok(())).boxed(),
            ConnectBehavior::Fail(code) => future::ready(Err(LinkError::Status { code })).boxed(),
            ConnectBehavior::Hang => future::pending().boxed(),
        }
    }

    fn discover_characteristics(&self) -> BoxFuture<'_, Result<Vec<CharacteristicInfo>, LinkError>> {
        match self.connect {
            ConnectBehavior::FailDiscovery(code) => future::ready(Err(LinkError::Status { code })).boxed(),
            _ => future::ready(Ok(self.characteristics.clone())).boxed(),
        }
    }

    fn subscribe<'a>(&'a self, characteristic: &'a CharacteristicInfo) -> BoxFuture<'a, Result<(), LinkError>> {
        self.radio.lock().subscribed.push((self.address.clone(), characteristic.uuid));
        future::ready(Ok(())).boxed()
    }

    fn events(&self) -> BoxFuture<'_, Result<BoxStream<'static, LinkEvent>, LinkError>> {
        let events = match self.events.lock().unwrap().take() {
            Some(receiver) => receiver.boxed(),
            None => stream::empty().boxed(),
        };
        future::ready(Ok(events)).boxed()
    }

    fn disconnect(&self) -> BoxFuture<'_, Result<(), LinkError>> {
        self.radio.lock().disconnects.push(self.address.clone());
        future::ready(Ok(())).boxed()
    }
}

/// Polls `condition` until it holds, failing the test after a (virtual) second.
pub(crate) async fn wait_until<F: FnMut() -> bool>(mut condition: F) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition not reached in time");
}
