use std::sync::{Arc, Mutex};
use futures::channel::mpsc::{channel, Receiver, Sender};
use log::debug;

use crate::device::constants::EVENT_CHANNEL_CAPACITY;
use crate::device::types::{ConnectionState, PeripheralHandle};
use crate::state::telemetry::TelemetrySample;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEvent {
    DiscoveryStarted,
    DeviceFound(PeripheralHandle),
    DiscoveryStopped,
    StateChange(ConnectionState),
    Connected(PeripheralHandle),
    ServicesDiscovered,
    Disconnected,
    DataAvailable(TelemetrySample),
}

/// Fire-and-forget fan out of [`BridgeEvent`]s to any number of subscribers.
///
/// Publishing never waits: a subscriber whose channel is full misses the event, a subscriber
/// that dropped its receiver is forgotten.
#[derive(Clone, Default)]
pub struct EventBus {
    senders: Arc<Mutex<Vec<Sender<BridgeEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        EventBus::default()
    }

    pub fn subscribe(&self) -> Receiver<BridgeEvent> {
        self.subscribe_with_capacity(EVENT_CHANNEL_CAPACITY)
    }

    pub fn subscribe_with_capacity(&self, capacity: usize) -> Receiver<BridgeEvent> {
        let (sender, receiver) = channel::<BridgeEvent>(capacity);
        self.senders.lock().expect("Failed to lock EventBus senders").push(sender);
        receiver
    }

    pub fn publish(&self, event: BridgeEvent) {
        let mut senders = self.senders.lock().expect("Failed to lock EventBus senders");

        senders.retain_mut(|sender| match sender.try_send(event.clone()) {
            Ok(()) => true,
            Err(err) if err.is_full() => {
                debug!("Dropping {:?} for a slow subscriber", event);
                true
            },
            Err(_) => false,
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.senders.lock().expect("Failed to lock EventBus senders").len()
    }
}
