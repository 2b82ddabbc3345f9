use std::future::Future;
use std::sync::Mutex;
use btleplug::api::{Central, CentralEvent, CharPropFlags, Characteristic, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, BoxStream, StreamExt};
use log::{debug, info, warn};
use uuid::Uuid;

use crate::device::radio::{GattLink, Radio};
use crate::device::types::{CharacteristicInfo, LinkEvent, PeripheralHandle};
use crate::error::LinkError;

/// [`Radio`] backed by every bluetooth adapter btleplug can find.
pub struct BtleRadio {
    manager: Manager,
    service_filter: Vec<Uuid>,
    scanning: Mutex<Vec<Adapter>>,
}

impl BtleRadio {
    pub async fn new(service_filter: Vec<Uuid>) -> Result<Self, LinkError> {
        let manager = Manager::new().await?;
        Ok(BtleRadio { manager, service_filter, scanning: Mutex::new(Vec::new()) })
    }

    async fn adapters(&self) -> Result<Vec<Adapter>, LinkError> {
        let adapters = self.manager.adapters().await?;
        if adapters.is_empty() {
            return Err(LinkError::NoAdapter);
        }
        Ok(adapters)
    }

    async fn scan(&self) -> Result<BoxStream<'static, PeripheralHandle>, LinkError> {
        let adapters = self.adapters().await?;
        let filter = ScanFilter {
            services: self.service_filter.clone(),
        };
        let service_filter = self.service_filter.clone();

        let streams = start_each(adapters, &self.scanning, |adapter| {
            let filter = filter.clone();
            let service_filter = service_filter.clone();
            async move {
                info!("Scanning using adapter {}...", adapter.adapter_info().await.unwrap_or("UNKNOWN".to_string()));
                // subscribe before starting so that no early advertisement is missed
                let events = adapter.events().await?;
                adapter.start_scan(filter).await?;

                let found = events.filter_map(move |event| {
                    let adapter = adapter.clone();
                    let service_filter = service_filter.clone();
                    async move {
                        match event {
                            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                                describe_peripheral(&adapter, &id, &service_filter).await
                            },
                            _ => None,
                        }
                    }
                });
                Ok::<_, LinkError>(found.boxed())
            }
        }).await?;

        Ok(stream::select_all(streams).boxed())
    }

    async fn stop(&self) -> Result<(), LinkError> {
        let adapters = std::mem::take(&mut *self.scanning.lock().expect("Failed to lock scanning adapters"));
        let mut result = Ok(());

        for adapter in adapters {
            if let Err(err) = adapter.stop_scan().await {
                warn!("Failed to stop scanning: {:?}", err);
                result = Err(err.into());
            }
        }

        result
    }

    async fn find(&self, handle: &PeripheralHandle) -> Result<BtleLink, LinkError> {
        for adapter in self.adapters().await? {
            let peripherals = match adapter.peripherals().await {
                Ok(v) => v,
                Err(err) => {
                    warn!("Failed to query BLE adapter for peripherals: {}", err);
                    continue;
                },
            };

            for peripheral in peripherals {
                if peripheral.address().to_string().eq_ignore_ascii_case(&handle.address) {
                    return Ok(BtleLink { adapter, peripheral });
                }
            }
        }

        Err(LinkError::UnknownPeripheral { address: handle.address.clone() })
    }
}

/// Runs `start` for each adapter in order, stopping at the first error. Every adapter whose start
/// succeeded is recorded in `started`, also when a later one fails, so that a stop reaches it.
async fn start_each<A, S, F, Fut>(adapters: Vec<A>, started: &Mutex<Vec<A>>, mut start: F) -> Result<Vec<S>, LinkError>
where
    A: Clone,
    F: FnMut(A) -> Fut,
    Fut: Future<Output = Result<S, LinkError>>,
{
    let mut results = Vec::with_capacity(adapters.len());

    for adapter in adapters {
        results.push(start(adapter.clone()).await?);
        started.lock().expect("Failed to lock scanning adapters").push(adapter);
    }

    Ok(results)
}

async fn describe_peripheral(adapter: &Adapter, id: &PeripheralId, service_filter: &[Uuid]) -> Option<PeripheralHandle> {
    let peripheral = match adapter.peripheral(id).await {
        Ok(v) => v,
        Err(err) => {
            debug!("Peripheral {:?} vanished before it could be described: {:?}", id, err);
            return None;
        },
    };

    match peripheral.properties().await {
        Err(err) => {
            warn!("Could not query peripheral for properties: {:?}", err);
            None
        },
        Ok(None) => {
            Some(PeripheralHandle::new(peripheral.address().to_string(), ""))
        },
        Ok(Some(properties)) => {
            // Some environments ignore the filter, so make sure to check the service uuids again
            if !service_filter.is_empty() && !service_filter.iter().any(|uuid| properties.services.contains(uuid)) {
                return None;
            }

            Some(PeripheralHandle::new(
                properties.address.to_string(),
                properties.local_name.unwrap_or_default(),
            ))
        },
    }
}

impl Radio for BtleRadio {
    type Link = BtleLink;

    fn start_scan(&self) -> BoxFuture<'_, Result<BoxStream<'static, PeripheralHandle>, LinkError>> {
        self.scan().boxed()
    }

    fn stop_scan(&self) -> BoxFuture<'_, Result<(), LinkError>> {
        self.stop().boxed()
    }

    fn open_link<'a>(&'a self, peripheral: &'a PeripheralHandle) -> BoxFuture<'a, Result<BtleLink, LinkError>> {
        self.find(peripheral).boxed()
    }
}

pub struct BtleLink {
    adapter: Adapter,
    peripheral: Peripheral,
}

impl BtleLink {
    fn characteristic(&self, info: &CharacteristicInfo) -> Option<Characteristic> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|characteristic| characteristic.uuid == info.uuid && characteristic.service_uuid == info.service)
    }

    async fn connect_peripheral(&self) -> Result<(), LinkError> {
        info!("Connecting to peripheral {}...", self.peripheral.address());
        self.peripheral.connect().await?;
        Ok(())
    }

    async fn discover(&self) -> Result<Vec<CharacteristicInfo>, LinkError> {
        info!("Connected; Discovering services...");
        self.peripheral.discover_services().await?;

        Ok(self.peripheral
            .characteristics()
            .iter()
            .map(|characteristic| CharacteristicInfo {
                service: characteristic.service_uuid,
                uuid: characteristic.uuid,
                notify: characteristic.properties.contains(CharPropFlags::NOTIFY),
            })
            .collect())
    }

    async fn subscribe_characteristic(&self, info: &CharacteristicInfo) -> Result<(), LinkError> {
        let characteristic = self.characteristic(info).ok_or(LinkError::MissingCharacteristic)?;

        info!("Subscribing to characteristic {:?} {:?}", info.service, info.uuid);
        self.peripheral.subscribe(&characteristic).await?;
        Ok(())
    }

    async fn link_events(&self) -> Result<BoxStream<'static, LinkEvent>, LinkError> {
        let notifications = self.peripheral
            .notifications()
            .await?
            .map(|notification| LinkEvent::Notification { uuid: notification.uuid, value: notification.value });

        // The adapter reports link loss more reliably than the notification stream ending
        let peripheral_id = self.peripheral.id();
        let lost = self.adapter.events().await?.filter_map(move |event| {
            let peripheral_id = peripheral_id.clone();
            async move {
                match event {
                    CentralEvent::DeviceDisconnected(id) if id == peripheral_id => Some(LinkEvent::Lost { cause: None }),
                    _ => None,
                }
            }
        });

        Ok(stream::select(notifications, lost.boxed()).boxed())
    }

    async fn disconnect_peripheral(&self) -> Result<(), LinkError> {
        if self.peripheral.is_connected().await? {
            info!("Disconnecting from peripheral {}", self.peripheral.address());
            self.peripheral.disconnect().await?;
        }
        Ok(())
    }
}

impl GattLink for BtleLink {
    fn connect(&self) -> BoxFuture<'_, Result<(), LinkError>> {
        self.connect_peripheral().boxed()
    }

    fn discover_characteristics(&self) -> BoxFuture<'_, Result<Vec<CharacteristicInfo>, LinkError>> {
        self.discover().boxed()
    }

    fn subscribe<'a>(&'a self, characteristic: &'a CharacteristicInfo) -> BoxFuture<'a, Result<(), LinkError>> {
        self.subscribe_characteristic(characteristic).boxed()
    }

    fn events(&self) -> BoxFuture<'_, Result<BoxStream<'static, LinkEvent>, LinkError>> {
        self.link_events().boxed()
    }

    fn disconnect(&self) -> BoxFuture<'_, Result<(), LinkError>> {
        self.disconnect_peripheral().boxed()
    }
}
