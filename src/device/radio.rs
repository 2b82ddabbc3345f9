use futures::future::BoxFuture;
use futures::stream::BoxStream;

use crate::device::types::{CharacteristicInfo, LinkEvent, PeripheralHandle};
use crate::error::LinkError;

/// The central side of the radio: discovery plus resolving discovered peripherals to links.
pub trait Radio: Send + Sync + 'static {
    type Link: GattLink;

    /// Starts scanning and yields every advertisement seen, duplicates included.
    fn start_scan(&self) -> BoxFuture<'_, Result<BoxStream<'static, PeripheralHandle>, LinkError>>;

    fn stop_scan(&self) -> BoxFuture<'_, Result<(), LinkError>>;

    fn open_link<'a>(&'a self, peripheral: &'a PeripheralHandle) -> BoxFuture<'a, Result<Self::Link, LinkError>>;
}

/// One GATT connection to a peripheral. Owned exclusively by the session driver.
pub trait GattLink: Send + Sync + 'static {
    fn connect(&self) -> BoxFuture<'_, Result<(), LinkError>>;

    fn discover_characteristics(&self) -> BoxFuture<'_, Result<Vec<CharacteristicInfo>, LinkError>>;

    fn subscribe<'a>(&'a self, characteristic: &'a CharacteristicInfo) -> BoxFuture<'a, Result<(), LinkError>>;

    /// Notifications from subscribed characteristics, merged with link loss.
    fn events(&self) -> BoxFuture<'_, Result<BoxStream<'static, LinkEvent>, LinkError>>;

    fn disconnect(&self) -> BoxFuture<'_, Result<(), LinkError>>;
}
