/**
 * How long (milliseconds) a discovery scan may run before it is stopped automatically.
 */
pub const SCAN_TIMEOUT: u64 = 10_000;

/**
 * How long (milliseconds) tearing down a link may take before we give up on it.
 */
pub const DISCONNECT_DEADLINE: u64 = 2000;

/**
 * Capacity of every event bus subscriber channel. Events for a full subscriber are dropped.
 */
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

pub const STATUS_DISCONNECTED: &str = "Disconnected";
pub const STATUS_CONNECTING: &str = "Connecting...";

/**
 * Value reported for `lastReceivedData` before the first notification arrives.
 */
pub const NO_DATA: &str = "No data";

pub fn status_connected(address: &str) -> String {
    format!("Connected to {}", address)
}

pub fn status_error<T: std::fmt::Display>(cause: &T) -> String {
    format!("Error: {}", cause)
}
