use std::sync::{Arc, Mutex};
use std::time::Duration;
use futures::StreamExt;
use indexmap::IndexMap;
use log::{debug, info, warn};
use tokio::spawn;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout_at, Instant};
use tokio_util::sync::CancellationToken;

use crate::device::permissions::{Permission, Permissions};
use crate::device::radio::Radio;
use crate::device::types::PeripheralHandle;
use crate::state::events::{BridgeEvent, EventBus};

type ActivityHook = Box<dyn Fn(bool) + Send + Sync>;

struct ActiveScan {
    cycle: u64,
    cancel: CancellationToken,
}

struct ScanCycles {
    next_cycle: u64,
    active: Option<ActiveScan>,
    // the most recent scan task; a new scan waits for it so radio start/stop calls never overlap
    last_task: Option<JoinHandle<()>>,
    devices: IndexMap<String, PeripheralHandle>,
}

struct ScannerInner<R: Radio> {
    radio: Arc<R>,
    permissions: Arc<dyn Permissions>,
    bus: EventBus,
    window: Duration,
    cycles: Mutex<ScanCycles>,
    activity: Mutex<Option<ActivityHook>>,
}

/// Time bounded discovery that reports each peripheral address at most once per cycle.
pub struct DeviceDiscoveryScanner<R: Radio> {
    inner: Arc<ScannerInner<R>>,
}

impl<R: Radio> Clone for DeviceDiscoveryScanner<R> {
    fn clone(&self) -> Self {
        DeviceDiscoveryScanner { inner: self.inner.clone() }
    }
}

impl<R: Radio> DeviceDiscoveryScanner<R> {
    pub fn new(radio: Arc<R>, permissions: Arc<dyn Permissions>, bus: EventBus, window: Duration) -> Self {
        let cycles = ScanCycles {
            next_cycle: 0,
            active: None,
            last_task: None,
            devices: IndexMap::new(),
        };

        DeviceDiscoveryScanner {
            inner: Arc::new(ScannerInner {
                radio,
                permissions,
                bus,
                window,
                cycles: Mutex::new(cycles),
                activity: Mutex::new(None),
            }),
        }
    }

    /// `hook(true)` runs when a cycle starts, `hook(false)` when it ends. Calls are made while the
    /// cycle bookkeeping is locked so they arrive in cycle order; the hook must not call back into
    /// the scanner.
    pub fn on_activity<F: Fn(bool) + Send + Sync + 'static>(&self, hook: F) {
        *self.inner.activity.lock().expect("Failed to lock scanner activity hook") = Some(Box::new(hook));
    }

    fn notify_activity(&self, active: bool) {
        if let Some(hook) = self.inner.activity.lock().expect("Failed to lock scanner activity hook").as_ref() {
            hook(active);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ScanCycles> {
        self.inner.cycles.lock().expect("Failed to lock scan cycles")
    }

    /// Returns false (and does nothing) without scan permission.
    pub fn start_discovery(&self) -> bool {
        if !self.inner.permissions.has_permission(Permission::Scan) {
            debug!("No scan permission; not starting discovery");
            return false;
        }

        self.stop_discovery();

        let deadline = Instant::now() + self.inner.window;
        let cancel = CancellationToken::new();
        {
            let mut cycles = self.lock();
            cycles.devices.clear();
            cycles.next_cycle += 1;
            let cycle = cycles.next_cycle;
            cycles.active = Some(ActiveScan { cycle, cancel: cancel.clone() });
            info!("Starting discovery cycle {}", cycle);
            self.inner.bus.publish(BridgeEvent::DiscoveryStarted);
            // before the task exists, otherwise a cycle that ends at once could report its end first
            self.notify_activity(true);

            let previous = cycles.last_task.take();
            let task = spawn(run_scan(self.clone(), cycle, deadline, cancel, previous));
            cycles.last_task = Some(task);
        }

        true
    }

    pub fn stop_discovery(&self) {
        if !self.inner.permissions.has_permission(Permission::Scan) {
            debug!("No scan permission; not stopping discovery");
            return;
        }

        self.finish(None);
    }

    pub fn is_scanning(&self) -> bool {
        self.lock().active.is_some()
    }

    pub fn discovered(&self) -> Vec<PeripheralHandle> {
        self.lock().devices.values().cloned().collect()
    }

    // Ends the active cycle, or only `cycle` when given. Idempotent.
    fn finish(&self, cycle: Option<u64>) {
        let mut cycles = self.lock();
        let matches = match (&cycles.active, cycle) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(active), Some(cycle)) => active.cycle == cycle,
        };
        if !matches {
            return;
        }

        if let Some(active) = cycles.active.take() {
            info!("Discovery cycle {} stopped with {} device(s)", active.cycle, cycles.devices.len());
            active.cancel.cancel();
        }
        self.inner.bus.publish(BridgeEvent::DiscoveryStopped);
        self.notify_activity(false);
    }

    fn record(&self, cycle: u64, peripheral: PeripheralHandle) {
        let mut cycles = self.lock();
        match &cycles.active {
            Some(active) if active.cycle == cycle => {},
            _ => {
                debug!("Ignoring {} from finished discovery cycle {}", peripheral, cycle);
                return;
            },
        }

        if cycles.devices.contains_key(&peripheral.address) {
            return;
        }

        info!("Found {}", peripheral);
        cycles.devices.insert(peripheral.address.clone(), peripheral.clone());
        self.inner.bus.publish(BridgeEvent::DeviceFound(peripheral));
    }
}

async fn run_scan<R: Radio>(scanner: DeviceDiscoveryScanner<R>, cycle: u64, deadline: Instant, cancel: CancellationToken, previous: Option<JoinHandle<()>>) {
    if let Some(previous) = previous {
        if timeout_at(deadline, previous).await.is_err() {
            warn!("Previous discovery cycle did not wind down in time");
        }
    }

    let radio = scanner.inner.radio.clone();

    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            debug!("Discovery cycle {} cancelled", cycle);
        },
        _ = sleep_until(deadline) => {
            info!("Discovery window elapsed");
            scanner.finish(Some(cycle));
        },
        _ = collect_results(&scanner, radio.as_ref(), cycle) => {
            scanner.finish(Some(cycle));
        },
    }

    if let Err(err) = radio.stop_scan().await {
        warn!("Stopping scan failed {:?}", err);
    }
}

async fn collect_results<R: Radio>(scanner: &DeviceDiscoveryScanner<R>, radio: &R, cycle: u64) {
    let mut results = match radio.start_scan().await {
        Ok(v) => v,
        Err(err) => {
            if err.is_permission_denied() {
                warn!("Not allowed to access bluetooth: {:?}", err);
            } else {
                warn!("Scanning failed {:?}", err);
            }
            return;
        },
    };

    while let Some(peripheral) = results.next().await {
        scanner.record(cycle, peripheral);
    }

    debug!("Scan results ended for cycle {}", cycle);
}
