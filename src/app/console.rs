use std::str::FromStr;
use futures::StreamExt;
use log::{info, warn};
use tokio::io::{stdin, AsyncBufReadExt, BufReader};

use crate::app::bridge::Bridge;
use crate::device::radio::Radio;
use crate::device::types::{ConnectionState, PeripheralHandle};
use crate::error::CommandError;
use crate::state::events::BridgeEvent;

const HELP: &str = "\
commands:
  scan                     start a new discovery scan
  stop                     stop the running scan
  devices                  list the peripherals found by the last scan
  connect <n|address|name> connect to a discovered peripheral
  disconnect               close the current connection
  status                   print the document served on /status
  quit                     exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Scan,
    Stop,
    Devices,
    Connect(String),
    Disconnect,
    Status,
    Help,
    Quit,
}

impl FromStr for ConsoleCommand {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let command = match words.next() {
            None => return Err(CommandError::Empty),
            Some(v) => v.to_ascii_lowercase(),
        };
        let argument = words.collect::<Vec<_>>().join(" ");

        match (command.as_str(), argument.is_empty()) {
            ("scan", true) => Ok(ConsoleCommand::Scan),
            ("stop", true) => Ok(ConsoleCommand::Stop),
            ("devices", true) => Ok(ConsoleCommand::Devices),
            ("connect", false) => Ok(ConsoleCommand::Connect(argument)),
            ("connect", true) => Err(CommandError::MissingArgument { command }),
            ("disconnect", true) => Ok(ConsoleCommand::Disconnect),
            ("status", true) => Ok(ConsoleCommand::Status),
            ("help", _) | ("?", _) => Ok(ConsoleCommand::Help),
            ("quit", true) | ("exit", true) => Ok(ConsoleCommand::Quit),
            _ => Err(CommandError::Unknown { line: line.trim().to_string() }),
        }
    }
}

/// Resolves a `connect` argument: a 1-based index into `devices`, an address or a name.
pub fn resolve_target(devices: &[PeripheralHandle], target: &str) -> Option<PeripheralHandle> {
    if let Ok(index) = target.parse::<usize>() {
        if index >= 1 && index <= devices.len() {
            return Some(devices[index - 1].clone());
        }
    }

    devices.iter().find(|peripheral| peripheral.matches(target)).cloned()
}

/// Whether a freshly discovered peripheral should be connected to automatically.
pub fn should_auto_connect(target: Option<&str>, found: &PeripheralHandle, state: &ConnectionState, current: Option<&PeripheralHandle>) -> bool {
    let target = match target {
        Some(v) => v,
        None => return false,
    };

    if !found.matches(target) {
        return false;
    }

    match state {
        ConnectionState::Disconnected | ConnectionState::Scanning | ConnectionState::Failed(_) => true,
        _ => current != Some(found),
    }
}

fn execute<R: Radio>(bridge: &Bridge<R>, command: ConsoleCommand) {
    match command {
        ConsoleCommand::Scan => {
            if !bridge.start_discovery() {
                warn!("Not allowed to scan for bluetooth devices");
            }
        },
        ConsoleCommand::Stop => bridge.stop_discovery(),
        ConsoleCommand::Devices => {
            let devices = bridge.devices();
            if devices.is_empty() {
                println!("no devices found (yet)");
            }
            for (index, device) in devices.iter().enumerate() {
                println!("{:>3}. {}", index + 1, device);
            }
        },
        ConsoleCommand::Connect(target) => {
            match resolve_target(&bridge.devices(), &target) {
                None => warn!("No discovered device matches {:?}; run `scan` first", target),
                Some(peripheral) => {
                    if bridge.connect(peripheral).is_none() {
                        warn!("Not allowed to connect to bluetooth devices");
                    }
                },
            }
        },
        ConsoleCommand::Disconnect => bridge.disconnect(),
        ConsoleCommand::Status => {
            match serde_json::to_string_pretty(&bridge.document()) {
                Ok(json) => println!("{} ({:?})", json, bridge.state()),
                Err(err) => warn!("Failed to encode status: {}", err),
            }
        },
        ConsoleCommand::Help => println!("{}", HELP),
        ConsoleCommand::Quit => {},
    }
}

fn on_event<R: Radio>(bridge: &Bridge<R>, event: &BridgeEvent, auto_connect: Option<&str>) {
    match event {
        BridgeEvent::DiscoveryStarted => info!("Scanning..."),
        BridgeEvent::DiscoveryStopped => info!("Scan finished, {} device(s) found", bridge.devices().len()),
        BridgeEvent::DeviceFound(peripheral) => {
            println!("found {}", peripheral);
            if should_auto_connect(auto_connect, peripheral, &bridge.state(), bridge.peripheral().as_ref()) {
                info!("Connecting to {} automatically", peripheral);
                bridge.connect(peripheral.clone());
            }
        },
        BridgeEvent::StateChange(state) => info!("Connection state: {:?}", state),
        BridgeEvent::Connected(peripheral) => info!("Connected to {}", peripheral),
        BridgeEvent::ServicesDiscovered => info!("Services discovered"),
        BridgeEvent::Disconnected => info!("Disconnected ({})", bridge.document().connection_status),
        BridgeEvent::DataAvailable(sample) => info!("Data: {}", sample.payload),
    }
}

/// Stands in for the user interface: starts a scan, then follows stdin commands and bus events
/// until `quit` (or until both stdin and the bus are gone).
pub async fn run_console<R: Radio>(bridge: &Bridge<R>, auto_connect: Option<String>) {
    let mut events = bridge.subscribe();
    let mut lines = BufReader::new(stdin()).lines();
    let mut stdin_open = true;

    println!("{}", HELP);
    execute(bridge, ConsoleCommand::Scan);

    loop {
        tokio::select! {
            Some(event) = events.next() => on_event(bridge, &event, auto_connect.as_deref()),
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match line.parse::<ConsoleCommand>() {
                        Ok(ConsoleCommand::Quit) => break,
                        Ok(command) => execute(bridge, command),
                        Err(err) => warn!("{}", err),
                    }
                },
                Ok(None) => {
                    info!("stdin closed; running headless");
                    stdin_open = false;
                },
                Err(err) => {
                    warn!("Failed to read stdin: {}", err);
                    stdin_open = false;
                },
            },
            else => break,
        }
    }
}
