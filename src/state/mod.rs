pub mod events;
pub mod telemetry;
