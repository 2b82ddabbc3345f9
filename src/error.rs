use std::any::Any;
use std::io;
use std::str::Utf8Error;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to determine path to config file")]
    NoConfigPath,

    #[error("Failed to acquire file lock on config file: {source}")]
    CanNotLock { source: io::Error },

    #[error("Failed to encode/decode config as utf-8: {source}")]
    Utf8Error { #[from] source: Utf8Error },

    #[error("Failed to read/write config file: {source}")]
    IOError { #[from] source: io::Error },

    #[error("Failed to parse/build config file: {source}")]
    JsonError { #[from] source: serde_json::Error },
}

impl ConfigError {
    pub fn is_file_not_found_error(&self) -> bool {
        match self {
            ConfigError::IOError { source } => source.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

/// Failures of the radio link. The `Display` output is embedded verbatim in the connection
/// status text ("Error: <display>"), so keep it short.
#[derive(Error, Debug)]
pub enum LinkError {
    #[error("{code}")]
    Status { code: i32 },

    #[error("{source}")]
    Btle { #[from] source: btleplug::Error },

    #[error("peripheral {address} is not available")]
    UnknownPeripheral { address: String },

    #[error("no bluetooth adapter")]
    NoAdapter,

    #[error("a required bluetooth characteristic is not available")]
    MissingCharacteristic,
}

impl LinkError {
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, LinkError::Btle { source: btleplug::Error::PermissionDenied })
    }
}

#[derive(Error, Debug)]
pub enum HttpError {
    #[error("Failed to bind http listener: {source}")]
    Bind { #[from] source: warp::Error },
}

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Empty command")]
    Empty,

    #[error("`{command}` needs an argument, see `help`")]
    MissingArgument { command: String },

    #[error("Unknown command {line:?}, see `help`")]
    Unknown { line: String },
}

#[derive(Error, Debug)]
pub enum AppRunError {
    #[error("Failed to start application (runtime): {source}")]
    Runtime { #[from] source: io::Error },

    #[error("Failed to start application (config): {source}")]
    ConfigError { #[from] source: ConfigError },

    #[error("Failed to start application (bluetooth): {source}")]
    Link { #[from] source: LinkError },

    #[error("Failed to start application (http): {source}")]
    Http { #[from] source: HttpError },
}

pub fn readable_thread_panic_error(error: &Box<dyn Any + Send + 'static>) -> String {
    let mut stringified = String::from("???");

    if let Some(s) = error.downcast_ref::<&str>() {
        stringified = format!("{}", s);
    }
    else if let Some(s) = error.downcast_ref::<String>() {
        stringified = format!("{}", s);
    }

    format!("panic from task: [{}]", stringified)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_code_is_displayed_bare() {
        assert_eq!(LinkError::Status { code: 133 }.to_string(), "133");
    }

    #[test]
    fn permission_denied_is_detected() {
        let err = LinkError::from(btleplug::Error::PermissionDenied);
        assert!(err.is_permission_denied());
        assert!(!LinkError::NoAdapter.is_permission_denied());
    }

    #[test]
    fn missing_config_file_is_recognized() {
        let err = ConfigError::from(io::Error::new(io::ErrorKind::NotFound, "nope"));
        assert!(err.is_file_not_found_error());
        assert!(!ConfigError::NoConfigPath.is_file_not_found_error());
    }

    #[test]
    fn panic_payload_is_stringified() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(readable_thread_panic_error(&payload), "panic from task: [boom]");
    }
}
