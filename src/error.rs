use std::io;
use std::str::Utf8Error;
use thiserror::Error;
use serde_json;

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

#[derive(Error, Debug)]
pub enum LinkError {
    #[error("Bluetooth is not available")]
    Unavailable,

    #[error("You are not connected to a device")]
    NotConnected,

    #[error("Unable to connect device {address}")]
    Unreachable { address: String },

    #[error("Not a valid bluetooth address: {address}")]
    InvalidAddress { address: String },

    #[error("The listening channel was closed")]
    ListenerClosed,

    #[error("The session manager is no longer running")]
    ManagerStopped,

    #[error("Error on the link stream: {source}")]
    Io { #[from] source: io::Error },

    #[cfg(feature = "rfcomm")]
    #[error("Error communicating with the adapter (bluer): {source}")]
    Bluetooth { #[from] source: bluer::Error },

    #[cfg(feature = "probe")]
    #[error("Error probing for an adapter (btleplug): {source}")]
    Btle { #[from] source: btleplug::Error },
}

#[derive(Error, Debug)]
pub enum AppRunError {
    #[error("Failed to start application (config): {source}")]
    ConfigError { #[from] source: ConfigError },

    #[error("Failed to run the bluetooth link: {source}")]
    LinkError { #[from] source: LinkError },

    #[error("Failed to read from the console: {source}")]
    Console { #[from] source: io::Error },
}
