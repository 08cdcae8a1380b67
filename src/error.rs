use std::io;
use std::str::Utf8Error;
use thiserror::Error;
use btleplug;
use serde_json;

use crate::device::types::{Operation, PeripheralId, RadioState};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Status payload too short: expected at least 2 bytes, got {len}")]
    PayloadTooShort { len: usize },
}

/// Every failure the client reports to its event sink. None of them are fatal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("Bluetooth radio is not available ({state:?})")]
    RadioUnavailable { state: RadioState },

    #[error("Already connecting to {peripheral}")]
    AlreadyConnecting { peripheral: PeripheralId },

    #[error("Already connected to {peripheral}")]
    AlreadyConnected { peripheral: PeripheralId },

    #[error("No active connection")]
    NotConnected,

    #[error("Failed to connect to {peripheral}: {reason}")]
    ConnectFailed { peripheral: PeripheralId, reason: String },

    #[error("The tremor service is not offered by the peripheral")]
    ServiceNotFound,

    #[error("The tremor status characteristic is not offered by the peripheral")]
    CharacteristicNotFound,

    #[error("Invalid status notification: {source}")]
    InvalidPayload { #[from] source: DecodeError },

    #[error("Disconnected from {peripheral} unexpectedly: {reason}")]
    DisconnectedUnexpectedly { peripheral: PeripheralId, reason: String },

    #[error("The {operation} operation timed out")]
    Timeout { operation: Operation },

    #[error("The platform failed to perform the {operation} operation: {reason}")]
    CommandFailed { operation: Operation, reason: String },
}

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
pub enum DeviceError {
    #[error("Error communicating with device (btleplug): {source}")]
    Btle { #[from] source: btleplug::Error },

    #[error("No bluetooth adapter is available")]
    NoAdapter,

    #[error("Peripheral {0} is not known to the adapter")]
    UnknownPeripheral(PeripheralId),

    #[error("A required bluetooth service is not available")]
    MissingService,

    #[error("A required bluetooth characteristic is not available")]
    MissingCharacteristic,
}

impl DeviceError {
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, DeviceError::Btle { source: btleplug::Error::PermissionDenied })
    }
}

#[derive(Error, Debug)]
pub enum AppRunError {
    #[error("Failed to start application (config): {source}")]
    ConfigError { #[from] source: ConfigError },

    #[error("Failed to start application (device): {source}")]
    DeviceError { #[from] source: DeviceError },

    #[error("Failed to start application (runtime): {source}")]
    Runtime { #[from] source: io::Error },
}
