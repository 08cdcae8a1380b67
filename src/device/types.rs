use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use crate::error::ClientError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioState {
    Unknown,
    Unsupported,
    Unauthorized,
    PoweredOff,
    PoweredOn,
    Resetting,
}

/// Opaque, stable identity of a peripheral as reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeripheralId(pub String);

impl fmt::Display for PeripheralId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PeripheralId {
    fn from(value: &str) -> Self {
        PeripheralId(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredPeripheral {
    pub identity: PeripheralId,
    pub advertised_name: Option<String>,
    pub signal_strength: Option<i16>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSpec {
    pub peripheral_name_match: String,
    pub service_id: Uuid,
    pub characteristic_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub peripheral: PeripheralId,
    pub state: ConnectionState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribedCharacteristic {
    pub characteristic_id: Uuid,
    pub notifying: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TremorState {
    Tremor,
    Dyskinesia,
    TremorAndDyskinesia,
    Unknown(u16),
}

impl fmt::Display for TremorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TremorState::Tremor => write!(f, "Tremor Detected"),
            TremorState::Dyskinesia => write!(f, "Dyskinesia Detected"),
            TremorState::TremorAndDyskinesia => write!(f, "Tremor and Dyskinesia Detected"),
            TremorState::Unknown(raw) => write!(f, "Unknown State: 0x{:04X}", raw),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TremorReading {
    pub raw_value: u16,
    pub decoded_state: TremorState,
}

/// How the scanner decides which advertisement is the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionPolicy {
    /// Exact advertised name equality with `TargetSpec::peripheral_name_match`, first match wins.
    ByName,
    /// Only the peripheral with this identity is accepted, whatever its name.
    ByIdentity(PeripheralId),
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        SelectionPolicy::ByName
    }
}

/// Operations that wait on the platform and may carry a deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Scan,
    Connect,
    Discovery,
    Notify,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let result = match self {
            Operation::Scan => "scan",
            Operation::Connect => "connect",
            Operation::Discovery => "discovery",
            Operation::Notify => "notify",
        };

        write!(f, "{}", result)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Timeouts {
    pub scan: Option<Duration>,
    pub connect: Option<Duration>,
    pub discovery: Option<Duration>,
}

impl Timeouts {
    pub fn for_operation(&self, operation: Operation) -> Option<Duration> {
        match operation {
            Operation::Scan => self.scan,
            Operation::Connect => self.connect,
            Operation::Discovery => self.discovery,
            Operation::Notify => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientOptions {
    pub selection: SelectionPolicy,
    pub timeouts: Timeouts,
    pub scan_with_service_filter: bool,
    pub rescan_on_disconnect: bool,
}

/// Upcalls from the platform Bluetooth stack, plus timer expiry and failed downcalls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformEvent {
    RadioStateChanged(RadioState),
    PeripheralDiscovered(DiscoveredPeripheral),
    PeripheralConnected(PeripheralId),
    PeripheralDisconnected { peripheral: PeripheralId, reason: Option<String> },
    ConnectFailed { peripheral: PeripheralId, reason: String },
    ServicesDiscovered { peripheral: PeripheralId, services: Vec<Uuid> },
    CharacteristicsDiscovered { peripheral: PeripheralId, service: Uuid, characteristics: Vec<Uuid> },
    CharacteristicValueUpdated { peripheral: PeripheralId, characteristic: Uuid, value: Vec<u8> },
    TimerExpired(Operation),
    CommandFailed { operation: Operation, reason: String },
}

/// Downcalls into the platform Bluetooth stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    StartScan { services: Option<Vec<Uuid>> },
    StopScan,
    Connect(PeripheralId),
    Disconnect(PeripheralId),
    DiscoverServices { peripheral: PeripheralId, services: Vec<Uuid> },
    DiscoverCharacteristics { peripheral: PeripheralId, service: Uuid, characteristics: Vec<Uuid> },
    SetNotify { peripheral: PeripheralId, characteristic: Uuid, enabled: bool },
    StartTimer { operation: Operation, after: Duration },
    CancelTimer(Operation),
}

/// Notifications delivered to the event sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    RadioUnavailable(RadioState),
    ConnectionStateChanged(Connection),
    Reading(TremorReading),
    Error { error: ClientError, context: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Command(Command),
    Emit(ClientEvent),
}

impl Effect {
    pub fn error(error: ClientError, context: impl Into<String>) -> Self {
        Effect::Emit(ClientEvent::Error { error, context: context.into() })
    }
}
