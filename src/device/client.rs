use std::collections::HashSet;
use log::{debug, info, warn};
use uuid::Uuid;

use crate::device::adapter::Adapter;
use crate::device::connection::ConnectionManager;
use crate::device::decoder::decode;
use crate::device::resolver::Resolver;
use crate::device::scanner::Scanner;
use crate::device::types::{
    ClientEvent, ClientOptions, Command, Connection, ConnectionState, DiscoveredPeripheral, Effect, Operation,
    PeripheralId, PlatformEvent, RadioState, SubscribedCharacteristic, TargetSpec,
};
use crate::error::ClientError;

/// The platform independent core. Upcalls go in through [`TremorClient::handle`], downcalls and
/// event sink notifications come out as [`Effect`]s. Upcalls must be fed in the order the platform
/// delivered them; every call applies its whole transition before returning.
#[derive(Debug, Clone)]
pub struct TremorClient {
    target: TargetSpec,
    options: ClientOptions,
    adapter: Adapter,
    scanner: Scanner,
    connections: ConnectionManager,
    resolver: Resolver,
    pending_timers: HashSet<Operation>,
    // set when we asked for the disconnect, so it is not reported as unexpected
    closing: bool,
}

/// Pure form of [`TremorClient::handle`].
pub fn transition(mut client: TremorClient, event: PlatformEvent) -> (TremorClient, Vec<Effect>) {
    let effects = client.handle(event);
    (client, effects)
}

impl TremorClient {
    pub fn new(target: TargetSpec, options: ClientOptions) -> Self {
        let scanner = Scanner::new(options.selection.clone());

        TremorClient {
            target,
            options,
            adapter: Adapter::new(),
            scanner,
            connections: ConnectionManager::new(),
            resolver: Resolver::new(),
            pending_timers: HashSet::new(),
            closing: false,
        }
    }

    pub fn target(&self) -> &TargetSpec {
        &self.target
    }

    pub fn radio_state(&self) -> RadioState {
        self.adapter.current_state()
    }

    pub fn is_scanning(&self) -> bool {
        self.adapter.is_scanning()
    }

    pub fn connection(&self) -> Option<&Connection> {
        self.connections.current()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connections.state()
    }

    pub fn subscription(&self) -> Option<&SubscribedCharacteristic> {
        self.resolver.subscription()
    }

    pub fn handle(&mut self, event: PlatformEvent) -> Vec<Effect> {
        let mut effects = Vec::new();

        match event {
            PlatformEvent::RadioStateChanged(state) => self.on_radio_state_changed(state, &mut effects),
            PlatformEvent::PeripheralDiscovered(peripheral) => self.on_discovered(peripheral, &mut effects),
            PlatformEvent::PeripheralConnected(peripheral) => self.on_connected(&peripheral, &mut effects),
            PlatformEvent::ConnectFailed { peripheral, reason } => {
                self.on_connect_failed(&peripheral, reason, &mut effects)
            },
            PlatformEvent::PeripheralDisconnected { peripheral, reason } => {
                self.on_disconnected(&peripheral, reason, &mut effects)
            },
            PlatformEvent::ServicesDiscovered { peripheral, services } => {
                self.on_services_discovered(&peripheral, &services, &mut effects)
            },
            PlatformEvent::CharacteristicsDiscovered { peripheral, service, characteristics } => {
                self.on_characteristics_discovered(&peripheral, &service, &characteristics, &mut effects)
            },
            PlatformEvent::CharacteristicValueUpdated { peripheral, characteristic, value } => {
                self.on_value(&peripheral, &characteristic, &value, &mut effects)
            },
            PlatformEvent::TimerExpired(operation) => self.on_timer_expired(operation, &mut effects),
            PlatformEvent::CommandFailed { operation, reason } => {
                self.on_command_failed(operation, reason, &mut effects)
            },
        }

        effects
    }

    /// Connects to `peripheral` directly, bypassing the scanner.
    pub fn request_connect(&mut self, peripheral: PeripheralId) -> Result<Vec<Effect>, ClientError> {
        if !self.adapter.is_powered_on() {
            return Err(ClientError::RadioUnavailable { state: self.adapter.current_state() });
        }

        let connection = self.connections.request_connect(peripheral.clone())?;

        let mut effects = Vec::new();
        self.stop_scan(&mut effects);
        effects.push(Effect::Emit(ClientEvent::ConnectionStateChanged(connection)));
        effects.push(Effect::Command(Command::Connect(peripheral)));
        self.start_timer(Operation::Connect, &mut effects);
        Ok(effects)
    }

    /// Tears down the active connection. The slot is freed once the platform confirms.
    pub fn disconnect(&mut self) -> Result<Vec<Effect>, ClientError> {
        let peripheral = self.connections.peripheral().cloned().ok_or(ClientError::NotConnected)?;

        info!("Disconnecting from {}", peripheral);
        self.closing = true;
        Ok(vec![Effect::Command(Command::Disconnect(peripheral))])
    }

    pub fn enable_notify(&mut self) -> Result<Vec<Effect>, ClientError> {
        let peripheral = match self.connections.current() {
            Some(Connection { peripheral, state: ConnectionState::Connected }) => peripheral.clone(),
            _ => return Err(ClientError::NotConnected),
        };

        if self.resolver.subscription().is_none() {
            return Err(ClientError::CharacteristicNotFound);
        }

        Ok(self.resolver.enable_notify(&peripheral).map(Effect::Command).into_iter().collect())
    }

    /// Stops scanning, cancels all timers and disconnects. Used when the host shuts down.
    pub fn shutdown(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        self.stop_scan(&mut effects);

        for operation in self.pending_timers.drain() {
            effects.push(Effect::Command(Command::CancelTimer(operation)));
        }

        if let Ok(disconnect) = self.disconnect() {
            effects.extend(disconnect);
        }

        effects
    }

    fn is_active(&self, peripheral: &PeripheralId) -> bool {
        self.connections.peripheral() == Some(peripheral)
    }

    fn start_timer(&mut self, operation: Operation, effects: &mut Vec<Effect>) {
        if let Some(after) = self.options.timeouts.for_operation(operation) {
            self.pending_timers.insert(operation);
            effects.push(Effect::Command(Command::StartTimer { operation, after }));
        }
    }

    fn cancel_timer(&mut self, operation: Operation, effects: &mut Vec<Effect>) {
        if self.pending_timers.remove(&operation) {
            effects.push(Effect::Command(Command::CancelTimer(operation)));
        }
    }

    fn start_scan(&mut self, effects: &mut Vec<Effect>) {
        let filter = if self.options.scan_with_service_filter {
            Some(vec![self.target.service_id])
        } else {
            None
        };

        if let Some(command) = self.adapter.start_scan(filter) {
            effects.push(Effect::Command(command));
            self.start_timer(Operation::Scan, effects);
        }
    }

    fn stop_scan(&mut self, effects: &mut Vec<Effect>) {
        if let Some(command) = self.adapter.stop_scan() {
            effects.push(Effect::Command(command));
        }
        self.cancel_timer(Operation::Scan, effects);
    }

    fn emit_connection(effects: &mut Vec<Effect>, connection: Connection) {
        effects.push(Effect::Emit(ClientEvent::ConnectionStateChanged(connection)));
    }

    /// Connection slot has just been freed.
    fn after_disconnect(&mut self, effects: &mut Vec<Effect>) {
        self.cancel_timer(Operation::Connect, effects);
        self.cancel_timer(Operation::Discovery, effects);
        self.resolver.reset();
        self.closing = false;

        if self.options.rescan_on_disconnect {
            self.start_scan(effects);
        }
    }

    fn on_radio_state_changed(&mut self, state: RadioState, effects: &mut Vec<Effect>) {
        let previous = self.adapter.on_state_changed(state);

        if state == RadioState::PoweredOn {
            if self.connections.current().is_none() {
                self.start_scan(effects);
            }
            return;
        }

        if previous == state {
            return;
        }

        self.cancel_timer(Operation::Scan, effects);
        effects.push(Effect::Emit(ClientEvent::RadioUnavailable(state)));

        if let Some((_, connection)) = self.connections.invalidate() {
            let peripheral = connection.peripheral.clone();
            Self::emit_connection(effects, connection);
            effects.push(Effect::error(
                ClientError::DisconnectedUnexpectedly { peripheral: peripheral.clone(), reason: format!("bluetooth radio is {:?}", state) },
                "radio state changed",
            ));
            // releases whatever the platform still holds for the link, such as notification streams
            effects.push(Effect::Command(Command::Disconnect(peripheral)));
            self.after_disconnect(effects);
        }
    }

    fn on_discovered(&mut self, peripheral: DiscoveredPeripheral, effects: &mut Vec<Effect>) {
        if !self.adapter.is_scanning() || self.connections.current().is_some() {
            debug!("Ignoring discovered peripheral {}, not scanning", peripheral.identity);
            return;
        }

        let Some(identity) = self.scanner.on_discovered(&self.target, &peripheral) else {
            return;
        };

        match self.request_connect(identity) {
            Ok(connect) => effects.extend(connect),
            Err(err) => effects.push(Effect::error(err, "connecting to discovered peripheral")),
        }
    }

    fn on_connected(&mut self, peripheral: &PeripheralId, effects: &mut Vec<Effect>) {
        let Some(connection) = self.connections.on_connected(peripheral) else {
            if !self.is_active(peripheral) {
                // a connect that was already given up on went through after all
                info!("Closing stray connection to {}", peripheral);
                effects.push(Effect::Command(Command::Disconnect(peripheral.clone())));
            }
            return;
        };

        self.cancel_timer(Operation::Connect, effects);
        Self::emit_connection(effects, connection);

        let discover = self.resolver.start(&self.target, peripheral);
        effects.push(Effect::Command(discover));
        self.start_timer(Operation::Discovery, effects);
    }

    fn on_connect_failed(&mut self, peripheral: &PeripheralId, reason: String, effects: &mut Vec<Effect>) {
        let snapshots = self.connections.on_connect_failed(peripheral, &reason);
        if snapshots.is_empty() {
            return;
        }

        for connection in snapshots {
            Self::emit_connection(effects, connection);
        }
        effects.push(Effect::error(
            ClientError::ConnectFailed { peripheral: peripheral.clone(), reason },
            "connecting",
        ));
        self.after_disconnect(effects);
    }

    fn on_disconnected(&mut self, peripheral: &PeripheralId, reason: Option<String>, effects: &mut Vec<Effect>) {
        let closing = self.closing;

        if !closing && self.is_active(peripheral) && self.connections.state() == ConnectionState::Connecting {
            // left over from an abandoned attempt; the connect result decides this one
            debug!("Ignoring disconnect of {} while a connect to it is pending", peripheral);
            return;
        }

        let Some((_, connection)) = self.connections.on_disconnected(peripheral) else {
            return;
        };

        Self::emit_connection(effects, connection);

        if !closing {
            let reason = reason.unwrap_or_else(|| String::from("connection lost"));
            effects.push(Effect::error(
                ClientError::DisconnectedUnexpectedly { peripheral: peripheral.clone(), reason },
                "connection",
            ));
        }

        self.after_disconnect(effects);
    }

    fn on_services_discovered(&mut self, peripheral: &PeripheralId, services: &[Uuid], effects: &mut Vec<Effect>) {
        if !self.is_active(peripheral) || !self.connections.is_connected() {
            debug!("Ignoring services of {}, not connected to it", peripheral);
            return;
        }

        match self.resolver.on_services_discovered(&self.target, peripheral, services) {
            Ok(Some(command)) => effects.push(Effect::Command(command)),
            Ok(None) => {},
            Err(err) => effects.push(Effect::error(err, "service discovery")),
        }

        if !self.resolver.is_discovering() {
            self.cancel_timer(Operation::Discovery, effects);
        }
    }

    fn on_characteristics_discovered(
        &mut self,
        peripheral: &PeripheralId,
        service: &Uuid,
        characteristics: &[Uuid],
        effects: &mut Vec<Effect>,
    ) {
        if !self.is_active(peripheral) || !self.connections.is_connected() {
            debug!("Ignoring characteristics of {}, not connected to it", peripheral);
            return;
        }

        let result = self.resolver.on_characteristics_discovered(&self.target, peripheral, service, characteristics);

        if !self.resolver.is_discovering() {
            self.cancel_timer(Operation::Discovery, effects);
        }

        match result {
            Ok(Some(command)) => effects.push(Effect::Command(command)),
            Ok(None) => {},
            Err(err) => effects.push(Effect::error(err, "characteristic discovery")),
        }
    }

    fn on_value(&mut self, peripheral: &PeripheralId, characteristic: &Uuid, value: &[u8], effects: &mut Vec<Effect>) {
        if !self.is_active(peripheral) || !self.resolver.is_notifying(characteristic) {
            debug!("Ignoring value of {} from {}, not subscribed", characteristic, peripheral);
            return;
        }

        match decode(value) {
            Ok(reading) => {
                info!("Received status 0x{:04X}: {}", reading.raw_value, reading.decoded_state);
                effects.push(Effect::Emit(ClientEvent::Reading(reading)));
            },
            Err(err) => {
                warn!("Failed to decode status value {:?}: {}", value, err);
                effects.push(Effect::error(ClientError::from(err), "status notification"));
            },
        }
    }

    fn on_timer_expired(&mut self, operation: Operation, effects: &mut Vec<Effect>) {
        if !self.pending_timers.remove(&operation) {
            debug!("Ignoring stale {} timer", operation);
            return;
        }

        warn!("The {} operation took too long", operation);

        match operation {
            Operation::Scan => {
                if let Some(command) = self.adapter.stop_scan() {
                    effects.push(Effect::Command(command));
                }
            },
            Operation::Connect => {
                if self.connections.state() != ConnectionState::Connecting {
                    return;
                }
                if let Some(peripheral) = self.connections.peripheral().cloned() {
                    effects.push(Effect::Command(Command::Disconnect(peripheral)));
                }
                for connection in self.connections.fail("timed out") {
                    Self::emit_connection(effects, connection);
                }
                effects.push(Effect::error(ClientError::Timeout { operation }, "connecting"));
                self.after_disconnect(effects);
                return;
            },
            Operation::Discovery => self.resolver.abandon(),
            Operation::Notify => {},
        }

        effects.push(Effect::error(ClientError::Timeout { operation }, operation.to_string()));
    }

    fn on_command_failed(&mut self, operation: Operation, reason: String, effects: &mut Vec<Effect>) {
        warn!("The platform failed to perform the {} operation: {}", operation, reason);

        match operation {
            Operation::Scan => {
                self.adapter.on_scan_failed();
                self.cancel_timer(Operation::Scan, effects);
            },
            Operation::Connect => {
                if let Some(peripheral) = self.connections.peripheral().cloned() {
                    self.on_connect_failed(&peripheral, reason, effects);
                }
                return;
            },
            Operation::Discovery => {
                if !self.resolver.is_discovering() {
                    return;
                }
                self.resolver.abandon();
                self.cancel_timer(Operation::Discovery, effects);
            },
            Operation::Notify => self.resolver.on_notify_failed(),
        }

        effects.push(Effect::error(ClientError::CommandFailed { operation, reason }, operation.to_string()));
    }
}
