use std::collections::HashMap;
use std::time::Duration;
use btleplug::api::{Central, CentralEvent, CentralState, Characteristic, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId as BtlePeripheralId};
use futures::{SinkExt, StreamExt};
use futures::channel::mpsc::{channel, Receiver, Sender};
use log::{debug, info, warn};
use tokio::spawn;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::types::Config;
use crate::device::client::TremorClient;
use crate::device::constants::{ADAPTER_RETRY_DELAY, DISCONNECT_DEADLINE, UPCALL_CHANNEL_SIZE};
use crate::device::types::{
    ClientEvent, Command, DiscoveredPeripheral, Effect, Operation, PeripheralId, PlatformEvent, RadioState,
};
use crate::error::DeviceError;

fn key_of(id: &BtlePeripheralId) -> PeripheralId {
    PeripheralId(id.to_string())
}

fn radio_state_of(state: CentralState) -> RadioState {
    #[allow(unreachable_patterns)]
    match state {
        CentralState::PoweredOn => RadioState::PoweredOn,
        CentralState::PoweredOff => RadioState::PoweredOff,
        CentralState::Unknown => RadioState::Unknown,
        _ => RadioState::Unknown,
    }
}

/// Radio state right after the adapter was opened. Platforms that cannot report it have a usable
/// adapter, so that counts as powered on.
fn initial_radio_state(state: Result<CentralState, btleplug::Error>) -> RadioState {
    match state {
        Ok(state) => radio_state_of(state),
        Err(err) => {
            warn!("Could not query adapter state, assuming it is powered on: {}", err);
            RadioState::PoweredOn
        },
    }
}

/// Maps a failure to reach the adapter onto the radio state the client should see.
fn radio_state_for(err: &DeviceError) -> RadioState {
    if err.is_permission_denied() {
        return RadioState::Unauthorized;
    }

    match err {
        DeviceError::NoAdapter => RadioState::Unsupported,
        _ => RadioState::Unknown,
    }
}

async fn open_adapter(manager: &Manager) -> Result<Adapter, DeviceError> {
    let adapter = manager.adapters().await?.into_iter().next().ok_or(DeviceError::NoAdapter)?;
    info!("Using adapter {}", adapter.adapter_info().await.unwrap_or("UNKNOWN".to_string()));
    Ok(adapter)
}

async fn find_peripheral(adapter: &Adapter, id: &PeripheralId) -> Result<Peripheral, DeviceError> {
    for peripheral in adapter.peripherals().await? {
        if &key_of(&peripheral.id()) == id {
            return Ok(peripheral);
        }
    }

    Err(DeviceError::UnknownPeripheral(id.clone()))
}

fn find_characteristic(peripheral: &Peripheral, uuid: &Uuid) -> Result<Characteristic, DeviceError> {
    peripheral
        .services()
        .iter()
        .flat_map(|service| service.characteristics.iter())
        .find(|characteristic| &characteristic.uuid == uuid)
        .cloned()
        .ok_or(DeviceError::MissingCharacteristic)
}

async fn post(upcalls: &mut Sender<PlatformEvent>, event: PlatformEvent) {
    if let Err(err) = upcalls.send(event).await {
        // the client loop is gone, which only happens during shutdown
        debug!("Dropping upcall: {}", err);
    }
}

async fn discovered_peripheral(adapter: &Adapter, id: &BtlePeripheralId) -> Option<DiscoveredPeripheral> {
    let peripheral = match adapter.peripheral(id).await {
        Ok(peripheral) => peripheral,
        Err(err) => {
            warn!("Could not look up discovered peripheral: {:?}", err);
            return None;
        },
    };

    match peripheral.properties().await {
        Err(err) => {
            warn!("Could not query peripheral for properties: {:?}", err);
            None
        },
        Ok(None) => {
            debug!("Peripheral has no properties");
            None
        },
        Ok(Some(properties)) => Some(DiscoveredPeripheral {
            identity: key_of(id),
            advertised_name: properties.local_name,
            signal_strength: properties.rssi,
        }),
    }
}

/// Translates the adapter's event stream into radio state, discovery and disconnect upcalls.
async fn central_events_task(cancel: CancellationToken, adapter: Adapter, mut upcalls: Sender<PlatformEvent>) -> Result<(), DeviceError> {
    let mut events = adapter.events().await?;

    'mainloop: loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                break 'mainloop;
            },
            event = events.next() => match event {
                None => break 'mainloop,
                Some(CentralEvent::DeviceDiscovered(id)) | Some(CentralEvent::DeviceUpdated(id)) => {
                    if let Some(peripheral) = discovered_peripheral(&adapter, &id).await {
                        post(&mut upcalls, PlatformEvent::PeripheralDiscovered(peripheral)).await;
                    }
                },
                Some(CentralEvent::DeviceDisconnected(id)) => {
                    post(&mut upcalls, PlatformEvent::PeripheralDisconnected { peripheral: key_of(&id), reason: None }).await;
                },
                Some(CentralEvent::StateUpdate(state)) => {
                    post(&mut upcalls, PlatformEvent::RadioStateChanged(radio_state_of(state))).await;
                },
                Some(_) => {},
            },
        }
    }

    Ok(())
}

/// Forwards values of `characteristic` as upcalls until cancelled or the stream ends.
async fn read_notifications_task(
    cancel: CancellationToken,
    peripheral: Peripheral,
    characteristic: Uuid,
    mut upcalls: Sender<PlatformEvent>,
) -> Result<(), DeviceError> {
    let mut notification_stream = peripheral.notifications().await?;
    let id = key_of(&peripheral.id());

    'mainloop: loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                break 'mainloop;
            },
            data = notification_stream.next() => match data {
                None => break 'mainloop,
                Some(data) => {
                    if data.uuid.eq(&characteristic) {
                        post(&mut upcalls, PlatformEvent::CharacteristicValueUpdated {
                            peripheral: id.clone(),
                            characteristic,
                            value: data.value,
                        }).await;
                    }
                },
            },
        }
    }

    info!("Notification stream of {} closed", id);
    Ok(())
}

async fn connect(adapter: &Adapter, id: &PeripheralId) -> Result<(), DeviceError> {
    let peripheral = find_peripheral(adapter, id).await?;
    info!("Connecting to peripheral...");
    peripheral.connect().await?;
    Ok(())
}

async fn disconnect(adapter: &Adapter, id: &PeripheralId) -> Result<(), DeviceError> {
    let peripheral = find_peripheral(adapter, id).await?;
    peripheral.disconnect().await?;
    Ok(())
}

async fn discover_services(adapter: &Adapter, id: &PeripheralId) -> Result<Vec<Uuid>, DeviceError> {
    let peripheral = find_peripheral(adapter, id).await?;
    info!("Connected; Discovering services...");
    peripheral.discover_services().await?;
    Ok(peripheral.services().iter().map(|service| service.uuid).collect())
}

async fn discover_characteristics(adapter: &Adapter, id: &PeripheralId, service: &Uuid) -> Result<Vec<Uuid>, DeviceError> {
    let peripheral = find_peripheral(adapter, id).await?;

    // btleplug resolves characteristics together with the services
    let services = peripheral.services();
    services
        .iter()
        .find(|candidate| &candidate.uuid == service)
        .map(|service| service.characteristics.iter().map(|characteristic| characteristic.uuid).collect())
        .ok_or(DeviceError::MissingService)
}

/// Executes downcalls against one btleplug adapter. Every radio operation runs on its own task
/// and reports back through the upcall channel, so the client loop never waits on the radio.
struct BtleDriver {
    cancel: CancellationToken,
    adapter: Option<Adapter>,
    upcalls: Sender<PlatformEvent>,
    events: Sender<ClientEvent>,
    timers: HashMap<Operation, CancellationToken>,
    notifications: HashMap<PeripheralId, CancellationToken>,
}

impl BtleDriver {
    fn new(cancel: CancellationToken, upcalls: Sender<PlatformEvent>, events: Sender<ClientEvent>) -> Self {
        BtleDriver {
            cancel,
            adapter: None,
            upcalls,
            events,
            timers: HashMap::new(),
            notifications: HashMap::new(),
        }
    }

    async fn apply(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Emit(event) => {
                    if let Err(err) = self.events.send(event.clone()).await {
                        // the sink stopped first, the radio still has to be released
                        warn!("Event sink is gone ({}), dropping {:?}", err, event);
                    }
                },
                Effect::Command(command) => self.execute(command),
            }
        }
    }

    /// Bookkeeping on upcalls before the client sees them.
    fn observe(&mut self, event: &PlatformEvent) {
        if let PlatformEvent::PeripheralDisconnected { peripheral, .. } = event {
            self.stop_notifications(peripheral);
        }
    }

    fn stop_notifications(&mut self, peripheral: &PeripheralId) {
        if let Some(token) = self.notifications.remove(peripheral) {
            token.cancel();
        }
    }

    fn spawn_operation<F>(&self, operation: Operation, fut: F)
    where
        F: std::future::Future<Output = Result<PlatformEvent, DeviceError>> + Send + 'static,
    {
        let mut upcalls = self.upcalls.clone();

        spawn(async move {
            let event = match fut.await {
                Ok(event) => event,
                Err(err) => {
                    warn!("The {} operation failed: {:?}", operation, err);
                    PlatformEvent::CommandFailed { operation, reason: err.to_string() }
                },
            };
            post(&mut upcalls, event).await;
        });
    }

    fn execute(&mut self, command: Command) {
        debug!("Executing {:?}", command);

        match command {
            Command::StartTimer { operation, after } => self.start_timer(operation, after),
            Command::CancelTimer(operation) => {
                if let Some(token) = self.timers.remove(&operation) {
                    token.cancel();
                }
            },
            command => {
                let Some(adapter) = self.adapter.clone() else {
                    warn!("No adapter, dropping {:?}", command);
                    return;
                };
                self.execute_radio(adapter, command);
            },
        }
    }

    fn start_timer(&mut self, operation: Operation, after: Duration) {
        let token = self.cancel.child_token();
        if let Some(previous) = self.timers.insert(operation, token.clone()) {
            previous.cancel();
        }

        let mut upcalls = self.upcalls.clone();
        spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {},
                _ = sleep(after) => post(&mut upcalls, PlatformEvent::TimerExpired(operation)).await,
            }
        });
    }

    fn execute_radio(&mut self, adapter: Adapter, command: Command) {
        match command {
            Command::StartScan { services } => {
                let filter = ScanFilter { services: services.unwrap_or_default() };
                let mut upcalls = self.upcalls.clone();

                spawn(async move {
                    if let Err(err) = adapter.start_scan(filter).await {
                        warn!("Scanning failed {:?}", err);
                        post(&mut upcalls, PlatformEvent::CommandFailed { operation: Operation::Scan, reason: err.to_string() }).await;
                    }
                });
            },
            Command::StopScan => {
                spawn(async move {
                    if let Err(err) = adapter.stop_scan().await {
                        warn!("Failed to stop scanning: {:?}", err);
                    }
                });
            },
            Command::Connect(id) => {
                let mut upcalls = self.upcalls.clone();

                spawn(async move {
                    let event = match connect(&adapter, &id).await {
                        Ok(()) => PlatformEvent::PeripheralConnected(id),
                        Err(err) => PlatformEvent::ConnectFailed { peripheral: id, reason: err.to_string() },
                    };
                    post(&mut upcalls, event).await;
                });
            },
            Command::Disconnect(id) => {
                self.stop_notifications(&id);
                let mut upcalls = self.upcalls.clone();

                spawn(async move {
                    tokio::select! {
                        _ = sleep(Duration::from_millis(DISCONNECT_DEADLINE)) => {
                            warn!("Disconnecting from {} took too long", id);
                        }
                        result = disconnect(&adapter, &id) => match result {
                            // not every platform reports our own disconnects as a central event
                            Ok(()) => post(&mut upcalls, PlatformEvent::PeripheralDisconnected { peripheral: id.clone(), reason: None }).await,
                            Err(err) => warn!("Failed to disconnect from {}: {:?}", id, err),
                        }
                    }
                });
            },
            Command::DiscoverServices { peripheral, .. } => {
                self.spawn_operation(Operation::Discovery, async move {
                    let services = discover_services(&adapter, &peripheral).await?;
                    Ok(PlatformEvent::ServicesDiscovered { peripheral, services })
                });
            },
            Command::DiscoverCharacteristics { peripheral, service, .. } => {
                self.spawn_operation(Operation::Discovery, async move {
                    let characteristics = discover_characteristics(&adapter, &peripheral, &service).await?;
                    Ok(PlatformEvent::CharacteristicsDiscovered { peripheral, service, characteristics })
                });
            },
            Command::SetNotify { peripheral, characteristic, enabled } => {
                self.stop_notifications(&peripheral);

                let token = self.cancel.child_token();
                if enabled {
                    self.notifications.insert(peripheral.clone(), token.clone());
                }

                let mut upcalls = self.upcalls.clone();
                spawn(async move {
                    if let Err(err) = set_notify(token, &adapter, &peripheral, characteristic, enabled, upcalls.clone()).await {
                        warn!("Failed to set notify on {}: {:?}", characteristic, err);
                        post(&mut upcalls, PlatformEvent::CommandFailed { operation: Operation::Notify, reason: err.to_string() }).await;
                    }
                });
            },
            // handled in execute
            Command::StartTimer { .. } | Command::CancelTimer(_) => {},
        }
    }

    /// Stops scanning and disconnects, waiting for the disconnect so the peripheral is released
    /// before the process exits.
    async fn shutdown(&mut self, client: &mut TremorClient) {
        for token in self.timers.drain().map(|(_, token)| token) {
            token.cancel();
        }
        for token in self.notifications.drain().map(|(_, token)| token) {
            token.cancel();
        }

        let Some(adapter) = self.adapter.clone() else {
            return;
        };

        for effect in client.shutdown() {
            match effect {
                Effect::Command(Command::StopScan) => {
                    if let Err(err) = adapter.stop_scan().await {
                        warn!("Failed to stop scanning: {:?}", err);
                    }
                },
                Effect::Command(Command::Disconnect(id)) => {
                    info!("Disconnecting from {}", id);
                    tokio::select! {
                        _ = sleep(Duration::from_millis(DISCONNECT_DEADLINE)) => {
                            warn!("Disconnecting from {} took too long", id);
                        }
                        result = disconnect(&adapter, &id) => {
                            if let Err(err) = result {
                                warn!("Failed to disconnect from {}: {:?}", id, err);
                            }
                        }
                    }
                },
                _ => {},
            }
        }
    }
}

async fn set_notify(
    cancel: CancellationToken,
    adapter: &Adapter,
    id: &PeripheralId,
    uuid: Uuid,
    enabled: bool,
    upcalls: Sender<PlatformEvent>,
) -> Result<(), DeviceError> {
    let peripheral = find_peripheral(adapter, id).await?;
    let characteristic = find_characteristic(&peripheral, &uuid)?;

    if !enabled {
        peripheral.unsubscribe(&characteristic).await?;
        return Ok(());
    }

    info!("Subscribing to characteristic {:?} {:?}", characteristic.service_uuid, characteristic.uuid);
    peripheral.subscribe(&characteristic).await?;

    spawn(async move {
        if let Err(err) = read_notifications_task(cancel, peripheral, uuid, upcalls).await {
            warn!("Error during read notifications task: {:?}", err);
        }
    });

    Ok(())
}

async fn run_loop(
    cancel: CancellationToken,
    mut client: TremorClient,
    mut driver: BtleDriver,
    mut upcall_rx: Receiver<PlatformEvent>,
) {
    'mainloop: loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                break 'mainloop;
            },
            Some(event) = upcall_rx.next() => {
                driver.observe(&event);
                let effects = client.handle(event);
                driver.apply(effects).await;
            },
        }
    }

    info!("Shutting down bluetooth client");
    driver.shutdown(&mut client).await;
}

/// Drives a [`TremorClient`] with btleplug until `cancel` fires. Client events go to `events`.
pub async fn run_client(cancel: CancellationToken, config: &Config, events: Sender<ClientEvent>) -> Result<(), DeviceError> {
    let (upcall_tx, upcall_rx) = channel::<PlatformEvent>(UPCALL_CHANNEL_SIZE);
    let mut client = TremorClient::new(config.target(), config.client_options());
    let mut driver = BtleDriver::new(cancel.clone(), upcall_tx.clone(), events);

    let manager = Manager::new().await?;
    let mut last_state: Option<RadioState> = None;

    let adapter = loop {
        match open_adapter(&manager).await {
            Ok(adapter) => break adapter,
            Err(err) => {
                let state = radio_state_for(&err);
                if last_state != Some(state) {
                    warn!("Bluetooth adapter not available: {}", err);
                    driver.apply(client.handle(PlatformEvent::RadioStateChanged(state))).await;
                    last_state = Some(state);
                }

                tokio::select! {
                    _ = cancel.cancelled() => return Ok(()),
                    _ = sleep(Duration::from_millis(ADAPTER_RETRY_DELAY)) => {},
                }
            },
        }
    };

    driver.adapter = Some(adapter.clone());

    let central_cancel = cancel.child_token();
    let central_upcalls = upcall_tx.clone();
    let central_adapter = adapter.clone();
    spawn(async move {
        if let Err(err) = central_events_task(central_cancel, central_adapter, central_upcalls).await {
            warn!("Failed to listen for adapter events: {:?}", err);
        }
    });

    // later changes arrive as StateUpdate events
    let state = initial_radio_state(adapter.adapter_state().await);
    driver.apply(client.handle(PlatformEvent::RadioStateChanged(state))).await;
    run_loop(cancel, client, driver, upcall_rx).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_adapter_means_unsupported_radio() {
        assert_eq!(radio_state_for(&DeviceError::NoAdapter), RadioState::Unsupported);
    }

    #[test]
    fn permission_denied_means_unauthorized_radio() {
        let err = DeviceError::Btle { source: btleplug::Error::PermissionDenied };
        assert_eq!(radio_state_for(&err), RadioState::Unauthorized);
    }

    #[test]
    fn other_failures_leave_radio_unknown() {
        let err = DeviceError::Btle { source: btleplug::Error::NotConnected };
        assert_eq!(radio_state_for(&err), RadioState::Unknown);
    }

    #[test]
    fn adapter_states_map_onto_radio_states() {
        assert_eq!(radio_state_of(CentralState::PoweredOn), RadioState::PoweredOn);
        assert_eq!(radio_state_of(CentralState::PoweredOff), RadioState::PoweredOff);
        assert_eq!(radio_state_of(CentralState::Unknown), RadioState::Unknown);
    }

    #[test]
    fn powered_off_adapter_is_not_reported_as_powered_on() {
        assert_eq!(initial_radio_state(Ok(CentralState::PoweredOff)), RadioState::PoweredOff);
        assert_eq!(initial_radio_state(Ok(CentralState::PoweredOn)), RadioState::PoweredOn);
    }

    #[test]
    fn unreadable_adapter_state_counts_as_powered_on() {
        let state = initial_radio_state(Err(btleplug::Error::NotSupported("adapter state".to_string())));
        assert_eq!(state, RadioState::PoweredOn);
    }

    #[tokio::test]
    async fn closed_event_sink_does_not_stop_the_driver() {
        let (upcall_tx, mut upcall_rx) = channel::<PlatformEvent>(UPCALL_CHANNEL_SIZE);
        let (events_tx, events_rx) = channel::<ClientEvent>(1);
        drop(events_rx);

        let cancel = CancellationToken::new();
        let mut driver = BtleDriver::new(cancel.clone(), upcall_tx, events_tx);

        driver.apply(vec![
            Effect::Emit(ClientEvent::RadioUnavailable(RadioState::PoweredOff)),
            Effect::Command(Command::StartTimer { operation: Operation::Scan, after: Duration::from_millis(1) }),
        ]).await;

        // the command after the dropped event still ran
        assert!(driver.timers.contains_key(&Operation::Scan));
        assert_eq!(upcall_rx.next().await, Some(PlatformEvent::TimerExpired(Operation::Scan)));
        cancel.cancel();
    }

    #[tokio::test]
    async fn cancelled_timer_never_fires() {
        let (upcall_tx, mut upcall_rx) = channel::<PlatformEvent>(UPCALL_CHANNEL_SIZE);
        let (events_tx, _events_rx) = channel::<ClientEvent>(1);
        let mut driver = BtleDriver::new(CancellationToken::new(), upcall_tx, events_tx);

        driver.apply(vec![
            Effect::Command(Command::StartTimer { operation: Operation::Connect, after: Duration::from_millis(20) }),
            Effect::Command(Command::CancelTimer(Operation::Connect)),
            Effect::Command(Command::StartTimer { operation: Operation::Scan, after: Duration::from_millis(40) }),
        ]).await;

        assert_eq!(upcall_rx.next().await, Some(PlatformEvent::TimerExpired(Operation::Scan)));
    }
}
