use log::{info, warn};

use crate::device::types::{Connection, ConnectionState, PeripheralId};
use crate::error::ClientError;

/// Single slot connection lifecycle:
/// Disconnected -> Connecting -> Connected -> Disconnected, and Connecting -> Failed -> Disconnected.
///
/// Every transition returns the connection snapshots the event sink should see, in order.
#[derive(Debug, Clone, Default)]
pub struct ConnectionManager {
    connection: Option<Connection>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        ConnectionManager { connection: None }
    }

    pub fn current(&self) -> Option<&Connection> {
        self.connection.as_ref()
    }

    pub fn state(&self) -> ConnectionState {
        match &self.connection {
            Some(connection) => connection.state.clone(),
            None => ConnectionState::Disconnected,
        }
    }

    pub fn peripheral(&self) -> Option<&PeripheralId> {
        self.connection.as_ref().map(|connection| &connection.peripheral)
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    fn is_active(&self, peripheral: &PeripheralId) -> bool {
        self.peripheral() == Some(peripheral)
    }

    pub fn request_connect(&mut self, peripheral: PeripheralId) -> Result<Connection, ClientError> {
        if let Some(existing) = &self.connection {
            let rejection = match existing.state {
                ConnectionState::Connecting => Some(ClientError::AlreadyConnecting { peripheral: existing.peripheral.clone() }),
                ConnectionState::Connected => Some(ClientError::AlreadyConnected { peripheral: existing.peripheral.clone() }),
                ConnectionState::Disconnected | ConnectionState::Failed(_) => None,
            };

            if let Some(err) = rejection {
                warn!("Rejecting connect request for {}: {}", peripheral, err);
                return Err(err);
            }
        }

        let connection = Connection { peripheral, state: ConnectionState::Connecting };
        self.connection = Some(connection.clone());
        Ok(connection)
    }

    pub fn on_connected(&mut self, peripheral: &PeripheralId) -> Option<Connection> {
        match &mut self.connection {
            Some(connection) if &connection.peripheral == peripheral && connection.state == ConnectionState::Connecting => {
                info!("Connected to {}", peripheral);
                connection.state = ConnectionState::Connected;
                Some(connection.clone())
            },
            _ => {
                warn!("Ignoring connected upcall for {}, no connect is pending for it", peripheral);
                None
            },
        }
    }

    pub fn on_connect_failed(&mut self, peripheral: &PeripheralId, reason: &str) -> Vec<Connection> {
        if !self.is_active(peripheral) || self.state() != ConnectionState::Connecting {
            warn!("Ignoring connect failure for {}, no connect is pending for it", peripheral);
            return Vec::new();
        }

        self.fail(reason)
    }

    /// Moves the pending connection through Failed to Disconnected and frees the slot.
    pub fn fail(&mut self, reason: &str) -> Vec<Connection> {
        let Some(connection) = self.connection.take() else {
            return Vec::new();
        };

        warn!("Connecting to {} failed: {}", connection.peripheral, reason);
        vec![
            Connection { peripheral: connection.peripheral.clone(), state: ConnectionState::Failed(reason.to_string()) },
            Connection { peripheral: connection.peripheral, state: ConnectionState::Disconnected },
        ]
    }

    /// Frees the slot. Returns the state the connection was in and the Disconnected snapshot.
    pub fn on_disconnected(&mut self, peripheral: &PeripheralId) -> Option<(ConnectionState, Connection)> {
        if !self.is_active(peripheral) {
            warn!("Ignoring disconnect of {}, it is not the active peripheral", peripheral);
            return None;
        }

        self.invalidate()
    }

    pub fn invalidate(&mut self) -> Option<(ConnectionState, Connection)> {
        let connection = self.connection.take()?;
        info!("Connection to {} closed", connection.peripheral);

        Some((
            connection.state,
            Connection { peripheral: connection.peripheral, state: ConnectionState::Disconnected },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(value: &str) -> PeripheralId {
        PeripheralId::from(value)
    }

    #[test]
    fn connect_lifecycle() {
        let mut manager = ConnectionManager::new();
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        let connection = manager.request_connect(id("a")).unwrap();
        assert_eq!(connection.state, ConnectionState::Connecting);

        let connection = manager.on_connected(&id("a")).unwrap();
        assert_eq!(connection.state, ConnectionState::Connected);
        assert!(manager.is_connected());

        let (previous, connection) = manager.on_disconnected(&id("a")).unwrap();
        assert_eq!(previous, ConnectionState::Connected);
        assert_eq!(connection.state, ConnectionState::Disconnected);
        assert!(manager.current().is_none());
    }

    #[test]
    fn redundant_connect_is_rejected_without_state_change() {
        let mut manager = ConnectionManager::new();
        manager.request_connect(id("a")).unwrap();

        assert_eq!(
            manager.request_connect(id("b")),
            Err(ClientError::AlreadyConnecting { peripheral: id("a") }),
        );
        assert_eq!(manager.peripheral(), Some(&id("a")));
        assert_eq!(manager.state(), ConnectionState::Connecting);

        manager.on_connected(&id("a"));
        assert_eq!(
            manager.request_connect(id("a")),
            Err(ClientError::AlreadyConnected { peripheral: id("a") }),
        );
        assert_eq!(manager.state(), ConnectionState::Connected);
    }

    #[test]
    fn connect_failure_passes_through_failed() {
        let mut manager = ConnectionManager::new();
        manager.request_connect(id("a")).unwrap();

        let snapshots = manager.on_connect_failed(&id("a"), "out of range");
        let states: Vec<ConnectionState> = snapshots.into_iter().map(|c| c.state).collect();
        assert_eq!(states, vec![ConnectionState::Failed("out of range".to_string()), ConnectionState::Disconnected]);
        assert!(manager.current().is_none());

        // the slot is free again
        assert!(manager.request_connect(id("a")).is_ok());
    }

    #[test]
    fn upcalls_for_other_peripherals_are_ignored() {
        let mut manager = ConnectionManager::new();
        manager.request_connect(id("a")).unwrap();

        assert_eq!(manager.on_connected(&id("b")), None);
        assert!(manager.on_connect_failed(&id("b"), "nope").is_empty());
        assert_eq!(manager.on_disconnected(&id("b")), None);
        assert_eq!(manager.state(), ConnectionState::Connecting);
    }

    #[test]
    fn connected_upcall_twice_is_ignored() {
        let mut manager = ConnectionManager::new();
        manager.request_connect(id("a")).unwrap();
        assert!(manager.on_connected(&id("a")).is_some());
        assert_eq!(manager.on_connected(&id("a")), None);
        assert!(manager.on_connect_failed(&id("a"), "late").is_empty());
        assert!(manager.is_connected());
    }
}
