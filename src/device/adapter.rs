use log::{info, warn};
use uuid::Uuid;

use crate::device::types::{Command, RadioState};

/// Caches the last radio state reported by the platform and gates scan downcalls on it.
#[derive(Debug, Clone)]
pub struct Adapter {
    state: RadioState,
    scanning: bool,
}

impl Adapter {
    pub fn new() -> Self {
        Adapter { state: RadioState::Unknown, scanning: false }
    }

    pub fn current_state(&self) -> RadioState {
        self.state
    }

    pub fn is_powered_on(&self) -> bool {
        self.state == RadioState::PoweredOn
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning
    }

    /// Records a state upcall. Returns the previous state.
    pub fn on_state_changed(&mut self, state: RadioState) -> RadioState {
        let previous = self.state;
        self.state = state;

        if state != RadioState::PoweredOn {
            // the platform drops any scan in progress when the radio goes away
            self.scanning = false;
        }

        if previous != state {
            info!("Bluetooth radio state {:?} -> {:?}", previous, state);
        }

        previous
    }

    /// Returns the scan downcall, or `None` when the radio is not powered on or a scan is
    /// already running.
    pub fn start_scan(&mut self, service_filter: Option<Vec<Uuid>>) -> Option<Command> {
        if !self.is_powered_on() {
            warn!("Not scanning, bluetooth radio is {:?}", self.state);
            return None;
        }

        if self.scanning {
            return None;
        }

        info!("Scanning for peripherals...");
        self.scanning = true;
        Some(Command::StartScan { services: service_filter })
    }

    pub fn stop_scan(&mut self) -> Option<Command> {
        if !self.scanning {
            return None;
        }

        self.scanning = false;
        Some(Command::StopScan)
    }

    /// The platform could not start the scan; nothing is running that needs stopping.
    pub fn on_scan_failed(&mut self) {
        self.scanning = false;
    }
}

impl Default for Adapter {
    fn default() -> Self {
        Adapter::new()
    }
}
