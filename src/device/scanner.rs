use log::{debug, info};

use crate::device::types::{DiscoveredPeripheral, PeripheralId, SelectionPolicy, TargetSpec};

/// Picks the target peripheral out of the advertisements seen while scanning.
///
/// The first advertisement that satisfies the policy wins. There is no ranking by signal
/// strength and two peripherals with the same name are not told apart; use
/// [`SelectionPolicy::ByIdentity`] to pin a known peripheral.
#[derive(Debug, Clone)]
pub struct Scanner {
    policy: SelectionPolicy,
}

impl Scanner {
    pub fn new(policy: SelectionPolicy) -> Self {
        Scanner { policy }
    }

    pub fn policy(&self) -> &SelectionPolicy {
        &self.policy
    }

    pub fn matches(&self, target: &TargetSpec, peripheral: &DiscoveredPeripheral) -> bool {
        match &self.policy {
            SelectionPolicy::ByName => {
                peripheral.advertised_name.as_deref() == Some(target.peripheral_name_match.as_str())
            },
            SelectionPolicy::ByIdentity(identity) => &peripheral.identity == identity,
        }
    }

    /// Returns the identity to connect to when `peripheral` is the target.
    pub fn on_discovered(&self, target: &TargetSpec, peripheral: &DiscoveredPeripheral) -> Option<PeripheralId> {
        debug!(
            "Discovered peripheral {} {} rssi={:?}",
            peripheral.identity,
            peripheral.advertised_name.as_deref().unwrap_or("NONE"),
            peripheral.signal_strength,
        );

        if !self.matches(target, peripheral) {
            return None;
        }

        info!("Found {} ({}), connecting...", target.peripheral_name_match, peripheral.identity);
        Some(peripheral.identity.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::constants::{TREMOR_SERVICE, TREMOR_STATUS_CHARACTERISTIC};

    fn target() -> TargetSpec {
        TargetSpec {
            peripheral_name_match: "TremorBLE".to_string(),
            service_id: TREMOR_SERVICE,
            characteristic_id: TREMOR_STATUS_CHARACTERISTIC,
        }
    }

    fn discovered(id: &str, name: Option<&str>) -> DiscoveredPeripheral {
        DiscoveredPeripheral {
            identity: PeripheralId::from(id),
            advertised_name: name.map(String::from),
            signal_strength: Some(-60),
        }
    }

    #[test]
    fn name_must_match_exactly() {
        let scanner = Scanner::new(SelectionPolicy::ByName);
        let target = target();

        assert_eq!(scanner.on_discovered(&target, &discovered("a", Some("Other"))), None);
        assert_eq!(scanner.on_discovered(&target, &discovered("b", Some("tremorble"))), None);
        assert_eq!(scanner.on_discovered(&target, &discovered("c", Some("TremorBLE "))), None);
        assert_eq!(scanner.on_discovered(&target, &discovered("d", None)), None);
        assert_eq!(
            scanner.on_discovered(&target, &discovered("e", Some("TremorBLE"))),
            Some(PeripheralId::from("e")),
        );
    }

    #[test]
    fn identity_policy_ignores_name() {
        let scanner = Scanner::new(SelectionPolicy::ByIdentity(PeripheralId::from("pinned")));
        let target = target();

        assert_eq!(scanner.on_discovered(&target, &discovered("other", Some("TremorBLE"))), None);
        assert_eq!(
            scanner.on_discovered(&target, &discovered("pinned", None)),
            Some(PeripheralId::from("pinned")),
        );
    }
}
