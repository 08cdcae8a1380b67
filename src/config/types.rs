use std::time::Duration;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::device::constants::{TREMOR_PERIPHERAL_NAME, TREMOR_SERVICE, TREMOR_STATUS_CHARACTERISTIC};
use crate::device::types::{ClientOptions, PeripheralId, SelectionPolicy, TargetSpec, Timeouts};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub peripheral_name: String,
    pub service_uuid: Uuid,
    pub characteristic_uuid: Uuid,
    /// Connect only to this peripheral id instead of matching on name.
    pub peripheral_id: Option<String>,
    pub scan_with_service_filter: bool,
    pub rescan_on_disconnect: bool,
    pub scan_timeout_ms: Option<u64>,
    pub connect_timeout_ms: Option<u64>,
    pub discovery_timeout_ms: Option<u64>,
}

impl Config {
    pub fn target(&self) -> TargetSpec {
        TargetSpec {
            peripheral_name_match: self.peripheral_name.clone(),
            service_id: self.service_uuid,
            characteristic_id: self.characteristic_uuid,
        }
    }

    pub fn client_options(&self) -> ClientOptions {
        let selection = match &self.peripheral_id {
            Some(id) => SelectionPolicy::ByIdentity(PeripheralId(id.clone())),
            None => SelectionPolicy::ByName,
        };

        ClientOptions {
            selection,
            timeouts: Timeouts {
                scan: self.scan_timeout_ms.map(Duration::from_millis),
                connect: self.connect_timeout_ms.map(Duration::from_millis),
                discovery: self.discovery_timeout_ms.map(Duration::from_millis),
            },
            scan_with_service_filter: self.scan_with_service_filter,
            rescan_on_disconnect: self.rescan_on_disconnect,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            peripheral_name: String::from(TREMOR_PERIPHERAL_NAME),
            service_uuid: TREMOR_SERVICE,
            characteristic_uuid: TREMOR_STATUS_CHARACTERISTIC,
            peripheral_id: None,
            scan_with_service_filter: false,
            rescan_on_disconnect: false,
            scan_timeout_ms: None,
            connect_timeout_ms: None,
            discovery_timeout_ms: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_falls_back_to_defaults() {
        let config: Config = serde_json::from_str(r#"{ "peripheralName": "TremorBLE-2", "connectTimeoutMs": 5000 }"#).unwrap();

        assert_eq!(config.peripheral_name, "TremorBLE-2");
        assert_eq!(config.service_uuid, TREMOR_SERVICE);
        assert_eq!(config.characteristic_uuid, TREMOR_STATUS_CHARACTERISTIC);

        let options = config.client_options();
        assert_eq!(options.timeouts.connect, Some(Duration::from_millis(5000)));
        assert_eq!(options.timeouts.scan, None);
        assert_eq!(options.selection, SelectionPolicy::ByName);
    }

    #[test]
    fn uuids_accept_upper_case() {
        let config: Config = serde_json::from_str(
            r#"{ "serviceUuid": "E7810A71-73AE-499D-8C15-FAA9AEF0C3F2", "characteristicUuid": "BEFC5C1C-A5D0-42DB-A6C2-C0BFA020E50D" }"#,
        ).unwrap();

        assert_eq!(config.target().service_id, TREMOR_SERVICE);
        assert_eq!(config.target().characteristic_id, TREMOR_STATUS_CHARACTERISTIC);
    }

    #[test]
    fn peripheral_id_pins_identity() {
        let config = Config { peripheral_id: Some("hci0/dev_AA".to_string()), ..Config::default() };

        assert_eq!(
            config.client_options().selection,
            SelectionPolicy::ByIdentity(PeripheralId::from("hci0/dev_AA")),
        );
    }

    #[test]
    fn defaults_target_the_tremor_sensor() {
        let target = Config::default().target();
        assert_eq!(target.peripheral_name_match, "TremorBLE");

        let json = serde_json::to_string(&Config::default()).unwrap();
        assert!(json.contains("\"peripheralName\":\"TremorBLE\""));
    }
}
