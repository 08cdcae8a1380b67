use log::{debug, info, warn};
use uuid::Uuid;

use crate::device::types::{Command, PeripheralId, SubscribedCharacteristic, TargetSpec};
use crate::error::ClientError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvePhase {
    Idle,
    DiscoveringServices,
    DiscoveringCharacteristics,
    Resolved,
    /// Discovery finished without finding the target; nothing more happens on this connection.
    Unresolved,
}

/// Walks the service/characteristic tree of a connected peripheral down to the status
/// characteristic and turns notifications on for it.
#[derive(Debug, Clone)]
pub struct Resolver {
    phase: ResolvePhase,
    subscription: Option<SubscribedCharacteristic>,
}

impl Resolver {
    pub fn new() -> Self {
        Resolver { phase: ResolvePhase::Idle, subscription: None }
    }

    pub fn phase(&self) -> ResolvePhase {
        self.phase
    }

    pub fn subscription(&self) -> Option<&SubscribedCharacteristic> {
        self.subscription.as_ref()
    }

    pub fn is_discovering(&self) -> bool {
        matches!(self.phase, ResolvePhase::DiscoveringServices | ResolvePhase::DiscoveringCharacteristics)
    }

    pub fn is_notifying(&self, characteristic: &Uuid) -> bool {
        match &self.subscription {
            Some(subscription) => subscription.notifying && &subscription.characteristic_id == characteristic,
            None => false,
        }
    }

    pub fn start(&mut self, target: &TargetSpec, peripheral: &PeripheralId) -> Command {
        info!("Discovering services of {}...", peripheral);
        self.phase = ResolvePhase::DiscoveringServices;
        self.subscription = None;

        Command::DiscoverServices {
            peripheral: peripheral.clone(),
            services: vec![target.service_id],
        }
    }

    pub fn on_services_discovered(
        &mut self,
        target: &TargetSpec,
        peripheral: &PeripheralId,
        services: &[Uuid],
    ) -> Result<Option<Command>, ClientError> {
        if self.phase != ResolvePhase::DiscoveringServices {
            debug!("Ignoring service discovery result, not discovering services");
            return Ok(None);
        }

        for service in services {
            debug!("Found service {}", service);
        }

        if !services.contains(&target.service_id) {
            warn!("Service {} not offered by {}", target.service_id, peripheral);
            self.phase = ResolvePhase::Unresolved;
            return Err(ClientError::ServiceNotFound);
        }

        self.phase = ResolvePhase::DiscoveringCharacteristics;
        Ok(Some(Command::DiscoverCharacteristics {
            peripheral: peripheral.clone(),
            service: target.service_id,
            characteristics: vec![target.characteristic_id],
        }))
    }

    pub fn on_characteristics_discovered(
        &mut self,
        target: &TargetSpec,
        peripheral: &PeripheralId,
        service: &Uuid,
        characteristics: &[Uuid],
    ) -> Result<Option<Command>, ClientError> {
        if self.phase != ResolvePhase::DiscoveringCharacteristics || service != &target.service_id {
            debug!("Ignoring characteristics of service {}", service);
            return Ok(None);
        }

        for characteristic in characteristics {
            debug!("Found characteristic {}", characteristic);
        }

        if !characteristics.contains(&target.characteristic_id) {
            warn!("Characteristic {} not offered by {}", target.characteristic_id, peripheral);
            self.phase = ResolvePhase::Unresolved;
            return Err(ClientError::CharacteristicNotFound);
        }

        self.phase = ResolvePhase::Resolved;
        self.subscription = Some(SubscribedCharacteristic {
            characteristic_id: target.characteristic_id,
            notifying: false,
        });

        Ok(self.enable_notify(peripheral))
    }

    /// Returns the notify downcall, or `None` when notifications are already on or the
    /// characteristic has not been resolved yet.
    pub fn enable_notify(&mut self, peripheral: &PeripheralId) -> Option<Command> {
        let subscription = self.subscription.as_mut()?;

        if subscription.notifying {
            debug!("Notifications already enabled for {}", subscription.characteristic_id);
            return None;
        }

        info!("Subscribing to characteristic {}", subscription.characteristic_id);
        subscription.notifying = true;
        Some(Command::SetNotify {
            peripheral: peripheral.clone(),
            characteristic: subscription.characteristic_id,
            enabled: true,
        })
    }

    /// The platform refused the notify downcall.
    pub fn on_notify_failed(&mut self) {
        if let Some(subscription) = self.subscription.as_mut() {
            subscription.notifying = false;
        }
    }

    /// Discovery did not finish in time.
    pub fn abandon(&mut self) {
        self.phase = ResolvePhase::Unresolved;
    }

    /// Drops the subscription; it has to be resolved again on the next connection.
    pub fn reset(&mut self) {
        self.phase = ResolvePhase::Idle;
        self.subscription = None;
    }
}

impl Default for Resolver {
    fn default() -> Self {
        Resolver::new()
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

    fn resolved() -> (Resolver, PeripheralId) {
        let target = target();
        let peripheral = PeripheralId::from("a");
        let mut resolver = Resolver::new();

        resolver.start(&target, &peripheral);
        resolver.on_services_discovered(&target, &peripheral, &[TREMOR_SERVICE]).unwrap();
        resolver
            .on_characteristics_discovered(&target, &peripheral, &TREMOR_SERVICE, &[TREMOR_STATUS_CHARACTERISTIC])
            .unwrap();

        (resolver, peripheral)
    }

    #[test]
    fn walks_down_to_the_status_characteristic() {
        let target = target();
        let peripheral = PeripheralId::from("a");
        let mut resolver = Resolver::new();

        assert_eq!(
            resolver.start(&target, &peripheral),
            Command::DiscoverServices { peripheral: peripheral.clone(), services: vec![TREMOR_SERVICE] },
        );

        let other = Uuid::from_u128(0x180f);
        let command = resolver.on_services_discovered(&target, &peripheral, &[other, TREMOR_SERVICE]).unwrap();
        assert_eq!(
            command,
            Some(Command::DiscoverCharacteristics {
                peripheral: peripheral.clone(),
                service: TREMOR_SERVICE,
                characteristics: vec![TREMOR_STATUS_CHARACTERISTIC],
            }),
        );

        let command = resolver
            .on_characteristics_discovered(&target, &peripheral, &TREMOR_SERVICE, &[other, TREMOR_STATUS_CHARACTERISTIC])
            .unwrap();
        assert_eq!(
            command,
            Some(Command::SetNotify { peripheral, characteristic: TREMOR_STATUS_CHARACTERISTIC, enabled: true }),
        );
        assert_eq!(resolver.phase(), ResolvePhase::Resolved);
        assert!(resolver.is_notifying(&TREMOR_STATUS_CHARACTERISTIC));
    }

    #[test]
    fn missing_service_is_reported() {
        let target = target();
        let peripheral = PeripheralId::from("a");
        let mut resolver = Resolver::new();
        resolver.start(&target, &peripheral);

        assert_eq!(
            resolver.on_services_discovered(&target, &peripheral, &[Uuid::from_u128(1)]),
            Err(ClientError::ServiceNotFound),
        );
        assert_eq!(resolver.phase(), ResolvePhase::Unresolved);
        assert!(resolver.subscription().is_none());
    }

    #[test]
    fn missing_characteristic_is_reported() {
        let target = target();
        let peripheral = PeripheralId::from("a");
        let mut resolver = Resolver::new();
        resolver.start(&target, &peripheral);
        resolver.on_services_discovered(&target, &peripheral, &[TREMOR_SERVICE]).unwrap();

        assert_eq!(
            resolver.on_characteristics_discovered(&target, &peripheral, &TREMOR_SERVICE, &[]),
            Err(ClientError::CharacteristicNotFound),
        );
        assert!(resolver.subscription().is_none());
    }

    #[test]
    fn characteristics_of_other_services_are_ignored() {
        let target = target();
        let peripheral = PeripheralId::from("a");
        let mut resolver = Resolver::new();
        resolver.start(&target, &peripheral);
        resolver.on_services_discovered(&target, &peripheral, &[TREMOR_SERVICE]).unwrap();

        let other = Uuid::from_u128(0x180f);
        assert_eq!(
            resolver.on_characteristics_discovered(&target, &peripheral, &other, &[TREMOR_STATUS_CHARACTERISTIC]),
            Ok(None),
        );
        assert_eq!(resolver.phase(), ResolvePhase::DiscoveringCharacteristics);
    }

    #[test]
    fn enable_notify_is_idempotent() {
        let (mut resolver, peripheral) = resolved();

        assert_eq!(resolver.enable_notify(&peripheral), None);
        assert_eq!(resolver.enable_notify(&peripheral), None);
        assert!(resolver.is_notifying(&TREMOR_STATUS_CHARACTERISTIC));
    }

    #[test]
    fn enable_notify_retries_after_failure() {
        let (mut resolver, peripheral) = resolved();

        resolver.on_notify_failed();
        assert!(!resolver.is_notifying(&TREMOR_STATUS_CHARACTERISTIC));
        assert!(resolver.enable_notify(&peripheral).is_some());
    }

    #[test]
    fn reset_drops_subscription() {
        let (mut resolver, peripheral) = resolved();

        resolver.reset();
        assert_eq!(resolver.phase(), ResolvePhase::Idle);
        assert!(resolver.subscription().is_none());
        assert_eq!(resolver.enable_notify(&peripheral), None);
    }
}
