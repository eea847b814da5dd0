// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Driver online status and last known location.
//!
//! Presence decides whether a driver may claim rides and feeds pickup ETAs.
//! It does not rank drivers by distance.

use crate::base::{Coordinates, DriverId};
use crate::driver::{Driver, DriverStatus};
use crate::error::DispatchError;
use crate::geo::{distance_km, estimate_travel_minutes};
use crate::ledger::Ledger;
use std::sync::Arc;

#[derive(Clone)]
pub struct DriverPresence {
    ledger: Arc<dyn Ledger>,
}

impl DriverPresence {
    pub fn new(ledger: Arc<dyn Ledger>) -> Self {
        Self { ledger }
    }

    pub fn set_online(&self, driver: DriverId) -> Result<(), DispatchError> {
        self.ledger.set_driver_status(driver, DriverStatus::Online)?;
        tracing::info!(%driver, "driver online");
        Ok(())
    }

    /// Rides already assigned to the driver are left untouched.
    pub fn set_offline(&self, driver: DriverId) -> Result<(), DispatchError> {
        self.ledger.set_driver_status(driver, DriverStatus::Offline)?;
        tracing::info!(%driver, "driver offline");
        Ok(())
    }

    pub fn update_location(&self, driver: DriverId, lat: f64, lon: f64) -> Result<(), DispatchError> {
        let location = Coordinates::new(lat, lon)?;
        self.ledger.update_driver_location(driver, location)?;
        tracing::debug!(%driver, %location, "driver location updated");
        Ok(())
    }

    pub fn online_drivers(&self) -> Result<Vec<Driver>, DispatchError> {
        self.ledger.online_drivers()
    }

    /// Minutes for the closest online driver with a known location to reach
    /// `pickup`, if any driver has shared one.
    pub fn nearest_pickup_eta(
        &self,
        pickup: Coordinates,
        avg_speed_kmh: f64,
    ) -> Result<Option<u32>, DispatchError> {
        let nearest = self
            .ledger
            .online_drivers()?
            .iter()
            .filter_map(|driver| driver.location)
            .map(|location| distance_km(location, pickup))
            .min_by(f64::total_cmp);
        Ok(nearest.map(|km| estimate_travel_minutes(km, avg_speed_kmh)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::UserId;
    use crate::driver::DriverProfile;
    use crate::error::ValidationError;
    use crate::memory::MemoryLedger;

    fn presence() -> (DriverPresence, Arc<MemoryLedger>) {
        let ledger = Arc::new(MemoryLedger::new());
        (DriverPresence::new(ledger.clone()), ledger)
    }

    #[test]
    fn toggles_status() {
        let (presence, ledger) = presence();
        let id = ledger.upsert_driver(UserId(1), DriverProfile::default(), 0).unwrap();
        presence.set_online(id).unwrap();
        assert!(ledger.get_driver(id).unwrap().is_online());
        presence.set_offline(id).unwrap();
        assert!(!ledger.get_driver(id).unwrap().is_online());
        assert_eq!(presence.set_online(DriverId(77)), Err(DispatchError::DriverNotFound));
    }

    #[test]
    fn location_validated_and_stored() {
        let (presence, ledger) = presence();
        let id = ledger.upsert_driver(UserId(1), DriverProfile::default(), 0).unwrap();
        assert_eq!(
            presence.update_location(id, 123.0, 0.0),
            Err(DispatchError::Validation(ValidationError::InvalidCoordinates))
        );
        presence.update_location(id, -1.28, 36.82).unwrap();
        let location = ledger.get_driver(id).unwrap().location.unwrap();
        assert_eq!(location.lat(), -1.28);
    }

    #[test]
    fn nearest_eta_uses_online_drivers_only() {
        let (presence, ledger) = presence();
        let pickup = Coordinates::new(-1.2833, 36.8167).unwrap();
        assert_eq!(presence.nearest_pickup_eta(pickup, 30.0).unwrap(), None);

        // Offline driver right at the pickup is ignored.
        let idle = ledger.upsert_driver(UserId(1), DriverProfile::default(), 0).unwrap();
        presence.update_location(idle, -1.2833, 36.8167).unwrap();

        let far = ledger.upsert_driver(UserId(2), DriverProfile::default(), 0).unwrap();
        presence.set_online(far).unwrap();
        presence.update_location(far, -1.3000, 36.8300).unwrap();

        assert_eq!(presence.nearest_pickup_eta(pickup, 30.0).unwrap(), Some(5));
    }
}
