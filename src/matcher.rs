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

//! Claim-based assignment.
//!
//! Many drivers may tap "accept" on the same broadcast at once. The winner is
//! whichever conditional write the ledger commits first; everyone else gets
//! `false`. There is no in-process lock: the ledger's row serialization is the
//! only arbiter, so this works across any number of engine instances.

use crate::base::{DriverId, RideId};
use crate::error::{DispatchError, ValidationError};
use crate::ledger::Ledger;
use crate::ride::Ride;
use std::sync::Arc;

#[derive(Clone)]
pub struct DispatchMatcher {
    ledger: Arc<dyn Ledger>,
    require_online: bool,
}

impl DispatchMatcher {
    pub fn new(ledger: Arc<dyn Ledger>, require_online: bool) -> Self {
        Self {
            ledger,
            require_online,
        }
    }

    /// Attempts to take the ride for `driver`.
    ///
    /// Returns `true` only for the single winning claimant. Cancelled,
    /// completed and already-assigned rides always return `false`.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::DriverNotFound`] - Driver is not registered.
    /// - [`ValidationError::DriverOffline`] - Driver is offline and online
    ///   status is required.
    /// - [`DispatchError::RideNotFound`] - Unknown ride.
    pub fn claim(&self, ride: RideId, driver: DriverId) -> Result<bool, DispatchError> {
        Ok(self.try_claim(ride, driver)?.is_some())
    }

    /// Like [`DispatchMatcher::claim`], but hands the winner the ride row as
    /// its claim committed it.
    pub fn try_claim(&self, ride: RideId, driver: DriverId) -> Result<Option<Ride>, DispatchError> {
        let claimant = self.ledger.get_driver(driver)?;
        if self.require_online && !claimant.is_online() {
            return Err(ValidationError::DriverOffline.into());
        }
        let won = self.ledger.claim_ride(ride, driver)?;
        tracing::debug!(%ride, %driver, won = won.is_some(), "claim attempt");
        Ok(won)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::{Coordinates, UserId};
    use crate::driver::{DriverProfile, DriverStatus};
    use crate::memory::MemoryLedger;
    use crate::ride::{CancelledBy, DropOff, NewRide};
    use rust_decimal_macros::dec;

    fn setup(require_online: bool) -> (DispatchMatcher, Arc<MemoryLedger>, RideId) {
        let ledger = Arc::new(MemoryLedger::new());
        let ride = ledger
            .create_ride(NewRide {
                rider: UserId(1),
                pickup: Coordinates::new(0.0, 0.0).unwrap(),
                drop: DropOff::Unspecified,
                group_size: 1,
                fare_estimate: dec!(100),
                eta_pickup_minutes: 5,
                eta_trip_minutes: 0,
                created_at: 0,
                idempotency_key: None,
            })
            .unwrap()
            .id();
        (
            DispatchMatcher::new(ledger.clone(), require_online),
            ledger,
            ride,
        )
    }

    fn online_driver(ledger: &MemoryLedger, external: i64) -> DriverId {
        let id = ledger
            .upsert_driver(UserId(external), DriverProfile::default(), 0)
            .unwrap();
        ledger.set_driver_status(id, DriverStatus::Online).unwrap();
        id
    }

    #[test]
    fn first_claim_wins() {
        let (matcher, ledger, ride) = setup(true);
        let d1 = online_driver(&ledger, 10);
        let d2 = online_driver(&ledger, 11);
        assert!(matcher.claim(ride, d1).unwrap());
        assert!(!matcher.claim(ride, d2).unwrap());
        assert!(!matcher.claim(ride, d1).unwrap());
    }

    #[test]
    fn winner_gets_committed_row() {
        let (matcher, ledger, ride) = setup(true);
        let d1 = online_driver(&ledger, 10);
        let d2 = online_driver(&ledger, 11);
        let won = matcher.try_claim(ride, d1).unwrap().unwrap();
        assert_eq!(won.id, ride);
        assert_eq!(won.assigned_driver, Some(d1));
        assert_eq!(matcher.try_claim(ride, d2).unwrap(), None);
    }

    #[test]
    fn offline_driver_rejected_when_required() {
        let (matcher, ledger, ride) = setup(true);
        let id = ledger
            .upsert_driver(UserId(10), DriverProfile::default(), 0)
            .unwrap();
        assert_eq!(
            matcher.claim(ride, id),
            Err(DispatchError::Validation(ValidationError::DriverOffline))
        );
        assert_eq!(ledger.get_ride(ride).unwrap().assigned_driver, None);
    }

    #[test]
    fn offline_driver_allowed_when_not_required() {
        let (matcher, ledger, ride) = setup(false);
        let id = ledger
            .upsert_driver(UserId(10), DriverProfile::default(), 0)
            .unwrap();
        assert!(matcher.claim(ride, id).unwrap());
    }

    #[test]
    fn unregistered_driver_rejected() {
        let (matcher, _, ride) = setup(true);
        assert_eq!(
            matcher.claim(ride, DriverId(42)),
            Err(DispatchError::DriverNotFound)
        );
    }

    #[test]
    fn cancelled_ride_never_claimable() {
        let (matcher, ledger, ride) = setup(true);
        let d1 = online_driver(&ledger, 10);
        ledger.cancel_ride(ride, CancelledBy::Rider, 1).unwrap();
        assert!(!matcher.claim(ride, d1).unwrap());
    }
}
