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

//! In-memory ledger.
//!
//! Rows live in [`DashMap`]s. Every mutation runs under the row's shard write
//! lock (`get_mut` / `entry`), which gives the per-row write serialization a
//! relational ledger would provide: the guard check and the write of a claim,
//! cancel, completion or rating fold happen in one step.
//!
//! Lock order, where two maps are touched together: `ride_keys` before
//! `rides`, `driver_index` before `drivers`, the rating slot before
//! `drivers`.

use crate::base::{Coordinates, DriverId, RideId, UserId};
use crate::driver::{Driver, DriverProfile, DriverStatus};
use crate::error::{DispatchError, ValidationError};
use crate::ledger::{EmergencyContact, Ledger, RecordedRating, RideInsert};
use crate::rating::{NewRating, Rating, RatingSummary, Score};
use crate::rating_log::RatingLog;
use crate::ride::{CancelOutcome, CancelledBy, NewRide, Ride, RideStatus};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rust_decimal::Decimal;
use std::cmp::Reverse;
use std::sync::atomic::{AtomicU64, Ordering};

/// Ledger backed by concurrent hash maps. Nothing is persisted.
#[derive(Debug)]
pub struct MemoryLedger {
    rides: DashMap<RideId, Ride>,
    next_ride_id: AtomicU64,
    /// Idempotency keys per rider.
    ride_keys: DashMap<(UserId, String), RideId>,
    drivers: DashMap<DriverId, Driver>,
    /// External identity to driver id.
    driver_index: DashMap<UserId, DriverId>,
    next_driver_id: AtomicU64,
    ratings: RatingLog,
    contacts: DashMap<UserId, Vec<EmergencyContact>>,
    settings: DashMap<String, String>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self {
            rides: DashMap::new(),
            next_ride_id: AtomicU64::new(1),
            ride_keys: DashMap::new(),
            drivers: DashMap::new(),
            driver_index: DashMap::new(),
            next_driver_id: AtomicU64::new(1),
            ratings: RatingLog::new(),
            contacts: DashMap::new(),
            settings: DashMap::new(),
        }
    }

    /// Snapshot of every ride, ordered by id.
    pub fn rides(&self) -> Vec<Ride> {
        let mut rides: Vec<Ride> = self.rides.iter().map(|entry| entry.value().clone()).collect();
        rides.sort_by_key(|ride| ride.id);
        rides
    }

    fn insert_ride(&self, ride: NewRide) -> RideId {
        let id = RideId(self.next_ride_id.fetch_add(1, Ordering::SeqCst));
        self.rides.insert(id, Ride::from_new(id, ride));
        id
    }

    fn with_ride<T>(
        &self,
        id: RideId,
        apply: impl FnOnce(&mut Ride) -> Result<T, DispatchError>,
    ) -> Result<T, DispatchError> {
        let mut ride = self.rides.get_mut(&id).ok_or(DispatchError::RideNotFound(id))?;
        apply(ride.value_mut())
    }

    fn with_driver<T>(
        &self,
        id: DriverId,
        apply: impl FnOnce(&mut Driver) -> T,
    ) -> Result<T, DispatchError> {
        let mut driver = self.drivers.get_mut(&id).ok_or(DispatchError::DriverNotFound)?;
        Ok(apply(driver.value_mut()))
    }

    /// Newest first, then a page of `limit` starting at `offset`.
    fn page(
        &self,
        keep: impl Fn(&Ride) -> bool,
        limit: usize,
        offset: usize,
    ) -> (Vec<Ride>, usize) {
        let mut rides: Vec<Ride> = self
            .rides
            .iter()
            .filter(|entry| keep(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        let total = rides.len();
        rides.sort_by_key(|ride| Reverse((ride.created_at, ride.id)));
        let page = rides.into_iter().skip(offset).take(limit).collect();
        (page, total)
    }
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl Ledger for MemoryLedger {
    fn create_ride(&self, ride: NewRide) -> Result<RideInsert, DispatchError> {
        let Some(key) = ride.idempotency_key.clone() else {
            return Ok(RideInsert::Created(self.insert_ride(ride)));
        };
        // Holding the key entry across the insert makes concurrent duplicates
        // resolve to one ride.
        match self.ride_keys.entry((ride.rider, key)) {
            Entry::Occupied(entry) => Ok(RideInsert::Existing(*entry.get())),
            Entry::Vacant(entry) => {
                let id = self.insert_ride(ride);
                entry.insert(id);
                Ok(RideInsert::Created(id))
            }
        }
    }

    fn get_ride(&self, id: RideId) -> Result<Ride, DispatchError> {
        self.rides
            .get(&id)
            .map(|ride| ride.value().clone())
            .ok_or(DispatchError::RideNotFound(id))
    }

    fn claim_ride(&self, id: RideId, driver: DriverId) -> Result<Option<Ride>, DispatchError> {
        self.with_ride(id, |ride| Ok(ride.try_assign(driver).then(|| ride.clone())))
    }

    fn set_ride_status(&self, id: RideId, status: RideStatus) -> Result<Ride, DispatchError> {
        self.with_ride(id, |ride| {
            ride.advance(status)?;
            Ok(ride.clone())
        })
    }

    fn cancel_ride(
        &self,
        id: RideId,
        by: CancelledBy,
        at: i64,
    ) -> Result<CancelOutcome, DispatchError> {
        self.with_ride(id, |ride| ride.cancel(by, at))
    }

    fn set_final_fare(&self, id: RideId, amount: Decimal) -> Result<Ride, DispatchError> {
        if amount < Decimal::ZERO {
            return Err(ValidationError::InvalidFare.into());
        }
        self.with_ride(id, |ride| {
            ride.settle(amount);
            Ok(ride.clone())
        })
    }

    fn rides_by_rider(
        &self,
        rider: UserId,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<Ride>, usize), DispatchError> {
        Ok(self.page(|ride| ride.rider == rider, limit, offset))
    }

    fn rides_by_driver(
        &self,
        driver: DriverId,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<Ride>, usize), DispatchError> {
        Ok(self.page(|ride| ride.involves_driver(driver), limit, offset))
    }

    fn searching_rides(&self, limit: usize) -> Result<Vec<Ride>, DispatchError> {
        let mut rides: Vec<Ride> = self
            .rides
            .iter()
            .filter(|entry| entry.status == RideStatus::Searching)
            .map(|entry| entry.value().clone())
            .collect();
        rides.sort_by_key(|ride| (ride.created_at, ride.id));
        rides.truncate(limit);
        Ok(rides)
    }

    fn upsert_driver(
        &self,
        external: UserId,
        profile: DriverProfile,
        at: i64,
    ) -> Result<DriverId, DispatchError> {
        match self.driver_index.entry(external) {
            Entry::Occupied(entry) => {
                let id = *entry.get();
                self.with_driver(id, |driver| driver.merge_profile(profile))?;
                Ok(id)
            }
            Entry::Vacant(entry) => {
                let id = DriverId(self.next_driver_id.fetch_add(1, Ordering::SeqCst));
                self.drivers
                    .insert(id, Driver::register(id, external, profile, at));
                entry.insert(id);
                Ok(id)
            }
        }
    }

    fn set_driver_status(&self, id: DriverId, status: DriverStatus) -> Result<(), DispatchError> {
        self.with_driver(id, |driver| driver.status = status)
    }

    fn update_driver_location(
        &self,
        id: DriverId,
        location: Coordinates,
    ) -> Result<(), DispatchError> {
        self.with_driver(id, |driver| driver.location = Some(location))
    }

    fn get_driver(&self, id: DriverId) -> Result<Driver, DispatchError> {
        self.drivers
            .get(&id)
            .map(|driver| driver.value().clone())
            .ok_or(DispatchError::DriverNotFound)
    }

    fn get_driver_by_external(&self, external: UserId) -> Result<Driver, DispatchError> {
        let id = self
            .driver_index
            .get(&external)
            .map(|entry| *entry.value())
            .ok_or(DispatchError::DriverNotFound)?;
        self.get_driver(id)
    }

    fn online_drivers(&self) -> Result<Vec<Driver>, DispatchError> {
        let mut drivers: Vec<Driver> = self
            .drivers
            .iter()
            .filter(|entry| entry.is_online())
            .map(|entry| entry.value().clone())
            .collect();
        drivers.sort_by_key(|driver| driver.id);
        Ok(drivers)
    }

    fn record_rating(&self, rating: NewRating) -> Result<RecordedRating, DispatchError> {
        let (id, summary) = self
            .ratings
            .push_with(rating, |rating| self.update_driver_rating(rating.driver, rating.score))?;
        Ok(RecordedRating { id, summary })
    }

    fn update_driver_rating(
        &self,
        id: DriverId,
        score: Score,
    ) -> Result<RatingSummary, DispatchError> {
        self.with_driver(id, |driver| {
            driver.rating = driver.rating.with_score(score);
            driver.rating
        })
    }

    fn ratings_for_driver(&self, id: DriverId) -> Result<Vec<Rating>, DispatchError> {
        Ok(self.ratings.for_driver(id))
    }

    fn add_emergency_contact(&self, contact: EmergencyContact) -> Result<(), DispatchError> {
        self.contacts.entry(contact.owner).or_default().push(contact);
        Ok(())
    }

    fn emergency_contacts(&self, owner: UserId) -> Result<Vec<EmergencyContact>, DispatchError> {
        Ok(self
            .contacts
            .get(&owner)
            .map(|contacts| contacts.value().clone())
            .unwrap_or_default())
    }

    fn get_setting(&self, key: &str) -> Result<Option<String>, DispatchError> {
        Ok(self.settings.get(key).map(|value| value.value().clone()))
    }

    fn set_setting(&self, key: &str, value: &str) -> Result<(), DispatchError> {
        self.settings.insert(key.to_owned(), value.to_owned());
        Ok(())
    }
}
