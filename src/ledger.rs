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

//! Persistence port.
//!
//! The engine keeps no ride or driver state of its own; every read and write
//! goes through a [`Ledger`]. Implementations must make each mutating call a
//! single atomic row operation. In particular [`Ledger::claim_ride`] is one
//! conditional write, never a read followed by a write.

use crate::base::{Coordinates, DriverId, RatingId, RideId, UserId};
use crate::driver::{Driver, DriverProfile, DriverStatus};
use crate::error::{DispatchError, ValidationError};
use crate::rating::{NewRating, Rating, RatingSummary, Score};
use crate::ride::{CancelOutcome, CancelledBy, NewRide, Ride, RideStatus};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Outcome of inserting a ride.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RideInsert {
    Created(RideId),
    /// A ride with the same rider and idempotency key already exists.
    Existing(RideId),
}

impl RideInsert {
    pub fn id(self) -> RideId {
        match self {
            RideInsert::Created(id) | RideInsert::Existing(id) => id,
        }
    }
}

/// A stored rating together with the driver's average after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordedRating {
    pub id: RatingId,
    pub summary: RatingSummary,
}

/// Someone to reach in an emergency. Append-only, owned by `owner`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmergencyContact {
    pub owner: UserId,
    pub name: String,
    pub phone: String,
    pub created_at: i64,
}

impl EmergencyContact {
    pub fn new(owner: UserId, name: &str, phone: &str, at: i64) -> Result<Self, ValidationError> {
        let name = name.trim();
        let phone = phone.trim();
        if name.is_empty() {
            return Err(ValidationError::EmptyField("contact name"));
        }
        if phone.is_empty() {
            return Err(ValidationError::EmptyField("contact phone"));
        }
        Ok(Self {
            owner,
            name: name.to_owned(),
            phone: phone.to_owned(),
            created_at: at,
        })
    }
}

/// Storage operations the dispatch engine relies on.
///
/// Lookups of unknown ids fail with [`DispatchError::RideNotFound`] or
/// [`DispatchError::DriverNotFound`]; backend outages surface as
/// [`DispatchError::Persistence`].
pub trait Ledger: Send + Sync {
    /// Inserts a `searching` ride and assigns the next id.
    fn create_ride(&self, ride: NewRide) -> Result<RideInsert, DispatchError>;

    fn get_ride(&self, id: RideId) -> Result<Ride, DispatchError>;

    /// Assigns the ride to `driver` iff it is still searching and unassigned.
    ///
    /// Exactly one caller per ride gets `Some`, carrying the row as committed
    /// by that claim. Everyone else gets `None`.
    fn claim_ride(&self, id: RideId, driver: DriverId) -> Result<Option<Ride>, DispatchError>;

    /// Guarded status change, see [`Ride::advance`].
    fn set_ride_status(&self, id: RideId, status: RideStatus) -> Result<Ride, DispatchError>;

    fn cancel_ride(
        &self,
        id: RideId,
        by: CancelledBy,
        at: i64,
    ) -> Result<CancelOutcome, DispatchError>;

    /// Records the settled fare regardless of status. Last write wins.
    fn set_final_fare(&self, id: RideId, amount: Decimal) -> Result<Ride, DispatchError>;

    /// A page of the rider's rides, newest first, with the total count.
    fn rides_by_rider(
        &self,
        rider: UserId,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<Ride>, usize), DispatchError>;

    /// A page of the rides `driver` has held, newest first, with the total
    /// count. Includes rides the driver held when they were cancelled.
    fn rides_by_driver(
        &self,
        driver: DriverId,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<Ride>, usize), DispatchError>;

    /// Rides still waiting for a driver, oldest first.
    fn searching_rides(&self, limit: usize) -> Result<Vec<Ride>, DispatchError>;

    /// Registers or updates a driver keyed by external identity.
    fn upsert_driver(
        &self,
        external: UserId,
        profile: DriverProfile,
        at: i64,
    ) -> Result<DriverId, DispatchError>;

    fn set_driver_status(&self, id: DriverId, status: DriverStatus) -> Result<(), DispatchError>;

    fn update_driver_location(
        &self,
        id: DriverId,
        location: Coordinates,
    ) -> Result<(), DispatchError>;

    fn get_driver(&self, id: DriverId) -> Result<Driver, DispatchError>;

    fn get_driver_by_external(&self, external: UserId) -> Result<Driver, DispatchError>;

    fn online_drivers(&self) -> Result<Vec<Driver>, DispatchError>;

    /// Stores an immutable rating and folds its score into the driver's
    /// running average, as one atomic operation. One per ride and rider.
    ///
    /// Either both the rating and the fold land or neither does, so a failed
    /// call can be retried without tripping [`ValidationError::AlreadyRated`].
    fn record_rating(&self, rating: NewRating) -> Result<RecordedRating, DispatchError>;

    /// Folds `score` into the driver's running average in one atomic update.
    fn update_driver_rating(
        &self,
        id: DriverId,
        score: Score,
    ) -> Result<RatingSummary, DispatchError>;

    fn ratings_for_driver(&self, id: DriverId) -> Result<Vec<Rating>, DispatchError>;

    fn add_emergency_contact(&self, contact: EmergencyContact) -> Result<(), DispatchError>;

    fn emergency_contacts(&self, owner: UserId) -> Result<Vec<EmergencyContact>, DispatchError>;

    fn get_setting(&self, key: &str) -> Result<Option<String>, DispatchError>;

    fn set_setting(&self, key: &str, value: &str) -> Result<(), DispatchError>;
}
