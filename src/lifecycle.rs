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

//! Ride lifecycle over the ledger.
//!
//! Validates requests, checks who may act on a ride, and hands each guarded
//! transition to the ledger as one row operation. The guards themselves live
//! on [`Ride`].

use crate::base::{Coordinates, DriverId, RideId, UserId};
use crate::error::{DispatchError, ValidationError};
use crate::ledger::{Ledger, RideInsert};
use crate::ride::{CancelOutcome, CancelledBy, DropOff, NewRide, Ride, RideStatus};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A rider's confirmed request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RideRequest {
    pub rider: UserId,
    pub pickup: Option<Coordinates>,
    pub drop: DropOff,
    pub group_size: u32,
    /// Client token that makes resubmission safe.
    pub idempotency_key: Option<String>,
}

impl RideRequest {
    /// Returns the pickup point and the normalised drop-off.
    ///
    /// A blank drop description counts as no drop-off.
    pub fn validate(&self) -> Result<(Coordinates, DropOff), ValidationError> {
        let pickup = self.pickup.ok_or(ValidationError::MissingPickup)?;
        if self.group_size < 1 {
            return Err(ValidationError::InvalidGroupSize(self.group_size));
        }
        let drop = match &self.drop {
            DropOff::Description(text) if text.trim().is_empty() => DropOff::Unspecified,
            DropOff::Description(text) => DropOff::Description(text.trim().to_owned()),
            other => other.clone(),
        };
        Ok((pickup, drop))
    }
}

/// Pre-trip projections stored on the ride.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Quote {
    pub fare_estimate: Decimal,
    pub eta_pickup_minutes: u32,
    pub eta_trip_minutes: u32,
}

/// Who is acting on a ride.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Actor {
    Rider(UserId),
    Driver(DriverId),
    Admin,
}

impl Actor {
    pub fn role(self) -> CancelledBy {
        match self {
            Actor::Rider(_) => CancelledBy::Rider,
            Actor::Driver(_) => CancelledBy::Driver,
            Actor::Admin => CancelledBy::Admin,
        }
    }

    /// Riders act on their own rides, drivers on rides assigned to them.
    pub fn may_act_on(self, ride: &Ride) -> bool {
        match self {
            Actor::Rider(rider) => ride.rider == rider,
            Actor::Driver(driver) => ride.assigned_driver == Some(driver),
            Actor::Admin => true,
        }
    }
}

/// Result of [`RideLifecycle::create`].
#[derive(Debug, Clone, PartialEq)]
pub struct RideCreation {
    pub ride: Ride,
    /// The request repeated an earlier idempotency key.
    pub duplicate: bool,
}

#[derive(Clone)]
pub struct RideLifecycle {
    ledger: Arc<dyn Ledger>,
}

impl RideLifecycle {
    pub fn new(ledger: Arc<dyn Ledger>) -> Self {
        Self { ledger }
    }

    /// Creates a `searching` ride.
    ///
    /// # Errors
    ///
    /// - [`ValidationError::MissingPickup`] - No pickup location.
    /// - [`ValidationError::InvalidGroupSize`] - Group size below one.
    pub fn create(
        &self,
        request: RideRequest,
        quote: Quote,
        at: i64,
    ) -> Result<RideCreation, DispatchError> {
        let (pickup, drop) = request.validate()?;
        let insert = self.ledger.create_ride(NewRide {
            rider: request.rider,
            pickup,
            drop,
            group_size: request.group_size,
            fare_estimate: quote.fare_estimate,
            eta_pickup_minutes: quote.eta_pickup_minutes,
            eta_trip_minutes: quote.eta_trip_minutes,
            created_at: at,
            idempotency_key: request.idempotency_key,
        })?;
        let ride = self.ledger.get_ride(insert.id())?;
        Ok(RideCreation {
            ride,
            duplicate: matches!(insert, RideInsert::Existing(_)),
        })
    }

    /// Cancels a ride on behalf of `actor`.
    ///
    /// Cancelling an already-cancelled ride succeeds without changes.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::RideNotFound`] - Unknown ride.
    /// - [`ValidationError::NotRideParticipant`] - Actor does not own the ride.
    /// - [`DispatchError::InvalidTransition`] - Ride already completed.
    pub fn cancel(&self, id: RideId, actor: Actor, at: i64) -> Result<CancelOutcome, DispatchError> {
        let ride = self.ledger.get_ride(id)?;
        if ride.status == RideStatus::Cancelled {
            return Ok(CancelOutcome {
                ride,
                released_driver: None,
                already_cancelled: true,
            });
        }
        if !actor.may_act_on(&ride) {
            return Err(ValidationError::NotRideParticipant.into());
        }
        self.ledger.cancel_ride(id, actor.role(), at)
    }

    /// Marks an assigned ride completed.
    pub fn complete(&self, id: RideId) -> Result<Ride, DispatchError> {
        self.ledger.set_ride_status(id, RideStatus::Completed)
    }

    /// Records the settled cash amount, whatever the ride's status.
    pub fn finalize_fare(&self, id: RideId, amount: Decimal) -> Result<Ride, DispatchError> {
        if amount < Decimal::ZERO {
            return Err(ValidationError::InvalidFare.into());
        }
        self.ledger.set_final_fare(id, amount)
    }

    pub fn get(&self, id: RideId) -> Result<Ride, DispatchError> {
        self.ledger.get_ride(id)
    }
}
