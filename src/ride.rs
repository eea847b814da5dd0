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

//! Ride records and the ride state machine.
//!
//! ```text
//!  Searching ──claim──► Assigned ──complete──► Completed
//!      │                   │
//!      └──────cancel───────┴──────► Cancelled
//! ```
//!
//! No state is ever revisited. `Cancelled` and `Completed` are terminal.
//! Every mutation here runs inside a single ledger row update, so the guard
//! check and the write are never split across two ledger calls.
//!
//! # Example
//!
//! ```
//! use tuktuk_dispatch::{Coordinates, DriverId, DropOff, NewRide, Ride, RideId, RideStatus, UserId};
//! use rust_decimal_macros::dec;
//!
//! let mut ride = Ride::from_new(RideId(1), NewRide {
//!     rider: UserId(10),
//!     pickup: Coordinates::new(-1.2833, 36.8167).unwrap(),
//!     drop: DropOff::Unspecified,
//!     group_size: 2,
//!     fare_estimate: dec!(120.00),
//!     eta_pickup_minutes: 5,
//!     eta_trip_minutes: 0,
//!     created_at: 1_700_000_000,
//!     idempotency_key: None,
//! });
//! assert!(ride.try_assign(DriverId(3)));
//! assert!(!ride.try_assign(DriverId(4)));
//! assert_eq!(ride.status, RideStatus::Assigned);
//! ```

use crate::base::{Coordinates, DriverId, RideId, UserId};
use crate::error::DispatchError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RideStatus {
    Searching,
    /// Older rows may still carry `driver_assigned`; both mean the same thing.
    #[serde(alias = "driver_assigned")]
    Assigned,
    Completed,
    Cancelled,
}

impl RideStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RideStatus::Completed | RideStatus::Cancelled)
    }

    /// Edges of the state graph.
    pub fn can_transition_to(self, next: RideStatus) -> bool {
        use RideStatus::*;
        matches!(
            (self, next),
            (Searching, Assigned)
                | (Searching, Cancelled)
                | (Assigned, Completed)
                | (Assigned, Cancelled)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RideStatus::Searching => "searching",
            RideStatus::Assigned => "assigned",
            RideStatus::Completed => "completed",
            RideStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for RideStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operation attempted on a ride, reported in transition errors.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RideAction {
    Assign,
    Cancel,
    Complete,
    Reopen,
    Rate,
}

impl fmt::Display for RideAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RideAction::Assign => "assign",
            RideAction::Cancel => "cancel",
            RideAction::Complete => "complete",
            RideAction::Reopen => "reopen",
            RideAction::Rate => "rate",
        };
        f.write_str(name)
    }
}

/// Who cancelled a ride.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CancelledBy {
    Rider,
    Driver,
    Admin,
}

impl fmt::Display for CancelledBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CancelledBy::Rider => "rider",
            CancelledBy::Driver => "driver",
            CancelledBy::Admin => "admin",
        };
        f.write_str(name)
    }
}

/// Requested destination.
///
/// A point and a free-text description are mutually exclusive.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum DropOff {
    #[default]
    Unspecified,
    Point(Coordinates),
    Description(String),
}

impl DropOff {
    pub fn point(&self) -> Option<Coordinates> {
        match self {
            DropOff::Point(point) => Some(*point),
            _ => None,
        }
    }
}

impl fmt::Display for DropOff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropOff::Unspecified => f.write_str("not specified"),
            DropOff::Point(point) => write!(f, "{point}"),
            DropOff::Description(text) => f.write_str(text),
        }
    }
}

/// A ride as handed to the ledger for insertion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewRide {
    pub rider: UserId,
    pub pickup: Coordinates,
    pub drop: DropOff,
    pub group_size: u32,
    pub fare_estimate: Decimal,
    pub eta_pickup_minutes: u32,
    pub eta_trip_minutes: u32,
    pub created_at: i64,
    /// Client-supplied token; repeated creates with the same token and rider
    /// resolve to the first ride.
    pub idempotency_key: Option<String>,
}

/// Stored ride row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Ride {
    pub id: RideId,
    pub rider: UserId,
    pub pickup: Coordinates,
    pub drop: DropOff,
    pub group_size: u32,
    pub status: RideStatus,
    pub fare_estimate: Decimal,
    pub final_fare: Option<Decimal>,
    pub eta_pickup_minutes: u32,
    pub eta_trip_minutes: u32,
    pub assigned_driver: Option<DriverId>,
    pub created_at: i64,
    pub cancelled_at: Option<i64>,
    pub cancelled_by: Option<CancelledBy>,
    /// Driver who held the ride when it was cancelled. Keeps the ride in
    /// that driver's history after the assignment is cleared.
    #[serde(default)]
    pub released_driver: Option<DriverId>,
    pub idempotency_key: Option<String>,
}

/// Result of a cancel request.
#[derive(Debug, Clone, PartialEq)]
pub struct CancelOutcome {
    pub ride: Ride,
    /// Driver whose assignment was released by this cancellation.
    pub released_driver: Option<DriverId>,
    /// The ride was already cancelled; nothing changed.
    pub already_cancelled: bool,
}

impl Ride {
    pub fn from_new(id: RideId, new: NewRide) -> Self {
        Self {
            id,
            rider: new.rider,
            pickup: new.pickup,
            drop: new.drop,
            group_size: new.group_size,
            status: RideStatus::Searching,
            fare_estimate: new.fare_estimate,
            final_fare: None,
            eta_pickup_minutes: new.eta_pickup_minutes,
            eta_trip_minutes: new.eta_trip_minutes,
            assigned_driver: None,
            created_at: new.created_at,
            cancelled_at: None,
            cancelled_by: None,
            released_driver: None,
            idempotency_key: new.idempotency_key,
        }
    }

    fn assert_invariants(&self) {
        debug_assert_eq!(
            self.assigned_driver.is_some(),
            matches!(self.status, RideStatus::Assigned | RideStatus::Completed),
            "Invariant violated: ride {} is {} with assignment {:?}",
            self.id,
            self.status,
            self.assigned_driver
        );
    }

    fn invalid(&self, action: RideAction) -> DispatchError {
        DispatchError::InvalidTransition {
            ride: self.id,
            from: self.status,
            action,
        }
    }

    /// Conditional assignment: succeeds only while searching and unassigned.
    pub fn try_assign(&mut self, driver: DriverId) -> bool {
        if self.status != RideStatus::Searching || self.assigned_driver.is_some() {
            return false;
        }
        self.assigned_driver = Some(driver);
        self.status = RideStatus::Assigned;
        self.assert_invariants();
        true
    }

    /// Cancels the ride, releasing any assignment.
    ///
    /// Cancelling twice is a successful no-op.
    pub fn cancel(&mut self, by: CancelledBy, at: i64) -> Result<CancelOutcome, DispatchError> {
        match self.status {
            RideStatus::Cancelled => Ok(CancelOutcome {
                ride: self.clone(),
                released_driver: None,
                already_cancelled: true,
            }),
            RideStatus::Completed => Err(self.invalid(RideAction::Cancel)),
            RideStatus::Searching | RideStatus::Assigned => {
                let released_driver = self.assigned_driver.take();
                self.status = RideStatus::Cancelled;
                self.cancelled_at = Some(at);
                self.cancelled_by = Some(by);
                self.released_driver = released_driver;
                self.assert_invariants();
                Ok(CancelOutcome {
                    ride: self.clone(),
                    released_driver,
                    already_cancelled: false,
                })
            }
        }
    }

    pub fn complete(&mut self) -> Result<(), DispatchError> {
        if self.status != RideStatus::Assigned {
            return Err(self.invalid(RideAction::Complete));
        }
        self.status = RideStatus::Completed;
        self.assert_invariants();
        Ok(())
    }

    /// Guarded status change for edges that carry no extra data.
    ///
    /// Assignment needs a driver and cancellation needs an actor, so those
    /// edges go through [`Ride::try_assign`] and [`Ride::cancel`].
    pub fn advance(&mut self, next: RideStatus) -> Result<(), DispatchError> {
        match next {
            RideStatus::Completed => self.complete(),
            RideStatus::Assigned => Err(self.invalid(RideAction::Assign)),
            RideStatus::Cancelled => Err(self.invalid(RideAction::Cancel)),
            RideStatus::Searching => Err(self.invalid(RideAction::Reopen)),
        }
    }

    /// Whether `driver` holds this ride now or held it when it was cancelled.
    pub fn involves_driver(&self, driver: DriverId) -> bool {
        self.assigned_driver == Some(driver) || self.released_driver == Some(driver)
    }

    /// Records the settled cash amount. Last write wins.
    pub fn settle(&mut self, amount: Decimal) {
        self.final_fare = Some(amount.round_dp(crate::geo::FARE_PRECISION));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn searching_ride() -> Ride {
        Ride::from_new(
            RideId(1),
            NewRide {
                rider: UserId(100),
                pickup: Coordinates::new(-1.2833, 36.8167).unwrap(),
                drop: DropOff::Description("Westlands".into()),
                group_size: 3,
                fare_estimate: dec!(140.00),
                eta_pickup_minutes: 5,
                eta_trip_minutes: 0,
                created_at: 1_700_000_000,
                idempotency_key: None,
            },
        )
    }

    #[test]
    fn status_graph_edges() {
        use RideStatus::*;
        assert!(Searching.can_transition_to(Assigned));
        assert!(Searching.can_transition_to(Cancelled));
        assert!(Assigned.can_transition_to(Completed));
        assert!(Assigned.can_transition_to(Cancelled));
        assert!(!Searching.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(Searching));
        assert!(!Assigned.can_transition_to(Searching));
    }

    #[test]
    fn new_ride_is_searching_and_unassigned() {
        let ride = searching_ride();
        assert_eq!(ride.status, RideStatus::Searching);
        assert_eq!(ride.assigned_driver, None);
        assert_eq!(ride.final_fare, None);
    }

    #[test]
    fn assign_only_once() {
        let mut ride = searching_ride();
        assert!(ride.try_assign(DriverId(1)));
        assert!(!ride.try_assign(DriverId(2)));
        assert_eq!(ride.assigned_driver, Some(DriverId(1)));
    }

    #[test]
    fn cancelled_ride_cannot_be_assigned() {
        let mut ride = searching_ride();
        ride.cancel(CancelledBy::Rider, 10).unwrap();
        assert!(!ride.try_assign(DriverId(1)));
        assert_eq!(ride.status, RideStatus::Cancelled);
        assert_eq!(ride.assigned_driver, None);
    }

    #[test]
    fn cancel_releases_assignment() {
        let mut ride = searching_ride();
        ride.try_assign(DriverId(9));
        let outcome = ride.cancel(CancelledBy::Driver, 42).unwrap();
        assert_eq!(outcome.released_driver, Some(DriverId(9)));
        assert!(!outcome.already_cancelled);
        assert_eq!(ride.assigned_driver, None);
        assert_eq!(ride.released_driver, Some(DriverId(9)));
        assert!(ride.involves_driver(DriverId(9)));
        assert!(!ride.involves_driver(DriverId(8)));
        assert_eq!(ride.cancelled_at, Some(42));
        assert_eq!(ride.cancelled_by, Some(CancelledBy::Driver));
    }

    #[test]
    fn cancel_twice_is_noop() {
        let mut ride = searching_ride();
        ride.cancel(CancelledBy::Rider, 10).unwrap();
        let again = ride.cancel(CancelledBy::Admin, 99).unwrap();
        assert!(again.already_cancelled);
        assert_eq!(ride.cancelled_at, Some(10));
        assert_eq!(ride.cancelled_by, Some(CancelledBy::Rider));
    }

    #[test]
    fn cancel_completed_reports_recorded_status() {
        let mut ride = searching_ride();
        ride.try_assign(DriverId(1));
        ride.complete().unwrap();
        let err = ride.cancel(CancelledBy::Rider, 10).unwrap_err();
        assert_eq!(
            err,
            DispatchError::InvalidTransition {
                ride: RideId(1),
                from: RideStatus::Completed,
                action: RideAction::Cancel,
            }
        );
        assert_eq!(ride.status, RideStatus::Completed);
    }

    #[test]
    fn complete_requires_assignment() {
        let mut ride = searching_ride();
        assert!(matches!(
            ride.complete(),
            Err(DispatchError::InvalidTransition {
                from: RideStatus::Searching,
                ..
            })
        ));
    }

    #[test]
    fn advance_only_completes() {
        let mut ride = searching_ride();
        assert!(ride.advance(RideStatus::Assigned).is_err());
        assert!(ride.advance(RideStatus::Cancelled).is_err());
        ride.try_assign(DriverId(1));
        assert!(ride.advance(RideStatus::Searching).is_err());
        ride.advance(RideStatus::Completed).unwrap();
        assert_eq!(ride.status, RideStatus::Completed);
    }

    #[test]
    fn settle_rounds_and_overwrites() {
        let mut ride = searching_ride();
        ride.settle(dec!(150.005));
        ride.settle(dec!(180.456));
        assert_eq!(ride.final_fare, Some(dec!(180.46)));
    }

    #[test]
    fn legacy_driver_assigned_status_deserializes() {
        let status: RideStatus = serde_json::from_str("\"driver_assigned\"").unwrap();
        assert_eq!(status, RideStatus::Assigned);
        assert_eq!(
            serde_json::to_string(&RideStatus::Assigned).unwrap(),
            "\"assigned\""
        );
    }
}
