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

//! Dispatch engine façade.
//!
//! The [`Dispatcher`] wires the ride lifecycle, claim matcher, rating
//! aggregator and driver presence to one [`Ledger`] and one [`Notifier`].
//! Every public operation writes to the ledger first and only then notifies.
//!
//! # Operations
//!
//! - **Request**: validate, estimate fare and ETAs, create, broadcast.
//! - **Accept**: claim by conditional write; the loser gets [`DispatchError::Conflict`].
//! - **Cancel**: rider, assigned driver or admin; idempotent.
//! - **Complete / finalize fare / rate**: post-trip bookkeeping.
//!
//! # Thread Safety
//!
//! The dispatcher keeps no state of its own between calls and holds no lock
//! across ledger calls. Any number of threads or processes may share one
//! ledger.

use crate::base::{Coordinates, DriverId, RideId, UserId};
use crate::config::DispatchConfig;
use crate::driver::{Driver, DriverProfile};
use crate::error::{DispatchError, ValidationError};
use crate::geo::estimate_trip;
use crate::ledger::{EmergencyContact, Ledger};
use crate::lifecycle::{Actor, Quote, RideLifecycle, RideRequest};
use crate::matcher::DispatchMatcher;
use crate::notify::{Notification, Notifier, Recipient};
use crate::presence::DriverPresence;
use crate::rating::{NewRating, RatingAggregator, Score};
use crate::ride::{CancelOutcome, Ride, RideAction, RideStatus};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;

/// Upper bound on rides returned by [`Dispatcher::open_rides`].
pub const OPEN_RIDES_LIMIT: usize = 50;

/// One page of ride history, newest first.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HistoryPage {
    pub rides: Vec<Ride>,
    /// 1-based.
    pub page: usize,
    pub total_pages: usize,
    pub total: usize,
}

impl HistoryPage {
    fn new(rides: Vec<Ride>, page: usize, total: usize, page_size: usize) -> Self {
        Self {
            rides,
            page,
            total_pages: total.div_ceil(page_size).max(1),
            total,
        }
    }
}

/// Ride-hailing dispatch engine.
///
/// # Invariants
///
/// - At most one driver wins any ride.
/// - A ride that has left `searching` never returns to it.
/// - Notifications are never sent for writes that failed.
pub struct Dispatcher {
    config: DispatchConfig,
    ledger: Arc<dyn Ledger>,
    notifier: Arc<dyn Notifier>,
    lifecycle: RideLifecycle,
    matcher: DispatchMatcher,
    ratings: RatingAggregator,
    presence: DriverPresence,
}

impl Dispatcher {
    pub fn new(config: DispatchConfig, ledger: Arc<dyn Ledger>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            lifecycle: RideLifecycle::new(ledger.clone()),
            matcher: DispatchMatcher::new(ledger.clone(), config.require_online),
            ratings: RatingAggregator::new(ledger.clone()),
            presence: DriverPresence::new(ledger.clone()),
            config,
            ledger,
            notifier,
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Arc<dyn Ledger> {
        &self.ledger
    }

    /// Registers a driver, or refreshes the profile of a known one.
    pub fn register_driver(
        &self,
        external: UserId,
        profile: DriverProfile,
    ) -> Result<Driver, DispatchError> {
        let id = self.ledger.upsert_driver(external, profile, now())?;
        tracing::info!(driver = %id, %external, "driver registered");
        self.ledger.get_driver(id)
    }

    pub fn go_online(&self, driver: DriverId) -> Result<(), DispatchError> {
        self.presence.set_online(driver)
    }

    pub fn go_offline(&self, driver: DriverId) -> Result<(), DispatchError> {
        self.presence.set_offline(driver)
    }

    pub fn update_driver_location(
        &self,
        driver: DriverId,
        lat: f64,
        lon: f64,
    ) -> Result<(), DispatchError> {
        self.presence.update_location(driver, lat, lon)
    }

    /// Creates a ride and broadcasts it to the dispatch channel.
    ///
    /// A request repeating an earlier idempotency key returns the first ride
    /// without broadcasting it again.
    ///
    /// # Errors
    ///
    /// - [`ValidationError::MissingPickup`] - No pickup location.
    /// - [`ValidationError::InvalidGroupSize`] - Group size below one.
    pub fn request_ride(&self, request: RideRequest) -> Result<Ride, DispatchError> {
        let (pickup, drop) = request.validate()?;
        let estimate = estimate_trip(
            pickup,
            &drop,
            request.group_size,
            &self.config.fare,
            self.config.avg_speed_kmh,
        );
        let quote = Quote {
            fare_estimate: estimate.fare,
            eta_pickup_minutes: self.pickup_eta(pickup)?,
            eta_trip_minutes: estimate.trip_minutes,
        };

        let created = self.lifecycle.create(request, quote, now())?;
        let ride = created.ride;
        if created.duplicate {
            tracing::debug!(ride = %ride.id, rider = %ride.rider, "duplicate ride request");
            return Ok(ride);
        }

        tracing::info!(
            ride = %ride.id,
            rider = %ride.rider,
            group = ride.group_size,
            fare = %ride.fare_estimate,
            distance_km = estimate.distance_km,
            "ride requested"
        );
        self.deliver(Notification::RideBroadcast {
            channel: self.config.dispatch_channel,
            ride: ride.clone(),
        });
        Ok(ride)
    }

    /// Driver `external` accepts a ride.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::Conflict`] - Another driver already holds the ride,
    ///   or the ride is no longer searching.
    /// - [`DispatchError::DriverNotFound`] - Caller is not a registered driver.
    /// - [`ValidationError::DriverOffline`] - Driver must go online first.
    pub fn accept_ride(&self, ride_id: RideId, external: UserId) -> Result<Ride, DispatchError> {
        let driver = self.ledger.get_driver_by_external(external)?;
        let Some(ride) = self.matcher.try_claim(ride_id, driver.id)? else {
            tracing::info!(ride = %ride_id, driver = %driver.id, "claim lost");
            return Err(DispatchError::Conflict(ride_id));
        };

        tracing::info!(ride = %ride.id, driver = %driver.id, "ride assigned");
        self.deliver(Notification::RideTaken {
            channel: self.config.dispatch_channel,
            ride: ride.id,
            driver: driver.id,
        });
        self.deliver(Notification::DriverAssigned {
            rider: ride.rider,
            ride: ride.id,
            driver: driver.clone(),
        });
        self.deliver(Notification::RideAccepted {
            driver: driver.external_id,
            ride: ride.clone(),
        });
        Ok(ride)
    }

    /// Cancels a ride and tells the other side.
    ///
    /// The counterpart is the assigned driver when the rider cancels, the rider
    /// when the driver cancels, and both for an admin. A ride that was still
    /// searching is withdrawn from the dispatch channel instead.
    pub fn cancel_ride(&self, ride_id: RideId, actor: Actor) -> Result<CancelOutcome, DispatchError> {
        let outcome = self.lifecycle.cancel(ride_id, actor, now())?;
        if outcome.already_cancelled {
            tracing::debug!(ride = %ride_id, "ride already cancelled");
            return Ok(outcome);
        }

        let ride = &outcome.ride;
        tracing::info!(ride = %ride.id, by = %actor.role(), "ride cancelled");
        let mut recipients = Vec::new();
        match outcome.released_driver {
            None => recipients.push(Recipient::Channel(self.config.dispatch_channel)),
            Some(driver) => {
                if !matches!(actor, Actor::Rider(_)) {
                    recipients.push(Recipient::User(ride.rider));
                }
                if !matches!(actor, Actor::Driver(_)) {
                    match self.ledger.get_driver(driver) {
                        Ok(driver) => recipients.push(Recipient::User(driver.external_id)),
                        Err(err) => {
                            tracing::warn!(ride = %ride.id, %driver, error = %err, "cannot reach released driver")
                        }
                    }
                }
            }
        }
        for recipient in recipients {
            self.deliver(Notification::RideCancelled {
                recipient,
                ride: ride.id,
                by: actor.role(),
            });
        }
        Ok(outcome)
    }

    /// Marks the trip done and asks the rider for a rating.
    pub fn complete_ride(&self, ride_id: RideId) -> Result<Ride, DispatchError> {
        let ride = self.lifecycle.complete(ride_id)?;
        tracing::info!(ride = %ride.id, "ride completed");
        if let Some(driver) = ride.assigned_driver {
            self.deliver(Notification::TripCompleted {
                rider: ride.rider,
                ride: ride.id,
                driver,
            });
        }
        Ok(ride)
    }

    pub fn finalize_fare(&self, ride_id: RideId, amount: Decimal) -> Result<Ride, DispatchError> {
        let ride = self.lifecycle.finalize_fare(ride_id, amount)?;
        tracing::info!(ride = %ride.id, fare = %amount, "fare finalized");
        Ok(ride)
    }

    /// Rider rates the driver of a completed ride. Returns the new average.
    ///
    /// # Errors
    ///
    /// - [`ValidationError::InvalidScore`] - Score outside 1..=5.
    /// - [`ValidationError::NotRideParticipant`] - Caller is not the ride's rider.
    /// - [`DispatchError::InvalidTransition`] - Ride is not completed.
    /// - [`ValidationError::AlreadyRated`] - Rider already rated this ride.
    pub fn rate_ride(
        &self,
        ride_id: RideId,
        rider: UserId,
        score: u8,
        comment: Option<String>,
    ) -> Result<Decimal, DispatchError> {
        let score = Score::new(score)?;
        let ride = self.ledger.get_ride(ride_id)?;
        if ride.rider != rider {
            return Err(ValidationError::NotRideParticipant.into());
        }
        let driver = match (ride.status, ride.assigned_driver) {
            (RideStatus::Completed, Some(driver)) => driver,
            _ => {
                return Err(DispatchError::InvalidTransition {
                    ride: ride.id,
                    from: ride.status,
                    action: RideAction::Rate,
                });
            }
        };

        let average = self
            .ratings
            .submit(NewRating {
                ride: ride.id,
                driver,
                rider,
                score,
                comment: comment.filter(|text| !text.trim().is_empty()),
                created_at: now(),
            })?
            .average;

        match self.ledger.get_driver(driver) {
            Ok(profile) => self.deliver(Notification::RatingReceived {
                driver: profile.external_id,
                ride: ride.id,
                score,
                average,
            }),
            Err(err) => tracing::warn!(ride = %ride.id, %driver, error = %err, "cannot reach rated driver"),
        }
        Ok(average)
    }

    /// Rides requested by `rider`, newest first. `page` is 1-based.
    pub fn rider_history(&self, rider: UserId, page: usize) -> Result<HistoryPage, DispatchError> {
        let (page, offset, size) = self.page_window(page);
        let (rides, total) = self.ledger.rides_by_rider(rider, size, offset)?;
        Ok(HistoryPage::new(rides, page, total, size))
    }

    /// Rides assigned to `driver`, newest first. `page` is 1-based.
    ///
    /// Rides the driver held when they were cancelled stay listed, with
    /// `assigned_driver` cleared and `released_driver` set.
    pub fn driver_history(&self, driver: DriverId, page: usize) -> Result<HistoryPage, DispatchError> {
        let (page, offset, size) = self.page_window(page);
        let (rides, total) = self.ledger.rides_by_driver(driver, size, offset)?;
        Ok(HistoryPage::new(rides, page, total, size))
    }

    /// Rides still waiting for a driver, oldest first.
    pub fn open_rides(&self) -> Result<Vec<Ride>, DispatchError> {
        self.ledger.searching_rides(OPEN_RIDES_LIMIT)
    }

    pub fn online_drivers(&self) -> Result<Vec<Driver>, DispatchError> {
        self.presence.online_drivers()
    }

    pub fn add_emergency_contact(
        &self,
        owner: UserId,
        name: &str,
        phone: &str,
    ) -> Result<EmergencyContact, DispatchError> {
        let contact = EmergencyContact::new(owner, name, phone, now())?;
        self.ledger.add_emergency_contact(contact.clone())?;
        Ok(contact)
    }

    pub fn emergency_contacts(&self, owner: UserId) -> Result<Vec<EmergencyContact>, DispatchError> {
        self.ledger.emergency_contacts(owner)
    }

    /// Checks that `requester` may share `ride_id` with `phone`.
    ///
    /// Only validates; delivery to the phone number happens outside the engine.
    pub fn share_trip(
        &self,
        ride_id: RideId,
        requester: UserId,
        phone: &str,
    ) -> Result<Ride, DispatchError> {
        if phone.trim().is_empty() {
            return Err(ValidationError::EmptyField("phone").into());
        }
        let ride = self.ledger.get_ride(ride_id)?;
        if ride.rider != requester {
            return Err(ValidationError::NotRideParticipant.into());
        }
        tracing::info!(ride = %ride.id, "trip share requested");
        Ok(ride)
    }

    fn pickup_eta(&self, pickup: Coordinates) -> Result<u32, DispatchError> {
        Ok(self
            .presence
            .nearest_pickup_eta(pickup, self.config.avg_speed_kmh)?
            .unwrap_or(self.config.default_pickup_eta_minutes))
    }

    /// Clamped page number, offset and page size.
    fn page_window(&self, page: usize) -> (usize, usize, usize) {
        let size = self.config.page_size();
        let page = page.max(1);
        (page, (page - 1) * size, size)
    }

    fn deliver(&self, notification: Notification) {
        if let Err(err) = self.notifier.notify(&notification) {
            tracing::warn!(
                kind = notification.kind(),
                recipient = %notification.recipient(),
                ride = %notification.ride_id(),
                error = %err,
                "notification failed"
            );
        }
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}
