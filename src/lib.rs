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

//! # Tuktuk Dispatch
//!
//! Ride dispatch and lifecycle engine for a cash-only group-taxi service.
//! Riders request rides, the request is broadcast to a drivers' channel, and
//! the first driver to accept wins through a single conditional write in the
//! ledger.
//!
//! ## Core Components
//!
//! - [`Dispatcher`]: Façade tying the components to a ledger and a notifier
//! - [`RideLifecycle`]: Ride creation and guarded state transitions
//! - [`DispatchMatcher`]: Atomic first-wins claim
//! - [`RatingAggregator`]: Running-mean driver ratings
//! - [`DriverPresence`]: Online status and location
//! - [`Ledger`]: Persistence port, with [`MemoryLedger`] in-process
//! - [`Notifier`]: Outbound messages, best effort
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use tuktuk_dispatch::{
//!     ChannelId, Coordinates, DispatchConfig, Dispatcher, DriverProfile, DropOff, MemoryLedger,
//!     RecordingNotifier, RideRequest, RideStatus, UserId,
//! };
//!
//! let dispatcher = Dispatcher::new(
//!     DispatchConfig::new(ChannelId(-100)),
//!     Arc::new(MemoryLedger::new()),
//!     Arc::new(RecordingNotifier::new()),
//! );
//!
//! let driver = dispatcher.register_driver(UserId(7), DriverProfile::default()).unwrap();
//! dispatcher.go_online(driver.id).unwrap();
//!
//! let ride = dispatcher
//!     .request_ride(RideRequest {
//!         rider: UserId(1),
//!         pickup: Some(Coordinates::new(-1.2833, 36.8167).unwrap()),
//!         drop: DropOff::Unspecified,
//!         group_size: 2,
//!         idempotency_key: None,
//!     })
//!     .unwrap();
//!
//! let ride = dispatcher.accept_ride(ride.id, UserId(7)).unwrap();
//! assert_eq!(ride.status, RideStatus::Assigned);
//! assert!(dispatcher.accept_ride(ride.id, UserId(7)).is_err());
//! ```
//!
//! ## Thread Safety
//!
//! All components are `Send + Sync` and hold no state between calls. Claim,
//! cancel, completion and rating updates are each one atomic ledger operation.

mod base;
pub mod config;
pub mod driver;
mod engine;
pub mod error;
pub mod geo;
pub mod ledger;
mod lifecycle;
mod matcher;
pub mod memory;
pub mod notify;
mod presence;
pub mod rating;
mod rating_log;
pub mod ride;

pub use base::{ChannelId, Coordinates, DriverId, RatingId, RideId, UserId};
pub use config::DispatchConfig;
pub use driver::{Driver, DriverProfile, DriverStatus};
pub use engine::{Dispatcher, HistoryPage, OPEN_RIDES_LIMIT};
pub use error::{DispatchError, NotifyError, ValidationError};
pub use geo::{FareSchedule, TripEstimate, distance_km, estimate_fare, estimate_travel_minutes};
pub use ledger::{EmergencyContact, Ledger, RecordedRating, RideInsert};
pub use lifecycle::{Actor, Quote, RideCreation, RideLifecycle, RideRequest};
pub use matcher::DispatchMatcher;
pub use memory::MemoryLedger;
pub use notify::{LogNotifier, Notification, Notifier, OutboxNotifier, Recipient, RecordingNotifier};
pub use presence::DriverPresence;
pub use rating::{Rating, RatingAggregator, RatingSummary, Score};
pub use rating_log::RatingLog;
pub use ride::{CancelOutcome, CancelledBy, DropOff, NewRide, Ride, RideAction, RideStatus};
