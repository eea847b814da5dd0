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

//! Error types for dispatch operations.

use crate::base::RideId;
use crate::ride::{RideAction, RideStatus};
use thiserror::Error;

/// Malformed input rejected before any state is touched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Ride request has no pickup location
    #[error("pickup location is required")]
    MissingPickup,

    /// Latitude/longitude out of range or not a number
    #[error("coordinates out of range")]
    InvalidCoordinates,

    /// Group size below one passenger
    #[error("group size must be at least 1 (got {0})")]
    InvalidGroupSize(u32),

    /// Rating score outside 1..=5
    #[error("rating score must be between 1 and 5 (got {0})")]
    InvalidScore(u8),

    /// Negative fare amount
    #[error("fare must not be negative")]
    InvalidFare,

    /// Caller is neither the rider nor the assigned driver of the ride
    #[error("not a participant of this ride")]
    NotRideParticipant,

    /// Driver must be online to accept rides
    #[error("driver is offline")]
    DriverOffline,

    /// Rider already rated this ride
    #[error("ride already rated")]
    AlreadyRated,

    /// Required free-text field is empty
    #[error("{0} must not be empty")]
    EmptyField(&'static str),

    /// Dispatch channel setting is absent or not a chat id
    #[error("dispatch channel is not configured")]
    DispatchChannelUnset,
}

/// Dispatch engine errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("invalid request: {0}")]
    Validation(#[from] ValidationError),

    #[error("ride {0} not found")]
    RideNotFound(RideId),

    #[error("driver not found")]
    DriverNotFound,

    /// Guard violation in the ride state machine.
    ///
    /// Presented to users as "action no longer possible"; never retried.
    #[error("action no longer possible: cannot {action} ride {ride} while {from}")]
    InvalidTransition {
        ride: RideId,
        from: RideStatus,
        action: RideAction,
    },

    /// Another driver won the claim.
    #[error("ride {0} already taken")]
    Conflict(RideId),

    /// Ledger unavailable or timed out.
    #[error("ledger unavailable: {0}")]
    Persistence(String),
}

impl DispatchError {
    /// Only ledger outages may be retried by the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DispatchError::Persistence(_))
    }
}

/// Failure delivering an outbound notification.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    #[error("recipient {0} unreachable")]
    Unreachable(String),

    #[error("transport failure: {0}")]
    Transport(String),
}
