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

//! Outbound notifications.
//!
//! The engine hands events to a [`Notifier`] after the corresponding ledger
//! write has committed. Delivery is best effort: failures are logged and never
//! undo the write that triggered them.

use crate::base::{ChannelId, DriverId, RideId, UserId};
use crate::driver::Driver;
use crate::error::NotifyError;
use crate::rating::Score;
use crate::ride::{CancelledBy, Ride};
use crossbeam::channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;

/// Where a notification is delivered.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Recipient {
    User(UserId),
    Channel(ChannelId),
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recipient::User(id) => write!(f, "user:{id}"),
            Recipient::Channel(id) => write!(f, "channel:{id}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    /// New ride posted to drivers.
    RideBroadcast { channel: ChannelId, ride: Ride },
    /// Ride no longer available to other drivers.
    RideTaken {
        channel: ChannelId,
        ride: RideId,
        driver: DriverId,
    },
    /// Tells the rider who is coming.
    DriverAssigned {
        rider: UserId,
        ride: RideId,
        driver: Driver,
    },
    /// Confirms the win to the driver, with pickup details.
    RideAccepted { driver: UserId, ride: Ride },
    RideCancelled {
        recipient: Recipient,
        ride: RideId,
        by: CancelledBy,
    },
    /// Asks the rider to rate the trip.
    TripCompleted {
        rider: UserId,
        ride: RideId,
        driver: DriverId,
    },
    RatingReceived {
        driver: UserId,
        ride: RideId,
        score: Score,
        average: Decimal,
    },
}

impl Notification {
    pub fn recipient(&self) -> Recipient {
        match self {
            Notification::RideBroadcast { channel, .. }
            | Notification::RideTaken { channel, .. } => Recipient::Channel(*channel),
            Notification::DriverAssigned { rider, .. }
            | Notification::TripCompleted { rider, .. } => Recipient::User(*rider),
            Notification::RideAccepted { driver, .. }
            | Notification::RatingReceived { driver, .. } => Recipient::User(*driver),
            Notification::RideCancelled { recipient, .. } => *recipient,
        }
    }

    pub fn ride_id(&self) -> RideId {
        match self {
            Notification::RideBroadcast { ride, .. } | Notification::RideAccepted { ride, .. } => {
                ride.id
            }
            Notification::RideTaken { ride, .. }
            | Notification::DriverAssigned { ride, .. }
            | Notification::RideCancelled { ride, .. }
            | Notification::TripCompleted { ride, .. }
            | Notification::RatingReceived { ride, .. } => *ride,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Notification::RideBroadcast { .. } => "ride_broadcast",
            Notification::RideTaken { .. } => "ride_taken",
            Notification::DriverAssigned { .. } => "driver_assigned",
            Notification::RideAccepted { .. } => "ride_accepted",
            Notification::RideCancelled { .. } => "ride_cancelled",
            Notification::TripCompleted { .. } => "trip_completed",
            Notification::RatingReceived { .. } => "rating_received",
        }
    }
}

/// Messaging collaborator.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Writes every notification as a structured log line.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        tracing::info!(
            kind = notification.kind(),
            recipient = %notification.recipient(),
            ride = %notification.ride_id(),
            "notification"
        );
        Ok(())
    }
}

/// Keeps every notification in memory.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().clone()
    }

    /// Removes and returns everything recorded so far.
    pub fn drain(&self) -> Vec<Notification> {
        std::mem::take(&mut *self.sent.lock())
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.sent.lock().push(notification.clone());
        Ok(())
    }
}

/// Queues notifications for a delivery worker on the other end of a channel.
///
/// Sending never blocks the request handler.
#[derive(Debug, Clone)]
pub struct OutboxNotifier {
    tx: Sender<Notification>,
}

impl OutboxNotifier {
    /// Creates the notifier and the receiving end for the delivery worker.
    pub fn channel() -> (Self, Receiver<Notification>) {
        let (tx, rx) = unbounded();
        (Self { tx }, rx)
    }
}

impl Notifier for OutboxNotifier {
    fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.tx
            .send(notification.clone())
            .map_err(|_| NotifyError::Transport("outbox closed".to_owned()))
    }
}
