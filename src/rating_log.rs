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

//! Thread-safe rating log with duplicate detection.
//!
//! Keeps at most one rating per ride and rider.

use crate::base::{DriverId, RatingId, RideId, UserId};
use crate::error::{DispatchError, ValidationError};
use crate::rating::{NewRating, Rating};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Append-only store of immutable ratings.
///
/// The [`DashMap`] entry API makes the duplicate check and the insert one
/// atomic step, so two concurrent submissions for the same ride cannot both
/// land.
#[derive(Debug)]
pub struct RatingLog {
    /// Ratings keyed by the ride and the rider who submitted them.
    ratings: DashMap<(RideId, UserId), Arc<Rating>>,

    next_id: AtomicU64,
}

impl RatingLog {
    pub fn new() -> Self {
        Self {
            ratings: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Appends a rating.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::AlreadyRated`] if this rider already rated
    /// this ride.
    pub fn push(&self, rating: NewRating) -> Result<RatingId, DispatchError> {
        self.push_with(rating, |_| Ok(())).map(|(id, ())| id)
    }

    /// Appends a rating after `apply` succeeds.
    ///
    /// `apply` runs while the `(ride, rider)` slot is held, so a concurrent
    /// duplicate waits and then sees `AlreadyRated`. If `apply` fails nothing
    /// is stored and the rider may submit again.
    ///
    /// # Errors
    ///
    /// [`ValidationError::AlreadyRated`], or whatever `apply` returns.
    pub fn push_with<T>(
        &self,
        rating: NewRating,
        apply: impl FnOnce(&NewRating) -> Result<T, DispatchError>,
    ) -> Result<(RatingId, T), DispatchError> {
        match self.ratings.entry((rating.ride, rating.rider)) {
            Entry::Occupied(_) => Err(ValidationError::AlreadyRated.into()),
            Entry::Vacant(entry) => {
                let applied = apply(&rating)?;
                let id = RatingId(self.next_id.fetch_add(1, Ordering::Relaxed));
                entry.insert(Arc::new(Rating {
                    id,
                    ride: rating.ride,
                    driver: rating.driver,
                    rider: rating.rider,
                    score: rating.score,
                    comment: rating.comment,
                    created_at: rating.created_at,
                }));
                Ok((id, applied))
            }
        }
    }

    /// Ratings received by `driver`, in submission order.
    pub fn for_driver(&self, driver: DriverId) -> Vec<Rating> {
        let mut ratings: Vec<Rating> = self
            .ratings
            .iter()
            .filter(|entry| entry.driver == driver)
            .map(|entry| Rating::clone(entry.value()))
            .collect();
        ratings.sort_by_key(|rating| rating.id);
        ratings
    }

    pub fn len(&self) -> usize {
        self.ratings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ratings.is_empty()
    }
}

impl Default for RatingLog {
    fn default() -> Self {
        Self::new()
    }
}
