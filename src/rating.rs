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

//! Driver reputation.
//!
//! A driver's rating is a running mean, folded in one score at a time:
//! `new = (old * n + score) / (n + 1)`. The fold is applied by the ledger as a
//! single row update so concurrent ratings for one driver cannot lose writes.

use crate::base::{DriverId, RatingId, RideId, UserId};
use crate::error::{DispatchError, ValidationError};
use crate::ledger::Ledger;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Decimal places shown for averages.
pub const RATING_DISPLAY_PRECISION: u32 = 2;

/// A validated 1..=5 star score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Score(u8);

impl Score {
    pub fn new(value: u8) -> Result<Self, ValidationError> {
        if (1..=5).contains(&value) {
            Ok(Self(value))
        } else {
            Err(ValidationError::InvalidScore(value))
        }
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for Score {
    type Error = ValidationError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Score::new(value)
    }
}

impl From<Score> for u8 {
    fn from(score: Score) -> Self {
        score.0
    }
}

/// Running mean of all scores a driver has received.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RatingSummary {
    pub average: Decimal,
    pub count: u32,
}

impl Default for RatingSummary {
    /// Unrated drivers show five stars.
    fn default() -> Self {
        Self {
            average: dec!(5.0),
            count: 0,
        }
    }
}

impl RatingSummary {
    pub fn with_score(self, score: Score) -> Self {
        let count = Decimal::from(self.count);
        let average = (self.average * count + Decimal::from(score.value())) / (count + Decimal::ONE);
        Self {
            average,
            count: self.count + 1,
        }
    }

    pub fn display_average(&self) -> Decimal {
        self.average.round_dp(RATING_DISPLAY_PRECISION)
    }
}

/// Immutable rating record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Rating {
    pub id: RatingId,
    pub ride: RideId,
    pub driver: DriverId,
    pub rider: UserId,
    pub score: Score,
    pub comment: Option<String>,
    pub created_at: i64,
}

/// Rating as handed to the ledger for insertion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewRating {
    pub ride: RideId,
    pub driver: DriverId,
    pub rider: UserId,
    pub score: Score,
    pub comment: Option<String>,
    pub created_at: i64,
}

/// Folds scores into driver reputations.
#[derive(Clone)]
pub struct RatingAggregator {
    ledger: Arc<dyn Ledger>,
}

impl RatingAggregator {
    pub fn new(ledger: Arc<dyn Ledger>) -> Self {
        Self { ledger }
    }

    /// Applies one score and returns the driver's new average.
    ///
    /// # Errors
    ///
    /// - [`ValidationError::InvalidScore`] for scores outside 1..=5.
    /// - [`DispatchError::DriverNotFound`] for unknown drivers.
    pub fn record_rating(&self, driver: DriverId, score: u8) -> Result<Decimal, DispatchError> {
        let score = Score::new(score)?;
        let summary = self.ledger.update_driver_rating(driver, score)?;
        tracing::debug!(%driver, score = score.value(), average = %summary.average, count = summary.count, "driver rating updated");
        Ok(summary.average)
    }

    /// Stores a rider's rating and folds it into the driver's average in one
    /// ledger operation. Returns the driver's new summary.
    ///
    /// # Errors
    ///
    /// - [`ValidationError::AlreadyRated`] if the rider already rated the ride.
    /// - [`DispatchError::DriverNotFound`] for unknown drivers.
    pub fn submit(&self, rating: NewRating) -> Result<RatingSummary, DispatchError> {
        let (ride, driver, score) = (rating.ride, rating.driver, rating.score);
        let recorded = self.ledger.record_rating(rating)?;
        tracing::debug!(
            %ride,
            %driver,
            rating = %recorded.id,
            score = score.value(),
            average = %recorded.summary.average,
            count = recorded.summary.count,
            "rating recorded"
        );
        Ok(recorded.summary)
    }
}
