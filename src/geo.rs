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

//! Distance, travel-time and fare estimation.
//!
//! Pure functions, no state. Fares are currency-agnostic and rounded to
//! [`FARE_PRECISION`] decimal places with banker's rounding.

use crate::base::Coordinates;
use crate::ride::DropOff;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Mean Earth radius in kilometres.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

pub const DEFAULT_AVG_SPEED_KMH: f64 = 30.0;

/// Decimal places kept on fares.
pub const FARE_PRECISION: u32 = 2;

/// Great-circle distance between two points (haversine).
pub fn distance_km(from: Coordinates, to: Coordinates) -> f64 {
    let (lat1, lon1) = (from.lat().to_radians(), from.lon().to_radians());
    let (lat2, lon2) = (to.lat().to_radians(), to.lon().to_radians());
    let sin_dlat = ((lat2 - lat1) * 0.5).sin();
    let sin_dlon = ((lon2 - lon1) * 0.5).sin();
    let h = sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlon * sin_dlon;
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_KM * c
}

/// Whole minutes to cover `distance_km` at `avg_speed_kmh`.
pub fn estimate_travel_minutes(distance_km: f64, avg_speed_kmh: f64) -> u32 {
    if !(avg_speed_kmh > 0.0) || !distance_km.is_finite() || distance_km <= 0.0 {
        return 0;
    }
    (distance_km / avg_speed_kmh * 60.0).round() as u32
}

/// Tariff used for fare estimates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct FareSchedule {
    pub base_fare: Decimal,
    pub per_km_rate: Decimal,
    pub per_minute_rate: Decimal,
    /// Fractional surcharge per passenger beyond the first.
    pub group_surcharge: Decimal,
}

impl Default for FareSchedule {
    fn default() -> Self {
        Self {
            base_fare: dec!(100),
            per_km_rate: dec!(50),
            per_minute_rate: dec!(2),
            group_surcharge: dec!(0.2),
        }
    }
}

impl FareSchedule {
    /// `(base + km * per_km + minutes * per_min) * (1 + (group - 1) * surcharge)`
    pub fn estimate(&self, distance_km: f64, minutes: u32, group_size: u32) -> Decimal {
        let distance = Decimal::from_f64(distance_km.max(0.0)).unwrap_or(Decimal::ZERO);
        let extra_passengers = Decimal::from(group_size.saturating_sub(1));
        let subtotal = self.base_fare
            + distance * self.per_km_rate
            + Decimal::from(minutes) * self.per_minute_rate;
        let multiplier = Decimal::ONE + extra_passengers * self.group_surcharge;
        (subtotal * multiplier).round_dp(FARE_PRECISION)
    }
}

/// Fare estimate with the default tariff.
pub fn estimate_fare(distance_km: f64, minutes: u32, group_size: u32) -> Decimal {
    FareSchedule::default().estimate(distance_km, minutes, group_size)
}

/// Distance, duration and price projected for one trip.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TripEstimate {
    pub distance_km: f64,
    pub trip_minutes: u32,
    pub fare: Decimal,
}

/// Projects a trip. Without a drop-off point, distance and duration are zero
/// and the fare covers only the base fare and group surcharge.
pub fn estimate_trip(
    pickup: Coordinates,
    drop: &DropOff,
    group_size: u32,
    schedule: &FareSchedule,
    avg_speed_kmh: f64,
) -> TripEstimate {
    let (distance_km, trip_minutes) = match drop.point() {
        Some(point) => {
            let km = distance_km(pickup, point);
            (km, estimate_travel_minutes(km, avg_speed_kmh))
        }
        None => (0.0, 0),
    };
    TripEstimate {
        distance_km,
        trip_minutes,
        fare: schedule.estimate(distance_km, trip_minutes, group_size),
    }
}
