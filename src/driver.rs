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

//! Driver records.

use crate::base::{Coordinates, DriverId, UserId};
use crate::rating::RatingSummary;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DriverStatus {
    #[default]
    Offline,
    Online,
}

impl fmt::Display for DriverStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverStatus::Offline => f.write_str("offline"),
            DriverStatus::Online => f.write_str("online"),
        }
    }
}

/// Registration details. `None` fields keep the stored value on upsert.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DriverProfile {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub reg_no: Option<String>,
}

/// Stored driver row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Driver {
    pub id: DriverId,
    pub external_id: UserId,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub reg_no: Option<String>,
    pub status: DriverStatus,
    pub location: Option<Coordinates>,
    pub rating: RatingSummary,
    pub created_at: i64,
}

impl Driver {
    /// New drivers start offline with the default rating.
    pub fn register(id: DriverId, external_id: UserId, profile: DriverProfile, at: i64) -> Self {
        Self {
            id,
            external_id,
            name: profile.name,
            phone: profile.phone,
            reg_no: profile.reg_no,
            status: DriverStatus::Offline,
            location: None,
            rating: RatingSummary::default(),
            created_at: at,
        }
    }

    /// Overwrites only the fields present in `profile`.
    pub fn merge_profile(&mut self, profile: DriverProfile) {
        if let Some(name) = profile.name {
            self.name = Some(name);
        }
        if let Some(phone) = profile.phone {
            self.phone = Some(phone);
        }
        if let Some(reg_no) = profile.reg_no {
            self.reg_no = Some(reg_no);
        }
    }

    pub fn is_online(&self) -> bool {
        self.status == DriverStatus::Online
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn registered_driver_defaults() {
        let driver = Driver::register(
            DriverId(1),
            UserId(555),
            DriverProfile {
                name: Some("Wanjiru".into()),
                ..Default::default()
            },
            0,
        );
        assert_eq!(driver.status, DriverStatus::Offline);
        assert_eq!(driver.location, None);
        assert_eq!(driver.rating.average, dec!(5.0));
        assert_eq!(driver.rating.count, 0);
        assert!(!driver.is_online());
    }

    #[test]
    fn merge_keeps_absent_fields() {
        let mut driver = Driver::register(
            DriverId(1),
            UserId(555),
            DriverProfile {
                name: Some("Otieno".into()),
                phone: Some("0711000000".into()),
                reg_no: Some("KBA 123A".into()),
            },
            0,
        );
        driver.merge_profile(DriverProfile {
            phone: Some("0722000000".into()),
            ..Default::default()
        });
        assert_eq!(driver.name.as_deref(), Some("Otieno"));
        assert_eq!(driver.phone.as_deref(), Some("0722000000"));
        assert_eq!(driver.reg_no.as_deref(), Some("KBA 123A"));
    }
}
