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

//! Engine configuration.
//!
//! Built once and injected into the [`Dispatcher`](crate::Dispatcher); the
//! engine never re-reads settings at runtime.

use crate::base::ChannelId;
use crate::error::{DispatchError, ValidationError};
use crate::geo::{DEFAULT_AVG_SPEED_KMH, FareSchedule};
use crate::ledger::Ledger;
use serde::{Deserialize, Serialize};

/// Settings key holding the dispatch channel id.
pub const DISPATCH_CHANNEL_SETTING: &str = "dispatch_chat_id";

pub const DEFAULT_PICKUP_ETA_MINUTES: u32 = 5;

/// Rides per ride-history page.
pub const DEFAULT_HISTORY_PAGE_SIZE: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DispatchConfig {
    /// Where new rides are broadcast.
    pub dispatch_channel: ChannelId,
    pub fare: FareSchedule,
    pub avg_speed_kmh: f64,
    /// Pickup ETA used when no online driver has shared a location.
    pub default_pickup_eta_minutes: u32,
    /// Only online drivers may claim rides.
    pub require_online: bool,
    pub history_page_size: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            dispatch_channel: ChannelId(0),
            fare: FareSchedule::default(),
            avg_speed_kmh: DEFAULT_AVG_SPEED_KMH,
            default_pickup_eta_minutes: DEFAULT_PICKUP_ETA_MINUTES,
            require_online: true,
            history_page_size: DEFAULT_HISTORY_PAGE_SIZE,
        }
    }
}

impl DispatchConfig {
    pub fn new(dispatch_channel: ChannelId) -> Self {
        Self {
            dispatch_channel,
            ..Self::default()
        }
    }

    /// Takes the dispatch channel from the ledger's settings.
    ///
    /// # Errors
    ///
    /// [`ValidationError::DispatchChannelUnset`] if the setting is missing or
    /// not a numeric chat id.
    pub fn with_channel_from(mut self, ledger: &dyn Ledger) -> Result<Self, DispatchError> {
        let raw = ledger
            .get_setting(DISPATCH_CHANNEL_SETTING)?
            .ok_or(ValidationError::DispatchChannelUnset)?;
        let channel = raw
            .trim()
            .parse::<i64>()
            .map_err(|_| ValidationError::DispatchChannelUnset)?;
        self.dispatch_channel = ChannelId(channel);
        Ok(self)
    }

    pub fn page_size(&self) -> usize {
        self.history_page_size.max(1)
    }
}
