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

use clap::Parser;
use csv::{ReaderBuilder, Trim, Writer};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tuktuk_dispatch::{
    Actor, ChannelId, Coordinates, DispatchConfig, DispatchError, Dispatcher, DriverId,
    DriverProfile, DropOff, LogNotifier, MemoryLedger, Ride, RideId, RideRequest, RideStatus,
    UserId,
};

/// Tuktuk Dispatch - Replay ride events
///
/// Reads driver and ride events from a CSV file, runs them through the
/// dispatch engine over an in-memory ledger, and writes the final ride states
/// to stdout.
#[derive(Parser, Debug)]
#[command(name = "tuktuk-dispatch")]
#[command(about = "Replays ride dispatch events from a CSV file", long_about = None)]
struct Args {
    /// Path to CSV file with events
    ///
    /// Expected format: event,user,ride,lat,lon,drop_lat,drop_lon,group,amount,score
    /// Example: cargo run -- events.csv > rides.csv
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Chat id of the drivers' dispatch channel
    #[arg(long, env = "DISPATCH_CHANNEL", default_value_t = 0, allow_hyphen_values = true)]
    dispatch_channel: i64,

    /// Average speed used for trip and pickup estimates
    #[arg(long, env = "AVG_SPEED_KMH", default_value_t = tuktuk_dispatch::geo::DEFAULT_AVG_SPEED_KMH)]
    avg_speed_kmh: f64,

    /// Let offline drivers accept rides
    #[arg(long, env = "ALLOW_OFFLINE_ACCEPT")]
    allow_offline_accept: bool,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, env = "LOG_LEVEL", default_value = "warn")]
    log_level: String,
}

impl Args {
    fn config(&self) -> DispatchConfig {
        DispatchConfig {
            avg_speed_kmh: self.avg_speed_kmh,
            require_online: !self.allow_offline_accept,
            ..DispatchConfig::new(ChannelId(self.dispatch_channel))
        }
    }
}

fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let file = match File::open(&args.input) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error opening file '{}': {}", args.input.display(), e);
            process::exit(1);
        }
    };

    let (dispatcher, ledger) = match replay_events(args.config(), BufReader::new(file)) {
        Ok(replayed) => replayed,
        Err(e) => {
            eprintln!("Error processing events: {}", e);
            process::exit(1);
        }
    };
    tracing::info!(
        rides = ledger.rides().len(),
        online = dispatcher.online_drivers().map(|d| d.len()).unwrap_or_default(),
        "replay finished"
    );

    if let Err(e) = write_rides(&ledger, std::io::stdout()) {
        eprintln!("Error writing output: {}", e);
        process::exit(1);
    }
}

/// Raw CSV record matching the input format.
///
/// Unused columns may be left empty.
#[derive(Debug, Deserialize)]
struct CsvRecord {
    event: String,
    user: i64,
    #[serde(deserialize_with = "csv::invalid_option")]
    ride: Option<u64>,
    #[serde(deserialize_with = "csv::invalid_option")]
    lat: Option<f64>,
    #[serde(deserialize_with = "csv::invalid_option")]
    lon: Option<f64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    drop_lat: Option<f64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    drop_lon: Option<f64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    group: Option<u32>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    amount: Option<Decimal>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    score: Option<u8>,
}

/// One replayable engine call.
#[derive(Debug, Clone, PartialEq)]
enum Event {
    Register { user: UserId },
    Online { user: UserId },
    Offline { user: UserId },
    Location { user: UserId, lat: f64, lon: f64 },
    Request { request: RideRequest },
    Accept { user: UserId, ride: RideId },
    Cancel { user: UserId, ride: RideId },
    Complete { ride: RideId },
    Fare { ride: RideId, amount: Decimal },
    Rate { user: UserId, ride: RideId, score: u8 },
}

impl CsvRecord {
    /// Converts CSV record to an [`Event`].
    ///
    /// Returns `None` for unknown events or missing required fields.
    fn into_event(self) -> Option<Event> {
        let user = UserId(self.user);
        let ride = self.ride.map(RideId);

        match self.event.to_lowercase().as_str() {
            "register" => Some(Event::Register { user }),
            "online" => Some(Event::Online { user }),
            "offline" => Some(Event::Offline { user }),
            "location" => Some(Event::Location {
                user,
                lat: self.lat?,
                lon: self.lon?,
            }),
            "request" => {
                let pickup = match (self.lat, self.lon) {
                    (Some(lat), Some(lon)) => Some(Coordinates::new(lat, lon).ok()?),
                    _ => None,
                };
                let drop = match (self.drop_lat, self.drop_lon) {
                    (Some(lat), Some(lon)) => DropOff::Point(Coordinates::new(lat, lon).ok()?),
                    _ => DropOff::Unspecified,
                };
                Some(Event::Request {
                    request: RideRequest {
                        rider: user,
                        pickup,
                        drop,
                        group_size: self.group.unwrap_or(1),
                        idempotency_key: None,
                    },
                })
            }
            "accept" => Some(Event::Accept { user, ride: ride? }),
            "cancel" => Some(Event::Cancel { user, ride: ride? }),
            "complete" => Some(Event::Complete { ride: ride? }),
            "fare" => Some(Event::Fare {
                ride: ride?,
                amount: self.amount?,
            }),
            "rate" => Some(Event::Rate {
                user,
                ride: ride?,
                score: self.score?,
            }),
            _ => None,
        }
    }
}

/// The rider cancels their own ride; anyone else cancels as a driver.
fn cancel_actor(dispatcher: &Dispatcher, ride: RideId, user: UserId) -> Result<Actor, DispatchError> {
    if dispatcher.ledger().get_ride(ride)?.rider == user {
        return Ok(Actor::Rider(user));
    }
    let driver = dispatcher.ledger().get_driver_by_external(user)?;
    Ok(Actor::Driver(driver.id))
}

fn driver_id(dispatcher: &Dispatcher, user: UserId) -> Result<DriverId, DispatchError> {
    Ok(dispatcher.ledger().get_driver_by_external(user)?.id)
}

fn apply(dispatcher: &Dispatcher, event: Event) -> Result<(), DispatchError> {
    match event {
        Event::Register { user } => {
            dispatcher.register_driver(user, DriverProfile::default())?;
        }
        Event::Online { user } => dispatcher.go_online(driver_id(dispatcher, user)?)?,
        Event::Offline { user } => dispatcher.go_offline(driver_id(dispatcher, user)?)?,
        Event::Location { user, lat, lon } => {
            dispatcher.update_driver_location(driver_id(dispatcher, user)?, lat, lon)?
        }
        Event::Request { request } => {
            dispatcher.request_ride(request)?;
        }
        Event::Accept { user, ride } => {
            dispatcher.accept_ride(ride, user)?;
        }
        Event::Cancel { user, ride } => {
            dispatcher.cancel_ride(ride, cancel_actor(dispatcher, ride, user)?)?;
        }
        Event::Complete { ride } => {
            dispatcher.complete_ride(ride)?;
        }
        Event::Fare { ride, amount } => {
            dispatcher.finalize_fare(ride, amount)?;
        }
        Event::Rate { user, ride, score } => {
            dispatcher.rate_ride(ride, user, score, None)?;
        }
    }
    Ok(())
}

/// Replays events from a CSV reader.
///
/// Streams the input row by row. Malformed rows and events the engine rejects
/// are logged and skipped.
///
/// # CSV Format
///
/// Columns: `event, user, ride, lat, lon, drop_lat, drop_lon, group, amount, score`
/// - `event`: register, online, offline, location, request, accept, cancel,
///   complete, fare, rate
/// - `user`: external id of the acting rider or driver
///
/// # Example
///
/// ```csv
/// event,user,ride,lat,lon,drop_lat,drop_lon,group,amount,score
/// register,7,,,,,,,,
/// online,7,,,,,,,,
/// request,1,,-1.2833,36.8167,-1.3000,36.8300,2,,
/// accept,7,1,,,,,,,
/// ```
///
/// # Errors
///
/// Returns a CSV error if the reader fails.
pub fn replay_events<R: Read>(
    config: DispatchConfig,
    reader: R,
) -> Result<(Dispatcher, Arc<MemoryLedger>), csv::Error> {
    let ledger = Arc::new(MemoryLedger::new());
    let dispatcher = Dispatcher::new(config, ledger.clone(), Arc::new(LogNotifier));

    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .has_headers(true)
        .from_reader(reader);

    for (line, result) in rdr.deserialize::<CsvRecord>().enumerate() {
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(line = line + 2, error = %e, "skipping malformed row");
                continue;
            }
        };
        let Some(event) = record.into_event() else {
            tracing::warn!(line = line + 2, "skipping invalid event");
            continue;
        };
        if let Err(e) = apply(&dispatcher, event) {
            tracing::warn!(line = line + 2, error = %e, "event rejected");
        }
    }

    Ok((dispatcher, ledger))
}

/// Output row for one ride.
#[derive(Debug, Serialize)]
struct RideRow {
    ride: RideId,
    rider: UserId,
    status: RideStatus,
    driver: Option<DriverId>,
    group: u32,
    fare_estimate: Decimal,
    final_fare: Option<Decimal>,
    eta_pickup: u32,
    eta_trip: u32,
}

impl From<&Ride> for RideRow {
    fn from(ride: &Ride) -> Self {
        Self {
            ride: ride.id,
            rider: ride.rider,
            status: ride.status,
            driver: ride.assigned_driver,
            group: ride.group_size,
            fare_estimate: ride.fare_estimate,
            final_fare: ride.final_fare,
            eta_pickup: ride.eta_pickup_minutes,
            eta_trip: ride.eta_trip_minutes,
        }
    }
}

/// Writes ride states as CSV, ordered by ride id.
///
/// # CSV Format
///
/// Columns: `ride, rider, status, driver, group, fare_estimate, final_fare, eta_pickup, eta_trip`
///
/// # Errors
///
/// Returns a CSV error if writing fails.
pub fn write_rides<W: Write>(ledger: &MemoryLedger, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);
    for ride in ledger.rides() {
        wtr.serialize(RideRow::from(&ride))?;
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::io::Cursor;
    use tuktuk_dispatch::Ledger;

    const HEADER: &str = "event,user,ride,lat,lon,drop_lat,drop_lon,group,amount,score\n";

    fn replay(body: &str) -> Arc<MemoryLedger> {
        let csv = format!("{HEADER}{body}");
        let (_, ledger) = replay_events(DispatchConfig::default(), Cursor::new(csv)).unwrap();
        ledger
    }

    #[test]
    fn parse_request() {
        let ledger = replay("request,1,,-1.2833,36.8167,,,3,,\n");
        let rides = ledger.rides();
        assert_eq!(rides.len(), 1);
        assert_eq!(rides[0].group_size, 3);
        assert_eq!(rides[0].status, RideStatus::Searching);
        assert_eq!(rides[0].fare_estimate, dec!(140.00));
    }

    #[test]
    fn full_trip() {
        let ledger = replay(
            "register,7,,,,,,,,\n\
             online,7,,,,,,,,\n\
             request,1,,-1.2833,36.8167,-1.3000,36.8300,1,,\n\
             accept,7,1,,,,,,,\n\
             complete,0,1,,,,,,,\n\
             fare,0,1,,,,,,300,\n\
             rate,1,1,,,,,,,4\n",
        );
        let ride = &ledger.rides()[0];
        assert_eq!(ride.status, RideStatus::Completed);
        assert_eq!(ride.final_fare, Some(dec!(300)));
        assert_eq!(ride.eta_trip_minutes, 5);
        let driver = ledger.get_driver_by_external(UserId(7)).unwrap();
        assert_eq!(driver.rating.average, dec!(4));
    }

    #[test]
    fn second_accept_is_rejected() {
        let ledger = replay(
            "register,7,,,,,,,,\n\
             register,8,,,,,,,,\n\
             online,7,,,,,,,,\n\
             online,8,,,,,,,,\n\
             request,1,,0.0,0.0,,,1,,\n\
             accept,7,1,,,,,,,\n\
             accept,8,1,,,,,,,\n",
        );
        let driver = ledger.get_driver_by_external(UserId(7)).unwrap();
        assert_eq!(ledger.rides()[0].assigned_driver, Some(driver.id));
    }

    #[test]
    fn rider_cancel() {
        let ledger = replay(
            "request,1,,0.0,0.0,,,1,,\n\
             cancel,1,1,,,,,,,\n\
             cancel,2,1,,,,,,,\n",
        );
        let ride = &ledger.rides()[0];
        assert_eq!(ride.status, RideStatus::Cancelled);
        assert_eq!(ride.cancelled_by, Some(tuktuk_dispatch::CancelledBy::Rider));
    }

    #[test]
    fn skip_malformed_rows() {
        let ledger = replay(
            "request,1,,0.0,0.0,,,1,,\n\
             teleport,1,1,,,,,,,\n\
             request,abc,,0.0,0.0,,,1,,\n\
             request,2,,95.0,0.0,,,1,,\n\
             request,3,,0.0,0.0,,,1,,\n",
        );
        assert_eq!(ledger.rides().len(), 2);
    }

    #[test]
    fn write_rides_to_csv() {
        let ledger = replay("request,1,,0.0,0.0,,,2,,\n");
        let mut output = Vec::new();
        write_rides(&ledger, &mut output).unwrap();
        let output = String::from_utf8(output).unwrap();
        assert!(output.starts_with(
            "ride,rider,status,driver,group,fare_estimate,final_fare,eta_pickup,eta_trip\n"
        ));
        assert!(output.contains("1,1,searching,,2,120"));
        assert!(output.trim_end().ends_with(",,5,0"));
    }
}
