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

//! Concurrency tests for the claim path, run under parking_lot's deadlock
//! detector.
//!
//! Many drivers race for the same rides from plain threads, a rayon pool and
//! tokio blocking tasks. Exactly one claim per ride may win, and a cancel that
//! races the claims must leave the ride either cancelled and unassigned or
//! assigned to the single winner, never both.

use parking_lot::deadlock;
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;
use tuktuk_dispatch::{
    Actor, ChannelId, Coordinates, DispatchConfig, DispatchError, Dispatcher, DriverId,
    DriverProfile, DropOff, Ledger, MemoryLedger, Notification, RecordingNotifier, RideId, RideRequest,
    RideStatus, UserId,
};

// === Deadlock Detection Infrastructure ===

/// Starts a background thread that checks for deadlocks.
/// Returns a handle to stop the detector.
fn start_deadlock_detector() -> Arc<AtomicBool> {
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = running.clone();

    thread::spawn(move || {
        while running_clone.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(100));
            let deadlocks = deadlock::check_deadlock();
            if !deadlocks.is_empty() {
                eprintln!("\n=== DEADLOCK DETECTED ===");
                for (i, threads) in deadlocks.iter().enumerate() {
                    eprintln!("\nDeadlock #{}", i + 1);
                    for t in threads {
                        eprintln!("Thread ID: {:?}", t.thread_id());
                        eprintln!("Backtrace:\n{:#?}", t.backtrace());
                    }
                }
                panic!("Deadlock detected! See output above for details.");
            }
        }
    });

    running
}

/// Stops the deadlock detector.
fn stop_deadlock_detector(running: Arc<AtomicBool>) {
    running.store(false, Ordering::SeqCst);
    thread::sleep(Duration::from_millis(150));
}

// === Fixtures ===

struct Fleet {
    dispatcher: Arc<Dispatcher>,
    ledger: Arc<MemoryLedger>,
    notifier: Arc<RecordingNotifier>,
    /// External ids of registered, online drivers.
    drivers: Vec<UserId>,
}

/// Driver external ids start at 1000 so they never collide with riders.
fn fleet(num_drivers: usize) -> Fleet {
    let ledger = Arc::new(MemoryLedger::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let dispatcher = Arc::new(Dispatcher::new(
        DispatchConfig::new(ChannelId(-100)),
        ledger.clone(),
        notifier.clone(),
    ));
    let drivers = (0..num_drivers)
        .map(|i| {
            let external = UserId(1000 + i as i64);
            let driver = dispatcher
                .register_driver(external, DriverProfile::default())
                .unwrap();
            dispatcher.go_online(driver.id).unwrap();
            external
        })
        .collect();
    Fleet {
        dispatcher,
        ledger,
        notifier,
        drivers,
    }
}

fn request(dispatcher: &Dispatcher, rider: i64) -> RideId {
    dispatcher
        .request_ride(RideRequest {
            rider: UserId(rider),
            pickup: Some(Coordinates::new(-1.2833, 36.8167).unwrap()),
            drop: DropOff::Unspecified,
            group_size: 1,
            idempotency_key: None,
        })
        .unwrap()
        .id
}

fn tally(results: &[Result<(), DispatchError>]) -> (usize, usize) {
    let wins = results.iter().filter(|r| r.is_ok()).count();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(DispatchError::Conflict(_))))
        .count();
    (wins, conflicts)
}

// === Tests ===

/// Fifty drivers released by a barrier race for one ride.
#[test]
fn exactly_one_winner_threads() {
    let detector = start_deadlock_detector();
    let fleet = fleet(50);
    let ride = request(&fleet.dispatcher, 1);
    let barrier = Arc::new(Barrier::new(fleet.drivers.len()));

    let handles: Vec<_> = fleet
        .drivers
        .iter()
        .map(|&driver| {
            let dispatcher = fleet.dispatcher.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                dispatcher.accept_ride(ride, driver).map(|_| ())
            })
        })
        .collect();
    let results: Vec<_> = handles
        .into_iter()
        .map(|h| h.join().expect("Thread panicked"))
        .collect();

    stop_deadlock_detector(detector);

    assert_eq!(tally(&results), (1, 49));
    let stored = fleet.ledger.get_ride(ride).unwrap();
    assert_eq!(stored.status, RideStatus::Assigned);

    let accepted: Vec<_> = fleet
        .notifier
        .sent()
        .into_iter()
        .filter(|n| matches!(n, Notification::RideAccepted { .. }))
        .collect();
    assert_eq!(accepted.len(), 1, "only the winner is told they won");

    // A driver arriving after the race also loses.
    let late = UserId(9999);
    let late_id = fleet
        .dispatcher
        .register_driver(late, DriverProfile::default())
        .unwrap()
        .id;
    fleet.dispatcher.go_online(late_id).unwrap();
    assert_eq!(
        fleet.dispatcher.accept_ride(ride, late),
        Err(DispatchError::Conflict(ride))
    );
    assert_eq!(fleet.ledger.get_ride(ride).unwrap(), stored);
}

/// Every driver tries every ride; each ride ends with exactly one driver.
#[test]
fn one_winner_per_ride_rayon() {
    let detector = start_deadlock_detector();
    let fleet = fleet(16);
    let rides: Vec<RideId> = (0..64).map(|i| request(&fleet.dispatcher, i)).collect();
    let wins = AtomicUsize::new(0);

    rides.par_iter().for_each(|&ride| {
        fleet.drivers.par_iter().for_each(|&driver| {
            if fleet.dispatcher.accept_ride(ride, driver).is_ok() {
                wins.fetch_add(1, Ordering::SeqCst);
            }
        });
    });

    stop_deadlock_detector(detector);

    assert_eq!(wins.load(Ordering::SeqCst), rides.len());
    for ride in fleet.ledger.rides() {
        assert_eq!(ride.status, RideStatus::Assigned);
        assert!(ride.assigned_driver.is_some());
    }
    assert!(fleet.dispatcher.open_rides().unwrap().is_empty());
}

/// Claims issued from async request handlers through `spawn_blocking`.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn exactly_one_winner_tokio() {
    let fleet = fleet(32);
    let ride = request(&fleet.dispatcher, 1);

    let handles: Vec<_> = fleet
        .drivers
        .iter()
        .map(|&driver| {
            let dispatcher = fleet.dispatcher.clone();
            tokio::task::spawn_blocking(move || dispatcher.accept_ride(ride, driver).map(|_| ()))
        })
        .collect();
    let results: Vec<_> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.expect("task panicked"))
        .collect();

    assert_eq!(tally(&results), (1, 31));
}

/// A rider cancel racing many claims.
#[test]
fn cancel_races_claims() {
    let detector = start_deadlock_detector();

    for round in 0..50 {
        let fleet = fleet(8);
        let ride = request(&fleet.dispatcher, round);
        let barrier = Arc::new(Barrier::new(fleet.drivers.len() + 1));

        let mut handles: Vec<_> = fleet
            .drivers
            .iter()
            .map(|&driver| {
                let dispatcher = fleet.dispatcher.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    dispatcher.accept_ride(ride, driver).is_ok()
                })
            })
            .collect();
        let canceller = {
            let dispatcher = fleet.dispatcher.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                dispatcher
                    .cancel_ride(ride, Actor::Rider(UserId(round)))
                    .is_ok()
            })
        };

        let wins = handles
            .drain(..)
            .map(|h| h.join().expect("Thread panicked"))
            .filter(|won| *won)
            .count();
        assert!(canceller.join().expect("Thread panicked"));

        let stored = fleet.ledger.get_ride(ride).unwrap();
        assert_eq!(stored.status, RideStatus::Cancelled);
        assert_eq!(stored.assigned_driver, None);
        assert!(wins <= 1, "round {round}: {wins} winners");
    }

    stop_deadlock_detector(detector);
}

/// Presence, location and history reads interleaved with claims.
#[test]
fn no_deadlock_mixed_operations() {
    let detector = start_deadlock_detector();
    let fleet = fleet(10);
    let rides: Vec<RideId> = (0..40).map(|i| request(&fleet.dispatcher, i)).collect();
    let rides = Arc::new(rides);

    let handles: Vec<_> = fleet
        .drivers
        .iter()
        .enumerate()
        .map(|(i, &external)| {
            let dispatcher = fleet.dispatcher.clone();
            let ledger = fleet.ledger.clone();
            let rides = rides.clone();
            thread::spawn(move || {
                let id: DriverId = ledger.get_driver_by_external(external).unwrap().id;
                for (n, &ride) in rides.iter().enumerate() {
                    match (n + i) % 4 {
                        0 => {
                            let _ = dispatcher.accept_ride(ride, external);
                        }
                        1 => dispatcher
                            .update_driver_location(id, -1.28 + n as f64 * 0.001, 36.81)
                            .unwrap(),
                        2 => {
                            let _ = dispatcher.driver_history(id, 1).unwrap();
                            let _ = dispatcher.open_rides().unwrap();
                        }
                        _ => {
                            let _ = dispatcher.online_drivers().unwrap();
                        }
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    stop_deadlock_detector(detector);

    for ride in fleet.ledger.rides() {
        match ride.status {
            RideStatus::Searching => assert_eq!(ride.assigned_driver, None),
            RideStatus::Assigned => assert!(ride.assigned_driver.is_some()),
            other => panic!("unexpected status {other}"),
        }
    }
}

/// Concurrent ratings from different rides fold into one consistent count.
#[test]
fn concurrent_ratings_fold_atomically() {
    let detector = start_deadlock_detector();
    let fleet = fleet(1);
    let driver = fleet.drivers[0];

    let rides: Vec<(RideId, UserId)> = (0..40)
        .map(|rider| {
            let ride = request(&fleet.dispatcher, rider);
            fleet.dispatcher.accept_ride(ride, driver).unwrap();
            fleet.dispatcher.complete_ride(ride).unwrap();
            (ride, UserId(rider))
        })
        .collect();

    rides.par_iter().for_each(|&(ride, rider)| {
        fleet.dispatcher.rate_ride(ride, rider, 4, None).unwrap();
        // Second submission for the same ride always loses.
        assert!(fleet.dispatcher.rate_ride(ride, rider, 1, None).is_err());
    });

    stop_deadlock_detector(detector);

    let profile = fleet.ledger.get_driver_by_external(driver).unwrap();
    assert_eq!(profile.rating.count, 40);
    assert_eq!(profile.rating.average, rust_decimal_macros::dec!(4));
}

/// Duplicate submissions for one ride race; one rating lands and is folded once.
#[test]
fn duplicate_ratings_race_counts_once() {
    let detector = start_deadlock_detector();
    let fleet = fleet(1);
    let driver = fleet.drivers[0];
    let rider = 1;
    let ride = request(&fleet.dispatcher, rider);
    fleet.dispatcher.accept_ride(ride, driver).unwrap();
    fleet.dispatcher.complete_ride(ride).unwrap();

    let results: Vec<_> = (0..16u8)
        .into_par_iter()
        .map(|i| fleet.dispatcher.rate_ride(ride, UserId(rider), 1 + i % 5, None))
        .collect();

    stop_deadlock_detector(detector);

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    let profile = fleet.ledger.get_driver_by_external(driver).unwrap();
    let stored = fleet.ledger.ratings_for_driver(profile.id).unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(profile.rating.count, 1);
    assert_eq!(
        profile.rating.average,
        rust_decimal::Decimal::from(stored[0].score.value())
    );
}
