//! Synthetic presence generator for exercising dashboards against an
//! otherwise empty database. Opt-in via `FAKE_DATA_ENABLED`.
//!
//! Everything flows through the regular upsert path so generated rows
//! obey the same invariants as real traffic (one row per device,
//! sanitized coordinates, gated messages).

use chrono::{DateTime, Duration, Timelike, Utc};
use diesel::PgConnection;
use log::info;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::db::models::PresenceStatus;
use crate::error::StoreError;
use crate::services::presence::UpsertRequest;
use crate::services::{entitlements, presence};

const DEVICE_COUNT: usize = 250;
const PREMIUM_RATE: f64 = 0.15;
const COORDS_RATE: f64 = 0.85;
/// Generated signals are spread over this many minutes before "now" so
/// windowed queries have both fresh and stale rows to chew on.
const SPREAD_MINUTES: i64 = 180;

struct City {
    region: &'static str,
    name: &'static str,
    lat: f64,
    lng: f64,
}

const CITIES: [City; 8] = [
    City { region: "kanto", name: "Tokyo", lat: 35.681, lng: 139.767 },
    City { region: "kanto", name: "Yokohama", lat: 35.444, lng: 139.638 },
    City { region: "kansai", name: "Osaka", lat: 34.694, lng: 135.502 },
    City { region: "kansai", name: "Kyoto", lat: 35.012, lng: 135.768 },
    City { region: "tohoku", name: "Sendai", lat: 38.268, lng: 140.870 },
    City { region: "chubu", name: "Nagoya", lat: 35.181, lng: 136.906 },
    City { region: "kyushu", name: "Fukuoka", lat: 33.590, lng: 130.402 },
    City { region: "hokkaido", name: "Sapporo", lat: 43.062, lng: 141.354 },
];

const MESSAGES: [&str; 8] = [
    "still up",
    "can't sleep either",
    "night shift again",
    "one more episode",
    "deadline at 9am",
    "jet lag is real",
    "baby finally asleep",
    "anyone else awake?",
];

pub fn run(conn: &mut PgConnection, message_max_chars: usize) -> Result<(), StoreError> {
    let now = Utc::now();
    let mut rng = SmallRng::seed_from_u64(0x0023_5900_CAFE_F00Du64);
    let mut premium_count = 0usize;

    info!("Fake data: seeding {} synthetic device(s)", DEVICE_COUNT);

    for index in 0..DEVICE_COUNT {
        let device_id = format!("fake-device-{:04}", index);

        let premium = rng.random_bool(PREMIUM_RATE);
        if premium {
            entitlements::set_premium(conn, &device_id, true, now)?;
            premium_count += 1;
        }

        let city = &CITIES[rng.random_range(0..CITIES.len())];
        let (latitude, longitude) = if rng.random_bool(COORDS_RATE) {
            (
                Some(city.lat + rng.random_range(-0.15..=0.15)),
                Some(city.lng + rng.random_range(-0.15..=0.15)),
            )
        } else {
            (None, None)
        };

        let ts = now - Duration::minutes(rng.random_range(0..SPREAD_MINUTES));
        let status = pick_status(ts, &mut rng);
        let message = if premium && rng.random_bool(0.6) {
            Some(MESSAGES[rng.random_range(0..MESSAGES.len())].to_string())
        } else {
            None
        };

        let request = UpsertRequest {
            device_id,
            status: status.as_str().to_string(),
            region_code: Some(city.region.to_string()),
            city_name: Some(city.name.to_string()),
            latitude,
            longitude,
            message,
        };
        presence::upsert(conn, &request, message_max_chars, ts)?;
    }

    info!(
        "Fake data: seeded {} device(s) ({} premium) across {} cities",
        DEVICE_COUNT,
        premium_count,
        CITIES.len()
    );
    Ok(())
}

fn pick_status(ts: DateTime<Utc>, rng: &mut SmallRng) -> PresenceStatus {
    let hour = ts.hour();
    let night = !(6..22).contains(&hour);
    let roll: f64 = rng.random_range(0.0..1.0);
    if night {
        match roll {
            r if r < 0.45 => PresenceStatus::CantSleep,
            r if r < 0.75 => PresenceStatus::Awake,
            r if r < 0.90 => PresenceStatus::Working,
            _ => PresenceStatus::Free,
        }
    } else {
        match roll {
            r if r < 0.40 => PresenceStatus::Working,
            r if r < 0.75 => PresenceStatus::Free,
            r if r < 0.95 => PresenceStatus::Awake,
            _ => PresenceStatus::CantSleep,
        }
    }
}
