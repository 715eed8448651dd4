//! Read-only aggregation over the presence store.
//!
//! Every query reads the store as of call time and never mutates state.
//! Simple grouped counts are pushed down to SQL; display-cell queries
//! fetch the coordinate-bearing rows and re-bucket them here, because
//! the cell size is a per-query parameter and cells are never stored.

use chrono::{DateTime, Duration, Utc};
use diesel::dsl::count_star;
use diesel::prelude::*;
use diesel::PgConnection;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::db::models::{PresenceRecord, PresenceStatus};
use crate::db::schema;
use crate::error::StoreError;
use crate::geo;
use crate::services::entitlements;

/// Default recency window for device-facing queries.
pub const DEFAULT_WINDOW_MINUTES: i64 = 30;
/// Default recency window for admin dashboard cell counts.
pub const ADMIN_WINDOW_MINUTES: i64 = 60;
/// Hard cap on individual-record listings.
pub const MAX_RECENT_LIMIT: i64 = 500;
/// Default number of messages returned per bucket lookup.
pub const DEFAULT_BUCKET_MESSAGE_LIMIT: i64 = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegionCount {
    pub region_code: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegionStatusCount {
    pub region_code: String,
    pub status: PresenceStatus,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CityCount {
    pub city_name: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CellCount {
    pub cell_lat: f64,
    pub cell_lng: f64,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CellStatusCount {
    pub cell_lat: f64,
    pub cell_lng: f64,
    pub counts: BTreeMap<PresenceStatus, i64>,
}

/// Message-blind projection of a record for the recent-devices listing.
/// Exposes whether a message exists, never its text.
#[derive(Debug, Clone, Serialize)]
pub struct RecordView {
    pub device_id: String,
    pub status: String,
    pub latitude: f64,
    pub longitude: f64,
    pub has_message: bool,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BucketMessage {
    pub device_id: String,
    pub status: String,
    pub message: String,
    pub updated_at: DateTime<Utc>,
}

/// Result of a same-bucket message lookup. Unentitled callers get an
/// empty list and no area code, not an error.
#[derive(Debug, Clone, Serialize)]
pub struct BucketMessages {
    pub is_premium: bool,
    pub area_code: Option<String>,
    pub messages: Vec<BucketMessage>,
}

/// Longest accepted recency window: one year. The store is a
/// short-horizon cache bounded by retention, so anything beyond this is
/// as malformed as a non-numeric value.
pub const MAX_WINDOW_MINUTES: i64 = 60 * 24 * 366;

/// Interpret a caller-supplied window parameter in minutes. Malformed,
/// non-positive, or absurdly large values fall back to the default
/// rather than erroring; an oversized numeric value must not be able to
/// overflow duration or timestamp arithmetic downstream.
pub fn parse_window_minutes(raw: Option<&str>, default_minutes: i64) -> Duration {
    let minutes = raw
        .and_then(|s| s.trim().parse::<i64>().ok())
        .filter(|m| (1..=MAX_WINDOW_MINUTES).contains(m))
        .unwrap_or(default_minutes);
    Duration::minutes(minutes)
}

/// Oldest `updated_at` still inside the window. A window reaching past
/// the representable range clamps to the beginning of time and simply
/// matches every record.
pub fn window_cutoff(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    now.checked_sub_signed(window).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Clamp a caller-supplied limit to `cap`; absent or non-positive means
/// the cap itself.
pub fn effective_limit(requested: Option<i64>, cap: i64) -> i64 {
    requested.filter(|n| *n > 0).map(|n| n.min(cap)).unwrap_or(cap)
}

/// Live-device counts per region within the window.
pub fn count_by_region(conn: &mut PgConnection, now: DateTime<Utc>, window: Duration) -> Result<Vec<RegionCount>, StoreError> {
    use schema::presence_records::dsl as P;

    let rows: Vec<(String, i64)> = P::presence_records
        .filter(P::updated_at.ge(window_cutoff(now, window)))
        .group_by(P::region_code)
        .select((P::region_code, count_star()))
        .load(conn)?;
    Ok(region_counts(rows))
}

/// Cumulative per-region counts, bounded only by retention.
pub fn count_by_region_all_time(conn: &mut PgConnection) -> Result<Vec<RegionCount>, StoreError> {
    use schema::presence_records::dsl as P;

    let rows: Vec<(String, i64)> = P::presence_records
        .group_by(P::region_code)
        .select((P::region_code, count_star()))
        .load(conn)?;
    Ok(region_counts(rows))
}

/// Per-(region, status) counts within the window. Statuses outside the
/// enumeration should not exist post-validation; any that do are skipped.
pub fn count_by_region_and_status(
    conn: &mut PgConnection,
    now: DateTime<Utc>,
    window: Duration,
) -> Result<Vec<RegionStatusCount>, StoreError> {
    use schema::presence_records::dsl as P;

    let rows: Vec<(String, String, i64)> = P::presence_records
        .filter(P::updated_at.ge(window_cutoff(now, window)))
        .group_by((P::region_code, P::status))
        .select((P::region_code, P::status, count_star()))
        .load(conn)?;

    let mut counts: Vec<RegionStatusCount> = rows
        .into_iter()
        .filter_map(|(region_code, status, count)| {
            PresenceStatus::parse(&status).map(|status| RegionStatusCount {
                region_code,
                status,
                count,
            })
        })
        .collect();
    counts.sort_by(|a, b| (&a.region_code, a.status).cmp(&(&b.region_code, b.status)));
    Ok(counts)
}

/// All-time counts per display city. Records without a city are omitted.
pub fn count_by_city(conn: &mut PgConnection) -> Result<Vec<CityCount>, StoreError> {
    use schema::presence_records::dsl as P;

    let rows: Vec<(Option<String>, i64)> = P::presence_records
        .group_by(P::city_name)
        .select((P::city_name, count_star()))
        .load(conn)?;

    let mut counts: Vec<CityCount> = rows
        .into_iter()
        .filter_map(|(city, count)| {
            city.filter(|c| !c.trim().is_empty())
                .map(|city_name| CityCount { city_name, count })
        })
        .collect();
    counts.sort_by(|a, b| a.city_name.cmp(&b.city_name));
    Ok(counts)
}

/// Device counts per display cell within the window. Only records with
/// coordinates participate; each is re-bucketed at the requested cell
/// size.
pub fn count_by_display_cell(
    conn: &mut PgConnection,
    now: DateTime<Utc>,
    window: Duration,
    cell_size_degrees: f64,
) -> Result<Vec<CellCount>, StoreError> {
    let points = load_points(conn, now, window)?;
    Ok(cells_from_points(&points, cell_size_degrees))
}

/// Like `count_by_display_cell`, but the per-cell value is a breakdown
/// over the status enumeration.
pub fn count_by_display_cell_and_status(
    conn: &mut PgConnection,
    now: DateTime<Utc>,
    window: Duration,
    cell_size_degrees: f64,
) -> Result<Vec<CellStatusCount>, StoreError> {
    use schema::presence_records::dsl as P;

    let rows: Vec<(Option<f64>, Option<f64>, String)> = P::presence_records
        .filter(P::updated_at.ge(window_cutoff(now, window)))
        .filter(P::latitude.is_not_null())
        .filter(P::longitude.is_not_null())
        .select((P::latitude, P::longitude, P::status))
        .load(conn)?;

    let points: Vec<(f64, f64, String)> = rows
        .into_iter()
        .filter_map(|(lat, lng, status)| lat.zip(lng).map(|(lat, lng)| (lat, lng, status)))
        .collect();
    Ok(cells_with_status_breakdown(&points, cell_size_degrees))
}

/// Most-recent coordinate-bearing records, capped at
/// [`MAX_RECENT_LIMIT`]. Message-blind: items expose only whether a
/// message exists.
pub fn list_recent_with_coordinates(
    conn: &mut PgConnection,
    now: DateTime<Utc>,
    window: Duration,
    limit: Option<i64>,
) -> Result<Vec<RecordView>, StoreError> {
    use schema::presence_records::dsl as P;

    let records: Vec<PresenceRecord> = P::presence_records
        .filter(P::updated_at.ge(window_cutoff(now, window)))
        .filter(P::latitude.is_not_null())
        .filter(P::longitude.is_not_null())
        .order(P::updated_at.desc())
        .limit(effective_limit(limit, MAX_RECENT_LIMIT))
        .select(PresenceRecord::as_select())
        .load(conn)?;

    Ok(records
        .into_iter()
        .filter_map(|r| {
            r.latitude.zip(r.longitude).map(|(latitude, longitude)| RecordView {
                device_id: r.device_id,
                status: r.status,
                latitude,
                longitude,
                has_message: r.message.is_some(),
                updated_at: r.updated_at,
            })
        })
        .collect())
}

/// Messages currently live in the same ~11 km area bucket as the
/// supplied coordinates.
///
/// Gated: unentitled devices get `is_premium: false` with an empty list,
/// no error. The area code is derived live from the supplied coordinates
/// and ignores whatever the caller's own stored record says; invalid
/// coordinates yield an empty result for entitled callers.
pub fn messages_in_same_bucket(
    conn: &mut PgConnection,
    device_id: &str,
    lat: f64,
    lng: f64,
    now: DateTime<Utc>,
    window: Duration,
    limit: Option<i64>,
) -> Result<BucketMessages, StoreError> {
    use schema::presence_records::dsl as P;

    if !entitlements::is_premium(conn, device_id)? {
        return Ok(BucketMessages {
            is_premium: false,
            area_code: None,
            messages: Vec::new(),
        });
    }

    let Some(coordinates) = geo::sanitize_coordinates(Some(lat), Some(lng)) else {
        return Ok(BucketMessages {
            is_premium: true,
            area_code: None,
            messages: Vec::new(),
        });
    };
    let area_code = geo::derive_area_code(Some(coordinates), "");

    let records: Vec<PresenceRecord> = P::presence_records
        .filter(P::area_code.eq(&area_code))
        .filter(P::message.is_not_null())
        .filter(P::updated_at.ge(window_cutoff(now, window)))
        .order(P::updated_at.desc())
        .limit(effective_limit(limit, DEFAULT_BUCKET_MESSAGE_LIMIT))
        .select(PresenceRecord::as_select())
        .load(conn)?;

    let messages = records
        .into_iter()
        .filter_map(|r| {
            r.message.map(|message| BucketMessage {
                device_id: r.device_id,
                status: r.status,
                message,
                updated_at: r.updated_at,
            })
        })
        .collect();

    Ok(BucketMessages {
        is_premium: true,
        area_code: Some(area_code),
        messages,
    })
}

fn load_points(conn: &mut PgConnection, now: DateTime<Utc>, window: Duration) -> Result<Vec<(f64, f64)>, StoreError> {
    use schema::presence_records::dsl as P;

    let rows: Vec<(Option<f64>, Option<f64>)> = P::presence_records
        .filter(P::updated_at.ge(window_cutoff(now, window)))
        .filter(P::latitude.is_not_null())
        .filter(P::longitude.is_not_null())
        .select((P::latitude, P::longitude))
        .load(conn)?;
    Ok(rows.into_iter().filter_map(|(lat, lng)| lat.zip(lng)).collect())
}

fn region_counts(rows: Vec<(String, i64)>) -> Vec<RegionCount> {
    let mut counts: Vec<RegionCount> = rows
        .into_iter()
        .map(|(region_code, count)| RegionCount { region_code, count })
        .collect();
    counts.sort_by(|a, b| a.region_code.cmp(&b.region_code));
    counts
}

// Cells are keyed by micro-degrees so float identity never decides
// bucket membership.
fn cell_key(lat: f64, lng: f64) -> (i64, i64) {
    ((lat * 1e6).round() as i64, (lng * 1e6).round() as i64)
}

fn cell_coords(key: (i64, i64)) -> (f64, f64) {
    (key.0 as f64 / 1e6, key.1 as f64 / 1e6)
}

fn cells_from_points(points: &[(f64, f64)], cell_size_degrees: f64) -> Vec<CellCount> {
    let mut cells: BTreeMap<(i64, i64), i64> = BTreeMap::new();
    for (lat, lng) in points {
        let (cell_lat, cell_lng) = geo::derive_display_cell(*lat, *lng, cell_size_degrees);
        *cells.entry(cell_key(cell_lat, cell_lng)).or_insert(0) += 1;
    }
    cells
        .into_iter()
        .map(|(key, count)| {
            let (cell_lat, cell_lng) = cell_coords(key);
            CellCount {
                cell_lat,
                cell_lng,
                count,
            }
        })
        .collect()
}

fn cells_with_status_breakdown(points: &[(f64, f64, String)], cell_size_degrees: f64) -> Vec<CellStatusCount> {
    let mut cells: BTreeMap<(i64, i64), BTreeMap<PresenceStatus, i64>> = BTreeMap::new();
    for (lat, lng, status) in points {
        // Post-validation this always parses; skip rather than crash if
        // an out-of-enumeration value ever reaches the table.
        let Some(status) = PresenceStatus::parse(status) else {
            continue;
        };
        let (cell_lat, cell_lng) = geo::derive_display_cell(*lat, *lng, cell_size_degrees);
        *cells
            .entry(cell_key(cell_lat, cell_lng))
            .or_default()
            .entry(status)
            .or_insert(0) += 1;
    }
    cells
        .into_iter()
        .map(|(key, counts)| {
            let (cell_lat, cell_lng) = cell_coords(key);
            CellStatusCount {
                cell_lat,
                cell_lng,
                counts,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_parsing_falls_back_on_garbage() {
        assert_eq!(parse_window_minutes(None, 30), Duration::minutes(30));
        assert_eq!(parse_window_minutes(Some("45"), 30), Duration::minutes(45));
        assert_eq!(parse_window_minutes(Some(" 10 "), 30), Duration::minutes(10));
        assert_eq!(parse_window_minutes(Some("abc"), 30), Duration::minutes(30));
        assert_eq!(parse_window_minutes(Some("-5"), 30), Duration::minutes(30));
        assert_eq!(parse_window_minutes(Some("0"), 30), Duration::minutes(30));
        assert_eq!(parse_window_minutes(Some("1.5"), 30), Duration::minutes(30));
    }

    #[test]
    fn oversized_windows_fall_back_instead_of_overflowing() {
        // Large enough to overflow Duration::minutes' millisecond math.
        assert_eq!(parse_window_minutes(Some("1000000000000000"), 30), Duration::minutes(30));
        // Survives Duration::minutes but would push the cutoff out of
        // the representable datetime range.
        assert_eq!(parse_window_minutes(Some("1000000000000"), 30), Duration::minutes(30));
        assert_eq!(
            parse_window_minutes(Some(&i64::MAX.to_string()), 30),
            Duration::minutes(30)
        );
        // The bound itself is still accepted.
        assert_eq!(
            parse_window_minutes(Some(&MAX_WINDOW_MINUTES.to_string()), 30),
            Duration::minutes(MAX_WINDOW_MINUTES)
        );
    }

    #[test]
    fn cutoff_clamps_instead_of_panicking() {
        let now = Utc::now();
        assert_eq!(
            window_cutoff(now, Duration::milliseconds(i64::MAX)),
            DateTime::<Utc>::MIN_UTC
        );
        assert_eq!(window_cutoff(now, Duration::minutes(30)), now - Duration::minutes(30));
    }

    #[test]
    fn longer_windows_never_match_fewer_records() {
        let now = Utc::now();
        let updated_ats = [
            now - Duration::minutes(5),
            now - Duration::minutes(25),
            now - Duration::minutes(45),
            now - Duration::hours(3),
        ];

        let matched = |window: Duration| {
            let cutoff = window_cutoff(now, window);
            updated_ats.iter().filter(|ts| **ts >= cutoff).count()
        };

        let mut previous = 0;
        for minutes in [10, 30, 60, 240, MAX_WINDOW_MINUTES] {
            let count = matched(Duration::minutes(minutes));
            assert!(count >= previous, "window {} min matched fewer records", minutes);
            previous = count;
        }
        assert_eq!(matched(Duration::minutes(MAX_WINDOW_MINUTES)), updated_ats.len());
    }

    #[test]
    fn limits_are_capped() {
        assert_eq!(effective_limit(None, 500), 500);
        assert_eq!(effective_limit(Some(10), 500), 10);
        assert_eq!(effective_limit(Some(9999), 500), 500);
        assert_eq!(effective_limit(Some(0), 500), 500);
        assert_eq!(effective_limit(Some(-3), 500), 500);
    }

    #[test]
    fn nearby_points_aggregate_into_one_cell() {
        let points = vec![(35.681, 139.767), (35.69, 139.75), (34.70, 135.50)];
        let cells = cells_from_points(&points, 0.2);
        assert_eq!(cells.len(), 2);
        assert_eq!(cells.iter().map(|c| c.count).sum::<i64>(), 3);
        let tokyo = cells.iter().find(|c| c.count == 2).unwrap();
        assert!((tokyo.cell_lat - 35.6).abs() < 1e-6);
        assert!((tokyo.cell_lng - 139.8).abs() < 1e-6);
    }

    #[test]
    fn status_breakdown_skips_unknown_statuses() {
        let points = vec![
            (35.681, 139.767, "awake".to_string()),
            (35.69, 139.75, "working".to_string()),
            (35.70, 139.76, "asleep".to_string()),
        ];
        let cells = cells_with_status_breakdown(&points, 0.2);
        assert_eq!(cells.len(), 1);
        let counts = &cells[0].counts;
        assert_eq!(counts.get(&PresenceStatus::Awake), Some(&1));
        assert_eq!(counts.get(&PresenceStatus::Working), Some(&1));
        assert_eq!(counts.values().sum::<i64>(), 2);
    }

    #[test]
    fn cell_keys_do_not_depend_on_float_identity() {
        // Two coordinates in the same cell whose snapped values come out
        // of different arithmetic paths.
        let points = vec![(35.600000000000001, 139.8), (35.6, 139.79999999999999)];
        let cells = cells_from_points(&points, 0.2);
        assert_eq!(cells.len(), 1);
        assert_eq!(cells[0].count, 2);
    }
}
