//! Presence store: validated upsert and retention purge.
//!
//! One live record per device. The replace-or-create step is a single
//! `INSERT .. ON CONFLICT (device_id) DO UPDATE` statement, so concurrent
//! upserts for the same device can never produce two live rows and
//! aggregation never observes a half-written record.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::PgConnection;
use log::debug;
use serde::Deserialize;

use crate::db::models::{NewPresenceRecord, PresenceRecord, PresenceStatus};
use crate::db::schema;
use crate::error::StoreError;
use crate::geo;
use crate::services::entitlements;

/// Region tag applied when the caller sends none. Validation here is
/// deliberately permissive: device clients cannot be trusted to send
/// clean data, and the product goal is best-effort aggregation.
pub const FALLBACK_REGION: &str = "unknown";

/// Inbound presence signal as the HTTP adapter hands it over. Raw and
/// untrusted except for `device_id`, which the adapter guarantees.
#[derive(Debug, Clone, Deserialize)]
pub struct UpsertRequest {
    pub device_id: String,
    pub status: String,
    pub region_code: Option<String>,
    pub city_name: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub message: Option<String>,
}

/// Create or replace the record for `request.device_id`.
///
/// Only an out-of-enumeration status rejects. Bad coordinates are
/// cleared, not rejected, and message text from unentitled devices is
/// dropped silently; see `gate_message`.
pub fn upsert(
    conn: &mut PgConnection,
    request: &UpsertRequest,
    message_max_chars: usize,
    now: DateTime<Utc>,
) -> Result<PresenceRecord, StoreError> {
    use schema::presence_records::dsl as P;

    let status = PresenceStatus::parse(&request.status)
        .ok_or_else(|| StoreError::InvalidStatus(request.status.clone()))?;

    let region_code = normalize_region(request.region_code.as_deref());
    let coordinates = geo::sanitize_coordinates(request.latitude, request.longitude);
    let area_code = geo::derive_area_code(coordinates, &region_code);

    // Entitlement is read before the write; a concurrent set_premium may
    // not be visible yet, which is accepted.
    let premium = entitlements::is_premium(conn, &request.device_id)?;
    let message = gate_message(request.message.as_deref(), premium, message_max_chars);

    let new_row = NewPresenceRecord {
        device_id: request.device_id.clone(),
        status: status.as_str().to_string(),
        region_code,
        city_name: request.city_name.clone(),
        latitude: coordinates.map(|(lat, _)| lat),
        longitude: coordinates.map(|(_, lng)| lng),
        area_code,
        message,
        updated_at: now,
    };

    diesel::insert_into(P::presence_records)
        .values(&new_row)
        .on_conflict(P::device_id)
        .do_update()
        .set((
            P::status.eq(new_row.status.clone()),
            P::region_code.eq(new_row.region_code.clone()),
            P::city_name.eq(new_row.city_name.clone()),
            P::latitude.eq(new_row.latitude),
            P::longitude.eq(new_row.longitude),
            P::area_code.eq(new_row.area_code.clone()),
            P::message.eq(new_row.message.clone()),
            P::updated_at.eq(new_row.updated_at),
        ))
        .execute(conn)?;

    let record: PresenceRecord = P::presence_records
        .filter(P::device_id.eq(&new_row.device_id))
        .select(PresenceRecord::as_select())
        .first(conn)?;

    debug!(
        "Presence: upsert device={} status={} area={} message={}",
        record.device_id,
        record.status,
        record.area_code,
        record.message.is_some()
    );
    Ok(record)
}

/// Remove every record with `updated_at` strictly before `cutoff`.
/// Reports the number of rows deleted; running it twice in a row with no
/// new writes deletes nothing the second time.
pub fn purge_older_than(conn: &mut PgConnection, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
    use schema::presence_records::dsl as P;

    let deleted = diesel::delete(P::presence_records.filter(P::updated_at.lt(cutoff))).execute(conn)?;
    Ok(deleted)
}

/// Normalize a caller-supplied region tag; empty or missing becomes the
/// shared fallback.
pub fn normalize_region(raw: Option<&str>) -> String {
    match raw.map(str::trim) {
        Some(r) if !r.is_empty() => r.to_string(),
        _ => FALLBACK_REGION.to_string(),
    }
}

/// Decide what message, if any, gets stored.
///
/// Free devices can never cause a message to be stored; the text is
/// dropped without an error. Entitled devices get their message trimmed
/// and truncated to the server-side cap (counted in characters).
pub fn gate_message(raw: Option<&str>, premium: bool, max_chars: usize) -> Option<String> {
    if !premium {
        return None;
    }
    let trimmed = raw?.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.chars().take(max_chars).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_defaults_to_unknown() {
        assert_eq!(normalize_region(None), "unknown");
        assert_eq!(normalize_region(Some("")), "unknown");
        assert_eq!(normalize_region(Some("   ")), "unknown");
        assert_eq!(normalize_region(Some("kanto")), "kanto");
        assert_eq!(normalize_region(Some("  kansai ")), "kansai");
    }

    #[test]
    fn free_devices_never_store_messages() {
        assert_eq!(gate_message(Some("hello"), false, 30), None);
        assert_eq!(gate_message(None, false, 30), None);
    }

    #[test]
    fn premium_messages_are_trimmed_and_kept() {
        assert_eq!(gate_message(Some("  hi  "), true, 30), Some("hi".to_string()));
        assert_eq!(gate_message(Some("   "), true, 30), None);
        assert_eq!(gate_message(None, true, 30), None);
    }

    #[test]
    fn premium_messages_are_truncated_to_cap() {
        let long = "a".repeat(40);
        let stored = gate_message(Some(&long), true, 30).unwrap();
        assert_eq!(stored.chars().count(), 30);
    }

    #[test]
    fn truncation_counts_characters_not_bytes() {
        let stored = gate_message(Some("ねむれないよるだからこそ"), true, 5).unwrap();
        assert_eq!(stored, "ねむれない");
    }
}
