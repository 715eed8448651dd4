//! Diesel model structs for presence records and entitlements.
//!
//! `status` is stored as text but constrained to the closed
//! [`PresenceStatus`] enumeration at the service boundary; rows read
//! back with an unrecognized status are skipped by aggregation rather
//! than crashing a query.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::db::schema;

/// Closed set of device states. Wire names match the mobile client
/// payloads (`cantSleep`, not `cant_sleep`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PresenceStatus {
    Awake,
    Free,
    CantSleep,
    Working,
}

impl PresenceStatus {
    pub const ALL: [PresenceStatus; 4] = [
        PresenceStatus::Awake,
        PresenceStatus::Free,
        PresenceStatus::CantSleep,
        PresenceStatus::Working,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PresenceStatus::Awake => "awake",
            PresenceStatus::Free => "free",
            PresenceStatus::CantSleep => "cantSleep",
            PresenceStatus::Working => "working",
        }
    }

    /// Strict parse; anything outside the enumeration is `None`.
    pub fn parse(s: &str) -> Option<PresenceStatus> {
        match s {
            "awake" => Some(PresenceStatus::Awake),
            "free" => Some(PresenceStatus::Free),
            "cantSleep" => Some(PresenceStatus::CantSleep),
            "working" => Some(PresenceStatus::Working),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = schema::presence_records)]
#[diesel(primary_key(device_id))]
pub struct PresenceRecord {
    pub device_id: String,
    pub status: String,
    pub region_code: String,
    pub city_name: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub area_code: String,
    pub message: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl PresenceRecord {
    /// Stored status parsed back into the closed enumeration.
    pub fn presence_status(&self) -> Option<PresenceStatus> {
        PresenceStatus::parse(&self.status)
    }
}

#[derive(Debug, Clone, Insertable, Serialize, Deserialize)]
#[diesel(table_name = schema::presence_records)]
pub struct NewPresenceRecord {
    pub device_id: String,
    pub status: String,
    pub region_code: String,
    pub city_name: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub area_code: String,
    pub message: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = schema::entitlements)]
#[diesel(primary_key(device_id))]
pub struct EntitlementEntry {
    pub device_id: String,
    pub is_premium: bool,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable, Serialize, Deserialize)]
#[diesel(table_name = schema::entitlements)]
pub struct NewEntitlement {
    pub device_id: String,
    pub is_premium: bool,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_text() {
        for status in PresenceStatus::ALL {
            assert_eq!(PresenceStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn status_parse_is_strict() {
        assert_eq!(PresenceStatus::parse("asleep"), None);
        assert_eq!(PresenceStatus::parse("AWAKE"), None);
        assert_eq!(PresenceStatus::parse("cant_sleep"), None);
        assert_eq!(PresenceStatus::parse(""), None);
    }

    #[test]
    fn status_serde_names_match_wire_format() {
        assert_eq!(serde_json::to_string(&PresenceStatus::CantSleep).unwrap(), "\"cantSleep\"");
        let parsed: PresenceStatus = serde_json::from_str("\"awake\"").unwrap();
        assert_eq!(parsed, PresenceStatus::Awake);
    }
}
