//! Entitlement registry: per-device premium flag.
//!
//! Reads during an upsert may be slightly stale relative to a concurrent
//! `set_premium`; eventual consistency between entitlement changes and
//! in-flight upserts is accepted rather than paid for with locking.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::PgConnection;
use log::info;

use crate::db::models::NewEntitlement;
use crate::db::schema;
use crate::error::StoreError;

/// Unknown devices are simply not premium; absence is not an error.
pub fn is_premium(conn: &mut PgConnection, device_id: &str) -> Result<bool, StoreError> {
    use schema::entitlements::dsl as E;

    let flag = E::entitlements
        .filter(E::device_id.eq(device_id))
        .select(E::is_premium)
        .first::<bool>(conn)
        .optional()?;
    Ok(flag.unwrap_or(false))
}

/// Create or overwrite the premium flag for a device. Idempotent;
/// disabling is done by flipping the flag, there is no delete.
pub fn set_premium(conn: &mut PgConnection, device_id: &str, flag: bool, now: DateTime<Utc>) -> Result<(), StoreError> {
    use schema::entitlements::dsl as E;

    let new_row = NewEntitlement {
        device_id: device_id.to_string(),
        is_premium: flag,
        updated_at: now,
    };
    diesel::insert_into(E::entitlements)
        .values(&new_row)
        .on_conflict(E::device_id)
        .do_update()
        .set((E::is_premium.eq(new_row.is_premium), E::updated_at.eq(new_row.updated_at)))
        .execute(conn)?;

    info!("Entitlements: device {} premium={}", device_id, flag);
    Ok(())
}
