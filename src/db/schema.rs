//! Handwritten Diesel schema declarations used by model structs.
//!
//! Migrations define the actual tables and constraints. This module only
//! provides `diesel::table!` declarations so we can derive
//! Insertable/Queryable in a type-safe way without running
//! `diesel print-schema`.

// Latest state per device. The primary key on device_id is the
// uniqueness constraint that makes replace-or-create atomic: upserts go
// through INSERT .. ON CONFLICT, never a read-then-write sequence.
diesel::table! {
    presence_records (device_id) {
        device_id -> Text,
        status -> Text,
        region_code -> Text,
        city_name -> Nullable<Text>,
        latitude -> Nullable<Double>,
        longitude -> Nullable<Double>,
        area_code -> Text,
        message -> Nullable<Text>,
        updated_at -> Timestamptz,
    }
}

// Per-device premium flag. Read by upsert, written only by the
// administrative set-entitlement operation.
diesel::table! {
    entitlements (device_id) {
        device_id -> Text,
        is_premium -> Bool,
        updated_at -> Timestamptz,
    }
}

diesel::allow_tables_to_appear_in_same_query!(presence_records, entitlements,);
