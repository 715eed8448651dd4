//! Presence store: latest-state cache of anonymous device presence
//! signals with privacy-preserving spatial bucketing, entitlement-gated
//! messages, windowed aggregation, and retention sweeping.
//!
//! The HTTP adapter links against this crate and calls into
//! `services::*`; the binary in `main.rs` only runs migrations, optional
//! seeding, and the retention sweeper.

pub mod auth;
pub mod config;
pub mod db {
    pub mod models;
    pub mod schema;
}
pub mod error;
pub mod geo;
pub mod services {
    pub mod aggregate;
    pub mod entitlements;
    pub mod fake_data;
    pub mod presence;
    pub mod sweeper;
}
