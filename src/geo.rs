//! Spatial bucketing for presence records.
//!
//! Two resolutions, both derived on demand from raw coordinates:
//! - `derive_area_code`: one-tenth-degree bucket (~11 km) used to scope
//!   message sharing. Stored on the record.
//! - `derive_display_cell`: configurable coarser cell (~20 km by default)
//!   used only for map aggregation. Recomputed per query, never stored.

/// Default display-cell edge length in degrees (~20 km).
pub const DEFAULT_DISPLAY_CELL_DEGREES: f64 = 0.2;

/// Exclusive latitude bound. Poles are cut off so every bucket has a
/// meaningful east-west extent.
pub const LAT_LIMIT: f64 = 85.0;
/// Exclusive longitude bound.
pub const LNG_LIMIT: f64 = 180.0;

/// Validate a raw coordinate pair from an untrusted client.
///
/// Returns `Some((lat, lng))` only when both values are present, finite,
/// strictly inside the valid ranges, and not exactly (0, 0) — the null
/// island default emitted by clients without a GPS fix. Anything else is
/// treated as "no location", never as an error.
pub fn sanitize_coordinates(lat: Option<f64>, lng: Option<f64>) -> Option<(f64, f64)> {
    let (lat, lng) = lat.zip(lng)?;
    if !lat.is_finite() || !lng.is_finite() {
        return None;
    }
    if lat.abs() >= LAT_LIMIT || lng.abs() >= LNG_LIMIT {
        return None;
    }
    if lat == 0.0 && lng == 0.0 {
        return None;
    }
    Some((lat, lng))
}

/// Derive the privacy-preserving area code for a record.
///
/// With coordinates: both axes rounded to one-tenth of a degree and
/// formatted with fixed one-decimal precision, e.g. `"35.7,139.8"`.
/// Without coordinates: a per-region fallback bucket shared by every
/// coordinate-less device in that region, e.g. `"kanto_center"`.
pub fn derive_area_code(coordinates: Option<(f64, f64)>, region_code: &str) -> String {
    match coordinates {
        Some((lat, lng)) => format!("{:.1},{:.1}", round_tenth(lat), round_tenth(lng)),
        None => format!("{}_center", region_code),
    }
}

/// Snap a coordinate to the nearest multiple of `cell_size_degrees`.
///
/// Idempotent: re-bucketing an already-bucketed coordinate yields the
/// same cell.
pub fn derive_display_cell(lat: f64, lng: f64, cell_size_degrees: f64) -> (f64, f64) {
    (
        round_to_step(lat, cell_size_degrees),
        round_to_step(lng, cell_size_degrees),
    )
}

fn round_tenth(v: f64) -> f64 {
    normalize_zero((v * 10.0).round() / 10.0)
}

fn round_to_step(v: f64, step: f64) -> f64 {
    normalize_zero((v / step).round() * step)
}

// Keeps -0.0 out of bucket identifiers.
fn normalize_zero(v: f64) -> f64 {
    if v == 0.0 { 0.0 } else { v }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn area_code_rounds_to_tenth_of_degree() {
        // Tokyo station
        assert_eq!(derive_area_code(Some((35.681, 139.767)), "kanto"), "35.7,139.8");
    }

    #[test]
    fn nearby_coordinates_share_a_bucket() {
        let a = derive_area_code(Some((35.64, 139.72)), "kanto");
        let b = derive_area_code(Some((35.649, 139.72)), "kanto");
        assert_eq!(a, b);
        assert_eq!(a, "35.6,139.7");
    }

    #[test]
    fn area_code_is_deterministic() {
        let first = derive_area_code(Some((51.5074, -0.1278)), "europe");
        let second = derive_area_code(Some((51.5074, -0.1278)), "europe");
        assert_eq!(first, second);
    }

    #[test]
    fn missing_coordinates_fall_back_to_region_bucket() {
        assert_eq!(derive_area_code(None, "kansai"), "kansai_center");
        assert_eq!(derive_area_code(None, "unknown"), "unknown_center");
    }

    #[test]
    fn negative_zero_never_appears_in_area_codes() {
        assert_eq!(derive_area_code(Some((-0.04, 139.8)), "kanto"), "0.0,139.8");
    }

    #[test]
    fn sanitize_accepts_valid_pairs() {
        assert_eq!(sanitize_coordinates(Some(35.68), Some(139.77)), Some((35.68, 139.77)));
        assert_eq!(sanitize_coordinates(Some(-33.87), Some(151.21)), Some((-33.87, 151.21)));
    }

    #[test]
    fn sanitize_rejects_null_island() {
        assert_eq!(sanitize_coordinates(Some(0.0), Some(0.0)), None);
        // One zero axis is fine
        assert_eq!(sanitize_coordinates(Some(0.0), Some(100.0)), Some((0.0, 100.0)));
    }

    #[test]
    fn sanitize_rejects_out_of_range_values() {
        assert_eq!(sanitize_coordinates(Some(90.0), Some(10.0)), None);
        assert_eq!(sanitize_coordinates(Some(85.0), Some(10.0)), None);
        assert_eq!(sanitize_coordinates(Some(10.0), Some(180.0)), None);
        assert_eq!(sanitize_coordinates(Some(10.0), Some(-200.0)), None);
    }

    #[test]
    fn sanitize_rejects_partial_and_non_finite_pairs() {
        assert_eq!(sanitize_coordinates(Some(35.0), None), None);
        assert_eq!(sanitize_coordinates(None, Some(139.0)), None);
        assert_eq!(sanitize_coordinates(None, None), None);
        assert_eq!(sanitize_coordinates(Some(f64::NAN), Some(139.0)), None);
        assert_eq!(sanitize_coordinates(Some(35.0), Some(f64::INFINITY)), None);
    }

    fn assert_cell_eq(actual: (f64, f64), expected: (f64, f64)) {
        // Grid multiples like 178 * 0.2 are not exactly representable.
        assert!(
            (actual.0 - expected.0).abs() < 1e-9 && (actual.1 - expected.1).abs() < 1e-9,
            "cell {:?} != expected {:?}",
            actual,
            expected
        );
    }

    #[test]
    fn display_cell_snaps_to_cell_grid() {
        assert_cell_eq(derive_display_cell(35.681, 139.767, 0.2), (35.6, 139.8));
        // f64::round rounds half away from zero: 35.75 / 0.5 = 71.5 -> 72
        assert_cell_eq(derive_display_cell(35.75, 139.65, 0.5), (36.0, 139.5));
    }

    #[test]
    fn display_cell_is_idempotent() {
        let (lat, lng) = derive_display_cell(48.8566, 2.3522, 0.2);
        assert_eq!(derive_display_cell(lat, lng, 0.2), (lat, lng));
    }
}
