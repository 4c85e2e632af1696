//! Area-weighted unit price for a site.
//!
//! `price_per_area = Σ service.total_value / Σ segment.planned_area`, with
//! soft-deleted segments excluded from the area base. A zero area base yields
//! a price of 0 rather than an error: "no plan yet" is a valid transient state.

use crate::error::ReconError;
use crate::model::{PriceBasis, Service, StreetSegment};

/// Non-deleted segments, the only rows that feed aggregate computations.
pub fn active_segments(segments: &[StreetSegment]) -> impl Iterator<Item = &StreetSegment> {
    segments.iter().filter(|s| !s.is_deleted())
}

/// Σ planned area over non-deleted segments.
pub fn total_planned_area(segments: &[StreetSegment]) -> f64 {
    active_segments(segments).map(|s| s.planned_area).sum()
}

/// Compute the price basis for one site's services and segments.
pub fn price_basis(
    services: &[Service],
    segments: &[StreetSegment],
) -> Result<PriceBasis, ReconError> {
    for service in services {
        service.validate()?;
    }
    for segment in segments {
        segment.validate()?;
    }

    let total_service_value: f64 = services.iter().map(|s| s.total_value).sum();
    let total_planned_area = total_planned_area(segments);

    let zero_area_base = total_planned_area <= 0.0;
    let price_per_area = if zero_area_base {
        0.0
    } else {
        total_service_value / total_planned_area
    };

    Ok(PriceBasis {
        total_service_value,
        total_planned_area,
        price_per_area,
        zero_area_base,
    })
}

/// Derived price-per-area; 0 when the planned area base is 0.
pub fn compute_price_per_area(
    services: &[Service],
    segments: &[StreetSegment],
) -> Result<f64, ReconError> {
    Ok(price_basis(services, segments)?.price_per_area)
}
