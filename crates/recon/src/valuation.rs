//! Segment valuation: billed value and layer thickness for completed work.

use crate::config::PricingConfig;
use crate::error::ReconError;
use crate::model::{StreetSegment, ThicknessSource, Valuation};

/// Layer thickness in cm from tonnage and executed area.
///
/// Returns `None` when either input is zero, in which case callers keep
/// whatever thickness was stored before.
pub fn thickness_cm(tonnage: f64, executed_area: f64, density_t_per_m3: f64) -> Option<f64> {
    if tonnage > 0.0 && executed_area > 0.0 {
        Some((tonnage / executed_area) / density_t_per_m3 * 100.0)
    } else {
        None
    }
}

/// Value a segment at `price_per_area`.
///
/// Only completed segments with executed area are valued; anything else is
/// `NotYetValuable`.
pub fn valuate_segment(
    segment: &StreetSegment,
    price_per_area: f64,
    pricing: &PricingConfig,
) -> Result<Valuation, ReconError> {
    segment.validate()?;

    if !segment.is_completed() || !segment.has_execution_data() {
        return Ok(Valuation::NotYetValuable);
    }

    let executed = segment.executed();
    let total_value = executed * price_per_area;

    let (thickness_cm, thickness_source) =
        match thickness_cm(segment.tonnage, executed, pricing.density_t_per_m3) {
            Some(t) => (Some(t), ThicknessSource::Computed),
            None => (segment.thickness_cm, ThicknessSource::Retained),
        };

    Ok(Valuation::Valued {
        total_value,
        thickness_cm,
        thickness_source,
    })
}

/// Return a copy of `segment` with the valuation fields written.
///
/// Segments that are not yet valuable come back unchanged.
pub fn apply_valuation(
    segment: &StreetSegment,
    price_per_area: f64,
    pricing: &PricingConfig,
) -> Result<(StreetSegment, Valuation), ReconError> {
    let valuation = valuate_segment(segment, price_per_area, pricing)?;
    let mut updated = segment.clone();

    if let Valuation::Valued {
        total_value,
        thickness_cm,
        ..
    } = valuation
    {
        updated.price_per_area = Some(price_per_area);
        updated.total_value = Some(total_value);
        updated.thickness_cm = thickness_cm;
    }

    Ok((updated, valuation))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SegmentStatus;

    fn completed(executed: Option<f64>, tonnage: f64, stored_thickness: Option<f64>) -> StreetSegment {
        StreetSegment {
            id: "rua_1".into(),
            site_id: "obra_1".into(),
            name: "Rua das Flores".into(),
            planned_area: 500.0,
            executed_area: executed,
            tonnage,
            status: SegmentStatus::Completed,
            price_per_area: None,
            total_value: None,
            thickness_cm: stored_thickness,
            deleted_at: None,
            completed_at: None,
        }
    }

    #[test]
    fn scenario_500m2_60t() {
        let seg = completed(Some(500.0), 60.0, None);
        let v = valuate_segment(&seg, 13.0, &PricingConfig::default()).unwrap();
        match v {
            Valuation::Valued {
                total_value,
                thickness_cm,
                thickness_source,
            } => {
                assert!((total_value - 6500.0).abs() < 1e-9);
                assert!((thickness_cm.unwrap() - 5.0).abs() < 1e-9);
                assert_eq!(thickness_source, ThicknessSource::Computed);
            }
            other => panic!("expected Valued, got {other:?}"),
        }
    }

    #[test]
    fn zero_tonnage_retains_stored_thickness() {
        let seg = completed(Some(500.0), 0.0, Some(4.2));
        let v = valuate_segment(&seg, 10.0, &PricingConfig::default()).unwrap();
        assert_eq!(
            v,
            Valuation::Valued {
                total_value: 5000.0,
                thickness_cm: Some(4.2),
                thickness_source: ThicknessSource::Retained,
            }
        );
    }

    #[test]
    fn zero_tonnage_without_stored_thickness_stays_absent() {
        let seg = completed(Some(500.0), 0.0, None);
        let (updated, _) = apply_valuation(&seg, 10.0, &PricingConfig::default()).unwrap();
        assert_eq!(updated.thickness_cm, None);
        assert_eq!(updated.total_value, Some(5000.0));
    }

    #[test]
    fn not_completed_is_noop() {
        let mut seg = completed(Some(500.0), 60.0, Some(3.0));
        seg.status = SegmentStatus::InProgress;
        let (updated, v) = apply_valuation(&seg, 13.0, &PricingConfig::default()).unwrap();
        assert_eq!(v, Valuation::NotYetValuable);
        assert_eq!(updated, seg);
    }

    #[test]
    fn no_executed_area_is_noop() {
        let seg = completed(None, 60.0, None);
        let v = valuate_segment(&seg, 13.0, &PricingConfig::default()).unwrap();
        assert_eq!(v, Valuation::NotYetValuable);

        let seg = completed(Some(0.0), 60.0, None);
        let v = valuate_segment(&seg, 13.0, &PricingConfig::default()).unwrap();
        assert_eq!(v, Valuation::NotYetValuable);
    }

    #[test]
    fn density_is_configurable() {
        let pricing = PricingConfig {
            density_t_per_m3: 2.0,
            ..PricingConfig::default()
        };
        let seg = completed(Some(100.0), 10.0, None);
        let (updated, _) = apply_valuation(&seg, 1.0, &pricing).unwrap();
        // (10 / 100) / 2.0 * 100 = 5.0
        assert!((updated.thickness_cm.unwrap() - 5.0).abs() < 1e-9);
        assert_eq!(updated.price_per_area, Some(1.0));
    }

    #[test]
    fn negative_executed_area_rejected() {
        let seg = completed(Some(-10.0), 1.0, None);
        assert!(valuate_segment(&seg, 1.0, &PricingConfig::default()).is_err());
    }
}
